//! UDPFT 수신 도구
//!
//! 사용법:
//!   udpft-recv <PORT> [--ack-timeout-ms N] [--fin-poll-ms N]
//!
//! 송신자가 SYN에 담아 보낸 경로에 파일을 만든다. 전송 한 건을 받고 종료한다.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use udpft::{Config, Receiver, UdpTransport};

/// UDP로 전송되는 파일 한 개를 받는다
#[derive(Parser, Debug)]
#[command(name = "udpft-recv", version)]
struct Args {
    /// 대기할 포트
    port: u16,

    /// DATA 수신 한 번의 대기 시간 (밀리초)
    #[arg(long)]
    ack_timeout_ms: Option<u64>,

    /// 종료 단계에서 FIN 응답을 기다리는 간격 (밀리초)
    #[arg(long)]
    fin_poll_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("수신 실패: {}", e);
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                error!("  원인: {}", cause);
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> udpft::Result<()> {
    let mut config = Config::default();
    if let Some(ms) = args.ack_timeout_ms {
        config.ack_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = args.fin_poll_ms {
        config.fin_poll_interval = Duration::from_millis(ms);
    }

    info!("UDPFT receiver starting on port {}", args.port);

    let transport = UdpTransport::listen(args.port)
        .await?
        .with_recv_buffer(config.recv_buffer_size);
    let receiver = Receiver::new(config, Arc::new(transport))?;
    let report = receiver.receive_file().await?;

    info!(
        "Received {} bytes into {}",
        report.bytes_written, report.connection.destination_path
    );
    println!("{}", report.stats.summary());
    Ok(())
}
