//! UDPFT 송신 도구
//!
//! 사용법:
//!   udpft-send <HOST> <PORT> <SOURCE> <DEST> [--window N] [--ack-timeout-ms N]
//!
//! 예시:
//!   udpft-send 127.0.0.1 9000 ./data.bin /tmp/data.bin
//!   RUST_LOG=udpft=debug udpft-send 10.0.0.2 9000 big.iso big.iso --window 1024

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use udpft::{Config, Sender, UdpTransport};

/// UDP 위에서 파일을 전송한다
#[derive(Parser, Debug)]
#[command(name = "udpft-send", version)]
struct Args {
    /// 수신자 호스트
    host: String,

    /// 수신자 포트
    port: u16,

    /// 보낼 파일
    source: PathBuf,

    /// 수신자 쪽에 만들 파일 경로
    dest: String,

    /// 동시에 미확인 상태로 둘 수 있는 DATA 패킷 수
    #[arg(long)]
    window: Option<usize>,

    /// 재전송 타임아웃 (밀리초)
    #[arg(long)]
    ack_timeout_ms: Option<u64>,
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
            error!("전송 실패: {}", e);
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
    if let Some(window) = args.window {
        config.window_cap = window;
    }
    if let Some(ms) = args.ack_timeout_ms {
        config.ack_timeout = Duration::from_millis(ms);
    }

    info!("UDPFT sender starting...");
    info!("Target: {}:{}", args.host, args.port);
    info!("Source: {:?} → {}", args.source, args.dest);
    info!("Window: {} packets, ACK timeout: {:?}", config.window_cap, config.ack_timeout);

    let transport = UdpTransport::connect((args.host.as_str(), args.port))
        .await?
        .with_recv_buffer(config.recv_buffer_size);
    let sender = Sender::new(config, Arc::new(transport))?;
    let report = sender.send_file(&args.source, &args.dest).await?;

    info!("Transfer complete: {}", report.connection.destination_path);
    println!("{}", report.stats.summary());
    Ok(())
}
