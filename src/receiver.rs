//! 수신자
//!
//! `HANDSHAKING → RECEIVING → FINALIZING → CLOSED`
//!
//! - 유효한 DATA는 중복이어도 즉시 ACK
//! - 재조립 캐시에서 floor부터 연속된 페이로드를 writer 태스크가 기록
//! - 모두 받으면 싱크를 닫고 FIN 응답이 올 때까지 FIN을 반복

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::cache::{InsertOutcome, ReassemblyCache};
use crate::connection::Connection;
use crate::packet::{Origin, Packet, SackOutcome};
use crate::pipe::ChunkWriter;
use crate::stats::TransferStats;
use crate::transport::Transport;
use crate::{Config, Error, Result};

/// SYN을 기다릴 때의 수신 대기 단위
const HANDSHAKE_POLL: Duration = Duration::from_secs(1);

/// 수신자 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Handshaking,
    Receiving,
    Finalizing,
    Closed,
}

/// 수신 결과
#[derive(Debug, Clone)]
pub struct ReceiveReport {
    pub connection: Connection,
    /// 싱크에 기록한 바이트 수
    pub bytes_written: u64,
    pub stats: TransferStats,
}

/// 수신자
pub struct Receiver<T: Transport> {
    config: Config,
    transport: Arc<T>,
    state: RwLock<ReceiverState>,
    stats: RwLock<TransferStats>,
}

impl<T: Transport> Receiver<T> {
    /// 새 수신자 생성
    pub fn new(config: Config, transport: Arc<T>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            state: RwLock::new(ReceiverState::Handshaking),
            stats: RwLock::new(TransferStats::new()),
        })
    }

    pub fn state(&self) -> ReceiverState {
        *self.state.read()
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> TransferStats {
        self.stats.read().clone()
    }

    fn set_state(&self, next: ReceiverState) {
        let mut state = self.state.write();
        if *state != next {
            debug!("수신 상태: {:?} → {:?}", *state, next);
            *state = next;
        }
    }

    /// SYN의 목적지 경로에 파일을 만들어 수신한다.
    pub async fn receive_file(&self) -> Result<ReceiveReport> {
        self.receive(|path| async move {
            let file = tokio::fs::File::create(Path::new(&path)).await?;
            Ok::<_, Error>(file)
        })
        .await
    }

    /// 전송 한 건을 수신한다. `open_sink`는 SYN을 받은 뒤 목적지 경로로 한 번 호출된다.
    pub async fn receive<F, Fut, W>(&self, open_sink: F) -> Result<ReceiveReport>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<W>>,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        *self.stats.write() = TransferStats::new();
        self.set_state(ReceiverState::Handshaking);

        let result = self.run(open_sink).await;
        self.set_state(ReceiverState::Closed);
        self.stats.write().finish();

        let (connection, bytes_written) = result?;
        info!(
            "수신 완료: {} ({} bytes, {} packets)",
            connection.destination_path, bytes_written, connection.total_packets
        );
        Ok(ReceiveReport {
            connection,
            bytes_written,
            stats: self.stats(),
        })
    }

    async fn run<F, Fut, W>(&self, open_sink: F) -> Result<(Connection, u64)>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<W>>,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (total, destination) = self.await_syn().await?;
        self.transport.pin_peer().await?;

        let sink = match open_sink(destination.clone()).await {
            Ok(sink) => sink,
            Err(e) => {
                warn!("싱크 열기 실패: {}: {}", destination, e);
                self.reply_sack(SackOutcome::Failure).await?;
                return Err(e);
            }
        };
        self.reply_sack(SackOutcome::Success).await?;

        let connection = Connection::new(self.transport.peer_addr(), total, destination);
        self.stats.write().total_packets = total as u64;
        info!(
            "핸드쉐이크 완료: {} packets → {}",
            total, connection.destination_path
        );

        self.set_state(ReceiverState::Receiving);
        let bytes_written = self.receive_data(sink, total).await?;

        self.set_state(ReceiverState::Finalizing);
        self.finalize(total).await?;
        Ok((connection, bytes_written))
    }

    /// 손상되지 않은 SYN을 기다린다. 손상된 패킷에는 실패 SACK으로 답한다.
    async fn await_syn(&self) -> Result<(u32, String)> {
        loop {
            let Some(datagram) = self.transport.recv(HANDSHAKE_POLL).await? else {
                continue;
            };

            match Packet::decode(&datagram, Origin::Sender) {
                Ok(Packet::Syn {
                    total_packets,
                    destination,
                }) => return Ok((total_packets, destination)),
                Ok(other) => debug!("핸드쉐이크 중 {} 무시", other.kind().as_str()),
                Err(e) if e.is_corruption() || matches!(e, Error::InvalidDestinationPath) => {
                    warn!("손상된 SYN: {}", e);
                    self.stats.write().corrupted_dropped += 1;
                    self.reply_sack(SackOutcome::Failure).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// RECEIVING: 모든 시퀀스 번호를 받을 때까지 ACK 후 캐시에 넣는다.
    async fn receive_data<W>(&self, sink: W, total: u32) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let cache = Arc::new(ReassemblyCache::new());
        let writer = ChunkWriter::spawn(
            sink,
            self.config.max_body_size,
            self.config.packets_per_write_chunk,
            self.config.write_buffers,
        );
        let mut writer_task: JoinHandle<Result<u64>> =
            tokio::spawn(drain_cache(cache.clone(), writer, total));

        let mut written = None;
        while cache.accepted() < total {
            tokio::select! {
                res = &mut writer_task => {
                    written = Some(res??);
                    break;
                }
                res = self.transport.recv(self.config.ack_timeout) => {
                    if let Some(datagram) = res? {
                        self.handle_datagram(&datagram, total, &cache).await?;
                    }
                }
            }
        }
        debug!("모든 DATA 수신, 기록 대기");

        match written {
            Some(written) => Ok(written),
            None => writer_task.await?,
        }
    }

    async fn handle_datagram(
        &self,
        datagram: &Bytes,
        total: u32,
        cache: &ReassemblyCache,
    ) -> Result<()> {
        match Packet::decode(datagram, Origin::Sender) {
            Ok(Packet::Data { seq, payload }) => {
                if seq >= total {
                    self.stats.write().out_of_range += 1;
                    debug!("범위 밖 DATA 무시: seq={} (total {})", seq, total);
                    return Ok(());
                }

                self.reply(&Packet::Ack { seq }.encode()).await?;

                let len = payload.len() as u64;
                let outcome = cache.insert(seq, payload);
                let mut stats = self.stats.write();
                match outcome {
                    InsertOutcome::Accepted => stats.total_bytes += len,
                    InsertOutcome::Duplicate => stats.duplicate_data += 1,
                    InsertOutcome::BelowFloor => stats.below_floor += 1,
                }
                trace!("DATA 수신: seq={} {:?}", seq, outcome);
            }
            Ok(Packet::Syn { .. }) => {
                debug!("중복 SYN, SACK 재전송");
                self.reply_sack(SackOutcome::Success).await?;
            }
            Ok(other) => debug!("수신 중 {} 무시", other.kind().as_str()),
            Err(e) if e.is_corruption() || matches!(e, Error::InvalidDestinationPath) => {
                self.stats.write().corrupted_dropped += 1;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// FINALIZING: FIN을 보내고 상대방 FIN을 기다린다. 늦게 온 DATA에는 다시 ACK.
    ///
    /// `teardown_linger`는 마지막 수신 이후의 침묵 시간이다. 상대방이 아직
    /// 재전송 중이면 기한이 계속 밀린다.
    async fn finalize(&self, total: u32) -> Result<()> {
        let fin = Packet::Fin.encode();
        let mut deadline = Instant::now() + self.config.teardown_linger;

        if !self.send_fin_burst(&fin).await? {
            return Ok(());
        }

        loop {
            if Instant::now() >= deadline {
                warn!("FIN 응답 없음, {:?} 후 종료", self.config.teardown_linger);
                return Ok(());
            }

            let datagram = match self.transport.recv(self.config.fin_poll_interval).await {
                Ok(Some(datagram)) => datagram,
                Ok(None) => {
                    if !self.send_fin_burst(&fin).await? {
                        return Ok(());
                    }
                    continue;
                }
                Err(Error::PeerUnreachable) => {
                    debug!("상대방 종료됨");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            deadline = Instant::now() + self.config.teardown_linger;

            match Packet::decode(&datagram, Origin::Sender) {
                Ok(Packet::Fin) => {
                    info!("FIN 응답 수신");
                    return Ok(());
                }
                Ok(Packet::Data { seq, .. }) if seq < total => {
                    trace!("늦은 DATA 재확인: seq={}", seq);
                    self.stats.write().below_floor += 1;
                    self.reply(&Packet::Ack { seq }.encode()).await?;
                }
                Ok(Packet::Syn { .. }) => {
                    debug!("종료 중 중복 SYN, SACK 재전송");
                    self.reply_sack(SackOutcome::Success).await?;
                }
                Ok(other) => trace!("종료 중 {} 무시", other.kind().as_str()),
                Err(e) if e.is_corruption() || matches!(e, Error::InvalidDestinationPath) => {
                    self.stats.write().corrupted_dropped += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// FIN 연속 전송. 상대방이 이미 사라졌으면 `false`.
    async fn send_fin_burst(&self, fin: &[u8]) -> Result<bool> {
        for _ in 0..self.config.fin_burst {
            match self.transport.send(fin).await {
                Ok(()) => {}
                Err(Error::PeerUnreachable) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    async fn reply_sack(&self, outcome: SackOutcome) -> Result<()> {
        self.reply(&Packet::Sack { outcome }.encode()).await
    }

    /// ACK/SACK 전송. 상대방 부재는 다음 재전송에서 다시 응답하므로 무시한다.
    async fn reply(&self, datagram: &[u8]) -> Result<()> {
        match self.transport.send(datagram).await {
            Err(Error::PeerUnreachable) => {
                debug!("응답 전송 실패: 상대방에 도달할 수 없음");
                Ok(())
            }
            other => other,
        }
    }
}

/// writer 태스크: floor부터 연속된 항목을 꺼내 싱크에 기록한다.
///
/// floor가 움직이고 캐시 항목이 지워지는 유일한 곳.
async fn drain_cache(
    cache: Arc<ReassemblyCache>,
    mut writer: ChunkWriter,
    total: u32,
) -> Result<u64> {
    while cache.floor() < total {
        match cache.pop_floor() {
            Some(payload) => writer.push(&payload).await?,
            None => cache.wait_ready().await,
        }
    }
    writer.finish().await
}
