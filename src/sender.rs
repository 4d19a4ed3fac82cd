//! 송신자
//!
//! `HANDSHAKING → SENDING → DRAINING → TEARDOWN → CLOSED`
//!
//! - 재전송이 항상 새 패킷보다 우선
//! - 윈도우는 슬롯 풀 상한으로 제한
//! - ACK 수신은 별도 태스크에서 처리하고, 상대방의 FIN을 받으면 FIN을 연속으로 보내고 종료

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::AsyncRead;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::connection::Connection;
use crate::packet::{Origin, Packet, SackOutcome};
use crate::pipe::ChunkReader;
use crate::pool::SlotPool;
use crate::scheduler::{Resend, ResendQueue, RetransmitScheduler};
use crate::stats::TransferStats;
use crate::transport::Transport;
use crate::{Config, Error, Result};

/// 송신자 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Handshaking,
    Sending,
    Draining,
    Teardown,
    Closed,
}

/// 전송 결과
#[derive(Debug, Clone)]
pub struct SendReport {
    pub connection: Connection,
    pub stats: TransferStats,
}

/// 송신자
pub struct Sender<T: Transport> {
    /// 설정
    config: Config,

    transport: Arc<T>,

    state: RwLock<SenderState>,

    /// 전송 통계 (ACK 수신 태스크와 공유)
    stats: Arc<RwLock<TransferStats>>,
}

impl<T: Transport> Sender<T> {
    /// 새 송신자 생성
    pub fn new(config: Config, transport: Arc<T>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            state: RwLock::new(SenderState::Handshaking),
            stats: Arc::new(RwLock::new(TransferStats::new())),
        })
    }

    pub fn state(&self) -> SenderState {
        *self.state.read()
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> TransferStats {
        self.stats.read().clone()
    }

    fn set_state(&self, next: SenderState) {
        let mut state = self.state.write();
        if *state != next {
            debug!("송신 상태: {:?} → {:?}", *state, next);
            *state = next;
        }
    }

    /// 파일 전송
    pub async fn send_file(&self, path: impl AsRef<Path>, destination: &str) -> Result<SendReport> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        let len = file.metadata().await?.len();
        self.send(file, len, destination).await
    }

    /// `len` 바이트짜리 원본을 전송한다.
    pub async fn send<R>(&self, source: R, len: u64, destination: &str) -> Result<SendReport>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let total = Connection::packets_for(len, self.config.max_body_size)?;
        let syn = Packet::syn(total, destination)?.encode();
        {
            let mut stats = self.stats.write();
            *stats = TransferStats::new();
            stats.total_packets = total as u64;
        }

        self.set_state(SenderState::Handshaking);
        let result = self.run(source, len, total, &syn).await;
        self.set_state(SenderState::Closed);
        self.stats.write().finish();
        result?;

        let connection = Connection::new(self.transport.peer_addr(), total, destination.to_string());
        let stats = self.stats();
        info!(
            "전송 완료: {} → {} ({} packets)",
            len, connection.destination_path, total
        );
        Ok(SendReport { connection, stats })
    }

    async fn run<R>(&self, source: R, len: u64, total: u32, syn: &Bytes) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.handshake(syn).await?;
        info!("핸드쉐이크 완료: {} bytes, {} packets", len, total);
        self.set_state(SenderState::Sending);

        let pool = Arc::new(SlotPool::new(self.config.window_cap));
        let (scheduler, resends) = RetransmitScheduler::new(pool.clone(), self.config.ack_timeout);
        let scheduler = Arc::new(scheduler);
        let mut reader = ChunkReader::spawn(
            source,
            len,
            self.config.max_body_size,
            self.config.packets_per_read_chunk,
            self.config.read_buffers,
        );
        let mut listener = tokio::spawn(ack_listener(
            self.transport.clone(),
            scheduler.clone(),
            self.stats.clone(),
            self.config.clone(),
        ));

        let mut pipeline = Pipeline {
            sender: self,
            pool: &pool,
            scheduler: &scheduler,
            resends,
            reader: &mut reader,
            listener: &mut listener,
            total,
            next_seq: 0,
        };
        let result = pipeline.pump().await;

        listener.abort();
        reader.cancel();
        pool.shutdown();
        self.stats.write().peak_in_flight = pool.high_water() as u64;
        result
    }

    /// SYN을 보내고 성공 SACK이 올 때까지 반복 (재시도 상한 없음)
    async fn handshake(&self, syn: &Bytes) -> Result<()> {
        loop {
            self.stats.write().handshake_attempts += 1;

            match self.attempt_handshake(syn).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(Error::PeerUnreachable) => {
                    debug!("상대방 응답 없음, SYN 재전송 대기");
                    tokio::time::sleep(self.config.sack_timeout).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt_handshake(&self, syn: &Bytes) -> Result<bool> {
        for _ in 0..self.config.syn_copies {
            self.transport.send(syn).await?;
        }

        let deadline = Instant::now() + self.config.sack_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            let Some(datagram) = self.transport.recv(remaining).await? else {
                return Ok(false);
            };

            match Packet::decode(&datagram, Origin::Receiver) {
                Ok(Packet::Sack {
                    outcome: SackOutcome::Success,
                }) => return Ok(true),
                Ok(Packet::Sack {
                    outcome: SackOutcome::Failure,
                }) => {
                    debug!("SACK 실패 응답, SYN 재전송");
                    return Ok(false);
                }
                Ok(other) => trace!("핸드쉐이크 중 {} 무시", other.kind().as_str()),
                Err(e) if e.is_corruption() => {
                    self.stats.write().corrupted_dropped += 1;
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 전송 실패 중 상대방 부재는 재전송 타이머에 맡긴다.
    async fn transmit(&self, datagram: &[u8]) -> Result<()> {
        match self.transport.send(datagram).await {
            Err(Error::PeerUnreachable) => {
                debug!("상대방에 도달할 수 없음, 타이머로 재시도");
                Ok(())
            }
            other => other,
        }
    }
}

/// SENDING/DRAINING/TEARDOWN 메인 루프 상태
struct Pipeline<'a, T: Transport> {
    sender: &'a Sender<T>,
    pool: &'a SlotPool,
    scheduler: &'a RetransmitScheduler,
    resends: ResendQueue,
    reader: &'a mut ChunkReader,
    listener: &'a mut JoinHandle<Result<()>>,
    total: u32,
    next_seq: u32,
}

impl<'a, T: Transport> Pipeline<'a, T> {
    async fn pump(&mut self) -> Result<()> {
        let sender = self.sender;
        let config = &sender.config;
        let mut drained_at: Option<Instant> = None;

        loop {
            // 1. 재전송 우선
            match self.resends.try_recv() {
                Ok(resend) => {
                    self.resend(resend).await?;
                    continue;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => return Err(Error::ChannelClosed),
            }

            // 2. 상대방 FIN
            if self.listener.is_finished() {
                return join_listener((&mut *self.listener).await);
            }

            // 3. 모든 DATA 전송 완료
            if self.next_seq == self.total {
                if self.sender.state() == SenderState::Sending {
                    self.sender.set_state(SenderState::Draining);
                    self.reader.cancel();
                    info!("모든 DATA 전송, ACK 대기 ({} in flight)", self.pool.outstanding());
                }
                if self.pool.outstanding() == 0 {
                    let since = *drained_at.get_or_insert_with(|| {
                        self.sender.set_state(SenderState::Teardown);
                        debug!("모든 ACK 수신, FIN 대기");
                        Instant::now()
                    });
                    if since.elapsed() >= config.teardown_linger {
                        warn!("FIN을 받지 못함, 종료");
                        return Ok(());
                    }
                }

                tokio::select! {
                    res = &mut *self.listener => return join_listener(res),
                    Some(resend) = self.resends.recv() => self.resend(resend).await?,
                    _ = self.pool.released() => {}
                    _ = tokio::time::sleep(config.idle_interval) => {}
                }
                continue;
            }

            // 4. 읽은 청크
            if !self.reader.try_fill()? {
                if self.reader.is_finished() {
                    return Err(Error::SourceTruncated {
                        expected: self.total,
                        read: self.next_seq,
                    });
                }
                tokio::select! {
                    res = &mut *self.listener => return join_listener(res),
                    Some(resend) = self.resends.recv() => self.resend(resend).await?,
                    res = self.reader.wait_ready() => res?,
                }
                continue;
            }

            // 5. 빈 슬롯
            let Some(slot) = self.pool.acquire() else {
                tokio::select! {
                    res = &mut *self.listener => return join_listener(res),
                    Some(resend) = self.resends.recv() => self.resend(resend).await?,
                    _ = self.pool.released() => {}
                    _ = tokio::time::sleep(config.idle_interval) => {}
                }
                continue;
            };

            // 6. 새 DATA 전송
            let Some((seq, payload)) = self.reader.peek() else {
                self.pool.release(slot);
                continue;
            };
            let seq = u32::try_from(seq).map_err(|_| Error::SourceTooLarge {
                size: seq * config.max_body_size as u64,
            })?;
            debug_assert_eq!(seq, self.next_seq);

            let payload_len = payload.len() as u64;
            let datagram = self.pool.load_data(slot, seq, payload);
            self.reader.advance();

            // ACK가 전송보다 먼저 올 수 있으므로 타이머를 먼저 건다
            self.scheduler.arm(slot, seq);
            self.sender.transmit(&datagram).await?;

            {
                let mut stats = self.sender.stats.write();
                stats.data_packets_sent += 1;
                stats.total_bytes += payload_len;
            }
            trace!("DATA 전송: seq={} ({} bytes)", seq, payload_len);
            self.next_seq += 1;
        }
    }

    async fn resend(&mut self, resend: Resend) -> Result<()> {
        let Some(datagram) = self.pool.packet(resend.slot) else {
            return Ok(());
        };
        self.scheduler.arm(resend.slot, resend.seq);
        self.sender.transmit(&datagram).await?;

        self.sender.stats.write().retransmitted_packets += 1;
        debug!("재전송: seq={}", resend.seq);
        Ok(())
    }
}

fn join_listener(res: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    res?
}

/// ACK 수신 태스크. 상대방 FIN을 받으면 FIN을 연속으로 보내고 끝난다.
async fn ack_listener<T: Transport>(
    transport: Arc<T>,
    scheduler: Arc<RetransmitScheduler>,
    stats: Arc<RwLock<TransferStats>>,
    config: Config,
) -> Result<()> {
    loop {
        let datagram = match transport.recv(config.ack_timeout).await {
            Ok(Some(datagram)) => datagram,
            Ok(None) => continue,
            Err(Error::PeerUnreachable) => {
                tokio::time::sleep(config.idle_interval).await;
                continue;
            }
            Err(e) => return Err(e),
        };

        match Packet::decode(&datagram, Origin::Receiver) {
            Ok(Packet::Ack { seq }) => {
                if scheduler.cancel(seq) {
                    stats.write().acks_received += 1;
                } else {
                    stats.write().stale_acks += 1;
                    trace!("늦은 ACK: seq={}", seq);
                }
            }
            Ok(Packet::Fin) => {
                info!("상대방 FIN 수신, 종료");
                let fin = Packet::Fin.encode();
                for _ in 0..config.fin_burst {
                    if let Err(e) = transport.send(&fin).await {
                        debug!("FIN 전송 중단: {}", e);
                        break;
                    }
                }
                return Ok(());
            }
            Ok(other) => trace!("{} 무시", other.kind().as_str()),
            Err(e) if e.is_corruption() => {
                stats.write().corrupted_dropped += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{FaultModel, SimulatedLink};
    use std::io::Cursor;
    use std::time::Duration;

    #[test]
    fn test_rejects_invalid_config() {
        let (a, _b) = SimulatedLink::pair(FaultModel::perfect(), FaultModel::perfect());
        let config = Config {
            window_cap: 0,
            ..Config::loopback()
        };
        assert!(Sender::new(config, Arc::new(a)).is_err());
    }

    #[tokio::test]
    async fn test_handshake_retries_until_success_sack() {
        let (a, b) = SimulatedLink::pair(FaultModel::perfect(), FaultModel::perfect());
        let sender = Sender::new(Config::loopback(), Arc::new(a)).unwrap();

        let peer = tokio::spawn(async move {
            let mut syns = 0;
            // 첫 두 시도는 실패 응답, 세 번째 시도에서 성공
            loop {
                let Some(datagram) = b.recv(Duration::from_secs(1)).await.unwrap() else {
                    continue;
                };
                if let Ok(Packet::Syn { .. }) = Packet::decode(&datagram, Origin::Sender) {
                    syns += 1;
                    let outcome = if syns <= 4 {
                        SackOutcome::Failure
                    } else {
                        SackOutcome::Success
                    };
                    b.send(&Packet::Sack { outcome }.encode()).await.unwrap();
                    if outcome == SackOutcome::Success {
                        return b;
                    }
                }
            }
        });

        let syn = Packet::syn(0, "out.bin").unwrap().encode();
        tokio::time::timeout(Duration::from_secs(5), sender.handshake(&syn))
            .await
            .unwrap()
            .unwrap();
        assert!(sender.stats().handshake_attempts >= 3);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_truncated_source_fails() {
        let (a, b) = SimulatedLink::pair(FaultModel::perfect(), FaultModel::perfect());
        let sender = Sender::new(Config::loopback(), Arc::new(a)).unwrap();

        // SACK만 보내고 ACK는 계속 보낸다
        let peer = tokio::spawn(async move {
            loop {
                let Ok(Some(datagram)) = b.recv(Duration::from_millis(100)).await else {
                    return;
                };
                match Packet::decode(&datagram, Origin::Sender) {
                    Ok(Packet::Syn { .. }) => {
                        let sack = Packet::Sack {
                            outcome: SackOutcome::Success,
                        };
                        let _ = b.send(&sack.encode()).await;
                    }
                    Ok(Packet::Data { seq, .. }) => {
                        let _ = b.send(&Packet::Ack { seq }.encode()).await;
                    }
                    _ => {}
                }
            }
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            sender.send(Cursor::new(vec![1u8; 100]), 5000, "out.bin"),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(Error::SourceTruncated { .. })));
        assert_eq!(sender.state(), SenderState::Closed);
        peer.abort();
    }
}
