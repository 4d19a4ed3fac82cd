//! 전송 통계

use std::time::{Duration, Instant};

/// 전체 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 종료 시간
    pub end_time: Option<Instant>,

    /// 총 DATA 패킷 수
    pub total_packets: u64,

    /// 처음 보낸 DATA 패킷 수
    pub data_packets_sent: u64,

    /// 재전송 패킷 수
    pub retransmitted_packets: u64,

    /// 슬롯을 반납시킨 ACK 수
    pub acks_received: u64,

    /// 이미 반납됐거나 재전송 대기 중인 ACK 수
    pub stale_acks: u64,

    /// 체크섬/길이 오류로 버린 패킷 수
    pub corrupted_dropped: u64,

    /// 캐시에 이미 있던 DATA 수
    pub duplicate_data: u64,

    /// floor 아래로 들어온 DATA 수
    pub below_floor: u64,

    /// 총 패킷 수 범위를 벗어난 DATA 수
    pub out_of_range: u64,

    /// 총 전송/기록 바이트
    pub total_bytes: u64,

    /// 핸드쉐이크 시도 횟수
    pub handshake_attempts: u64,

    /// 동시에 미확인 상태였던 DATA 패킷 수의 최댓값
    pub peak_in_flight: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            end_time: None,
            total_packets: 0,
            data_packets_sent: 0,
            retransmitted_packets: 0,
            acks_received: 0,
            stale_acks: 0,
            corrupted_dropped: 0,
            duplicate_data: 0,
            below_floor: 0,
            out_of_range: 0,
            total_bytes: 0,
            handshake_attempts: 0,
            peak_in_flight: 0,
        }
    }

    /// 종료 시간 기록
    pub fn finish(&mut self) {
        self.end_time.get_or_insert_with(Instant::now);
    }

    /// 경과 시간 (끝났으면 종료 시점까지)
    pub fn elapsed(&self) -> Duration {
        match self.end_time {
            Some(end) => end.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    /// 재전송 비율
    pub fn retransmit_ratio(&self) -> f64 {
        if self.data_packets_sent == 0 {
            return 0.0;
        }
        self.retransmitted_packets as f64 / self.data_packets_sent as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Packets: {} | Bytes: {} | Throughput: {:.2} MB/s | Retransmits: {} ({:.2}%) | Dup: {} | Corrupt: {} | Peak window: {}",
            self.elapsed().as_secs_f64(),
            self.total_packets,
            self.total_bytes,
            self.throughput() / 1_000_000.0,
            self.retransmitted_packets,
            self.retransmit_ratio() * 100.0,
            self.duplicate_data + self.below_floor,
            self.corrupted_dropped,
            self.peak_in_flight,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
