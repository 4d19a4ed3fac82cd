//! 프로토콜 설정

use std::time::Duration;

use crate::{Error, Result, MAX_BODY_SIZE, MAX_PACKET_SIZE};

/// UDPFT 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// DATA 패킷당 페이로드 크기 (바이트)
    pub max_body_size: usize,

    /// 동시에 미확인 상태로 둘 수 있는 DATA 패킷 수 (슬롯 풀 상한)
    pub window_cap: usize,

    /// 재전송 타임아웃 (고정, 백오프 없음)
    pub ack_timeout: Duration,

    /// 핸드쉐이크 SACK 대기 시간
    pub sack_timeout: Duration,

    /// 시도마다 보내는 SYN 개수
    pub syn_copies: usize,

    /// 송신측 읽기 청크당 패킷 수
    pub packets_per_read_chunk: usize,

    /// 송신측 읽기 청크 버퍼 수
    pub read_buffers: usize,

    /// 수신측 쓰기 청크당 패킷 수
    pub packets_per_write_chunk: usize,

    /// 수신측 쓰기 청크 버퍼 수
    pub write_buffers: usize,

    /// 종료 시 연속으로 보내는 FIN 개수
    pub fin_burst: usize,

    /// 수신측 FINALIZING 폴링 간격
    pub fin_poll_interval: Duration,

    /// FIN 응답이 없을 때 수신측이 포기하기까지의 시간
    pub teardown_linger: Duration,

    /// 진행할 수 없을 때 쉬는 시간
    pub idle_interval: Duration,

    /// 데이터그램 수신 버퍼 크기
    pub recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::lan()
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// LAN 기본 설정
    pub fn lan() -> Self {
        Self {
            max_body_size: MAX_BODY_SIZE,
            window_cap: 4 * 1024,
            ack_timeout: Duration::from_millis(10),
            sack_timeout: Duration::from_millis(20),
            syn_copies: 2,
            packets_per_read_chunk: 2 * 1024,
            read_buffers: 2,
            packets_per_write_chunk: 4 * 1024,
            write_buffers: 2,
            fin_burst: 8,
            fin_poll_interval: Duration::from_millis(5),
            teardown_linger: Duration::from_secs(3),
            idle_interval: Duration::from_millis(1),
            recv_buffer_size: MAX_PACKET_SIZE + 1,
        }
    }

    /// 루프백용 설정 (짧은 타이머)
    pub fn loopback() -> Self {
        Self {
            ack_timeout: Duration::from_millis(4),
            sack_timeout: Duration::from_millis(5),
            fin_poll_interval: Duration::from_millis(1),
            teardown_linger: Duration::from_secs(1),
            ..Self::lan()
        }
    }

    /// 손실이 많은 네트워크용 설정
    pub fn lossy() -> Self {
        Self {
            window_cap: 1024,
            ack_timeout: Duration::from_millis(50),
            sack_timeout: Duration::from_millis(100),
            syn_copies: 4,
            fin_burst: 16,
            fin_poll_interval: Duration::from_millis(20),
            teardown_linger: Duration::from_secs(10),
            ..Self::lan()
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.max_body_size == 0 || self.max_body_size > MAX_BODY_SIZE {
            return Err(Error::InvalidConfig(format!(
                "max_body_size must be in 1..={}, got {}",
                MAX_BODY_SIZE, self.max_body_size
            )));
        }
        if self.window_cap == 0 {
            return Err(Error::InvalidConfig("window_cap must be positive".into()));
        }
        if self.ack_timeout.is_zero()
            || self.sack_timeout.is_zero()
            || self.fin_poll_interval.is_zero()
        {
            return Err(Error::InvalidConfig("timeouts must be positive".into()));
        }
        if self.syn_copies == 0 || self.fin_burst == 0 {
            return Err(Error::InvalidConfig(
                "syn_copies and fin_burst must be positive".into(),
            ));
        }
        if self.packets_per_read_chunk == 0
            || self.packets_per_write_chunk == 0
            || self.read_buffers == 0
            || self.write_buffers == 0
        {
            return Err(Error::InvalidConfig("chunk sizes must be positive".into()));
        }
        if self.recv_buffer_size <= MAX_PACKET_SIZE {
            return Err(Error::InvalidConfig(format!(
                "recv_buffer_size must exceed {}",
                MAX_PACKET_SIZE
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        assert!(Config::lan().validate().is_ok());
        assert!(Config::loopback().validate().is_ok());
        assert!(Config::lossy().validate().is_ok());
    }

    #[test]
    fn test_rejects_oversized_body() {
        let config = Config {
            max_body_size: MAX_BODY_SIZE + 1,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_window() {
        let config = Config {
            window_cap: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_fin_poll() {
        let config = Config {
            fin_poll_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
