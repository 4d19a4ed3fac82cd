//! 에러 타입 정의

use thiserror::Error;

/// UDPFT 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("체크섬 불일치: expected {expected:08X}, got {actual:08X}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("유효하지 않은 패킷 길이: kind={kind}, len={len}")]
    InvalidLength { kind: &'static str, len: usize },

    #[error("알 수 없는 패킷 종류: control=0x{0:02X}")]
    UnknownPacketKind(u8),

    #[error("상대방에 도달할 수 없음")]
    PeerUnreachable,

    #[error("내부 채널 종료")]
    ChannelClosed,

    #[error("원본 스트림이 일찍 끝남: expected {expected} packets, read {read}")]
    SourceTruncated { expected: u32, read: u32 },

    #[error("원본이 너무 큼: {size} bytes")]
    SourceTooLarge { size: u64 },

    #[error("목적지 경로가 너무 김: {len} bytes (최대 {max})")]
    DestinationPathTooLong { len: usize, max: usize },

    #[error("유효하지 않은 목적지 경로")]
    InvalidDestinationPath,

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("태스크 실패: {0}")]
    TaskFailed(String),
}

impl Error {
    /// 손상된 패킷 여부 (조용히 버려야 하는 에러)
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::ChecksumMismatch { .. } | Error::InvalidLength { .. }
        )
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::TaskFailed(e.to_string())
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
