//! # UDPFT (UDP File Transfer)
//!
//! UDP 위에서 동작하는 신뢰성 있는 순서 보장 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **파이프라인 윈도우**: 슬롯 풀 상한만큼 DATA 패킷을 동시에 전송
//! - **패킷별 재전송 타이머**: 고정 타임아웃, 만료 시 최우선 재전송
//! - **즉시 ACK**: 유효한 DATA는 중복이어도 항상 ACK
//! - **재조립 캐시**: 순서가 뒤바뀐 패킷을 floor 기준으로 정확히 한 번 기록
//! - **더블 버퍼 파일 파이프**: 디스크 I/O와 네트워크 I/O를 겹쳐서 처리
//! - **CRC-32 체크섬**: 손상된 패킷은 조용히 버림

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod packet;
pub mod pipe;
pub mod pool;
pub mod receiver;
pub mod scheduler;
pub mod sender;
pub mod simulator;
pub mod stats;
pub mod transport;

pub use cache::{InsertOutcome, ReassemblyCache};
pub use config::Config;
pub use connection::Connection;
pub use error::{Error, Result};
pub use packet::{Origin, Packet, PacketKind, SackOutcome};
pub use pipe::{ChunkReader, ChunkWriter};
pub use pool::{SlotId, SlotPool};
pub use receiver::{ReceiveReport, Receiver, ReceiverState};
pub use scheduler::{Resend, RetransmitScheduler};
pub use sender::{SendReport, Sender, SenderState};
pub use simulator::{FaultModel, SimEndpoint, SimulatedLink, Verdict};
pub use stats::TransferStats;
pub use transport::{Transport, UdpTransport};

/// 데이터그램 최대 크기 (바이트)
pub const MAX_PACKET_SIZE: usize = 1000;

/// 체크섬(4) + control(1) + 헤더 필드(4)
pub const HEADER_SIZE: usize = 9;

/// DATA 패킷 페이로드 최대 크기
pub const MAX_BODY_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

pub const ACK_SIZE: usize = HEADER_SIZE;

/// 체크섬(4) + control(1) + 결과(1)
pub const SACK_SIZE: usize = 6;

/// 체크섬(4) + control(1)
pub const FIN_SIZE: usize = 5;
