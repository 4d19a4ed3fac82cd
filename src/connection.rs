//! 전송 한 건의 연결 정보

use std::net::SocketAddr;

use crate::{Error, Result};

/// 핸드쉐이크가 끝난 뒤 바뀌지 않는 연결 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// 상대방 주소 (메모리 링크는 `None`)
    pub peer: Option<SocketAddr>,
    pub total_packets: u32,
    pub destination_path: String,
}

impl Connection {
    pub fn new(peer: Option<SocketAddr>, total_packets: u32, destination_path: String) -> Self {
        Self {
            peer,
            total_packets,
            destination_path,
        }
    }

    /// `len` 바이트를 `body` 크기로 나눴을 때의 DATA 패킷 수
    pub fn packets_for(len: u64, body: usize) -> Result<u32> {
        let body = body.max(1) as u64;
        let packets = len.div_ceil(body);
        u32::try_from(packets).map_err(|_| Error::SourceTooLarge { size: len })
    }
}
