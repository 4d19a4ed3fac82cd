//! 패킷 코덱
//!
//! 모든 패킷은 `checksum(4) | control(1) | ...` 형태이고, 체크섬은 4번 바이트부터
//! 끝까지를 CRC-32로 계산한다. 정수는 모두 big-endian.
//!
//! | 종류 | control | 4바이트 헤더 필드 | 나머지 |
//! |------|---------|-------------------|--------|
//! | SYN  | 1       | 총 패킷 수        | 목적지 경로 (UTF-8) |
//! | DATA | 0       | 시퀀스 번호       | 페이로드 |
//! | ACK  | 0       | 시퀀스 번호       | 없음 |
//! | SACK | 1       | 결과 1바이트      | 없음 |
//! | FIN  | 0xFF    | 없음              | 없음 |
//!
//! DATA/ACK, SYN/SACK은 control 바이트가 같으므로 디코딩할 때 누가 보낸
//! 패킷인지([`Origin`])를 알려줘야 한다.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result, ACK_SIZE, FIN_SIZE, HEADER_SIZE, MAX_PACKET_SIZE, SACK_SIZE};

/// 체크섬 필드 크기
pub const CHECKSUM_SIZE: usize = 4;

/// control 바이트 위치
pub const CTRL_INDEX: usize = 4;

pub const CTRL_DATA: u8 = 0;
pub const CTRL_SYN: u8 = 1;
pub const CTRL_FIN: u8 = 0xFF;

const SACK_SUCCESS: u8 = 0;
const SACK_FAILURE: u8 = 0xFF;

/// 패킷을 보낸 쪽
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// 파일 송신자 (SYN, DATA, FIN)
    Sender,
    /// 파일 수신자 (SACK, ACK, FIN)
    Receiver,
}

/// 패킷 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Syn,
    Data,
    Ack,
    Sack,
    Fin,
}

impl PacketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketKind::Syn => "SYN",
            PacketKind::Data => "DATA",
            PacketKind::Ack => "ACK",
            PacketKind::Sack => "SACK",
            PacketKind::Fin => "FIN",
        }
    }
}

/// SYN에 대한 응답 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SackOutcome {
    Success,
    Failure,
}

/// 와이어 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Syn { total_packets: u32, destination: String },
    Data { seq: u32, payload: Bytes },
    Ack { seq: u32 },
    Sack { outcome: SackOutcome },
    Fin,
}

/// CRC-32 체크섬
pub fn checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// 페이로드를 `Bytes`로 복사하지 않고 DATA 패킷을 바로 인코딩한다.
pub fn encode_data_into(buf: &mut BytesMut, seq: u32, payload: &[u8]) {
    let start = buf.len();
    buf.reserve(HEADER_SIZE + payload.len());
    buf.put_u32(0);
    buf.put_u8(CTRL_DATA);
    buf.put_u32(seq);
    buf.put_slice(payload);
    seal(buf, start);
}

fn seal(buf: &mut BytesMut, start: usize) {
    let crc = checksum(&buf[start + CHECKSUM_SIZE..]);
    buf[start..start + CHECKSUM_SIZE].copy_from_slice(&crc.to_be_bytes());
}

impl Packet {
    /// SYN 생성 (경로 검증 포함)
    pub fn syn(total_packets: u32, destination: &str) -> Result<Self> {
        if destination.is_empty() {
            return Err(Error::InvalidDestinationPath);
        }
        let max = MAX_PACKET_SIZE - HEADER_SIZE;
        if destination.len() > max {
            return Err(Error::DestinationPathTooLong {
                len: destination.len(),
                max,
            });
        }
        Ok(Packet::Syn {
            total_packets,
            destination: destination.to_string(),
        })
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Syn { .. } => PacketKind::Syn,
            Packet::Data { .. } => PacketKind::Data,
            Packet::Ack { .. } => PacketKind::Ack,
            Packet::Sack { .. } => PacketKind::Sack,
            Packet::Fin => PacketKind::Fin,
        }
    }

    /// 인코딩 후 길이
    pub fn encoded_len(&self) -> usize {
        match self {
            Packet::Syn { destination, .. } => HEADER_SIZE + destination.len(),
            Packet::Data { payload, .. } => HEADER_SIZE + payload.len(),
            Packet::Ack { .. } => ACK_SIZE,
            Packet::Sack { .. } => SACK_SIZE,
            Packet::Fin => FIN_SIZE,
        }
    }

    /// `buf` 뒤에 패킷을 덧붙인다. 체크섬은 마지막에 채운다.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        if let Packet::Data { seq, payload } = self {
            encode_data_into(buf, *seq, payload);
            return;
        }

        let start = buf.len();
        buf.reserve(self.encoded_len());
        buf.put_u32(0);

        match self {
            Packet::Syn {
                total_packets,
                destination,
            } => {
                buf.put_u8(CTRL_SYN);
                buf.put_u32(*total_packets);
                buf.put_slice(destination.as_bytes());
            }
            Packet::Data { .. } => unreachable!(),
            Packet::Ack { seq } => {
                buf.put_u8(CTRL_DATA);
                buf.put_u32(*seq);
            }
            Packet::Sack { outcome } => {
                buf.put_u8(CTRL_SYN);
                buf.put_u8(match outcome {
                    SackOutcome::Success => SACK_SUCCESS,
                    SackOutcome::Failure => SACK_FAILURE,
                });
            }
            Packet::Fin => buf.put_u8(CTRL_FIN),
        }

        seal(buf, start);
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// 데이터그램 디코딩
    ///
    /// 체크섬이나 길이가 맞지 않으면 손상 에러([`Error::is_corruption`])를 반환하고,
    /// 체크섬은 맞는데 control 바이트를 모르면 [`Error::UnknownPacketKind`].
    pub fn decode(datagram: &Bytes, origin: Origin) -> Result<Self> {
        let len = datagram.len();
        if len < FIN_SIZE {
            return Err(Error::InvalidLength { kind: "packet", len });
        }

        let expected = u32::from_be_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]);
        let actual = checksum(&datagram[CHECKSUM_SIZE..]);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }

        let kind = match (datagram[CTRL_INDEX], origin) {
            (CTRL_SYN, Origin::Sender) => PacketKind::Syn,
            (CTRL_SYN, Origin::Receiver) => PacketKind::Sack,
            (CTRL_DATA, Origin::Sender) => PacketKind::Data,
            (CTRL_DATA, Origin::Receiver) => PacketKind::Ack,
            (CTRL_FIN, _) => PacketKind::Fin,
            (other, _) => return Err(Error::UnknownPacketKind(other)),
        };

        let valid_len = match kind {
            PacketKind::Syn => (HEADER_SIZE..=MAX_PACKET_SIZE).contains(&len),
            PacketKind::Data => (HEADER_SIZE..=MAX_PACKET_SIZE).contains(&len),
            PacketKind::Ack => len == ACK_SIZE,
            PacketKind::Sack => len == SACK_SIZE,
            PacketKind::Fin => len == FIN_SIZE,
        };
        if !valid_len {
            return Err(Error::InvalidLength {
                kind: kind.as_str(),
                len,
            });
        }

        let header_field = || {
            u32::from_be_bytes([datagram[5], datagram[6], datagram[7], datagram[8]])
        };

        Ok(match kind {
            PacketKind::Syn => {
                let destination = std::str::from_utf8(&datagram[HEADER_SIZE..])
                    .map_err(|_| Error::InvalidDestinationPath)?;
                if destination.is_empty() {
                    return Err(Error::InvalidDestinationPath);
                }
                Packet::Syn {
                    total_packets: header_field(),
                    destination: destination.to_string(),
                }
            }
            PacketKind::Data => Packet::Data {
                seq: header_field(),
                payload: datagram.slice(HEADER_SIZE..),
            },
            PacketKind::Ack => Packet::Ack { seq: header_field() },
            PacketKind::Sack => Packet::Sack {
                outcome: if datagram[5] == SACK_SUCCESS {
                    SackOutcome::Success
                } else {
                    SackOutcome::Failure
                },
            },
            PacketKind::Fin => Packet::Fin,
        })
    }
}
