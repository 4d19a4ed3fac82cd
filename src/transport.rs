//! 데이터그램 전송 계층
//!
//! 파이프라인은 [`Transport`] 트레이트만 본다. 실제 UDP 소켓([`UdpTransport`])과
//! 테스트용 메모리 링크([`crate::simulator::SimEndpoint`])가 이를 구현한다.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use tokio::net::{lookup_host, ToSocketAddrs, UdpSocket};
use tracing::{debug, info, trace};

use crate::{Error, Result, MAX_PACKET_SIZE};

/// 데이터그램 송수신 능력
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// 데이터그램 하나 전송
    async fn send(&self, datagram: &[u8]) -> Result<()>;

    /// `timeout` 동안 데이터그램 하나를 기다린다. 시간이 지나면 `Ok(None)`.
    async fn recv(&self, timeout: Duration) -> Result<Option<Bytes>>;

    /// 마지막으로 받은 데이터그램의 발신자에게 고정한다 (수신측 핸드쉐이크).
    async fn pin_peer(&self) -> Result<()> {
        Ok(())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// ICMP 거부는 상대방 부재로 본다
fn map_io(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => Error::PeerUnreachable,
        _ => Error::Io(e),
    }
}

/// UDP 소켓 전송
pub struct UdpTransport {
    socket: UdpSocket,
    /// 고정된 상대방 (소켓이 connect된 상태)
    peer: RwLock<Option<SocketAddr>>,
    last_from: RwLock<Option<SocketAddr>>,
    recv_buffer_size: usize,
}

impl UdpTransport {
    fn from_socket(socket: UdpSocket, peer: Option<SocketAddr>) -> Self {
        Self {
            socket,
            peer: RwLock::new(peer),
            last_from: RwLock::new(None),
            recv_buffer_size: MAX_PACKET_SIZE + 1,
        }
    }

    /// 송신측: 상대방 주소를 찾아 connect한다.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let peer = lookup_host(addr).await?.next().ok_or_else(|| {
            Error::Io(io::Error::new(io::ErrorKind::NotFound, "주소를 찾을 수 없음"))
        })?;

        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;

        info!("UDP 연결: {} → {}", socket.local_addr()?, peer);
        Ok(Self::from_socket(socket, Some(peer)))
    }

    /// 수신측: 주소에 바인딩한다.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("UDP 대기: {}", socket.local_addr()?);
        Ok(Self::from_socket(socket, None))
    }

    /// 모든 인터페이스의 `port`에서 대기
    pub async fn listen(port: u16) -> Result<Self> {
        Self::bind((Ipv4Addr::UNSPECIFIED, port).into()).await
    }

    /// 수신 버퍼 크기 변경 (최대 패킷보다 커야 길이 초과를 감지할 수 있다)
    pub fn with_recv_buffer(mut self, size: usize) -> Self {
        self.recv_buffer_size = size.max(MAX_PACKET_SIZE + 1);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        let peer = *self.peer.read();
        if peer.is_some() {
            self.socket.send(datagram).await.map_err(map_io)?;
            return Ok(());
        }

        let last_from = *self.last_from.read();
        match last_from {
            Some(addr) => {
                self.socket.send_to(datagram, addr).await.map_err(map_io)?;
            }
            None => trace!("상대방 주소 없음, 전송 생략"),
        }
        Ok(())
    }

    async fn recv(&self, timeout: Duration) -> Result<Option<Bytes>> {
        let mut buf = BytesMut::zeroed(self.recv_buffer_size);
        let pinned = self.peer.read().is_some();

        let received = tokio::time::timeout(timeout, async {
            if pinned {
                self.socket.recv(&mut buf).await.map(|n| (n, None))
            } else {
                self.socket
                    .recv_from(&mut buf)
                    .await
                    .map(|(n, from)| (n, Some(from)))
            }
        })
        .await;

        match received {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(map_io(e)),
            Ok(Ok((n, from))) => {
                if from.is_some() {
                    *self.last_from.write() = from;
                }
                buf.truncate(n);
                Ok(Some(buf.freeze()))
            }
        }
    }

    async fn pin_peer(&self) -> Result<()> {
        let Some(addr) = *self.last_from.read() else {
            return Ok(());
        };
        self.socket.connect(addr).await?;
        *self.peer.write() = Some(addr);
        debug!("상대방 고정: {}", addr);
        Ok(())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer.read()
    }
}
