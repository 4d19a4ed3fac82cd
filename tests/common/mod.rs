//! 통합 테스트 공용 도구

#![allow(dead_code)]

use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWrite;

use udpft::{
    Config, FaultModel, ReceiveReport, Receiver, ReceiverState, SendReport, Sender, SenderState,
    SimulatedLink,
};

/// 메모리에 기록하는 싱크
#[derive(Clone, Default)]
pub struct MemorySink {
    data: Arc<Mutex<Vec<u8>>>,
    writes: Arc<AtomicUsize>,
}

impl MemorySink {
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl AsyncWrite for MemorySink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.data.lock().extend_from_slice(buf);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// 반복되지 않는 테스트 데이터
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(2_654_435_761).rotate_left(7) as u8)
        .collect()
}

/// 작은 청크를 쓰는 루프백 설정
pub fn test_config() -> Config {
    Config {
        packets_per_read_chunk: 16,
        packets_per_write_chunk: 16,
        ..Config::loopback()
    }
}

pub fn data_seq(datagram: &[u8]) -> Option<u32> {
    (datagram.len() > udpft::HEADER_SIZE && datagram[4] == 0).then(|| seq_field(datagram))
}

pub fn ack_seq(datagram: &[u8]) -> Option<u32> {
    (datagram.len() == udpft::ACK_SIZE && datagram[4] == 0).then(|| seq_field(datagram))
}

pub fn is_fin(datagram: &[u8]) -> bool {
    datagram.len() == udpft::FIN_SIZE && datagram[4] == 0xFF
}

pub fn is_syn(datagram: &[u8]) -> bool {
    datagram.len() >= udpft::HEADER_SIZE && datagram[4] == 1
}

pub fn is_success_sack(datagram: &[u8]) -> bool {
    datagram.len() == udpft::SACK_SIZE && datagram[4] == 1 && datagram[5] == 0
}

fn seq_field(datagram: &[u8]) -> u32 {
    u32::from_be_bytes([datagram[5], datagram[6], datagram[7], datagram[8]])
}

/// 시뮬레이션 전송 결과
pub struct Outcome {
    pub send: SendReport,
    pub recv: ReceiveReport,
    pub sink: MemorySink,
    pub opened: Vec<String>,
}

/// 메모리 링크 위에서 송신자와 수신자를 함께 돌린다.
pub async fn transfer(
    sender_config: Config,
    receiver_config: Config,
    to_receiver: FaultModel,
    to_sender: FaultModel,
    data: Vec<u8>,
    destination: &str,
) -> Outcome {
    let (a, b) = SimulatedLink::pair(to_receiver, to_sender);
    let sender = Sender::new(sender_config, Arc::new(a)).unwrap();
    let receiver = Receiver::new(receiver_config, Arc::new(b)).unwrap();

    let sink = MemorySink::default();
    let sink_handle = sink.clone();
    let opened = Arc::new(Mutex::new(Vec::new()));
    let opened_handle = opened.clone();

    let len = data.len() as u64;
    let send = sender.send(Cursor::new(data), len, destination);
    let recv = receiver.receive(move |path| {
        opened_handle.lock().push(path);
        async move { Ok::<_, udpft::Error>(sink_handle) }
    });

    let (send, recv) = tokio::time::timeout(Duration::from_secs(30), async {
        tokio::join!(send, recv)
    })
    .await
    .expect("transfer timed out");

    assert_eq!(sender.state(), SenderState::Closed);
    assert_eq!(receiver.state(), ReceiverState::Closed);

    let opened = opened.lock().clone();
    Outcome {
        send: send.unwrap(),
        recv: recv.unwrap(),
        sink,
        opened,
    }
}
