//! 메모리 내 불안정 링크
//!
//! 두 끝점 사이를 방향별 [`FaultModel`]에 따라 손실/중복/손상/순서 뒤바뀜을
//! 일으키며 연결한다. 난수는 시드로 고정되고, 특정 패킷만 골라서 떨어뜨리고 싶으면
//! [`FaultHook`]으로 데이터그램마다 [`Verdict`]를 직접 정할 수 있다.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::trace;

use crate::transport::Transport;
use crate::{Error, Result};

/// 데이터그램 하나의 운명
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliver,
    Drop,
    /// 임의의 비트 하나를 뒤집어서 전달
    Corrupt,
    /// 두 번 전달
    Duplicate,
}

/// 데이터그램마다 호출되는 결정 함수
pub type FaultHook = Arc<dyn Fn(&[u8]) -> Verdict + Send + Sync>;

/// 한 방향의 장애 모델
#[derive(Clone, Default)]
pub struct FaultModel {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    pub corrupt_rate: f64,
    /// 다음 데이터그램 뒤로 미룰 확률
    pub reorder_rate: f64,
    pub seed: u64,
    /// 설정되면 확률 대신 이 함수가 결정한다 (순서 뒤바뀜은 그대로 적용)
    pub hook: Option<FaultHook>,
}

impl fmt::Debug for FaultModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultModel")
            .field("loss_rate", &self.loss_rate)
            .field("duplicate_rate", &self.duplicate_rate)
            .field("corrupt_rate", &self.corrupt_rate)
            .field("reorder_rate", &self.reorder_rate)
            .field("seed", &self.seed)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl FaultModel {
    /// 장애 없는 링크
    pub fn perfect() -> Self {
        Self::default()
    }

    /// 모든 종류의 장애를 같은 비율로 일으키는 링크
    pub fn unreliable(rate: f64, seed: u64) -> Self {
        Self {
            loss_rate: rate,
            duplicate_rate: rate,
            corrupt_rate: rate,
            reorder_rate: rate,
            seed,
            hook: None,
        }
    }

    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&[u8]) -> Verdict + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    fn decide(&self, rng: &mut StdRng, datagram: &[u8]) -> Verdict {
        if let Some(hook) = &self.hook {
            return hook(datagram);
        }
        if rng.gen_bool(self.loss_rate.clamp(0.0, 1.0)) {
            Verdict::Drop
        } else if rng.gen_bool(self.corrupt_rate.clamp(0.0, 1.0)) {
            Verdict::Corrupt
        } else if rng.gen_bool(self.duplicate_rate.clamp(0.0, 1.0)) {
            Verdict::Duplicate
        } else {
            Verdict::Deliver
        }
    }
}

struct Outbound {
    tx: mpsc::UnboundedSender<Bytes>,
    model: FaultModel,
    rng: StdRng,
    /// 순서를 뒤바꾸기 위해 붙잡아 둔 데이터그램
    held: Option<Bytes>,
}

impl Outbound {
    fn emit(&self, datagram: Bytes) -> u64 {
        // 상대 끝점이 사라졌으면 조용히 버린다
        match self.tx.send(datagram) {
            Ok(()) => 1,
            Err(_) => 0,
        }
    }
}

/// 링크의 한쪽 끝점
pub struct SimEndpoint {
    outbound: Mutex<Outbound>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    sent: AtomicU64,
    delivered: AtomicU64,
}

/// 끝점 쌍 생성기
pub struct SimulatedLink;

impl SimulatedLink {
    /// (a, b) 끝점 쌍. `a_to_b`는 a가 보낸 데이터그램에 적용된다.
    pub fn pair(a_to_b: FaultModel, b_to_a: FaultModel) -> (SimEndpoint, SimEndpoint) {
        let (tx_ab, rx_ab) = mpsc::unbounded_channel();
        let (tx_ba, rx_ba) = mpsc::unbounded_channel();
        (
            SimEndpoint::new(tx_ab, rx_ba, a_to_b),
            SimEndpoint::new(tx_ba, rx_ab, b_to_a),
        )
    }
}

impl SimEndpoint {
    fn new(
        tx: mpsc::UnboundedSender<Bytes>,
        rx: mpsc::UnboundedReceiver<Bytes>,
        model: FaultModel,
    ) -> Self {
        let rng = StdRng::seed_from_u64(model.seed);
        Self {
            outbound: Mutex::new(Outbound {
                tx,
                model,
                rng,
                held: None,
            }),
            inbound: tokio::sync::Mutex::new(rx),
            sent: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    /// 이 끝점에서 보낸 데이터그램 수
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// 상대방 큐에 실제로 들어간 데이터그램 수 (중복 포함)
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for SimEndpoint {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        self.sent.fetch_add(1, Ordering::Relaxed);

        let mut out = self.outbound.lock();
        let out = &mut *out;
        let verdict = out.model.decide(&mut out.rng, datagram);
        trace!("링크 판정: {:?} ({} bytes)", verdict, datagram.len());

        let mut batch: Vec<Bytes> = match verdict {
            Verdict::Deliver => vec![Bytes::copy_from_slice(datagram)],
            Verdict::Drop => Vec::new(),
            Verdict::Duplicate => {
                let bytes = Bytes::copy_from_slice(datagram);
                vec![bytes.clone(), bytes]
            }
            Verdict::Corrupt => {
                let mut bytes = datagram.to_vec();
                if !bytes.is_empty() {
                    let index = out.rng.gen_range(0..bytes.len());
                    let bit = out.rng.gen_range(0..8);
                    bytes[index] ^= 1 << bit;
                }
                vec![Bytes::from(bytes)]
            }
        };

        if out.held.is_none()
            && !batch.is_empty()
            && out.rng.gen_bool(out.model.reorder_rate.clamp(0.0, 1.0))
        {
            out.held = Some(batch.remove(0));
        } else if let Some(held) = out.held.take() {
            batch.push(held);
        }

        let mut delivered = 0;
        for datagram in batch {
            delivered += out.emit(datagram);
        }
        self.delivered.fetch_add(delivered, Ordering::Relaxed);
        Ok(())
    }

    async fn recv(&self, timeout: Duration) -> Result<Option<Bytes>> {
        let mut inbound = self.inbound.lock().await;
        match tokio::time::timeout(timeout, inbound.recv()).await {
            Ok(Some(datagram)) => Ok(Some(datagram)),
            Ok(None) => Err(Error::PeerUnreachable),
            Err(_) => Ok(None),
        }
    }
}
