//! 재전송 스케줄러
//!
//! 패킷마다 고정된 타임아웃의 타이머를 건다. 만료되면 (취소되지 않았을 때만)
//! 재전송 큐에 넣고, 타이머는 그걸로 끝난다. 다시 거는 건 실제로 재전송할 때다.
//! 백오프도 재시도 상한도 없다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

use crate::pool::{SlotId, SlotPool};

/// 재전송 큐 항목
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resend {
    pub slot: SlotId,
    pub seq: u32,
}

/// 재전송 큐 수신기 타입
pub type ResendQueue = mpsc::UnboundedReceiver<Resend>;

/// 슬롯별 재전송 타이머
pub struct RetransmitScheduler {
    pool: Arc<SlotPool>,
    resend_tx: mpsc::UnboundedSender<Resend>,
    timeout: Duration,
}

impl RetransmitScheduler {
    pub fn new(pool: Arc<SlotPool>, timeout: Duration) -> (Self, ResendQueue) {
        let (resend_tx, resend_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            pool,
            resend_tx,
            timeout,
        };
        (scheduler, resend_rx)
    }

    /// `timeout` 후 재전송 큐에 넣도록 타이머를 건다.
    pub fn arm(&self, slot: SlotId, seq: u32) {
        let pool = self.pool.clone();
        let resend_tx = self.resend_tx.clone();
        let timeout = self.timeout;

        self.pool.arm_with(slot, seq, move |epoch| {
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(seq) = pool.fire(slot, epoch) {
                    trace!("타이머 만료: seq={}", seq);
                    let _ = resend_tx.send(Resend { slot, seq });
                }
            })
            .abort_handle()
        });
    }

    /// `seq`의 타이머를 취소하고 슬롯을 반납한다. 이미 만료/취소됐으면 `false`.
    pub fn cancel(&self, seq: u32) -> bool {
        self.pool.acknowledge(seq)
    }
}
