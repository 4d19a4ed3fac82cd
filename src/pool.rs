//! 패킷 버퍼/타이머 슬롯 풀
//!
//! 송신 윈도우 크기는 이 풀의 상한으로 결정된다. 슬롯은 인덱스로 식별되는
//! 아레나에 저장되고, 한 슬롯은 항상 "비어 있음" 또는 "정확히 하나의 시퀀스 번호에
//! 묶여 있음" 중 하나다.
//!
//! ```text
//!  Free ──acquire──▶ Reserved ──arm──▶ Armed ──fire──▶ Fired ──arm──▶ Armed
//!    ▲                                  │
//!    └──────────── acknowledge ─────────┘
//! ```
//!
//! 타이머 만료(`fire`)와 ACK 처리(`acknowledge`)는 같은 락 아래에서 epoch를 비교하므로
//! 둘 중 정확히 하나만 성공한다.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use crate::packet;
use crate::MAX_PACKET_SIZE;

/// 슬롯 식별자 (아레나 인덱스)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Reserved,
    Armed { seq: u32, epoch: u64 },
    Fired { seq: u32 },
}

#[derive(Debug)]
struct Slot {
    /// 재사용되는 인코딩 버퍼
    buf: BytesMut,
    /// 마지막으로 인코딩된 패킷 (재전송용)
    packet: Option<Bytes>,
    state: SlotState,
    epoch: u64,
    timer: Option<AbortHandle>,
}

impl Slot {
    fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(MAX_PACKET_SIZE),
            packet: None,
            state: SlotState::Free,
            epoch: 0,
            timer: None,
        }
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    slots: Vec<Slot>,
    free: Vec<SlotId>,
    /// 타이머가 걸린 시퀀스 번호 → 슬롯
    armed: HashMap<u32, SlotId>,
    outstanding: usize,
    high_water: usize,
}

impl PoolInner {
    fn release(&mut self, id: SlotId) {
        let slot = &mut self.slots[id.0];
        if slot.state == SlotState::Free {
            return;
        }
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        match slot.state {
            SlotState::Armed { seq, .. } | SlotState::Fired { seq } => {
                if self.armed.get(&seq) == Some(&id) {
                    self.armed.remove(&seq);
                }
            }
            _ => {}
        }
        slot.state = SlotState::Free;
        slot.packet = None;
        slot.epoch += 1;
        self.free.push(id);
        self.outstanding -= 1;
    }
}

/// 제한된 크기의 슬롯 풀
#[derive(Debug)]
pub struct SlotPool {
    inner: Mutex<PoolInner>,
    cap: usize,
    released: Notify,
}

impl SlotPool {
    /// `cap`개를 넘지 않는 풀 생성. 슬롯은 필요할 때 만들어진다.
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            cap,
            released: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// 빈 슬롯을 꺼낸다. 상한에 도달했으면 `None` (호출자가 대기 후 재시도).
    pub fn acquire(&self) -> Option<SlotId> {
        let mut inner = self.inner.lock();
        let id = match inner.free.pop() {
            Some(id) => id,
            None if inner.slots.len() < self.cap => {
                inner.slots.push(Slot::new());
                SlotId(inner.slots.len() - 1)
            }
            None => return None,
        };

        inner.slots[id.0].state = SlotState::Reserved;
        inner.outstanding += 1;
        inner.high_water = inner.high_water.max(inner.outstanding);
        Some(id)
    }

    /// 슬롯 버퍼에 DATA 패킷을 인코딩하고 전송할 바이트를 돌려준다.
    pub fn load_data(&self, id: SlotId, seq: u32, payload: &[u8]) -> Bytes {
        let mut inner = self.inner.lock();
        let slot = &mut inner.slots[id.0];

        slot.buf.clear();
        packet::encode_data_into(&mut slot.buf, seq, payload);
        let bytes = slot.buf.split().freeze();
        slot.packet = Some(bytes.clone());
        bytes
    }

    /// 재전송할 패킷
    pub fn packet(&self, id: SlotId) -> Option<Bytes> {
        self.inner.lock().slots[id.0].packet.clone()
    }

    /// 슬롯을 `seq`에 묶고 타이머를 건다.
    ///
    /// `spawn`은 락 안에서 새 epoch를 받아 타이머 태스크를 만든다.
    pub(crate) fn arm_with<F>(&self, id: SlotId, seq: u32, spawn: F)
    where
        F: FnOnce(u64) -> AbortHandle,
    {
        let mut inner = self.inner.lock();
        let slot = &mut inner.slots[id.0];
        if slot.state == SlotState::Free {
            return;
        }
        if let Some(old) = slot.timer.take() {
            old.abort();
        }

        slot.epoch += 1;
        let epoch = slot.epoch;
        slot.state = SlotState::Armed { seq, epoch };
        slot.timer = Some(spawn(epoch));
        inner.armed.insert(seq, id);
    }

    /// 타이머 만료 처리. 아직 취소되지 않았으면 `Fired`로 바꾸고 시퀀스 번호를 돌려준다.
    pub(crate) fn fire(&self, id: SlotId, epoch: u64) -> Option<u32> {
        let mut inner = self.inner.lock();
        let slot = &mut inner.slots[id.0];
        match slot.state {
            SlotState::Armed { seq, epoch: armed } if armed == epoch => {
                slot.state = SlotState::Fired { seq };
                slot.timer = None;
                inner.armed.remove(&seq);
                Some(seq)
            }
            _ => None,
        }
    }

    /// ACK 처리: 타이머가 걸린 `seq`가 있으면 취소하고 슬롯을 반납한다.
    ///
    /// 이미 반납됐거나 재전송 대기 중(`Fired`)이면 아무것도 하지 않고 `false`.
    pub fn acknowledge(&self, seq: u32) -> bool {
        let mut inner = self.inner.lock();
        let Some(id) = inner.armed.remove(&seq) else {
            return false;
        };
        inner.release(id);
        drop(inner);

        self.released.notify_one();
        true
    }

    /// 슬롯 반납 (걸려 있는 타이머는 취소)
    pub fn release(&self, id: SlotId) {
        self.inner.lock().release(id);
        self.released.notify_one();
    }

    /// 모든 슬롯의 타이머를 취소하고 반납한다.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        let ids: Vec<SlotId> = (0..inner.slots.len()).map(SlotId).collect();
        for id in ids {
            inner.release(id);
        }
    }

    /// 반납 알림 대기
    pub fn released(&self) -> Notified<'_> {
        self.released.notified()
    }

    /// 현재 사용 중인 슬롯 수
    pub fn outstanding(&self) -> usize {
        self.inner.lock().outstanding
    }

    /// 동시에 사용된 슬롯 수의 최댓값
    pub fn high_water(&self) -> usize {
        self.inner.lock().high_water
    }

    /// 지금까지 만들어진 슬롯 수
    pub fn allocated(&self) -> usize {
        self.inner.lock().slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn idle_timer() -> AbortHandle {
        tokio::spawn(tokio::time::sleep(Duration::from_secs(60))).abort_handle()
    }

    #[test]
    fn test_acquire_respects_cap() {
        let pool = SlotPool::new(2);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a, b);
        assert!(pool.acquire().is_none());
        assert_eq!(pool.outstanding(), 2);

        pool.release(a);
        assert_eq!(pool.acquire(), Some(a));
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.high_water(), 2);
    }

    #[tokio::test]
    async fn test_acknowledge_releases_armed_slot() {
        let pool = SlotPool::new(1);
        let id = pool.acquire().unwrap();
        pool.load_data(id, 9, b"abc");
        pool.arm_with(id, 9, |_| idle_timer());

        assert!(pool.acknowledge(9));
        assert!(!pool.acknowledge(9));
        assert_eq!(pool.outstanding(), 0);
        assert!(pool.packet(id).is_none());
    }

    #[tokio::test]
    async fn test_fire_and_acknowledge_are_exclusive() {
        let pool = SlotPool::new(1);
        let id = pool.acquire().unwrap();
        let mut epoch = 0;
        pool.arm_with(id, 4, |e| {
            epoch = e;
            idle_timer()
        });

        assert_eq!(pool.fire(id, epoch), Some(4));
        // 재전송 대기 중인 슬롯은 ACK로 반납되지 않는다
        assert!(!pool.acknowledge(4));
        assert_eq!(pool.fire(id, epoch), None);
        assert_eq!(pool.outstanding(), 1);

        // 다시 걸면 이전 epoch는 무효
        let mut next = 0;
        pool.arm_with(id, 4, |e| {
            next = e;
            idle_timer()
        });
        assert_ne!(epoch, next);
        assert_eq!(pool.fire(id, epoch), None);
        assert!(pool.acknowledge(4));
        assert_eq!(pool.fire(id, next), None);
    }

    #[test]
    fn test_load_data_reuses_encoding() {
        let pool = SlotPool::new(1);
        let id = pool.acquire().unwrap();
        let first = pool.load_data(id, 1, b"first");
        assert_eq!(pool.packet(id).unwrap(), first);

        let second = pool.load_data(id, 2, b"second");
        assert_eq!(&second[9..], b"second");
        assert_eq!(&first[9..], b"first");
    }
}
