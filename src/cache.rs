//! 수신측 재조립 캐시
//!
//! 순서가 뒤바뀐 DATA 페이로드를 보관하고, `floor` (아직 싱크에 쓰지 않은 가장 작은
//! 시퀀스 번호)를 관리한다. 삽입 판단(floor 비교 + 중복 검사 + 삽입)과 floor 전진은
//! 같은 락 아래에서만 일어난다.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// 삽입 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// 새로 받아들임
    Accepted,
    /// 이미 싱크에 쓴 시퀀스 번호
    BelowFloor,
    /// 캐시에 이미 있음
    Duplicate,
}

#[derive(Debug, Default)]
struct CacheInner {
    floor: u32,
    entries: HashMap<u32, Bytes>,
    /// 지금까지 받아들인 서로 다른 시퀀스 번호 수
    accepted: u32,
}

/// 재조립 캐시
#[derive(Debug, Default)]
pub struct ReassemblyCache {
    inner: Mutex<CacheInner>,
    ready: Notify,
}

impl ReassemblyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 확인 후 삽입. 받아들였으면 writer를 깨운다.
    pub fn insert(&self, seq: u32, payload: Bytes) -> InsertOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            if seq < inner.floor {
                InsertOutcome::BelowFloor
            } else if inner.entries.contains_key(&seq) {
                InsertOutcome::Duplicate
            } else {
                inner.entries.insert(seq, payload);
                inner.accepted += 1;
                InsertOutcome::Accepted
            }
        };

        if outcome == InsertOutcome::Accepted {
            self.ready.notify_one();
        }
        outcome
    }

    /// floor 위치의 항목을 꺼내고 floor를 1 올린다. floor가 움직이는 유일한 곳.
    pub fn pop_floor(&self) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        let floor = inner.floor;
        let payload = inner.entries.remove(&floor)?;
        inner.floor += 1;
        Some(payload)
    }

    /// 삽입 알림 대기 (알림은 하나까지 쌓인다)
    pub async fn wait_ready(&self) {
        self.ready.notified().await;
    }

    pub fn floor(&self) -> u32 {
        self.inner.lock().floor
    }

    pub fn accepted(&self) -> u32 {
        self.inner.lock().accepted
    }

    /// 아직 쓰지 않은 항목 수
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `seq` 항목 조회 (floor 아래는 항상 `None`)
    pub fn get(&self, seq: u32) -> Option<Bytes> {
        self.inner.lock().entries.get(&seq).cloned()
    }
}
