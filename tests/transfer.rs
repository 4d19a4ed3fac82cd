//! 메모리 링크 위의 전체 전송 테스트

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use common::{ack_seq, data_seq, is_fin, is_success_sack, is_syn, pattern, test_config, transfer};
use udpft::{Config, FaultModel, Verdict};

#[tokio::test]
async fn test_5000_bytes_makes_six_packets() {
    let lengths = Arc::new(Mutex::new(HashMap::new()));
    let seen = lengths.clone();
    let to_receiver = FaultModel::perfect().with_hook(move |d: &[u8]| {
        if let Some(seq) = data_seq(d) {
            seen.lock().insert(seq, d.len() - udpft::HEADER_SIZE);
        }
        Verdict::Deliver
    });

    let data = pattern(5000);
    let out = transfer(
        test_config(),
        test_config(),
        to_receiver,
        FaultModel::perfect(),
        data.clone(),
        "out/5000.bin",
    )
    .await;

    assert_eq!(out.send.connection.total_packets, 6);
    assert_eq!(out.recv.connection.total_packets, 6);
    assert_eq!(out.recv.bytes_written, 5000);
    assert_eq!(out.sink.contents(), data);
    assert_eq!(out.opened, vec!["out/5000.bin".to_string()]);

    let lengths = lengths.lock();
    assert_eq!(lengths.len(), 6);
    for seq in 0..5 {
        assert_eq!(lengths[&seq], 991);
    }
    assert_eq!(lengths[&5], 45);
}

#[tokio::test]
async fn test_corrupted_syn_then_valid_syn() {
    let syns = Arc::new(AtomicUsize::new(0));
    let success_sacks = Arc::new(AtomicUsize::new(0));

    let syn_count = syns.clone();
    let to_receiver = FaultModel::perfect().with_hook(move |d: &[u8]| {
        if is_syn(d) && syn_count.fetch_add(1, Ordering::SeqCst) == 0 {
            Verdict::Corrupt
        } else {
            Verdict::Deliver
        }
    });
    let sack_count = success_sacks.clone();
    let to_sender = FaultModel::perfect().with_hook(move |d: &[u8]| {
        if is_success_sack(d) {
            sack_count.fetch_add(1, Ordering::SeqCst);
        }
        Verdict::Deliver
    });

    // 시도마다 SYN 하나, 실패 SACK을 놓치지 않도록 넉넉한 대기 시간
    let sender_config = Config {
        syn_copies: 1,
        sack_timeout: Duration::from_millis(500),
        ..test_config()
    };
    let data = pattern(3000);
    let out = transfer(
        sender_config,
        test_config(),
        to_receiver,
        to_sender,
        data.clone(),
        "valid.bin",
    )
    .await;

    assert_eq!(syns.load(Ordering::SeqCst), 2);
    assert_eq!(success_sacks.load(Ordering::SeqCst), 1);
    assert_eq!(out.opened, vec!["valid.bin".to_string()]);
    assert_eq!(out.sink.contents(), data);
    assert_eq!(out.recv.stats.corrupted_dropped, 1);
    assert_eq!(out.send.stats.handshake_attempts, 2);
}

#[tokio::test]
async fn test_dropped_ack_is_retransmitted() {
    let transmissions = Arc::new(AtomicUsize::new(0));
    let dropped = Arc::new(AtomicUsize::new(0));

    let sent = transmissions.clone();
    let to_receiver = FaultModel::perfect().with_hook(move |d: &[u8]| {
        if data_seq(d) == Some(3) {
            sent.fetch_add(1, Ordering::SeqCst);
        }
        Verdict::Deliver
    });

    // ACK 3은 두 번 버리고, 세 번째 전송 전까지는 수신자의 FIN도 막는다
    let sent = transmissions.clone();
    let drops = dropped.clone();
    let to_sender = FaultModel::perfect().with_hook(move |d: &[u8]| {
        if ack_seq(d) == Some(3) && drops.load(Ordering::SeqCst) < 2 {
            drops.fetch_add(1, Ordering::SeqCst);
            return Verdict::Drop;
        }
        if is_fin(d) && sent.load(Ordering::SeqCst) < 3 {
            return Verdict::Drop;
        }
        Verdict::Deliver
    });

    let config = Config {
        ack_timeout: Duration::from_millis(50),
        teardown_linger: Duration::from_secs(10),
        ..test_config()
    };
    let data = pattern(10 * 991 + 17);
    let out = transfer(
        config.clone(),
        config,
        to_receiver,
        to_sender,
        data.clone(),
        "retransmit.bin",
    )
    .await;

    assert_eq!(dropped.load(Ordering::SeqCst), 2);
    assert_eq!(transmissions.load(Ordering::SeqCst), 3);
    assert!(out.send.stats.retransmitted_packets >= 2);
    assert_eq!(out.sink.contents(), data);
}

#[tokio::test]
async fn test_exactly_once_under_unreliable_link() {
    let data = pattern(300 * 991 + 123);
    let config = Config {
        window_cap: 64,
        ack_timeout: Duration::from_millis(20),
        teardown_linger: Duration::from_secs(2),
        ..test_config()
    };

    let out = transfer(
        config.clone(),
        config,
        FaultModel::unreliable(0.05, 7),
        FaultModel::unreliable(0.05, 11),
        data.clone(),
        "lossy.bin",
    )
    .await;

    let received = out.sink.contents();
    assert_eq!(received.len(), data.len());
    assert_eq!(received, data);
    assert_eq!(out.recv.bytes_written, data.len() as u64);
    assert!(out.send.stats.retransmitted_packets > 0);
}

#[tokio::test]
async fn test_duplicates_only_link() {
    let duplicate_everything = || FaultModel::perfect().with_hook(|_: &[u8]| Verdict::Duplicate);
    let data = pattern(50 * 991);

    let out = transfer(
        test_config(),
        test_config(),
        duplicate_everything(),
        duplicate_everything(),
        data.clone(),
        "dup.bin",
    )
    .await;

    assert_eq!(out.sink.contents(), data);
    let stats = &out.recv.stats;
    assert!(stats.duplicate_data + stats.below_floor >= 50);
}

#[tokio::test]
async fn test_window_never_exceeds_cap() {
    let config = Config {
        window_cap: 8,
        ..test_config()
    };
    let data = pattern(200 * 991);

    let out = transfer(
        config,
        test_config(),
        FaultModel::unreliable(0.02, 3),
        FaultModel::perfect(),
        data.clone(),
        "window.bin",
    )
    .await;

    assert_eq!(out.sink.contents(), data);
    let peak = out.send.stats.peak_in_flight;
    assert!(peak > 0 && peak <= 8, "peak in flight {}", peak);
}

#[tokio::test]
async fn test_duplicate_fins_do_not_rewrite() {
    let fins = || {
        FaultModel::perfect().with_hook(|d: &[u8]| {
            if is_fin(d) {
                Verdict::Duplicate
            } else {
                Verdict::Deliver
            }
        })
    };
    let data = pattern(20 * 991 + 5);

    let out = transfer(
        test_config(),
        test_config(),
        fins(),
        fins(),
        data.clone(),
        "fin.bin",
    )
    .await;

    let writes = out.sink.writes();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(out.sink.writes(), writes);
    assert_eq!(out.sink.contents(), data);
}

#[tokio::test]
async fn test_zero_byte_transfer() {
    let out = transfer(
        test_config(),
        test_config(),
        FaultModel::perfect(),
        FaultModel::perfect(),
        Vec::new(),
        "empty.bin",
    )
    .await;

    assert_eq!(out.send.connection.total_packets, 0);
    assert_eq!(out.recv.bytes_written, 0);
    assert!(out.sink.contents().is_empty());
    assert_eq!(out.opened, vec!["empty.bin".to_string()]);
}

/// 첫 번째 성공 SACK만 버리고 나머지는 센다.
fn drop_first_success_sack(count: Arc<AtomicUsize>) -> FaultModel {
    FaultModel::perfect().with_hook(move |d: &[u8]| {
        if is_success_sack(d) && count.fetch_add(1, Ordering::SeqCst) == 0 {
            return Verdict::Drop;
        }
        Verdict::Deliver
    })
}

#[tokio::test]
async fn test_lost_sack_is_answered_again_while_receiving() {
    let success_sacks = Arc::new(AtomicUsize::new(0));
    let sender_config = Config {
        syn_copies: 1,
        sack_timeout: Duration::from_millis(500),
        ..test_config()
    };
    let data = pattern(3 * 991);

    let out = transfer(
        sender_config,
        test_config(),
        FaultModel::perfect(),
        drop_first_success_sack(success_sacks.clone()),
        data.clone(),
        "resack.bin",
    )
    .await;

    assert_eq!(success_sacks.load(Ordering::SeqCst), 2);
    assert_eq!(out.opened, vec!["resack.bin".to_string()]);
    assert_eq!(out.send.stats.handshake_attempts, 2);
    assert_eq!(out.sink.contents(), data);
}

#[tokio::test]
async fn test_lost_sack_on_zero_byte_transfer() {
    let success_sacks = Arc::new(AtomicUsize::new(0));
    let sender_config = Config {
        syn_copies: 1,
        sack_timeout: Duration::from_millis(500),
        ..test_config()
    };

    let out = transfer(
        sender_config,
        test_config(),
        FaultModel::perfect(),
        drop_first_success_sack(success_sacks.clone()),
        Vec::new(),
        "empty-resack.bin",
    )
    .await;

    assert_eq!(success_sacks.load(Ordering::SeqCst), 2);
    assert_eq!(out.opened, vec!["empty-resack.bin".to_string()]);
    assert_eq!(out.send.connection.total_packets, 0);
    assert!(out.sink.contents().is_empty());
}

#[tokio::test]
async fn test_receiver_lingers_while_sender_retransmits() {
    // 마지막 ACK와 수신자의 FIN을 teardown_linger보다 오래 막는다
    let started = Instant::now();
    let to_sender = FaultModel::perfect().with_hook(move |d: &[u8]| {
        let blocked = started.elapsed() < Duration::from_millis(1500);
        if blocked && (ack_seq(d) == Some(2) || is_fin(d)) {
            return Verdict::Drop;
        }
        Verdict::Deliver
    });

    let sender_config = Config {
        ack_timeout: Duration::from_millis(50),
        ..test_config()
    };
    let receiver_config = Config {
        teardown_linger: Duration::from_secs(1),
        ..test_config()
    };
    let data = pattern(3 * 991);

    let out = transfer(
        sender_config,
        receiver_config,
        FaultModel::perfect(),
        to_sender,
        data.clone(),
        "linger.bin",
    )
    .await;

    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert!(out.send.stats.retransmitted_packets > 0);
    assert!(out.recv.stats.below_floor > 0);
    assert_eq!(out.sink.contents(), data);
}
