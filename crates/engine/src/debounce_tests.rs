// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tokio::sync::mpsc;

fn recorder() -> (mpsc::UnboundedSender<&'static str>, mpsc::UnboundedReceiver<&'static str>) {
    mpsc::unbounded_channel()
}

#[tokio::test(start_paused = true)]
async fn fires_once_after_the_quiet_window() {
    let debouncer = Debouncer::new(100);
    let (tx, mut rx) = recorder();

    debouncer.debounce("k", move || {
        let _ = tx.send("fired");
    });
    assert_eq!(debouncer.pending_count(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(rx.recv().await, Some("fired"));
    assert_eq!(debouncer.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn burst_collapses_to_the_last_op() {
    let debouncer = Debouncer::new(100);
    let (tx, mut rx) = recorder();

    for tag in ["first", "second", "third"] {
        let tx = tx.clone();
        debouncer.debounce("k", move || {
            let _ = tx.send(tag);
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    drop(tx);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(rx.recv().await, Some("third"));
    assert_eq!(rx.recv().await, None, "earlier ops never ran");
}

#[tokio::test(start_paused = true)]
async fn each_call_resets_the_window() {
    let debouncer = Debouncer::new(100);
    let (tx, mut rx) = recorder();

    // Keep poking before the window elapses; nothing may fire meanwhile.
    for _ in 0..3 {
        let tx = tx.clone();
        debouncer.debounce("k", move || {
            let _ = tx.send("fired");
        });
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
    }

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(rx.try_recv(), Ok("fired"));
}

#[tokio::test(start_paused = true)]
async fn keys_are_independent() {
    let debouncer = Debouncer::new(50);
    let (tx, mut rx) = recorder();

    let tx_a = tx.clone();
    debouncer.debounce("a", move || {
        let _ = tx_a.send("a");
    });
    debouncer.debounce("b", move || {
        let _ = tx.send("b");
    });
    assert_eq!(debouncer.pending_count(), 2);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut fired = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
    fired.sort();
    assert_eq!(fired, vec!["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn cancel_drops_without_firing() {
    let debouncer = Debouncer::new(50);
    let (tx, mut rx) = recorder();

    debouncer.debounce("k", move || {
        let _ = tx.send("fired");
    });
    debouncer.cancel("k");
    assert_eq!(debouncer.pending_count(), 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rx.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn cancel_all_clears_every_key() {
    let debouncer = Debouncer::new(50);
    let (tx, mut rx) = recorder();

    for key in ["a", "b", "c"] {
        let tx = tx.clone();
        debouncer.debounce(key, move || {
            let _ = tx.send("fired");
        });
    }
    drop(tx);
    debouncer.cancel_all();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rx.recv().await, None);
    assert_eq!(debouncer.pending_count(), 0);
}
