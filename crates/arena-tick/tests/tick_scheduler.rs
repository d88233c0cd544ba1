//! Tests for the fixed-rate tick scheduler.
//!
//! Uses Tokio's paused clock, so `sleep_until` resolves as soon as the
//! runtime has nothing else to do and timing is deterministic.

use std::time::Duration;

use arena_tick::{TickConfig, TickScheduler};

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_config_is_fifty_hz() {
    let cfg = TickConfig::default();
    assert_eq!(cfg.tick_rate_hz, 50);
    assert_eq!(cfg.tick_duration(), Duration::from_millis(20));
}

#[test]
fn test_with_rate_sets_duration() {
    assert_eq!(
        TickConfig::with_rate(20).tick_duration(),
        Duration::from_millis(50)
    );
}

#[test]
fn test_zero_rate_is_clamped_to_one() {
    let cfg = TickConfig::with_rate(0).validated();
    assert_eq!(cfg.tick_rate_hz, 1);
    assert_eq!(cfg.tick_duration(), Duration::from_secs(1));
}

#[test]
fn test_excessive_rate_is_clamped() {
    let s = TickScheduler::with_rate(1_000_000);
    assert_eq!(s.tick_rate_hz(), TickConfig::MAX_TICK_RATE_HZ);
    assert_eq!(s.tick_duration(), Duration::from_millis(1));
}

#[test]
fn test_config_serde_round_trip() {
    let cfg = TickConfig::with_rate(30);
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(serde_json::from_str::<TickConfig>(&json).unwrap(), cfg);
}

// =========================================================================
// Tick firing
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_fires_and_increments() {
    let mut s = TickScheduler::with_rate(20);
    let start = tokio::time::Instant::now();

    let info = s.wait_for_tick().await;

    assert_eq!(info.tick, 1);
    assert_eq!(info.dt, Duration::from_millis(50));
    assert_eq!(start.elapsed(), Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_ticks_are_monotonic() {
    let mut s = TickScheduler::with_rate(20);
    for expected in 1..=5 {
        assert_eq!(s.wait_for_tick().await.tick, expected);
    }
    assert_eq!(s.tick_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_late_tick_skips_ahead() {
    let mut s = TickScheduler::with_rate(20);
    s.wait_for_tick().await;

    // Stall for three and a half ticks past the next deadline.
    tokio::time::advance(Duration::from_millis(50 + 175)).await;
    let late = s.wait_for_tick().await;
    assert_eq!(late.tick, 2);

    // No burst of catch-up ticks: the cadence restarts from now.
    let before = tokio::time::Instant::now();
    let next = s.wait_for_tick().await;
    assert_eq!(next.tick, 3);
    assert_eq!(before.elapsed(), Duration::from_millis(50));
}

// =========================================================================
// select! loop pattern
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_select_loop_pattern() {
    let mut s = TickScheduler::with_rate(20);
    let (tx, mut rx) = tokio::sync::mpsc::channel::<&str>(1);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(160)).await;
        tx.send("stop").await.ok();
    });

    let mut ticks_fired = 0u64;
    loop {
        tokio::select! {
            Some(cmd) = rx.recv() => {
                assert_eq!(cmd, "stop");
                break;
            }
            info = s.wait_for_tick() => {
                ticks_fired += 1;
                assert_eq!(info.tick, ticks_fired);
            }
        }
    }

    assert_eq!(ticks_fired, 3);
}
