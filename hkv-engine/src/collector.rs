//! # Expiration collector
//!
//! Background task that periodically samples keys with a deadline and
//! evicts the ones past due, so memory for expired keys is reclaimed even
//! without a client ever touching them again.

use std::sync::Arc;
use std::time::Duration;

use hkv_common::rng::XorShift64;
use tokio::sync::watch;
use tokio::time;
use tracing::debug;

use crate::store::Store;

const TICK_INTERVAL: Duration = Duration::from_millis(100);
const SAMPLE_SIZE: usize = 20;
const REPEAT_THRESHOLD: usize = 5;

/// Runs the collector loop until `shutdown` reports `true`.
///
/// Each tick samples up to `SAMPLE_SIZE` keys with a deadline; if at least
/// `REPEAT_THRESHOLD` were evicted, the sampling repeats immediately within
/// the same tick instead of waiting for the next one.
pub async fn run(store: Arc<Store>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = time::interval(TICK_INTERVAL);
    let mut rng = XorShift64::new(seed_from_time());

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                loop {
                    let (sampled, evicted) = store.sample_and_evict(SAMPLE_SIZE, &mut rng);
                    if sampled > 0 {
                        debug!(sampled, evicted, "expiration collector tick");
                    }
                    if sampled == 0 || evicted < REPEAT_THRESHOLD {
                        break;
                    }
                }
            }
        }
    }
}

fn seed_from_time() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0xC0FF_EE15_BEEF_BABE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hkv_common::clock::FakeClock;
    use hkv_common::value::Value;

    #[tokio::test(start_paused = true)]
    async fn collector_evicts_expired_keys() {
        let clock = Arc::new(FakeClock::new(1_000.0));
        let store = Arc::new(Store::new(clock.clone(), None));
        for i in 0..3 {
            store.set(
                &format!("k{i}"),
                Value::Str("v".to_string()),
                Some(clock.now() - 1.0),
                false,
                false,
            );
        }

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run(store.clone(), rx));

        time::advance(Duration::from_millis(150)).await;
        time::sleep(Duration::from_millis(1)).await;

        for i in 0..3 {
            assert!(store.get(&format!("k{i}")).is_err());
        }

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
