use crate::types::RpsMode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// Paces request issuance to a target rate with a bounded token
/// reservoir. The reservoir starts empty and holds at most `rate` tokens;
/// refills that find it full are discarded, never queued.
///
/// Callers only construct a limiter for a non-zero rate; rate 0 means no
/// limiter at all.
pub struct RateLimiter {
    rate: u32,
    mode: RpsMode,
    tokens: AtomicU64,
    max_tokens: u64,
    refill_notify: Notify,
    cancel: CancellationToken,
}

impl RateLimiter {
    pub fn new(rate: u32, mode: RpsMode, cancel: CancellationToken) -> Arc<Self> {
        debug_assert!(rate > 0);
        Arc::new(Self {
            rate,
            mode,
            tokens: AtomicU64::new(0),
            max_tokens: rate as u64,
            refill_notify: Notify::new(),
            cancel,
        })
    }

    /// Takes one token, waiting for a refill when the reservoir is empty.
    /// Returns `false` if cancellation fired while waiting.
    pub async fn acquire(&self) -> bool {
        loop {
            // Register for the next refill before checking the reservoir,
            // so a refill landing between the check and the wait is not
            // missed.
            let notified = self.refill_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_take() {
                return true;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.cancel.cancelled() => return false,
            }
        }
    }

    fn try_take(&self) -> bool {
        let mut current = self.tokens.load(Ordering::Relaxed);
        while current > 0 {
            match self.tokens.compare_exchange(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
        false
    }

    /// Periodic refill task. Burst mode fills the reservoir to capacity at
    /// one-second boundaries; even mode adds one token every 1/rate
    /// seconds. Exits as soon as the cancellation token fires.
    pub async fn run_refiller(self: Arc<Self>) {
        let period = match self.mode {
            RpsMode::Burst => Duration::from_secs(1),
            RpsMode::Even => Duration::from_micros(1_000_000 / self.rate as u64),
        };

        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval() fires immediately; the reservoir stays empty until
        // the first full period has elapsed.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            match self.mode {
                RpsMode::Burst => {
                    self.tokens.store(self.max_tokens, Ordering::Relaxed);
                    self.refill_notify.notify_waiters();
                }
                RpsMode::Even => {
                    // Atomic increment-below-cap: a plain load/store pair
                    // here can resurrect a token that a concurrent
                    // acquire() just consumed.
                    let _ = self.tokens.fetch_update(
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                        |tokens| (tokens < self.max_tokens).then_some(tokens + 1),
                    );
                    self.refill_notify.notify_one();
                }
            }
        }
        tracing::debug!("rate limiter refiller stopped");
    }
}
