//! Bandwidth throttling
//!
//! A token bucket refilled continuously at the configured rate, holding at
//! most one second of tokens. Callers acquire tokens for every chunk before
//! issuing its I/O; a chunk larger than the bucket drives it negative and the
//! caller sleeps until the debt is paid back. Callers size chunks with
//! [`BandwidthThrottle::chunk_len`] so one chunk never costs more than about a
//! second of waiting, and the wait ends early when the pass is cancelled.
//! A rate of 0 disables throttling. The rate can be changed while transfers
//! are running.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::TransferError;

#[derive(Debug)]
struct Bucket {
    /// Bytes per second, 0 for unlimited
    rate: u64,
    /// Available tokens; negative while in debt
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        let cap = self.rate as f64;
        self.tokens = (self.tokens + elapsed * cap).min(cap);
    }
}

/// Per-direction token bucket shared by every transfer of a pass
#[derive(Debug)]
pub struct BandwidthThrottle {
    name: &'static str,
    bucket: Mutex<Bucket>,
}

impl BandwidthThrottle {
    /// Creates a throttle limited to `bytes_per_sec` (0 for unlimited).
    pub fn new(name: &'static str, bytes_per_sec: u64) -> Self {
        Self {
            name,
            bucket: Mutex::new(Bucket {
                rate: bytes_per_sec,
                tokens: bytes_per_sec as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> u64 {
        self.lock().rate
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate() == 0
    }

    /// Changes the rate; outstanding debt is kept when still limited.
    pub fn set_rate(&self, bytes_per_sec: u64) {
        let mut bucket = self.lock();
        if bucket.rate == bytes_per_sec {
            return;
        }
        bucket.refill(Instant::now());
        bucket.rate = bytes_per_sec;
        if bytes_per_sec == 0 {
            bucket.tokens = 0.0;
        } else {
            bucket.tokens = bucket.tokens.min(bytes_per_sec as f64);
        }
        debug!(throttle = self.name, bytes_per_sec, "Bandwidth limit updated");
    }

    /// Largest I/O size worth issuing: `chunk`, capped at one second of tokens.
    pub fn chunk_len(&self, chunk: u64) -> u64 {
        match self.rate() {
            0 => chunk,
            rate => chunk.min(rate),
        }
        .max(1)
    }

    /// Waits until `bytes` may be transferred.
    ///
    /// Returns `TransferError::Cancelled` as soon as `cancel` fires; the
    /// tokens already taken stay spent.
    pub async fn acquire(
        &self,
        bytes: u64,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        if bytes == 0 {
            return Ok(());
        }
        let wait = {
            let mut bucket = self.lock();
            if bucket.rate == 0 {
                return Ok(());
            }
            bucket.refill(Instant::now());
            bucket.tokens -= bytes as f64;
            if bucket.tokens >= 0.0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(-bucket.tokens / bucket.rate as f64)
            }
        };

        if !wait.is_zero() {
            trace!(
                throttle = self.name,
                bytes,
                wait_ms = wait.as_millis() as u64,
                "Throttling transfer"
            );
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            }
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        // A poisoned bucket still holds consistent numbers
        self.bucket.lock().unwrap_or_else(|e| e.into_inner())
    }
}
