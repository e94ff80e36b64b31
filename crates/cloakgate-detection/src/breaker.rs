use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

const FAILURE_THRESHOLD: u32 = 5;
const OPEN_DURATION: Duration = Duration::from_secs(30);

/// Circuit breaker guarding one external resource (a threat-intel provider,
/// a store connection). Five consecutive failures open it for thirty
/// seconds; a single success closes it.
pub struct CircuitBreaker {
    name: String,
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
        }
    }

    /// Whether a call may be attempted right now.
    pub fn allows(&self) -> bool {
        let mut opened = match self.opened_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *opened {
            None => true,
            Some(at) if at.elapsed() >= OPEN_DURATION => {
                // Half-open: let one attempt through; failure re-opens.
                *opened = None;
                self.consecutive_failures
                    .store(FAILURE_THRESHOLD - 1, Ordering::Relaxed);
                true
            }
            Some(_) => false,
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if let Ok(mut opened) = self.opened_at.lock() {
            *opened = None;
        }
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= FAILURE_THRESHOLD {
            let mut opened = match self.opened_at.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if opened.is_none() {
                warn!(resource = %self.name, failures, "circuit breaker opened");
            }
            *opened = Some(Instant::now());
        }
    }
}
