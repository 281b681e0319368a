use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Consecutive failures before a source address is locked out.
pub const FAILURE_THRESHOLD: u32 = 3;

/// Fixed lockout window; not exponential.
pub const LOCKOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Locked { remaining_secs: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct FailureOutcome {
    pub banned: bool,
    pub remaining_attempts: u32,
}

struct ThrottleRecord {
    fail_count: u32,
    ban_until: Option<Instant>,
}

/// Per-source-address login failure counter with a time-boxed lockout.
///
/// The counter increments on every failed attempt; whenever it reaches or
/// crosses the threshold the ban re-arms to a full window. A successful
/// login clears the record entirely, whatever its state. Bans are evaluated
/// lazily on the next `check` — there is no timer. In-memory only: a
/// restart clears all bans by design.
pub struct LoginThrottle {
    threshold: u32,
    lockout: Duration,
    records: Mutex<HashMap<String, ThrottleRecord>>,
}

impl Default for LoginThrottle {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginThrottle {
    pub fn new() -> Self {
        Self::with_policy(FAILURE_THRESHOLD, LOCKOUT)
    }

    /// Custom policy; tests use short lockouts.
    pub fn with_policy(threshold: u32, lockout: Duration) -> Self {
        Self {
            threshold,
            lockout,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, addr: &str) -> Decision {
        self.check_at(addr, Instant::now())
    }

    pub fn record_failure(&self, addr: &str) -> FailureOutcome {
        self.record_failure_at(addr, Instant::now())
    }

    /// Clear the record for `addr`; a later failure counts from 1 again.
    pub fn record_success(&self, addr: &str) {
        self.records
            .lock()
            .expect("throttle lock poisoned")
            .remove(addr);
    }

    fn check_at(&self, addr: &str, now: Instant) -> Decision {
        let records = self.records.lock().expect("throttle lock poisoned");
        if let Some(record) = records.get(addr) {
            if let Some(ban_until) = record.ban_until {
                if ban_until > now {
                    let remaining = ban_until.duration_since(now);
                    let mut secs = remaining.as_secs();
                    if remaining.subsec_nanos() > 0 {
                        secs += 1;
                    }
                    return Decision::Locked {
                        remaining_secs: secs,
                    };
                }
            }
        }
        Decision::Allowed
    }

    fn record_failure_at(&self, addr: &str, now: Instant) -> FailureOutcome {
        let mut records = self.records.lock().expect("throttle lock poisoned");
        let record = records.entry(addr.to_string()).or_insert(ThrottleRecord {
            fail_count: 0,
            ban_until: None,
        });

        record.fail_count += 1;

        if record.fail_count >= self.threshold {
            // Re-arms on every failure past the threshold; ban_until never
            // moves backwards because `now` only advances.
            record.ban_until = Some(now + self.lockout);
            FailureOutcome {
                banned: true,
                remaining_attempts: 0,
            }
        } else {
            FailureOutcome {
                banned: false,
                remaining_attempts: self.threshold - record.fail_count,
            }
        }
    }
}
