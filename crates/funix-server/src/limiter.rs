//! Sliding-window rate limiting keyed by caller subject.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use funix_schema::{LimitSource, RateLimit};
use parking_lot::Mutex;

use crate::error::BuildError;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock()
    }
}

/// Who is calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub address: String,
    pub session: String,
}

impl Subject {
    pub fn new(address: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            session: session.into(),
        }
    }

    fn key(&self, source: LimitSource) -> &str {
        match source {
            LimitSource::Ip => &self.address,
            LimitSource::Session => &self.session,
        }
    }
}

pub struct Limiter {
    limit: RateLimit,
    period: Duration,
    clock: Arc<dyn Clock>,
    queues: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl Limiter {
    /// Fails when the period is negative, NaN or too large for a [`Duration`].
    pub fn new(limit: RateLimit, clock: Arc<dyn Clock>) -> Result<Self, BuildError> {
        let period = Duration::try_from_secs_f64(limit.period)
            .map_err(|_| BuildError::InvalidPeriod(limit.period))?;
        Ok(Self {
            period,
            limit,
            clock,
            queues: Mutex::new(HashMap::new()),
        })
    }

    /// Number of subjects with calls still inside the window.
    pub fn tracked(&self) -> usize {
        self.queues.lock().len()
    }

    /// Record a call, or return how long the subject must wait.
    ///
    /// Timestamps older than the window are dropped before the new one is
    /// appended, along with subjects left with none. Rejected calls are not
    /// recorded.
    pub fn check(&self, subject: &Subject) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut queues = self.queues.lock();
        queues.retain(|_, queue| {
            while queue.front().is_some_and(|oldest| now.duration_since(*oldest) >= self.period) {
                queue.pop_front();
            }
            !queue.is_empty()
        });
        let queue = queues.entry(subject.key(self.limit.source).to_string()).or_default();

        if queue.len() >= self.limit.max_calls {
            let wait = match queue.front() {
                Some(oldest) => self.period.saturating_sub(now.duration_since(*oldest)),
                None => self.period,
            };
            return Err(wait);
        }
        queue.push_back(now);
        Ok(())
    }
}

/// Seconds to report for a wait, rounded up.
pub fn wait_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs();
    if wait.subsec_nanos() > 0 { secs + 1 } else { secs }
}
