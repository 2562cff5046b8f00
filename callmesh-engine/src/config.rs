use crate::error::CallError;
use std::time::Duration;

pub const DEFAULT_RING_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_INVITE_ATTEMPTS: u32 = 3;
pub const DEFAULT_INVITE_RETRY_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace added on top of the invitation retry period when remembering rooms
/// whose invitation was already handled.
const INVITE_DEDUP_GRACE: Duration = Duration::from_secs(10);

/// Upper bound for every timer and interval, keeping deadline arithmetic on
/// `Instant` in range.
pub const MAX_TIMER: Duration = Duration::from_secs(24 * 60 * 60);

/// Timing and retry policy of the call engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long an outbound call rings before it is abandoned. Also bounds how
    /// long an unanswered incoming invitation is kept.
    pub ring_timeout: Duration,
    /// How long a session may sit in `Connecting` without any connected link.
    pub connect_timeout: Duration,
    /// Number of times each invitation is published.
    pub invite_attempts: u32,
    pub invite_retry_interval: Duration,
    /// How long a handled invitation's room id is remembered for deduplication.
    pub invite_dedup_window: Duration,
    /// Bounded wait for a relay subscription to report ready.
    pub subscribe_timeout: Duration,
    pub housekeeping_interval: Duration,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_timeout: DEFAULT_RING_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            invite_attempts: DEFAULT_INVITE_ATTEMPTS,
            invite_retry_interval: DEFAULT_INVITE_RETRY_INTERVAL,
            invite_dedup_window: DEFAULT_INVITE_RETRY_INTERVAL * DEFAULT_INVITE_ATTEMPTS
                + INVITE_DEDUP_GRACE,
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
            housekeeping_interval: Duration::from_secs(1),
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the invitation retry policy and stretches the dedup window so it
    /// always covers the whole retry period.
    pub fn with_invite_retries(mut self, attempts: u32, interval: Duration) -> Self {
        self.invite_attempts = attempts;
        self.invite_retry_interval = interval;
        self.invite_dedup_window = self.invite_dedup_window.max(self.invite_retry_period());
        self
    }

    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    /// Time between the first and the last transmission of one invitation.
    pub fn invite_retry_period(&self) -> Duration {
        self.invite_retry_interval
            .saturating_mul(self.invite_attempts.saturating_sub(1))
    }

    pub fn validate(&self) -> Result<(), CallError> {
        if self.invite_attempts == 0 {
            return Err(CallError::InvalidArgument(
                "invite_attempts must be at least 1".into(),
            ));
        }
        if self.ring_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(CallError::InvalidArgument(
                "ring and connect timeouts must be non-zero".into(),
            ));
        }
        if self.subscribe_timeout.is_zero() || self.housekeeping_interval.is_zero() {
            return Err(CallError::InvalidArgument(
                "subscribe timeout and housekeeping interval must be non-zero".into(),
            ));
        }
        let timers = [
            ("ring_timeout", self.ring_timeout),
            ("connect_timeout", self.connect_timeout),
            ("invite_retry_interval", self.invite_retry_interval),
            ("invite_dedup_window", self.invite_dedup_window),
            ("subscribe_timeout", self.subscribe_timeout),
            ("housekeeping_interval", self.housekeeping_interval),
        ];
        if let Some((name, value)) = timers.iter().find(|(_, value)| *value > MAX_TIMER) {
            return Err(CallError::InvalidArgument(format!(
                "{name} ({value:?}) exceeds the {MAX_TIMER:?} limit"
            )));
        }
        if self.invite_retry_period() > MAX_TIMER {
            return Err(CallError::InvalidArgument(format!(
                "invitation retry period ({:?}) exceeds the {MAX_TIMER:?} limit",
                self.invite_retry_period()
            )));
        }
        if self.invite_dedup_window < self.invite_retry_period() {
            return Err(CallError::InvalidArgument(format!(
                "invite_dedup_window ({:?}) is shorter than the invitation retry period ({:?})",
                self.invite_dedup_window,
                self.invite_retry_period()
            )));
        }
        if self.event_capacity == 0 {
            return Err(CallError::InvalidArgument(
                "event_capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
