//! Office-wide configuration.

use core::time::Duration;

/// Default timeout for asynchronous operations.
pub const DEFAULT_ASYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between asynchronous timeout sweeps.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(100);

/// Settings shared by every function of an office.
///
/// # Example
///
/// ```
/// use cadre_core::config::OfficeConfig;
/// use std::time::Duration;
///
/// let config = OfficeConfig::new()
///     .with_default_async_timeout(Duration::from_secs(2))
///     .with_max_team_assignment_attempts(5);
///
/// assert_eq!(config.default_async_timeout(), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct OfficeConfig {
    default_async_timeout: Duration,
    manual_governance: bool,
    max_team_assignment_attempts: Option<usize>,
    monitor_interval: Duration,
}

impl Default for OfficeConfig {
    fn default() -> Self {
        Self {
            default_async_timeout: DEFAULT_ASYNC_TIMEOUT,
            manual_governance: false,
            max_team_assignment_attempts: None,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
        }
    }
}

impl OfficeConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout applied to functions that do not set their own.
    #[must_use]
    pub fn with_default_async_timeout(mut self, timeout: Duration) -> Self {
        self.default_async_timeout = timeout;
        self
    }

    /// Declares that governance is activated and deactivated by user code.
    ///
    /// Functions may then not configure governance themselves.
    #[must_use]
    pub fn with_manual_governance(mut self, manual: bool) -> Self {
        self.manual_governance = manual;
        self
    }

    /// Escalates [`ExecutionError::TeamOverloaded`] once a job has been
    /// rejected `attempts` times.
    ///
    /// Without a limit a rejected job waits until its team has capacity.
    /// Values below one are treated as one.
    ///
    /// [`ExecutionError::TeamOverloaded`]: crate::escalation::ExecutionError::TeamOverloaded
    #[must_use]
    pub fn with_max_team_assignment_attempts(mut self, attempts: usize) -> Self {
        self.max_team_assignment_attempts = Some(attempts.max(1));
        self
    }

    /// Sets the interval of the asynchronous timeout monitor.
    #[must_use]
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// The default asynchronous operation timeout.
    #[must_use]
    pub fn default_async_timeout(&self) -> Duration {
        self.default_async_timeout
    }

    /// Whether governance is manually managed.
    #[must_use]
    pub fn manual_governance(&self) -> bool {
        self.manual_governance
    }

    /// Maximum team assignment attempts, if overload escalates at all.
    #[must_use]
    pub fn max_team_assignment_attempts(&self) -> Option<usize> {
        self.max_team_assignment_attempts
    }

    /// Interval of the timeout monitor.
    #[must_use]
    pub fn monitor_interval(&self) -> Duration {
        self.monitor_interval
    }
}
