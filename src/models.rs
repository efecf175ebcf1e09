use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// One rung of the escalation ladder, ordered from cheapest to most invasive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryLevel {
    /// Ask the supplicant to rejoin the current access point.
    Reassociate,
    /// Bounce the interface and have the supplicant reload its configuration.
    LinkReset,
    /// Restart the supplicant and DHCP services, then start the ladder over.
    FullRestart,
}

impl RecoveryLevel {
    /// Maps a consecutive-failure count to the action it triggers.
    ///
    /// Every count has an explicit arm. A new rung must be added here rather
    /// than falling through to `FullRestart`.
    pub fn for_failures(failures: u32) -> Option<Self> {
        match failures {
            0 => None,
            1 => Some(Self::Reassociate),
            2 => Some(Self::LinkReset),
            3.. => Some(Self::FullRestart),
        }
    }

    pub fn rung(self) -> u8 {
        match self {
            Self::Reassociate => 1,
            Self::LinkReset => 2,
            Self::FullRestart => 3,
        }
    }

    /// Whether the failure counter is forced back to zero after this action runs.
    pub fn resets_counter(self) -> bool {
        matches!(self, Self::FullRestart)
    }
}

impl fmt::Display for RecoveryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reassociate => write!(f, "reassociate"),
            Self::LinkReset => write!(f, "interface bounce + reconfigure"),
            Self::FullRestart => write!(f, "service restart"),
        }
    }
}

/// In-memory loop state. Nothing here outlives the process.
#[derive(Debug, Clone)]
pub struct WatchdogState {
    pub consecutive_failures: u32,
    pub interface: String,
    pub probe_interval: Duration,
    /// First failed probe of the current outage, cleared on success.
    pub outage_started: Option<DateTime<Utc>>,
}

impl WatchdogState {
    pub fn new(interface: impl Into<String>, probe_interval: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            interface: interface.into(),
            probe_interval,
            outage_started: None,
        }
    }

    /// Counts a failed probe and returns the new running count.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.outage_started.get_or_insert(now);
        self.consecutive_failures
    }

    /// Clears the outage and returns how long it lasted, if one was open.
    pub fn record_success(&mut self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.consecutive_failures = 0;
        self.outage_started.take().map(|started| now - started)
    }
}

/// What a single tick observed and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub target: String,
    pub reachable: bool,
    /// Counter value after the tick finished, including any forced reset.
    pub failures: u32,
    pub action: Option<RecoveryLevel>,
}
