use crate::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a workflow
///
/// String labels (`"RUNNING"`), the associated constants and the enum
/// variants all denote the same four states; labels are normalized at the
/// boundary through [`FromStr`] and compared through `PartialEq<str>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Running,
    Successful,
    Failed,
    Canceled,
}

impl WorkflowStatus {
    pub const RUNNING: WorkflowStatus = WorkflowStatus::Running;
    pub const SUCCESSFUL: WorkflowStatus = WorkflowStatus::Successful;
    pub const FAILED: WorkflowStatus = WorkflowStatus::Failed;
    pub const CANCELED: WorkflowStatus = WorkflowStatus::Canceled;

    /// Every status, in declaration order
    pub const ALL: [WorkflowStatus; 4] = [
        WorkflowStatus::Running,
        WorkflowStatus::Successful,
        WorkflowStatus::Failed,
        WorkflowStatus::Canceled,
    ];

    /// Canonical label, as persisted and displayed
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Running => "RUNNING",
            WorkflowStatus::Successful => "SUCCESSFUL",
            WorkflowStatus::Failed => "FAILED",
            WorkflowStatus::Canceled => "CANCELED",
        }
    }

    /// Terminal for the current execution attempt
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowStatus::Running)
    }

    /// Whether `resume` may move this status back to RUNNING
    pub fn is_resumable(&self) -> bool {
        matches!(self, WorkflowStatus::Failed | WorkflowStatus::Canceled)
    }

    /// The transition table of the lifecycle state machine.
    ///
    /// RUNNING -> RUNNING is only legal when recovering a record that was left
    /// RUNNING by a previous process.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Running, Successful)
                | (Running, Failed)
                | (Running, Canceled)
                | (Running, Running)
                | (Failed, Running)
                | (Canceled, Running)
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim();
        WorkflowStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(label))
            .ok_or_else(|| EngineError::InvalidStatus(s.to_string()))
    }
}

impl PartialEq<str> for WorkflowStatus {
    fn eq(&self, other: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(other.trim())
    }
}

impl PartialEq<&str> for WorkflowStatus {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

impl PartialEq<WorkflowStatus> for str {
    fn eq(&self, other: &WorkflowStatus) -> bool {
        other == self
    }
}

impl PartialEq<WorkflowStatus> for &str {
    fn eq(&self, other: &WorkflowStatus) -> bool {
        other == *self
    }
}

/// Set of statuses used to filter listings.
///
/// An empty filter matches every status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusFilter {
    statuses: BTreeSet<WorkflowStatus>,
}

impl StatusFilter {
    /// Filter matching every workflow
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only(status: WorkflowStatus) -> Self {
        Self::from(status)
    }

    pub fn with(mut self, status: WorkflowStatus) -> Self {
        self.statuses.insert(status);
        self
    }

    pub fn matches(&self, status: WorkflowStatus) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&status)
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Parse labels such as `["failed", "CANCELED"]`
    pub fn parse<I, S>(labels: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        labels
            .into_iter()
            .map(|label| label.as_ref().parse::<WorkflowStatus>())
            .collect()
    }
}

impl From<WorkflowStatus> for StatusFilter {
    fn from(status: WorkflowStatus) -> Self {
        Self::default().with(status)
    }
}

impl From<Option<WorkflowStatus>> for StatusFilter {
    fn from(status: Option<WorkflowStatus>) -> Self {
        status.map(Self::from).unwrap_or_default()
    }
}

impl<const N: usize> From<[WorkflowStatus; N]> for StatusFilter {
    fn from(statuses: [WorkflowStatus; N]) -> Self {
        statuses.into_iter().collect()
    }
}

impl From<&[WorkflowStatus]> for StatusFilter {
    fn from(statuses: &[WorkflowStatus]) -> Self {
        statuses.iter().copied().collect()
    }
}

impl From<Vec<WorkflowStatus>> for StatusFilter {
    fn from(statuses: Vec<WorkflowStatus>) -> Self {
        statuses.into_iter().collect()
    }
}

impl From<std::collections::HashSet<WorkflowStatus>> for StatusFilter {
    fn from(statuses: std::collections::HashSet<WorkflowStatus>) -> Self {
        statuses.into_iter().collect()
    }
}

impl TryFrom<&str> for StatusFilter {
    type Error = EngineError;

    fn try_from(label: &str) -> Result<Self, Self::Error> {
        label.parse::<WorkflowStatus>().map(Self::from)
    }
}

impl TryFrom<&[&str]> for StatusFilter {
    type Error = EngineError;

    fn try_from(labels: &[&str]) -> Result<Self, Self::Error> {
        Self::parse(labels)
    }
}

impl<const N: usize> TryFrom<[&str; N]> for StatusFilter {
    type Error = EngineError;

    fn try_from(labels: [&str; N]) -> Result<Self, Self::Error> {
        Self::parse(labels)
    }
}

impl FromIterator<WorkflowStatus> for StatusFilter {
    fn from_iter<T: IntoIterator<Item = WorkflowStatus>>(iter: T) -> Self {
        Self {
            statuses: iter.into_iter().collect(),
        }
    }
}
