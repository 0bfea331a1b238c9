use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Lifecycle status of a submitted URL, persisted by the repository.
///
/// The core is the only writer of `Running`, `Done`, `Error`, and `Stopped`
/// once a task has been enqueued; an external stop request writes `Stopped`
/// directly through the repository, bypassing the worker entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Queued,
    Running,
    Done,
    Error,
    Stopped,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Running => "running",
            Status::Done => "done",
            Status::Error => "error",
            Status::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Done | Status::Error | Status::Stopped)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Status::Queued),
            "running" => Ok(Status::Running),
            "done" => Ok(Status::Done),
            "error" => Ok(Status::Error),
            "stopped" => Ok(Status::Stopped),
            other => Err(format!("{other} is not a valid status")),
        }
    }
}

/// The subset of the URL record the core needs to drive the worker state
/// machine. The repository owns the rest of the row (owner, timestamps, ...).
#[derive(Debug, Clone)]
pub struct UrlRecord {
    pub id: i64,
    pub original_url: String,
    pub status: Status,
}

/// One parsed-and-checked snapshot of a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub html_version: String,
    pub title: String,
    pub h1_count: i32,
    pub h2_count: i32,
    pub h3_count: i32,
    pub h4_count: i32,
    pub h5_count: i32,
    pub h6_count: i32,
    pub has_login_form: bool,
    pub internal_link_count: i32,
    pub external_link_count: i32,
    pub broken_link_count: i32,
}

/// A single link discovered while analyzing a page.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub href: String,
    pub is_external: bool,
    /// 0 means "never checked or transport error", not a broken link.
    pub status_code: u16,
}

impl Link {
    pub fn is_broken(&self) -> bool {
        (400..600).contains(&self.status_code)
    }
}
