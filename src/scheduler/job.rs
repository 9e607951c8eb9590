//! Job definitions for the scheduler.
//!
//! This module defines the core job types used by the worker:
//!
//! - `JobRequest`: the persisted job specification (`job.json`)
//! - `JobVariant`: the closed set of job kinds the dispatcher understands
//! - `Ticket`: the handle handed out by the queue
//! - `Status`: the ticket lifecycle shared with database params
//! - `JobOutcome`: terminal result of one dispatch

use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::ExecutionError;
use crate::notify::TemplateKind;

/// Opaque job identifier assigned by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Handle returned by the queue identifying one pending job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub id: JobId,
}

impl Ticket {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: JobId::new(id) }
    }
}

/// Lifecycle status of a ticket or of a database params sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Queued,
    Running,
    Complete,
    Error,
}

impl Status {
    /// Returns true for `complete` and `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Complete | Status::Error)
    }

    /// Returns whether `next` may follow `self`.
    ///
    /// Allowed edges are `queued -> running`, `queued -> error` (the job
    /// specification could not be decoded) and `running -> complete|error`.
    pub fn can_transition_to(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Queued, Status::Running)
                | (Status::Queued, Status::Error)
                | (Status::Running, Status::Complete)
                | (Status::Running, Status::Error)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Running => "running",
            Status::Complete => "complete",
            Status::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" | "pending" => Ok(Status::Queued),
            "running" => Ok(Status::Running),
            "complete" => Ok(Status::Complete),
            "error" => Ok(Status::Error),
            other => Err(format!("Unknown status: {}", other)),
        }
    }
}

/// Sequence search against one or more databases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchJob {
    #[serde(default)]
    pub database: Vec<String>,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub taxfilter: String,
}

/// Structure search against one or more databases.
///
/// `mode` is `<alignment>[-summary]`, where the alignment is one of
/// `3di`, `tmalign` or `3diaa`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureSearchJob {
    #[serde(default)]
    pub database: Vec<String>,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub taxfilter: String,
}

/// Multiple sequence alignment job. `mode` is a `-` separated flag string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsaJob {
    #[serde(default)]
    pub mode: String,
}

/// Paired alignment job (fixed pipeline).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairJob {
    #[serde(default)]
    pub mode: String,
}

/// Database validation/index job. `path` is relative to the database root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexJob {
    pub path: String,
}

/// The job kinds the dispatcher understands.
///
/// `Unrecognized` carries a tag that decoded as JSON but names no known
/// kind; dispatching it yields `JobOutcome::InvalidVariant`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobVariant {
    Search(SearchJob),
    StructureSearch(StructureSearchJob),
    Msa(MsaJob),
    Pair(PairJob),
    Index(IndexJob),
    Unrecognized {
        kind: String,
        payload: serde_json::Value,
    },
}

impl JobVariant {
    /// Returns the `type` tag used in the job specification.
    pub fn kind(&self) -> &str {
        match self {
            JobVariant::Search(_) => "search",
            JobVariant::StructureSearch(_) => "structuresearch",
            JobVariant::Msa(_) => "msa",
            JobVariant::Pair(_) => "pair",
            JobVariant::Index(_) => "index",
            JobVariant::Unrecognized { kind, .. } => kind,
        }
    }
}

/// On-disk shape of a job specification.
#[derive(Debug, Deserialize)]
struct RawJobRequest {
    id: JobId,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    job: serde_json::Value,
    #[serde(default)]
    email: Option<String>,
}

/// A job specification as read from `<results>/<id>/job.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawJobRequest")]
pub struct JobRequest {
    pub id: JobId,
    pub job: JobVariant,
    /// Notification address; empty strings are normalized to `None`.
    pub email: Option<String>,
}

impl JobRequest {
    pub fn new(id: impl Into<String>, job: JobVariant) -> Self {
        Self {
            id: JobId::new(id),
            job,
            email: None,
        }
    }

    /// Sets the notification address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        let email = email.into();
        self.email = if email.trim().is_empty() {
            None
        } else {
            Some(email)
        };
        self
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    payload: serde_json::Value,
) -> Result<T, serde_json::Error> {
    let payload = if payload.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        payload
    };
    serde_json::from_value(payload)
}

impl TryFrom<RawJobRequest> for JobRequest {
    type Error = serde_json::Error;

    fn try_from(raw: RawJobRequest) -> Result<Self, Self::Error> {
        let job = match raw.kind.as_str() {
            "search" => JobVariant::Search(decode_payload(raw.job)?),
            "structuresearch" => JobVariant::StructureSearch(decode_payload(raw.job)?),
            "msa" => JobVariant::Msa(decode_payload(raw.job)?),
            "pair" => JobVariant::Pair(decode_payload(raw.job)?),
            "index" => JobVariant::Index(decode_payload(raw.job)?),
            _ => JobVariant::Unrecognized {
                kind: raw.kind,
                payload: raw.job,
            },
        };

        Ok(Self {
            id: raw.id,
            job,
            email: raw.email.filter(|email| !email.trim().is_empty()),
        })
    }
}

impl Serialize for JobRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("JobRequest", 4)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("type", self.job.kind())?;
        match &self.job {
            JobVariant::Search(job) => state.serialize_field("job", job)?,
            JobVariant::StructureSearch(job) => state.serialize_field("job", job)?,
            JobVariant::Msa(job) => state.serialize_field("job", job)?,
            JobVariant::Pair(job) => state.serialize_field("job", job)?,
            JobVariant::Index(job) => state.serialize_field("job", job)?,
            JobVariant::Unrecognized { payload, .. } => state.serialize_field("job", payload)?,
        }
        state.serialize_field("email", &self.email)?;
        state.end()
    }
}

/// Terminal result of dispatching one job.
#[derive(Debug)]
pub enum JobOutcome {
    Success,
    ExecutionFailure(ExecutionError),
    TimeoutFailure,
    InvalidVariant,
}

impl JobOutcome {
    /// Ticket status recorded for this outcome.
    pub fn status(&self) -> Status {
        match self {
            JobOutcome::Success => Status::Complete,
            _ => Status::Error,
        }
    }

    /// Notification template selected for this outcome.
    pub fn template(&self) -> TemplateKind {
        match self {
            JobOutcome::Success => TemplateKind::Success,
            JobOutcome::TimeoutFailure => TemplateKind::Timeout,
            JobOutcome::ExecutionFailure(_) | JobOutcome::InvalidVariant => TemplateKind::Error,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success)
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Success => write!(f, "success"),
            JobOutcome::ExecutionFailure(e) => write!(f, "Execution Error: {}", e),
            JobOutcome::TimeoutFailure => write!(f, "Timeout"),
            JobOutcome::InvalidVariant => write!(f, "Invalid"),
        }
    }
}
