// Error taxonomy shared by every analysis component
use crate::domain::{SegmentId, SensorId, TestId};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("backend returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("could not decode backend response: {0}")]
    Decode(String),
    #[error("{0}")]
    Validation(String),
    #[error("export job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },
    #[error("{0}")]
    Conflict(String),
    #[error("sensor {0} is not part of this test")]
    UnknownSensor(SensorId),
    #[error("segment {0} not found")]
    UnknownSegment(SegmentId),
    #[error("no analysis session open for test {0}")]
    SessionNotFound(TestId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Validation,
    Job,
    Conflict,
    NotFound,
}

impl AnalysisError {
    pub fn validation(message: impl Into<String>) -> Self {
        AnalysisError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        AnalysisError::Conflict(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::Transport { .. }
            | AnalysisError::Server { .. }
            | AnalysisError::Decode(_) => ErrorKind::Transport,
            AnalysisError::Validation(_) => ErrorKind::Validation,
            AnalysisError::JobFailed { .. } => ErrorKind::Job,
            AnalysisError::Conflict(_) => ErrorKind::Conflict,
            AnalysisError::UnknownSensor(_)
            | AnalysisError::UnknownSegment(_)
            | AnalysisError::SessionNotFound(_) => ErrorKind::NotFound,
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
