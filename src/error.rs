// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Error types shared by the engine modules.

use std::{any::Any, error::Error, io, sync::Arc};
use thiserror::Error;

/// Boxed error accepted from job bodies.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Failure of a job scheduled on the orchestrator.
///
/// Cloneable so the same failure can be handed to the exception sink and to
/// the job's completion handle.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The job was removed before it started, or a state transition found the
    /// engine in a different state than expected. Never reported to the
    /// exception sink.
    #[error("job cancelled")]
    Cancelled,

    /// The job panicked, either while being called or while its future was
    /// polled.
    #[error("job panicked: {0}")]
    Panicked(String),

    /// The job returned an error.
    #[error("{0}")]
    Failed(Arc<dyn Error + Send + Sync>),
}

impl JobError {
    /// Wraps any error (or message) as a job failure.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        JobError::Failed(Arc::from(err.into()))
    }

    pub(crate) fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        JobError::Panicked(msg)
    }

    /// True for [`JobError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }
}

impl From<BoxError> for JobError {
    fn from(err: BoxError) -> Self {
        JobError::Failed(Arc::from(err))
    }
}

impl From<io::Error> for JobError {
    fn from(err: io::Error) -> Self {
        JobError::Failed(Arc::new(err))
    }
}

/// Invalid input to the rotation offset calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OffsetError {
    /// Angles must be one of 0, 90, 180 or 270 degrees.
    #[error("angle {0} is not one of 0, 90, 180, 270")]
    NotCardinal(u32),
}

/// Misuse of the frame manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// `get_frame` was called before `set_up` or after `release`.
    #[error("frame manager is not set up")]
    NotSetUp,

    /// Buffer queue access on a manager that dispatches buffers to a callback.
    #[error("buffer queue is only available when no buffer callback was supplied")]
    WrongBufferMode,
}

/// Malformed capabilities description.
#[derive(Debug, Error)]
pub enum CapabilitiesError {
    #[error("capabilities must be a JSON object")]
    NotAnObject,

    #[error("unknown value {value:?} for {key}")]
    UnknownValue { key: &'static str, value: String },

    #[error("{key} must be {expected}")]
    WrongType {
        key: &'static str,
        expected: &'static str,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
