#![forbid(unsafe_code)]

//! Error taxonomy for status cells, the dependency graph, and status objects.

use thiserror::Error;

use crate::id::StatusId;

pub type Result<T> = std::result::Result<T, StatusError>;

/// A value was rejected at a status boundary.
///
/// Returned by validators installed on an [`Observable`](crate::Observable)
/// or a [`Stat`](crate::Stat). The rejected value is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value for {target}: {message}")]
pub struct ValidationError {
    target: String,
    message: String,
}

impl ValidationError {
    #[must_use]
    pub fn new(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Name of the status or stat that rejected the value.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("dependency cycle: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<StatusId> },

    #[error("{status} is already derived from other statuses")]
    AlreadyBound { status: StatusId },

    #[error("{id} is not defined or not initialized")]
    UnknownStat { id: String },

    #[error("{id} is required but not initialized")]
    Uninitialized { id: String },

    #[error("{id} holds a value of a different type (expected {expected})")]
    TypeMismatch { id: String, expected: &'static str },

    #[error("invalid ownership of stat {id} for schema {schema}")]
    ForeignStat { id: String, schema: String },

    #[error("{id} already has a validator")]
    ValidatorAlreadySet { id: String },

    #[error("stat {id} is declared more than once")]
    DuplicateStat { id: String },
}

impl StatusError {
    #[must_use]
    pub fn unknown(id: impl Into<String>) -> Self {
        Self::UnknownStat { id: id.into() }
    }

    #[must_use]
    pub fn type_mismatch<T>(id: impl Into<String>) -> Self {
        Self::TypeMismatch {
            id: id.into(),
            expected: std::any::type_name::<T>(),
        }
    }

    /// Whether the error came from a rejected value rather than from
    /// misuse of the API.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

fn format_cycle(cycle: &[StatusId]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
