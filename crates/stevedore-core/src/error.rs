// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for stevedore-core.
//!
//! Every service, the resolver and the puller report failures through [`Error`].
//! Callers classify errors with [`Error::is_not_found`], [`Error::is_already_exists`]
//! and [`Error::is_transient`] rather than matching on variants, because errors are
//! wrapped with context as they travel up the stack.

use thiserror::Error;

use crate::locator::Locator;

/// Result type using the stevedore-core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by package, application and replication operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The referenced package, application or repository does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// What was looked up ("package", "application", "repository").
        kind: &'static str,
        /// Identifier of the missing object.
        id: String,
    },

    /// The destination already holds the object and overwriting was not requested.
    #[error("{kind} {id} already exists")]
    AlreadyExists {
        /// What was written ("package", "application").
        kind: &'static str,
        /// Identifier of the existing object.
        id: String,
    },

    /// The request is malformed.
    #[error("Invalid parameter: {0}")]
    BadParameter(String),

    /// An application depends on itself, directly or through other applications.
    #[error("Dependency cycle detected: {0} depends on itself")]
    DependencyCycle(Locator),

    /// The backing service could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The operation did not finish within its time budget.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// A transient failure persisted until the retry budget was exhausted.
    #[error("Giving up after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last transient failure.
        #[source]
        source: Box<Error>,
    },

    /// An error annotated with the operation it interrupted.
    #[error("{context}: {source}")]
    Context {
        /// Operation description, usually naming a locator.
        context: String,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Package lookup failure.
    pub fn package_not_found(locator: &Locator) -> Self {
        Error::NotFound {
            kind: "package",
            id: locator.to_string(),
        }
    }

    /// Application lookup failure.
    pub fn app_not_found(locator: &Locator) -> Self {
        Error::NotFound {
            kind: "application",
            id: locator.to_string(),
        }
    }

    /// Package write conflict.
    pub fn package_exists(locator: &Locator) -> Self {
        Error::AlreadyExists {
            kind: "package",
            id: locator.to_string(),
        }
    }

    /// Application write conflict.
    pub fn app_exists(locator: &Locator) -> Self {
        Error::AlreadyExists {
            kind: "application",
            id: locator.to_string(),
        }
    }

    /// Wrap this error with a description of the operation that failed.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through context wrappers.
    ///
    /// `RetryExhausted` is not unwrapped: once retries are spent the failure is terminal.
    pub fn root(&self) -> &Error {
        let mut current = self;
        while let Error::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// Whether the error reports a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::NotFound { .. })
    }

    /// Whether the error reports a write conflict.
    pub fn is_already_exists(&self) -> bool {
        matches!(self.root(), Error::AlreadyExists { .. })
    }

    /// Whether the error reports a malformed request.
    pub fn is_bad_parameter(&self) -> bool {
        matches!(
            self.root(),
            Error::BadParameter(_) | Error::DependencyCycle(_)
        )
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self.root() {
            Error::Connection(_) => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Stable code for the error class, used in logs and progress messages.
    pub fn error_code(&self) -> &'static str {
        match self.root() {
            Error::NotFound { .. } => "NOT_FOUND",
            Error::AlreadyExists { .. } => "ALREADY_EXISTS",
            Error::BadParameter(_) | Error::DependencyCycle(_) => "BAD_PARAMETER",
            Error::Connection(_) => "CONNECTION",
            Error::Timeout(_) => "TIMEOUT",
            Error::Cancelled => "CANCELLED",
            Error::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Error::Io(_) => "IO",
            Error::Json(_) => "JSON",
            Error::Context { .. } | Error::Other(_) => "INTERNAL",
        }
    }
}
