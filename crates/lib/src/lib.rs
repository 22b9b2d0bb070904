//!
//! vaultsync: end-to-end encrypted, versioned containers synchronized through a
//! server that only ever sees ciphertext.
//!
//! The crate holds both halves of the system.
//!
//! ## Client side
//!
//! * **Containers (`container::Container`)**: named key-value stores with a local
//!   version history. Every save is a reversible [`diff::Diff`] against the
//!   previous version, encrypted with the container's session key and signed with
//!   the account key before it leaves the process.
//! * **Sessions (`session::Session`)**: the explicit client context. A session
//!   owns the unlocked [`account::Account`], the [`connection::Connection`] used to
//!   reach the server, a [`Clock`], and the registry of container watchers.
//! * **Connections (`connection::Connection`)**: the transport seam. An
//!   in-process implementation talks to a [`server::Server`] directly; the HTTP
//!   implementation talks to the `vaultsync` binary.
//!
//! ## Server side
//!
//! * **Backends (`backend::Backend`)**: relational storage for accounts,
//!   transactions, records, session-key envelopes and messages.
//! * **Transaction log (`transaction::TransactionLog`)**: staging area for typed
//!   chunks until the client requests a commit.
//! * **Commit coordinator (`commit::CommitCoordinator`)**: background sweep that
//!   claims requested transactions and applies each one inside a single atomic
//!   storage unit.
//! * **Account authentication (`auth::AccountAuth`)**: challenge-response login
//!   where only a slow hash of a password-derived key is ever stored.

pub mod account;
pub mod auth;
pub mod backend;
pub mod clock;
pub mod commit;
pub mod config;
pub mod connection;
pub mod container;
pub mod crypto;
pub mod diff;
pub mod notify;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transaction;

pub use clock::{Clock, SystemClock};
pub use config::Config;

#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;

/// Result type used throughout the vaultsync library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the vaultsync library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured errors from the diff engine
    #[error(transparent)]
    Diff(diff::DiffError),

    /// Structured errors from container operations
    #[error(transparent)]
    Container(container::ContainerError),

    /// Structured errors from the crypto primitives
    #[error(transparent)]
    Crypto(crypto::CryptoError),

    /// Structured errors from transaction staging and commit
    #[error(transparent)]
    Transaction(transaction::TransactionError),

    /// Structured errors from the storage backend
    #[error(transparent)]
    Backend(backend::BackendError),

    /// Structured errors from account authentication
    #[error(transparent)]
    Auth(auth::AuthError),

    /// Structured errors from the client transport
    #[error(transparent)]
    Connection(connection::ConnectionError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Diff(_) => "diff",
            Error::Container(_) => "container",
            Error::Crypto(_) => "crypto",
            Error::Transaction(_) => "transaction",
            Error::Backend(_) => "backend",
            Error::Auth(_) => "auth",
            Error::Connection(_) => "connection",
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Container(err) => err.is_not_found(),
            Error::Transaction(err) => err.is_not_found(),
            Error::Backend(err) => err.is_not_found(),
            Error::Connection(err) => err.kind() == Some(ErrorKind::NotFound),
            _ => false,
        }
    }

    /// Check if this error is a rejected or malformed input.
    pub fn is_validation_error(&self) -> bool {
        match self {
            Error::Container(err) => err.is_validation_error(),
            Error::Transaction(err) => err.is_validation_error(),
            Error::Auth(err) => err.is_validation_error(),
            Error::Connection(err) => err.kind() == Some(ErrorKind::Validation),
            Error::Serialize(_) => true,
            _ => false,
        }
    }

    /// Check if this error is a storage constraint violation, such as a
    /// duplicate name or a non-increasing record index.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Error::Backend(err) => err.is_constraint_violation(),
            Error::Transaction(err) => err.is_constraint_violation(),
            Error::Connection(err) => err.kind() == Some(ErrorKind::Constraint),
            _ => false,
        }
    }

    /// Check if an authenticated caller tried to act on something it does not own.
    pub fn is_authorization_error(&self) -> bool {
        match self {
            Error::Transaction(err) => err.is_authorization_error(),
            Error::Connection(err) => err.kind() == Some(ErrorKind::Authorization),
            _ => false,
        }
    }

    /// Check if this error is a failed login or an invalid session.
    pub fn is_authentication_error(&self) -> bool {
        match self {
            Error::Auth(err) => err.is_authentication_error(),
            Error::Connection(err) => err.kind() == Some(ErrorKind::Authentication),
            _ => false,
        }
    }

    /// Check if replay stopped because records arrived out of order.
    pub fn is_ordering_error(&self) -> bool {
        match self {
            Error::Container(err) => err.is_ordering_error(),
            _ => false,
        }
    }

    /// Check if this error is database/backend-related.
    pub fn is_database_error(&self) -> bool {
        match self {
            Error::Backend(err) => err.is_database_error(),
            Error::Connection(err) => err.kind() == Some(ErrorKind::Database),
            _ => false,
        }
    }

    /// Check if this error is a cryptographic failure.
    pub fn is_crypto_error(&self) -> bool {
        matches!(self, Error::Crypto(_))
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// Check if the failed operation may succeed when simply tried again.
    ///
    /// Deterministic failures (constraints, authorization, validation) are never
    /// retryable; storage and transport failures are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Backend(err) => err.is_database_error(),
            Error::Connection(err) => err.is_transport_error(),
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Coarse classification used on the wire.
    pub fn kind(&self) -> ErrorKind {
        if self.is_not_found() {
            ErrorKind::NotFound
        } else if self.is_authentication_error() {
            ErrorKind::Authentication
        } else if self.is_authorization_error() {
            ErrorKind::Authorization
        } else if self.is_constraint_violation() {
            ErrorKind::Constraint
        } else if self.is_validation_error() {
            ErrorKind::Validation
        } else if self.is_database_error() {
            ErrorKind::Database
        } else {
            ErrorKind::Internal
        }
    }
}

/// Error classes that survive a trip over the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Authentication,
    Authorization,
    Constraint,
    Database,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Constraint => "constraint",
            ErrorKind::Database => "database",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_found" => Some(ErrorKind::NotFound),
            "validation" => Some(ErrorKind::Validation),
            "authentication" => Some(ErrorKind::Authentication),
            "authorization" => Some(ErrorKind::Authorization),
            "constraint" => Some(ErrorKind::Constraint),
            "database" => Some(ErrorKind::Database),
            "internal" => Some(ErrorKind::Internal),
            _ => None,
        }
    }
}
