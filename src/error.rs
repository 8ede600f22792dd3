//! Error types.
//!
//! Transient transport and storage failures are reported on the per-uid
//! error stream and never tear a pipeline down. Configuration problems
//! are fatal at binding time.

use crate::messages::WrongCase;

/// A transport operation failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The target uid has no registered channel.
    #[error("unknown participant: {uid}")]
    UnknownParticipant {
        /// The uid the send was addressed to.
        uid: String,
    },
    /// The underlying channel or connection rejected the send.
    #[error("send failed: {reason}")]
    SendFailed {
        /// Transport-specific failure description.
        reason: String,
    },
}

/// A stable-storage operation failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("storage {op} failed for {uid}: {reason}")]
pub struct StorageError {
    /// The operation that failed (`"read"` or `"write"`).
    pub op: &'static str,
    /// The acceptor whose slot was involved.
    pub uid: String,
    /// Storage-specific failure description.
    pub reason: String,
}

impl StorageError {
    /// A failed read of an acceptor's persisted slot.
    #[must_use]
    pub fn read(uid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            op: "read",
            uid: uid.into(),
            reason: reason.into(),
        }
    }

    /// A failed write of an acceptor's persisted slot.
    #[must_use]
    pub fn write(uid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            op: "write",
            uid: uid.into(),
            reason: reason.into(),
        }
    }
}

/// Declaring the final value failed. Not retried; idempotence is the
/// external API's responsibility.
#[derive(Debug, Clone, thiserror::Error)]
#[error("declare final value failed: {reason}")]
pub struct DeclareError {
    /// API-specific failure description.
    pub reason: String,
}

/// `setup_bindings` refused to start the node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
    /// The quorum must contain at least one acceptor.
    #[error("quorum size must be at least 1")]
    EmptyQuorum,
    /// A zero batch window would close every group immediately.
    #[error("take cutoff must be non-zero")]
    ZeroCutoff,
    /// The majority override must be satisfiable by the quorum.
    #[error("majority override {majority} exceeds quorum size {quorum_size}")]
    MajorityOverQuorum {
        /// The configured override.
        majority: usize,
        /// The configured quorum size.
        quorum_size: usize,
    },
    /// Bindings were already set up; a node wires its streams once.
    #[error("bindings already set up")]
    AlreadyBound,
}

/// An error carried on a node's per-uid error stream.
///
/// Every pipeline stage converts its own I/O failures into one of
/// these and keeps running; a dropped broadcast is equivalent to a
/// network partition and another round recovers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    /// A send or broadcast failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A persisted slot could not be read or written.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A message payload did not match its declared case.
    #[error(transparent)]
    Shape(#[from] WrongCase),
    /// The terminal declare side effect reported failure.
    #[error(transparent)]
    Declare(#[from] DeclareError),
}
