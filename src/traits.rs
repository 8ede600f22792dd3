//! Collaborator contracts.
//!
//! The library is transport- and storage-agnostic: a node only talks
//! to these three seams. [`crate::registry::ParticipantRegistry`] and
//! [`crate::registry::MemoryStore`] provide in-process implementations.

use core::fmt;

use async_trait::async_trait;
use futures::Stream;

use crate::error::{DeclareError, PipelineError, StorageError, TransportError};
use crate::messages::{Message, Uid};
use crate::suggestion::{LastAccepted, SuggestionId};

/// Message plumbing between participants.
///
/// `incoming` must be hot and multicast: every call returns a fresh
/// subscription to the same inbound feed, and messages delivered while
/// nobody polls a given subscription may be dropped for that
/// subscription only.
#[async_trait]
pub trait Transport<V>: Clone + Send + Sync + 'static {
    /// The inbound subscription stream type.
    type Incoming: Stream<Item = Message<V>> + Send + Unpin + 'static;

    /// Subscribe to messages addressed to (or broadcast at) `uid`.
    fn incoming(&self, uid: &str) -> Self::Incoming;

    /// Send one message to one participant.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the target is unknown or the send
    /// is rejected. Callers treat this as transient.
    async fn send(&self, target: &str, msg: Message<V>) -> Result<(), TransportError>;

    /// Fan a message out to every registered participant.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the fan-out could not start. A
    /// partial delivery is not an error; it is indistinguishable from
    /// a partition.
    async fn broadcast(&self, msg: Message<V>) -> Result<(), TransportError>;

    /// Report a pipeline error on `uid`'s error channel.
    async fn report_error(&self, uid: &str, err: PipelineError);
}

/// Durable per-acceptor storage: two key/value slots per uid.
///
/// Implementations MUST make writes durable before returning success
/// and reload the slots on restart; both handlers of the acceptor
/// persist before they emit.
#[async_trait]
pub trait StableStore<V>: Send + Sync + 'static {
    /// Read the highest sid this acceptor has granted permission to.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on read failure.
    async fn last_granted(&self, uid: &str) -> Result<Option<SuggestionId>, StorageError>;

    /// Persist the highest granted sid.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on write failure.
    async fn store_last_granted(&self, uid: &str, sid: SuggestionId)
    -> Result<(), StorageError>;

    /// Read the most recently accepted `(sid, value)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on read failure.
    async fn last_accepted(&self, uid: &str) -> Result<Option<LastAccepted<V>>, StorageError>;

    /// Persist the most recently accepted `(sid, value)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on write failure.
    async fn store_last_accepted(
        &self,
        uid: &str,
        data: LastAccepted<V>,
    ) -> Result<(), StorageError>;
}

/// The value-facing half of the node contract.
///
/// Supplies free values to proposers, equality witnessing to learners,
/// and receives the one terminal side effect.
#[async_trait]
pub trait ValueApi: Send + Sync + 'static {
    /// The value type under agreement.
    type Value: Clone + fmt::Debug + Send + Sync + 'static;

    /// A fresh value for `uid` to propose when no prior value binds it.
    fn first_value(&self, uid: &Uid) -> Self::Value;

    /// Equality witness used by learners to group acceptances.
    ///
    /// Must satisfy `a == b ⇒ stringify(a) == stringify(b)`, and
    /// distinct values must not collide — a collision here is a
    /// safety hazard.
    fn stringify(&self, value: &Self::Value) -> String;

    /// The terminal side effect: a learner declares `value` final.
    ///
    /// Invoked at most once per learner. On failure the error is
    /// logged and the call is NOT retried.
    ///
    /// # Errors
    ///
    /// Returns [`DeclareError`] if the declaration could not be
    /// recorded.
    async fn declare_final(&self, value: Self::Value) -> Result<(), DeclareError>;

    /// The number of agreeing acceptors needed to choose or promise.
    #[must_use]
    fn majority(&self, quorum_size: usize) -> usize {
        quorum_size / 2 + 1
    }
}
