//! Single-decree (classical) Paxos.
//!
//! This library provides the agreement state machines for the three
//! Paxos roles and the reactive pipeline that glues them into a
//! [`Node`] participating in one instance:
//!
//! - **Proposer**: drives permission rounds, batches grants per round
//!   inside a bounded window, picks the value under the
//!   highest-previously-accepted rule, and advances its proposal
//!   number monotonically when nacked
//! - **Acceptor**: enforces the grant/accept ordering invariants over
//!   two persisted slots, `last_granted` and `last_accepted`
//! - **Learner**: declares a value final exactly once when a majority
//!   of acceptances agree on one `(sid, value)` pair
//!
//! The agreed value is generic; nodes compare values only through a
//! user-supplied stringifier. Transport and stable storage are
//! collaborator contracts ([`Transport`], [`StableStore`]) with
//! in-process implementations in [`registry`].
//!
//! Only **safety** is guaranteed. Classical Paxos provides no
//! liveness: under adversarial timing the system may livelock, which
//! is why every per-round wait is bounded and retries go through a
//! [`RetryCoordinator`].
//!
//! # Quick start
//!
//! ```ignore
//! use classic_paxos::{Node, NodeConfig, ParticipantRegistry, MemoryStore, NoopRetry};
//!
//! let registry = ParticipantRegistry::new();
//! registry.register(&uid);
//! let mut node = Node::new(uid, NodeConfig::default(), registry.clone(),
//!     MemoryStore::new(), my_value_api, NoopRetry);
//! node.setup_bindings()?;
//! // the node self-elects after the configured silence, or:
//! node.commence_decision_process();
//! ```

#![warn(clippy::pedantic)]

pub mod acceptor;
mod batch;
pub mod config;
pub mod error;
pub mod learner;
pub mod messages;
pub mod node;
pub mod proposer;
pub mod registry;
pub mod retry;
pub mod suggestion;
pub mod traits;

pub use config::NodeConfig;
pub use error::{DeclareError, PipelineError, SetupError, StorageError, TransportError};
pub use messages::{Case, Message, Uid, WrongCase};
pub use node::{Node, generate_uid};
pub use proposer::ProposerHandle;
pub use registry::{MemoryStore, ParticipantRegistry};
pub use retry::{ExponentialBackoff, IncrementalBackoff, NoopRetry, RetryCoordinator};
pub use suggestion::{LastAccepted, SuggestionId};
pub use traits::{StableStore, Transport, ValueApi};
