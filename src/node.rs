//! Node composition.
//!
//! A node aggregates one proposer, one acceptor and one learner under
//! a single uid, wires each role to its own subscription on the
//! inbound feed, and adds the leadership self-election that breaks
//! symmetry in a freshly started cluster.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::acceptor::Acceptor;
use crate::config::NodeConfig;
use crate::error::SetupError;
use crate::learner::Learner;
use crate::messages::{Case, Uid};
use crate::proposer::{Proposer, ProposerHandle};
use crate::retry::RetryCoordinator;
use crate::traits::{StableStore, Transport, ValueApi};

/// Generate a fresh node identity.
#[must_use]
pub fn generate_uid() -> Uid {
    uuid::Uuid::new_v4().to_string()
}

struct Roles<S, A, R> {
    store: S,
    api: A,
    retry: R,
}

struct Bindings {
    proposer: ProposerHandle,
    tasks: Vec<JoinHandle<()>>,
}

/// One participant in an agreement instance.
///
/// Create it, call [`setup_bindings`](Self::setup_bindings) once to
/// wire every stream, then either wait for the self-election timer or
/// kick a round explicitly. Dropping the node (or calling
/// [`dispose`](Self::dispose)) tears the subscription graph down.
pub struct Node<V, T, S, A, R> {
    uid: Uid,
    config: NodeConfig,
    transport: T,
    roles: Option<Roles<S, A, R>>,
    bindings: Option<Bindings>,
    _marker: std::marker::PhantomData<V>,
}

impl<V, T, S, A, R> Node<V, T, S, A, R>
where
    V: Clone + std::fmt::Debug + Send + Sync + 'static,
    T: Transport<V>,
    S: StableStore<V>,
    A: ValueApi<Value = V> + Clone,
    R: RetryCoordinator,
{
    /// Assemble a node; nothing runs until bindings are set up.
    #[must_use]
    pub fn new(uid: Uid, config: NodeConfig, transport: T, store: S, api: A, retry: R) -> Self {
        Self {
            uid,
            config,
            transport,
            roles: Some(Roles { store, api, retry }),
            bindings: None,
            _marker: std::marker::PhantomData,
        }
    }

    /// This node's identity.
    #[must_use]
    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    /// Wire all role pipelines and start the leadership timer.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] if the configuration is invalid or the
    /// bindings were already set up; in both cases nothing is spawned.
    #[instrument(skip_all, fields(uid = %self.uid))]
    pub fn setup_bindings(&mut self) -> Result<(), SetupError> {
        self.config.validate()?;
        if self.bindings.is_some() {
            return Err(SetupError::AlreadyBound);
        }
        let Some(Roles { store, api, retry }) = self.roles.take() else {
            return Err(SetupError::AlreadyBound);
        };

        let majority = self
            .config
            .majority_override
            .unwrap_or_else(|| api.majority(self.config.quorum_size));
        debug!(
            quorum_size = self.config.quorum_size,
            majority, "setting up bindings"
        );

        let proposer = Proposer::new(
            self.uid.clone(),
            self.transport.clone(),
            api.clone(),
            retry,
            majority,
            self.config.take_cutoff,
        );
        let handle = proposer.handle();
        let acceptor = Acceptor::new(self.uid.clone(), self.transport.clone(), store);
        let learner = Learner::new(self.uid.clone(), self.transport.clone(), api, majority);

        let tasks = vec![
            tokio::spawn(proposer.run(self.transport.incoming(&self.uid))),
            tokio::spawn(acceptor.run(self.transport.incoming(&self.uid))),
            tokio::spawn(learner.run(self.transport.incoming(&self.uid))),
            tokio::spawn(leadership_timer(
                self.uid.clone(),
                self.transport.incoming(&self.uid),
                handle.try_permission_trigger(),
                self.config.delay_before_claiming_leadership,
            )),
        ];

        self.bindings = Some(Bindings {
            proposer: handle,
            tasks,
        });
        Ok(())
    }

    /// The proposer control surface, available once bound.
    #[must_use]
    pub fn proposer_handle(&self) -> Option<ProposerHandle> {
        self.bindings.as_ref().map(|b| b.proposer.clone())
    }

    /// Explicitly start a decision round right now.
    ///
    /// Additive with the self-election timer: the timer keeps rearming
    /// whenever silence resumes.
    pub fn commence_decision_process(&self) {
        match &self.bindings {
            Some(bindings) => {
                let _ = bindings.proposer.try_permission_trigger().send(());
            }
            None => warn!(uid = %self.uid, "commence called before setup_bindings"),
        }
    }

    /// Tear down every subscription. Idempotent.
    pub fn dispose(&mut self) {
        if let Some(bindings) = self.bindings.take() {
            debug!(uid = %self.uid, "disposing node");
            for task in bindings.tasks {
                task.abort();
            }
        }
    }
}

impl<V, T, S, A, R> Drop for Node<V, T, S, A, R> {
    fn drop(&mut self) {
        if let Some(bindings) = self.bindings.take() {
            for task in bindings.tasks {
                task.abort();
            }
        }
    }
}

/// Fire the try-permission trigger once whenever the node has seen no
/// voter- or arbiter-directed message for `delay`.
///
/// Every relevant message rearms the timer; after firing, the timer
/// stays quiet until activity resumes and goes silent again.
#[instrument(skip_all, name = "leadership", fields(uid = %uid))]
async fn leadership_timer<V, I>(
    uid: Uid,
    mut incoming: I,
    trigger: mpsc::UnboundedSender<()>,
    delay: std::time::Duration,
) where
    V: Clone + Send + 'static,
    I: futures::Stream<Item = crate::messages::Message<V>> + Unpin,
{
    let mut fired = false;
    loop {
        tokio::select! {
            msg = incoming.next() => {
                let Some(msg) = msg else {
                    debug!("incoming stream closed, leadership timer stopping");
                    break;
                };
                if matches!(
                    msg.case(),
                    Case::PermitRequest | Case::Suggestion | Case::Acceptance
                ) {
                    fired = false;
                }
            }
            () = tokio::time::sleep(delay) => {
                if !fired {
                    debug!(?delay, "silence threshold reached, claiming leadership");
                    if trigger.send(()).is_err() {
                        break;
                    }
                    fired = true;
                }
            }
        }
    }
}
