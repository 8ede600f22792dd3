//! Acceptor (voter) role.
//!
//! Reactively answers permission requests and suggestions against the
//! two persisted slots, `last_granted` and `last_accepted`. Both
//! handlers persist before they emit, which is what makes the
//! grant/accept invariants hold across crashes.

use futures::StreamExt;
use tracing::{debug, instrument, trace, warn};

use crate::error::PipelineError;
use crate::messages::{Message, Uid};
use crate::suggestion::{LastAccepted, SuggestionId};
use crate::traits::{StableStore, Transport};

/// The voter state machine for one node.
pub struct Acceptor<V, T, S> {
    uid: Uid,
    transport: T,
    store: S,
    _marker: std::marker::PhantomData<V>,
}

impl<V, T, S> Acceptor<V, T, S>
where
    V: Clone + std::fmt::Debug + Send + Sync + 'static,
    T: Transport<V>,
    S: StableStore<V>,
{
    /// Create an acceptor answering for `uid` against `store`.
    #[must_use]
    pub fn new(uid: Uid, transport: T, store: S) -> Self {
        Self {
            uid,
            transport,
            store,
            _marker: std::marker::PhantomData,
        }
    }

    /// Process voter-directed messages from `incoming` until the
    /// stream ends.
    ///
    /// Messages are handled strictly in receipt order. Transient
    /// transport/storage failures are reported on the per-uid error
    /// stream and the loop continues.
    #[instrument(skip_all, name = "acceptor", fields(uid = %self.uid))]
    pub async fn run(self, mut incoming: T::Incoming) {
        debug!("acceptor started");
        while let Some(msg) = incoming.next().await {
            let outcome = match msg {
                Message::PermitRequest { sender_id, sid } => {
                    self.handle_permit_request(&sender_id, sid).await
                }
                Message::Suggestion {
                    sender_id,
                    sid,
                    value,
                } => self.handle_suggestion(&sender_id, sid, value).await,
                _ => Ok(()),
            };
            if let Err(err) = outcome {
                warn!(%err, "handler failed, reporting and continuing");
                self.transport.report_error(&self.uid, err).await;
            }
        }
        debug!("incoming stream closed, acceptor stopping");
    }

    /// Answer a permission request.
    ///
    /// Grants iff `sid` is strictly above the persisted
    /// `last_granted` (or nothing was granted yet); the new grant is
    /// persisted before the reply leaves.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on storage or transport failure; the
    /// slot is unchanged unless the write itself succeeded.
    pub async fn handle_permit_request(
        &self,
        sender_id: &str,
        sid: SuggestionId,
    ) -> Result<(), PipelineError> {
        let last_granted = self.store.last_granted(&self.uid).await?;
        match last_granted {
            Some(granted) if sid <= granted => {
                trace!(%sid, %granted, "refusing permit");
                self.transport
                    .send(
                        sender_id,
                        Message::Nack {
                            current_sid: sid,
                            last_granted_sid: granted,
                        },
                    )
                    .await?;
            }
            _ => {
                self.store
                    .store_last_granted(&self.uid, sid.clone())
                    .await?;
                let last_accepted = self.store.last_accepted(&self.uid).await?;
                trace!(%sid, "granting permit");
                self.transport
                    .send(sender_id, Message::PermitGranted { sid, last_accepted })
                    .await?;
            }
        }
        Ok(())
    }

    /// Answer a suggestion.
    ///
    /// Accepts iff `sid` is at or above the persisted `last_granted`
    /// (or nothing was granted yet). Accepting persists the
    /// acceptance and raises the grant floor to `sid`, both before
    /// the acceptance is broadcast to the learners, so a lower-sid
    /// suggestion can never overwrite the accepted record afterwards.
    ///
    /// # Panics
    ///
    /// Panics if accepting would overwrite `last_accepted` with a
    /// lower sid. That cannot happen when every participant follows
    /// the protocol; if it is detected anyway, corrupting the
    /// accepted record is worse than crashing.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on storage or transport failure.
    pub async fn handle_suggestion(
        &self,
        sender_id: &str,
        sid: SuggestionId,
        value: V,
    ) -> Result<(), PipelineError> {
        let last_granted = self.store.last_granted(&self.uid).await?;
        if let Some(granted) = &last_granted
            && sid < *granted
        {
            trace!(%sid, %granted, "refusing suggestion");
            self.transport
                .send(
                    sender_id,
                    Message::Nack {
                        current_sid: sid,
                        last_granted_sid: granted.clone(),
                    },
                )
                .await?;
            return Ok(());
        }

        if let Some(prior) = self.store.last_accepted(&self.uid).await? {
            assert!(
                prior.sid <= sid,
                "acceptor {}: suggestion {sid} would roll back accepted record {}",
                self.uid,
                prior.sid,
            );
        }

        self.store
            .store_last_accepted(&self.uid, LastAccepted::new(sid.clone(), value.clone()))
            .await?;
        if last_granted.is_none_or(|granted| sid > granted) {
            self.store
                .store_last_granted(&self.uid, sid.clone())
                .await?;
        }
        debug!(%sid, "accepted suggestion");
        self.transport
            .broadcast(Message::Acceptance { sid, value })
            .await?;
        Ok(())
    }
}
