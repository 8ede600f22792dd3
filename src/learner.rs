//! Learner (arbiter) role.
//!
//! Counts acceptances per `(sid, stringified value)` pair and declares
//! the final value exactly once when a pair first reaches majority.

use std::collections::HashMap;

use futures::StreamExt;
use tracing::{debug, error, instrument, trace, warn};

use crate::messages::{Message, Uid};
use crate::suggestion::SuggestionId;
use crate::traits::{Transport, ValueApi};

/// Counts agreeing acceptances and fires when one pair first reaches
/// the majority threshold.
///
/// Grouping is by `(sid, stringify(value))` because the value type is
/// opaque here; the stringifier is the externally supplied equality
/// witness.
struct AcceptanceTally<V> {
    counts: HashMap<(SuggestionId, String), (usize, V)>,
    majority: usize,
}

impl<V: Clone> AcceptanceTally<V> {
    fn new(majority: usize) -> Self {
        Self {
            counts: HashMap::new(),
            majority,
        }
    }

    /// Count one acceptance. Returns the value when its pair reaches
    /// the majority exactly, so a pair can fire at most once.
    fn track(&mut self, sid: SuggestionId, key: String, value: V) -> Option<V> {
        let entry = self
            .counts
            .entry((sid, key))
            .or_insert_with(|| (0, value));
        entry.0 += 1;
        (entry.0 == self.majority).then(|| entry.1.clone())
    }
}

/// The arbiter state machine for one node.
pub struct Learner<V, T, A> {
    uid: Uid,
    transport: T,
    api: A,
    majority: usize,
    _marker: std::marker::PhantomData<V>,
}

impl<V, T, A> Learner<V, T, A>
where
    V: Clone + std::fmt::Debug + Send + Sync + 'static,
    T: Transport<V>,
    A: ValueApi<Value = V>,
{
    /// Create a learner that declares once `majority` acceptances
    /// agree.
    #[must_use]
    pub fn new(uid: Uid, transport: T, api: A, majority: usize) -> Self {
        Self {
            uid,
            transport,
            api,
            majority,
            _marker: std::marker::PhantomData,
        }
    }

    /// Process acceptances from `incoming` until the stream ends.
    ///
    /// On the first `(sid, value)` pair to reach majority, calls
    /// `declare_final` exactly once and broadcasts `Success`. The loop
    /// keeps draining afterwards so late acceptances are absorbed
    /// rather than backing up the feed.
    #[instrument(skip_all, name = "learner", fields(uid = %self.uid))]
    pub async fn run(self, mut incoming: T::Incoming) {
        debug!(majority = self.majority, "learner started");
        let mut tally = AcceptanceTally::new(self.majority);
        let mut declared = false;

        while let Some(msg) = incoming.next().await {
            let Message::Acceptance { sid, value } = msg else {
                continue;
            };
            if declared {
                trace!(%sid, "already declared, dropping acceptance");
                continue;
            }

            let key = self.api.stringify(&value);
            trace!(%sid, key, "counting acceptance");
            let Some(chosen) = tally.track(sid, key, value) else {
                continue;
            };

            declared = true;
            debug!(?chosen, "majority reached, declaring final value");
            if let Err(err) = self.api.declare_final(chosen.clone()).await {
                // Not retried; idempotence is the external API's duty.
                error!(%err, "declare final value failed");
                self.transport.report_error(&self.uid, err.into()).await;
            }
            if let Err(err) = self
                .transport
                .broadcast(Message::Success { value: chosen })
                .await
            {
                warn!(%err, "success broadcast failed");
                self.transport.report_error(&self.uid, err.into()).await;
            }
        }
        debug!("incoming stream closed, learner stopping");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures::StreamExt;

    use super::*;
    use crate::error::DeclareError;
    use crate::registry::ParticipantRegistry;
    use crate::suggestion::SuggestionId;

    #[derive(Clone, Default)]
    struct RecordingApi {
        declared: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ValueApi for RecordingApi {
        type Value = String;

        fn first_value(&self, uid: &Uid) -> String {
            format!("free-{uid}")
        }

        fn stringify(&self, value: &String) -> String {
            value.clone()
        }

        async fn declare_final(&self, value: String) -> Result<(), DeclareError> {
            self.declared.lock().unwrap().push(value);
            if self.fail {
                Err(DeclareError {
                    reason: "refused".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn sid(n: u64) -> SuggestionId {
        SuggestionId::new(n, "p1")
    }

    fn acceptance(n: u64, value: &str) -> Message<String> {
        Message::Acceptance {
            sid: sid(n),
            value: value.to_string(),
        }
    }

    async fn drive(majority: usize, msgs: Vec<Message<String>>) -> (Vec<String>, Vec<Message<String>>) {
        let registry: ParticipantRegistry<String> = ParticipantRegistry::new();
        registry.register("l1");
        registry.register("observer");
        let api = RecordingApi::default();
        let declared = api.declared.clone();

        let learner = Learner::new("l1".to_string(), registry.clone(), api, majority);
        let incoming = registry.incoming("l1");
        let mut observed = registry.incoming("observer");
        let task = tokio::spawn(learner.run(incoming));

        for msg in msgs {
            registry.broadcast(msg).await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        registry.close();
        task.await.unwrap();

        let mut seen = Vec::new();
        while let Some(msg) = observed.next().await {
            if msg.is(crate::messages::Case::Success) {
                seen.push(msg);
            }
        }
        (declared.lock().unwrap().clone(), seen)
    }

    #[tokio::test]
    async fn declares_once_at_majority() {
        let (declared, successes) = drive(
            2,
            vec![
                acceptance(3, "v"),
                acceptance(3, "v"),
                acceptance(3, "v"),
            ],
        )
        .await;
        assert_eq!(declared, vec!["v".to_string()]);
        assert_eq!(successes.len(), 1);
    }

    #[tokio::test]
    async fn distinct_sids_do_not_pool_votes() {
        let (declared, _) = drive(2, vec![acceptance(1, "v"), acceptance(2, "v")]).await;
        assert!(declared.is_empty());
    }

    #[tokio::test]
    async fn distinct_values_do_not_pool_votes() {
        let (declared, _) = drive(2, vec![acceptance(1, "a"), acceptance(1, "b")]).await;
        assert!(declared.is_empty());
    }

    #[tokio::test]
    async fn declare_failure_is_not_retried() {
        let registry: ParticipantRegistry<String> = ParticipantRegistry::new();
        registry.register("l1");
        let api = RecordingApi {
            fail: true,
            ..RecordingApi::default()
        };
        let declared = api.declared.clone();

        let learner = Learner::new("l1".to_string(), registry.clone(), api, 1);
        let incoming = registry.incoming("l1");
        let task = tokio::spawn(learner.run(incoming));

        registry.broadcast(acceptance(1, "v")).await.unwrap();
        registry.broadcast(acceptance(1, "v")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        registry.close();
        task.await.unwrap();

        assert_eq!(declared.lock().unwrap().len(), 1);
    }
}
