//! Proposer (suggester) role.
//!
//! Drives permission rounds until a value is chosen or the node is
//! disposed. Each round broadcasts a `PermitRequest`, batches the
//! `PermitGranted` responses for that sid inside a `take_cutoff`
//! window, and either suggests a value or feeds the sid-advancement
//! pathway. Nack storms are batched the same way and advance the sid
//! through a monotone gate, which is what keeps the emitted sid
//! sequence strictly increasing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, instrument, trace, warn};

use crate::batch::Windows;
use crate::messages::{Case, Message, Uid};
use crate::retry::RetryCoordinator;
use crate::suggestion::{LastAccepted, SuggestionId};
use crate::traits::{Transport, ValueApi};

/// Control surface of a running proposer.
///
/// Cheap to clone; all clones feed the same try-permission trigger.
#[derive(Clone)]
pub struct ProposerHandle {
    trigger: mpsc::UnboundedSender<()>,
    kicked: Arc<AtomicBool>,
}

impl ProposerHandle {
    /// Kick the first permission round.
    ///
    /// Idempotent: only the first call signals the trigger, and the
    /// pipeline ignores trigger signals after `Success` anyway.
    pub fn send_first_permission_request(&self) {
        if !self.kicked.swap(true, Ordering::Relaxed) {
            let _ = self.trigger.send(());
        }
    }

    /// The raw try-permission trigger, exposed for composition.
    ///
    /// The node's leadership timer feeds this; every signal starts a
    /// round with the current control-state sid.
    #[must_use]
    pub fn try_permission_trigger(&self) -> mpsc::UnboundedSender<()> {
        self.trigger.clone()
    }
}

/// The suggester state machine for one node.
pub struct Proposer<V, T, A, R> {
    uid: Uid,
    transport: T,
    api: A,
    retry: R,
    majority: usize,
    take_cutoff: Duration,
    trigger_tx: mpsc::UnboundedSender<()>,
    trigger_rx: mpsc::UnboundedReceiver<()>,
    kicked: Arc<AtomicBool>,
    _marker: std::marker::PhantomData<V>,
}

impl<V, T, A, R> Proposer<V, T, A, R>
where
    V: Clone + std::fmt::Debug + Send + Sync + 'static,
    T: Transport<V>,
    A: ValueApi<Value = V>,
    R: RetryCoordinator,
{
    /// Create a proposer for `uid`.
    #[must_use]
    pub fn new(uid: Uid, transport: T, api: A, retry: R, majority: usize, take_cutoff: Duration) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        Self {
            uid,
            transport,
            api,
            retry,
            majority,
            take_cutoff,
            trigger_tx,
            trigger_rx,
            kicked: Arc::new(AtomicBool::new(false)),
            _marker: std::marker::PhantomData,
        }
    }

    /// The control surface used to start and compose this proposer.
    #[must_use]
    pub fn handle(&self) -> ProposerHandle {
        ProposerHandle {
            trigger: self.trigger_tx.clone(),
            kicked: self.kicked.clone(),
        }
    }

    /// Restrict an inbound feed to the cases a proposer reacts to:
    /// `PermitGranted`, `Success` and `Nack`.
    pub fn message_stream(
        incoming: impl Stream<Item = Message<V>> + Send,
    ) -> impl Stream<Item = Message<V>> + Send {
        incoming.filter(|msg| {
            futures::future::ready(matches!(
                msg.case(),
                Case::PermitGranted | Case::Success | Case::Nack
            ))
        })
    }

    /// Run permission rounds until the inbound feed closes.
    ///
    /// A `Success` from any learner stops the trigger loop for good,
    /// but the message subscriptions stay alive so that late nacks
    /// are absorbed instead of starting new rounds.
    #[instrument(skip_all, name = "proposer", fields(uid = %self.uid))]
    pub async fn run(self, incoming: T::Incoming) {
        let Self {
            uid,
            transport,
            api,
            retry,
            majority,
            take_cutoff,
            trigger_tx,
            trigger_rx,
            ..
        } = self;

        debug!(majority, ?take_cutoff, "proposer started");

        let mut incoming: std::pin::Pin<Box<dyn Stream<Item = Message<V>> + Send>> =
            Box::pin(Self::message_stream(incoming));
        let mut triggers: std::pin::Pin<Box<dyn Stream<Item = ()> + Send>> =
            Box::pin(retry.coordinate(UnboundedReceiverStream::new(trigger_rx)));

        // Control state: the sid the next round will use, the monotone
        // gate guarding advancement, and the terminal cut.
        let mut next_sid: Option<SuggestionId> = None;
        let mut gate: Option<SuggestionId> = None;
        let mut succeeded = false;

        let mut grant_windows: Windows<(SuggestionId, Option<LastAccepted<V>>)> =
            Windows::new(take_cutoff);
        let mut nack_windows: Windows<(SuggestionId, SuggestionId)> = Windows::new(take_cutoff);

        loop {
            tokio::select! {
                trigger = triggers.next() => {
                    // Unreachable while trigger_tx lives, but harmless.
                    if trigger.is_none() {
                        break;
                    }
                    if succeeded {
                        trace!("ignoring trigger after success");
                        continue;
                    }
                    let sid = next_sid
                        .clone()
                        .unwrap_or_else(|| SuggestionId::initial(uid.clone()));
                    next_sid = Some(sid.clone());
                    debug!(%sid, "requesting permission");
                    if let Err(err) = transport
                        .broadcast(Message::PermitRequest {
                            sender_id: uid.clone(),
                            sid,
                        })
                        .await
                    {
                        warn!(%err, "permit request broadcast failed");
                        transport.report_error(&uid, err.into()).await;
                    }
                }

                msg = incoming.next() => {
                    let Some(msg) = msg else {
                        debug!("incoming stream closed, proposer stopping");
                        break;
                    };
                    match msg {
                        Message::PermitGranted { sid, last_accepted } => {
                            trace!(%sid, "batching grant");
                            grant_windows.push(sid.to_string(), (sid, last_accepted));
                        }
                        Message::Nack { current_sid, last_granted_sid } => {
                            trace!(%current_sid, %last_granted_sid, "batching nack");
                            nack_windows
                                .push(current_sid.to_string(), (current_sid, last_granted_sid));
                        }
                        Message::Success { .. } => {
                            if !succeeded {
                                debug!("success observed, ceasing rounds");
                            }
                            succeeded = true;
                        }
                        _ => {}
                    }
                }

                (_, grants) = grant_windows.next_window() => {
                    if succeeded {
                        continue;
                    }
                    let Some((sid, _)) = grants.first().cloned() else {
                        continue;
                    };
                    if grants.len() < majority {
                        debug!(%sid, granted = grants.len(), majority, "under quorum");
                        advance(&mut gate, &mut next_sid, &trigger_tx, sid);
                        continue;
                    }

                    // Majority granted: bind to the highest previously
                    // accepted value if a majority reported one, else a
                    // free value.
                    let prior: Vec<&LastAccepted<V>> = grants
                        .iter()
                        .filter_map(|(_, last)| last.as_ref())
                        .collect();
                    let value = if prior.len() >= majority {
                        let highest = prior
                            .iter()
                            .max_by(|a, b| a.sid.cmp(&b.sid))
                            .map(|last| last.value.clone());
                        match highest {
                            Some(value) => value,
                            None => api.first_value(&uid),
                        }
                    } else {
                        api.first_value(&uid)
                    };

                    debug!(%sid, ?value, "suggesting value");
                    if let Err(err) = transport
                        .broadcast(Message::Suggestion {
                            sender_id: uid.clone(),
                            sid,
                            value,
                        })
                        .await
                    {
                        warn!(%err, "suggestion broadcast failed");
                        transport.report_error(&uid, err.into()).await;
                    }
                }

                (_, nacks) = nack_windows.next_window() => {
                    if succeeded || nacks.len() < majority {
                        continue;
                    }
                    let highest = nacks
                        .into_iter()
                        .map(|(_, last_granted)| last_granted)
                        .max();
                    if let Some(candidate) = highest {
                        debug!(%candidate, "nacked by majority");
                        advance(&mut gate, &mut next_sid, &trigger_tx, candidate);
                    }
                }
            }
        }
    }
}

/// The monotone sid gate: a candidate only advances the control state
/// if it is strictly above everything previously admitted, and the
/// next round's sid is its increment. Admission re-signals the trigger
/// so the retry coordinator schedules the next round.
fn advance(
    gate: &mut Option<SuggestionId>,
    next_sid: &mut Option<SuggestionId>,
    trigger: &mpsc::UnboundedSender<()>,
    candidate: SuggestionId,
) {
    if gate.as_ref().is_some_and(|admitted| candidate <= *admitted) {
        trace!(%candidate, "gate rejected stale candidate");
        return;
    }
    let next = candidate.increment();
    trace!(%candidate, %next, "gate admitted candidate");
    *gate = Some(candidate);
    *next_sid = Some(next);
    let _ = trigger.send(());
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;
    use crate::error::DeclareError;
    use crate::registry::ParticipantRegistry;
    use crate::retry::NoopRetry;

    #[derive(Clone)]
    struct StaticApi;

    #[async_trait::async_trait]
    impl ValueApi for StaticApi {
        type Value = String;

        fn first_value(&self, uid: &Uid) -> String {
            format!("free-{uid}")
        }

        fn stringify(&self, value: &String) -> String {
            value.clone()
        }

        async fn declare_final(&self, _value: String) -> Result<(), DeclareError> {
            Ok(())
        }
    }

    const CUTOFF: Duration = Duration::from_millis(100);

    struct Harness {
        registry: ParticipantRegistry<String>,
        handle: ProposerHandle,
        observed: <ParticipantRegistry<String> as Transport<String>>::Incoming,
    }

    /// Spawn a proposer for "p1" with an observer subscription that
    /// sees every broadcast.
    fn spawn_proposer(majority: usize) -> Harness {
        let registry: ParticipantRegistry<String> = ParticipantRegistry::new();
        registry.register("p1");
        registry.register("obs");
        let proposer = Proposer::new(
            "p1".to_string(),
            registry.clone(),
            StaticApi,
            NoopRetry,
            majority,
            CUTOFF,
        );
        let handle = proposer.handle();
        let incoming = registry.incoming("p1");
        let observed = registry.incoming("obs");
        tokio::spawn(proposer.run(incoming));
        Harness {
            registry,
            handle,
            observed,
        }
    }

    async fn next_of(
        observed: &mut <ParticipantRegistry<String> as Transport<String>>::Incoming,
        case: Case,
    ) -> Message<String> {
        loop {
            let msg = observed.next().await.expect("observer stream ended");
            if msg.is(case) {
                return msg;
            }
        }
    }

    fn grant(sid: &SuggestionId, last: Option<LastAccepted<String>>) -> Message<String> {
        Message::PermitGranted {
            sid: sid.clone(),
            last_accepted: last,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_round_uses_initial_sid() {
        let mut h = spawn_proposer(1);
        h.handle.send_first_permission_request();

        let msg = next_of(&mut h.observed, Case::PermitRequest).await;
        let (sender, sid) = msg.into_permit_request().unwrap();
        assert_eq!(sender, "p1");
        assert_eq!(sid, SuggestionId::initial("p1"));
    }

    #[tokio::test(start_paused = true)]
    async fn majority_of_empty_grants_suggests_free_value() {
        let mut h = spawn_proposer(6);
        h.handle.send_first_permission_request();
        let (_, sid) = next_of(&mut h.observed, Case::PermitRequest)
            .await
            .into_permit_request()
            .unwrap();

        let prior = LastAccepted::new(SuggestionId::new(0, "old"), "prior".to_string());
        for _ in 0..6 {
            h.registry.send("p1", grant(&sid, None)).await.unwrap();
        }
        for _ in 0..4 {
            h.registry
                .send("p1", grant(&sid, Some(prior.clone())))
                .await
                .unwrap();
        }

        let (_, suggested_sid, value) = next_of(&mut h.observed, Case::Suggestion)
            .await
            .into_suggestion()
            .unwrap();
        assert_eq!(suggested_sid, sid);
        assert_eq!(value, "free-p1");
    }

    #[tokio::test(start_paused = true)]
    async fn majority_of_prior_values_adopts_highest() {
        let mut h = spawn_proposer(6);
        h.handle.send_first_permission_request();
        let (_, sid) = next_of(&mut h.observed, Case::PermitRequest)
            .await
            .into_permit_request()
            .unwrap();

        for n in 0..6u64 {
            let prior = LastAccepted::new(
                SuggestionId::new(n, "old"),
                format!("prior-{n}"),
            );
            h.registry
                .send("p1", grant(&sid, Some(prior)))
                .await
                .unwrap();
        }
        for _ in 0..4 {
            h.registry.send("p1", grant(&sid, None)).await.unwrap();
        }

        let (_, _, value) = next_of(&mut h.observed, Case::Suggestion)
            .await
            .into_suggestion()
            .unwrap();
        assert_eq!(value, "prior-5");
    }

    #[tokio::test(start_paused = true)]
    async fn under_quorum_advances_and_retries() {
        let mut h = spawn_proposer(6);
        h.handle.send_first_permission_request();
        let (_, first) = next_of(&mut h.observed, Case::PermitRequest)
            .await
            .into_permit_request()
            .unwrap();

        // Only 2 of 6 needed grants arrive; the window closes short.
        for _ in 0..2 {
            h.registry.send("p1", grant(&first, None)).await.unwrap();
        }

        let (_, second) = next_of(&mut h.observed, Case::PermitRequest)
            .await
            .into_permit_request()
            .unwrap();
        assert_eq!(second, first.increment());
    }

    #[tokio::test(start_paused = true)]
    async fn nack_majority_jumps_past_highest_grant() {
        let mut h = spawn_proposer(6);
        h.handle.send_first_permission_request();
        let (_, sid) = next_of(&mut h.observed, Case::PermitRequest)
            .await
            .into_permit_request()
            .unwrap();

        let k = 17u64;
        for n in 0..6u64 {
            h.registry
                .send(
                    "p1",
                    Message::Nack {
                        current_sid: sid.clone(),
                        last_granted_sid: SuggestionId::new(k - 5 + n, format!("a{n}")),
                    },
                )
                .await
                .unwrap();
        }

        let (_, next) = next_of(&mut h.observed, Case::PermitRequest)
            .await
            .into_permit_request()
            .unwrap();
        assert_eq!(next.integer, k + 1);
        assert_eq!(next.id, "a5");
    }

    #[tokio::test(start_paused = true)]
    async fn success_stops_new_rounds() {
        let mut h = spawn_proposer(2);
        h.handle.send_first_permission_request();
        let (_, sid) = next_of(&mut h.observed, Case::PermitRequest)
            .await
            .into_permit_request()
            .unwrap();

        h.registry
            .send(
                "p1",
                Message::Success {
                    value: "done".to_string(),
                },
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // A late nack storm must not restart the loop.
        for n in 0..3u64 {
            h.registry
                .send(
                    "p1",
                    Message::Nack {
                        current_sid: sid.clone(),
                        last_granted_sid: SuggestionId::new(100 + n, "x"),
                    },
                )
                .await
                .unwrap();
        }
        tokio::time::sleep(CUTOFF * 3).await;

        let mut extra_requests = 0;
        while let Ok(Some(msg)) =
            tokio::time::timeout(Duration::from_millis(50), h.observed.next()).await
        {
            if msg.is(Case::PermitRequest) {
                extra_requests += 1;
            }
        }
        assert_eq!(extra_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_grants_for_closed_windows_are_harmless() {
        let mut h = spawn_proposer(2);
        h.handle.send_first_permission_request();
        let (_, first) = next_of(&mut h.observed, Case::PermitRequest)
            .await
            .into_permit_request()
            .unwrap();

        // Let the first window close empty-handed except one grant.
        h.registry.send("p1", grant(&first, None)).await.unwrap();
        let (_, second) = next_of(&mut h.observed, Case::PermitRequest)
            .await
            .into_permit_request()
            .unwrap();

        // A straggler for the first round arrives after its window
        // closed; it must not produce a suggestion for that sid.
        h.registry.send("p1", grant(&first, None)).await.unwrap();
        h.registry.send("p1", grant(&second, None)).await.unwrap();
        h.registry.send("p1", grant(&second, None)).await.unwrap();

        let (_, suggested_sid, _) = next_of(&mut h.observed, Case::Suggestion)
            .await
            .into_suggestion()
            .unwrap();
        assert_eq!(suggested_sid, second);
    }
}
