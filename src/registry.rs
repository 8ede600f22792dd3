//! In-process participant registry and storage.
//!
//! [`ParticipantRegistry`] is the instance coordinator: a map from uid
//! to that participant's inbound channel. Channels are registered at
//! startup and never removed mid-run; each node reads its own channel,
//! everyone writes for broadcast. [`MemoryStore`] keeps the two
//! durable acceptor slots per uid in memory, which is durable enough
//! for in-process instances and tests.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{trace, warn};

use crate::error::{PipelineError, StorageError, TransportError};
use crate::messages::{Message, Uid};
use crate::suggestion::{LastAccepted, SuggestionId};
use crate::traits::{StableStore, Transport};

const CHANNEL_CAPACITY: usize = 256;

struct RegistryInner<V> {
    channels: Mutex<HashMap<Uid, broadcast::Sender<Message<V>>>>,
    errors: Mutex<HashMap<Uid, Vec<PipelineError>>>,
    closed: Mutex<bool>,
}

/// Registry of every participant in one agreement instance.
///
/// Implements [`Transport`] over per-uid `tokio::sync::broadcast`
/// channels: `incoming` subscriptions are hot and multicast, unicast
/// goes to one channel, broadcast fans out to all of them.
pub struct ParticipantRegistry<V> {
    inner: Arc<RegistryInner<V>>,
}

impl<V> Clone for ParticipantRegistry<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Default for ParticipantRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ParticipantRegistry<V> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                channels: Mutex::new(HashMap::new()),
                errors: Mutex::new(HashMap::new()),
                closed: Mutex::new(false),
            }),
        }
    }
}

impl<V: Clone> ParticipantRegistry<V> {
    /// Register a participant's channel. Idempotent.
    pub fn register(&self, uid: &str) {
        let mut channels = self.inner.channels.lock().unwrap();
        channels.entry(uid.to_string()).or_insert_with(|| {
            let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
            tx
        });
    }

    /// The uids of every registered participant.
    #[must_use]
    pub fn participants(&self) -> Vec<Uid> {
        self.inner.channels.lock().unwrap().keys().cloned().collect()
    }

    /// Errors reported on `uid`'s error channel so far.
    #[must_use]
    pub fn errors(&self, uid: &str) -> Vec<PipelineError> {
        self.inner
            .errors
            .lock()
            .unwrap()
            .get(uid)
            .cloned()
            .unwrap_or_default()
    }

    /// Tear the instance down: every inbound stream ends after its
    /// buffered messages drain, and further sends fail.
    pub fn close(&self) {
        *self.inner.closed.lock().unwrap() = true;
        self.inner.channels.lock().unwrap().clear();
    }

    fn is_closed(&self) -> bool {
        *self.inner.closed.lock().unwrap()
    }
}

/// Hot multicast subscription to one participant's inbound feed.
///
/// A subscriber that falls behind the channel capacity loses the
/// overwritten messages, exactly like a slow peer on a real network.
pub struct IncomingStream<V> {
    inner: BroadcastStream<Message<V>>,
}

impl<V: Clone + Send + 'static> Stream for IncomingStream<V> {
    type Item = Message<V>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(msg)) => return Poll::Ready(Some(msg)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "subscription lagged, messages dropped");
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

#[async_trait]
impl<V> Transport<V> for ParticipantRegistry<V>
where
    V: Clone + std::fmt::Debug + Send + Sync + 'static,
{
    type Incoming = IncomingStream<V>;

    fn incoming(&self, uid: &str) -> Self::Incoming {
        let mut channels = self.inner.channels.lock().unwrap();
        let tx = channels.entry(uid.to_string()).or_insert_with(|| {
            let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
            tx
        });
        IncomingStream {
            inner: BroadcastStream::new(tx.subscribe()),
        }
    }

    async fn send(&self, target: &str, msg: Message<V>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::SendFailed {
                reason: "registry closed".into(),
            });
        }
        let channels = self.inner.channels.lock().unwrap();
        let Some(tx) = channels.get(target) else {
            return Err(TransportError::UnknownParticipant {
                uid: target.to_string(),
            });
        };
        // No live subscriber is indistinguishable from a partition.
        let _ = tx.send(msg);
        Ok(())
    }

    async fn broadcast(&self, msg: Message<V>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::SendFailed {
                reason: "registry closed".into(),
            });
        }
        let channels = self.inner.channels.lock().unwrap();
        for tx in channels.values() {
            let _ = tx.send(msg.clone());
        }
        Ok(())
    }

    async fn report_error(&self, uid: &str, err: PipelineError) {
        trace!(uid, %err, "pipeline error reported");
        self.inner
            .errors
            .lock()
            .unwrap()
            .entry(uid.to_string())
            .or_default()
            .push(err);
    }
}

#[derive(Clone)]
struct Slots<V> {
    granted: Option<SuggestionId>,
    accepted: Option<LastAccepted<V>>,
}

impl<V> Default for Slots<V> {
    fn default() -> Self {
        Self {
            granted: None,
            accepted: None,
        }
    }
}

/// In-memory [`StableStore`]: two slots per uid behind a mutex.
pub struct MemoryStore<V> {
    inner: Arc<Mutex<HashMap<Uid, Slots<V>>>>,
}

impl<V> Clone for MemoryStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MemoryStore<V> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl<V> StableStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn last_granted(&self, uid: &str) -> Result<Option<SuggestionId>, StorageError> {
        let slots = self.inner.lock().unwrap();
        Ok(slots.get(uid).and_then(|s| s.granted.clone()))
    }

    async fn store_last_granted(
        &self,
        uid: &str,
        sid: SuggestionId,
    ) -> Result<(), StorageError> {
        let mut slots = self.inner.lock().unwrap();
        slots.entry(uid.to_string()).or_default().granted = Some(sid);
        Ok(())
    }

    async fn last_accepted(&self, uid: &str) -> Result<Option<LastAccepted<V>>, StorageError> {
        let slots = self.inner.lock().unwrap();
        Ok(slots.get(uid).and_then(|s| s.accepted.clone()))
    }

    async fn store_last_accepted(
        &self,
        uid: &str,
        data: LastAccepted<V>,
    ) -> Result<(), StorageError> {
        let mut slots = self.inner.lock().unwrap();
        slots.entry(uid.to_string()).or_default().accepted = Some(data);
        Ok(())
    }
}
