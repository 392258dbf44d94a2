//! The running store: a single task that owns every slice and the
//! correlator, plus the cloneable handle views use to talk to it.
//!
//! All state changes are serialized through one `mpsc` channel, so events
//! apply in the order the store receives them and no locking is needed.
//! Outbound requests are handed to the transport over a second channel
//! ([`Outbound`]); inbound messages come back through
//! [`StoreHandle::receive`].
//!
//! The store task never waits on the transport. Requests that do not fit
//! in the outbound channel are queued inside the task and handed over as
//! soon as the transport frees a slot.

use std::collections::VecDeque;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::{ReceiverStream, WatchStream};
use tracing::Instrument;

use crate::correlator::{CallId, Correlator, Intent, Ticket};
use crate::entity::Entity;
use crate::error::{DecodeError, StoreError};
use crate::event::{ActionOf, EntityEvent, WireMessage};
use crate::request::Request;
use crate::root::{Receipt, RootState};
use crate::state::EntityState;

/// Default capacity of the handle-to-store message channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Default capacity of the store-to-transport request channel.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Tuning knobs for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Messages a handle can queue before `send` waits.
    pub channel_capacity: usize,
    /// Requests the transport can leave unread before further requests
    /// queue inside the store task.
    pub outbound_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

type ReadFn = Box<dyn FnOnce(&RootState) + Send>;
type ApplyFn = Box<dyn FnOnce(&mut RootState) -> Result<(), StoreError> + Send>;

/// Messages sent from [`StoreHandle`] to the store task.
enum StoreMessage {
    Dispatch {
        request: Request,
        reply: oneshot::Sender<Result<Ticket, StoreError>>,
    },
    Receive {
        message: WireMessage,
        reply: oneshot::Sender<Result<Receipt, DecodeError>>,
    },
    /// Apply a locally originated event.
    Apply {
        apply: ApplyFn,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    /// Run a read-only closure against the current state.
    Read(ReadFn),
    Forget {
        call_id: CallId,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

struct StoreActor {
    root: RootState,
    correlator: Correlator,
    outbound: mpsc::Sender<Request>,
    /// Requests waiting for room in the outbound channel, oldest first.
    backlog: VecDeque<Request>,
    revision: watch::Sender<u64>,
}

impl StoreActor {
    async fn run(mut self, mut rx: mpsc::Receiver<StoreMessage>) {
        tracing::info!(root = ?self.root, "entity store started");
        loop {
            let msg = tokio::select! {
                msg = rx.recv() => msg,
                permit = self.outbound.reserve(), if !self.backlog.is_empty() => {
                    match permit {
                        Ok(permit) => {
                            if let Some(request) = self.backlog.pop_front() {
                                permit.send(request);
                            }
                        }
                        Err(_) => {
                            tracing::warn!(
                                dropped = self.backlog.len(),
                                "transport closed with requests still queued"
                            );
                            self.backlog.clear();
                        }
                    }
                    continue;
                }
            };
            let Some(msg) = msg else { break };
            match msg {
                StoreMessage::Dispatch { request, reply } => {
                    let result = self.dispatch(request);
                    // A caller that stopped waiting does not need the ticket.
                    let _ = reply.send(result);
                }
                StoreMessage::Receive { message, reply } => {
                    let _ = reply.send(self.receive(message));
                }
                StoreMessage::Apply { apply, reply } => {
                    let _ = reply.send(apply(&mut self.root));
                }
                StoreMessage::Read(read) => read(&self.root),
                StoreMessage::Forget { call_id, reply } => {
                    let _ = reply.send(self.correlator.forget(&call_id));
                }
                StoreMessage::Shutdown => break,
            }
            self.publish();
        }
        tracing::info!(
            pending = self.correlator.len(),
            unsent = self.backlog.len(),
            "entity store stopped"
        );
    }

    fn dispatch(&mut self, mut request: Request) -> Result<Ticket, StoreError> {
        if !self.root.is_registered(request.model()) {
            return Err(StoreError::UnknownModel(request.model().to_owned()));
        }
        let call_id = *request.meta.call_id.get_or_insert_with(CallId::new);
        let intent = Intent {
            model: request.model().to_owned(),
            method: request.method().clone(),
        };

        self.forward(request.clone())?;
        self.correlator.prune_closed();
        let ticket = self.correlator.issue(call_id, intent);
        self.root.dispatched(&request)?;
        tracing::debug!(
            model = request.model(),
            method = %request.method(),
            %call_id,
            "request dispatched"
        );
        Ok(ticket)
    }

    /// Hand `request` to the transport without waiting. Requests queue
    /// behind the backlog so the transport sees them in dispatch order.
    fn forward(&mut self, request: Request) -> Result<(), StoreError> {
        if self.outbound.is_closed() {
            return Err(StoreError::TransportClosed);
        }
        if !self.backlog.is_empty() {
            self.backlog.push_back(request);
            return Ok(());
        }
        match self.outbound.try_send(request) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(request)) => {
                tracing::debug!(
                    queued = self.backlog.len() + 1,
                    "outbound channel full, queueing request"
                );
                self.backlog.push_back(request);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(StoreError::TransportClosed),
        }
    }

    fn receive(&mut self, message: WireMessage) -> Result<Receipt, DecodeError> {
        let receipt = self.root.receive(&message).inspect_err(|e| {
            tracing::warn!(
                event_type = %message.event_type,
                error = %e,
                "rejected inbound message"
            );
        })?;

        if let (Some(call_id), Some(outcome)) = (receipt.call_id, &receipt.outcome)
            && !self.correlator.settle(&call_id, outcome.clone())
        {
            tracing::debug!(
                %call_id,
                event_type = %message.event_type,
                "no pending request for call id"
            );
        }
        Ok(receipt)
    }

    fn publish(&self) {
        let revision = self.root.revision();
        self.revision.send_if_modified(|current| {
            if *current == revision {
                return false;
            }
            *current = revision;
            true
        });
    }
}

/// Receiving end of outbound requests, held by the transport layer.
#[derive(Debug)]
pub struct Outbound {
    rx: mpsc::Receiver<Request>,
}

impl Outbound {
    /// Next request to send. `None` once the store has stopped.
    pub async fn recv(&mut self) -> Option<Request> {
        self.rx.recv().await
    }

    /// A queued request, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<Request> {
        self.rx.try_recv().ok()
    }

    /// Consume the receiver as a [`Stream`](tokio_stream::Stream) of requests.
    pub fn into_stream(self) -> ReceiverStream<Request> {
        ReceiverStream::new(self.rx)
    }
}

/// Cloneable async handle to a running store.
///
/// Every method sends one message to the store task. Once the task has
/// exited, methods return [`StoreError::Closed`].
#[derive(Debug, Clone)]
pub struct StoreHandle {
    sender: mpsc::Sender<StoreMessage>,
    revision: watch::Receiver<u64>,
}

impl std::fmt::Debug for StoreMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StoreMessage::Dispatch { .. } => "Dispatch",
            StoreMessage::Receive { .. } => "Receive",
            StoreMessage::Apply { .. } => "Apply",
            StoreMessage::Read(_) => "Read",
            StoreMessage::Forget { .. } => "Forget",
            StoreMessage::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

impl StoreHandle {
    async fn send(&self, msg: StoreMessage) -> Result<(), StoreError> {
        self.sender.send(msg).await.map_err(|_| StoreError::Closed)
    }

    /// Send a request to the transport and start tracking it.
    ///
    /// Stamps a fresh [`CallId`] unless the request already carries one,
    /// applies the request's start event (e.g. `saving = true` for an
    /// update), and returns a [`Ticket`] that settles when the transport
    /// echoes the call id on a terminal event.
    ///
    /// # Errors
    ///
    /// * [`StoreError::UnknownModel`] -- the request's model is not registered.
    /// * [`StoreError::TransportClosed`] -- the [`Outbound`] receiver was dropped.
    /// * [`StoreError::Closed`] -- the store task has exited.
    pub async fn dispatch(&self, request: Request) -> Result<Ticket, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreMessage::Dispatch { request, reply }).await?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Fetch the full list of `E` records.
    pub async fn fetch<E: Entity>(&self) -> Result<Ticket, StoreError> {
        self.dispatch(Request::fetch::<E>()).await
    }

    /// Fetch one `E` record by key.
    pub async fn get<E: Entity>(&self, key: &E::Key) -> Result<Ticket, StoreError> {
        self.dispatch(Request::get::<E>(key)?).await
    }

    /// Create an `E` record from `params`.
    pub async fn create<E: Entity>(&self, params: &E::CreateParams) -> Result<Ticket, StoreError> {
        self.dispatch(Request::create::<E>(params)?).await
    }

    /// Update an `E` record. `params` carries the key.
    pub async fn update<E: Entity>(&self, params: &E::UpdateParams) -> Result<Ticket, StoreError> {
        self.dispatch(Request::update::<E>(params)?).await
    }

    /// Delete the `E` record with `key`.
    pub async fn delete<E: Entity>(&self, key: &E::Key) -> Result<Ticket, StoreError> {
        self.dispatch(Request::delete::<E>(key)?).await
    }

    /// Focus a record (or clear the focus with `None`).
    pub async fn set_active<E: Entity>(&self, key: Option<&E::Key>) -> Result<Ticket, StoreError> {
        self.dispatch(Request::set_active::<E>(key)?).await
    }

    /// Run an item action on `keys`. See [`Request::action`].
    pub async fn action<E: Entity>(
        &self,
        action: ActionOf<E>,
        keys: &[E::Key],
        extra: Value,
    ) -> Result<Ticket, StoreError> {
        self.dispatch(Request::action::<E>(action, keys, extra)?).await
    }

    /// Feed an inbound message from the transport into the store.
    ///
    /// # Errors
    ///
    /// * [`StoreError::Decode`] -- the message could not be routed or decoded;
    ///   the state is unchanged.
    /// * [`StoreError::Closed`] -- the store task has exited.
    pub async fn receive(&self, message: WireMessage) -> Result<Receipt, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreMessage::Receive { message, reply }).await?;
        Ok(rx.await.map_err(|_| StoreError::Closed)??)
    }

    /// Parse a JSON text frame and feed it into the store.
    pub async fn receive_json(&self, text: &str) -> Result<Receipt, StoreError> {
        let message: WireMessage = serde_json::from_str(text).map_err(DecodeError::from)?;
        self.receive(message).await
    }

    /// Apply a locally originated event to `E`'s slice.
    pub async fn apply<E: Entity>(&self, event: EntityEvent<E>) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        let apply: ApplyFn = Box::new(move |root| root.apply(&event));
        self.send(StoreMessage::Apply { apply, reply }).await?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Clear `E`'s errors and save flags, e.g. when a form closes.
    pub async fn cleanup<E: Entity>(&self) -> Result<(), StoreError> {
        self.apply(EntityEvent::<E>::Cleanup).await
    }

    /// Run `f` against the current state and return its result.
    ///
    /// `f` runs on the store task, so it should be quick; copy out what you
    /// need rather than doing heavy work inside.
    pub async fn select<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&RootState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let read: ReadFn = Box::new(move |root| {
            let _ = tx.send(f(root));
        });
        self.send(StoreMessage::Read(read)).await?;
        rx.await.map_err(|_| StoreError::Closed)
    }

    /// A snapshot of `E`'s slice.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownModel`] if `E` is not registered.
    pub async fn state<E: Entity>(&self) -> Result<EntityState<E>, StoreError> {
        self.select(|root| root.slice::<E>().cloned())
            .await?
            .ok_or_else(|| StoreError::UnknownModel(E::MODEL.to_owned()))
    }

    /// Stop tracking a request. Its ticket then reports
    /// [`StoreError::Untracked`]; the eventual response still updates the
    /// slice.
    pub async fn forget(&self, call_id: CallId) -> Result<bool, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreMessage::Forget { call_id, reply }).await?;
        rx.await.map_err(|_| StoreError::Closed)
    }

    /// Watch the store's revision counter. It changes after every message
    /// that applied at least one event.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.clone()
    }

    /// Stream of revision changes, starting with the current revision.
    pub fn changes(&self) -> WatchStream<u64> {
        WatchStream::new(self.revision.clone())
    }

    /// Ask the store task to stop. Pending tickets report
    /// [`StoreError::Untracked`].
    pub async fn shutdown(&self) {
        // Already stopped is fine.
        let _ = self.sender.send(StoreMessage::Shutdown).await;
    }

    /// `true` while the store task is running.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Builder for a running store.
///
/// # Examples
///
/// ```no_run
/// use entity_store::{Entity, NoStatus, StoreBuilder};
/// use serde::{Deserialize, Serialize};
/// use serde_json::Value;
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Vlan {
///     id: u32,
///     vid: u16,
/// }
///
/// impl Entity for Vlan {
///     const MODEL: &'static str = "vlan";
///     type Key = u32;
///     type CreateParams = Value;
///     type UpdateParams = Value;
///     type Status = NoStatus;
///
///     fn key(&self) -> u32 {
///         self.id
///     }
/// }
///
/// # async fn run() -> Result<(), entity_store::StoreError> {
/// let (store, mut outbound) = StoreBuilder::new().model::<Vlan>().open();
/// let ticket = store.fetch::<Vlan>().await?;
/// let request = outbound.recv().await;
/// assert_eq!(request.map(|r| r.request_type), Some("vlan/fetch".to_string()));
/// # drop(ticket);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct StoreBuilder {
    root: RootState,
    config: StoreConfig,
}

impl StoreBuilder {
    /// A builder with default capacities and no models.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slice for `E`.
    pub fn model<E: Entity>(mut self) -> Self {
        self.root.register::<E>();
        self
    }

    /// Capacity of the handle-to-store channel.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Capacity of the store-to-transport channel.
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_capacity = capacity;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the store task.
    ///
    /// Returns the handle for views and the request receiver for the
    /// transport. Capacities of zero are raised to one.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn open(self) -> (StoreHandle, Outbound) {
        let (sender, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let (revision_tx, revision_rx) = watch::channel(self.root.revision());

        let actor = StoreActor {
            root: self.root,
            correlator: Correlator::new(),
            outbound: outbound_tx,
            backlog: VecDeque::new(),
            revision: revision_tx,
        };
        tokio::spawn(actor.run(rx).instrument(tracing::info_span!("entity_store")));

        (
            StoreHandle {
                sender,
                revision: revision_rx,
            },
            Outbound { rx: outbound_rx },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::Outcome;
    use crate::entity::test_fixtures::{Node, NodeAction, Zone, ZoneParams, zone};
    use crate::request::Method;
    use serde_json::json;
    use std::time::Duration;

    fn open() -> (StoreHandle, Outbound) {
        StoreBuilder::new().model::<Zone>().model::<Node>().open()
    }

    #[test]
    fn default_config_uses_constants() {
        let config = StoreConfig::default();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.outbound_capacity, DEFAULT_OUTBOUND_CAPACITY);
    }

    #[test]
    fn builder_setters_override_defaults() {
        let builder = StoreBuilder::new().channel_capacity(8).outbound_capacity(2);
        assert_eq!(
            builder.config,
            StoreConfig {
                channel_capacity: 8,
                outbound_capacity: 2,
            }
        );
    }

    #[tokio::test]
    async fn dispatch_stamps_call_id_and_forwards_request() {
        let (store, mut outbound) = open();
        let ticket = store
            .create::<Zone>(&ZoneParams { name: "a".into() })
            .await
            .unwrap();

        let sent = outbound.recv().await.unwrap();
        assert_eq!(sent.call_id(), Some(ticket.call_id()));
        assert_eq!(sent.method(), &Method::Create);

        let zones = store.state::<Zone>().await.unwrap();
        assert!(zones.saving());
    }

    #[tokio::test]
    async fn dispatch_keeps_existing_call_id() {
        let (store, mut outbound) = open();
        let call_id = CallId::new();
        let ticket = store
            .dispatch(Request::fetch::<Zone>().with_call_id(call_id))
            .await
            .unwrap();
        assert_eq!(ticket.call_id(), call_id);
        assert_eq!(outbound.recv().await.unwrap().call_id(), Some(call_id));
    }

    #[tokio::test]
    async fn dispatch_to_unregistered_model_fails() {
        let (store, mut outbound) = StoreBuilder::new().model::<Zone>().open();
        let err = store.fetch::<Node>().await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownModel(ref m) if m == "node"));
        assert!(outbound.try_recv().is_none());
    }

    #[tokio::test]
    async fn dispatch_after_transport_dropped_fails() {
        let (store, outbound) = open();
        drop(outbound);
        let err = store.fetch::<Zone>().await.unwrap_err();
        assert!(matches!(err, StoreError::TransportClosed));
        assert!(!store.state::<Zone>().await.unwrap().loading());
    }

    #[tokio::test]
    async fn dispatch_queues_when_outbound_is_full() {
        let (store, mut outbound) = StoreBuilder::new()
            .model::<Zone>()
            .outbound_capacity(1)
            .open();

        let mut tickets = Vec::new();
        for _ in 0..3 {
            tickets.push(store.fetch::<Zone>().await.unwrap());
        }
        assert!(store.state::<Zone>().await.unwrap().loading());

        for ticket in &tickets {
            let sent = outbound.recv().await.unwrap();
            assert_eq!(sent.call_id(), Some(ticket.call_id()));
        }
    }

    #[tokio::test]
    async fn transport_feeding_answers_back_never_stalls() {
        let (store, mut outbound) = StoreBuilder::new()
            .model::<Zone>()
            .outbound_capacity(1)
            .open();
        let transport = store.clone();
        tokio::spawn(async move {
            while let Some(request) = outbound.recv().await {
                let call_id = request.call_id().map(|id| id.to_string()).unwrap_or_default();
                let answer = WireMessage::new("zone/fetchSuccess", json!([])).with_call_id(call_id);
                if transport.receive(answer).await.is_err() {
                    break;
                }
            }
        });

        let fetches: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.fetch::<Zone>().await?.outcome().await })
            })
            .collect();
        let outcomes = tokio::time::timeout(Duration::from_secs(5), async {
            let mut outcomes = Vec::new();
            for fetch in fetches {
                outcomes.push(fetch.await.unwrap());
            }
            outcomes
        })
        .await
        .expect("every fetch settles");

        assert_eq!(outcomes.len(), 20);
        assert!(outcomes.into_iter().all(|o| o.unwrap().is_success()));
    }

    #[tokio::test]
    async fn dispatch_prunes_dropped_tickets() {
        let (store, _outbound) = open();
        let abandoned = store.fetch::<Zone>().await.unwrap().call_id();
        let _kept = store.fetch::<Zone>().await.unwrap();
        assert!(!store.forget(abandoned).await.unwrap());
    }

    #[tokio::test]
    async fn echoed_call_id_settles_ticket() {
        let (store, _outbound) = open();
        let ticket = store.fetch::<Zone>().await.unwrap();
        let call_id = ticket.call_id();

        let receipt = store
            .receive(
                WireMessage::new("zone/fetchSuccess", json!([{"id": 1, "name": "a"}]))
                    .with_call_id(call_id.to_string()),
            )
            .await
            .unwrap();
        assert!(receipt.applied);

        assert_eq!(
            ticket.outcome().await.unwrap(),
            Outcome::Succeeded(json!([{"id": 1, "name": "a"}]))
        );
        assert_eq!(store.state::<Zone>().await.unwrap().items(), &[zone(1, "a")]);
    }

    #[tokio::test]
    async fn receive_json_rejects_invalid_text() {
        let (store, _outbound) = open();
        let err = store.receive_json("{not json").await.unwrap_err();
        assert!(matches!(err, StoreError::Decode(DecodeError::Json(_))));

        let receipt = store
            .receive_json(r#"{"type": "zone/deleteNotify", "payload": 3}"#)
            .await
            .unwrap();
        assert_eq!(receipt.event, "deleteNotify");
    }

    #[tokio::test]
    async fn cleanup_clears_errors() {
        let (store, _outbound) = open();
        store
            .receive(WireMessage::new("zone/createError", json!("Name taken")))
            .await
            .unwrap();
        assert!(store.state::<Zone>().await.unwrap().errors().is_some());

        store.cleanup::<Zone>().await.unwrap();
        assert!(store.state::<Zone>().await.unwrap().errors().is_none());
    }

    #[tokio::test]
    async fn action_request_sets_item_status() {
        let (store, mut outbound) = open();
        store
            .receive(WireMessage::new(
                "node/fetchSuccess",
                json!([{"system_id": "abc", "hostname": "one"}]),
            ))
            .await
            .unwrap();

        store
            .action::<Node>(NodeAction::Refresh, &["abc".to_string()], Value::Null)
            .await
            .unwrap();
        assert_eq!(outbound.recv().await.unwrap().request_type, "node/refresh");

        let refreshing = store
            .select(|root| {
                root.slice::<Node>()
                    .and_then(|nodes| nodes.statuses().get("abc").map(|s| s.refreshing))
            })
            .await
            .unwrap();
        assert_eq!(refreshing, Some(true));
    }

    #[tokio::test]
    async fn forget_detaches_ticket() {
        let (store, _outbound) = open();
        let ticket = store.fetch::<Zone>().await.unwrap();
        assert!(store.forget(ticket.call_id()).await.unwrap());
        assert!(matches!(
            ticket.outcome().await,
            Err(StoreError::Untracked(_))
        ));
    }

    #[tokio::test]
    async fn subscribe_observes_revisions() {
        let (store, _outbound) = open();
        let mut revisions = store.subscribe();
        assert_eq!(*revisions.borrow_and_update(), 0);

        store
            .receive(WireMessage::new("zone/deleteNotify", json!(1)))
            .await
            .unwrap();
        revisions.changed().await.unwrap();
        assert_eq!(*revisions.borrow_and_update(), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_handle() {
        let (store, _outbound) = open();
        let ticket = store.fetch::<Zone>().await.unwrap();
        store.shutdown().await;

        assert!(matches!(
            ticket.outcome().await,
            Err(StoreError::Untracked(_))
        ));
        assert!(matches!(
            store.state::<Zone>().await,
            Err(StoreError::Closed)
        ));
        assert!(!store.is_alive());
    }
}
