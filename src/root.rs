//! Root state: one slice per registered entity model.
//!
//! Slices are stored type-erased behind [`Slice`] so that inbound messages,
//! which only name their model as a string, can be routed without knowing
//! the entity type. Typed access goes through [`RootState::slice`].

use std::any::Any;
use std::collections::HashMap;

use crate::correlator::{CallId, Outcome};
use crate::entity::Entity;
use crate::error::{DecodeError, StoreError};
use crate::event::{EntityEvent, Settlement, WireMessage, decode_event};
use crate::request::{Request, start_event};
use crate::state::EntityState;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    /// Model the message was routed to.
    pub model: String,
    /// Event part of the message type, e.g. `"createNotify"`.
    pub event: String,
    /// `false` when the slice does not know the event and skipped it.
    pub applied: bool,
    /// Parsed call identifier echoed by the transport.
    pub call_id: Option<CallId>,
    /// Set for terminal events (`*Success`, `*Error`).
    pub outcome: Option<Outcome>,
}

/// Result of routing a message into a slice.
pub(crate) enum Routed {
    Skipped,
    Applied(Option<Outcome>),
}

/// Type-erased interface over an [`EntityState`] slice.
///
/// `TypedSlice<E>` implements this for each registered entity, decoding
/// wire messages into `EntityEvent<E>` before applying them.
pub(crate) trait Slice: Send {
    /// Decode and apply an inbound message.
    fn receive(&mut self, event: &str, msg: &WireMessage) -> Result<Routed, DecodeError>;

    /// Apply the start event for an outbound request. Returns `false` when
    /// the request has no start phase.
    fn dispatched(&mut self, request: &Request) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct TypedSlice<E: Entity> {
    state: EntityState<E>,
}

impl<E: Entity> TypedSlice<E> {
    fn new() -> Self {
        Self {
            state: EntityState::default(),
        }
    }
}

impl<E: Entity> Slice for TypedSlice<E> {
    fn receive(&mut self, event: &str, msg: &WireMessage) -> Result<Routed, DecodeError> {
        let Some(decoded) = decode_event::<E>(event, msg)? else {
            return Ok(Routed::Skipped);
        };
        let outcome = decoded.settlement().map(|settlement| match settlement {
            Settlement::Succeeded => Outcome::success(msg.payload.clone()),
            Settlement::Failed(error) => Outcome::Failed(error.clone()),
        });
        self.state.apply(&decoded);
        Ok(Routed::Applied(outcome))
    }

    fn dispatched(&mut self, request: &Request) -> bool {
        match start_event::<E>(request) {
            Some(event) => {
                self.state.apply(&event);
                true
            }
            None => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Every registered slice, keyed by model name.
#[derive(Default)]
pub struct RootState {
    slices: HashMap<&'static str, Box<dyn Slice>>,
    revision: u64,
}

impl RootState {
    /// A root with no registered models.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slice for `E`. Registering the same model twice keeps
    /// the existing slice.
    pub fn register<E: Entity>(&mut self) -> &mut Self {
        if self.slices.contains_key(E::MODEL) {
            tracing::warn!(model = E::MODEL, "model registered twice, keeping first slice");
        } else {
            self.slices.insert(E::MODEL, Box::new(TypedSlice::<E>::new()));
        }
        self
    }

    /// Builder-style [`register`](RootState::register).
    pub fn with_model<E: Entity>(mut self) -> Self {
        self.register::<E>();
        self
    }

    /// `true` if a slice exists for `model`.
    pub fn is_registered(&self, model: &str) -> bool {
        self.slices.contains_key(model)
    }

    /// Names of every registered model, in no particular order.
    pub fn models(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slices.keys().copied()
    }

    /// Total number of events applied across all slices.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The slice for `E`, or `None` if `E` was never registered.
    pub fn slice<E: Entity>(&self) -> Option<&EntityState<E>> {
        self.slices
            .get(E::MODEL)?
            .as_any()
            .downcast_ref::<TypedSlice<E>>()
            .map(|typed| &typed.state)
    }

    /// Apply a locally originated event (e.g. `cleanup`) to `E`'s slice.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownModel`] if `E` is not registered.
    pub fn apply<E: Entity>(&mut self, event: &EntityEvent<E>) -> Result<(), StoreError> {
        let typed = self
            .slices
            .get_mut(E::MODEL)
            .and_then(|slice| slice.as_any_mut().downcast_mut::<TypedSlice<E>>())
            .ok_or_else(|| StoreError::UnknownModel(E::MODEL.to_owned()))?;
        typed.state.apply(event);
        self.revision += 1;
        Ok(())
    }

    /// Route an inbound message to its slice.
    ///
    /// Events a slice does not recognise are skipped and reported with
    /// `applied: false`. A call identifier that is not a valid [`CallId`]
    /// is logged and dropped; the event itself is still applied.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the message type is malformed, names an
    /// unregistered model, or carries a payload of the wrong shape. The
    /// state is left unchanged in every error case.
    pub fn receive(&mut self, msg: &WireMessage) -> Result<Receipt, DecodeError> {
        let (model, event) = msg.split_type()?;
        let slice = self
            .slices
            .get_mut(model)
            .ok_or_else(|| DecodeError::UnknownModel(model.to_owned()))?;

        let call_id = msg.meta.call_id.as_deref().and_then(|raw| {
            raw.parse::<CallId>()
                .inspect_err(|e| {
                    tracing::warn!(call_id = raw, error = %e, "ignoring malformed call id");
                })
                .ok()
        });

        let (applied, outcome) = match slice.receive(event, msg)? {
            Routed::Skipped => {
                tracing::debug!(model, event, "skipping unknown event");
                (false, None)
            }
            Routed::Applied(outcome) => {
                tracing::debug!(model, event, "event applied");
                self.revision += 1;
                (true, outcome)
            }
        };

        Ok(Receipt {
            model: model.to_owned(),
            event: event.to_owned(),
            applied,
            call_id,
            outcome,
        })
    }

    /// Apply the start event of an outbound request.
    pub(crate) fn dispatched(&mut self, request: &Request) -> Result<(), StoreError> {
        let slice = self
            .slices
            .get_mut(request.model())
            .ok_or_else(|| StoreError::UnknownModel(request.model().to_owned()))?;
        if slice.dispatched(request) {
            self.revision += 1;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RootState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut models: Vec<&str> = self.models().collect();
        models.sort_unstable();
        f.debug_struct("RootState")
            .field("models", &models)
            .field("revision", &self.revision)
            .finish()
    }
}
