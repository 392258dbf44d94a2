//! Store event vocabulary and decoding of inbound wire messages.
//!
//! [`EntityEvent`] is the closed set of transitions a slice responds to.
//! Inbound messages from the transport arrive as JSON objects shaped like
//! `{"type": "machine/createNotify", "payload": ..., "meta": {...}}` and are
//! decoded here into typed events. No I/O happens in this module.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{Entity, ItemStatus, parse_action};
use crate::error::{ApiError, DecodeError};

/// Item action type of an entity, e.g. `PodAction`.
pub type ActionOf<E> = <<E as Entity>::Status as ItemStatus>::Action;

/// The operation an event or an event error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op<A> {
    /// Full-list fetch.
    Fetch,
    /// Single-record fetch.
    Get,
    /// Record creation.
    Create,
    /// Record update.
    Update,
    /// Record deletion.
    Delete,
    /// Focus change for a details view.
    SetActive,
    /// An item-scoped action such as `refresh` or `commission`.
    Action(A),
}

impl<A: Serialize> Op<A> {
    /// Wire name of the operation (`"fetch"`, `"setActive"`, `"refresh"`).
    pub fn name(&self) -> String {
        match self {
            Op::Fetch => "fetch".into(),
            Op::Get => "get".into(),
            Op::Create => "create".into(),
            Op::Update => "update".into(),
            Op::Delete => "delete".into(),
            Op::SetActive => "setActive".into(),
            Op::Action(action) => {
                crate::entity::action_name(action).unwrap_or_else(|| "action".into())
            }
        }
    }
}

/// A failed operation: the error payload plus the keys it concerns.
///
/// `keys` is empty when the failure is not attributable to a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure<K> {
    /// What the server reported.
    pub error: ApiError,
    /// Records the failure concerns.
    pub keys: Vec<K>,
}

impl<K> Failure<K> {
    /// A failure not tied to any record.
    pub fn new(error: impl Into<ApiError>) -> Self {
        Self {
            error: error.into(),
            keys: Vec::new(),
        }
    }

    /// A failure of an operation on the given records.
    pub fn for_keys(error: impl Into<ApiError>, keys: Vec<K>) -> Self {
        Self {
            error: error.into(),
            keys,
        }
    }
}

impl<K> From<ApiError> for Failure<K> {
    fn from(error: ApiError) -> Self {
        Self::new(error)
    }
}

impl<K> From<&str> for Failure<K> {
    fn from(msg: &str) -> Self {
        Self::new(msg)
    }
}

impl<K> From<String> for Failure<K> {
    fn from(msg: String) -> Self {
        Self::new(msg)
    }
}

/// Every transition an [`EntityState`](crate::EntityState) responds to.
///
/// Matched exhaustively by the reducer. Notify variants may originate from
/// this client's own requests or from another session's changes pushed by
/// the server.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityEvent<E: Entity> {
    FetchStart,
    FetchSuccess(Vec<E>),
    FetchError(Failure<E::Key>),

    GetStart,
    GetSuccess(E),
    GetError(Failure<E::Key>),

    CreateStart,
    CreateSuccess,
    CreateError(Failure<E::Key>),
    CreateNotify(E),

    UpdateStart,
    UpdateSuccess,
    UpdateError(Failure<E::Key>),
    UpdateNotify(E),

    DeleteStart,
    DeleteSuccess,
    DeleteError(Failure<E::Key>),
    DeleteNotify(E::Key),

    /// `None` when the server unset the active record.
    SetActiveSuccess(Option<E>),
    SetActiveError(Failure<E::Key>),

    ActionStart {
        action: ActionOf<E>,
        keys: Vec<E::Key>,
    },
    /// `item` carries the refreshed record when the server sends one back.
    ActionSuccess {
        action: ActionOf<E>,
        keys: Vec<E::Key>,
        item: Option<E>,
    },
    ActionError {
        action: ActionOf<E>,
        failure: Failure<E::Key>,
    },

    Cleanup,
}

/// How a terminal event settles the request that caused it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Settlement<'a> {
    /// The request completed.
    Succeeded,
    /// The request failed with this payload.
    Failed(&'a ApiError),
}

impl<E: Entity> EntityEvent<E> {
    /// Wire suffix of the event, e.g. `"createNotify"` or `"refreshStart"`.
    pub fn name(&self) -> String {
        let (op, phase) = match self {
            EntityEvent::FetchStart => (Op::Fetch, "Start"),
            EntityEvent::FetchSuccess(_) => (Op::Fetch, "Success"),
            EntityEvent::FetchError(_) => (Op::Fetch, "Error"),
            EntityEvent::GetStart => (Op::Get, "Start"),
            EntityEvent::GetSuccess(_) => (Op::Get, "Success"),
            EntityEvent::GetError(_) => (Op::Get, "Error"),
            EntityEvent::CreateStart => (Op::Create, "Start"),
            EntityEvent::CreateSuccess => (Op::Create, "Success"),
            EntityEvent::CreateError(_) => (Op::Create, "Error"),
            EntityEvent::CreateNotify(_) => (Op::Create, "Notify"),
            EntityEvent::UpdateStart => (Op::Update, "Start"),
            EntityEvent::UpdateSuccess => (Op::Update, "Success"),
            EntityEvent::UpdateError(_) => (Op::Update, "Error"),
            EntityEvent::UpdateNotify(_) => (Op::Update, "Notify"),
            EntityEvent::DeleteStart => (Op::Delete, "Start"),
            EntityEvent::DeleteSuccess => (Op::Delete, "Success"),
            EntityEvent::DeleteError(_) => (Op::Delete, "Error"),
            EntityEvent::DeleteNotify(_) => (Op::Delete, "Notify"),
            EntityEvent::SetActiveSuccess(_) => (Op::SetActive, "Success"),
            EntityEvent::SetActiveError(_) => (Op::SetActive, "Error"),
            EntityEvent::ActionStart { action, .. } => (Op::Action(*action), "Start"),
            EntityEvent::ActionSuccess { action, .. } => (Op::Action(*action), "Success"),
            EntityEvent::ActionError { action, .. } => (Op::Action(*action), "Error"),
            EntityEvent::Cleanup => return "cleanup".into(),
        };
        format!("{}{phase}", op.name())
    }

    /// `Some` for events that complete a request: every `*Success` and
    /// `*Error`. Start, notify, and cleanup events settle nothing.
    pub fn settlement(&self) -> Option<Settlement<'_>> {
        match self {
            EntityEvent::FetchSuccess(_)
            | EntityEvent::GetSuccess(_)
            | EntityEvent::CreateSuccess
            | EntityEvent::UpdateSuccess
            | EntityEvent::DeleteSuccess
            | EntityEvent::SetActiveSuccess(_)
            | EntityEvent::ActionSuccess { .. } => Some(Settlement::Succeeded),
            EntityEvent::FetchError(f)
            | EntityEvent::GetError(f)
            | EntityEvent::CreateError(f)
            | EntityEvent::UpdateError(f)
            | EntityEvent::DeleteError(f)
            | EntityEvent::SetActiveError(f)
            | EntityEvent::ActionError { failure: f, .. } => Some(Settlement::Failed(&f.error)),
            _ => None,
        }
    }
}

/// An inbound message as delivered by the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// `"<model>/<event>"`, e.g. `"vlan/updateNotify"`.
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub meta: WireMeta,
}

/// Correlation metadata echoed back by the transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMeta {
    /// The record (or records) an item-scoped event concerns. Either full
    /// records, bare keys, or a list of either.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Value>,
    /// Call identifier stamped on the originating request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

impl WireMessage {
    /// Build a message, mostly useful for transports and tests.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            meta: WireMeta::default(),
        }
    }

    /// Attach the record(s) this event concerns.
    pub fn with_item(mut self, item: Value) -> Self {
        self.meta.item = Some(item);
        self
    }

    /// Attach the echoed call identifier.
    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.meta.call_id = Some(call_id.into());
        self
    }

    /// Split `type` into `(model, event)`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::MalformedType`] unless `type` contains exactly
    /// one `/` with non-empty text on both sides.
    pub fn split_type(&self) -> Result<(&str, &str), DecodeError> {
        match self.event_type.split_once('/') {
            Some((model, event)) if !model.is_empty() && !event.is_empty() && !event.contains('/') => {
                Ok((model, event))
            }
            _ => Err(DecodeError::MalformedType(self.event_type.clone())),
        }
    }
}

/// Decode the event part of a wire message for entity type `E`.
///
/// `event` is the suffix after the model name. Returns `Ok(None)` for event
/// names this slice does not know, so that newer servers can send events an
/// older client ignores.
///
/// Item actions declared by the entity's status type take precedence over
/// the generic vocabulary: a model that declares a `delete` action receives
/// `deleteStart` as [`EntityEvent::ActionStart`], so the per-item flag is
/// tracked instead of the global `saving` flag.
///
/// # Errors
///
/// Returns [`DecodeError::Payload`] if the event is known but its payload
/// or `meta.item` does not have the expected shape.
pub fn decode_event<E: Entity>(
    event: &str,
    msg: &WireMessage,
) -> Result<Option<EntityEvent<E>>, DecodeError> {
    if let Some(decoded) = decode_action_event::<E>(event, msg)? {
        return Ok(Some(decoded));
    }

    let decoded = match event {
        "fetchStart" => EntityEvent::FetchStart,
        "fetchSuccess" => EntityEvent::FetchSuccess(decode_payload(msg)?),
        "fetchError" => EntityEvent::FetchError(decode_failure::<E>(msg)?),
        "getStart" => EntityEvent::GetStart,
        "getSuccess" => EntityEvent::GetSuccess(decode_payload(msg)?),
        "getError" => EntityEvent::GetError(decode_failure::<E>(msg)?),
        "createStart" => EntityEvent::CreateStart,
        "createSuccess" => EntityEvent::CreateSuccess,
        "createError" => EntityEvent::CreateError(decode_failure::<E>(msg)?),
        "createNotify" => EntityEvent::CreateNotify(decode_payload(msg)?),
        "updateStart" => EntityEvent::UpdateStart,
        "updateSuccess" => EntityEvent::UpdateSuccess,
        "updateError" => EntityEvent::UpdateError(decode_failure::<E>(msg)?),
        "updateNotify" => EntityEvent::UpdateNotify(decode_payload(msg)?),
        "deleteStart" => EntityEvent::DeleteStart,
        "deleteSuccess" => EntityEvent::DeleteSuccess,
        "deleteError" => EntityEvent::DeleteError(decode_failure::<E>(msg)?),
        "deleteNotify" => EntityEvent::DeleteNotify(decode_payload(msg)?),
        "setActiveSuccess" => EntityEvent::SetActiveSuccess(decode_payload(msg)?),
        "setActiveError" => EntityEvent::SetActiveError(decode_failure::<E>(msg)?),
        "cleanup" => EntityEvent::Cleanup,
        _ => return Ok(None),
    };
    Ok(Some(decoded))
}

fn payload_error(msg: &WireMessage, source: serde_json::Error) -> DecodeError {
    DecodeError::Payload {
        event_type: msg.event_type.clone(),
        source,
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(msg: &WireMessage) -> Result<T, DecodeError> {
    serde_json::from_value(msg.payload.clone()).map_err(|e| payload_error(msg, e))
}

fn decode_keys<E: Entity>(msg: &WireMessage) -> Result<Vec<E::Key>, DecodeError> {
    keys_from_meta::<E>(&msg.meta).map_err(|e| payload_error(msg, e))
}

fn decode_failure<E: Entity>(msg: &WireMessage) -> Result<Failure<E::Key>, DecodeError> {
    Ok(Failure {
        error: decode_payload(msg)?,
        keys: decode_keys::<E>(msg)?,
    })
}

/// Decode `<action>Start`, `<action>Success`, and `<action>Error`.
fn decode_action_event<E: Entity>(
    event: &str,
    msg: &WireMessage,
) -> Result<Option<EntityEvent<E>>, DecodeError> {
    if !<E::Status as ItemStatus>::TRACKED {
        return Ok(None);
    }

    let Some((name, phase)) = ["Start", "Success", "Error"]
        .into_iter()
        .find_map(|phase| event.strip_suffix(phase).map(|name| (name, phase)))
    else {
        return Ok(None);
    };
    let Some(action) = parse_action::<ActionOf<E>>(name) else {
        return Ok(None);
    };

    let decoded = match phase {
        "Start" => EntityEvent::ActionStart {
            action,
            keys: decode_keys::<E>(msg)?,
        },
        "Success" => EntityEvent::ActionSuccess {
            action,
            keys: decode_keys::<E>(msg)?,
            // Bulk actions answer with a summary rather than a record.
            item: serde_json::from_value(msg.payload.clone()).ok(),
        },
        _ => EntityEvent::ActionError {
            action,
            failure: decode_failure::<E>(msg)?,
        },
    };
    Ok(Some(decoded))
}

/// Read the primary keys out of `meta.item`.
///
/// Accepts a full record (the key is read from its `PRIMARY_KEY` field), a
/// bare key, or an array of either.
pub(crate) fn keys_from_meta<E: Entity>(meta: &WireMeta) -> serde_json::Result<Vec<E::Key>> {
    fn one<E: Entity>(value: &Value) -> serde_json::Result<E::Key> {
        match value {
            Value::Object(map) => {
                let key = map.get(E::PRIMARY_KEY).cloned().unwrap_or(Value::Null);
                serde_json::from_value(key)
            }
            other => serde_json::from_value(other.clone()),
        }
    }

    match &meta.item {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(one::<E>).collect(),
        Some(item) => Ok(vec![one::<E>(item)?]),
    }
}
