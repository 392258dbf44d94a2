//! Entity trait and per-item status flags.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// A record type cached by the store.
///
/// The implementing type is the record itself, as delivered by the backend.
/// One [`EntityState`](crate::EntityState) slice exists per implementing
/// type, and every event addressed to `"{MODEL}/..."` is routed to it.
///
/// # Contract
///
/// - [`key`](Entity::key) must be stable for the lifetime of a record: two
///   versions of the same record always return equal keys.
/// - `PRIMARY_KEY` names the JSON field that holds the key on the wire
///   (`"id"` for most models, `"system_id"` for nodes). It is used to read
///   keys out of request/response metadata and to build request params.
pub trait Entity:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Model name as used by the backend (e.g. `"machine"`, `"vlan"`).
    const MODEL: &'static str;

    /// Wire name of the primary-key field.
    const PRIMARY_KEY: &'static str = "id";

    /// Whether item-scoped failures are recorded in `event_errors`.
    const TRACKS_EVENT_ERRORS: bool = false;

    /// Primary-key type.
    type Key: Clone
        + Debug
        + Display
        + Eq
        + Hash
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Parameters of a `create` request.
    type CreateParams: Serialize + Send + 'static;

    /// Parameters of an `update` request.
    type UpdateParams: Serialize + Send + 'static;

    /// Per-item in-flight flags. Use [`NoStatus`] for models without any.
    type Status: ItemStatus;

    /// Returns the record's primary key.
    fn key(&self) -> Self::Key;
}

/// Per-item operation flags, e.g. `{ deleting, refreshing }`.
///
/// Each item action maps onto exactly one flag. Action enums are expected to
/// serialize as camelCase strings (`#[serde(rename_all = "camelCase")]`),
/// since the serialized name doubles as the wire event prefix
/// (`"pod/refreshStart"`) and the outbound method name.
pub trait ItemStatus: Clone + Debug + Default + PartialEq + Send + Sync + 'static {
    /// Closed set of item-scoped actions.
    type Action: Copy
        + Debug
        + Eq
        + Hash
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// `false` for models that keep no per-item statuses at all.
    const TRACKED: bool = true;

    /// Set or clear the flag belonging to `action`.
    fn set(&mut self, action: Self::Action, in_flight: bool);

    /// Read the flag belonging to `action`.
    fn get(&self, action: Self::Action) -> bool;

    /// `true` if any flag is set.
    fn is_processing(&self) -> bool;
}

/// Status type for models without per-item statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoStatus;

/// Action type of [`NoStatus`]. Uninhabited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoAction {}

impl ItemStatus for NoStatus {
    type Action = NoAction;

    const TRACKED: bool = false;

    fn set(&mut self, action: NoAction, _in_flight: bool) {
        match action {}
    }

    fn get(&self, action: NoAction) -> bool {
        match action {}
    }

    fn is_processing(&self) -> bool {
        false
    }
}

/// Wire name of an item action, e.g. `"refresh"`.
///
/// Returns `None` if the action does not serialize to a JSON string.
pub(crate) fn action_name<A: Serialize>(action: &A) -> Option<String> {
    match serde_json::to_value(action) {
        Ok(serde_json::Value::String(name)) => Some(name),
        _ => None,
    }
}

/// Parse a wire action name back into the typed action.
pub(crate) fn parse_action<A: DeserializeOwned>(name: &str) -> Option<A> {
    serde_json::from_value(serde_json::Value::String(name.to_owned())).ok()
}
