//! Outbound request envelope handed to the transport layer.
//!
//! A [`Request`] serializes to the shape the transport consumes:
//!
//! ```json
//! { "type": "vlan/update",
//!   "meta": { "model": "vlan", "method": "update", "callId": "..." },
//!   "payload": { "params": { "id": 5, "name": "storage" } } }
//! ```

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::correlator::CallId;
use crate::entity::{Entity, ItemStatus, action_name, parse_action};
use crate::event::{ActionOf, EntityEvent, WireMeta, keys_from_meta};

/// Backend method a request invokes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// Full list of records.
    List,
    /// One record by key.
    Get,
    /// Create a record.
    Create,
    /// Update a record.
    Update,
    /// Delete a record.
    Delete,
    /// Focus a record.
    SetActive,
    /// Any model-specific method, e.g. `"refresh"` or `"compose"`.
    Custom(String),
}

impl Method {
    /// Wire name of the method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::List => "list",
            Method::Get => "get",
            Method::Create => "create",
            Method::Update => "update",
            Method::Delete => "delete",
            Method::SetActive => "set_active",
            Method::Custom(name) => name,
        }
    }

    /// Action-name part of the request `type` (`"fetch"` for `list`).
    fn action(&self) -> &str {
        match self {
            Method::List => "fetch",
            Method::SetActive => "setActive",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Method {
    fn from(name: &str) -> Self {
        match name {
            "list" => Method::List,
            "get" => Method::Get,
            "create" => Method::Create,
            "update" => Method::Update,
            "delete" => Method::Delete,
            "set_active" => Method::SetActive,
            other => Method::Custom(other.to_owned()),
        }
    }
}

impl Serialize for Method {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        if name.is_empty() {
            return Err(D::Error::custom("method name must not be empty"));
        }
        Ok(Method::from(name.as_str()))
    }
}

/// Routing metadata of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    /// Model name, e.g. `"vlan"`.
    pub model: String,
    /// The method invoked on the model.
    pub method: Method,
    /// Ask the transport to bypass any response cache.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nocache: bool,
    /// Stamped by the store at dispatch time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Method parameters as sent on the wire.
    pub params: Value,
}

/// A request for the transport layer to perform.
///
/// Build one with the typed constructors ([`Request::fetch`],
/// [`Request::create`], ...) and hand it to
/// [`StoreHandle::dispatch`](crate::StoreHandle::dispatch), which stamps the
/// call identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// `"<model>/<action>"`, e.g. `"machine/fetch"`.
    #[serde(rename = "type")]
    pub request_type: String,
    /// Routing metadata.
    pub meta: RequestMeta,
    /// `None` for requests without parameters (list fetches).
    pub payload: Option<RequestPayload>,
}

impl Request {
    /// A request for an arbitrary method with optional parameters.
    pub fn new(model: impl Into<String>, method: Method, params: Option<Value>) -> Self {
        let model = model.into();
        Self {
            request_type: format!("{model}/{}", method.action()),
            meta: RequestMeta {
                model,
                method,
                nocache: false,
                call_id: None,
            },
            payload: params.map(|params| RequestPayload { params }),
        }
    }

    /// Fetch the full list of `E` records.
    pub fn fetch<E: Entity>() -> Self {
        Self::new(E::MODEL, Method::List, None)
    }

    /// Fetch one record by key.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the key cannot be serialized.
    pub fn get<E: Entity>(key: &E::Key) -> serde_json::Result<Self> {
        Ok(Self::new(E::MODEL, Method::Get, Some(key_params::<E>(key)?)))
    }

    /// Create a record.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the parameters cannot be serialized.
    pub fn create<E: Entity>(params: &E::CreateParams) -> serde_json::Result<Self> {
        Ok(Self::new(
            E::MODEL,
            Method::Create,
            Some(serde_json::to_value(params)?),
        ))
    }

    /// Update a record.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the parameters cannot be serialized.
    pub fn update<E: Entity>(params: &E::UpdateParams) -> serde_json::Result<Self> {
        Ok(Self::new(
            E::MODEL,
            Method::Update,
            Some(serde_json::to_value(params)?),
        ))
    }

    /// Delete a record by key.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the key cannot be serialized.
    pub fn delete<E: Entity>(key: &E::Key) -> serde_json::Result<Self> {
        Ok(Self::new(E::MODEL, Method::Delete, Some(key_params::<E>(key)?)))
    }

    /// Focus a record for a details view, or unfocus with `None`.
    ///
    /// The server unsets the active record when no key is sent, so `None`
    /// produces `params: null`.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the key cannot be serialized.
    pub fn set_active<E: Entity>(key: Option<&E::Key>) -> serde_json::Result<Self> {
        let params = match key {
            Some(key) => key_params::<E>(key)?,
            None => Value::Null,
        };
        Ok(Self::new(E::MODEL, Method::SetActive, Some(params)))
    }

    /// Run an item action on one or more records.
    ///
    /// Params are `extra`'s fields plus the primary key: a single key for
    /// one record, an array for several. Non-object `extra` values are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if a key cannot be serialized or the
    /// action does not serialize to a name.
    pub fn action<E: Entity>(
        action: ActionOf<E>,
        keys: &[E::Key],
        extra: Value,
    ) -> serde_json::Result<Self> {
        let name = action_name(&action).ok_or_else(|| {
            <serde_json::Error as serde::ser::Error>::custom("action must serialize to a string")
        })?;
        let mut params = match extra {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let key_value = match keys {
            [single] => serde_json::to_value(single)?,
            many => serde_json::to_value(many)?,
        };
        params.insert(E::PRIMARY_KEY.to_owned(), key_value);
        Ok(Self::new(
            E::MODEL,
            Method::Custom(name),
            Some(Value::Object(params)),
        ))
    }

    /// Ask the transport to bypass its response cache.
    pub fn with_nocache(mut self) -> Self {
        self.meta.nocache = true;
        self
    }

    /// Stamp a call identifier. The store does this on dispatch when the
    /// request has none.
    pub fn with_call_id(mut self, call_id: CallId) -> Self {
        self.meta.call_id = Some(call_id);
        self
    }

    /// Model the request targets.
    pub fn model(&self) -> &str {
        &self.meta.model
    }

    /// Method the request invokes.
    pub fn method(&self) -> &Method {
        &self.meta.method
    }

    /// Call identifier, once stamped.
    pub fn call_id(&self) -> Option<CallId> {
        self.meta.call_id
    }

    /// Parameters, if the method takes any.
    pub fn params(&self) -> Option<&Value> {
        self.payload.as_ref().map(|payload| &payload.params)
    }
}

fn key_params<E: Entity>(key: &E::Key) -> serde_json::Result<Value> {
    let mut params = Map::new();
    params.insert(E::PRIMARY_KEY.to_owned(), serde_json::to_value(key)?);
    Ok(Value::Object(params))
}

/// The start event a slice applies when `request` leaves the client.
///
/// Declared item actions take precedence over the generic vocabulary, the
/// same way they do for inbound events. Requests that have no start phase
/// (`set_active`, unknown custom methods) yield `None`.
pub(crate) fn start_event<E: Entity>(request: &Request) -> Option<EntityEvent<E>> {
    let method = request.method();
    if <E::Status as ItemStatus>::TRACKED
        && let Some(action) = parse_action::<ActionOf<E>>(method.as_str())
    {
        let meta = WireMeta {
            item: request
                .params()
                .and_then(|params| params.get(E::PRIMARY_KEY))
                .cloned(),
            call_id: None,
        };
        let keys = keys_from_meta::<E>(&meta).unwrap_or_default();
        return Some(EntityEvent::ActionStart { action, keys });
    }

    match method {
        Method::List => Some(EntityEvent::FetchStart),
        Method::Get => Some(EntityEvent::GetStart),
        Method::Create => Some(EntityEvent::CreateStart),
        Method::Update => Some(EntityEvent::UpdateStart),
        Method::Delete => Some(EntityEvent::DeleteStart),
        Method::SetActive | Method::Custom(_) => None,
    }
}
