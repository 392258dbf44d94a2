//! Error payloads carried by store events, and crate-level error types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::correlator::CallId;

/// Error payload reported by the backend for a failed request.
///
/// This is data, not a raised error: it is stored in
/// [`EntityState::errors`](crate::EntityState::errors) and in event-error
/// entries, and handed to whoever awaits the request's ticket. The backend
/// sends either a plain message or a map of field name to message(s);
/// anything else is kept verbatim in [`ApiError::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(untagged)]
pub enum ApiError {
    /// A single human-readable message.
    #[error("{0}")]
    Message(String),

    /// Validation errors keyed by field name (`"__all__"` for form-wide).
    #[error("{}", FieldsDisplay(.0))]
    Fields(BTreeMap<String, FieldMessages>),

    /// Any other JSON error shape.
    #[error("{0}")]
    Other(Value),
}

/// One or many messages attached to a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldMessages {
    /// A single message.
    One(String),
    /// Several messages for the same field.
    Many(Vec<String>),
}

impl FieldMessages {
    /// Iterate over the messages regardless of shape.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            FieldMessages::One(msg) => std::slice::from_ref(msg),
            FieldMessages::Many(msgs) => msgs,
        };
        slice.iter().map(String::as_str)
    }
}

impl ApiError {
    /// Messages recorded against `field`, empty if there are none.
    ///
    /// A plain [`ApiError::Message`] belongs to no field.
    pub fn field(&self, field: &str) -> Vec<&str> {
        match self {
            ApiError::Fields(map) => map
                .get(field)
                .map(|messages| messages.iter().collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Every message in the payload, flattened. Field messages are prefixed
    /// with their field name.
    pub fn messages(&self) -> Vec<String> {
        match self {
            ApiError::Message(msg) => vec![msg.clone()],
            ApiError::Fields(map) => map
                .iter()
                .flat_map(|(field, messages)| {
                    messages.iter().map(move |msg| format!("{field}: {msg}"))
                })
                .collect(),
            ApiError::Other(value) => vec![value.to_string()],
        }
    }
}

impl From<&str> for ApiError {
    fn from(msg: &str) -> Self {
        ApiError::Message(msg.to_owned())
    }
}

impl From<String> for ApiError {
    fn from(msg: String) -> Self {
        ApiError::Message(msg)
    }
}

struct FieldsDisplay<'a>(&'a BTreeMap<String, FieldMessages>);

impl fmt::Display for FieldsDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in self.0 {
            for msg in messages.iter() {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {msg}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Error returned when an inbound wire message cannot be interpreted.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The message is not valid JSON or lacks a `type` field.
    #[error("invalid inbound message: {0}")]
    Json(#[from] serde_json::Error),

    /// The `type` field is not of the form `"<model>/<event>"`.
    #[error("malformed event type '{0}': expected '<model>/<event>'")]
    MalformedType(String),

    /// No slice is registered for the model named in the event type.
    #[error("no slice registered for model '{0}'")]
    UnknownModel(String),

    /// The event is known but its payload or meta has the wrong shape.
    #[error("invalid payload for '{event_type}': {source}")]
    Payload {
        /// Full event type, e.g. `"machine/createNotify"`.
        event_type: String,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
}

/// Error returned by [`StoreHandle`](crate::StoreHandle) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store task has exited, so no further messages can be processed.
    #[error("entity store is no longer running")]
    Closed,

    /// The outbound request channel was dropped by the transport.
    #[error("transport is no longer accepting requests")]
    TransportClosed,

    /// The request names a model that was never registered.
    #[error("model '{0}' is not registered with this store")]
    UnknownModel(String),

    /// The request stopped being tracked before it settled.
    #[error("request {0} is no longer tracked")]
    Untracked(CallId),

    /// The request parameters could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// An inbound message could not be interpreted.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
