//! Client-side cache of server entities, kept in sync by request-lifecycle
//! events and server push notifications.
//!
//! Each entity model gets an [`EntityState`] slice driven by a pure
//! reducer. A single store task owns every slice, forwards outbound
//! [`Request`]s to the transport, and correlates the responses back to the
//! [`Ticket`] of the request that caused them.

mod correlator;
pub use correlator::{BulkSummary, CallId, Correlator, Intent, Outcome, Ticket};
mod entity;
pub use entity::{Entity, ItemStatus, NoAction, NoStatus};
mod error;
mod event;
mod request;
mod root;
pub mod selectors;
mod state;
mod store;

pub use error::{ApiError, DecodeError, FieldMessages, StoreError};
pub use event::{
    ActionOf, EntityEvent, Failure, Op, Settlement, WireMessage, WireMeta, decode_event,
};
pub use request::{Method, Request, RequestMeta, RequestPayload};
pub use root::{Receipt, RootState};
pub use selectors::{Lookup, Memo};
pub use state::{EntityState, EventError, EventErrorOf, reducer};
pub use store::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_OUTBOUND_CAPACITY, Outbound, StoreBuilder, StoreConfig,
    StoreHandle,
};
