//! Tracking of in-flight requests by call identifier.
//!
//! Every dispatched request gets a fresh [`CallId`]. The transport echoes it
//! back on the terminal event, and the correlator settles the matching
//! [`Ticket`] exactly once. A ticket's outcome carries the response (or the
//! error payload) that the slice itself does not keep, so a view can tell
//! "my create succeeded" apart from "some create succeeded".

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{ApiError, StoreError};
use crate::request::Method;

/// Opaque identifier stamped on an outbound request and echoed back on the
/// events that answer it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(Uuid);

impl CallId {
    /// A fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CallId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Per-record results reported by a bulk action.
///
/// A bulk action can succeed as a request while failing for some of the
/// records it targeted. `failure_details` maps a failure reason to the keys
/// it applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSummary {
    #[serde(default)]
    pub success_count: u64,
    #[serde(default, alias = "failed_system_ids")]
    pub failed_keys: Vec<String>,
    #[serde(default)]
    pub failure_details: BTreeMap<String, Vec<String>>,
}

impl BulkSummary {
    /// Read a summary out of a success payload, if it is one.
    ///
    /// Payloads without a `success_count` field are not summaries.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        payload.get("success_count")?;
        serde_json::from_value(payload.clone()).ok()
    }

    /// Some targeted records failed.
    pub fn has_failures(&self) -> bool {
        !self.failed_keys.is_empty()
    }
}

/// How a tracked request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The request succeeded; holds the response payload.
    Succeeded(Value),
    /// A bulk action succeeded for some records and failed for others.
    PartiallyFailed(BulkSummary),
    /// The request failed with this error payload.
    Failed(ApiError),
}

impl Outcome {
    /// Classify a success payload, detecting bulk partial failures.
    pub fn success(payload: Value) -> Self {
        match BulkSummary::from_payload(&payload) {
            Some(summary) if summary.has_failures() => Outcome::PartiallyFailed(summary),
            _ => Outcome::Succeeded(payload),
        }
    }

    /// `true` only for a full success.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }

    /// The bulk summary of a success or partial failure, if the payload
    /// carried one.
    pub fn bulk_summary(&self) -> Option<BulkSummary> {
        match self {
            Outcome::Succeeded(payload) => BulkSummary::from_payload(payload),
            Outcome::PartiallyFailed(summary) => Some(summary.clone()),
            Outcome::Failed(_) => None,
        }
    }

    /// The error payload of a failed request.
    pub fn error(&self) -> Option<&ApiError> {
        match self {
            Outcome::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// What a pending request was for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    /// Model name of the request, e.g. `"vlan"`.
    pub model: String,
    /// The method the request invoked.
    pub method: Method,
}

/// Receiving end of a tracked request.
///
/// Dropping a ticket is fine: the slice still applies the answering event,
/// and the correlator discards the entry on its next prune.
#[derive(Debug)]
pub struct Ticket {
    call_id: CallId,
    rx: oneshot::Receiver<Outcome>,
}

impl Ticket {
    /// The identifier stamped on the request this ticket tracks.
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Wait for the request to settle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Untracked`] if the correlator stopped tracking
    /// the request before it settled (it was forgotten, or the store shut
    /// down).
    pub async fn outcome(self) -> Result<Outcome, StoreError> {
        self.rx.await.map_err(|_| StoreError::Untracked(self.call_id))
    }

    /// Non-blocking check. Returns `None` while the request is in flight.
    pub fn try_outcome(&mut self) -> Option<Outcome> {
        self.rx.try_recv().ok()
    }
}

struct Pending {
    intent: Intent,
    reply: oneshot::Sender<Outcome>,
}

/// Map from call identifier to the request awaiting it.
#[derive(Default)]
pub struct Correlator {
    pending: HashMap<CallId, Pending>,
}

impl Correlator {
    /// An empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `call_id`. Re-issuing a pending identifier replaces
    /// the earlier entry, whose ticket then reports
    /// [`StoreError::Untracked`].
    pub fn issue(&mut self, call_id: CallId, intent: Intent) -> Ticket {
        let (reply, rx) = oneshot::channel();
        if self
            .pending
            .insert(call_id, Pending { intent, reply })
            .is_some()
        {
            tracing::warn!(%call_id, "call id reissued while pending");
        }
        Ticket { call_id, rx }
    }

    /// Settle `call_id` with `outcome`.
    ///
    /// Returns `false` if nothing is pending under `call_id`, either because
    /// it was never issued here or because it already settled.
    pub fn settle(&mut self, call_id: &CallId, outcome: Outcome) -> bool {
        let Some(pending) = self.pending.remove(call_id) else {
            return false;
        };
        tracing::debug!(
            %call_id,
            model = %pending.intent.model,
            method = %pending.intent.method,
            success = outcome.is_success(),
            "request settled"
        );
        // The ticket holder may have gone away; the outcome is then unused.
        let _ = pending.reply.send(outcome);
        true
    }

    /// Stop tracking `call_id` without settling it.
    pub fn forget(&mut self, call_id: &CallId) -> bool {
        self.pending.remove(call_id).is_some()
    }

    /// Drop entries whose ticket has been dropped. Their answering events
    /// still update the slice; only the settlement would go nowhere.
    ///
    /// Returns the number of entries removed.
    pub fn prune_closed(&mut self) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, pending| !pending.reply.is_closed());
        let pruned = before - self.pending.len();
        if pruned > 0 {
            tracing::trace!(pruned, "pruned abandoned tickets");
        }
        pruned
    }

    /// `true` while `call_id` awaits settlement.
    pub fn is_pending(&self, call_id: &CallId) -> bool {
        self.pending.contains_key(call_id)
    }

    /// What the request pending under `call_id` was for.
    pub fn intent(&self, call_id: &CallId) -> Option<&Intent> {
        self.pending.get(call_id).map(|pending| &pending.intent)
    }

    /// Pending call identifiers for `model`.
    pub fn pending_for<'a>(&'a self, model: &'a str) -> impl Iterator<Item = CallId> + 'a {
        self.pending
            .iter()
            .filter(move |(_, pending)| pending.intent.model == model)
            .map(|(call_id, _)| *call_id)
    }

    /// Number of requests awaiting settlement.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// `true` when no request is awaiting settlement.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl fmt::Debug for Correlator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intent(model: &str, method: Method) -> Intent {
        Intent {
            model: model.into(),
            method,
        }
    }

    #[test]
    fn call_id_round_trips_through_string() {
        let id = CallId::new();
        let parsed: CallId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<CallId>().is_err());
    }

    #[test]
    fn call_ids_are_unique() {
        assert_ne!(CallId::new(), CallId::new());
    }

    #[tokio::test]
    async fn settles_exactly_once() {
        let mut correlator = Correlator::new();
        let id = CallId::new();
        let ticket = correlator.issue(id, intent("vlan", Method::Create));
        assert!(correlator.is_pending(&id));

        assert!(correlator.settle(&id, Outcome::success(json!({"id": 5}))));
        assert!(!correlator.settle(&id, Outcome::Failed("late".into())));
        assert!(correlator.is_empty());

        assert_eq!(
            ticket.outcome().await.unwrap(),
            Outcome::Succeeded(json!({"id": 5}))
        );
    }

    #[test]
    fn unknown_call_id_does_not_settle() {
        let mut correlator = Correlator::new();
        let _ticket = correlator.issue(CallId::new(), intent("vlan", Method::Update));
        assert!(!correlator.settle(&CallId::new(), Outcome::Succeeded(Value::Null)));
        assert_eq!(correlator.len(), 1);
    }

    #[test]
    fn dropped_ticket_still_settles() {
        let mut correlator = Correlator::new();
        let id = CallId::new();
        drop(correlator.issue(id, intent("zone", Method::Delete)));
        assert!(correlator.settle(&id, Outcome::Failed("gone".into())));
    }

    #[test]
    fn dropped_tickets_are_pruned() {
        let mut correlator = Correlator::new();
        let kept = correlator.issue(CallId::new(), intent("vlan", Method::Create));
        for _ in 0..1000 {
            drop(correlator.issue(CallId::new(), intent("vlan", Method::List)));
        }
        assert_eq!(correlator.len(), 1001);

        assert_eq!(correlator.prune_closed(), 1000);
        assert_eq!(correlator.len(), 1);
        assert!(correlator.is_pending(&kept.call_id()));
        assert_eq!(correlator.prune_closed(), 0);
    }

    #[tokio::test]
    async fn forgotten_request_reports_untracked() {
        let mut correlator = Correlator::new();
        let id = CallId::new();
        let ticket = correlator.issue(id, intent("zone", Method::Get));
        assert!(correlator.forget(&id));
        let err = ticket.outcome().await.unwrap_err();
        assert!(matches!(err, StoreError::Untracked(found) if found == id));
    }

    #[test]
    fn try_outcome_is_none_until_settled() {
        let mut correlator = Correlator::new();
        let id = CallId::new();
        let mut ticket = correlator.issue(id, intent("zone", Method::List));
        assert_eq!(ticket.try_outcome(), None);
        correlator.settle(&id, Outcome::Succeeded(json!([])));
        assert_eq!(ticket.try_outcome(), Some(Outcome::Succeeded(json!([]))));
    }

    #[test]
    fn pending_for_filters_by_model() {
        let mut correlator = Correlator::new();
        let a = CallId::new();
        let b = CallId::new();
        let _ta = correlator.issue(a, intent("vlan", Method::Create));
        let _tb = correlator.issue(b, intent("fabric", Method::Create));

        let vlan: Vec<CallId> = correlator.pending_for("vlan").collect();
        assert_eq!(vlan, vec![a]);
        assert_eq!(correlator.intent(&b).map(|i| i.model.as_str()), Some("fabric"));
    }

    #[test]
    fn bulk_success_with_failed_ids_is_partial() {
        let payload = json!({
            "success_count": 2,
            "failed_system_ids": ["abc"],
            "failure_details": {"Machine is locked": ["abc"]},
        });
        let outcome = Outcome::success(payload);
        let Outcome::PartiallyFailed(summary) = &outcome else {
            panic!("expected partial failure, got {outcome:?}");
        };
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.failed_keys, vec!["abc".to_string()]);
        assert_eq!(
            summary.failure_details.get("Machine is locked"),
            Some(&vec!["abc".to_string()])
        );
        assert!(!outcome.is_success());
    }

    #[test]
    fn bulk_success_without_failures_is_plain_success() {
        let outcome = Outcome::success(json!({"success_count": 3}));
        assert!(outcome.is_success());
        assert_eq!(outcome.bulk_summary().map(|s| s.success_count), Some(3));

        let outcome = Outcome::success(json!({"id": 1}));
        assert_eq!(outcome.bulk_summary(), None);
    }
}
