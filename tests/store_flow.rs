//! Integration tests for the store task: request dispatch, response
//! correlation, push notifications, and selectors over live state.
//!
//! The transport is played by the test itself: it pulls requests off the
//! `Outbound` receiver and feeds wire messages back through the handle.

use entity_store::selectors::{self, Lookup};
use entity_store::{
    ApiError, Entity, ItemStatus, NoStatus, Op, Outbound, Outcome, Request, StoreBuilder,
    StoreError, StoreHandle, WireMessage,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_stream::StreamExt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Fabric {
    id: u32,
    name: String,
}

impl Entity for Fabric {
    const MODEL: &'static str = "fabric";

    type Key = u32;
    type CreateParams = Value;
    type UpdateParams = Value;
    type Status = NoStatus;

    fn key(&self) -> u32 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Vlan {
    id: u32,
    vid: u16,
    name: String,
    fabric: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct VlanParams {
    vid: u16,
    name: String,
    fabric: u32,
}

impl Entity for Vlan {
    const MODEL: &'static str = "vlan";

    type Key = u32;
    type CreateParams = VlanParams;
    type UpdateParams = Vlan;
    type Status = NoStatus;

    fn key(&self) -> u32 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Machine {
    system_id: String,
    hostname: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct MachineStatus {
    deleting: bool,
    tagging: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum MachineAction {
    Delete,
    Tag,
}

impl ItemStatus for MachineStatus {
    type Action = MachineAction;

    fn set(&mut self, action: MachineAction, in_flight: bool) {
        match action {
            MachineAction::Delete => self.deleting = in_flight,
            MachineAction::Tag => self.tagging = in_flight,
        }
    }

    fn get(&self, action: MachineAction) -> bool {
        match action {
            MachineAction::Delete => self.deleting,
            MachineAction::Tag => self.tagging,
        }
    }

    fn is_processing(&self) -> bool {
        self.deleting || self.tagging
    }
}

impl Entity for Machine {
    const MODEL: &'static str = "machine";
    const PRIMARY_KEY: &'static str = "system_id";
    const TRACKS_EVENT_ERRORS: bool = true;

    type Key = String;
    type CreateParams = Value;
    type UpdateParams = Value;
    type Status = MachineStatus;

    fn key(&self) -> String {
        self.system_id.clone()
    }
}

fn open() -> (StoreHandle, Outbound) {
    StoreBuilder::new()
        .model::<Fabric>()
        .model::<Vlan>()
        .model::<Machine>()
        .open()
}

/// Answer `request` with `event`, echoing its call id.
fn reply(request: &Request, event: &str, payload: Value) -> WireMessage {
    let call_id = request
        .call_id()
        .map(|id| id.to_string())
        .unwrap_or_default();
    WireMessage::new(format!("{}/{event}", request.model()), payload).with_call_id(call_id)
}

async fn seed_machines(store: &StoreHandle, ids: &[&str]) {
    let machines: Vec<Value> = ids
        .iter()
        .map(|id| json!({"system_id": id, "hostname": format!("host-{id}")}))
        .collect();
    store
        .receive(WireMessage::new("machine/fetchSuccess", Value::Array(machines)))
        .await
        .unwrap();
}

#[tokio::test]
async fn fetch_round_trip_updates_state_and_settles_ticket() {
    let (store, mut outbound) = open();

    let ticket = store.fetch::<Vlan>().await.unwrap();
    let request = outbound.recv().await.unwrap();
    assert_eq!(request.request_type, "vlan/fetch");
    assert!(store.state::<Vlan>().await.unwrap().loading());

    store
        .receive(reply(
            &request,
            "fetchSuccess",
            json!([{"id": 1, "vid": 10, "name": "storage", "fabric": 1}]),
        ))
        .await
        .unwrap();

    assert!(ticket.outcome().await.unwrap().is_success());
    let vlans = store.state::<Vlan>().await.unwrap();
    assert!(!vlans.loading());
    assert!(vlans.loaded());
    assert_eq!(vlans.items().len(), 1);
}

#[tokio::test]
async fn concurrent_creates_settle_their_own_tickets() {
    let (store, mut outbound) = open();
    let params = |vid: u16| VlanParams {
        vid,
        name: format!("vlan-{vid}"),
        fabric: 1,
    };

    let first = store.create::<Vlan>(&params(10)).await.unwrap();
    let second = store.create::<Vlan>(&params(20)).await.unwrap();
    let first_req = outbound.recv().await.unwrap();
    let second_req = outbound.recv().await.unwrap();
    assert_ne!(first.call_id(), second.call_id());

    // Responses arrive in the opposite order.
    store
        .receive(reply(&second_req, "createError", json!({"vid": "VID already in use."})))
        .await
        .unwrap();
    store
        .receive(reply(&first_req, "createSuccess", json!({"id": 7})))
        .await
        .unwrap();

    assert_eq!(
        first.outcome().await.unwrap(),
        Outcome::Succeeded(json!({"id": 7}))
    );
    let failed = second.outcome().await.unwrap();
    assert_eq!(
        failed.error().map(|e| e.field("vid")),
        Some(vec!["VID already in use."])
    );
}

#[tokio::test]
async fn unmatched_call_id_still_applies_event() {
    let (store, mut outbound) = open();
    let mut ticket = store
        .update::<Vlan>(&Vlan {
            id: 1,
            vid: 10,
            name: "renamed".into(),
            fabric: None,
        })
        .await
        .unwrap();
    let _request = outbound.recv().await.unwrap();

    let stranger = entity_store::CallId::new();
    let receipt = store
        .receive(
            WireMessage::new("vlan/updateError", json!("Permission denied"))
                .with_call_id(stranger.to_string()),
        )
        .await
        .unwrap();
    assert!(receipt.applied);

    let vlans = store.state::<Vlan>().await.unwrap();
    assert_eq!(vlans.errors(), Some(&ApiError::from("Permission denied")));
    assert!(!vlans.saving());
    assert_eq!(ticket.try_outcome(), None);
}

#[tokio::test]
async fn dropped_ticket_does_not_block_completion() {
    let (store, mut outbound) = open();
    drop(store.delete::<Vlan>(&3).await.unwrap());
    let request = outbound.recv().await.unwrap();

    store
        .receive(WireMessage::new("vlan/fetchSuccess", json!([
            {"id": 3, "vid": 30, "name": "old", "fabric": null}
        ])))
        .await
        .unwrap();
    store
        .receive(reply(&request, "deleteSuccess", Value::Null))
        .await
        .unwrap();
    store
        .receive(WireMessage::new("vlan/deleteNotify", json!(3)))
        .await
        .unwrap();

    let vlans = store.state::<Vlan>().await.unwrap();
    assert!(vlans.saved());
    assert!(vlans.items().is_empty());
}

#[tokio::test]
async fn push_notifications_from_other_sessions_upsert() {
    let (store, _outbound) = open();
    let vlan = json!({"id": 4, "vid": 40, "name": "dmz", "fabric": 2});

    for _ in 0..2 {
        store
            .receive(WireMessage::new("vlan/createNotify", vlan.clone()))
            .await
            .unwrap();
    }
    store
        .receive(WireMessage::new(
            "vlan/updateNotify",
            json!({"id": 4, "vid": 40, "name": "dmz-2", "fabric": 2}),
        ))
        .await
        .unwrap();

    let vlans = store.state::<Vlan>().await.unwrap();
    assert_eq!(vlans.items().len(), 1);
    assert_eq!(vlans.items()[0].name, "dmz-2");
}

#[tokio::test]
async fn per_item_deletes_track_each_machine() {
    let (store, mut outbound) = open();
    seed_machines(&store, &["abc", "def", "ghi"]).await;

    let ok = store.delete::<Machine>(&"abc".to_string()).await.unwrap();
    let bad = store.delete::<Machine>(&"def".to_string()).await.unwrap();
    let ok_req = outbound.recv().await.unwrap();
    let bad_req = outbound.recv().await.unwrap();

    let machines = store.state::<Machine>().await.unwrap();
    let deleting: Vec<&str> = selectors::with_status(&machines, MachineAction::Delete)
        .into_iter()
        .map(|m| m.system_id.as_str())
        .collect();
    assert_eq!(deleting, ["abc", "def"]);
    // Declared item actions use per-item flags, not the global one.
    assert!(!machines.saving());

    // The push notification overtakes the success response.
    store
        .receive(WireMessage::new("machine/deleteNotify", json!("abc")))
        .await
        .unwrap();
    store
        .receive(reply(&ok_req, "deleteSuccess", Value::Null).with_item(json!("abc")))
        .await
        .unwrap();
    store
        .receive(
            reply(&bad_req, "deleteError", json!("Machine is locked")).with_item(json!("def")),
        )
        .await
        .unwrap();

    assert!(ok.outcome().await.unwrap().is_success());
    assert!(bad.outcome().await.unwrap().error().is_some());

    let machines = store.state::<Machine>().await.unwrap();
    assert!(selectors::status(&machines, &"abc".to_string()).is_none());
    assert!(selectors::processing(&machines).is_empty());
    let errors = selectors::event_errors_for(
        &machines,
        &["def".to_string()],
        Some(&[Op::Action(MachineAction::Delete)]),
    );
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error, ApiError::from("Machine is locked"));
    assert_eq!(machines.items().len(), 2);
}

#[tokio::test]
async fn bulk_action_partial_failure_reaches_ticket() {
    let (store, mut outbound) = open();
    seed_machines(&store, &["abc", "def"]).await;

    let keys = ["abc".to_string(), "def".to_string()];
    let ticket = store
        .action::<Machine>(MachineAction::Tag, &keys, json!({"tags": [3]}))
        .await
        .unwrap();
    let request = outbound.recv().await.unwrap();
    assert_eq!(
        request.params(),
        Some(&json!({"tags": [3], "system_id": ["abc", "def"]}))
    );

    store
        .receive(
            reply(
                &request,
                "tagSuccess",
                json!({
                    "success_count": 1,
                    "failed_system_ids": ["def"],
                    "failure_details": {"Tag is read-only": ["def"]},
                }),
            )
            .with_item(json!(["abc", "def"])),
        )
        .await
        .unwrap();

    let Outcome::PartiallyFailed(summary) = ticket.outcome().await.unwrap() else {
        panic!("expected a partial failure");
    };
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.failed_keys, ["def"]);

    let machines = store.state::<Machine>().await.unwrap();
    assert!(selectors::with_status(&machines, MachineAction::Tag).is_empty());
}

#[tokio::test]
async fn set_active_and_joins_through_select() {
    let (store, mut outbound) = open();
    store
        .receive(WireMessage::new(
            "vlan/fetchSuccess",
            json!([
                {"id": 1, "vid": 10, "name": "a", "fabric": 1},
                {"id": 2, "vid": 20, "name": "b", "fabric": 5},
            ]),
        ))
        .await
        .unwrap();

    // Fabrics not loaded yet: the join shows a loading placeholder.
    let loading = store
        .select(|root| {
            let (Some(vlans), Some(fabrics)) = (root.slice::<Vlan>(), root.slice::<Fabric>())
            else {
                return Vec::new();
            };
            selectors::join(vlans, fabrics, |v| v.fabric)
                .iter()
                .map(|(_, fabric)| fabric.is_some_and(|l| l.is_loading()))
                .collect::<Vec<bool>>()
        })
        .await
        .unwrap();
    assert_eq!(loading, [true, true]);

    store
        .receive(WireMessage::new("fabric/fetchSuccess", json!([{"id": 1, "name": "default"}])))
        .await
        .unwrap();
    let names = store
        .select(|root| {
            let (Some(vlans), Some(fabrics)) = (root.slice::<Vlan>(), root.slice::<Fabric>())
            else {
                return Vec::new();
            };
            selectors::join(vlans, fabrics, |v| v.fabric)
                .into_iter()
                .map(|(_, fabric)| match fabric {
                    Some(Lookup::Found(f)) => f.name.clone(),
                    Some(Lookup::NotFound) => "missing".to_string(),
                    Some(Lookup::Loading) | None => String::new(),
                })
                .collect::<Vec<String>>()
        })
        .await
        .unwrap();
    assert_eq!(names, ["default", "missing"]);

    let ticket = store.set_active::<Vlan>(Some(&2)).await.unwrap();
    let request = outbound.recv().await.unwrap();
    store
        .receive(reply(
            &request,
            "setActiveSuccess",
            json!({"id": 2, "vid": 20, "name": "b", "fabric": 5}),
        ))
        .await
        .unwrap();
    assert!(ticket.outcome().await.unwrap().is_success());

    let vlans = store.state::<Vlan>().await.unwrap();
    assert_eq!(
        selectors::active(&vlans).and_then(Lookup::found).map(|v| v.id),
        Some(2)
    );
}

#[tokio::test]
async fn decode_failures_are_reported_and_leave_state_alone() {
    let (store, _outbound) = open();
    let err = store
        .receive(WireMessage::new("subnet/fetchStart", Value::Null))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Decode(_)));

    let err = store
        .receive(WireMessage::new("vlan/createNotify", json!({"id": "nope"})))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Decode(_)));
    assert!(store.state::<Vlan>().await.unwrap().items().is_empty());

    let receipt = store
        .receive(WireMessage::new("vlan/somethingNew", Value::Null))
        .await
        .unwrap();
    assert!(!receipt.applied);
}

#[tokio::test]
async fn change_stream_yields_after_applied_events() {
    let (store, _outbound) = open();
    let mut changes = store.changes();
    assert_eq!(changes.next().await, Some(0));

    store
        .receive(WireMessage::new("fabric/createNotify", json!({"id": 1, "name": "f"})))
        .await
        .unwrap();
    assert_eq!(changes.next().await, Some(1));

    store.shutdown().await;
    assert_eq!(changes.next().await, None);
}
