//! Self-contained demo of the entity store against a simulated backend.
//!
//! A background task plays the transport: it takes requests off the
//! store's outbound channel, applies them to an in-memory "server", and
//! answers with the events a real backend would push.
//!
//! Run with: `RUST_LOG=entity_store=debug cargo run --example fleet`

use std::collections::BTreeMap;

use entity_store::selectors::{self, Lookup};
use entity_store::{
    Entity, ItemStatus, Method, NoStatus, Outbound, Outcome, Request, StoreBuilder, StoreHandle,
    WireMessage,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

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
    fabric: u32,
}

#[derive(Debug, Clone, Serialize)]
struct NewVlan {
    vid: u16,
    name: String,
    fabric: u32,
}

impl Entity for Vlan {
    const MODEL: &'static str = "vlan";

    type Key = u32;
    type CreateParams = NewVlan;
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
    power: String,
}

/// In-flight flags shown next to each machine row.
#[derive(Debug, Clone, Default, PartialEq)]
struct MachineStatus {
    powering_on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum MachineAction {
    PowerOn,
}

impl ItemStatus for MachineStatus {
    type Action = MachineAction;

    fn set(&mut self, action: MachineAction, in_flight: bool) {
        match action {
            MachineAction::PowerOn => self.powering_on = in_flight,
        }
    }

    fn get(&self, action: MachineAction) -> bool {
        match action {
            MachineAction::PowerOn => self.powering_on,
        }
    }

    fn is_processing(&self) -> bool {
        self.powering_on
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

// ---------------------------------------------------------------------------
// Simulated backend
// ---------------------------------------------------------------------------

/// Records held by the fake server, keyed by model.
struct Backend {
    records: BTreeMap<&'static str, Vec<Value>>,
    next_id: u32,
}

impl Backend {
    fn new() -> Self {
        let mut records = BTreeMap::new();
        records.insert("fabric", vec![json!({"id": 1, "name": "fabric-0"})]);
        records.insert(
            "vlan",
            vec![json!({"id": 1, "vid": 0, "name": "untagged", "fabric": 1})],
        );
        records.insert(
            "machine",
            vec![
                json!({"system_id": "k3p7aq", "hostname": "web-01", "power": "off"}),
                json!({"system_id": "x8m2rd", "hostname": "db-01", "power": "off"}),
                json!({"system_id": "q9w4ln", "hostname": "lab-07", "power": "error"}),
            ],
        );
        Self {
            records,
            next_id: 100,
        }
    }

    /// Events the server sends in answer to `request`.
    fn handle(&mut self, request: &Request) -> Vec<WireMessage> {
        let model = request.model().to_owned();
        let call_id = request.call_id().map(|id| id.to_string()).unwrap_or_default();
        let answer = |event: &str, payload: Value| {
            WireMessage::new(format!("{model}/{event}"), payload).with_call_id(call_id.clone())
        };
        let params = request.params().cloned().unwrap_or(Value::Null);

        match request.method() {
            Method::List => {
                let items = self.records.get(model.as_str()).cloned().unwrap_or_default();
                vec![answer("fetchSuccess", Value::Array(items))]
            }
            Method::Create => {
                let mut record = params;
                if let Some(fields) = record.as_object_mut() {
                    fields.insert("id".into(), json!(self.next_id));
                }
                self.next_id += 1;
                if let Some(list) = self.records.get_mut(model.as_str()) {
                    list.push(record.clone());
                }
                // The push notification lands before the response.
                vec![
                    WireMessage::new(format!("{model}/createNotify"), record.clone()),
                    answer("createSuccess", record),
                ]
            }
            Method::Custom(action) if action == "powerOn" => {
                let ids: Vec<String> =
                    serde_json::from_value(params["system_id"].clone()).unwrap_or_default();
                let mut failed = Vec::new();
                let mut notifies = Vec::new();
                for machine in self.records.get_mut("machine").into_iter().flatten() {
                    let Some(id) = machine["system_id"].as_str().map(str::to_owned) else {
                        continue;
                    };
                    if !ids.contains(&id) {
                        continue;
                    }
                    if machine["power"] == "error" {
                        failed.push(id);
                    } else {
                        machine["power"] = json!("on");
                        notifies.push(WireMessage::new("machine/updateNotify", machine.clone()));
                    }
                }
                let summary = json!({
                    "success_count": ids.len() - failed.len(),
                    "failed_system_ids": failed.clone(),
                    "failure_details": {"BMC unreachable": failed},
                });
                notifies.push(
                    answer("powerOnSuccess", summary).with_item(json!(ids)),
                );
                notifies
            }
            other => {
                tracing::warn!(method = %other, "backend does not implement method");
                Vec::new()
            }
        }
    }
}

/// Forward requests to the backend until the store stops.
async fn transport(mut outbound: Outbound, store: StoreHandle) {
    let mut backend = Backend::new();
    while let Some(request) = outbound.recv().await {
        for message in backend.handle(&request) {
            if let Err(e) = store.receive(message).await {
                tracing::warn!(error = %e, "backend sent an undecodable message");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let (store, outbound) = StoreBuilder::new()
        .model::<Fabric>()
        .model::<Vlan>()
        .model::<Machine>()
        .open();
    tokio::spawn(transport(outbound, store.clone()));

    // Initial page load: fetch everything the VLAN table needs.
    for ticket in [
        store.fetch::<Fabric>().await?,
        store.fetch::<Vlan>().await?,
        store.fetch::<Machine>().await?,
    ] {
        ticket.outcome().await?;
    }

    // Create a VLAN and wait for this specific request to finish.
    let ticket = store
        .create::<Vlan>(&NewVlan {
            vid: 42,
            name: "storage".into(),
            fabric: 1,
        })
        .await?;
    match ticket.outcome().await? {
        Outcome::Succeeded(record) => println!("created vlan {record}"),
        other => println!("create did not succeed: {other:?}"),
    }

    // Render the VLAN table with the fabric join resolved.
    let rows = store
        .select(|root| {
            let (Some(vlans), Some(fabrics)) = (root.slice::<Vlan>(), root.slice::<Fabric>())
            else {
                return Vec::new();
            };
            selectors::join(vlans, fabrics, |vlan| Some(vlan.fabric))
                .into_iter()
                .map(|(vlan, fabric)| {
                    let fabric = match fabric {
                        Some(Lookup::Found(fabric)) => fabric.name.clone(),
                        Some(Lookup::Loading) => "...".into(),
                        Some(Lookup::NotFound) | None => "-".into(),
                    };
                    format!("{:>4}  {:<10} {fabric}", vlan.vid, vlan.name)
                })
                .collect::<Vec<_>>()
        })
        .await?;
    println!(" VID  NAME       FABRIC");
    for row in &rows {
        println!("{row}");
    }

    // Bulk power-on: one machine fails, the ticket reports which.
    let targets: Vec<String> = ["k3p7aq", "q9w4ln"].map(String::from).to_vec();
    let ticket = store
        .action::<Machine>(MachineAction::PowerOn, &targets, Value::Null)
        .await?;
    if let Some(summary) = ticket.outcome().await?.bulk_summary() {
        println!(
            "powered on {} machine(s), failed: {:?}",
            summary.success_count, summary.failed_keys
        );
    }

    let machines = store.state::<Machine>().await?;
    for machine in selectors::sorted_by(&machines, |m| m.hostname.clone()) {
        println!("{:<8} {}", machine.hostname, machine.power);
    }

    assert_eq!(rows.len(), 2, "untagged plus the new vlan");
    assert!(selectors::processing(&machines).is_empty());
    assert_eq!(
        selectors::by_key(&machines, &"k3p7aq".to_string()).map(|m| m.power.as_str()),
        Some("on")
    );

    store.shutdown().await;
    println!("all assertions passed");
    Ok(())
}
