//! Per-entity-type state slice and the reducer that drives it.

use std::collections::{HashMap, HashSet};

use crate::entity::{Entity, ItemStatus};
use crate::error::ApiError;
use crate::event::{ActionOf, EntityEvent, Failure, Op};

/// A failure scoped to one record (or to none), as shown next to a table row.
#[derive(Debug, Clone, PartialEq)]
pub struct EventError<K, A> {
    /// Key of the record the failure concerns, `None` if unattributable.
    pub id: Option<K>,
    /// The operation that failed.
    pub event: Op<A>,
    /// The error payload the server sent.
    pub error: ApiError,
}

/// [`EventError`] specialised to an entity type.
pub type EventErrorOf<E> = EventError<<E as Entity>::Key, ActionOf<E>>;

/// Client-side cache of one entity type plus its request-lifecycle flags.
///
/// The only way to change a slice is [`apply`](EntityState::apply); every
/// field is read through accessors. Failures are recorded as data and never
/// raised.
///
/// # Invariants
///
/// - `items` holds at most one record per key.
/// - With statuses tracked, `statuses` has an entry for every key in
///   `items` and none for keys that were deleted.
/// - `revision` increases by one for every applied event.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState<E: Entity> {
    items: Vec<E>,
    loading: bool,
    loaded: bool,
    saving: bool,
    saved: bool,
    errors: Option<ApiError>,
    event_errors: Vec<EventErrorOf<E>>,
    active: Option<E::Key>,
    statuses: HashMap<E::Key, E::Status>,
    revision: u64,
}

impl<E: Entity> Default for EntityState<E> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: false,
            loaded: false,
            saving: false,
            saved: false,
            errors: None,
            event_errors: Vec::new(),
            active: None,
            statuses: HashMap::new(),
            revision: 0,
        }
    }
}

impl<E: Entity> EntityState<E> {
    /// Cached records in arrival order.
    pub fn items(&self) -> &[E] {
        &self.items
    }

    /// A full-list fetch is in flight.
    pub fn loading(&self) -> bool {
        self.loading
    }

    /// A full-list fetch has completed at least once.
    pub fn loaded(&self) -> bool {
        self.loaded
    }

    /// A mutation is in flight.
    pub fn saving(&self) -> bool {
        self.saving
    }

    /// The last mutation completed successfully.
    pub fn saved(&self) -> bool {
        self.saved
    }

    /// The last error payload, if any.
    pub fn errors(&self) -> Option<&ApiError> {
        self.errors.as_ref()
    }

    /// Record-scoped failures, oldest first. Empty unless the entity tracks them.
    pub fn event_errors(&self) -> &[EventErrorOf<E>] {
        &self.event_errors
    }

    /// Key of the record focused by a details view.
    pub fn active(&self) -> Option<&E::Key> {
        self.active.as_ref()
    }

    /// In-flight action flags per record.
    pub fn statuses(&self) -> &HashMap<E::Key, E::Status> {
        &self.statuses
    }

    /// Number of events applied so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The record with the given key.
    pub fn get(&self, key: &E::Key) -> Option<&E> {
        self.items.iter().find(|item| &item.key() == key)
    }

    /// Apply a single event to produce the next state.
    ///
    /// Total over the event vocabulary: every event is valid in every state.
    /// Notify events are idempotent and tolerate arriving in any order
    /// relative to each other.
    pub fn apply(&mut self, event: &EntityEvent<E>) {
        match event {
            EntityEvent::FetchStart => self.loading = true,
            EntityEvent::FetchSuccess(items) => {
                self.replace_items(items);
                self.loading = false;
                self.loaded = true;
            }
            EntityEvent::FetchError(failure) => {
                self.fail(Op::Fetch, failure);
                self.loading = false;
            }

            EntityEvent::GetStart => self.loading = true,
            EntityEvent::GetSuccess(item) => {
                self.upsert(item);
                self.loading = false;
                self.saving = false;
            }
            EntityEvent::GetError(failure) => {
                self.fail(Op::Get, failure);
                self.loading = false;
                self.saving = false;
            }

            EntityEvent::CreateStart | EntityEvent::UpdateStart | EntityEvent::DeleteStart => {
                self.saved = false;
                self.saving = true;
            }
            EntityEvent::CreateSuccess => self.mutation_succeeded(Op::Create),
            EntityEvent::UpdateSuccess => self.mutation_succeeded(Op::Update),
            EntityEvent::DeleteSuccess => self.mutation_succeeded(Op::Delete),
            EntityEvent::CreateError(failure) => {
                self.fail(Op::Create, failure);
                self.saving = false;
            }
            EntityEvent::UpdateError(failure) => {
                self.fail(Op::Update, failure);
                self.saving = false;
            }
            EntityEvent::DeleteError(failure) => {
                self.fail(Op::Delete, failure);
                self.saving = false;
            }

            // The server may announce a record we already hold, e.g. when a
            // create races with a fetch, so both notifies upsert.
            EntityEvent::CreateNotify(item) | EntityEvent::UpdateNotify(item) => self.upsert(item),
            EntityEvent::DeleteNotify(key) => self.remove(key),

            EntityEvent::SetActiveSuccess(Some(item)) => {
                self.upsert(item);
                self.active = Some(item.key());
            }
            EntityEvent::SetActiveSuccess(None) => self.active = None,
            EntityEvent::SetActiveError(failure) => {
                self.fail(Op::SetActive, failure);
                self.active = None;
            }

            EntityEvent::ActionStart { action, keys } => self.set_status(*action, keys, true),
            EntityEvent::ActionSuccess { action, keys, item } => {
                self.set_status(*action, keys, false);
                if let Some(item) = item {
                    self.replace_existing(item);
                }
                self.event_errors.retain(|entry| {
                    entry.event != Op::Action(*action)
                        || !entry.id.as_ref().is_some_and(|id| keys.contains(id))
                });
            }
            EntityEvent::ActionError { action, failure } => {
                self.fail(Op::Action(*action), failure);
                self.set_status(*action, &failure.keys, false);
            }

            EntityEvent::Cleanup => {
                self.errors = None;
                self.event_errors.clear();
                self.saved = false;
                self.saving = false;
            }
        }
        self.revision += 1;
    }

    fn mutation_succeeded(&mut self, op: Op<ActionOf<E>>) {
        self.errors = None;
        self.saved = true;
        self.saving = false;
        self.event_errors
            .retain(|entry| entry.event != op || entry.id.is_some());
    }

    /// Store the error and, for models that track them, one event-error
    /// entry per affected key, replacing any entry for the same
    /// `(event, id)` pair.
    fn fail(&mut self, op: Op<ActionOf<E>>, failure: &Failure<E::Key>) {
        self.errors = Some(failure.error.clone());
        if !E::TRACKS_EVENT_ERRORS {
            return;
        }
        let ids: Vec<Option<E::Key>> = if failure.keys.is_empty() {
            vec![None]
        } else {
            failure.keys.iter().cloned().map(Some).collect()
        };
        for id in ids {
            self.event_errors
                .retain(|entry| entry.event != op || entry.id != id);
            self.event_errors.push(EventError {
                id,
                event: op,
                error: failure.error.clone(),
            });
        }
    }

    fn replace_items(&mut self, items: &[E]) {
        let mut positions: HashMap<E::Key, usize> = HashMap::with_capacity(items.len());
        let mut next: Vec<E> = Vec::with_capacity(items.len());
        for item in items {
            let key = item.key();
            match positions.get(&key) {
                // Duplicate keys within one payload: the later copy wins.
                Some(&idx) => next[idx] = item.clone(),
                None => {
                    positions.insert(key, next.len());
                    next.push(item.clone());
                }
            }
        }
        self.items = next;

        if <E::Status as ItemStatus>::TRACKED {
            let mut statuses = std::mem::take(&mut self.statuses);
            self.statuses = positions
                .into_keys()
                .map(|key| {
                    let status = statuses.remove(&key).unwrap_or_default();
                    (key, status)
                })
                .collect();
        }
    }

    fn upsert(&mut self, item: &E) {
        if !self.replace_existing(item) {
            self.items.push(item.clone());
            if <E::Status as ItemStatus>::TRACKED {
                self.statuses.entry(item.key()).or_default();
            }
        }
    }

    /// Replace the record with the same key. Returns `false` if none exists.
    fn replace_existing(&mut self, item: &E) -> bool {
        let key = item.key();
        match self.items.iter_mut().find(|existing| existing.key() == key) {
            Some(existing) => {
                *existing = item.clone();
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, key: &E::Key) {
        self.items.retain(|item| &item.key() != key);
        self.statuses.remove(key);
        self.event_errors
            .retain(|entry| entry.id.as_ref() != Some(key));
        if self.active.as_ref() == Some(key) {
            self.active = None;
        }
    }

    /// Flip the status flag for each key. Keys without a status entry are
    /// skipped: a `deleteNotify` may already have removed the record.
    fn set_status(&mut self, action: ActionOf<E>, keys: &[E::Key], in_flight: bool) {
        for key in keys {
            if let Some(status) = self.statuses.get_mut(key) {
                status.set(action, in_flight);
            }
        }
    }

    /// Keys whose statuses currently have any flag set.
    pub(crate) fn processing_keys(&self) -> HashSet<&E::Key> {
        self.statuses
            .iter()
            .filter(|(_, status)| status.is_processing())
            .map(|(key, _)| key)
            .collect()
    }
}

/// Pure fold function over events, for use with `Iterator::fold`.
///
/// # Examples
///
/// ```
/// use entity_store::{Entity, EntityEvent, EntityState, NoStatus, reducer};
/// use serde::{Deserialize, Serialize};
/// use serde_json::Value;
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Fabric {
///     id: u32,
///     name: String,
/// }
///
/// impl Entity for Fabric {
///     const MODEL: &'static str = "fabric";
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
/// let fabric = |id, name: &str| Fabric { id, name: name.into() };
/// let events = [
///     EntityEvent::FetchStart,
///     EntityEvent::FetchSuccess(vec![fabric(1, "fabric-0")]),
///     EntityEvent::CreateNotify(fabric(2, "fabric-1")),
///     EntityEvent::DeleteNotify(1),
/// ];
/// let state = events.iter().fold(EntityState::default(), reducer());
///
/// assert!(state.loaded());
/// assert_eq!(state.items(), &[fabric(2, "fabric-1")]);
/// assert_eq!(state.revision(), 4);
/// ```
pub fn reducer<E: Entity>() -> fn(EntityState<E>, &EntityEvent<E>) -> EntityState<E> {
    reduce::<E>
}

fn reduce<E: Entity>(mut state: EntityState<E>, event: &EntityEvent<E>) -> EntityState<E> {
    state.apply(event);
    state
}
