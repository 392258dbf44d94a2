//! Read-only derivations over entity slices.
//!
//! Selectors borrow from an [`EntityState`] and never mutate it. Derived
//! views that are expensive to rebuild can be cached in a [`Memo`], which
//! recomputes only when a slice's revision changes.

use std::collections::HashSet;

use crate::entity::{Entity, ItemStatus};
use crate::event::{ActionOf, Op};
use crate::state::{EntityState, EventErrorOf};

/// Result of looking a record up by key.
///
/// Distinguishes "the list is still loading" from "the list is loaded and
/// the record is not in it", so a details view can show a spinner instead
/// of a not-found page during the initial fetch.
#[derive(Debug, PartialEq)]
pub enum Lookup<'a, T> {
    /// No full fetch has completed and the record is not cached yet.
    Loading,
    /// The list is loaded and holds no record with this key.
    NotFound,
    /// The cached record.
    Found(&'a T),
}

impl<T> Clone for Lookup<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Lookup<'_, T> {}

impl<'a, T> Lookup<'a, T> {
    /// The record, if found.
    pub fn found(self) -> Option<&'a T> {
        match self {
            Lookup::Found(item) => Some(item),
            _ => None,
        }
    }

    /// `true` while the initial fetch is outstanding.
    pub fn is_loading(&self) -> bool {
        matches!(self, Lookup::Loading)
    }
}

/// Every cached record, in arrival order.
pub fn all<E: Entity>(state: &EntityState<E>) -> &[E] {
    state.items()
}

/// Number of cached records.
pub fn count<E: Entity>(state: &EntityState<E>) -> usize {
    state.items().len()
}

/// The record with `key`, if cached.
pub fn by_key<'a, E: Entity>(state: &'a EntityState<E>, key: &E::Key) -> Option<&'a E> {
    state.get(key)
}

/// Look up a record, reporting [`Lookup::Loading`] while the record is
/// absent and no full fetch has completed yet.
pub fn lookup<'a, E: Entity>(state: &'a EntityState<E>, key: &E::Key) -> Lookup<'a, E> {
    match state.get(key) {
        Some(item) => Lookup::Found(item),
        None if !state.loaded() => Lookup::Loading,
        None => Lookup::NotFound,
    }
}

/// The record focused by a details view. `None` when nothing is active.
pub fn active<E: Entity>(state: &EntityState<E>) -> Option<Lookup<'_, E>> {
    state.active().map(|key| lookup(state, key))
}

/// Records matching `pred`, in arrival order.
pub fn filter<E: Entity>(state: &EntityState<E>, mut pred: impl FnMut(&E) -> bool) -> Vec<&E> {
    state.items().iter().filter(|item| pred(item)).collect()
}

/// Records ordered by a derived sort key. Stable for equal sort keys.
pub fn sorted_by<E: Entity, K: Ord>(state: &EntityState<E>, mut f: impl FnMut(&E) -> K) -> Vec<&E> {
    let mut items: Vec<&E> = state.items().iter().collect();
    items.sort_by_key(|item| f(item));
    items
}

/// Case-insensitive substring search over the text fields `fields` returns.
///
/// An empty or all-whitespace term matches every record.
pub fn search<'a, E: Entity>(
    state: &'a EntityState<E>,
    term: &str,
    fields: impl Fn(&E) -> Vec<String>,
) -> Vec<&'a E> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return state.items().iter().collect();
    }
    state
        .items()
        .iter()
        .filter(|item| {
            fields(item)
                .iter()
                .any(|field| field.to_lowercase().contains(&term))
        })
        .collect()
}

/// Status flags of one record.
pub fn status<'a, E: Entity>(state: &'a EntityState<E>, key: &E::Key) -> Option<&'a E::Status> {
    state.statuses().get(key)
}

/// Records with any in-flight item action.
pub fn processing<E: Entity>(state: &EntityState<E>) -> Vec<&E> {
    let keys = state.processing_keys();
    state
        .items()
        .iter()
        .filter(|item| keys.contains(&item.key()))
        .collect()
}

/// Records on which `action` is in flight.
pub fn with_status<E: Entity>(state: &EntityState<E>, action: ActionOf<E>) -> Vec<&E> {
    state
        .items()
        .iter()
        .filter(|item| {
            state
                .statuses()
                .get(&item.key())
                .is_some_and(|status| status.get(action))
        })
        .collect()
}

/// Event errors concerning any of `keys`, optionally narrowed to `events`.
///
/// Pass an empty `keys` slice to get the errors not attributed to a record.
pub fn event_errors_for<'a, E: Entity>(
    state: &'a EntityState<E>,
    keys: &[E::Key],
    events: Option<&[Op<ActionOf<E>>]>,
) -> Vec<&'a EventErrorOf<E>> {
    let wanted: HashSet<&E::Key> = keys.iter().collect();
    state
        .event_errors()
        .iter()
        .filter(|entry| match &entry.id {
            Some(id) => wanted.contains(id),
            None => keys.is_empty(),
        })
        .filter(|entry| events.is_none_or(|events| events.contains(&entry.event)))
        .collect()
}

/// Resolve an optional foreign key against another slice.
///
/// `None` when the reference is unset.
pub fn resolve<'a, F: Entity>(
    foreign: &'a EntityState<F>,
    key: Option<&F::Key>,
) -> Option<Lookup<'a, F>> {
    key.map(|key| lookup(foreign, key))
}

/// Pair each record with the record its foreign key points at.
pub fn join<'a, E: Entity, F: Entity>(
    state: &'a EntityState<E>,
    foreign: &'a EntityState<F>,
    fk: impl Fn(&E) -> Option<F::Key>,
) -> Vec<(&'a E, Option<Lookup<'a, F>>)> {
    state
        .items()
        .iter()
        .map(|item| (item, resolve(foreign, fk(item).as_ref())))
        .collect()
}

/// A derived value cached against the revisions it was computed from.
///
/// # Examples
///
/// ```
/// use entity_store::Memo;
///
/// let mut memo = Memo::new();
/// let mut builds = 0;
/// memo.get_or_compute(&[3, 7], || {
///     builds += 1;
///     vec!["storage", "dmz"]
/// });
/// let names = memo.get_or_compute(&[3, 7], || {
///     builds += 1;
///     Vec::new()
/// });
/// assert_eq!(names, &["storage", "dmz"]);
/// assert_eq!(builds, 1);
/// ```
#[derive(Debug, Clone)]
pub struct Memo<T> {
    revisions: Vec<u64>,
    value: Option<T>,
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Self {
            revisions: Vec::new(),
            value: None,
        }
    }
}

impl<T> Memo<T> {
    /// An empty memo that computes on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value if `revisions` match the ones it was computed
    /// from, otherwise recompute it with `compute`.
    pub fn get_or_compute(&mut self, revisions: &[u64], compute: impl FnOnce() -> T) -> &T {
        if self.revisions != revisions {
            self.revisions = revisions.to_vec();
            self.value = None;
        }
        self.value.get_or_insert_with(compute)
    }

    /// Drop the cached value.
    pub fn invalidate(&mut self) {
        self.value = None;
    }
}
