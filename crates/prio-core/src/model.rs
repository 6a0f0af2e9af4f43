//! In-memory list model.
//!
//! A [`ListModel`] holds the ordered membership of opaque items across a fixed
//! set of named lists. It is a plain data structure: every operation is
//! synchronous, validates before it mutates, and has no side effects beyond
//! its own state. Two invariants hold after every successful call:
//!
//! - every item belongs to exactly one list;
//! - a list's order is its index order, with no gaps.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque item identifier (a label id, an issue id, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for ItemId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Name of one list (e.g. `prioritized`, `other`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListName(String);

impl ListName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ListName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ListName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// An item together with its membership tag and ordinal position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub list: ListName,
    pub position: usize,
}

/// Immutable copy of one list's order, taken before a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListSnapshot {
    list: ListName,
    ids: Vec<ItemId>,
}

impl ListSnapshot {
    #[must_use]
    pub fn list(&self) -> &ListName {
        &self.list
    }

    #[must_use]
    pub fn ids(&self) -> &[ItemId] {
        &self.ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Initial state as rendered by the server: every list with its items in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSeed {
    #[serde(default)]
    pub lists: Vec<SeedList>,
}

/// One list of a [`ListSeed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedList {
    pub name: ListName,
    #[serde(default)]
    pub items: Vec<ItemId>,
}

impl ListSeed {
    /// Parse a seed from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when `json` is not a valid seed.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// ListModel
// ---------------------------------------------------------------------------

/// Ordered membership of items across named lists. Serializes as the list
/// map alone.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ListModel {
    lists: BTreeMap<ListName, Vec<ItemId>>,
    #[serde(skip)]
    membership: BTreeMap<ItemId, ListName>,
}

impl ListModel {
    /// Build a model from `(list, items)` pairs. Repeating a list name appends
    /// to it.
    ///
    /// # Errors
    ///
    /// [`ModelError::DuplicateItem`] when an item is seeded more than once.
    pub fn new<I>(lists: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = (ListName, Vec<ItemId>)>,
    {
        let mut model = Self::default();
        for (name, items) in lists {
            let entry = model.lists.entry(name.clone()).or_default();
            for item in items {
                if model.membership.insert(item.clone(), name.clone()).is_some() {
                    return Err(ModelError::DuplicateItem(item));
                }
                entry.push(item);
            }
        }
        Ok(model)
    }

    /// Build a model from a server-rendered seed.
    ///
    /// # Errors
    ///
    /// See [`ListModel::new`].
    pub fn from_seed(seed: ListSeed) -> Result<Self, ModelError> {
        Self::new(seed.lists.into_iter().map(|list| (list.name, list.items)))
    }

    // -- queries ------------------------------------------------------------

    /// All list names, in name order.
    pub fn list_names(&self) -> impl Iterator<Item = &ListName> {
        self.lists.keys()
    }

    #[must_use]
    pub fn contains_list(&self, list: &ListName) -> bool {
        self.lists.contains_key(list)
    }

    /// Total number of items across all lists.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.membership.len()
    }

    /// Which list currently holds `item`.
    #[must_use]
    pub fn list_of(&self, item: &ItemId) -> Option<&ListName> {
        self.membership.get(item)
    }

    /// Index of `item` within its list.
    #[must_use]
    pub fn position(&self, item: &ItemId) -> Option<usize> {
        let list = self.membership.get(item)?;
        self.lists.get(list)?.iter().position(|id| id == item)
    }

    #[must_use]
    pub fn item(&self, id: &ItemId) -> Option<Item> {
        let list = self.membership.get(id)?.clone();
        let position = self.position(id)?;
        Some(Item {
            id: id.clone(),
            list,
            position,
        })
    }

    /// Borrow a list's order.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownList`] when `list` was never declared.
    pub fn ids(&self, list: &ListName) -> Result<&[ItemId], ModelError> {
        self.lists
            .get(list)
            .map(Vec::as_slice)
            .ok_or_else(|| ModelError::UnknownList(list.clone()))
    }

    /// Ordered ids of `list`: the payload handed to the persistence gateway.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownList`] when `list` was never declared.
    pub fn sorted_ids(&self, list: &ListName) -> Result<Vec<ItemId>, ModelError> {
        self.ids(list).map(<[ItemId]>::to_vec)
    }

    /// # Errors
    ///
    /// [`ModelError::UnknownList`] when `list` was never declared.
    pub fn snapshot(&self, list: &ListName) -> Result<ListSnapshot, ModelError> {
        Ok(ListSnapshot {
            list: list.clone(),
            ids: self.sorted_ids(list)?,
        })
    }

    /// # Errors
    ///
    /// [`ModelError::UnknownList`] when `list` was never declared.
    pub fn list_len(&self, list: &ListName) -> Result<usize, ModelError> {
        self.ids(list).map(<[ItemId]>::len)
    }

    /// # Errors
    ///
    /// [`ModelError::UnknownList`] when `list` was never declared.
    pub fn list_is_empty(&self, list: &ListName) -> Result<bool, ModelError> {
        self.ids(list).map(<[ItemId]>::is_empty)
    }

    /// Owned copy of every list, keyed by name.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<ListName, Vec<ItemId>> {
        self.lists.clone()
    }

    /// Verify the membership index against the lists.
    ///
    /// # Errors
    ///
    /// [`ModelError::DuplicateItem`] for an item listed twice, or
    /// [`ModelError::ItemNotFound`] when the index and the lists disagree.
    pub fn check_invariants(&self) -> Result<(), ModelError> {
        let mut seen = BTreeSet::new();
        for (name, ids) in &self.lists {
            for id in ids {
                if !seen.insert(id) {
                    return Err(ModelError::DuplicateItem(id.clone()));
                }
                if self.membership.get(id) != Some(name) {
                    return Err(ModelError::ItemNotFound {
                        item: id.clone(),
                        list: name.clone(),
                    });
                }
            }
        }
        if seen.len() != self.membership.len() {
            let orphan = self
                .membership
                .iter()
                .find(|(id, _)| !seen.contains(id))
                .map(|(id, list)| (id.clone(), list.clone()));
            if let Some((item, list)) = orphan {
                return Err(ModelError::ItemNotFound { item, list });
            }
        }
        Ok(())
    }

    // -- mutations ----------------------------------------------------------

    /// Move `item` from `from` into `to` at `at` (default: the end). An index
    /// past the end of `to` appends. Returns the item's index in `from`.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownList`] when either list is undeclared, or
    /// [`ModelError::ItemNotFound`] when `item` is not in `from`.
    pub fn move_item(
        &mut self,
        item: &ItemId,
        from: &ListName,
        to: &ListName,
        at: Option<usize>,
    ) -> Result<usize, ModelError> {
        if !self.lists.contains_key(to) {
            return Err(ModelError::UnknownList(to.clone()));
        }
        let source = self
            .lists
            .get_mut(from)
            .ok_or_else(|| ModelError::UnknownList(from.clone()))?;
        let index = source
            .iter()
            .position(|id| id == item)
            .ok_or_else(|| ModelError::ItemNotFound {
                item: item.clone(),
                list: from.clone(),
            })?;
        let moved = source.remove(index);

        let target = self.lists.entry(to.clone()).or_default();
        let at = at.map_or(target.len(), |at| at.min(target.len()));
        target.insert(at, moved);
        self.membership.insert(item.clone(), to.clone());
        Ok(index)
    }

    /// Replace the order of `list`. `new_order` must be a permutation of the
    /// current members.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownList`] or [`ModelError::InvalidPermutation`].
    pub fn reorder(&mut self, list: &ListName, new_order: &[ItemId]) -> Result<(), ModelError> {
        let current = self
            .lists
            .get_mut(list)
            .ok_or_else(|| ModelError::UnknownList(list.clone()))?;
        if !is_permutation(current, new_order) {
            return Err(ModelError::InvalidPermutation {
                list: list.clone(),
                expected: current.len(),
            });
        }
        current.clear();
        current.extend_from_slice(new_order);
        Ok(())
    }

    /// Apply a reorder intent to a list whose membership may have changed
    /// since the intent was recorded.
    ///
    /// Members named in `order` take the slots those members currently occupy,
    /// in `order`'s relative order. Members missing from `order` keep their
    /// index; ids in `order` that are no longer members are ignored. When
    /// membership is unchanged this is exactly [`ListModel::reorder`].
    /// Returns whether the list changed.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownList`] when `list` was never declared.
    pub fn reorder_reconciled(
        &mut self,
        list: &ListName,
        order: &[ItemId],
    ) -> Result<bool, ModelError> {
        let current = self
            .lists
            .get_mut(list)
            .ok_or_else(|| ModelError::UnknownList(list.clone()))?;

        let members: BTreeSet<&ItemId> = current.iter().collect();
        let mut placed = BTreeSet::new();
        let wanted: Vec<ItemId> = order
            .iter()
            .filter(|id| members.contains(id) && placed.insert(*id))
            .cloned()
            .collect();
        let slots: Vec<usize> = current
            .iter()
            .enumerate()
            .filter(|(_, id)| placed.contains(id))
            .map(|(index, _)| index)
            .collect();

        let mut changed = false;
        for (slot, id) in slots.into_iter().zip(wanted) {
            if current[slot] != id {
                current[slot] = id;
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Make `list` hold exactly `ids`, in that order.
    ///
    /// Ids already in other lists are pulled in; ids the model has never seen
    /// are skipped. Current members missing from `ids` are appended to the
    /// list chosen by `evict_to`, which must name another declared list.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownList`] when `list` or an eviction target is
    /// undeclared, or when an eviction target is `list` itself. Nothing is
    /// mutated on error.
    pub fn assign_exact<F>(
        &mut self,
        list: &ListName,
        ids: &[ItemId],
        mut evict_to: F,
    ) -> Result<(), ModelError>
    where
        F: FnMut(&ItemId) -> ListName,
    {
        let current = self.ids(list)?;

        let mut keep = BTreeSet::new();
        let wanted: Vec<ItemId> = ids
            .iter()
            .filter(|id| self.membership.contains_key(*id) && keep.insert(*id))
            .cloned()
            .collect();

        let mut evictions = Vec::new();
        for id in current {
            if keep.contains(id) {
                continue;
            }
            let target = evict_to(id);
            if &target == list || !self.lists.contains_key(&target) {
                return Err(ModelError::UnknownList(target));
            }
            evictions.push((id.clone(), target));
        }

        for id in &wanted {
            if let Some(owner) = self.membership.get(id).cloned()
                && &owner != list
                && let Some(ids) = self.lists.get_mut(&owner)
            {
                ids.retain(|other| other != id);
            }
            self.membership.insert(id.clone(), list.clone());
        }
        for (id, target) in evictions {
            self.membership.insert(id.clone(), target.clone());
            self.lists.entry(target).or_default().push(id);
        }
        self.lists.insert(list.clone(), wanted);
        Ok(())
    }
}

fn is_permutation(current: &[ItemId], candidate: &[ItemId]) -> bool {
    if current.len() != candidate.len() {
        return false;
    }
    let members: BTreeSet<&ItemId> = current.iter().collect();
    let mut seen = BTreeSet::new();
    candidate
        .iter()
        .all(|id| members.contains(id) && seen.insert(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<ItemId> {
        raw.iter().map(|id| ItemId::from(*id)).collect()
    }

    fn model() -> ListModel {
        ListModel::new([
            (ListName::from("prioritized"), ids(&["a", "b", "c"])),
            (ListName::from("other"), ids(&["x", "y"])),
        ])
        .expect("valid seed")
    }

    #[test]
    fn seed_rejects_duplicates_across_lists() {
        let err = ListModel::new([
            (ListName::from("p"), ids(&["a"])),
            (ListName::from("o"), ids(&["a"])),
        ])
        .expect_err("duplicate");
        assert_eq!(err, ModelError::DuplicateItem(ItemId::from("a")));
    }

    #[test]
    fn seed_parses_from_json() {
        let seed = ListSeed::from_json(
            r#"{"lists":[{"name":"prioritized","items":["1","2"]},{"name":"other"}]}"#,
        )
        .expect("json");
        let model = ListModel::from_seed(seed).expect("seed");
        assert_eq!(
            model.sorted_ids(&ListName::from("prioritized")).expect("list"),
            ids(&["1", "2"])
        );
        assert!(model.list_is_empty(&ListName::from("other")).expect("list"));
    }

    #[test]
    fn move_item_defaults_to_end_and_reports_prior_index() {
        let mut model = model();
        let prior = model
            .move_item(
                &ItemId::from("b"),
                &ListName::from("prioritized"),
                &ListName::from("other"),
                None,
            )
            .expect("move");
        assert_eq!(prior, 1);
        assert_eq!(model.ids(&ListName::from("other")).expect("list"), ids(&["x", "y", "b"]));
        assert_eq!(model.list_of(&ItemId::from("b")), Some(&ListName::from("other")));
        model.check_invariants().expect("invariants");
    }

    #[test]
    fn move_item_clamps_index_past_end() {
        let mut model = model();
        model
            .move_item(
                &ItemId::from("x"),
                &ListName::from("other"),
                &ListName::from("prioritized"),
                Some(99),
            )
            .expect("move");
        assert_eq!(
            model.ids(&ListName::from("prioritized")).expect("list"),
            ids(&["a", "b", "c", "x"])
        );
    }

    #[test]
    fn move_item_from_wrong_list_is_item_not_found() {
        let mut model = model();
        let before = model.clone();
        let err = model
            .move_item(
                &ItemId::from("x"),
                &ListName::from("prioritized"),
                &ListName::from("other"),
                None,
            )
            .expect_err("not there");
        assert!(matches!(err, ModelError::ItemNotFound { .. }));
        assert_eq!(model, before);
    }

    #[test]
    fn reorder_requires_permutation() {
        let mut model = model();
        let list = ListName::from("prioritized");
        assert!(matches!(
            model.reorder(&list, &ids(&["a", "b"])),
            Err(ModelError::InvalidPermutation { expected: 3, .. })
        ));
        assert!(model.reorder(&list, &ids(&["a", "a", "b"])).is_err());
        assert!(model.reorder(&list, &ids(&["a", "b", "x"])).is_err());
        model.reorder(&list, &ids(&["c", "a", "b"])).expect("reorder");
        assert_eq!(model.sorted_ids(&list).expect("list"), ids(&["c", "a", "b"]));
    }

    #[test]
    fn snapshot_is_independent_of_later_mutation() {
        let mut model = model();
        let list = ListName::from("prioritized");
        let snap = model.snapshot(&list).expect("snapshot");
        model.reorder(&list, &ids(&["c", "b", "a"])).expect("reorder");
        assert_eq!(snap.ids(), ids(&["a", "b", "c"]).as_slice());
        assert_eq!(snap.list(), &list);
    }

    #[test]
    fn reorder_reconciled_keeps_new_members_in_place() {
        let mut model = model();
        let list = ListName::from("prioritized");
        model
            .move_item(&ItemId::from("x"), &ListName::from("other"), &list, Some(1))
            .expect("move");
        // [a, x, b, c] with intent [c, b, a, gone]
        let changed = model
            .reorder_reconciled(&list, &ids(&["c", "b", "a", "gone"]))
            .expect("reconcile");
        assert!(changed);
        assert_eq!(model.sorted_ids(&list).expect("list"), ids(&["c", "x", "b", "a"]));
        assert!(!model.reorder_reconciled(&list, &ids(&["c", "b", "a"])).expect("noop"));
    }

    #[test]
    fn assign_exact_pulls_and_evicts() {
        let mut model = model();
        let list = ListName::from("prioritized");
        let other = ListName::from("other");
        model
            .assign_exact(&list, &ids(&["y", "a", "unknown"]), |_| other.clone())
            .expect("assign");
        assert_eq!(model.sorted_ids(&list).expect("list"), ids(&["y", "a"]));
        assert_eq!(model.sorted_ids(&other).expect("list"), ids(&["x", "b", "c"]));
        model.check_invariants().expect("invariants");
    }

    #[test]
    fn assign_exact_rejects_self_eviction_without_mutating() {
        let mut model = model();
        let before = model.clone();
        let list = ListName::from("prioritized");
        let err = model
            .assign_exact(&list, &ids(&["a"]), |_| ListName::from("prioritized"))
            .expect_err("self eviction");
        assert_eq!(err, ModelError::UnknownList(list));
        assert_eq!(model, before);
    }

    #[test]
    fn item_reports_membership_and_position() {
        let model = model();
        let item = model.item(&ItemId::from("c")).expect("item");
        assert_eq!(item.list, ListName::from("prioritized"));
        assert_eq!(item.position, 2);
        assert!(model.item(&ItemId::from("zzz")).is_none());
        assert_eq!(model.item_count(), 5);
    }
}
