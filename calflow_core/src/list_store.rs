//! Named object lists and per-algorithm scopes.
//!
//! One `ListStore` per object kind maps list names to ordered sets of
//! handles, with exactly one name selected as current. Cluster and pfo
//! stores are exclusive (an object lives in at most one list, tracked by an
//! owner index); hit and track stores hold shared views of registry objects.
//!
//! Every running algorithm has an `AlgorithmScope` recording the list that was
//! current on entry and the temporary lists it created, so that
//! `reset_scope` can tear everything down when the algorithm returns.

use indexmap::IndexSet;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;

use crate::error::{PfError, PfResult};

/// Canonical input list, never deleted during an event.
pub const INPUT_LIST_NAME: &str = "Input";

/// The empty "nothing selected" list.
pub const NULL_LIST_NAME: &str = "NullList";

/// Identity of one running algorithm invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlgorithmId(pub(crate) u64);

impl AlgorithmId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alg{}", self.0)
    }
}

/// Whether an object may sit in several lists at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// At most one list (clusters, pfos)
    Exclusive,
    /// Any number of lists (hits, tracks)
    Shared,
}

#[derive(Debug, Clone)]
struct AlgorithmScope {
    parent_list_name: String,
    temporary_list_names: BTreeSet<String>,
    lists_created: u32,
}

/// Named lists of one object kind.
#[derive(Debug)]
pub struct ListStore<T> {
    kind: &'static str,
    ownership: Ownership,
    lists: BTreeMap<String, IndexSet<T>>,
    owners: HashMap<T, String>,
    current: Option<String>,
    scopes: BTreeMap<AlgorithmId, AlgorithmScope>,
}

impl<T> ListStore<T>
where
    T: Copy + Eq + Hash + Ord + fmt::Debug + fmt::Display,
{
    pub fn new(kind: &'static str, ownership: Ownership) -> Self {
        Self {
            kind,
            ownership,
            lists: BTreeMap::new(),
            owners: HashMap::new(),
            current: None,
            scopes: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    // ========================================================================
    // EVENT LIFECYCLE
    // ========================================================================

    /// Drops every list and scope; nothing is current afterwards.
    pub(crate) fn reset(&mut self) {
        self.lists.clear();
        self.owners.clear();
        self.current = None;
        self.scopes.clear();
    }

    /// Creates the input and null lists for a new event.
    pub(crate) fn begin(&mut self) {
        self.reset();
        self.lists.insert(INPUT_LIST_NAME.to_string(), IndexSet::new());
        self.lists.insert(NULL_LIST_NAME.to_string(), IndexSet::new());
        self.current = Some(match self.ownership {
            Ownership::Shared => INPUT_LIST_NAME.to_string(),
            Ownership::Exclusive => NULL_LIST_NAME.to_string(),
        });
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn current_name(&self) -> PfResult<&str> {
        self.current
            .as_deref()
            .ok_or_else(|| PfError::not_initialized(format!("no current {} list", self.kind)))
    }

    /// The current list and its name.
    pub fn current(&self) -> PfResult<(&IndexSet<T>, &str)> {
        let name = self.current_name()?;
        Ok((self.list(name)?, name))
    }

    /// Snapshot of the current list's contents.
    pub fn current_objects(&self) -> PfResult<Vec<T>> {
        Ok(self.current()?.0.iter().copied().collect())
    }

    pub fn list(&self, name: &str) -> PfResult<&IndexSet<T>> {
        self.lists
            .get(name)
            .ok_or_else(|| PfError::not_found(format!("{} list '{}'", self.kind, name)))
    }

    pub fn contains_list(&self, name: &str) -> bool {
        self.lists.contains_key(name)
    }

    pub fn list_names(&self) -> impl Iterator<Item = &str> {
        self.lists.keys().map(String::as_str)
    }

    pub fn lists(&self) -> impl Iterator<Item = (&str, &IndexSet<T>)> {
        self.lists.iter().map(|(name, list)| (name.as_str(), list))
    }

    /// Name of the list holding `object`. Exclusive stores only.
    pub fn owner_of(&self, object: T) -> Option<&str> {
        self.owners.get(&object).map(String::as_str)
    }

    /// True if any running algorithm created `name`.
    pub fn is_temporary(&self, name: &str) -> bool {
        self.scopes
            .values()
            .any(|scope| scope.temporary_list_names.contains(name))
    }

    pub fn has_scope(&self, algorithm: AlgorithmId) -> bool {
        self.scopes.contains_key(&algorithm)
    }

    pub fn n_scopes(&self) -> usize {
        self.scopes.len()
    }

    pub fn parent_list_name(&self, algorithm: AlgorithmId) -> PfResult<&str> {
        Ok(self.scope(algorithm)?.parent_list_name.as_str())
    }

    pub fn temporary_list_names(&self, algorithm: AlgorithmId) -> PfResult<Vec<String>> {
        Ok(self
            .scope(algorithm)?
            .temporary_list_names
            .iter()
            .cloned()
            .collect())
    }

    fn scope(&self, algorithm: AlgorithmId) -> PfResult<&AlgorithmScope> {
        self.scopes
            .get(&algorithm)
            .ok_or_else(|| PfError::not_found(format!("{} scope for {}", self.kind, algorithm)))
    }

    fn scope_mut(&mut self, algorithm: AlgorithmId) -> PfResult<&mut AlgorithmScope> {
        let kind = self.kind;
        self.scopes
            .get_mut(&algorithm)
            .ok_or_else(|| PfError::not_found(format!("{} scope for {}", kind, algorithm)))
    }

    // ========================================================================
    // MEMBERSHIP
    // ========================================================================

    fn attach(&mut self, name: &str, object: T) -> PfResult<()> {
        if self.ownership == Ownership::Exclusive {
            if let Some(owner) = self.owners.get(&object) {
                return Err(PfError::not_allowed(format!(
                    "{} {} already belongs to list '{}'",
                    self.kind, object, owner
                )));
            }
        }
        let kind = self.kind;
        self.lists
            .get_mut(name)
            .ok_or_else(|| PfError::not_found(format!("{} list '{}'", kind, name)))?
            .insert(object);
        if self.ownership == Ownership::Exclusive {
            self.owners.insert(object, name.to_string());
        }
        Ok(())
    }

    /// Appends to the input list.
    pub(crate) fn insert_input(&mut self, object: T) -> PfResult<()> {
        self.attach(INPUT_LIST_NAME, object)
    }

    /// Appends to the current list, which must be temporary.
    pub(crate) fn add_to_current(&mut self, object: T) -> PfResult<()> {
        let name = self.current_name()?.to_string();
        if !self.is_temporary(&name) {
            return Err(PfError::not_allowed(format!(
                "{} objects can only be created in temporary lists, current is '{}'",
                self.kind, name
            )));
        }
        self.attach(&name, object)
    }

    pub(crate) fn add_to_list(&mut self, name: &str, object: T) -> PfResult<()> {
        self.attach(name, object)
    }

    /// Detaches an exclusively owned object from whichever list holds it.
    pub(crate) fn remove(&mut self, object: T) -> Option<String> {
        let owner = self.owners.remove(&object)?;
        if let Some(list) = self.lists.get_mut(&owner) {
            list.shift_remove(&object);
        }
        Some(owner)
    }

    pub(crate) fn remove_from_list(&mut self, name: &str, object: T) -> PfResult<()> {
        let kind = self.kind;
        let list = self
            .lists
            .get_mut(name)
            .ok_or_else(|| PfError::not_found(format!("{} list '{}'", kind, name)))?;
        if !list.shift_remove(&object) {
            return Err(PfError::not_found(format!("{} {} is not in list '{}'", kind, object, name)));
        }
        if self.ownership == Ownership::Exclusive {
            self.owners.remove(&object);
        }
        Ok(())
    }

    /// Reorders a list in place.
    pub(crate) fn sort_list_by<F>(&mut self, name: &str, compare: F) -> PfResult<()>
    where
        F: FnMut(&T, &T) -> std::cmp::Ordering,
    {
        let kind = self.kind;
        self.lists
            .get_mut(name)
            .ok_or_else(|| PfError::not_found(format!("{} list '{}'", kind, name)))?
            .sort_by(compare);
        Ok(())
    }

    // ========================================================================
    // SCOPES & TEMPORARY LISTS
    // ========================================================================

    /// Opens a scope for `algorithm`, remembering the current list.
    pub(crate) fn register_scope(&mut self, algorithm: AlgorithmId) -> PfResult<()> {
        let parent = self.current_name()?.to_string();
        if self.scopes.contains_key(&algorithm) {
            return Err(PfError::not_allowed(format!(
                "{} scope for {} already open",
                self.kind, algorithm
            )));
        }
        self.scopes.insert(
            algorithm,
            AlgorithmScope {
                parent_list_name: parent,
                temporary_list_names: BTreeSet::new(),
                lists_created: 0,
            },
        );
        Ok(())
    }

    fn new_temporary_name(&mut self, algorithm: AlgorithmId) -> PfResult<String> {
        let kind = self.kind;
        let scope = self.scope_mut(algorithm)?;
        let name = format!("{}.{}.{}", algorithm.0, kind, scope.lists_created);
        scope.lists_created += 1;
        scope.temporary_list_names.insert(name.clone());
        Ok(name)
    }

    pub fn make_temporary_and_set_current(&mut self, algorithm: AlgorithmId) -> PfResult<String> {
        let name = self.new_temporary_name(algorithm)?;
        self.lists.insert(name.clone(), IndexSet::new());
        self.current = Some(name.clone());
        Ok(name)
    }

    /// Temporary current list holding `objects`. Shared stores only.
    pub(crate) fn make_temporary_with(
        &mut self,
        algorithm: AlgorithmId,
        objects: &[T],
    ) -> PfResult<String> {
        if self.ownership != Ownership::Shared {
            return Err(PfError::not_allowed(format!(
                "{} objects cannot be viewed from several lists",
                self.kind
            )));
        }
        let name = self.make_temporary_and_set_current(algorithm)?;
        for &object in objects {
            self.attach(&name, object)?;
        }
        Ok(name)
    }

    /// Moves `subset ∩ source` into a new temporary list and makes it current.
    ///
    /// Exclusive objects leave `source`; shared objects are copied.
    pub fn move_subset_to_temporary_and_set_current(
        &mut self,
        algorithm: AlgorithmId,
        source: &str,
        subset: &[T],
    ) -> PfResult<String> {
        if subset.is_empty() {
            return Err(PfError::not_allowed(format!(
                "cannot create a temporary {} list from an empty subset",
                self.kind
            )));
        }
        let wanted: BTreeSet<T> = subset.iter().copied().collect();
        let moving: Vec<T> = self
            .list(source)?
            .iter()
            .filter(|o| wanted.contains(o))
            .copied()
            .collect();
        if moving.is_empty() {
            return Err(PfError::not_allowed(format!(
                "none of the requested {} objects are in list '{}'",
                self.kind, source
            )));
        }
        self.scope(algorithm)?;

        let name = self.make_temporary_and_set_current(algorithm)?;
        for object in moving {
            if self.ownership == Ownership::Exclusive {
                self.remove_from_list(source, object)?;
            }
            self.attach(&name, object)?;
        }
        Ok(name)
    }

    /// Moves objects (all, or only `subset`) from `source` into `target`,
    /// creating `target` if needed.
    pub fn save(
        &mut self,
        algorithm: AlgorithmId,
        target: &str,
        source: &str,
        subset: Option<&[T]>,
    ) -> PfResult<()> {
        self.scope(algorithm)?;
        let available = self.list(source)?;
        if target == source {
            return Err(PfError::not_allowed(format!(
                "cannot save {} list '{}' into itself",
                self.kind, source
            )));
        }
        if target == NULL_LIST_NAME {
            return Err(PfError::not_allowed(format!("cannot save {} objects into the null list", self.kind)));
        }

        let moving: Vec<T> = match subset {
            None => available.iter().copied().collect(),
            Some(subset) => {
                if let Some(missing) = subset.iter().find(|o| !available.contains(*o)) {
                    return Err(PfError::not_found(format!(
                        "{} {} is not in list '{}'",
                        self.kind, missing, source
                    )));
                }
                subset.to_vec()
            }
        };

        if !self.lists.contains_key(target) {
            self.lists.insert(target.to_string(), IndexSet::new());
        }
        for object in moving {
            if self.ownership == Ownership::Exclusive {
                self.remove_from_list(source, object)?;
            }
            self.attach(target, object)?;
        }
        Ok(())
    }

    /// Permanently selects `name`; every running algorithm will return to it.
    pub fn replace_current(&mut self, algorithm: AlgorithmId, name: &str) -> PfResult<()> {
        self.scope(algorithm)?;
        self.list(name)?;
        if self.is_temporary(name) {
            return Err(PfError::not_allowed(format!(
                "temporary {} list '{}' cannot become the permanent current list",
                self.kind, name
            )));
        }
        for scope in self.scopes.values_mut() {
            scope.parent_list_name = name.to_string();
        }
        self.current = Some(name.to_string());
        Ok(())
    }

    /// Selects `name` until the calling algorithm's scope is reset.
    pub fn temporarily_replace_current(&mut self, name: &str) -> PfResult<()> {
        self.list(name)?;
        self.current = Some(name.to_string());
        Ok(())
    }

    /// Selects the null list.
    pub fn drop_current(&mut self) {
        self.current = Some(NULL_LIST_NAME.to_string());
    }

    /// Deletes a list, returning its contents. Input and null lists are kept.
    pub(crate) fn delete_list(&mut self, name: &str) -> PfResult<Vec<T>> {
        if name == INPUT_LIST_NAME || name == NULL_LIST_NAME {
            return Err(PfError::not_allowed(format!("{} list '{}' cannot be deleted", self.kind, name)));
        }
        let kind = self.kind;
        let removed = self
            .lists
            .remove(name)
            .ok_or_else(|| PfError::not_found(format!("{} list '{}'", kind, name)))?;
        if self.ownership == Ownership::Exclusive {
            for object in &removed {
                self.owners.remove(object);
            }
        }
        for scope in self.scopes.values_mut() {
            scope.temporary_list_names.remove(name);
        }
        if self.current.as_deref() == Some(name) {
            self.current = Some(NULL_LIST_NAME.to_string());
        }
        Ok(removed.into_iter().collect())
    }

    /// Tears down the temporary lists of `algorithm` and reselects its
    /// parent list. Objects left in deleted lists are returned for disposal.
    ///
    /// A missing scope is a no-op, so a second call after `is_finished`
    /// changes nothing.
    pub(crate) fn reset_scope(&mut self, algorithm: AlgorithmId, is_finished: bool) -> PfResult<Vec<T>> {
        let Some(scope) = self.scopes.get(&algorithm) else {
            return Ok(Vec::new());
        };
        let parent = scope.parent_list_name.clone();
        let temporaries: Vec<String> = scope
            .temporary_list_names
            .iter()
            .filter(|name| **name != parent)
            .cloned()
            .collect();

        let mut orphans = Vec::new();
        for name in temporaries {
            if self.lists.contains_key(&name) {
                orphans.extend(self.delete_list(&name)?);
            }
        }

        self.current = Some(if self.lists.contains_key(&parent) {
            parent
        } else {
            NULL_LIST_NAME.to_string()
        });

        if is_finished {
            self.scopes.remove(&algorithm);
        } else if let Some(scope) = self.scopes.get_mut(&algorithm) {
            scope.temporary_list_names.clear();
        }
        Ok(orphans)
    }
}

// ============================================================================
// TESTS
// ============================================================================
