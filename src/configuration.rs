//! The active-state configuration and the history tracker.\
//! A configuration stores the active leaf states only; ancestors are always
//! derived from the document hierarchy.

use std::collections::{HashMap, HashSet};

use crate::document::{Document, StateId, StateKind};

/// The set of currently active leaf states.\
/// Kept in entry order; all derived queries go through the document's
/// hierarchy cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    leaves: Vec<StateId>,
}

impl Configuration {
    pub fn new() -> Configuration {
        Configuration { leaves: Vec::new() }
    }

    /// Creates a configuration from a leaf set, validating the chart
    /// invariants: only leaves, exactly one active child per active compound
    /// state, all regions active for active parallel states.
    pub fn with_leaves(document: &Document, leaves: Vec<StateId>) -> Result<Configuration, String> {
        let configuration = Configuration { leaves };
        configuration.validate(document)?;
        Ok(configuration)
    }

    pub fn validate(&self, document: &Document) -> Result<(), String> {
        for sid in &self.leaves {
            let state = document.state(*sid);
            if !state.kind.is_leaf() {
                return Err(format!(
                    "configuration member '{}' is not an atomic or final state",
                    state.name
                ));
            }
        }
        let mut seen = HashSet::new();
        for sid in &self.leaves {
            if !seen.insert(*sid) {
                return Err(format!(
                    "configuration member '{}' occurs twice",
                    document.state(*sid).name
                ));
            }
        }
        let active = self.all_active(document);
        for sid in &active {
            let state = document.state(*sid);
            match state.kind {
                StateKind::Compound => {
                    let active_children = state
                        .children
                        .iter()
                        .filter(|c| active.contains(c))
                        .count();
                    if active_children != 1 {
                        return Err(format!(
                            "compound state '{}' has {} active children",
                            state.name, active_children
                        ));
                    }
                }
                StateKind::Parallel => {
                    for child in &state.children {
                        if document.state(*child).kind.is_history() {
                            continue;
                        }
                        if !active.contains(child) {
                            return Err(format!(
                                "parallel state '{}' has inactive region '{}'",
                                state.name,
                                document.state(*child).name
                            ));
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Unvalidated constructor for the engine's transient mid-step states.
    pub(crate) fn from_leaves_unchecked(leaves: Vec<StateId>) -> Configuration {
        Configuration { leaves }
    }

    pub(crate) fn insert_leaf(&mut self, sid: StateId) {
        if !self.leaves.contains(&sid) {
            self.leaves.push(sid);
        }
    }

    pub(crate) fn remove_leaf(&mut self, sid: StateId) {
        self.leaves.retain(|s| *s != sid);
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// The active leaves.
    pub fn active_leaves(&self) -> Vec<StateId> {
        self.leaves.clone()
    }

    pub fn leaves(&self) -> &[StateId] {
        &self.leaves
    }

    /// Leaves plus all their ancestors.
    pub fn all_active(&self, document: &Document) -> HashSet<StateId> {
        let mut active: HashSet<StateId> = self.leaves.iter().cloned().collect();
        for leaf in &self.leaves {
            for anc in document.hierarchy.ancestors(*leaf) {
                active.insert(*anc);
            }
        }
        active
    }

    /// Leaves plus ancestors, sorted in document order.
    pub fn all_active_document_order(&self, document: &Document) -> Vec<StateId> {
        let mut active: Vec<StateId> = self.all_active(document).into_iter().collect();
        active.sort_by(|a, b| document.document_order(a, b));
        active
    }

    /// Membership by leaf or ancestor.
    pub fn is_active(&self, document: &Document, sid: StateId) -> bool {
        if self.leaves.contains(&sid) {
            return true;
        }
        self.leaves
            .iter()
            .any(|leaf| document.hierarchy.is_descendant(*leaf, sid))
    }

    /// Active leaf names in document order, for logs and assertions.
    pub fn leaf_names(&self, document: &Document) -> Vec<String> {
        let mut ids = self.leaves.clone();
        ids.sort_by(|a, b| document.document_order(a, b));
        ids.iter()
            .map(|sid| document.state(*sid).name.clone())
            .collect()
    }
}

/// Records shallow and deep snapshots per parent state.\
/// History is recorded immediately before a step exits the parent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryTracker {
    shallow: HashMap<StateId, Vec<StateId>>,
    deep: HashMap<StateId, Vec<StateId>>,
}

impl HistoryTracker {
    pub fn new() -> HistoryTracker {
        HistoryTracker {
            shallow: HashMap::new(),
            deep: HashMap::new(),
        }
    }

    /// Captures both snapshots for `parent`:\
    /// shallow: the parent's children intersected with the active set,\
    /// deep: the active leaves inside the parent.
    pub fn record(&mut self, parent: StateId, active_leaves: &[StateId], document: &Document) {
        let active: HashSet<StateId> = {
            let mut a: HashSet<StateId> = active_leaves.iter().cloned().collect();
            for leaf in active_leaves {
                for anc in document.hierarchy.ancestors(*leaf) {
                    a.insert(*anc);
                }
            }
            a
        };
        let mut shallow: Vec<StateId> = document
            .state(parent)
            .children
            .iter()
            .filter(|c| active.contains(c))
            .cloned()
            .collect();
        shallow.sort_by(|a, b| document.document_order(a, b));

        let mut deep: Vec<StateId> = active_leaves
            .iter()
            .filter(|leaf| document.hierarchy.is_descendant(**leaf, parent))
            .cloned()
            .collect();
        deep.sort_by(|a, b| document.document_order(a, b));

        self.shallow.insert(parent, shallow);
        self.deep.insert(parent, deep);
    }

    pub fn get_shallow(&self, parent: StateId) -> Option<&Vec<StateId>> {
        self.shallow.get(&parent)
    }

    pub fn get_deep(&self, parent: StateId) -> Option<&Vec<StateId>> {
        self.deep.get(&parent)
    }

    pub fn has_history(&self, parent: StateId) -> bool {
        self.shallow.contains_key(&parent) || self.deep.contains_key(&parent)
    }

    pub fn clear(&mut self, parent: StateId) {
        self.shallow.remove(&parent);
        self.deep.remove(&parent);
    }
}
