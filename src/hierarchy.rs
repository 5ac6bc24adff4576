//! Pre-computed hierarchy tables: ancestor paths, descendant sets, the
//! pairwise LCCA matrix and parallel-region maps.\
//! Built once per document after validation, shared read-only afterwards.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::document::{State, StateId, StateKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub states: usize,
    pub lcca_entries: usize,
    pub build_micros: u128,
}

/// Hierarchy cache for one document.\
/// The LCCA matrix uses canonical `(min, max)` keys; memory is O(n^2) in the
/// number of states.
#[derive(Debug, Default)]
pub struct HierarchyCache {
    /// Per state: the path from a top-level state down to the state's
    /// parent (the state itself excluded).
    ancestor_path: Vec<Vec<StateId>>,

    /// Per state: all states transitively inside it.
    descendants: Vec<HashSet<StateId>>,

    /// Pairwise least common compound (non-parallel) ancestor,
    /// `0` = chart root.
    lcca: HashMap<(StateId, StateId), StateId>,

    /// Per state: the parallel states on its ancestor path, root first.
    parallel_ancestors: Vec<Vec<StateId>>,

    /// Per parallel state: child region to the region's descendant set.
    parallel_regions: HashMap<StateId, HashMap<StateId, HashSet<StateId>>>,

    is_compound: Vec<bool>,

    stats: CacheStats,
}

impl HierarchyCache {
    /// Builds all tables in one traversal over the state tree.
    pub fn build(states: &[State], root_states: &[StateId]) -> HierarchyCache {
        let start = Instant::now();
        let n = states.len();
        let mut cache = HierarchyCache {
            ancestor_path: vec![Vec::new(); n],
            descendants: vec![HashSet::new(); n],
            lcca: HashMap::new(),
            parallel_ancestors: vec![Vec::new(); n],
            parallel_regions: HashMap::new(),
            is_compound: states
                .iter()
                .map(|s| s.kind == StateKind::Compound)
                .collect(),
            stats: CacheStats::default(),
        };

        let mut path: Vec<StateId> = Vec::new();
        for root in root_states {
            cache.visit(states, *root, &mut path);
        }

        for parallel in states.iter().filter(|s| s.kind == StateKind::Parallel) {
            let mut regions = HashMap::new();
            for child in &parallel.children {
                if states[(child - 1) as usize].kind.is_history() {
                    continue;
                }
                regions.insert(*child, cache.descendants[(child - 1) as usize].clone());
            }
            cache.parallel_regions.insert(parallel.id, regions);
        }

        for a in states {
            for b in states {
                if a.id > b.id {
                    continue;
                }
                let value = cache.compute_lcca(a.id, b.id);
                cache.lcca.insert((a.id, b.id), value);
            }
        }

        cache.stats = CacheStats {
            states: n,
            lcca_entries: cache.lcca.len(),
            build_micros: start.elapsed().as_micros(),
        };
        cache
    }

    fn visit(&mut self, states: &[State], sid: StateId, path: &mut Vec<StateId>) {
        let idx = (sid - 1) as usize;
        self.ancestor_path[idx] = path.clone();
        self.parallel_ancestors[idx] = path
            .iter()
            .filter(|a| states[(*a - 1) as usize].kind == StateKind::Parallel)
            .cloned()
            .collect();
        for anc in path.iter() {
            self.descendants[(*anc - 1) as usize].insert(sid);
        }
        path.push(sid);
        let children = states[idx].children.clone();
        for child in children {
            self.visit(states, child, path);
        }
        path.pop();
    }

    fn compute_lcca(&self, a: StateId, b: StateId) -> StateId {
        if a == b {
            // By convention: the parent if it is compound, the state itself
            // otherwise.
            return match self.ancestor_path[(a - 1) as usize].last() {
                Some(parent) if self.is_compound[(*parent - 1) as usize] => *parent,
                _ => a,
            };
        }
        let path_a = &self.ancestor_path[(a - 1) as usize];
        let path_b = &self.ancestor_path[(b - 1) as usize];
        let mut lcca = 0;
        for (x, y) in path_a.iter().zip(path_b.iter()) {
            if x != y {
                break;
            }
            if self.is_compound[(*x - 1) as usize] {
                lcca = *x;
            }
        }
        lcca
    }

    /// The path from a top-level state down to `sid`'s parent.
    pub fn ancestors(&self, sid: StateId) -> &[StateId] {
        &self.ancestor_path[(sid - 1) as usize]
    }

    /// Proper ancestors in ancestry order (parent first), up to but
    /// excluding `bound`. `bound = 0` returns the full chain.
    pub fn proper_ancestors(&self, sid: StateId, bound: StateId) -> Vec<StateId> {
        let mut r = Vec::new();
        for anc in self.ancestor_path[(sid - 1) as usize].iter().rev() {
            if *anc == bound {
                break;
            }
            r.push(*anc);
        }
        r
    }

    pub fn descendants(&self, sid: StateId) -> &HashSet<StateId> {
        &self.descendants[(sid - 1) as usize]
    }

    /// True if `state` is transitively inside `ancestor`. Every state is a
    /// descendant of the chart root `0`.
    pub fn is_descendant(&self, state: StateId, ancestor: StateId) -> bool {
        if ancestor == 0 {
            return true;
        }
        self.descendants[(ancestor - 1) as usize].contains(&state)
    }

    /// Least common compound ancestor of a pair, symmetric.
    pub fn lcca(&self, a: StateId, b: StateId) -> StateId {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.lcca.get(&key).cloned().unwrap_or(0)
    }

    /// Least common compound ancestor of a non-empty set: the deepest
    /// compound ancestor of the first element that contains all others.
    pub fn lcca_of_set(&self, states: &[StateId]) -> StateId {
        let head = states[0];
        if states.len() == 2 && head != states[1] {
            return self.lcca(head, states[1]);
        }
        for anc in self.ancestor_path[(head - 1) as usize].iter().rev() {
            if !self.is_compound[(*anc - 1) as usize] {
                continue;
            }
            if states[1..].iter().all(|s| self.is_descendant(*s, *anc)) {
                return *anc;
            }
        }
        0
    }

    pub fn parallel_ancestors(&self, sid: StateId) -> &[StateId] {
        &self.parallel_ancestors[(sid - 1) as usize]
    }

    pub fn parallel_regions(&self, parallel: StateId) -> Option<&HashMap<StateId, HashSet<StateId>>> {
        self.parallel_regions.get(&parallel)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Rechecks the cache against freshly recomputed values. Used by tests.
    pub fn validate_cache(&self, states: &[State], root_states: &[StateId]) -> Result<(), Vec<String>> {
        let fresh = HierarchyCache::build(states, root_states);
        let mut errors = Vec::new();
        for s in states {
            let idx = (s.id - 1) as usize;
            if fresh.ancestor_path[idx] != self.ancestor_path[idx] {
                errors.push(format!("ancestor path mismatch for '{}'", s.name));
            }
            if fresh.descendants[idx] != self.descendants[idx] {
                errors.push(format!("descendant set mismatch for '{}'", s.name));
            }
            if fresh.parallel_ancestors[idx] != self.parallel_ancestors[idx] {
                errors.push(format!("parallel ancestors mismatch for '{}'", s.name));
            }
        }
        if fresh.lcca != self.lcca {
            errors.push("lcca matrix mismatch".to_string());
        }
        if fresh.parallel_regions != self.parallel_regions {
            errors.push("parallel region mismatch".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
