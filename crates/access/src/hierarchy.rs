//! Ancestor and descendant walks over single-parent trees.
//!
//! Used for both the module tree and the organization-unit tree. Every walk is
//! iterative with an explicit work queue, so tree depth is bounded only by
//! [`MAX_HIERARCHY_DEPTH`], never by the call stack.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use formgate_core::{AccessError, AccessResult, TreeNode};

/// Longest ancestor chain accepted before the data is declared corrupt.
pub const MAX_HIERARCHY_DEPTH: usize = 10_000;

/// Parent/child index over one tree (or forest).
#[derive(Debug, Clone)]
pub struct Hierarchy<Id> {
    parents: HashMap<Id, Option<Id>>,
    children: HashMap<Id, Vec<Id>>,
}

impl<Id> Default for Hierarchy<Id> {
    fn default() -> Self {
        Self {
            parents: HashMap::new(),
            children: HashMap::new(),
        }
    }
}

impl<Id> Hierarchy<Id>
where
    Id: Copy + Eq + Hash + core::fmt::Debug + core::fmt::Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Index any set of tree nodes. Children keep the iteration order of `nodes`.
    pub fn from_nodes<'a, N>(nodes: impl IntoIterator<Item = &'a N>) -> Self
    where
        N: TreeNode<Id = Id> + 'a,
    {
        let mut hierarchy = Self::new();
        for node in nodes {
            hierarchy.insert(node.id(), node.parent_id());
        }
        hierarchy
    }

    pub fn insert(&mut self, id: Id, parent: Option<Id>) {
        self.parents.insert(id, parent);
        if let Some(p) = parent {
            self.children.entry(p).or_default().push(id);
        }
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn contains(&self, id: Id) -> bool {
        self.parents.contains_key(&id)
    }

    pub fn parent_of(&self, id: Id) -> Option<Id> {
        self.parents.get(&id).copied().flatten()
    }

    pub fn children_of(&self, id: Id) -> &[Id] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ancestors ordered from the direct parent up to the root.
    ///
    /// Fails with `NotFound` for an unknown id and with `Integrity` when the
    /// chain revisits a node, references a missing parent, or exceeds
    /// [`MAX_HIERARCHY_DEPTH`].
    pub fn ancestors_of(&self, id: Id) -> AccessResult<Vec<Id>> {
        let mut current = match self.parents.get(&id) {
            Some(parent) => *parent,
            None => return Err(AccessError::not_found(format!("node {id}"))),
        };

        let mut chain = Vec::new();
        let mut seen: HashSet<Id> = HashSet::from([id]);

        while let Some(parent) = current {
            if chain.len() >= MAX_HIERARCHY_DEPTH {
                return Err(integrity(format!(
                    "ancestor chain of {id} exceeds {MAX_HIERARCHY_DEPTH} levels"
                )));
            }
            if !seen.insert(parent) {
                return Err(integrity(format!("cycle through {parent} above {id}")));
            }
            let Some(next) = self.parents.get(&parent) else {
                return Err(integrity(format!("{id} references missing ancestor {parent}")));
            };
            chain.push(parent);
            current = *next;
        }

        Ok(chain)
    }

    /// Descendants in breadth-first order (excluding `id` itself).
    pub fn descendants_bfs(&self, id: Id) -> AccessResult<Vec<Id>> {
        if !self.contains(id) {
            return Err(AccessError::not_found(format!("node {id}")));
        }

        let mut visited: HashSet<Id> = HashSet::from([id]);
        let mut order = Vec::new();
        let mut queue: VecDeque<Id> = self.children_of(id).iter().copied().collect();

        while let Some(next) = queue.pop_front() {
            if !visited.insert(next) {
                return Err(integrity(format!("cycle through {next} below {id}")));
            }
            order.push(next);
            queue.extend(self.children_of(next).iter().copied());
        }

        Ok(order)
    }

    /// Descendant set of `id` (excluding `id` itself).
    pub fn descendants_of(&self, id: Id) -> AccessResult<HashSet<Id>> {
        Ok(self.descendants_bfs(id)?.into_iter().collect())
    }

    /// `id` and its whole subtree, leaves before parents, `id` last.
    ///
    /// Deleting in this order never leaves a child pointing at a removed parent.
    pub fn removal_order(&self, id: Id) -> AccessResult<Vec<Id>> {
        let mut order = self.descendants_bfs(id)?;
        order.reverse();
        order.push(id);
        Ok(order)
    }

    /// Whether `node` is `root` or lies somewhere below it.
    pub fn is_within(&self, root: Id, node: Id) -> AccessResult<bool> {
        if root == node {
            return Ok(self.contains(node));
        }
        Ok(self.ancestors_of(node)?.contains(&root))
    }
}

fn integrity(msg: String) -> AccessError {
    tracing::error!(error = %msg, "hierarchy integrity violation");
    AccessError::integrity(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use formgate_core::UnitId;

    /// root ─┬─ a ─── a1
    ///       └─ b ─┬─ b1
    ///             └─ b2 ─── b2x
    fn sample() -> (Hierarchy<UnitId>, [UnitId; 7]) {
        let ids = [(); 7].map(|_| UnitId::new());
        let [root, a, a1, b, b1, b2, b2x] = ids;
        let mut h = Hierarchy::new();
        h.insert(root, None);
        h.insert(a, Some(root));
        h.insert(a1, Some(a));
        h.insert(b, Some(root));
        h.insert(b1, Some(b));
        h.insert(b2, Some(b));
        h.insert(b2x, Some(b2));
        (h, ids)
    }

    #[test]
    fn ancestors_run_parent_to_root() {
        let (h, [root, _a, _a1, b, _b1, b2, b2x]) = sample();
        assert_eq!(h.ancestors_of(b2x).unwrap(), vec![b2, b, root]);
        assert!(h.ancestors_of(root).unwrap().is_empty());
    }

    #[test]
    fn descendants_are_breadth_first() {
        let (h, [_root, _a, _a1, b, b1, b2, b2x]) = sample();
        assert_eq!(h.descendants_bfs(b).unwrap(), vec![b1, b2, b2x]);
        assert_eq!(h.descendants_of(b).unwrap().len(), 3);
    }

    #[test]
    fn removal_order_puts_leaves_first() {
        let (h, [_root, _a, _a1, b, b1, b2, b2x]) = sample();
        let order = h.removal_order(b).unwrap();
        assert_eq!(order.last(), Some(&b));
        let pos = |id| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(b2x) < pos(b2));
        assert!(pos(b1) < pos(b));
    }

    #[test]
    fn unknown_node_is_not_found() {
        let (h, _) = sample();
        assert!(matches!(h.ancestors_of(UnitId::new()), Err(AccessError::NotFound(_))));
        assert!(matches!(h.descendants_bfs(UnitId::new()), Err(AccessError::NotFound(_))));
    }

    #[test]
    fn cycles_are_integrity_errors() {
        let (x, y, z) = (UnitId::new(), UnitId::new(), UnitId::new());
        let mut h = Hierarchy::new();
        h.insert(x, Some(z));
        h.insert(y, Some(x));
        h.insert(z, Some(y));
        assert!(matches!(h.ancestors_of(x), Err(AccessError::Integrity(_))));
        assert!(matches!(h.descendants_bfs(x), Err(AccessError::Integrity(_))));
    }

    #[test]
    fn missing_parent_is_integrity_error() {
        let mut h = Hierarchy::new();
        let orphan = UnitId::new();
        h.insert(orphan, Some(UnitId::new()));
        assert!(matches!(h.ancestors_of(orphan), Err(AccessError::Integrity(_))));
    }

    #[test]
    fn deep_chains_do_not_recurse() {
        let ids: Vec<UnitId> = (0..5_000).map(|_| UnitId::new()).collect();
        let mut h = Hierarchy::new();
        h.insert(ids[0], None);
        for pair in ids.windows(2) {
            h.insert(pair[1], Some(pair[0]));
        }
        let leaf = *ids.last().unwrap();
        assert_eq!(h.ancestors_of(leaf).unwrap().len(), ids.len() - 1);
        assert_eq!(h.descendants_bfs(ids[0]).unwrap().len(), ids.len() - 1);
        assert_eq!(h.removal_order(ids[0]).unwrap().first(), Some(&leaf));
    }

    #[test]
    fn depth_cap_is_enforced() {
        let ids: Vec<UnitId> = (0..=MAX_HIERARCHY_DEPTH + 1).map(|_| UnitId::new()).collect();
        let mut h = Hierarchy::new();
        h.insert(ids[0], None);
        for pair in ids.windows(2) {
            h.insert(pair[1], Some(pair[0]));
        }
        let err = h.ancestors_of(*ids.last().unwrap()).unwrap_err();
        assert!(matches!(err, AccessError::Integrity(_)));
    }

    #[test]
    fn is_within_covers_self_and_subtree() {
        let (h, [root, a, a1, b, _b1, _b2, b2x]) = sample();
        assert!(h.is_within(root, b2x).unwrap());
        assert!(h.is_within(a, a1).unwrap());
        assert!(h.is_within(b, b).unwrap());
        assert!(!h.is_within(a, b2x).unwrap());
    }
}
