//! Module/form tree and its visibility-pruned copy.
//!
//! The tree is an arena keyed by module id; parent/child links are id lists,
//! so building, walking and pruning never recurse.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use formgate_core::{AccessError, AccessResult, FormId, ModuleId};

use crate::{AccessSnapshot, EffectiveAccess, Form, Module};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleNode {
    pub module: Module,
    /// Ordered by (sort order, name, id).
    pub forms: Vec<Form>,
    /// Ordered by the module sort key.
    pub children: Vec<ModuleId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleTree {
    roots: Vec<ModuleId>,
    nodes: HashMap<ModuleId, ModuleNode>,
}

/// One step of a pre-order walk.
#[derive(Debug, Clone, Copy)]
pub struct TreeEntry<'a> {
    pub depth: usize,
    pub node: &'a ModuleNode,
}

impl ModuleTree {
    /// Build the full tree of an organization.
    ///
    /// Every module must be reachable from a root; modules caught in a cycle
    /// or hanging off a missing parent are reported as an integrity error.
    pub fn build(snapshot: &AccessSnapshot) -> AccessResult<Self> {
        let mut forms_by_module: HashMap<ModuleId, Vec<Form>> = HashMap::new();
        for form in &snapshot.forms {
            forms_by_module
                .entry(form.module_id)
                .or_default()
                .push(form.clone());
        }

        let mut ordered: Vec<&Module> = snapshot.modules.iter().collect();
        ordered.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let mut tree = ModuleTree::default();
        let mut children: HashMap<ModuleId, Vec<ModuleId>> = HashMap::new();
        for module in &ordered {
            match module.parent_id {
                Some(parent) => children.entry(parent).or_default().push(module.id),
                None => tree.roots.push(module.id),
            }
        }

        for module in ordered {
            let mut forms = forms_by_module.remove(&module.id).unwrap_or_default();
            forms.sort_by(|a, b| {
                a.sort_order
                    .cmp(&b.sort_order)
                    .then_with(|| a.name.cmp(&b.name))
                    .then_with(|| a.id.cmp(&b.id))
            });
            tree.nodes.insert(
                module.id,
                ModuleNode {
                    module: module.clone(),
                    forms,
                    children: children.remove(&module.id).unwrap_or_default(),
                },
            );
        }

        let reachable = tree.walk().count();
        if reachable != tree.nodes.len() {
            let msg = format!(
                "{} of {} modules are unreachable from a root (cycle or missing parent)",
                tree.nodes.len() - reachable,
                tree.nodes.len()
            );
            tracing::error!(
                organization_id = %snapshot.organization.id,
                error = %msg,
                "module tree integrity violation"
            );
            return Err(AccessError::integrity(msg));
        }

        Ok(tree)
    }

    pub fn roots(&self) -> &[ModuleId] {
        &self.roots
    }

    pub fn node(&self, id: ModuleId) -> Option<&ModuleNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pre-order, depth-first walk from the roots in display order.
    pub fn walk(&self) -> impl Iterator<Item = TreeEntry<'_>> + '_ {
        let mut stack: Vec<(ModuleId, usize)> =
            self.roots.iter().rev().map(|id| (*id, 0)).collect();
        let mut seen: HashSet<ModuleId> = HashSet::new();

        std::iter::from_fn(move || {
            while let Some((id, depth)) = stack.pop() {
                if !seen.insert(id) {
                    continue;
                }
                let Some(node) = self.nodes.get(&id) else {
                    continue;
                };
                stack.extend(node.children.iter().rev().map(|c| (*c, depth + 1)));
                return Some(TreeEntry { depth, node });
            }
            None
        })
    }

    /// New tree holding only visible modules and, inside them, visible forms.
    ///
    /// A module is kept only when its parent is kept, so the result is always
    /// a well-formed tree. Order is preserved; `self` is left untouched.
    pub fn prune(&self, access: &EffectiveAccess) -> ModuleTree {
        let visible_modules: HashSet<ModuleId> =
            access.visible_module_ids.iter().copied().collect();
        let visible_forms: HashSet<FormId> = access.visible_form_ids.iter().copied().collect();

        let mut pruned = ModuleTree::default();
        for entry in self.walk() {
            let module = &entry.node.module;
            if !visible_modules.contains(&module.id) {
                continue;
            }
            match module.parent_id {
                None => pruned.roots.push(module.id),
                Some(parent) if pruned.nodes.contains_key(&parent) => {}
                Some(_) => continue,
            }
            pruned.nodes.insert(
                module.id,
                ModuleNode {
                    module: module.clone(),
                    forms: entry
                        .node
                        .forms
                        .iter()
                        .filter(|f| visible_forms.contains(&f.id))
                        .cloned()
                        .collect(),
                    children: Vec::new(),
                },
            );
        }

        // Children lists keep the source order, restricted to kept modules.
        let kept: Vec<ModuleId> = pruned.nodes.keys().copied().collect();
        for id in kept {
            let children: Vec<ModuleId> = self.nodes[&id]
                .children
                .iter()
                .copied()
                .filter(|c| pruned.nodes.contains_key(c))
                .collect();
            if let Some(node) = pruned.nodes.get_mut(&id) {
                node.children = children;
            }
        }

        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Fixture;
    use crate::{ActionSet, Subject, Target};

    #[test]
    fn prune_keeps_visible_lineage_and_forms() {
        let mut fx = Fixture::new();
        let hr = fx.module("HR", None);
        let leave = fx.module("Leave", Some(hr));
        let payroll = fx.module("Payroll", Some(hr));
        let finance = fx.module("Finance", None);
        let request = fx.form(leave, "Leave request");
        let balance = fx.form(leave, "Leave balance");
        fx.form(payroll, "Payslip");
        fx.form(finance, "Ledger");
        fx.grant(Subject::User(fx.user.id), Target::Form(request), ActionSet::view_only());

        let tree = ModuleTree::build(&fx.snapshot).unwrap();
        let access = fx.resolve().unwrap();
        let pruned = tree.prune(&access);

        assert_eq!(pruned.roots(), &[hr]);
        assert_eq!(pruned.node(hr).unwrap().children, vec![leave]);
        let forms: Vec<FormId> = pruned.node(leave).unwrap().forms.iter().map(|f| f.id).collect();
        assert_eq!(forms, vec![request]);
        assert!(pruned.node(payroll).is_none());
        assert!(!forms.contains(&balance));

        // Source tree is untouched.
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.node(leave).unwrap().forms.len(), 2);
    }

    #[test]
    fn walk_is_preorder_in_display_order() {
        let mut fx = Fixture::new();
        let a = fx.module("A", None);
        let a1 = fx.module("A1", Some(a));
        let a2 = fx.module("A2", Some(a));
        let b = fx.module("B", None);

        let tree = ModuleTree::build(&fx.snapshot).unwrap();
        let order: Vec<(ModuleId, usize)> =
            tree.walk().map(|e| (e.node.module.id, e.depth)).collect();
        assert_eq!(order, vec![(a, 0), (a1, 1), (a2, 1), (b, 0)]);
    }

    #[test]
    fn admin_prune_is_identity_for_active_published_tree() {
        let mut fx = Fixture::new();
        let a = fx.module("A", None);
        let b = fx.module("B", Some(a));
        fx.form(a, "F1");
        fx.form(b, "F2");
        fx.snapshot.organization.owner_user_id = Some(fx.user.id);

        let tree = ModuleTree::build(&fx.snapshot).unwrap();
        let access = fx.resolve().unwrap();
        assert_eq!(tree.prune(&access), tree);
    }

    #[test]
    fn unreachable_modules_fail_build() {
        let mut fx = Fixture::new();
        let a = fx.module("A", None);
        let b = fx.module("B", Some(a));
        fx.snapshot.modules.iter_mut().find(|m| m.id == a).unwrap().parent_id = Some(b);

        assert!(matches!(
            ModuleTree::build(&fx.snapshot),
            Err(AccessError::Integrity(_))
        ));
    }
}
