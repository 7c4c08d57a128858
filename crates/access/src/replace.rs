//! Complete replacement of a module's direct children.
//!
//! The caller sends the full desired child list. Planning compares it with the
//! current children and produces creates, updates and cascading removals that
//! a store then applies inside one transaction.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use formgate_core::{AccessError, AccessResult, FormId, ModuleId};

use crate::{AccessSnapshot, Module};

/// One entry of the desired child list. `id = None` creates a new module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredChild {
    pub id: Option<ModuleId>,
    pub name: String,
    pub icon: Option<String>,
    pub sort_order: i32,
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplacementPlan {
    pub created: Vec<Module>,
    pub updated: Vec<Module>,
    /// Modules to delete, leaves before parents.
    pub removed_modules: Vec<ModuleId>,
    /// Forms living in any removed module.
    pub removed_forms: Vec<FormId>,
}

impl ReplacementPlan {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.removed_modules.is_empty()
    }
}

/// Diff `desired` against the current children of `parent_id`.
///
/// Fails with `NotFound` for an unknown parent and `InvalidArgument` when an
/// entry names a module that is not a current child, repeats an id, or has a
/// blank name.
pub fn plan_child_replacement(
    snapshot: &AccessSnapshot,
    parent_id: ModuleId,
    desired: Vec<DesiredChild>,
) -> AccessResult<ReplacementPlan> {
    let parent = snapshot
        .module(parent_id)
        .ok_or_else(|| AccessError::not_found(format!("module {parent_id}")))?;
    let hierarchy = snapshot.module_hierarchy();
    let current: HashSet<ModuleId> = hierarchy.children_of(parent_id).iter().copied().collect();

    let mut plan = ReplacementPlan::default();
    let mut kept: HashSet<ModuleId> = HashSet::new();

    for child in desired {
        let name = child.name.trim();
        if name.is_empty() {
            return Err(AccessError::invalid_argument("module name must not be blank"));
        }

        match child.id {
            None => plan.created.push(Module {
                id: ModuleId::new(),
                organization_id: parent.organization_id,
                name: name.to_string(),
                icon: child.icon,
                level: parent.level + 1,
                sort_order: child.sort_order,
                active: child.active,
                parent_id: Some(parent_id),
            }),
            Some(id) => {
                if !current.contains(&id) {
                    return Err(AccessError::invalid_argument(format!(
                        "module {id} is not a child of {parent_id}"
                    )));
                }
                if !kept.insert(id) {
                    return Err(AccessError::invalid_argument(format!(
                        "module {id} listed more than once"
                    )));
                }
                let Some(existing) = snapshot.module(id) else {
                    return Err(AccessError::not_found(format!("module {id}")));
                };
                let next = Module {
                    name: name.to_string(),
                    icon: child.icon,
                    sort_order: child.sort_order,
                    active: child.active,
                    ..existing.clone()
                };
                if &next != existing {
                    plan.updated.push(next);
                }
            }
        }
    }

    for child in hierarchy.children_of(parent_id) {
        if kept.contains(child) {
            continue;
        }
        plan.removed_modules.extend(hierarchy.removal_order(*child)?);
    }

    let removed: HashSet<ModuleId> = plan.removed_modules.iter().copied().collect();
    plan.removed_forms = snapshot
        .forms
        .iter()
        .filter(|f| removed.contains(&f.module_id))
        .map(|f| f.id)
        .collect();

    Ok(plan)
}
