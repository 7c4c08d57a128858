//! Validation and cascade planning shared by the store adapters.
//!
//! Planning works on a snapshot taken inside the write transaction; the
//! in-memory adapter applies plans to its state directly, the Postgres adapter
//! turns them into statements.

use std::collections::HashSet;

use formgate_access::{
    AccessSnapshot, Module, OrganizationUnit, ReplacementPlan, Subject, Target,
    UnitRoleAssignment, UserUnitAssignment,
};
use formgate_core::{AccessError, AccessResult, FormId, ModuleId, RoleId, UnitId, UserId};

use super::{NewModule, NewUnit, UnitUpdate, require_name};

/// Modules (leaves first) and forms removed by deleting one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleRemoval {
    pub modules: Vec<ModuleId>,
    pub forms: Vec<FormId>,
}

pub fn build_unit(snapshot: &AccessSnapshot, unit: NewUnit) -> AccessResult<OrganizationUnit> {
    let name = require_name(&unit.name, "unit")?;
    let level = match unit.parent_id {
        Some(parent_id) => {
            let parent = snapshot
                .unit(parent_id)
                .ok_or_else(|| AccessError::not_found(format!("unit {parent_id}")))?;
            parent.level + 1
        }
        None => 0,
    };
    Ok(OrganizationUnit {
        id: UnitId::new(),
        organization_id: snapshot.organization.id,
        name,
        level,
        sort_order: unit.sort_order,
        parent_id: unit.parent_id,
    })
}

pub fn build_module(snapshot: &AccessSnapshot, module: NewModule) -> AccessResult<Module> {
    let name = require_name(&module.name, "module")?;
    let level = match module.parent_id {
        Some(parent_id) => {
            let parent = snapshot
                .module(parent_id)
                .ok_or_else(|| AccessError::not_found(format!("module {parent_id}")))?;
            parent.level + 1
        }
        None => 0,
    };
    Ok(Module {
        id: ModuleId::new(),
        organization_id: snapshot.organization.id,
        name,
        icon: module.icon,
        level,
        sort_order: module.sort_order,
        active: module.active,
        parent_id: module.parent_id,
    })
}

/// Validate a unit update and return the unit as it will be stored together
/// with the deduplicated assignment lists. Every assigned user must hold one
/// of the roles in `assigned_roles`.
pub fn check_unit_update(
    snapshot: &AccessSnapshot,
    unit_id: UnitId,
    update: &UnitUpdate,
    is_member: impl Fn(UserId) -> bool,
) -> AccessResult<(OrganizationUnit, Vec<UnitRoleAssignment>, Vec<UserUnitAssignment>)> {
    let current = snapshot
        .unit(unit_id)
        .ok_or_else(|| AccessError::not_found(format!("unit {unit_id}")))?;

    let ensure_role = |role_id: RoleId| -> AccessResult<()> {
        snapshot
            .role(role_id)
            .map(|_| ())
            .ok_or_else(|| AccessError::not_found(format!("role {role_id}")))
    };

    let mut seen_roles: HashSet<RoleId> = HashSet::new();
    let mut unit_roles = Vec::new();
    for role_id in &update.assigned_roles {
        ensure_role(*role_id)?;
        if seen_roles.insert(*role_id) {
            unit_roles.push(UnitRoleAssignment {
                unit_id,
                role_id: *role_id,
            });
        }
    }

    let mut seen_users = HashSet::new();
    let mut user_units = Vec::new();
    for assigned in &update.assigned_users {
        ensure_role(assigned.role_id)?;
        if !seen_roles.contains(&assigned.role_id) {
            return Err(AccessError::invalid_argument(format!(
                "role {} is not assigned to unit {unit_id}",
                assigned.role_id
            )));
        }
        if !is_member(assigned.user_id) {
            return Err(AccessError::not_found(format!("user {}", assigned.user_id)));
        }
        if seen_users.insert(*assigned) {
            user_units.push(UserUnitAssignment {
                user_id: assigned.user_id,
                unit_id,
                role_id: assigned.role_id,
            });
        }
    }

    let unit = OrganizationUnit {
        name: require_name(&update.name, "unit")?,
        sort_order: update.sort_order,
        ..current.clone()
    };
    Ok((unit, unit_roles, user_units))
}

pub fn plan_unit_removal(snapshot: &AccessSnapshot, unit_id: UnitId) -> AccessResult<Vec<UnitId>> {
    if snapshot.unit(unit_id).is_none() {
        return Err(AccessError::not_found(format!("unit {unit_id}")));
    }
    snapshot.unit_hierarchy().removal_order(unit_id)
}

pub fn plan_module_removal(
    snapshot: &AccessSnapshot,
    module_id: ModuleId,
) -> AccessResult<ModuleRemoval> {
    if snapshot.module(module_id).is_none() {
        return Err(AccessError::not_found(format!("module {module_id}")));
    }
    let modules = snapshot.module_hierarchy().removal_order(module_id)?;
    let removed: HashSet<ModuleId> = modules.iter().copied().collect();
    let forms = snapshot
        .forms
        .iter()
        .filter(|f| removed.contains(&f.module_id))
        .map(|f| f.id)
        .collect();
    Ok(ModuleRemoval { modules, forms })
}

/// Direct children of `parent_id` in display order.
pub fn children_in_order(snapshot: &AccessSnapshot, parent_id: ModuleId) -> Vec<Module> {
    let mut children: Vec<&Module> = snapshot
        .modules
        .iter()
        .filter(|m| m.parent_id == Some(parent_id))
        .collect();
    children.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    children.into_iter().cloned().collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Applying plans to an in-memory snapshot
// ─────────────────────────────────────────────────────────────────────────────

pub fn remove_units(snapshot: &mut AccessSnapshot, units: &[UnitId]) {
    let removed: HashSet<UnitId> = units.iter().copied().collect();
    snapshot.units.retain(|u| !removed.contains(&u.id));
    snapshot.unit_roles.retain(|a| !removed.contains(&a.unit_id));
    snapshot.user_units.retain(|a| !removed.contains(&a.unit_id));
}

pub fn remove_modules(snapshot: &mut AccessSnapshot, plan: &ModuleRemoval) {
    let modules: HashSet<ModuleId> = plan.modules.iter().copied().collect();
    let forms: HashSet<FormId> = plan.forms.iter().copied().collect();
    snapshot.grants.retain(|g| match g.key.target {
        Target::Module(m) => !modules.contains(&m),
        Target::Form(f) => !forms.contains(&f),
    });
    snapshot.forms.retain(|f| !forms.contains(&f.id));
    snapshot.modules.retain(|m| !modules.contains(&m.id));
}

pub fn remove_role(snapshot: &mut AccessSnapshot, role_id: RoleId) {
    snapshot
        .grants
        .retain(|g| g.key.subject != Subject::Role(role_id));
    snapshot.unit_roles.retain(|a| a.role_id != role_id);
    snapshot.user_units.retain(|a| a.role_id != role_id);
    snapshot.roles.retain(|r| r.id != role_id);
}

pub fn apply_replacement(snapshot: &mut AccessSnapshot, plan: &ReplacementPlan) {
    remove_modules(
        snapshot,
        &ModuleRemoval {
            modules: plan.removed_modules.clone(),
            forms: plan.removed_forms.clone(),
        },
    );
    for updated in &plan.updated {
        if let Some(m) = snapshot.modules.iter_mut().find(|m| m.id == updated.id) {
            *m = updated.clone();
        }
    }
    snapshot.modules.extend(plan.created.iter().cloned());
}
