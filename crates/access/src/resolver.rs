//! Effective access resolution.
//!
//! Resolution order:
//! 1. Organization admins (admin-flagged role, or the bootstrap owner when
//!    enabled) get every available module and its published forms with all
//!    actions. A module is available when it and all of its ancestors are
//!    active; the same rule filters grant targets below.
//! 2. Live grants are collected per source: each assigned role, then the user.
//! 3. Within one source, a module grant with `view` extends to the forms
//!    directly in that module unless the same source has a form grant there.
//! 4. Sources are merged with a field-wise OR.
//! 5. Visible modules pull in their whole ancestor chain.
//! 6. Output is ordered by (level, sort order, name).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use formgate_core::{AccessError, AccessResult, FormId, ModuleId, OrganizationId, UnitId, UserId};

use crate::{
    AccessSnapshot, Action, ActionSet, Form, Grant, Hierarchy, Module, SnapshotIndex, Subject,
    SystemCapability, Target, User,
};

/// Resolver switches that differ between deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Treat `Organization::owner_user_id` as an administrator everywhere.
    pub honor_bootstrap_owner: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            honor_bootstrap_owner: true,
        }
    }
}

/// Organization-wide summary surfaced next to the permission matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSummary {
    pub is_admin: bool,
    pub can_manage_users: bool,
    pub can_manage_roles: bool,
    pub can_manage_permissions: bool,
}

impl SystemSummary {
    pub fn all() -> Self {
        Self {
            is_admin: true,
            can_manage_users: true,
            can_manage_roles: true,
            can_manage_permissions: true,
        }
    }

    pub fn has(&self, capability: SystemCapability) -> bool {
        match capability {
            SystemCapability::Admin => self.is_admin,
            SystemCapability::UserManagement => self.can_manage_users,
            SystemCapability::RoleManagement => self.can_manage_roles,
            SystemCapability::PermissionManagement => self.can_manage_permissions,
        }
    }
}

/// Fully merged access of one user within their organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveAccess {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub is_org_admin: bool,
    /// Ordered by (level, sort order, name).
    pub visible_module_ids: Vec<ModuleId>,
    /// Ordered by owning module, then (sort order, name).
    pub visible_form_ids: Vec<FormId>,
    pub actions_by_module: BTreeMap<ModuleId, ActionSet>,
    pub actions_by_form: BTreeMap<FormId, ActionSet>,
    pub system: SystemSummary,
}

impl EffectiveAccess {
    pub fn is_module_visible(&self, id: ModuleId) -> bool {
        self.visible_module_ids.contains(&id)
    }

    pub fn is_form_visible(&self, id: FormId) -> bool {
        self.visible_form_ids.contains(&id)
    }

    pub fn module_actions(&self, id: ModuleId) -> ActionSet {
        self.actions_by_module.get(&id).copied().unwrap_or_default()
    }

    pub fn form_actions(&self, id: FormId) -> ActionSet {
        self.actions_by_form.get(&id).copied().unwrap_or_default()
    }

    pub fn can(&self, target: Target, action: Action) -> bool {
        match target {
            Target::Module(m) => self.module_actions(m).get(action),
            Target::Form(f) => self.form_actions(f).get(action),
        }
    }

    /// Fail with `Forbidden` unless the caller holds `capability`.
    pub fn require(&self, capability: SystemCapability) -> AccessResult<()> {
        if self.system.has(capability) {
            Ok(())
        } else {
            Err(AccessError::forbidden(format!(
                "missing capability '{}'",
                capability.key()
            )))
        }
    }
}

/// Whether the user is an administrator of the snapshot's organization.
///
/// This is the only place the admin bypass is decided.
pub fn is_org_admin(snapshot: &AccessSnapshot, user_id: UserId, options: ResolverOptions) -> bool {
    admin_in(snapshot, &snapshot.index(), user_id, options)
}

fn admin_in(
    snapshot: &AccessSnapshot,
    index: &SnapshotIndex<'_>,
    user_id: UserId,
    options: ResolverOptions,
) -> bool {
    if options.honor_bootstrap_owner && snapshot.organization.owner_user_id == Some(user_id) {
        return true;
    }
    index
        .assigned_roles(user_id)
        .iter()
        .any(|role| role.is_admin && role.organization_id == snapshot.organization.id)
}

/// Whether the user may administer `unit_id`.
///
/// Organization admins always may. Otherwise a role carrying
/// `system:role_management` held in a unit delegates administration of that
/// unit and every unit below it.
pub fn can_administer_unit(
    snapshot: &AccessSnapshot,
    user_id: UserId,
    unit_id: UnitId,
    options: ResolverOptions,
) -> AccessResult<bool> {
    let index = snapshot.index();
    if admin_in(snapshot, &index, user_id, options) {
        return Ok(true);
    }

    let units = snapshot.unit_hierarchy();
    if !units.contains(unit_id) {
        return Err(AccessError::not_found(format!("unit {unit_id}")));
    }

    for assignment in snapshot.user_units.iter().filter(|a| a.user_id == user_id) {
        let delegates = index
            .role(assignment.role_id)
            .is_some_and(|r| r.has_capability(SystemCapability::RoleManagement));
        if !delegates || !units.contains(assignment.unit_id) {
            continue;
        }
        if units.is_within(assignment.unit_id, unit_id)? {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Compute the effective access of `user` from one organization snapshot.
pub fn resolve(
    snapshot: &AccessSnapshot,
    user: &User,
    now: DateTime<Utc>,
    options: ResolverOptions,
) -> AccessResult<EffectiveAccess> {
    if !user.is_active() {
        return Err(AccessError::unauthorized(format!("user {} is inactive", user.id)));
    }
    let organization_id = user
        .organization_id
        .ok_or_else(|| AccessError::precondition("user not associated with any organization"))?;
    if organization_id != snapshot.organization.id {
        return Err(AccessError::integrity(format!(
            "snapshot of organization {} cannot resolve user of organization {organization_id}",
            snapshot.organization.id
        )));
    }

    let index = snapshot.index();
    let hierarchy = snapshot.module_hierarchy();
    let available = available_modules(snapshot, &index, &hierarchy)?;

    if admin_in(snapshot, &index, user.id, options) {
        tracing::debug!(user_id = %user.id, organization_id = %organization_id, "admin bypass");
        return Ok(full_access(snapshot, &index, &available, user.id));
    }

    let merged = MergedGrants::collect(snapshot, &index, &available, user.id, now);
    let system = system_summary(&index, user.id);
    finish(snapshot, &index, &hierarchy, merged, user.id, system)
}

/// Modules that can appear in any access result: active, inside the
/// organization, and under an ancestor chain that is entirely the same.
fn available_modules(
    snapshot: &AccessSnapshot,
    index: &SnapshotIndex<'_>,
    hierarchy: &Hierarchy<ModuleId>,
) -> AccessResult<HashSet<ModuleId>> {
    let org = snapshot.organization.id;
    let usable = |m: &Module| m.active && m.organization_id == org;

    let mut available = HashSet::new();
    for module in snapshot.modules.iter().filter(|m| usable(m)) {
        let chain = hierarchy.ancestors_of(module.id)?;
        if chain
            .iter()
            .all(|id| index.module(*id).is_some_and(|m| usable(m)))
        {
            available.insert(module.id);
        }
    }
    Ok(available)
}

fn full_access(
    snapshot: &AccessSnapshot,
    index: &SnapshotIndex<'_>,
    available: &HashSet<ModuleId>,
    user_id: UserId,
) -> EffectiveAccess {
    let forms = snapshot
        .forms
        .iter()
        .filter(|f| f.published && available.contains(&f.module_id));

    let visible_module_ids = ordered_modules(available.iter().copied(), index.modules());
    let visible_form_ids = ordered_forms(forms, index.modules());

    EffectiveAccess {
        organization_id: snapshot.organization.id,
        user_id,
        is_org_admin: true,
        actions_by_module: visible_module_ids.iter().map(|id| (*id, ActionSet::all())).collect(),
        actions_by_form: visible_form_ids.iter().map(|id| (*id, ActionSet::all())).collect(),
        visible_module_ids,
        visible_form_ids,
        system: SystemSummary::all(),
    }
}

fn system_summary(index: &SnapshotIndex<'_>, user_id: UserId) -> SystemSummary {
    let roles = index.assigned_roles(user_id);
    let has = |c: SystemCapability| roles.iter().any(|r| r.has_capability(c));
    SystemSummary {
        is_admin: false,
        can_manage_users: has(SystemCapability::UserManagement),
        can_manage_roles: has(SystemCapability::RoleManagement),
        can_manage_permissions: has(SystemCapability::PermissionManagement),
    }
}

/// Per-target OR of every source's contribution.
#[derive(Debug, Default)]
struct MergedGrants {
    modules: HashMap<ModuleId, ActionSet>,
    forms: HashMap<FormId, ActionSet>,
}

impl MergedGrants {
    fn collect(
        snapshot: &AccessSnapshot,
        index: &SnapshotIndex<'_>,
        available: &HashSet<ModuleId>,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        let mut sources: Vec<Subject> = index
            .assigned_roles(user_id)
            .into_iter()
            .map(|r| Subject::Role(r.id))
            .collect();
        sources.push(Subject::User(user_id));

        let forms_by_module = snapshot.forms_by_module();
        let mut merged = MergedGrants::default();

        for subject in sources {
            let grants: Vec<&Grant> = snapshot
                .live_grants_of(subject, now)
                .filter(|g| target_available(index, available, g.key.target))
                .collect();
            merged.absorb_source(&grants, &forms_by_module);
        }

        merged
    }

    /// Fold one source's grants in. Form-level grants shadow the same source's
    /// module-level propagation; other sources are unaffected.
    fn absorb_source(&mut self, grants: &[&Grant], forms_by_module: &HashMap<ModuleId, Vec<&Form>>) {
        let form_level: HashMap<FormId, ActionSet> = grants
            .iter()
            .filter_map(|g| g.key.target.form_id().map(|f| (f, g.actions)))
            .collect();

        for grant in grants {
            let Target::Module(module_id) = grant.key.target else {
                continue;
            };
            *self.modules.entry(module_id).or_default() |= grant.actions;

            if !grant.actions.view {
                continue;
            }
            for form in forms_by_module.get(&module_id).into_iter().flatten() {
                if form.published && !form_level.contains_key(&form.id) {
                    *self.forms.entry(form.id).or_default() |= grant.actions;
                }
            }
        }

        for (form_id, actions) in form_level {
            *self.forms.entry(form_id).or_default() |= actions;
        }
    }
}

/// Grant targets count only while their owning module is available and (for
/// forms) the form is published.
fn target_available(
    index: &SnapshotIndex<'_>,
    available: &HashSet<ModuleId>,
    target: Target,
) -> bool {
    let Some(module) = index.owning_module(target) else {
        return false;
    };
    if !available.contains(&module.id) {
        return false;
    }
    match target {
        Target::Form(f) => index.form(f).is_some_and(|form| form.published),
        Target::Module(_) => true,
    }
}

fn finish(
    snapshot: &AccessSnapshot,
    index: &SnapshotIndex<'_>,
    hierarchy: &Hierarchy<ModuleId>,
    merged: MergedGrants,
    user_id: UserId,
    system: SystemSummary,
) -> AccessResult<EffectiveAccess> {
    let mut actions_by_module: BTreeMap<ModuleId, ActionSet> = merged
        .modules
        .into_iter()
        .filter(|(_, a)| !a.is_empty())
        .collect();
    let actions_by_form: BTreeMap<FormId, ActionSet> = merged
        .forms
        .into_iter()
        .filter(|(_, a)| !a.is_empty())
        .collect();

    let visible_forms: Vec<&Form> = actions_by_form
        .iter()
        .filter(|(_, a)| a.view)
        .filter_map(|(id, _)| index.form(*id))
        .collect();

    let mut seeds: BTreeSet<ModuleId> = actions_by_module
        .iter()
        .filter(|(_, a)| a.view)
        .map(|(id, _)| *id)
        .collect();
    seeds.extend(visible_forms.iter().map(|f| f.module_id));

    // Seeds are available modules, so every ancestor is available too.
    let mut visible: BTreeSet<ModuleId> = BTreeSet::new();
    for module_id in seeds {
        if !visible.insert(module_id) {
            continue;
        }
        for ancestor in hierarchy.ancestors_of(module_id)? {
            if !visible.insert(ancestor) {
                // Everything above an already-included module is included too.
                break;
            }
        }
    }

    for module_id in &visible {
        actions_by_module.entry(*module_id).or_default().view = true;
    }

    Ok(EffectiveAccess {
        organization_id: snapshot.organization.id,
        user_id,
        is_org_admin: false,
        visible_module_ids: ordered_modules(visible.into_iter(), index.modules()),
        visible_form_ids: ordered_forms(visible_forms.into_iter(), index.modules()),
        actions_by_module,
        actions_by_form,
        system,
    })
}

fn ordered_modules(
    ids: impl Iterator<Item = ModuleId>,
    modules: &HashMap<ModuleId, &Module>,
) -> Vec<ModuleId> {
    let mut list: Vec<&Module> = ids.filter_map(|id| modules.get(&id).copied()).collect();
    list.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    list.into_iter().map(|m| m.id).collect()
}

fn ordered_forms<'a>(
    forms: impl Iterator<Item = &'a Form>,
    modules: &HashMap<ModuleId, &Module>,
) -> Vec<FormId> {
    let mut list: Vec<(&Module, &Form)> = forms
        .filter_map(|f| modules.get(&f.module_id).map(|m| (*m, f)))
        .collect();
    list.sort_by(|(ma, fa), (mb, fb)| {
        ma.sort_key()
            .cmp(&mb.sort_key())
            .then(fa.sort_order.cmp(&fb.sort_order))
            .then(fa.name.cmp(&fb.name))
            .then(fa.id.cmp(&fb.id))
    });
    list.into_iter().map(|(_, f)| f.id).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
