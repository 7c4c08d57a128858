//! Point-in-time view of one organization's access data.
//!
//! Stores fetch a snapshot inside a single read transaction; everything the
//! resolver needs is then answered from memory without further round trips.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use formgate_core::{AccessError, AccessResult, FormId, ModuleId, RoleId, UnitId, UserId};

use crate::{
    Form, Grant, Hierarchy, Module, Organization, OrganizationUnit, Role, Subject, Target,
    TargetGrant, UnitRoleAssignment, UserUnitAssignment,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessSnapshot {
    pub organization: Organization,
    pub roles: Vec<Role>,
    pub units: Vec<OrganizationUnit>,
    pub unit_roles: Vec<UnitRoleAssignment>,
    pub user_units: Vec<UserUnitAssignment>,
    pub modules: Vec<Module>,
    pub forms: Vec<Form>,
    pub grants: Vec<Grant>,
}

impl AccessSnapshot {
    pub fn empty(organization: Organization) -> Self {
        Self {
            organization,
            roles: Vec::new(),
            units: Vec::new(),
            unit_roles: Vec::new(),
            user_units: Vec::new(),
            modules: Vec::new(),
            forms: Vec::new(),
            grants: Vec::new(),
        }
    }

    pub fn role(&self, id: RoleId) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == id)
    }

    pub fn unit(&self, id: UnitId) -> Option<&OrganizationUnit> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.iter().find(|m| m.id == id)
    }

    pub fn form(&self, id: FormId) -> Option<&Form> {
        self.forms.iter().find(|f| f.id == id)
    }

    pub fn module_index(&self) -> HashMap<ModuleId, &Module> {
        self.modules.iter().map(|m| (m.id, m)).collect()
    }

    /// Id-keyed lookups over every entity, built once per snapshot.
    pub fn index(&self) -> SnapshotIndex<'_> {
        SnapshotIndex {
            roles: self.roles.iter().map(|r| (r.id, r)).collect(),
            units: self.units.iter().map(|u| (u.id, u)).collect(),
            modules: self.module_index(),
            forms: self.forms.iter().map(|f| (f.id, f)).collect(),
            user_units: &self.user_units,
        }
    }

    pub fn forms_by_module(&self) -> HashMap<ModuleId, Vec<&Form>> {
        let mut map: HashMap<ModuleId, Vec<&Form>> = HashMap::new();
        for form in &self.forms {
            map.entry(form.module_id).or_default().push(form);
        }
        map
    }

    pub fn module_hierarchy(&self) -> Hierarchy<ModuleId> {
        Hierarchy::from_nodes(&self.modules)
    }

    pub fn unit_hierarchy(&self) -> Hierarchy<UnitId> {
        Hierarchy::from_nodes(&self.units)
    }

    /// Module that owns a grant target, if the target still exists.
    pub fn owning_module(&self, target: Target) -> Option<&Module> {
        match target {
            Target::Module(m) => self.module(m),
            Target::Form(f) => self.form(f).and_then(|form| self.module(form.module_id)),
        }
    }

    /// Whether a subject/target pair exists inside this organization.
    pub fn ensure_subject(&self, subject: Subject, user_exists: bool) -> AccessResult<()> {
        match subject {
            Subject::Role(r) if self.role(r).is_none() => {
                Err(AccessError::not_found(format!("role {r}")))
            }
            Subject::User(u) if !user_exists => Err(AccessError::not_found(format!("user {u}"))),
            _ => Ok(()),
        }
    }

    pub fn ensure_target(&self, target: Target) -> AccessResult<()> {
        match target {
            Target::Module(m) if self.module(m).is_none() => {
                Err(AccessError::not_found(format!("module {m}")))
            }
            Target::Form(f) if self.form(f).is_none() => {
                Err(AccessError::not_found(format!("form {f}")))
            }
            _ => Ok(()),
        }
    }

    pub fn find_grant(&self, subject: Subject, target: Target) -> Option<&Grant> {
        self.grants
            .iter()
            .find(|g| g.key.subject == subject && g.key.target == target)
    }

    /// Grants of one subject that are live at `now`.
    pub fn live_grants_of(
        &self,
        subject: Subject,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &Grant> + '_ {
        self.grants
            .iter()
            .filter(move |g| g.key.subject == subject && g.is_live(now))
    }

    /// Role-path grants: `(target, actions)` for one role.
    pub fn role_grants(&self, role_id: RoleId, now: DateTime<Utc>) -> Vec<TargetGrant> {
        self.live_grants_of(Subject::Role(role_id), now)
            .map(Grant::target_grant)
            .collect()
    }

    /// Roles the user holds through unit assignments whose unit and role both
    /// still exist. Dangling assignments are skipped.
    pub fn assigned_roles(&self, user_id: UserId) -> Vec<&Role> {
        self.index().assigned_roles(user_id)
    }

    /// All grants reaching a user: every assigned role's grants followed by the
    /// user's direct grants. Duplicate targets are kept; merging is the
    /// resolver's job.
    pub fn user_grants(&self, user_id: UserId, now: DateTime<Utc>) -> Vec<TargetGrant> {
        let mut out: Vec<TargetGrant> = self
            .assigned_roles(user_id)
            .into_iter()
            .flat_map(|role| self.role_grants(role.id, now))
            .collect();
        out.extend(
            self.live_grants_of(Subject::User(user_id), now)
                .map(Grant::target_grant),
        );
        out
    }
}

/// Hash lookups borrowed from one [`AccessSnapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotIndex<'a> {
    roles: HashMap<RoleId, &'a Role>,
    units: HashMap<UnitId, &'a OrganizationUnit>,
    modules: HashMap<ModuleId, &'a Module>,
    forms: HashMap<FormId, &'a Form>,
    user_units: &'a [UserUnitAssignment],
}

impl<'a> SnapshotIndex<'a> {
    pub fn role(&self, id: RoleId) -> Option<&'a Role> {
        self.roles.get(&id).copied()
    }

    pub fn unit(&self, id: UnitId) -> Option<&'a OrganizationUnit> {
        self.units.get(&id).copied()
    }

    pub fn module(&self, id: ModuleId) -> Option<&'a Module> {
        self.modules.get(&id).copied()
    }

    pub fn form(&self, id: FormId) -> Option<&'a Form> {
        self.forms.get(&id).copied()
    }

    pub fn modules(&self) -> &HashMap<ModuleId, &'a Module> {
        &self.modules
    }

    pub fn owning_module(&self, target: Target) -> Option<&'a Module> {
        match target {
            Target::Module(m) => self.module(m),
            Target::Form(f) => self.form(f).and_then(|form| self.module(form.module_id)),
        }
    }

    /// See [`AccessSnapshot::assigned_roles`].
    pub fn assigned_roles(&self, user_id: UserId) -> Vec<&'a Role> {
        let mut seen: BTreeSet<RoleId> = BTreeSet::new();
        let mut roles = Vec::new();

        for assignment in self.user_units.iter().filter(|a| a.user_id == user_id) {
            if self.unit(assignment.unit_id).is_none() {
                tracing::debug!(
                    user_id = %user_id,
                    unit_id = %assignment.unit_id,
                    "skipping assignment to missing unit"
                );
                continue;
            }
            let Some(role) = self.role(assignment.role_id) else {
                tracing::debug!(
                    user_id = %user_id,
                    role_id = %assignment.role_id,
                    "skipping assignment of missing role"
                );
                continue;
            };
            if seen.insert(role.id) {
                roles.push(role);
            }
        }

        roles
    }
}
