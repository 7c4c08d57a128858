//! Snapshot builder shared by the resolver and filter tests.

use chrono::{DateTime, TimeZone, Utc};

use formgate_core::{AccessResult, FormId, ModuleId, OrganizationId, RoleId, UnitId, UserId};

use crate::{
    AccessSnapshot, ActionSet, EffectiveAccess, Form, Grant, GrantKey, GrantRequest, Module,
    Organization, OrganizationUnit, ResolverOptions, Role, Subject, Target, User, UserStatus,
    UserUnitAssignment, resolve,
};

pub(crate) struct Fixture {
    pub snapshot: AccessSnapshot,
    pub user: User,
    pub now: DateTime<Utc>,
}

impl Fixture {
    pub fn new() -> Self {
        let org = Organization {
            id: OrganizationId::new(),
            name: "Acme".to_string(),
            owner_user_id: None,
        };
        let user = User {
            id: UserId::new(),
            organization_id: Some(org.id),
            email: "user@acme.test".to_string(),
            status: UserStatus::Active,
        };
        Self {
            snapshot: AccessSnapshot::empty(org),
            user,
            now: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        }
    }

    pub fn module(&mut self, name: &str, parent: Option<ModuleId>) -> ModuleId {
        let level = parent
            .and_then(|p| self.snapshot.module(p))
            .map(|p| p.level + 1)
            .unwrap_or(0);
        let id = ModuleId::new();
        self.snapshot.modules.push(Module {
            id,
            organization_id: self.snapshot.organization.id,
            name: name.to_string(),
            icon: None,
            level,
            sort_order: self.snapshot.modules.len() as i32,
            active: true,
            parent_id: parent,
        });
        id
    }

    pub fn form(&mut self, module_id: ModuleId, name: &str) -> FormId {
        let id = FormId::new();
        self.snapshot.forms.push(Form {
            id,
            module_id,
            name: name.to_string(),
            sort_order: self.snapshot.forms.len() as i32,
            published: true,
        });
        id
    }

    pub fn role(&mut self, name: &str, is_admin: bool) -> RoleId {
        let id = RoleId::new();
        self.snapshot.roles.push(Role {
            id,
            organization_id: self.snapshot.organization.id,
            name: name.to_string(),
            is_admin,
            capabilities: Default::default(),
        });
        id
    }

    pub fn unit(&mut self, name: &str, parent: Option<UnitId>) -> UnitId {
        let level = parent
            .and_then(|p| self.snapshot.unit(p))
            .map(|p| p.level + 1)
            .unwrap_or(0);
        let id = UnitId::new();
        self.snapshot.units.push(OrganizationUnit {
            id,
            organization_id: self.snapshot.organization.id,
            name: name.to_string(),
            level,
            sort_order: self.snapshot.units.len() as i32,
            parent_id: parent,
        });
        id
    }

    pub fn assign(&mut self, user_id: UserId, unit_id: UnitId, role_id: RoleId) {
        self.snapshot.user_units.push(UserUnitAssignment {
            user_id,
            unit_id,
            role_id,
        });
    }

    pub fn grant(&mut self, subject: Subject, target: Target, actions: ActionSet) -> &mut Grant {
        let grant = GrantRequest {
            key: GrantKey { subject, target },
            granted: true,
            actions,
            reason: None,
            granted_by: self.user.id,
            expires_at: None,
        }
        .into_grant(self.snapshot.organization.id, None, self.now);
        self.snapshot.grants.push(grant);
        self.snapshot.grants.last_mut().unwrap()
    }

    pub fn set_active(&mut self, id: ModuleId, active: bool) {
        if let Some(m) = self.snapshot.modules.iter_mut().find(|m| m.id == id) {
            m.active = active;
        }
    }

    pub fn set_sort(&mut self, id: ModuleId, sort_order: i32) {
        if let Some(m) = self.snapshot.modules.iter_mut().find(|m| m.id == id) {
            m.sort_order = sort_order;
        }
    }

    pub fn set_published(&mut self, id: FormId, published: bool) {
        if let Some(f) = self.snapshot.forms.iter_mut().find(|f| f.id == id) {
            f.published = published;
        }
    }

    pub fn resolve(&self) -> AccessResult<EffectiveAccess> {
        resolve(&self.snapshot, &self.user, self.now, ResolverOptions::default())
    }
}
