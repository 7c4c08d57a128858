//! Access data store boundary.
//!
//! Reads hand out one consistent [`AccessSnapshot`] per organization; every
//! write runs as a single all-or-nothing unit.

pub mod cascade;
pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use formgate_access::{
    AccessSnapshot, DesiredChild, Grant, GrantKey, GrantRequest, GrantWrite, Module,
    Organization, OrganizationUnit, TargetGrant, User,
};
use formgate_core::{AccessError, AccessResult, ModuleId, OrganizationId, RoleId, UnitId, UserId};

pub use in_memory::InMemoryAccessStore;
pub use postgres::PostgresAccessStore;

/// Fields of a unit to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUnit {
    pub name: String,
    pub parent_id: Option<UnitId>,
    pub sort_order: i32,
}

/// A user holding a role inside the unit being updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignedUser {
    pub user_id: UserId,
    pub role_id: RoleId,
}

/// Full replacement of a unit's editable fields and assignments.
///
/// `assigned_roles` and `assigned_users` replace the current lists entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitUpdate {
    pub name: String,
    pub sort_order: i32,
    pub assigned_roles: Vec<RoleId>,
    pub assigned_users: Vec<AssignedUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewModule {
    pub name: String,
    pub icon: Option<String>,
    pub parent_id: Option<ModuleId>,
    pub sort_order: i32,
    pub active: bool,
}

pub(crate) fn require_name(name: &str, what: &str) -> AccessResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AccessError::invalid_argument(format!("{what} name must not be blank")));
    }
    Ok(trimmed.to_string())
}

/// Persistence for organizations, the unit and module trees, and grants.
#[async_trait::async_trait]
pub trait AccessStore: Send + Sync {
    async fn find_user(&self, user_id: UserId) -> AccessResult<Option<User>>;

    async fn find_organization(
        &self,
        organization_id: OrganizationId,
    ) -> AccessResult<Option<Organization>>;

    /// Everything the resolver needs for one organization, read at one point
    /// in time. `NotFound` for an unknown organization.
    async fn load_snapshot(&self, organization_id: OrganizationId) -> AccessResult<AccessSnapshot>;

    /// Live `(target, actions)` grants of one role.
    async fn role_grants(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<TargetGrant>> {
        let snapshot = self.load_snapshot(organization_id).await?;
        if snapshot.role(role_id).is_none() {
            return Err(AccessError::not_found(format!("role {role_id}")));
        }
        Ok(snapshot.role_grants(role_id, now))
    }

    /// Live grants reaching a user through every assigned role and directly.
    async fn user_grants(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<TargetGrant>> {
        let snapshot = self.load_snapshot(organization_id).await?;
        Ok(snapshot.user_grants(user_id, now))
    }

    /// Insert or replace the grant on `request.key`. The stored action bundle
    /// becomes exactly `request.actions`.
    async fn upsert_grant(
        &self,
        organization_id: OrganizationId,
        request: GrantRequest,
        now: DateTime<Utc>,
    ) -> AccessResult<Grant> {
        self.write_grants(organization_id, vec![request.into()], now)
            .await?
            .pop()
            .ok_or_else(|| AccessError::storage("grant batch returned no rows"))
    }

    /// Apply a batch of grant writes in order, all or nothing. Each entry is
    /// validated and resolved against the state left by the entries before it.
    /// Returns the stored grants in request order.
    async fn write_grants(
        &self,
        organization_id: OrganizationId,
        writes: Vec<GrantWrite>,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<Grant>>;

    async fn revoke_grant(&self, organization_id: OrganizationId, key: GrantKey)
    -> AccessResult<()>;

    async fn create_unit(
        &self,
        organization_id: OrganizationId,
        unit: NewUnit,
    ) -> AccessResult<OrganizationUnit>;

    async fn update_unit(
        &self,
        organization_id: OrganizationId,
        unit_id: UnitId,
        update: UnitUpdate,
    ) -> AccessResult<OrganizationUnit>;

    /// Delete a unit and its subtree. Returns the removed ids, leaves first.
    async fn delete_unit(
        &self,
        organization_id: OrganizationId,
        unit_id: UnitId,
    ) -> AccessResult<Vec<UnitId>>;

    async fn create_module(
        &self,
        organization_id: OrganizationId,
        module: NewModule,
    ) -> AccessResult<Module>;

    /// Delete a module, its submodules, their forms and every grant on them.
    async fn delete_module(
        &self,
        organization_id: OrganizationId,
        module_id: ModuleId,
    ) -> AccessResult<Vec<ModuleId>>;

    /// Replace the direct children of `parent_id` with `desired`. Returns the
    /// resulting children in display order.
    async fn replace_submodules(
        &self,
        organization_id: OrganizationId,
        parent_id: ModuleId,
        desired: Vec<DesiredChild>,
    ) -> AccessResult<Vec<Module>>;

    /// Delete a role with its assignments and grants.
    async fn delete_role(&self, organization_id: OrganizationId, role_id: RoleId)
    -> AccessResult<()>;
}

#[async_trait::async_trait]
impl<S> AccessStore for Arc<S>
where
    S: AccessStore + ?Sized,
{
    async fn find_user(&self, user_id: UserId) -> AccessResult<Option<User>> {
        (**self).find_user(user_id).await
    }

    async fn find_organization(
        &self,
        organization_id: OrganizationId,
    ) -> AccessResult<Option<Organization>> {
        (**self).find_organization(organization_id).await
    }

    async fn load_snapshot(&self, organization_id: OrganizationId) -> AccessResult<AccessSnapshot> {
        (**self).load_snapshot(organization_id).await
    }

    async fn role_grants(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<TargetGrant>> {
        (**self).role_grants(organization_id, role_id, now).await
    }

    async fn user_grants(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<TargetGrant>> {
        (**self).user_grants(organization_id, user_id, now).await
    }

    async fn upsert_grant(
        &self,
        organization_id: OrganizationId,
        request: GrantRequest,
        now: DateTime<Utc>,
    ) -> AccessResult<Grant> {
        (**self).upsert_grant(organization_id, request, now).await
    }

    async fn write_grants(
        &self,
        organization_id: OrganizationId,
        writes: Vec<GrantWrite>,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<Grant>> {
        (**self).write_grants(organization_id, writes, now).await
    }

    async fn revoke_grant(
        &self,
        organization_id: OrganizationId,
        key: GrantKey,
    ) -> AccessResult<()> {
        (**self).revoke_grant(organization_id, key).await
    }

    async fn create_unit(
        &self,
        organization_id: OrganizationId,
        unit: NewUnit,
    ) -> AccessResult<OrganizationUnit> {
        (**self).create_unit(organization_id, unit).await
    }

    async fn update_unit(
        &self,
        organization_id: OrganizationId,
        unit_id: UnitId,
        update: UnitUpdate,
    ) -> AccessResult<OrganizationUnit> {
        (**self).update_unit(organization_id, unit_id, update).await
    }

    async fn delete_unit(
        &self,
        organization_id: OrganizationId,
        unit_id: UnitId,
    ) -> AccessResult<Vec<UnitId>> {
        (**self).delete_unit(organization_id, unit_id).await
    }

    async fn create_module(
        &self,
        organization_id: OrganizationId,
        module: NewModule,
    ) -> AccessResult<Module> {
        (**self).create_module(organization_id, module).await
    }

    async fn delete_module(
        &self,
        organization_id: OrganizationId,
        module_id: ModuleId,
    ) -> AccessResult<Vec<ModuleId>> {
        (**self).delete_module(organization_id, module_id).await
    }

    async fn replace_submodules(
        &self,
        organization_id: OrganizationId,
        parent_id: ModuleId,
        desired: Vec<DesiredChild>,
    ) -> AccessResult<Vec<Module>> {
        (**self)
            .replace_submodules(organization_id, parent_id, desired)
            .await
    }

    async fn delete_role(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
    ) -> AccessResult<()> {
        (**self).delete_role(organization_id, role_id).await
    }
}
