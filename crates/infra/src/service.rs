//! Request-scoped access operations: caller resolution plus the authorization
//! checks that guard every management write.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use formgate_access::{
    AccessSnapshot, Action, ActionSet, ActionsUpdate, DesiredChild, EffectiveAccess, Form, Grant,
    GrantKey, GrantWrite, Module, ModuleTree, OrganizationUnit, ResolverOptions, SessionIdentity,
    Subject, SystemCapability, Target, User, can_administer_unit, resolve,
};
use formgate_core::{AccessError, AccessResult, ModuleId, RoleId, UnitId, UserId};

use crate::store::{AccessStore, NewModule, NewUnit, UnitUpdate};

/// The resolved caller of one request.
#[derive(Debug, Clone)]
pub struct CallerAccess {
    pub user: User,
    pub snapshot: AccessSnapshot,
    pub access: EffectiveAccess,
}

impl CallerAccess {
    /// Visible modules in display order.
    pub fn modules(&self) -> Vec<&Module> {
        let index = self.snapshot.index();
        self.access
            .visible_module_ids
            .iter()
            .filter_map(|id| index.module(*id))
            .collect()
    }

    /// Visible forms in display order, each with its owning module.
    pub fn forms(&self) -> Vec<(&Form, &Module)> {
        let index = self.snapshot.index();
        self.access
            .visible_form_ids
            .iter()
            .filter_map(|id| {
                let form = index.form(*id)?;
                let module = index.module(form.module_id)?;
                Some((form, module))
            })
            .collect()
    }

    /// The organization's module tree pruned to what the caller may see.
    pub fn tree(&self) -> AccessResult<ModuleTree> {
        Ok(ModuleTree::build(&self.snapshot)?.prune(&self.access))
    }

    fn require_admin(&self) -> AccessResult<()> {
        if self.access.is_org_admin {
            Ok(())
        } else {
            Err(AccessError::forbidden("organization administrator required"))
        }
    }
}

/// Set one action on a user's grant for one target, leaving the other
/// actions of that grant as they are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionChange {
    pub user_id: UserId,
    pub action: Action,
    pub target: Target,
    pub granted: bool,
    pub reason: Option<String>,
    pub granted_by: Option<UserId>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Full action bundle for one role grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrantChange {
    pub target: Target,
    pub granted: bool,
    pub actions: ActionSet,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AccessService<S> {
    store: S,
    options: ResolverOptions,
}

impl<S: AccessStore> AccessService<S> {
    pub fn new(store: S, options: ResolverOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve the caller behind a validated session.
    ///
    /// Unknown or inactive users are `Unauthorized`; a session opened in an
    /// organization other than the user's is `Forbidden`.
    pub async fn caller(
        &self,
        identity: SessionIdentity,
        now: DateTime<Utc>,
    ) -> AccessResult<CallerAccess> {
        let user = self
            .store
            .find_user(identity.user_id)
            .await?
            .ok_or_else(|| AccessError::unauthorized(format!("unknown user {}", identity.user_id)))?;
        if !user.is_active() {
            return Err(AccessError::unauthorized(format!("user {} is inactive", user.id)));
        }
        let organization_id = user
            .organization_id
            .ok_or_else(|| AccessError::precondition("user not associated with any organization"))?;
        if organization_id != identity.organization_id {
            return Err(AccessError::forbidden(format!(
                "session organization {} does not match user organization",
                identity.organization_id
            )));
        }

        let snapshot = self.store.load_snapshot(organization_id).await?;
        let access = resolve(&snapshot, &user, now, self.options)?;
        Ok(CallerAccess {
            user,
            snapshot,
            access,
        })
    }

    /// Apply per-action changes to users' grants as one batch. Either every
    /// change is stored or none is.
    pub async fn set_user_permissions(
        &self,
        identity: SessionIdentity,
        changes: Vec<PermissionChange>,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<Grant>> {
        let caller = self.caller(identity, now).await?;
        caller.access.require(SystemCapability::PermissionManagement)?;

        let writes: Vec<GrantWrite> = changes
            .into_iter()
            .map(|change| GrantWrite {
                key: GrantKey {
                    subject: Subject::User(change.user_id),
                    target: change.target,
                },
                granted: true,
                actions: ActionsUpdate::Set {
                    action: change.action,
                    on: change.granted,
                },
                reason: change.reason,
                granted_by: change.granted_by.unwrap_or(caller.user.id),
                expires_at: change.expires_at,
            })
            .collect();

        let written = self.write_batch(&caller, writes, now).await?;
        tracing::info!(
            caller = %caller.user.id,
            organization_id = %caller.snapshot.organization.id,
            count = written.len(),
            "user permissions updated"
        );
        Ok(written)
    }

    /// Replace the action bundles of one role's grants as one batch.
    pub async fn set_role_grants(
        &self,
        identity: SessionIdentity,
        role_id: RoleId,
        changes: Vec<RoleGrantChange>,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<Grant>> {
        let caller = self.caller(identity, now).await?;
        caller.access.require(SystemCapability::PermissionManagement)?;

        let writes: Vec<GrantWrite> = changes
            .into_iter()
            .map(|change| GrantWrite {
                key: GrantKey {
                    subject: Subject::Role(role_id),
                    target: change.target,
                },
                granted: change.granted,
                actions: ActionsUpdate::Replace {
                    actions: change.actions,
                },
                reason: change.reason,
                granted_by: caller.user.id,
                expires_at: change.expires_at,
            })
            .collect();

        let written = self.write_batch(&caller, writes, now).await?;
        tracing::info!(
            caller = %caller.user.id,
            role_id = %role_id,
            count = written.len(),
            "role grants updated"
        );
        Ok(written)
    }

    /// Check the whole batch against the caller's snapshot, then hand it to
    /// the store as one write. The store validates again under its lock.
    async fn write_batch(
        &self,
        caller: &CallerAccess,
        writes: Vec<GrantWrite>,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<Grant>> {
        let organization_id = caller.snapshot.organization.id;
        let index = caller.snapshot.index();
        let mut members: HashMap<UserId, bool> = HashMap::new();

        for write in &writes {
            match write.key.subject {
                Subject::Role(role_id) => {
                    if index.role(role_id).is_none() {
                        return Err(AccessError::not_found(format!("role {role_id}")));
                    }
                }
                Subject::User(user_id) => {
                    let member = match members.get(&user_id) {
                        Some(member) => *member,
                        None => {
                            let member = self
                                .store
                                .find_user(user_id)
                                .await?
                                .is_some_and(|u| u.organization_id == Some(organization_id));
                            members.insert(user_id, member);
                            member
                        }
                    };
                    if !member {
                        return Err(AccessError::not_found(format!("user {user_id}")));
                    }
                }
            }
            match write.key.target {
                Target::Module(m) if index.module(m).is_none() => {
                    return Err(AccessError::not_found(format!("module {m}")));
                }
                Target::Form(f) if index.form(f).is_none() => {
                    return Err(AccessError::not_found(format!("form {f}")));
                }
                _ => {}
            }
        }

        self.store.write_grants(organization_id, writes, now).await
    }

    pub async fn revoke_grant(
        &self,
        identity: SessionIdentity,
        key: GrantKey,
        now: DateTime<Utc>,
    ) -> AccessResult<()> {
        let caller = self.caller(identity, now).await?;
        caller.access.require(SystemCapability::PermissionManagement)?;
        self.store
            .revoke_grant(caller.snapshot.organization.id, key)
            .await
    }

    pub async fn create_unit(
        &self,
        identity: SessionIdentity,
        unit: NewUnit,
        now: DateTime<Utc>,
    ) -> AccessResult<OrganizationUnit> {
        let caller = self.caller(identity, now).await?;
        match unit.parent_id {
            Some(parent_id) => self.require_unit_admin(&caller, parent_id)?,
            None => caller.require_admin()?,
        }
        let created = self
            .store
            .create_unit(caller.snapshot.organization.id, unit)
            .await?;
        tracing::info!(caller = %caller.user.id, unit_id = %created.id, "unit created");
        Ok(created)
    }

    pub async fn update_unit(
        &self,
        identity: SessionIdentity,
        unit_id: UnitId,
        update: UnitUpdate,
        now: DateTime<Utc>,
    ) -> AccessResult<OrganizationUnit> {
        let caller = self.caller(identity, now).await?;
        self.require_unit_admin(&caller, unit_id)?;
        guard_admin_assignments(&caller, unit_id, &update)?;
        let updated = self
            .store
            .update_unit(caller.snapshot.organization.id, unit_id, update)
            .await?;
        tracing::info!(caller = %caller.user.id, unit_id = %unit_id, "unit updated");
        Ok(updated)
    }

    pub async fn delete_unit(
        &self,
        identity: SessionIdentity,
        unit_id: UnitId,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<UnitId>> {
        let caller = self.caller(identity, now).await?;
        self.require_unit_admin(&caller, unit_id)?;
        self.store
            .delete_unit(caller.snapshot.organization.id, unit_id)
            .await
    }

    pub async fn create_module(
        &self,
        identity: SessionIdentity,
        module: NewModule,
        now: DateTime<Utc>,
    ) -> AccessResult<Module> {
        let caller = self.caller(identity, now).await?;
        caller.require_admin()?;
        self.store
            .create_module(caller.snapshot.organization.id, module)
            .await
    }

    pub async fn delete_module(
        &self,
        identity: SessionIdentity,
        module_id: ModuleId,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<ModuleId>> {
        let caller = self.caller(identity, now).await?;
        caller.require_admin()?;
        self.store
            .delete_module(caller.snapshot.organization.id, module_id)
            .await
    }

    pub async fn replace_submodules(
        &self,
        identity: SessionIdentity,
        parent_id: ModuleId,
        desired: Vec<DesiredChild>,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<Module>> {
        let caller = self.caller(identity, now).await?;
        caller.require_admin()?;
        self.store
            .replace_submodules(caller.snapshot.organization.id, parent_id, desired)
            .await
    }

    /// Delete a role together with its grants and assignments.
    pub async fn delete_role(
        &self,
        identity: SessionIdentity,
        role_id: RoleId,
        now: DateTime<Utc>,
    ) -> AccessResult<()> {
        let caller = self.caller(identity, now).await?;
        caller.access.require(SystemCapability::RoleManagement)?;
        self.store
            .delete_role(caller.snapshot.organization.id, role_id)
            .await?;
        tracing::info!(caller = %caller.user.id, role_id = %role_id, "role deleted");
        Ok(())
    }

    fn require_unit_admin(&self, caller: &CallerAccess, unit_id: UnitId) -> AccessResult<()> {
        if can_administer_unit(&caller.snapshot, caller.user.id, unit_id, self.options)? {
            Ok(())
        } else {
            Err(AccessError::forbidden(format!("cannot administer unit {unit_id}")))
        }
    }
}

/// Assignments of admin-flagged roles make their holder an organization
/// admin, so only organization admins may add or remove them. Delegated unit
/// administrators must leave them exactly as they are.
fn guard_admin_assignments(
    caller: &CallerAccess,
    unit_id: UnitId,
    update: &UnitUpdate,
) -> AccessResult<()> {
    if caller.access.is_org_admin {
        return Ok(());
    }
    let index = caller.snapshot.index();
    let is_admin_role = |role_id: RoleId| index.role(role_id).is_some_and(|r| r.is_admin);

    let current: BTreeSet<(UserId, RoleId)> = caller
        .snapshot
        .user_units
        .iter()
        .filter(|a| a.unit_id == unit_id && is_admin_role(a.role_id))
        .map(|a| (a.user_id, a.role_id))
        .collect();
    let desired: BTreeSet<(UserId, RoleId)> = update
        .assigned_users
        .iter()
        .filter(|a| is_admin_role(a.role_id))
        .map(|a| (a.user_id, a.role_id))
        .collect();

    if current != desired {
        tracing::warn!(
            caller = %caller.user.id,
            unit_id = %unit_id,
            "rejected change to admin role assignments"
        );
        return Err(AccessError::forbidden(
            "only organization administrators may change admin role assignments",
        ));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryAccessStore;
    use chrono::TimeZone;
    use formgate_access::{Organization, Role, UserStatus, UserUnitAssignment};
    use crate::store::AssignedUser;
    use formgate_core::{FormId, OrganizationId};
    use std::sync::Arc;

    struct World {
        service: AccessService<Arc<InMemoryAccessStore>>,
        store: Arc<InMemoryAccessStore>,
        org: OrganizationId,
        owner: SessionIdentity,
        clerk: SessionIdentity,
        now: DateTime<Utc>,
    }

    fn user(store: &InMemoryAccessStore, org: OrganizationId, email: &str) -> SessionIdentity {
        let id = UserId::new();
        store
            .insert_user(User {
                id,
                organization_id: Some(org),
                email: email.into(),
                status: UserStatus::Active,
            })
            .unwrap();
        SessionIdentity {
            user_id: id,
            organization_id: org,
        }
    }

    fn world() -> World {
        let store = Arc::new(InMemoryAccessStore::new());
        let org = OrganizationId::new();
        let owner_id = UserId::new();
        store
            .insert_organization(Organization {
                id: org,
                name: "Acme".into(),
                owner_user_id: Some(owner_id),
            })
            .unwrap();
        store
            .insert_user(User {
                id: owner_id,
                organization_id: Some(org),
                email: "owner@acme.test".into(),
                status: UserStatus::Active,
            })
            .unwrap();
        let clerk = user(&store, org, "clerk@acme.test");

        World {
            service: AccessService::new(store.clone(), ResolverOptions::default()),
            store,
            org,
            owner: SessionIdentity {
                user_id: owner_id,
                organization_id: org,
            },
            clerk,
            now: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        }
    }

    fn module(name: &str, parent_id: Option<ModuleId>) -> NewModule {
        NewModule {
            name: name.into(),
            icon: None,
            parent_id,
            sort_order: 0,
            active: true,
        }
    }

    #[tokio::test]
    async fn unknown_user_is_unauthorized() {
        let w = world();
        let ghost = SessionIdentity {
            user_id: UserId::new(),
            organization_id: w.org,
        };
        assert!(matches!(
            w.service.caller(ghost, w.now).await,
            Err(AccessError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn mismatched_session_organization_is_forbidden() {
        let w = world();
        let foreign = SessionIdentity {
            organization_id: OrganizationId::new(),
            ..w.clerk
        };
        assert!(matches!(
            w.service.caller(foreign, w.now).await,
            Err(AccessError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn unprovisioned_user_fails_precondition() {
        let w = world();
        let id = UserId::new();
        w.store
            .insert_user(User {
                id,
                organization_id: None,
                email: "new@acme.test".into(),
                status: UserStatus::Active,
            })
            .unwrap();
        let identity = SessionIdentity {
            user_id: id,
            organization_id: w.org,
        };
        assert!(matches!(
            w.service.caller(identity, w.now).await,
            Err(AccessError::PreconditionFailed(_))
        ));
    }

    #[tokio::test]
    async fn per_field_changes_accumulate_on_one_grant() {
        let w = world();
        let hr = w.service.create_module(w.owner, module("HR", None), w.now).await.unwrap();
        let change = |action| PermissionChange {
            user_id: w.clerk.user_id,
            action,
            target: Target::Module(hr.id),
            granted: true,
            reason: None,
            granted_by: None,
            expires_at: None,
        };

        w.service
            .set_user_permissions(w.owner, vec![change(Action::View), change(Action::Edit)], w.now)
            .await
            .unwrap();

        let caller = w.service.caller(w.clerk, w.now).await.unwrap();
        let actions = caller.access.module_actions(hr.id);
        assert!(actions.view && actions.edit && !actions.delete);
        assert_eq!(caller.modules().len(), 1);

        let snapshot = w.store.load_snapshot(w.org).await.unwrap();
        assert_eq!(snapshot.grants.len(), 1);
        assert_eq!(snapshot.grants[0].granted_by, w.owner.user_id);
    }

    #[tokio::test]
    async fn management_requires_capability_or_admin() {
        let w = world();
        let hr = w.service.create_module(w.owner, module("HR", None), w.now).await.unwrap();

        let denied = w
            .service
            .set_user_permissions(
                w.clerk,
                vec![PermissionChange {
                    user_id: w.clerk.user_id,
                    action: Action::View,
                    target: Target::Module(hr.id),
                    granted: true,
                    reason: None,
                    granted_by: None,
                    expires_at: None,
                }],
                w.now,
            )
            .await;
        assert!(matches!(denied, Err(AccessError::Forbidden(_))));

        let denied = w.service.create_module(w.clerk, module("Finance", None), w.now).await;
        assert!(matches!(denied, Err(AccessError::Forbidden(_))));
    }

    #[tokio::test]
    async fn unit_manager_administers_only_their_subtree() {
        let w = world();
        let unit = |name: &str, parent_id| NewUnit {
            name: name.into(),
            parent_id,
            sort_order: 0,
        };
        let hq = w.service.create_unit(w.owner, unit("HQ", None), w.now).await.unwrap();
        let east = w.service.create_unit(w.owner, unit("East", Some(hq.id)), w.now).await.unwrap();
        let west = w.service.create_unit(w.owner, unit("West", Some(hq.id)), w.now).await.unwrap();

        let manager = RoleId::new();
        w.store
            .insert_role(Role {
                id: manager,
                organization_id: w.org,
                name: "Manager".into(),
                is_admin: false,
                capabilities: BTreeSet::from([SystemCapability::RoleManagement]),
            })
            .unwrap();
        w.store
            .assign_user(
                w.org,
                UserUnitAssignment {
                    user_id: w.clerk.user_id,
                    unit_id: east.id,
                    role_id: manager,
                },
            )
            .unwrap();

        let depot = w
            .service
            .create_unit(w.clerk, unit("Depot", Some(east.id)), w.now)
            .await
            .unwrap();
        assert_eq!(depot.level, 2);

        let denied = w.service.delete_unit(w.clerk, west.id, w.now).await;
        assert!(matches!(denied, Err(AccessError::Forbidden(_))));
        let denied = w.service.create_unit(w.clerk, unit("Annex", None), w.now).await;
        assert!(matches!(denied, Err(AccessError::Forbidden(_))));

        let removed = w.service.delete_unit(w.clerk, depot.id, w.now).await.unwrap();
        assert_eq!(removed, vec![depot.id]);
    }

    #[tokio::test]
    async fn pruned_tree_follows_form_grants() {
        let w = world();
        let hr = w.service.create_module(w.owner, module("HR", None), w.now).await.unwrap();
        let leave = w
            .service
            .create_module(w.owner, module("Leave", Some(hr.id)), w.now)
            .await
            .unwrap();
        w.service.create_module(w.owner, module("Finance", None), w.now).await.unwrap();
        let form = Form {
            id: FormId::new(),
            module_id: leave.id,
            name: "Leave request".into(),
            sort_order: 0,
            published: true,
        };
        w.store.insert_form(w.org, form.clone()).unwrap();

        w.service
            .set_user_permissions(
                w.owner,
                vec![PermissionChange {
                    user_id: w.clerk.user_id,
                    action: Action::View,
                    target: Target::Form(form.id),
                    granted: true,
                    reason: Some("leave desk".into()),
                    granted_by: None,
                    expires_at: None,
                }],
                w.now,
            )
            .await
            .unwrap();

        let caller = w.service.caller(w.clerk, w.now).await.unwrap();
        let tree = caller.tree().unwrap();
        assert_eq!(tree.roots(), &[hr.id]);
        assert_eq!(tree.node(leave.id).unwrap().forms.len(), 1);
        assert_eq!(caller.forms()[0].1.id, leave.id);
    }

    #[tokio::test]
    async fn role_deletion_needs_role_management() {
        let w = world();
        let auditor = RoleId::new();
        w.store
            .insert_role(Role {
                id: auditor,
                organization_id: w.org,
                name: "Auditor".into(),
                is_admin: false,
                capabilities: BTreeSet::new(),
            })
            .unwrap();

        let denied = w.service.delete_role(w.clerk, auditor, w.now).await;
        assert!(matches!(denied, Err(AccessError::Forbidden(_))));

        w.service.delete_role(w.owner, auditor, w.now).await.unwrap();
        let snapshot = w.store.load_snapshot(w.org).await.unwrap();
        assert!(snapshot.role(auditor).is_none());

        let missing = w.service.delete_role(w.owner, auditor, w.now).await;
        assert!(matches!(missing, Err(AccessError::NotFound(_))));
    }

    fn view_change(user_id: UserId, target: Target) -> PermissionChange {
        PermissionChange {
            user_id,
            action: Action::View,
            target,
            granted: true,
            reason: None,
            granted_by: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn failing_entry_rolls_back_the_whole_batch() {
        let w = world();
        let hr = w.service.create_module(w.owner, module("HR", None), w.now).await.unwrap();

        let result = w
            .service
            .set_user_permissions(
                w.owner,
                vec![
                    view_change(w.clerk.user_id, Target::Module(hr.id)),
                    view_change(w.clerk.user_id, Target::Form(FormId::new())),
                ],
                w.now,
            )
            .await;
        assert!(matches!(result, Err(AccessError::NotFound(_))));

        let snapshot = w.store.load_snapshot(w.org).await.unwrap();
        assert_eq!(snapshot.grants.len(), 0);
        let caller = w.service.caller(w.clerk, w.now).await.unwrap();
        assert!(caller.modules().is_empty());
    }

    #[tokio::test]
    async fn reapplying_a_batch_changes_nothing() {
        let w = world();
        let hr = w.service.create_module(w.owner, module("HR", None), w.now).await.unwrap();
        let batch = || {
            vec![
                view_change(w.clerk.user_id, Target::Module(hr.id)),
                PermissionChange {
                    action: Action::Edit,
                    ..view_change(w.clerk.user_id, Target::Module(hr.id))
                },
            ]
        };

        let first = w.service.set_user_permissions(w.owner, batch(), w.now).await.unwrap();
        let before = w.service.caller(w.clerk, w.now).await.unwrap().access;
        assert_eq!(before, w.service.caller(w.clerk, w.now).await.unwrap().access);

        let second = w.service.set_user_permissions(w.owner, batch(), w.now).await.unwrap();
        let after = w.service.caller(w.clerk, w.now).await.unwrap().access;
        assert_eq!(before, after);
        assert_eq!(first.last().map(|g| g.id), second.last().map(|g| g.id));
        assert_eq!(w.store.load_snapshot(w.org).await.unwrap().grants.len(), 1);
    }

    #[tokio::test]
    async fn delegated_manager_cannot_hand_out_admin_roles() {
        let w = world();
        let hq = w
            .service
            .create_unit(
                w.owner,
                NewUnit {
                    name: "HQ".into(),
                    parent_id: None,
                    sort_order: 0,
                },
                w.now,
            )
            .await
            .unwrap();
        let (manager, admin) = (RoleId::new(), RoleId::new());
        for (id, name, is_admin, capabilities) in [
            (manager, "Manager", false, BTreeSet::from([SystemCapability::RoleManagement])),
            (admin, "Admin", true, BTreeSet::new()),
        ] {
            w.store
                .insert_role(Role {
                    id,
                    organization_id: w.org,
                    name: name.into(),
                    is_admin,
                    capabilities,
                })
                .unwrap();
        }
        w.store
            .assign_user(
                w.org,
                UserUnitAssignment {
                    user_id: w.clerk.user_id,
                    unit_id: hq.id,
                    role_id: manager,
                },
            )
            .unwrap();

        let update = |users: Vec<RoleId>| UnitUpdate {
            name: "HQ".into(),
            sort_order: 0,
            assigned_roles: vec![manager, admin],
            assigned_users: users
                .into_iter()
                .map(|role_id| AssignedUser {
                    user_id: w.clerk.user_id,
                    role_id,
                })
                .collect(),
        };

        let denied = w
            .service
            .update_unit(w.clerk, hq.id, update(vec![manager, admin]), w.now)
            .await;
        assert!(matches!(denied, Err(AccessError::Forbidden(_))));
        let caller = w.service.caller(w.clerk, w.now).await.unwrap();
        assert!(!caller.access.is_org_admin);

        // Changes that leave admin assignments alone are still allowed.
        w.service
            .update_unit(w.clerk, hq.id, update(vec![manager]), w.now)
            .await
            .unwrap();

        w.service
            .update_unit(w.owner, hq.id, update(vec![manager, admin]), w.now)
            .await
            .unwrap();
        assert!(w.service.caller(w.clerk, w.now).await.unwrap().access.is_org_admin);
    }

    #[tokio::test]
    async fn assigned_user_role_outside_unit_roles_is_rejected() {
        let w = world();
        let hq = w
            .service
            .create_unit(
                w.owner,
                NewUnit {
                    name: "HQ".into(),
                    parent_id: None,
                    sort_order: 0,
                },
                w.now,
            )
            .await
            .unwrap();
        let (clerk_role, lead_role) = (RoleId::new(), RoleId::new());
        for (id, name) in [(clerk_role, "Clerk"), (lead_role, "Lead")] {
            w.store
                .insert_role(Role {
                    id,
                    organization_id: w.org,
                    name: name.into(),
                    is_admin: false,
                    capabilities: BTreeSet::new(),
                })
                .unwrap();
        }

        let result = w
            .service
            .update_unit(
                w.owner,
                hq.id,
                UnitUpdate {
                    name: "HQ".into(),
                    sort_order: 0,
                    assigned_roles: vec![clerk_role],
                    assigned_users: vec![AssignedUser {
                        user_id: w.clerk.user_id,
                        role_id: lead_role,
                    }],
                },
                w.now,
            )
            .await;
        assert!(matches!(result, Err(AccessError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn module_list_and_tree_agree_under_inactive_parent() {
        let w = world();
        let archive = w
            .service
            .create_module(
                w.owner,
                NewModule {
                    active: false,
                    ..module("Archive", None)
                },
                w.now,
            )
            .await
            .unwrap();
        w.service
            .create_module(w.owner, module("Reports", Some(archive.id)), w.now)
            .await
            .unwrap();
        let live = w.service.create_module(w.owner, module("Live", None), w.now).await.unwrap();

        let caller = w.service.caller(w.owner, w.now).await.unwrap();
        let listed: Vec<ModuleId> = caller.modules().iter().map(|m| m.id).collect();
        let walked: Vec<ModuleId> = caller
            .tree()
            .unwrap()
            .walk()
            .map(|e| e.node.module.id)
            .collect();
        assert_eq!(listed, vec![live.id]);
        assert_eq!(walked, listed);
    }
}
