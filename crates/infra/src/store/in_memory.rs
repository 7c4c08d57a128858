use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use formgate_access::{
    AccessSnapshot, DesiredChild, Form, Grant, GrantKey, GrantWrite, Module, Organization,
    OrganizationUnit, Role, Subject, UnitRoleAssignment, User, UserUnitAssignment,
    plan_child_replacement,
};
use formgate_core::{AccessError, AccessResult, ModuleId, OrganizationId, RoleId, UnitId, UserId};

use super::cascade;
use super::{AccessStore, NewModule, NewUnit, UnitUpdate};

#[derive(Debug, Clone, Default)]
struct State {
    users: HashMap<UserId, User>,
    organizations: HashMap<OrganizationId, AccessSnapshot>,
}

impl State {
    fn organization(&self, id: OrganizationId) -> AccessResult<&AccessSnapshot> {
        self.organizations
            .get(&id)
            .ok_or_else(|| AccessError::not_found(format!("organization {id}")))
    }

    fn organization_mut(&mut self, id: OrganizationId) -> AccessResult<&mut AccessSnapshot> {
        self.organizations
            .get_mut(&id)
            .ok_or_else(|| AccessError::not_found(format!("organization {id}")))
    }

    fn members(&self, organization_id: OrganizationId) -> HashSet<UserId> {
        self.users
            .values()
            .filter(|u| u.organization_id == Some(organization_id))
            .map(|u| u.id)
            .collect()
    }
}

/// In-memory access store for tests/dev.
///
/// Every write clones the state, applies the change to the clone and swaps it
/// in only when the whole change succeeded.
#[derive(Debug, Default)]
pub struct InMemoryAccessStore {
    state: RwLock<State>,
}

impl InMemoryAccessStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> AccessResult<T>) -> AccessResult<T> {
        let state = self
            .state
            .read()
            .map_err(|_| AccessError::storage("access state lock poisoned"))?;
        f(&state)
    }

    fn write<T>(&self, f: impl FnOnce(&mut State) -> AccessResult<T>) -> AccessResult<T> {
        let mut state = self
            .state
            .write()
            .map_err(|_| AccessError::storage("access state lock poisoned"))?;
        let mut next = state.clone();
        let out = f(&mut next)?;
        *state = next;
        Ok(out)
    }

    // ── Seeding (dev/test) ──────────────────────────────────────────────────

    pub fn insert_organization(&self, organization: Organization) -> AccessResult<()> {
        self.write(|s| {
            s.organizations
                .insert(organization.id, AccessSnapshot::empty(organization));
            Ok(())
        })
    }

    pub fn insert_user(&self, user: User) -> AccessResult<()> {
        self.write(|s| {
            if let Some(org) = user.organization_id {
                s.organization(org)?;
            }
            s.users.insert(user.id, user);
            Ok(())
        })
    }

    pub fn insert_role(&self, role: Role) -> AccessResult<()> {
        self.write(|s| {
            s.organization_mut(role.organization_id)?.roles.push(role);
            Ok(())
        })
    }

    pub fn insert_unit(&self, unit: OrganizationUnit) -> AccessResult<()> {
        self.write(|s| {
            s.organization_mut(unit.organization_id)?.units.push(unit);
            Ok(())
        })
    }

    pub fn insert_module(&self, module: Module) -> AccessResult<()> {
        self.write(|s| {
            s.organization_mut(module.organization_id)?.modules.push(module);
            Ok(())
        })
    }

    pub fn insert_form(&self, organization_id: OrganizationId, form: Form) -> AccessResult<()> {
        self.write(|s| {
            let snapshot = s.organization_mut(organization_id)?;
            if snapshot.module(form.module_id).is_none() {
                return Err(AccessError::not_found(format!("module {}", form.module_id)));
            }
            snapshot.forms.push(form);
            Ok(())
        })
    }

    pub fn assign_role_to_unit(
        &self,
        organization_id: OrganizationId,
        assignment: UnitRoleAssignment,
    ) -> AccessResult<()> {
        self.write(|s| {
            s.organization_mut(organization_id)?.unit_roles.push(assignment);
            Ok(())
        })
    }

    pub fn assign_user(
        &self,
        organization_id: OrganizationId,
        assignment: UserUnitAssignment,
    ) -> AccessResult<()> {
        self.write(|s| {
            s.organization_mut(organization_id)?.user_units.push(assignment);
            Ok(())
        })
    }
}

#[async_trait::async_trait]
impl AccessStore for InMemoryAccessStore {
    async fn find_user(&self, user_id: UserId) -> AccessResult<Option<User>> {
        self.read(|s| Ok(s.users.get(&user_id).cloned()))
    }

    async fn find_organization(
        &self,
        organization_id: OrganizationId,
    ) -> AccessResult<Option<Organization>> {
        self.read(|s| {
            Ok(s.organizations
                .get(&organization_id)
                .map(|snapshot| snapshot.organization.clone()))
        })
    }

    async fn load_snapshot(&self, organization_id: OrganizationId) -> AccessResult<AccessSnapshot> {
        self.read(|s| s.organization(organization_id).cloned())
    }

    async fn write_grants(
        &self,
        organization_id: OrganizationId,
        writes: Vec<GrantWrite>,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<Grant>> {
        let written = self.write(|s| {
            let members = s.members(organization_id);
            let snapshot = s.organization_mut(organization_id)?;

            let mut written = Vec::with_capacity(writes.len());
            for write in writes {
                let key = write.key;
                let user_exists = match key.subject {
                    Subject::User(u) => members.contains(&u),
                    Subject::Role(_) => true,
                };
                snapshot.ensure_subject(key.subject, user_exists)?;
                snapshot.ensure_target(key.target)?;

                let existing = snapshot.find_grant(key.subject, key.target);
                let grant = write
                    .into_request(existing)
                    .into_grant(organization_id, existing, now);
                snapshot.grants.retain(|g| g.key != key);
                snapshot.grants.push(grant.clone());
                written.push(grant);
            }
            Ok(written)
        })?;

        tracing::info!(
            organization_id = %organization_id,
            count = written.len(),
            "grant batch written"
        );
        Ok(written)
    }

    async fn revoke_grant(
        &self,
        organization_id: OrganizationId,
        key: GrantKey,
    ) -> AccessResult<()> {
        self.write(|s| {
            let snapshot = s.organization_mut(organization_id)?;
            let before = snapshot.grants.len();
            snapshot.grants.retain(|g| g.key != key);
            if snapshot.grants.len() == before {
                return Err(AccessError::not_found("grant"));
            }
            Ok(())
        })?;
        tracing::info!(organization_id = %organization_id, subject = ?key.subject, target = ?key.target, "grant revoked");
        Ok(())
    }

    async fn create_unit(
        &self,
        organization_id: OrganizationId,
        unit: NewUnit,
    ) -> AccessResult<OrganizationUnit> {
        self.write(|s| {
            let snapshot = s.organization_mut(organization_id)?;
            let unit = cascade::build_unit(snapshot, unit)?;
            snapshot.units.push(unit.clone());
            Ok(unit)
        })
    }

    async fn update_unit(
        &self,
        organization_id: OrganizationId,
        unit_id: UnitId,
        update: UnitUpdate,
    ) -> AccessResult<OrganizationUnit> {
        self.write(|s| {
            let members = s.members(organization_id);
            let snapshot = s.organization_mut(organization_id)?;
            let (unit, unit_roles, user_units) =
                cascade::check_unit_update(snapshot, unit_id, &update, |u| members.contains(&u))?;

            snapshot.unit_roles.retain(|a| a.unit_id != unit_id);
            snapshot.unit_roles.extend(unit_roles);
            snapshot.user_units.retain(|a| a.unit_id != unit_id);
            snapshot.user_units.extend(user_units);
            if let Some(slot) = snapshot.units.iter_mut().find(|u| u.id == unit_id) {
                *slot = unit.clone();
            }
            Ok(unit)
        })
    }

    async fn delete_unit(
        &self,
        organization_id: OrganizationId,
        unit_id: UnitId,
    ) -> AccessResult<Vec<UnitId>> {
        let removed = self.write(|s| {
            let snapshot = s.organization_mut(organization_id)?;
            let order = cascade::plan_unit_removal(snapshot, unit_id)?;
            cascade::remove_units(snapshot, &order);
            Ok(order)
        })?;
        tracing::info!(organization_id = %organization_id, unit_id = %unit_id, removed = removed.len(), "unit subtree deleted");
        Ok(removed)
    }

    async fn create_module(
        &self,
        organization_id: OrganizationId,
        module: NewModule,
    ) -> AccessResult<Module> {
        self.write(|s| {
            let snapshot = s.organization_mut(organization_id)?;
            let module = cascade::build_module(snapshot, module)?;
            snapshot.modules.push(module.clone());
            Ok(module)
        })
    }

    async fn delete_module(
        &self,
        organization_id: OrganizationId,
        module_id: ModuleId,
    ) -> AccessResult<Vec<ModuleId>> {
        let removed = self.write(|s| {
            let snapshot = s.organization_mut(organization_id)?;
            let plan = cascade::plan_module_removal(snapshot, module_id)?;
            cascade::remove_modules(snapshot, &plan);
            Ok(plan.modules)
        })?;
        tracing::info!(organization_id = %organization_id, module_id = %module_id, removed = removed.len(), "module subtree deleted");
        Ok(removed)
    }

    async fn replace_submodules(
        &self,
        organization_id: OrganizationId,
        parent_id: ModuleId,
        desired: Vec<DesiredChild>,
    ) -> AccessResult<Vec<Module>> {
        self.write(|s| {
            let snapshot = s.organization_mut(organization_id)?;
            let plan = plan_child_replacement(snapshot, parent_id, desired)?;
            cascade::apply_replacement(snapshot, &plan);
            Ok(cascade::children_in_order(snapshot, parent_id))
        })
    }

    async fn delete_role(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
    ) -> AccessResult<()> {
        self.write(|s| {
            let snapshot = s.organization_mut(organization_id)?;
            if snapshot.role(role_id).is_none() {
                return Err(AccessError::not_found(format!("role {role_id}")));
            }
            cascade::remove_role(snapshot, role_id);
            Ok(())
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AssignedUser;
    use chrono::TimeZone;
    use formgate_access::{Action, ActionSet, ActionsUpdate, GrantRequest, Target, UserStatus};
    use formgate_core::FormId;

    struct Seed {
        store: InMemoryAccessStore,
        org: OrganizationId,
        user: UserId,
        now: DateTime<Utc>,
    }

    fn seed() -> Seed {
        let store = InMemoryAccessStore::new();
        let org = OrganizationId::new();
        let user = UserId::new();
        store
            .insert_organization(Organization {
                id: org,
                name: "Acme".into(),
                owner_user_id: None,
            })
            .unwrap();
        store
            .insert_user(User {
                id: user,
                organization_id: Some(org),
                email: "ana@acme.test".into(),
                status: UserStatus::Active,
            })
            .unwrap();
        Seed {
            store,
            org,
            user,
            now: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        }
    }

    fn new_module(name: &str, parent_id: Option<ModuleId>) -> NewModule {
        NewModule {
            name: name.into(),
            icon: None,
            parent_id,
            sort_order: 0,
            active: true,
        }
    }

    fn request(seed: &Seed, target: Target, actions: ActionSet) -> GrantRequest {
        GrantRequest {
            key: GrantKey {
                subject: Subject::User(seed.user),
                target,
            },
            granted: true,
            actions,
            reason: None,
            granted_by: seed.user,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_replaces_bundle() {
        let s = seed();
        let finance = s.store.create_module(s.org, new_module("Finance", None)).await.unwrap();
        let target = Target::Module(finance.id);

        let first = s
            .store
            .upsert_grant(s.org, request(&s, target, ActionSet::all()), s.now)
            .await
            .unwrap();
        let again = s
            .store
            .upsert_grant(s.org, request(&s, target, ActionSet::all()), s.now)
            .await
            .unwrap();
        assert_eq!(first.id, again.id);

        s.store
            .upsert_grant(s.org, request(&s, target, ActionSet::view_only()), s.now)
            .await
            .unwrap();
        let snapshot = s.store.load_snapshot(s.org).await.unwrap();
        assert_eq!(snapshot.grants.len(), 1);
        assert_eq!(snapshot.grants[0].actions, ActionSet::view_only());
    }

    #[tokio::test]
    async fn upsert_rejects_unknown_subject_or_target() {
        let s = seed();
        let missing = s
            .store
            .upsert_grant(
                s.org,
                request(&s, Target::Form(FormId::new()), ActionSet::view_only()),
                s.now,
            )
            .await;
        assert!(matches!(missing, Err(AccessError::NotFound(_))));

        let module = s.store.create_module(s.org, new_module("HR", None)).await.unwrap();
        let mut stranger = request(&s, Target::Module(module.id), ActionSet::view_only());
        stranger.key.subject = Subject::User(UserId::new());
        let result = s.store.upsert_grant(s.org, stranger, s.now).await;
        assert!(matches!(result, Err(AccessError::NotFound(_))));
    }

    #[tokio::test]
    async fn expired_grants_are_kept_but_not_read() {
        let s = seed();
        let module = s.store.create_module(s.org, new_module("HR", None)).await.unwrap();
        let mut req = request(&s, Target::Module(module.id), ActionSet::view_only());
        req.expires_at = Some(s.now);
        s.store.upsert_grant(s.org, req, s.now).await.unwrap();

        assert!(s.store.user_grants(s.org, s.user, s.now).await.unwrap().is_empty());
        assert_eq!(s.store.load_snapshot(s.org).await.unwrap().grants.len(), 1);
    }

    #[tokio::test]
    async fn unit_delete_cascades_leaves_first() {
        let s = seed();
        let unit = |name: &str, parent_id| NewUnit {
            name: name.into(),
            parent_id,
            sort_order: 0,
        };
        let root = s.store.create_unit(s.org, unit("HQ", None)).await.unwrap();
        let east = s.store.create_unit(s.org, unit("East", Some(root.id))).await.unwrap();
        let depot = s.store.create_unit(s.org, unit("Depot", Some(east.id))).await.unwrap();
        assert_eq!(depot.level, 2);

        let role = RoleId::new();
        s.store
            .insert_role(Role {
                id: role,
                organization_id: s.org,
                name: "Clerk".into(),
                is_admin: false,
                capabilities: Default::default(),
            })
            .unwrap();
        s.store
            .assign_user(
                s.org,
                UserUnitAssignment {
                    user_id: s.user,
                    unit_id: depot.id,
                    role_id: role,
                },
            )
            .unwrap();

        let removed = s.store.delete_unit(s.org, east.id).await.unwrap();
        assert_eq!(removed, vec![depot.id, east.id]);

        let snapshot = s.store.load_snapshot(s.org).await.unwrap();
        assert_eq!(snapshot.units.len(), 1);
        assert!(snapshot.user_units.is_empty());
    }

    #[tokio::test]
    async fn update_unit_replaces_assignments() {
        let s = seed();
        let hq = s
            .store
            .create_unit(
                s.org,
                NewUnit {
                    name: "HQ".into(),
                    parent_id: None,
                    sort_order: 0,
                },
            )
            .await
            .unwrap();
        let (clerk, lead) = (RoleId::new(), RoleId::new());
        for (id, name) in [(clerk, "Clerk"), (lead, "Lead")] {
            s.store
                .insert_role(Role {
                    id,
                    organization_id: s.org,
                    name: name.into(),
                    is_admin: false,
                    capabilities: Default::default(),
                })
                .unwrap();
        }

        let update = |roles: Vec<RoleId>, role_for_user| UnitUpdate {
            name: "Head office".into(),
            sort_order: 1,
            assigned_roles: roles,
            assigned_users: vec![AssignedUser {
                user_id: s.user,
                role_id: role_for_user,
            }],
        };

        s.store
            .update_unit(s.org, hq.id, update(vec![clerk, lead], clerk))
            .await
            .unwrap();
        let unit = s
            .store
            .update_unit(s.org, hq.id, update(vec![lead], lead))
            .await
            .unwrap();
        assert_eq!(unit.name, "Head office");

        let snapshot = s.store.load_snapshot(s.org).await.unwrap();
        assert_eq!(
            snapshot.unit_roles,
            vec![UnitRoleAssignment {
                unit_id: hq.id,
                role_id: lead
            }]
        );
        assert_eq!(snapshot.user_units.len(), 1);
        assert_eq!(snapshot.user_units[0].role_id, lead);
    }

    #[tokio::test]
    async fn failed_update_leaves_state_untouched() {
        let s = seed();
        let hq = s
            .store
            .create_unit(
                s.org,
                NewUnit {
                    name: "HQ".into(),
                    parent_id: None,
                    sort_order: 0,
                },
            )
            .await
            .unwrap();
        let before = s.store.load_snapshot(s.org).await.unwrap();

        let result = s
            .store
            .update_unit(
                s.org,
                hq.id,
                UnitUpdate {
                    name: "Renamed".into(),
                    sort_order: 0,
                    assigned_roles: vec![RoleId::new()],
                    assigned_users: vec![],
                },
            )
            .await;
        assert!(matches!(result, Err(AccessError::NotFound(_))));
        assert_eq!(s.store.load_snapshot(s.org).await.unwrap(), before);
    }

    #[tokio::test]
    async fn module_delete_removes_forms_and_grants() {
        let s = seed();
        let hr = s.store.create_module(s.org, new_module("HR", None)).await.unwrap();
        let leave = s.store.create_module(s.org, new_module("Leave", Some(hr.id))).await.unwrap();
        let form = Form {
            id: FormId::new(),
            module_id: leave.id,
            name: "Leave request".into(),
            sort_order: 0,
            published: true,
        };
        s.store.insert_form(s.org, form.clone()).unwrap();
        s.store
            .upsert_grant(s.org, request(&s, Target::Form(form.id), ActionSet::view_only()), s.now)
            .await
            .unwrap();

        let removed = s.store.delete_module(s.org, hr.id).await.unwrap();
        assert_eq!(removed, vec![leave.id, hr.id]);

        let snapshot = s.store.load_snapshot(s.org).await.unwrap();
        assert!(snapshot.modules.is_empty());
        assert!(snapshot.forms.is_empty());
        assert!(snapshot.grants.is_empty());
    }

    #[tokio::test]
    async fn replace_submodules_is_all_or_nothing() {
        let s = seed();
        let hr = s.store.create_module(s.org, new_module("HR", None)).await.unwrap();
        let leave = s.store.create_module(s.org, new_module("Leave", Some(hr.id))).await.unwrap();
        let before = s.store.load_snapshot(s.org).await.unwrap();

        let bad = vec![
            DesiredChild {
                id: None,
                name: "Recruiting".into(),
                icon: None,
                sort_order: 0,
                active: true,
            },
            DesiredChild {
                id: Some(ModuleId::new()),
                name: "Ghost".into(),
                icon: None,
                sort_order: 1,
                active: true,
            },
        ];
        let result = s.store.replace_submodules(s.org, hr.id, bad).await;
        assert!(matches!(result, Err(AccessError::InvalidArgument(_))));
        assert_eq!(s.store.load_snapshot(s.org).await.unwrap(), before);

        let children = s
            .store
            .replace_submodules(
                s.org,
                hr.id,
                vec![DesiredChild {
                    id: None,
                    name: "Recruiting".into(),
                    icon: Some("briefcase".into()),
                    sort_order: 0,
                    active: true,
                }],
            )
            .await
            .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "Recruiting");
        let snapshot = s.store.load_snapshot(s.org).await.unwrap();
        assert!(snapshot.module(leave.id).is_none());
    }

    #[tokio::test]
    async fn role_delete_cascades_to_grants_and_assignments() {
        let s = seed();
        let module = s.store.create_module(s.org, new_module("HR", None)).await.unwrap();
        let role = RoleId::new();
        s.store
            .insert_role(Role {
                id: role,
                organization_id: s.org,
                name: "Clerk".into(),
                is_admin: false,
                capabilities: Default::default(),
            })
            .unwrap();
        let mut req = request(&s, Target::Module(module.id), ActionSet::view_only());
        req.key.subject = Subject::Role(role);
        s.store.upsert_grant(s.org, req, s.now).await.unwrap();
        assert_eq!(s.store.role_grants(s.org, role, s.now).await.unwrap().len(), 1);

        s.store.delete_role(s.org, role).await.unwrap();
        let snapshot = s.store.load_snapshot(s.org).await.unwrap();
        assert!(snapshot.grants.is_empty());
        assert!(matches!(
            s.store.role_grants(s.org, role, s.now).await,
            Err(AccessError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn grant_batch_is_all_or_nothing() {
        let s = seed();
        let hr = s.store.create_module(s.org, new_module("HR", None)).await.unwrap();
        let view = |target| GrantWrite {
            key: GrantKey {
                subject: Subject::User(s.user),
                target,
            },
            granted: true,
            actions: ActionsUpdate::Set {
                action: Action::View,
                on: true,
            },
            reason: None,
            granted_by: s.user,
            expires_at: None,
        };

        let result = s
            .store
            .write_grants(
                s.org,
                vec![view(Target::Module(hr.id)), view(Target::Form(FormId::new()))],
                s.now,
            )
            .await;
        assert!(matches!(result, Err(AccessError::NotFound(_))));
        assert!(s.store.load_snapshot(s.org).await.unwrap().grants.is_empty());
    }

    #[tokio::test]
    async fn batched_action_flips_accumulate_on_one_row() {
        let s = seed();
        let hr = s.store.create_module(s.org, new_module("HR", None)).await.unwrap();
        let flip = |action| GrantWrite {
            key: GrantKey {
                subject: Subject::User(s.user),
                target: Target::Module(hr.id),
            },
            granted: true,
            actions: ActionsUpdate::Set { action, on: true },
            reason: None,
            granted_by: s.user,
            expires_at: None,
        };

        let written = s
            .store
            .write_grants(s.org, vec![flip(Action::View), flip(Action::Delete)], s.now)
            .await
            .unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].id, written[1].id);

        let snapshot = s.store.load_snapshot(s.org).await.unwrap();
        assert_eq!(snapshot.grants.len(), 1);
        assert_eq!(
            snapshot.grants[0].actions,
            ActionSet::view_only().with(Action::Delete)
        );
    }

    #[tokio::test]
    async fn unit_delete_removes_both_child_subtrees_and_their_assignments() {
        let s = seed();
        let unit = |name: &str, parent_id| NewUnit {
            name: name.into(),
            parent_id,
            sort_order: 0,
        };
        let hq = s.store.create_unit(s.org, unit("HQ", None)).await.unwrap();
        let sales = s.store.create_unit(s.org, unit("Sales", Some(hq.id))).await.unwrap();
        let ops = s.store.create_unit(s.org, unit("Ops", Some(hq.id))).await.unwrap();
        let plant = s.store.create_unit(s.org, unit("Plant", Some(ops.id))).await.unwrap();
        let line = s.store.create_unit(s.org, unit("Line 1", Some(plant.id))).await.unwrap();
        let other = s.store.create_unit(s.org, unit("Elsewhere", None)).await.unwrap();

        let role = RoleId::new();
        s.store
            .insert_role(Role {
                id: role,
                organization_id: s.org,
                name: "Operator".into(),
                is_admin: false,
                capabilities: Default::default(),
            })
            .unwrap();
        for unit_id in [sales.id, plant.id, line.id, other.id] {
            s.store
                .assign_role_to_unit(s.org, UnitRoleAssignment { unit_id, role_id: role })
                .unwrap();
            s.store
                .assign_user(
                    s.org,
                    UserUnitAssignment {
                        user_id: s.user,
                        unit_id,
                        role_id: role,
                    },
                )
                .unwrap();
        }

        let removed = s.store.delete_unit(s.org, hq.id).await.unwrap();
        assert_eq!(removed.len(), 5);
        assert_eq!(removed.last(), Some(&hq.id));
        let position = |id| removed.iter().position(|u| *u == id).unwrap();
        assert!(position(line.id) < position(plant.id));
        assert!(position(plant.id) < position(ops.id));

        let snapshot = s.store.load_snapshot(s.org).await.unwrap();
        assert_eq!(snapshot.units.len(), 1);
        assert_eq!(
            snapshot.unit_roles,
            vec![UnitRoleAssignment {
                unit_id: other.id,
                role_id: role
            }]
        );
        assert_eq!(snapshot.user_units.len(), 1);
        assert_eq!(snapshot.user_units[0].unit_id, other.id);
    }

    #[tokio::test]
    async fn assigned_user_role_must_be_assigned_to_the_unit() {
        let s = seed();
        let hq = s
            .store
            .create_unit(
                s.org,
                NewUnit {
                    name: "HQ".into(),
                    parent_id: None,
                    sort_order: 0,
                },
            )
            .await
            .unwrap();
        let (clerk, lead) = (RoleId::new(), RoleId::new());
        for (id, name) in [(clerk, "Clerk"), (lead, "Lead")] {
            s.store
                .insert_role(Role {
                    id,
                    organization_id: s.org,
                    name: name.into(),
                    is_admin: false,
                    capabilities: Default::default(),
                })
                .unwrap();
        }

        let result = s
            .store
            .update_unit(
                s.org,
                hq.id,
                UnitUpdate {
                    name: "HQ".into(),
                    sort_order: 0,
                    assigned_roles: vec![clerk],
                    assigned_users: vec![AssignedUser {
                        user_id: s.user,
                        role_id: lead,
                    }],
                },
            )
            .await;
        assert!(matches!(result, Err(AccessError::InvalidArgument(_))));
        assert!(s.store.load_snapshot(s.org).await.unwrap().user_units.is_empty());
    }
}
