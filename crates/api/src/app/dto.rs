use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use formgate_access::{
    Action, ActionSet, DesiredChild, Form, Grant, GrantKey, Module, ModuleTree, OrganizationUnit,
    Subject, SystemSummary, Target,
};
use formgate_core::{AccessError, AccessResult, FormId, ModuleId, RoleId, UnitId, UserId};
use formgate_infra::{AssignedUser, NewModule, NewUnit, PermissionChange, RoleGrantChange, UnitUpdate};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionChangeRequest {
    pub user_id: UserId,
    /// Action name: `view`, `create`, `edit`, `delete` or `manage`.
    pub permission_id: String,
    pub module_id: Option<ModuleId>,
    pub form_id: Option<FormId>,
    pub granted: bool,
    pub reason: Option<String>,
    pub granted_by: Option<UserId>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PermissionChangeRequest {
    pub fn into_change(self) -> AccessResult<PermissionChange> {
        Ok(PermissionChange {
            user_id: self.user_id,
            action: self.permission_id.parse::<Action>()?,
            target: Target::from_parts(self.module_id, self.form_id)?,
            granted: self.granted,
            reason: self.reason,
            granted_by: self.granted_by,
            expires_at: self.expires_at,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleGrantRequest {
    pub module_id: Option<ModuleId>,
    pub form_id: Option<FormId>,
    #[serde(default = "default_true")]
    pub granted: bool,
    #[serde(default)]
    pub can_view: bool,
    #[serde(default)]
    pub can_add: bool,
    #[serde(default)]
    pub can_edit: bool,
    #[serde(default)]
    pub can_delete: bool,
    #[serde(default)]
    pub can_manage: bool,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl RoleGrantRequest {
    pub fn into_change(self) -> AccessResult<RoleGrantChange> {
        Ok(RoleGrantChange {
            target: Target::from_parts(self.module_id, self.form_id)?,
            granted: self.granted,
            actions: ActionSet {
                view: self.can_view,
                create: self.can_add,
                edit: self.can_edit,
                delete: self.can_delete,
                manage: self.can_manage,
            },
            reason: self.reason,
            expires_at: self.expires_at,
        })
    }
}

/// Natural key of the grant to revoke. Exactly one subject and one target.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeGrantRequest {
    pub user_id: Option<UserId>,
    pub role_id: Option<RoleId>,
    pub module_id: Option<ModuleId>,
    pub form_id: Option<FormId>,
}

impl RevokeGrantRequest {
    pub fn into_key(self) -> AccessResult<GrantKey> {
        let subject = match (self.user_id, self.role_id) {
            (Some(user_id), None) => Subject::User(user_id),
            (None, Some(role_id)) => Subject::Role(role_id),
            _ => {
                return Err(AccessError::invalid_argument(
                    "grant subject must be exactly one of userId or roleId",
                ));
            }
        };
        Ok(GrantKey {
            subject,
            target: Target::from_parts(self.module_id, self.form_id)?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUnitRequest {
    pub name: String,
    pub parent_id: Option<UnitId>,
    #[serde(default)]
    pub sort_order: i32,
}

impl From<CreateUnitRequest> for NewUnit {
    fn from(req: CreateUnitRequest) -> Self {
        NewUnit {
            name: req.name,
            parent_id: req.parent_id,
            sort_order: req.sort_order,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedUserRequest {
    pub user_id: UserId,
    pub role_id: RoleId,
}

/// `assignedRoles` and `assignedUsers` replace the unit's current lists.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUnitRequest {
    pub name: String,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub assigned_roles: Vec<RoleId>,
    #[serde(default)]
    pub assigned_users: Vec<AssignedUserRequest>,
}

impl From<UpdateUnitRequest> for UnitUpdate {
    fn from(req: UpdateUnitRequest) -> Self {
        UnitUpdate {
            name: req.name,
            sort_order: req.sort_order,
            assigned_roles: req.assigned_roles,
            assigned_users: req
                .assigned_users
                .into_iter()
                .map(|u| AssignedUser {
                    user_id: u.user_id,
                    role_id: u.role_id,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateModuleRequest {
    pub name: String,
    pub icon: Option<String>,
    pub parent_id: Option<ModuleId>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl From<CreateModuleRequest> for NewModule {
    fn from(req: CreateModuleRequest) -> Self {
        NewModule {
            name: req.name,
            icon: req.icon,
            parent_id: req.parent_id,
            sort_order: req.sort_order,
            active: req.active,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmoduleRequest {
    /// Existing child to keep; absent to create a new one.
    pub module_id: Option<ModuleId>,
    pub name: String,
    pub icon: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl From<SubmoduleRequest> for DesiredChild {
    fn from(req: SubmoduleRequest) -> Self {
        DesiredChild {
            id: req.module_id,
            name: req.name,
            icon: req.icon,
            sort_order: req.sort_order,
            active: req.active,
        }
    }
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn module_to_json(m: &Module) -> serde_json::Value {
    json!({
        "moduleId": m.id,
        "name": m.name,
        "icon": m.icon,
        "level": m.level,
        "sortOrder": m.sort_order,
    })
}

/// Forms carry the level of their owning module.
pub fn form_to_json(f: &Form, owner: &Module) -> serde_json::Value {
    json!({
        "formId": f.id,
        "name": f.name,
        "moduleId": f.module_id,
        "level": owner.level,
        "sortOrder": f.sort_order,
    })
}

pub fn actions_to_json(a: ActionSet) -> serde_json::Value {
    json!({
        "canView": a.view,
        "canAdd": a.create,
        "canEdit": a.edit,
        "canDelete": a.delete,
        "canManage": a.manage,
    })
}

pub fn system_to_json(s: SystemSummary) -> serde_json::Value {
    json!({
        "isAdmin": s.is_admin,
        "canManageUsers": s.can_manage_users,
        "canManageRoles": s.can_manage_roles,
        "canManagePermissions": s.can_manage_permissions,
    })
}

pub fn grant_to_json(g: &Grant) -> serde_json::Value {
    let (subject_type, subject_id) = match g.key.subject {
        Subject::User(id) => ("user", id.to_string()),
        Subject::Role(id) => ("role", id.to_string()),
    };
    json!({
        "grantId": g.id,
        "subjectType": subject_type,
        "subjectId": subject_id,
        "moduleId": g.key.target.module_id(),
        "formId": g.key.target.form_id(),
        "granted": g.granted,
        "actions": actions_to_json(g.actions),
        "reason": g.reason,
        "grantedBy": g.granted_by,
        "grantedAt": g.granted_at,
        "expiresAt": g.expires_at,
    })
}

pub fn unit_to_json(u: &OrganizationUnit) -> serde_json::Value {
    json!({
        "unitId": u.id,
        "name": u.name,
        "level": u.level,
        "sortOrder": u.sort_order,
        "parentId": u.parent_id,
    })
}

/// Pre-order listing of the tree; `depth` and `parentId` carry the nesting.
pub fn tree_to_json(tree: &ModuleTree) -> serde_json::Value {
    let items = tree
        .walk()
        .map(|entry| {
            let node = entry.node;
            json!({
                "moduleId": node.module.id,
                "parentId": node.module.parent_id,
                "name": node.module.name,
                "icon": node.module.icon,
                "level": node.module.level,
                "sortOrder": node.module.sort_order,
                "depth": entry.depth,
                "forms": node
                    .forms
                    .iter()
                    .map(|f| form_to_json(f, &node.module))
                    .collect::<Vec<_>>(),
            })
        })
        .collect::<Vec<_>>();
    json!({ "items": items })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_change_parses_action_and_target() {
        let body = json!({
            "userId": UserId::new(),
            "permissionId": "edit",
            "formId": FormId::new(),
            "granted": true,
            "reason": null,
        });
        let req: PermissionChangeRequest = serde_json::from_value(body).unwrap();
        let change = req.into_change().unwrap();
        assert_eq!(change.action, Action::Edit);
        assert!(matches!(change.target, Target::Form(_)));
    }

    #[test]
    fn permission_change_needs_exactly_one_target() {
        let body = json!({
            "userId": UserId::new(),
            "permissionId": "view",
            "moduleId": ModuleId::new(),
            "formId": FormId::new(),
            "granted": true,
        });
        let req: PermissionChangeRequest = serde_json::from_value(body).unwrap();
        assert!(req.into_change().is_err());
    }

    #[test]
    fn unknown_permission_is_rejected() {
        let body = json!({
            "userId": UserId::new(),
            "permissionId": "approve",
            "moduleId": ModuleId::new(),
            "granted": true,
        });
        let req: PermissionChangeRequest = serde_json::from_value(body).unwrap();
        assert!(req.into_change().is_err());
    }

    #[test]
    fn revoke_key_needs_one_subject() {
        let req = RevokeGrantRequest {
            user_id: Some(UserId::new()),
            role_id: Some(RoleId::new()),
            module_id: Some(ModuleId::new()),
            form_id: None,
        };
        assert!(req.into_key().is_err());
    }

    #[test]
    fn role_grant_maps_can_add_to_create() {
        let body = json!({ "moduleId": ModuleId::new(), "canView": true, "canAdd": true });
        let req: RoleGrantRequest = serde_json::from_value(body).unwrap();
        let change = req.into_change().unwrap();
        assert!(change.granted);
        assert!(change.actions.view && change.actions.create);
        assert!(!change.actions.edit);
    }
}
