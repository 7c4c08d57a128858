//! Directory records the resolver reads: organizations, users, units, roles,
//! modules and forms.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use formgate_core::{
    AccessError, Entity, FormId, ModuleId, OrganizationId, RoleId, TreeNode, UnitId, UserId,
};

// ─────────────────────────────────────────────────────────────────────────────
// Organization & users
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    /// User who created the organization. Treated as an administrator when the
    /// resolver is configured to honor bootstrap owners.
    pub owner_user_id: Option<UserId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Primary organization. `None` for accounts that were never provisioned.
    pub organization_id: Option<OrganizationId>,
    pub email: String,
    pub status: UserStatus,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles & system capabilities
// ─────────────────────────────────────────────────────────────────────────────

/// Organization-wide capability keys outside the module/form tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SystemCapability {
    #[serde(rename = "system:admin")]
    Admin,
    #[serde(rename = "system:user_management")]
    UserManagement,
    #[serde(rename = "system:role_management")]
    RoleManagement,
    #[serde(rename = "system:permission_management")]
    PermissionManagement,
}

impl SystemCapability {
    pub fn key(&self) -> &'static str {
        match self {
            SystemCapability::Admin => "system:admin",
            SystemCapability::UserManagement => "system:user_management",
            SystemCapability::RoleManagement => "system:role_management",
            SystemCapability::PermissionManagement => "system:permission_management",
        }
    }

    pub fn from_key(key: &str) -> Result<Self, AccessError> {
        match key {
            "system:admin" => Ok(SystemCapability::Admin),
            "system:user_management" => Ok(SystemCapability::UserManagement),
            "system:role_management" => Ok(SystemCapability::RoleManagement),
            "system:permission_management" => Ok(SystemCapability::PermissionManagement),
            other => Err(AccessError::invalid_argument(format!(
                "unknown system capability '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub organization_id: OrganizationId,
    pub name: String,
    /// Universal bypass within the organization.
    pub is_admin: bool,
    #[serde(default)]
    pub capabilities: BTreeSet<SystemCapability>,
}

impl Role {
    pub fn has_capability(&self, capability: SystemCapability) -> bool {
        match capability {
            SystemCapability::Admin => self.is_admin,
            other => self.is_admin || self.capabilities.contains(&other),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Organization units
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationUnit {
    pub id: UnitId,
    pub organization_id: OrganizationId,
    pub name: String,
    /// Depth from the root (root = 0).
    pub level: u32,
    pub sort_order: i32,
    pub parent_id: Option<UnitId>,
}

impl Entity for OrganizationUnit {
    type Id = UnitId;

    fn id(&self) -> UnitId {
        self.id
    }
}

impl TreeNode for OrganizationUnit {
    fn parent_id(&self) -> Option<UnitId> {
        self.parent_id
    }
}

/// A role made available inside a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitRoleAssignment {
    pub unit_id: UnitId,
    pub role_id: RoleId,
}

/// A user holding a role within a specific unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserUnitAssignment {
    pub user_id: UserId,
    pub unit_id: UnitId,
    pub role_id: RoleId,
}

// ─────────────────────────────────────────────────────────────────────────────
// Modules & forms
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub icon: Option<String>,
    pub level: u32,
    pub sort_order: i32,
    pub active: bool,
    pub parent_id: Option<ModuleId>,
}

impl Module {
    /// Display order: level, then sort order, then name, then id.
    pub fn sort_key(&self) -> (u32, i32, &str, ModuleId) {
        (self.level, self.sort_order, self.name.as_str(), self.id)
    }
}

impl Entity for Module {
    type Id = ModuleId;

    fn id(&self) -> ModuleId {
        self.id
    }
}

impl TreeNode for Module {
    fn parent_id(&self) -> Option<ModuleId> {
        self.parent_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    pub id: FormId,
    pub module_id: ModuleId,
    pub name: String,
    pub sort_order: i32,
    pub published: bool,
}

impl Entity for Form {
    type Id = FormId;

    fn id(&self) -> FormId {
        self.id
    }
}
