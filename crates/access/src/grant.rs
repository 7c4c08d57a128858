//! Grant records: a subject (role or user) authorized for actions on a target
//! (module or form).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use formgate_core::{AccessError, AccessResult, FormId, GrantId, ModuleId, OrganizationId, RoleId, UserId};

use crate::{Action, ActionSet};

/// Who a grant is issued to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Subject {
    Role(RoleId),
    User(UserId),
}

/// What a grant applies to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Target {
    Module(ModuleId),
    Form(FormId),
}

impl Target {
    /// Build a target from the optional id pair used by request bodies and
    /// storage rows. Exactly one side must be set.
    pub fn from_parts(module_id: Option<ModuleId>, form_id: Option<FormId>) -> AccessResult<Self> {
        match (module_id, form_id) {
            (Some(m), None) => Ok(Target::Module(m)),
            (None, Some(f)) => Ok(Target::Form(f)),
            (Some(_), Some(_)) => Err(AccessError::invalid_argument(
                "grant must target a module or a form, not both",
            )),
            (None, None) => Err(AccessError::invalid_argument(
                "grant must target a module or a form",
            )),
        }
    }

    pub fn module_id(&self) -> Option<ModuleId> {
        match self {
            Target::Module(m) => Some(*m),
            Target::Form(_) => None,
        }
    }

    pub fn form_id(&self) -> Option<FormId> {
        match self {
            Target::Form(f) => Some(*f),
            Target::Module(_) => None,
        }
    }
}

/// Natural key of a grant. At most one stored grant exists per key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GrantKey {
    pub subject: Subject,
    pub target: Target,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: GrantId,
    pub organization_id: OrganizationId,
    pub key: GrantKey,
    /// `false` records an explicit non-grant; it contributes nothing.
    pub granted: bool,
    pub actions: ActionSet,
    pub reason: Option<String>,
    pub granted_by: UserId,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Grant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether the grant contributes anything at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.granted && !self.is_expired(now)
    }

    pub fn target_grant(&self) -> TargetGrant {
        TargetGrant {
            target: self.key.target,
            actions: self.actions,
        }
    }
}

/// A (target, actions) pair as returned by the grant readers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGrant {
    pub target: Target,
    pub actions: ActionSet,
}

/// Upsert request for one grant key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRequest {
    pub key: GrantKey,
    pub granted: bool,
    pub actions: ActionSet,
    pub reason: Option<String>,
    pub granted_by: UserId,
    pub expires_at: Option<DateTime<Utc>>,
}

impl GrantRequest {
    /// Materialize the stored row. An existing row keeps its id; every other
    /// field is replaced by the request (no merge with the previous bundle).
    pub fn into_grant(
        self,
        organization_id: OrganizationId,
        existing: Option<&Grant>,
        now: DateTime<Utc>,
    ) -> Grant {
        Grant {
            id: existing.map(|g| g.id).unwrap_or_default(),
            organization_id,
            key: self.key,
            granted: self.granted,
            actions: self.actions,
            reason: self.reason,
            granted_by: self.granted_by,
            granted_at: now,
            expires_at: self.expires_at,
        }
    }
}

/// How one write in a grant batch derives the stored action bundle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ActionsUpdate {
    /// Store exactly this bundle.
    Replace { actions: ActionSet },
    /// Set one action on the stored bundle and keep the others.
    Set { action: Action, on: bool },
}

/// One entry of an all-or-nothing grant batch.
///
/// Stores resolve `actions` against the row they hold for `key` inside the
/// batch's transaction, so earlier entries of the same batch are visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantWrite {
    pub key: GrantKey,
    pub granted: bool,
    pub actions: ActionsUpdate,
    pub reason: Option<String>,
    pub granted_by: UserId,
    pub expires_at: Option<DateTime<Utc>>,
}

impl GrantWrite {
    pub fn into_request(self, existing: Option<&Grant>) -> GrantRequest {
        let actions = match self.actions {
            ActionsUpdate::Replace { actions } => actions,
            ActionsUpdate::Set { action, on } => {
                let mut actions = existing.map(|g| g.actions).unwrap_or_default();
                actions.set(action, on);
                actions
            }
        };
        GrantRequest {
            key: self.key,
            granted: self.granted,
            actions,
            reason: self.reason,
            granted_by: self.granted_by,
            expires_at: self.expires_at,
        }
    }
}

impl From<GrantRequest> for GrantWrite {
    fn from(request: GrantRequest) -> Self {
        Self {
            key: request.key,
            granted: request.granted,
            actions: ActionsUpdate::Replace {
                actions: request.actions,
            },
            reason: request.reason,
            granted_by: request.granted_by,
            expires_at: request.expires_at,
        }
    }
}
