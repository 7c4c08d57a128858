//! Action bundle carried by every grant.

use core::ops::{BitOr, BitOrAssign};
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use formgate_core::AccessError;

/// A single action a grant can permit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
    Manage,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::View,
        Action::Create,
        Action::Edit,
        Action::Delete,
        Action::Manage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Manage => "manage",
        }
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" | "read" => Ok(Action::View),
            "create" | "add" => Ok(Action::Create),
            "edit" | "update" => Ok(Action::Edit),
            "delete" => Ok(Action::Delete),
            "manage" => Ok(Action::Manage),
            other => Err(AccessError::invalid_argument(format!(
                "unknown action '{other}' (expected view, create, edit, delete or manage)"
            ))),
        }
    }
}

/// Fixed set of actions; merging two bundles is a field-wise OR.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionSet {
    pub view: bool,
    pub create: bool,
    pub edit: bool,
    pub delete: bool,
    pub manage: bool,
}

impl ActionSet {
    pub const fn none() -> Self {
        Self {
            view: false,
            create: false,
            edit: false,
            delete: false,
            manage: false,
        }
    }

    pub const fn all() -> Self {
        Self {
            view: true,
            create: true,
            edit: true,
            delete: true,
            manage: true,
        }
    }

    pub const fn view_only() -> Self {
        Self {
            view: true,
            ..Self::none()
        }
    }

    pub fn get(&self, action: Action) -> bool {
        match action {
            Action::View => self.view,
            Action::Create => self.create,
            Action::Edit => self.edit,
            Action::Delete => self.delete,
            Action::Manage => self.manage,
        }
    }

    pub fn set(&mut self, action: Action, allowed: bool) {
        let slot = match action {
            Action::View => &mut self.view,
            Action::Create => &mut self.create,
            Action::Edit => &mut self.edit,
            Action::Delete => &mut self.delete,
            Action::Manage => &mut self.manage,
        };
        *slot = allowed;
    }

    pub fn with(mut self, action: Action) -> Self {
        self.set(action, true);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::none()
    }

    pub fn is_all(&self) -> bool {
        *self == Self::all()
    }

    /// Allowed actions in declaration order.
    pub fn allowed(&self) -> impl Iterator<Item = Action> + '_ {
        Action::ALL.into_iter().filter(|a| self.get(*a))
    }
}

impl BitOr for ActionSet {
    type Output = ActionSet;

    fn bitor(self, rhs: Self) -> Self::Output {
        ActionSet {
            view: self.view || rhs.view,
            create: self.create || rhs.create,
            edit: self.edit || rhs.edit,
            delete: self.delete || rhs.delete,
            manage: self.manage || rhs.manage,
        }
    }
}

impl BitOrAssign for ActionSet {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        iter.into_iter().fold(ActionSet::none(), ActionSet::with)
    }
}
