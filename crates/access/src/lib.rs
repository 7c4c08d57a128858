//! `formgate-access`: effective access resolution over one organization.
//!
//! Pure and synchronous: callers load an [`AccessSnapshot`] from a store and
//! hand it in together with the caller and the current time.

pub mod actions;
pub mod grant;
pub mod hierarchy;
pub mod model;
pub mod replace;
pub mod resolver;
pub mod session;
pub mod snapshot;
pub mod visibility;

#[cfg(test)]
mod fixtures;

pub use actions::{Action, ActionSet};
pub use grant::{
    ActionsUpdate, Grant, GrantKey, GrantRequest, GrantWrite, Subject, Target, TargetGrant,
};
pub use hierarchy::{Hierarchy, MAX_HIERARCHY_DEPTH};
pub use model::{
    Form, Module, Organization, OrganizationUnit, Role, SystemCapability, UnitRoleAssignment,
    User, UserStatus, UserUnitAssignment,
};
pub use replace::{DesiredChild, ReplacementPlan, plan_child_replacement};
pub use resolver::{
    EffectiveAccess, ResolverOptions, SystemSummary, can_administer_unit, is_org_admin, resolve,
};
pub use session::{SessionClaims, SessionError, SessionIdentity, SessionValidator, validate_claims};
pub use snapshot::{AccessSnapshot, SnapshotIndex};
pub use visibility::{ModuleNode, ModuleTree, TreeEntry};
