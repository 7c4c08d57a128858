//! `formgate-core`: identifiers, the access error taxonomy and entity traits
//! shared by every other crate.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;

pub use entity::{Entity, TreeNode};
pub use error::{AccessError, AccessResult, ErrorKind};
pub use id::{FormId, GrantId, ModuleId, OrganizationId, RoleId, UnitId, UserId};
