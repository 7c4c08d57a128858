//! Infrastructure layer: access stores, configuration and the request-scoped
//! access service.

pub mod config;
pub mod service;
pub mod store;

pub use config::{AppConfig, DatabaseConfig};
pub use service::{AccessService, CallerAccess, PermissionChange, RoleGrantChange};
pub use store::{
    AccessStore, AssignedUser, InMemoryAccessStore, NewModule, NewUnit, PostgresAccessStore,
    UnitUpdate,
};
