// Enforcement: the tier model, admin cache, lock service, the engine that
// orchestrates the modules, and the staff command surface.

pub mod admin_directory;
pub mod commands;
pub mod engine;
pub mod locks;
pub mod stores;
pub mod tier;

pub use admin_directory::{AdminDirectory, ReloadError};
pub use commands::{ApprovalChange, CommandError, CommandService};
pub use engine::EnforcementEngine;
pub use locks::{LockChange, LockError, LockService, LockTag};
pub use stores::{
    ApprovalStore, ConfigStore, LockStore, Module, ModuleConfig, StoreError, ViolationLedger,
};
pub use tier::{
    should_enforce, EnforcementMode, PrivilegeResolver, StaticAuthority, Tier,
};
