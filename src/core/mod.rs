pub mod owner;
pub mod registry;
pub mod snapshot;

pub use owner::{OwnerCommand, RegistryOwner};
pub use registry::{
    ProbeOutcome, Registry, RegistryError, RouteEntry, ServiceRegistration, TargetMetric,
    TargetStatus,
};
pub use snapshot::{RegistrySnapshot, SnapshotEntry};
