pub mod lock;
pub mod probe;
pub mod snapshot;

pub use lock::file::FileLockManager;
pub use lock::{LockGuard, LockManager};
pub use probe::{HostProbe, SystemProbe};
pub use snapshot::{
    FsSnapshotter, PowerPlanSnapshotter, RegistrySnapshotter, ServiceSnapshotter,
    SnapshotRegistry, Snapshotter,
};
