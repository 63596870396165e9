pub mod comparator;
pub mod engine;
pub mod event;
pub mod fingerprint;
pub mod mapper;
pub mod scanner;

pub use comparator::{DiffEngine, SyncPlan, UploadItem};
pub use engine::{RunPhase, SyncReport, UploadEngine};
pub use event::{EventSender, ProgressEvent, SyncEvent, SyncHandle, TreeRecorder};
pub use fingerprint::{FingerprintTree, HashAlgorithm, DIR_MARKER};
pub use mapper::{PathMap, PathMapping};
pub use scanner::{DiscoveredEntry, EntryKind, TreeWalker};
