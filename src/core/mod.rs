pub mod backup;
pub mod engine;
pub mod exclusion;
pub mod file_record;
pub mod planner;
pub mod scanner;

pub use backup::{backup_path, BackupManager};
pub use engine::{DeployPreview, Deployer};
pub use exclusion::ExclusionMatcher;
pub use file_record::{calculate_hash, FileRecord, FileTree};
pub use planner::{plan, summarize, PlanSummary, SyncPlan};
pub use scanner::{LocalScanner, RemoteScanner, RemoteWalk};
