pub mod deploy;
pub mod diagnose;
pub mod status;

pub use deploy::run_request;
pub use diagnose::{analyze_logs, Issue, Severity};
pub use status::{deployment_status, DeploymentStatus, SiteState};
pub use test::{check_status, test_connection, ConnectionTestResult, ServerStatus};
