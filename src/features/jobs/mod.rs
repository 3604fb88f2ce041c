pub mod driver;
pub mod ledger;
pub mod models;
pub mod queue;
pub mod routes;
pub mod runner;

pub use driver::{JobDriver, JobDriverRegistry, ProgressReporter};
pub use ledger::ResourceLedger;
pub use models::{ClusterMetricSample, Job, JobEvent};
pub use queue::{JobError, JobQueue};
pub use routes::job_routes;
pub use runner::JobRunner;
