pub mod audit;
pub mod bootstrap;
pub mod service;
pub mod telemetry;

pub use audit::TracingAuditSink;
pub use bootstrap::{bootstrap, bootstrap_with_config, Application, BootstrapError};
pub use service::ApprovalService;
pub use telemetry::init_logging;
