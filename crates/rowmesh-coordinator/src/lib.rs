pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod monitor;
pub mod registry;
pub mod server;

pub use aggregator::ResultAggregator;
pub use config::CoordinatorConfig;
pub use dispatcher::{CompletionOutcome, Dispatcher, JobSnapshot};
pub use monitor::HeartbeatMonitor;
pub use registry::{ConnectionInfo, ConnectionRegistry};
pub use server::CoordinatorServer;
