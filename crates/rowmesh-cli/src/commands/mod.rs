pub mod config;
pub mod coordinator;
pub mod worker;

pub use config::run_config;
pub use coordinator::run_coordinator;
pub use worker::run_worker;
