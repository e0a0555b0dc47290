pub mod client;
pub mod compute;
pub mod config;
pub mod error;
pub mod node;

pub use client::CoordinatorClient;
pub use compute::multiply_row;
pub use config::WorkerConfig;
pub use error::WorkerError;
pub use node::{WorkerNode, WorkerStats};
