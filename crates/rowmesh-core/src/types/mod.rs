pub mod frame;
pub mod id;
pub mod job;
pub mod payload;

pub use frame::*;
pub use id::*;
pub use job::*;
pub use payload::*;
