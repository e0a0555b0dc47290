pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{
    CoordinatorConfigFile, LoggingConfigFile, RowmeshConfig, TransportConfigFile,
    WorkerConfigFile,
};

pub use error::{CodecError, ConfigError, CoordError, ProtocolError, TransportError};

pub use traits::{Codec, FramedTransport, Listener, TransportFactory};

pub use types::{
    ConnectionId, Frame, JobDescriptor, JobId, JobResult, Matrix, MessageType, Operation,
    PROTOCOL_MAGIC, PROTOCOL_VERSION, RegisterWorker, Row, TaskAssignment, TaskCompletion,
    TaskId, WorkerAck,
};
