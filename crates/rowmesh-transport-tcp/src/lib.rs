mod config;
mod factory;
mod listener;
mod transport;

pub use config::TcpConfig;
pub use factory::TcpTransportFactory;
pub use listener::TcpListener;
pub use transport::TcpTransport;
