use std::net::SocketAddr;

use rowmesh_core::error::TransportError;
use rowmesh_core::traits::TransportFactory;
use tokio::net::TcpStream;

use crate::config::TcpConfig;
use crate::listener::TcpListener;
use crate::transport::TcpTransport;

#[derive(Debug, Clone, Default)]
pub struct TcpTransportFactory {
    config: TcpConfig,
}

impl TcpTransportFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_config(config: TcpConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &TcpConfig {
        &self.config
    }
}

impl TransportFactory for TcpTransportFactory {
    type Transport = TcpTransport;
    type Listener = TcpListener;

    async fn connect(&self, addr: SocketAddr) -> Result<Self::Transport, TransportError> {
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "connect".to_string(),
                duration: self.config.connect_timeout,
            })?
            .map_err(|e| TransportError::ConnectionFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;

        if self.config.nodelay {
            stream.set_nodelay(true)?;
        }

        Ok(TcpTransport::with_config(stream, self.config.clone()))
    }

    async fn listen(&self, addr: SocketAddr) -> Result<Self::Listener, TransportError> {
        TcpListener::bind_with_config(addr, self.config.clone()).await
    }
}
