use std::net::SocketAddr;

use rowmesh_core::error::TransportError;
use rowmesh_core::traits::Listener;
use tokio::net::TcpListener as TokioTcpListener;

use crate::config::TcpConfig;
use crate::transport::TcpTransport;

pub struct TcpListener {
    inner: TokioTcpListener,
    config: TcpConfig,
}

impl TcpListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::bind_with_config(addr, TcpConfig::default()).await
    }

    pub async fn bind_with_config(
        addr: SocketAddr,
        config: TcpConfig,
    ) -> Result<Self, TransportError> {
        let inner = TokioTcpListener::bind(addr).await?;
        tracing::debug!(local_addr = ?inner.local_addr().ok(), "TCP listener bound");
        Ok(Self { inner, config })
    }

    #[must_use]
    pub const fn config(&self) -> &TcpConfig {
        &self.config
    }
}

impl std::fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpListener")
            .field("local_addr", &self.inner.local_addr())
            .field("config", &self.config)
            .finish()
    }
}

impl Listener for TcpListener {
    type Transport = TcpTransport;

    async fn accept(&self) -> Result<(Self::Transport, SocketAddr), TransportError> {
        let (stream, addr) = self.inner.accept().await?;

        if self.config.nodelay {
            stream.set_nodelay(true)?;
        }

        Ok((TcpTransport::with_config(stream, self.config.clone()), addr))
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.inner.local_addr().map_err(TransportError::from)
    }
}
