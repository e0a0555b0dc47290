use std::net::SocketAddr;

use crate::error::TransportError;

/// A bidirectional channel that moves whole frames.
pub trait FramedTransport: Send + Sync {
    fn send_frame(
        &self,
        frame: &[u8],
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;
    fn recv_frame(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, TransportError>> + Send;
}

pub trait Listener: Send + Sync {
    type Transport: FramedTransport + Send;
    fn accept(
        &self,
    ) -> impl std::future::Future<Output = Result<(Self::Transport, SocketAddr), TransportError>> + Send;
    fn local_addr(&self) -> Result<SocketAddr, TransportError>;
}

pub trait TransportFactory: Send + Sync {
    type Transport: FramedTransport + Send;
    type Listener: Listener<Transport = Self::Transport> + Send;
    fn connect(
        &self,
        addr: SocketAddr,
    ) -> impl std::future::Future<Output = Result<Self::Transport, TransportError>> + Send;
    fn listen(
        &self,
        addr: SocketAddr,
    ) -> impl std::future::Future<Output = Result<Self::Listener, TransportError>> + Send;
}
