use rowmesh_core::error::TransportError;
use rowmesh_core::traits::FramedTransport;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use crate::config::TcpConfig;

const FRAME_LENGTH_SIZE: usize = 4;

/// A TCP stream carrying frames behind a 4-byte big-endian length prefix.
pub struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    config: TcpConfig,
}

impl TcpTransport {
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        Self::with_config(stream, TcpConfig::default())
    }

    #[must_use]
    pub fn with_config(stream: TcpStream, config: TcpConfig) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &TcpConfig {
        &self.config
    }

    async fn read_frame(&self, reader: &mut OwnedReadHalf) -> Result<Vec<u8>, TransportError> {
        let mut len_bytes = [0u8; FRAME_LENGTH_SIZE];
        reader.read_exact(&mut len_bytes).await.map_err(read_error)?;
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len > self.config.max_message_size {
            return Err(TransportError::RecvFailed(format!(
                "Frame of {len} bytes exceeds limit {}",
                self.config.max_message_size
            )));
        }

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await.map_err(read_error)?;
        Ok(buf)
    }
}

fn read_error(e: std::io::Error) -> TransportError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::Closed
    } else {
        TransportError::RecvFailed(e.to_string())
    }
}

impl FramedTransport for TcpTransport {
    async fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        let len = frame.len();
        if len > self.config.max_message_size {
            return Err(TransportError::SendFailed(format!(
                "Frame of {len} bytes exceeds limit {}",
                self.config.max_message_size
            )));
        }
        let len_u32 = u32::try_from(len)
            .map_err(|_| TransportError::SendFailed(format!("Frame of {len} bytes exceeds u32::MAX")))?;

        let mut writer = self.writer.lock().await;
        let write_future = async {
            writer.write_all(&len_u32.to_be_bytes()).await?;
            writer.write_all(frame).await?;
            writer.flush().await
        };

        match self.config.write_timeout {
            Some(timeout) => tokio::time::timeout(timeout, write_future)
                .await
                .map_err(|_| TransportError::Timeout {
                    operation: "send_frame".to_string(),
                    duration: timeout,
                })?
                .map_err(|e| TransportError::SendFailed(e.to_string())),
            None => write_future
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string())),
        }
    }

    async fn recv_frame(&self) -> Result<Vec<u8>, TransportError> {
        let mut reader = self.reader.lock().await;

        match self.config.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.read_frame(&mut reader))
                .await
                .map_err(|_| TransportError::Timeout {
                    operation: "recv_frame".to_string(),
                    duration: timeout,
                })?,
            None => self.read_frame(&mut reader).await,
        }
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
