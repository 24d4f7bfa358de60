use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use anyhow::bail;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};

/// This is an abstraction for writing messages to the byte stream connecting to the server,
///  introduced to facilitate mocking the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageSocket: Send + Sync + 'static {
    /// Writes the entire buffer, returning only after it was handed over to the OS or an
    ///  error occurred
    async fn send(&self, buf: &[u8]) -> anyhow::Result<()>;

    /// Closes the socket. A `send` that is in progress fails, and so do all later calls.
    ///
    /// This is the only way to get a writer that is stuck in a `send` to terminate.
    async fn close(&self);
}


/// The write half of a TCP connection. The read half belongs to the receive path.
pub struct TcpMessageSocket {
    write_half: Mutex<OwnedWriteHalf>,
    peer_addr: SocketAddr,
    is_closed: AtomicBool,
    closed: Notify,
}

impl TcpMessageSocket {
    pub fn new(write_half: OwnedWriteHalf) -> TcpMessageSocket {
        let peer_addr = write_half.peer_addr()
            .expect("a connected TCP stream should have a peer address");
        TcpMessageSocket {
            write_half: Mutex::new(write_half),
            peer_addr,
            is_closed: AtomicBool::new(false),
            closed: Notify::new(),
        }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<(TcpMessageSocket, OwnedReadHalf)> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!("connected to {:?}", addr);

        let (read_half, write_half) = stream.into_split();
        Ok((TcpMessageSocket::new(write_half), read_half))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

#[async_trait]
impl MessageSocket for TcpMessageSocket {
    async fn send(&self, buf: &[u8]) -> anyhow::Result<()> {
        let closed = self.closed.notified();
        tokio::pin!(closed);
        closed.as_mut().enable();

        if self.is_closed.load(Ordering::Acquire) {
            bail!("socket to {:?} is closed", self.peer_addr);
        }

        tokio::select! {
            result = async {
                self.write_half.lock().await
                    .write_all(buf).await
            } => {
                trace!("wrote {} bytes to {:?}", buf.len(), self.peer_addr);
                Ok(result?)
            }
            _ = &mut closed => {
                bail!("socket to {:?} was closed during write", self.peer_addr);
            }
        }
    }

    async fn close(&self) {
        if self.is_closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed.notify_waiters();

        debug!("closing socket to {:?}", self.peer_addr);
        if let Err(e) = self.write_half.lock().await.shutdown().await {
            debug!("error shutting down socket to {:?}: {}", self.peer_addr, e);
        }
    }
}
