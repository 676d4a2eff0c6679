//! The local endpoint traffic is sent to: echoes every byte back.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{Result, TrafficError};

/// Port the exit streams target; exit policies in the templates allow it.
pub const LISTEN_PORT: u16 = 4747;

const BACKLOG: i32 = 128;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A running echo listener. Dropping it stops accepting.
pub struct EchoListener {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl EchoListener {
    /// Bind with address reuse so back-to-back rounds can rebind at once.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = listen(addr).map_err(|source| TrafficError::Listen { addr, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| TrafficError::Listen { addr, source })?;
        info!(%addr, "echo listener up");
        let task = tokio::spawn(accept_loop(listener));
        Ok(Self { addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for EchoListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn listen(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    socket.set_nonblocking(true)?;
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

async fn accept_loop(listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "echo connection");
                tokio::spawn(echo(stream, peer));
            }
            Err(e) => {
                warn!(error = %e, "echo accept failed");
                sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn echo(mut stream: TcpStream, peer: SocketAddr) {
    let (mut rd, mut wr) = stream.split();
    match tokio::io::copy(&mut rd, &mut wr).await {
        Ok(n) => debug!(%peer, bytes = n, "echo connection closed"),
        Err(e) => debug!(%peer, error = %e, "echo connection failed"),
    }
}
