//! Minimal SOCKS4a client: one CONNECT per stream.

use bytes::{BufMut, Bytes, BytesMut};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Result, TrafficError};

const SOCKS_VERSION: u8 = 4;
const CMD_CONNECT: u8 = 1;
/// Reply code for "request granted".
pub const REQUEST_GRANTED: u8 = 0x5a;
/// Length of a SOCKS4 reply.
pub const REPLY_LEN: usize = 8;

/// Encode a CONNECT request. IPv4 literals are sent as addresses; anything
/// else goes through the 4a hostname extension with the 0.0.0.1 marker.
pub fn connect_request(host: &str, port: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(9 + host.len() + 1);
    buf.put_u8(SOCKS_VERSION);
    buf.put_u8(CMD_CONNECT);
    buf.put_u16(port);
    match host.parse::<Ipv4Addr>() {
        Ok(addr) => {
            buf.put_slice(&addr.octets());
            buf.put_u8(0);
        }
        Err(_) => {
            buf.put_slice(&[0, 0, 0, 1]);
            buf.put_u8(0);
            buf.put_slice(host.as_bytes());
            buf.put_u8(0);
        }
    }
    buf.freeze()
}

/// Open a stream to `host:port` through the proxy at `proxy`.
pub async fn connect(stream: &str, proxy: SocketAddr, host: &str, port: u16) -> Result<TcpStream> {
    let mut tcp = TcpStream::connect(proxy)
        .await
        .map_err(|source| TrafficError::ProxyConnect {
            stream: stream.to_string(),
            proxy,
            source,
        })?;
    let transfer = |source| TrafficError::Transfer {
        stream: stream.to_string(),
        received: 0,
        source,
    };

    debug!(%stream, %proxy, %host, port, "socks 4a request");
    tcp.write_all(&connect_request(host, port)).await.map_err(transfer)?;
    let mut reply = [0u8; REPLY_LEN];
    tcp.read_exact(&mut reply).await.map_err(transfer)?;
    if reply[1] != REQUEST_GRANTED {
        return Err(TrafficError::ProxyRefused {
            stream: stream.to_string(),
            code: reply[1],
        });
    }
    debug!(%stream, "proxy handshake successful");
    Ok(tcp)
}
