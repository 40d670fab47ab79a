//! Socket plumbing shared by both channels.
//!
//! Each channel runs one read loop per connection. The loop wakes up at least
//! every read timeout to check its stop flag, so `stop()` is honoured promptly
//! even when the peer is silent; shutting the socket down wakes it at once.

use crate::error::LinkError;
use crate::events::ChannelKind;
use crate::framing::FrameBuffer;
use std::io::{ErrorKind, Read};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// Size of the per-read scratch buffer.
const READ_CHUNK: usize = 4096;

/// Validate a user- or controller-supplied port number.
pub fn validate_port(port: i64) -> Result<u16, LinkError> {
    u16::try_from(port).map_err(|_| LinkError::InvalidPort(port))
}

/// Resolve `address:port` and connect to the first reachable address.
pub(crate) fn open_stream(
    address: &str,
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<TcpStream, LinkError> {
    let addrs: Vec<_> = (address, port)
        .to_socket_addrs()
        .map_err(|_| LinkError::Resolve(format!("{address}:{port}")))?
        .collect();
    if addrs.is_empty() {
        return Err(LinkError::Resolve(format!("{address}:{port}")));
    }

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, connect_timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(read_timeout))?;
                stream.set_nodelay(true)?;
                debug!("Connected to {}", addr);
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.map(LinkError::Io).unwrap_or(LinkError::Closed))
}

/// Best-effort shutdown of both directions.
pub(crate) fn close_stream(stream: &TcpStream) {
    let _ = stream.shutdown(Shutdown::Both);
}

/// Read until `stop` is set or the connection ends, feeding every complete
/// frame payload to `on_payload` in arrival order.
///
/// Returns `Ok(())` when stopped, `Err(LinkError::Closed)` when the peer
/// closed the socket and `Err(LinkError::Io)` on a read failure.
pub(crate) fn pump_frames<F>(
    mut stream: &TcpStream,
    stop: &AtomicBool,
    frames: &mut FrameBuffer,
    channel: ChannelKind,
    mut on_payload: F,
) -> Result<(), LinkError>
where
    F: FnMut(&str),
{
    let mut chunk = [0u8; READ_CHUNK];
    while !stop.load(Ordering::SeqCst) {
        match stream.read(&mut chunk) {
            Ok(0) => {
                // A stop request shuts the socket down, which reads as EOF.
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                return Err(LinkError::Closed);
            }
            Ok(n) => {
                trace!("{}: received {} bytes", channel, n);
                for payload in frames.push_bytes(&chunk[..n]) {
                    on_payload(payload.as_str());
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                return Err(LinkError::Io(e));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_port_bounds() {
        assert_eq!(validate_port(0).unwrap(), 0);
        assert_eq!(validate_port(65535).unwrap(), 65535);
        assert!(matches!(validate_port(-1), Err(LinkError::InvalidPort(-1))));
        assert!(matches!(validate_port(65536), Err(LinkError::InvalidPort(65536))));
    }
}
