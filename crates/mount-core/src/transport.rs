//! Command/response transport.
//!
//! A mount link carries strictly request-then-response ASCII exchanges with no
//! unsolicited traffic from the device. Each command is described by an
//! [`Exchange`]: the bytes to write, the shape of the expected reply and,
//! optionally, the exact reply bytes (echo protocols).
//!
//! [`Transport::exchange`] performs one write-then-read as a single future.
//! Implementations serialize exchanges, so no two commands ever interleave on
//! the wire. Reads stop at the reply terminator, at the expected length, or at
//! the deadline. A partial reply is handed back as-is, and [`Exchange::verify`]
//! rejects it, so short frames surface as `Protocol` errors and are never
//! padded or truncated. Only a reply with zero bytes is a `Timeout`.

use crate::error::{MountError, MountResult};
use crate::serial::{drain_serial_buffer, SharedPort};
use async_trait::async_trait;
use std::borrow::Cow;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

/// Upper bound for variable-length replies.
pub const MAX_REPLY_LEN: usize = 64;

/// Default read deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shape of the reply to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Fire-and-forget command.
    None,
    /// Fixed number of bytes without terminator.
    Exact(usize),
    /// Read through `terminator`. `len` is the exact frame length including the
    /// terminator, `None` for variable-length replies.
    Delimited { terminator: u8, len: Option<usize> },
}

impl Reply {
    /// Delimited reply of exactly `len` bytes.
    pub fn framed(terminator: u8, len: usize) -> Self {
        Reply::Delimited {
            terminator,
            len: Some(len),
        }
    }

    /// Delimited reply of any length.
    pub fn until(terminator: u8) -> Self {
        Reply::Delimited {
            terminator,
            len: None,
        }
    }
}

/// One command and the reply it expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub command: Vec<u8>,
    pub reply: Reply,
    /// Exact reply bytes, for echo-style acknowledgements.
    pub expected: Option<Vec<u8>>,
}

impl Exchange {
    pub fn new(command: impl Into<Vec<u8>>, reply: Reply) -> Self {
        Self {
            command: command.into(),
            reply,
            expected: None,
        }
    }

    /// Command with no reply.
    pub fn send(command: impl Into<Vec<u8>>) -> Self {
        Self::new(command, Reply::None)
    }

    /// Require the reply to equal `expected` byte for byte.
    pub fn expecting(mut self, expected: impl Into<Vec<u8>>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn command_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.command)
    }

    /// Check a reply against the declared frame.
    ///
    /// Length is checked before content: a frame of the wrong size is rejected
    /// whatever it contains.
    pub fn verify(&self, response: &[u8]) -> MountResult<()> {
        match self.reply {
            Reply::None => return Ok(()),
            Reply::Exact(len) => {
                if response.len() != len {
                    return Err(self.length_error(response, len));
                }
            }
            Reply::Delimited { terminator, len } => {
                if let Some(len) = len {
                    if response.len() != len {
                        return Err(self.length_error(response, len));
                    }
                }
                if response.last() != Some(&terminator) {
                    return Err(MountError::Protocol(format!(
                        "reply to '{}' not terminated by '{}': {:?}",
                        self.command_str(),
                        terminator as char,
                        String::from_utf8_lossy(response)
                    )));
                }
            }
        }

        if let Some(expected) = &self.expected {
            if response != expected.as_slice() {
                return Err(MountError::Protocol(format!(
                    "reply to '{}' was {:?}, expected {:?}",
                    self.command_str(),
                    String::from_utf8_lossy(response),
                    String::from_utf8_lossy(expected)
                )));
            }
        }

        Ok(())
    }

    fn length_error(&self, response: &[u8], expected: usize) -> MountError {
        MountError::Protocol(format!(
            "reply to '{}' has {} bytes, expected {}: {:?}",
            self.command_str(),
            response.len(),
            expected,
            String::from_utf8_lossy(response)
        ))
    }
}

/// Exclusive request/response channel to a mount controller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write the command and collect the reply bytes.
    ///
    /// Returns the raw bytes without validating them; see [`transact`].
    async fn exchange(&self, exchange: &Exchange) -> MountResult<Vec<u8>>;
}

/// Run one exchange and verify the reply frame.
pub async fn transact(transport: &dyn Transport, exchange: &Exchange) -> MountResult<Vec<u8>> {
    let response = transport.exchange(exchange).await?;
    exchange.verify(&response)?;
    Ok(response)
}

/// Run exchanges in order, stopping at the first failure.
///
/// Earlier exchanges stay applied on the device when a later one fails.
pub async fn transact_all(transport: &dyn Transport, exchanges: &[Exchange]) -> MountResult<()> {
    for exchange in exchanges {
        transact(transport, exchange).await?;
    }
    Ok(())
}

/// Read a reply shaped by `reply` from `reader`.
///
/// Collects bytes until the terminator, the frame length or the deadline.
/// Partial data is returned; an empty read at the deadline is a timeout.
pub async fn read_reply<R: AsyncRead + Unpin>(
    reader: &mut R,
    reply: Reply,
    timeout: Duration,
    command: &str,
) -> MountResult<Vec<u8>> {
    let (terminator, limit) = match reply {
        Reply::None => return Ok(Vec::new()),
        Reply::Exact(len) => (None, len),
        Reply::Delimited { terminator, len } => (Some(terminator), len.unwrap_or(MAX_REPLY_LEN)),
    };

    let mut buf = Vec::with_capacity(limit);
    let deadline = tokio::time::Instant::now() + timeout;

    while buf.len() < limit {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, reader.read_u8()).await {
            Ok(Ok(byte)) => {
                buf.push(byte);
                if Some(byte) == terminator {
                    break;
                }
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Ok(Err(e)) => return Err(MountError::Transport(e.to_string())),
            Err(_) => break,
        }
    }

    if buf.is_empty() {
        return Err(MountError::Timeout {
            command: command.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        });
    }

    Ok(buf)
}

/// Transport over a serial port.
pub struct SerialTransport {
    port: SharedPort,
    timeout: Duration,
    drain_ms: u64,
}

impl SerialTransport {
    pub fn new(port: SharedPort, timeout: Duration) -> Self {
        Self {
            port,
            timeout,
            drain_ms: 10,
        }
    }

    /// Quiet period used to flush stale input before each command.
    pub fn with_drain_ms(mut self, drain_ms: u64) -> Self {
        self.drain_ms = drain_ms;
        self
    }

    /// Open a tty and wrap it.
    #[cfg(feature = "serial")]
    pub async fn open(
        port_path: &str,
        baud_rate: u32,
        timeout: Duration,
        device_name: &str,
    ) -> anyhow::Result<Self> {
        let port = crate::serial::open_serial_async(port_path, baud_rate, device_name).await?;
        Ok(Self::new(crate::serial::wrap_shared(Box::new(port)), timeout))
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn exchange(&self, exchange: &Exchange) -> MountResult<Vec<u8>> {
        let command = exchange.command_str().into_owned();
        let mut guard = self.port.lock().await;

        let discarded = drain_serial_buffer(&mut *guard, self.drain_ms).await;
        if discarded > 0 {
            trace!(discarded, "Discarded stale bytes before command");
        }

        let writer = guard.get_mut();
        writer.write_all(&exchange.command).await?;
        writer.flush().await?;

        let response = read_reply(&mut *guard, exchange.reply, self.timeout, &command).await?;
        debug!(
            cmd = %command,
            res = %String::from_utf8_lossy(&response),
            "Serial exchange"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::wrap_shared;

    #[test]
    fn verify_rejects_short_frame() {
        let ex = Exchange::new(":GR#", Reply::framed(b'#', 9));
        assert!(ex.verify(b"08:00:00#").is_ok());
        let err = ex.verify(b"08:0#").unwrap_err();
        assert!(matches!(err, MountError::Protocol(_)));
        // Right length, missing terminator
        assert!(ex.verify(b"08:00:000").is_err());
    }

    #[test]
    fn verify_checks_echo() {
        let ex = Exchange::new("ESSd01!", Reply::framed(b'!', 7)).expecting("ESGd01!");
        assert!(ex.verify(b"ESGd01!").is_ok());
        assert!(ex.verify(b"ESGd00!").is_err());
    }

    #[test]
    fn verify_exact_ack() {
        let ex = Exchange::new(":Sr 08:00:00#", Reply::Exact(1)).expecting("1");
        assert!(ex.verify(b"1").is_ok());
        assert!(ex.verify(b"0").is_err());
        assert!(ex.verify(b"").is_err());
        assert!(Exchange::send(":Q#").verify(b"").is_ok());
    }

    #[tokio::test]
    async fn serial_exchange_round_trip() {
        let (mut device, host) = tokio::io::duplex(64);
        let transport = SerialTransport::new(wrap_shared(Box::new(host)), Duration::from_millis(200));

        let device_task = tokio::spawn(async move {
            let mut cmd = [0u8; 4];
            device.read_exact(&mut cmd).await.unwrap();
            assert_eq!(&cmd, b":GR#");
            device.write_all(b"08:00:00#").await.unwrap();
            device
        });

        let ex = Exchange::new(":GR#", Reply::framed(b'#', 9));
        let reply = transact(&transport, &ex).await.unwrap();
        assert_eq!(reply, b"08:00:00#");
        device_task.await.unwrap();
    }

    #[tokio::test]
    async fn partial_reply_becomes_protocol_error() {
        let (mut device, host) = tokio::io::duplex(64);
        let transport = SerialTransport::new(wrap_shared(Box::new(host)), Duration::from_millis(100));

        let device_task = tokio::spawn(async move {
            let mut cmd = [0u8; 4];
            device.read_exact(&mut cmd).await.unwrap();
            device.write_all(b"08:00").await.unwrap();
            device
        });

        let ex = Exchange::new(":GR#", Reply::framed(b'#', 9));
        let raw = transport.exchange(&ex).await.unwrap();
        assert_eq!(raw, b"08:00");
        assert!(matches!(ex.verify(&raw), Err(MountError::Protocol(_))));
        device_task.await.unwrap();
    }

    #[tokio::test]
    async fn silent_device_times_out() {
        let (device, host) = tokio::io::duplex(64);
        let transport = SerialTransport::new(wrap_shared(Box::new(host)), Duration::from_millis(50));

        let ex = Exchange::new("ESGv!", Reply::until(b'!'));
        let err = transport.exchange(&ex).await.unwrap_err();
        assert!(matches!(err, MountError::Timeout { .. }));
        drop(device);
    }

    #[tokio::test]
    async fn stale_bytes_are_drained_before_command() {
        let (mut device, host) = tokio::io::duplex(64);
        let transport = SerialTransport::new(wrap_shared(Box::new(host)), Duration::from_millis(200))
            .with_drain_ms(20);

        device.write_all(b"garbage#").await.unwrap();

        let device_task = tokio::spawn(async move {
            let mut cmd = [0u8; 4];
            device.read_exact(&mut cmd).await.unwrap();
            device.write_all(b"1").await.unwrap();
            device
        });

        let ex = Exchange::new(":Q#\0", Reply::Exact(1)).expecting("1");
        let reply = transact(&transport, &ex).await.unwrap();
        assert_eq!(reply, b"1");
        device_task.await.unwrap();
    }
}
