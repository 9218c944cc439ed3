//! Serial port plumbing shared by the mount driver crates.
//!
//! - [`SerialPortIO`]: anything that reads and writes bytes asynchronously
//! - [`SharedPort`]: buffered port behind an async mutex, held for one exchange at a time
//! - [`open_serial_async`]: open a tty at 8N1 without blocking the runtime (`serial` feature)
//! - [`drain_serial_buffer`]: discard stale input before a command is written
//!
//! Tests substitute `tokio::io::duplex` for the hardware port.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;

/// Async byte stream usable as a mount serial link.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Serial port shared between the driver and its transport.
///
/// The mutex is held for a complete write-then-read exchange, so commands on
/// the same link never interleave.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Wrap a port for shared use.
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

/// Open a serial port on a blocking thread with 8N1, no flow control.
///
/// `device_name` only appears in the error context.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!(
                "Failed to open {} serial port: {}",
                device_name_owned, port_path_owned
            ))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// Read and discard whatever is already waiting on the port.
///
/// Stops at the first quiet period of `timeout_ms`, at EOF, or on error.
/// Returns the number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    total_discarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn shared_port_reads_device_bytes() {
        let (mut device, host) = tokio::io::duplex(64);
        let port = wrap_shared(Box::new(host));

        device.write_all(b"12:34:56#").await.unwrap();

        let mut guard = port.lock().await;
        let mut buf = [0u8; 9];
        guard.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"12:34:56#");
    }

    #[tokio::test]
    async fn drain_discards_stale_reply() {
        let (mut device, mut host) = tokio::io::duplex(64);

        device.write_all(b"1Object below horizon#").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let discarded = drain_serial_buffer(&mut host, 50).await;
        assert_eq!(discarded, 22);

        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_millis(10), host.read(&mut buf)).await;
        assert!(read.is_err(), "buffer should be empty after drain");
    }
}
