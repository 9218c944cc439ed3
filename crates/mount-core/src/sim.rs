//! Protocol-level simulation.
//!
//! A [`SimulatedDevice`] answers raw command bytes the way a controller would.
//! [`SimTransport`] puts one behind the [`Transport`] trait, records every
//! command it sees and can inject faults, so drivers run unchanged against it.

use crate::error::{MountError, MountResult};
use crate::transport::{Exchange, Reply, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// Device model answering raw commands.
pub trait SimulatedDevice: Send + 'static {
    /// Apply `command` and return the reply bytes (empty for fire-and-forget commands).
    fn respond(&mut self, command: &[u8]) -> MountResult<Vec<u8>>;
}

/// Fault returned instead of the device reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// No bytes arrive.
    Timeout,
    /// These bytes arrive instead; the device does not see the command.
    Reply(Vec<u8>),
    /// The channel fails.
    Transport(String),
}

struct PendingFault {
    prefix: Vec<u8>,
    fault: Fault,
}

/// Transport backed by a simulated device.
///
/// Clones share the device, the command log and the fault queue.
pub struct SimTransport<D: SimulatedDevice> {
    device: Arc<Mutex<D>>,
    log: Arc<Mutex<Vec<String>>>,
    faults: Arc<Mutex<Vec<PendingFault>>>,
}

impl<D: SimulatedDevice> Clone for SimTransport<D> {
    fn clone(&self) -> Self {
        Self {
            device: Arc::clone(&self.device),
            log: Arc::clone(&self.log),
            faults: Arc::clone(&self.faults),
        }
    }
}

impl<D: SimulatedDevice> SimTransport<D> {
    pub fn new(device: D) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
            log: Arc::new(Mutex::new(Vec::new())),
            faults: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail the next command, whatever it is.
    pub fn inject(&self, fault: Fault) {
        self.inject_on("", fault);
    }

    /// Fail the next command starting with `prefix`.
    pub fn inject_on(&self, prefix: &str, fault: Fault) {
        self.faults.lock().push(PendingFault {
            prefix: prefix.as_bytes().to_vec(),
            fault,
        });
    }

    /// Commands seen so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    /// Direct access to the device model.
    pub fn device(&self) -> parking_lot::MutexGuard<'_, D> {
        self.device.lock()
    }

    fn take_fault(&self, command: &[u8]) -> Option<Fault> {
        let mut faults = self.faults.lock();
        let idx = faults.iter().position(|f| command.starts_with(&f.prefix))?;
        Some(faults.remove(idx).fault)
    }
}

#[async_trait]
impl<D: SimulatedDevice> Transport for SimTransport<D> {
    async fn exchange(&self, exchange: &Exchange) -> MountResult<Vec<u8>> {
        let command = exchange.command_str().into_owned();
        self.log.lock().push(command.clone());

        if let Some(fault) = self.take_fault(&exchange.command) {
            trace!(cmd = %command, ?fault, "Injected fault");
            return match fault {
                Fault::Timeout => Err(MountError::Timeout {
                    command,
                    timeout_ms: 0,
                }),
                Fault::Reply(bytes) => Ok(bytes),
                Fault::Transport(msg) => Err(MountError::Transport(msg)),
            };
        }

        let response = self.device.lock().respond(&exchange.command)?;
        if exchange.reply != Reply::None && response.is_empty() {
            return Err(MountError::Timeout {
                command,
                timeout_ms: 0,
            });
        }
        trace!(
            cmd = %command,
            res = %String::from_utf8_lossy(&response),
            "Simulated exchange"
        );
        Ok(response)
    }
}
