//! `mount-core`
//!
//! Core types, coordinate transforms, transport and state machine for
//! rust-mount telescope mount control.
//!
//! Dialect crates (`mount-driver-astrophysics`, `mount-driver-pmc8`) implement
//! [`protocol::MountProtocol`] on top of a [`transport::Transport`]; the
//! [`state::Mount`] state machine drives any of them.
//!
//! ## Layers
//!
//! - **Transport**: exclusive request/response exchanges over a serial link
//!   ([`transport`], [`serial`]) or a simulated device ([`sim`])
//! - **Codec**: per-dialect frame building and parsing ([`protocol::Codec`])
//! - **Coordinates**: equatorial, horizontal and motor-count transforms ([`coords`])
//! - **Tracker**: polling and settle detection ([`tracker`])
//! - **State machine**: intents and transitions ([`state`]), firmware quirks ([`quirk`])
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut mount = Mount::new(protocol, store, Arc::new(SystemClock))?;
//! mount.connect().await?;
//! mount.update_location(site).await?;
//! mount.update_time(Utc::now(), 0.0).await?;
//! mount.goto(EquatorialPosition::new(5.5, -5.4)).await?;
//! loop {
//!     let status = mount.refresh().await?;
//!     if matches!(status.state, MountState::Tracking { .. }) {
//!         break;
//!     }
//! }
//! ```

pub mod clock;
pub mod coords;
pub mod driver;
pub mod error;
pub mod protocol;
pub mod quirk;
pub mod serial;
pub mod settings;
pub mod sim;
pub mod state;
pub mod tracker;
pub mod transport;
pub mod types;

pub use clock::{Clock, FixedClock, SkyContext, SystemClock};
pub use driver::{Capability, DriverRegistry, MountDriverFactory};
pub use error::{MountError, MountResult};
pub use protocol::{AxisReading, Codec, MountProtocol, ParkMotion};
pub use settings::{MemorySettingsStore, MountSettings, SettingsStore, TomlSettingsStore};
pub use state::{Mount, MountState, StatusReport};
pub use tracker::{PositionSample, PositionTracker, SettleFrame};
pub use transport::{Exchange, Reply, SerialTransport, Transport};
pub use types::*;
