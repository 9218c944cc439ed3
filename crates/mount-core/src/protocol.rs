//! Protocol abstractions.
//!
//! Two layers separate wire format from behaviour:
//!
//! - [`Codec`]: stateless frame builder and parser for one dialect. Every
//!   encode returns an [`Exchange`] that carries the exact reply shape, and every
//!   decode rejects a reply of the wrong length.
//! - [`MountProtocol`]: the capability interface the state machine drives. A
//!   dialect driver composes codec frames into device operations (goto is a
//!   position set on both axes followed by a motion start, for example).
//!
//! Operations a dialect cannot express return [`MountError::Unsupported`];
//! optional telemetry returns `None`.

use crate::clock::SkyContext;
use crate::driver::Capability;
use crate::error::{MountError, MountResult};
use crate::tracker::{SettleFrame, SettlePoint};
use crate::transport::Exchange;
use crate::types::{
    Axis, Direction, EquatorialPosition, FirmwareInfo, HorizontalPosition, InitStatus,
    MotorCount, ObserverLocation, PierSide, RateKind, SyncMode, TrackMode, TrackRate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Frame builder and parser for one device dialect.
pub trait Codec {
    /// Decoded axis position (hours/degrees or motor counts).
    type AxisValue;
    /// Decoded status reply.
    type Status;

    /// Reply terminator of the dialect.
    fn terminator(&self) -> u8;

    fn encode_set_position(&self, axis: Axis, value: Self::AxisValue) -> Exchange;

    fn encode_get_position(&self, axis: Axis) -> Exchange;

    /// Tracking rate for one axis, arcseconds per second.
    ///
    /// May expand to several frames or to none when the axis has no rate control.
    fn encode_set_rate(&self, axis: Axis, rate: f64) -> Vec<Exchange>;

    fn encode_motion_start(&self, direction: Direction, rate_index: usize) -> Vec<Exchange>;

    fn encode_motion_stop(&self, direction: Direction) -> Vec<Exchange>;

    fn decode_position(&self, axis: Axis, response: &[u8]) -> MountResult<Self::AxisValue>;

    fn encode_get_status(&self, axis: Axis) -> Exchange;

    fn decode_status(&self, axis: Axis, response: &[u8]) -> MountResult<Self::Status>;
}

/// One position read from the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisReading {
    pub equatorial: EquatorialPosition,
    /// Pier side, when the read itself implies it.
    pub pier_side: Option<PierSide>,
    /// Raw encoder positions for motor-count controllers.
    pub counts: Option<MotorCount>,
}

impl AxisReading {
    pub fn new(equatorial: EquatorialPosition) -> Self {
        Self {
            equatorial,
            pier_side: None,
            counts: None,
        }
    }
}

/// How the device executes a park.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParkMotion {
    /// Slewing in the horizontal frame; settle on horizontal readings.
    Horizontal(HorizontalPosition),
    /// Slewing to an equatorial position derived from the park pose.
    Equatorial(EquatorialPosition),
    /// Slewing to fixed encoder positions.
    Home,
}

impl ParkMotion {
    /// Frame the settle check compares while parking.
    pub fn settle_frame(&self) -> SettleFrame {
        match self {
            ParkMotion::Horizontal(_) => SettleFrame::Horizontal,
            ParkMotion::Equatorial(_) => SettleFrame::Equatorial,
            ParkMotion::Home => SettleFrame::Counts,
        }
    }

    /// Expected reading once the park completes.
    pub fn settle_target(&self) -> SettlePoint {
        match self {
            ParkMotion::Horizontal(hz) => (*hz).into(),
            ParkMotion::Equatorial(eq) => (*eq).into(),
            ParkMotion::Home => MotorCount::default().into(),
        }
    }
}

/// Device operations the mount state machine drives.
///
/// Implementations own their transport and serialize exchanges on it.
#[async_trait]
pub trait MountProtocol: Send + Sync {
    /// Short dialect name for logs and errors.
    fn dialect(&self) -> &'static str;

    fn capabilities(&self) -> &'static [Capability];

    fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Identify the controller; runs once per connection.
    async fn handshake(&self) -> MountResult<FirmwareInfo>;

    /// Initialized and parked status at first connect.
    async fn init_status(&self, sky: &SkyContext) -> MountResult<InitStatus>;

    /// One-time initialization of an uninitialized controller.
    async fn home(&self) -> MountResult<()> {
        Err(self.unsupported("home"))
    }

    async fn read_position(&self, sky: &SkyContext) -> MountResult<AxisReading>;

    /// Horizontal position when the device reports one.
    async fn read_horizontal(&self) -> MountResult<Option<HorizontalPosition>> {
        Ok(None)
    }

    async fn read_pier_side(&self, sky: &SkyContext) -> MountResult<PierSide>;

    /// Whether the device reports an active slew; `None` when it cannot tell.
    async fn is_slewing(&self) -> MountResult<Option<bool>> {
        Ok(None)
    }

    /// Frame compared between polls to detect the end of a goto.
    fn slew_settle_frame(&self) -> SettleFrame {
        SettleFrame::Equatorial
    }

    /// Frame compared between polls while `motion` is under way.
    fn park_settle_frame(&self, motion: &ParkMotion) -> SettleFrame {
        motion.settle_frame()
    }

    async fn goto(
        &self,
        target: &EquatorialPosition,
        pier: PierSide,
        sky: &SkyContext,
    ) -> MountResult<()>;

    async fn sync(
        &self,
        target: &EquatorialPosition,
        pier: PierSide,
        sky: &SkyContext,
        mode: SyncMode,
    ) -> MountResult<()>;

    /// Start moving to the park pose (north-referenced azimuth).
    async fn park(&self, pose: &HorizontalPosition, sky: &SkyContext) -> MountResult<ParkMotion>;

    /// Finish a park once the mount has settled.
    async fn complete_park(&self) -> MountResult<()>;

    /// Stop both axes.
    async fn abort(&self) -> MountResult<()>;

    async fn start_motion(&self, direction: Direction, rate_index: usize) -> MountResult<()>;

    async fn stop_motion(&self, direction: Direction) -> MountResult<()>;

    async fn set_track_mode(&self, mode: TrackMode, custom: TrackRate) -> MountResult<()>;

    async fn set_track_rate(&self, rate: TrackRate) -> MountResult<()>;

    /// Rate table for `kind`, in sidereal multiples.
    fn rates(&self, kind: RateKind) -> &'static [f64];

    /// Select an entry of the rate table.
    async fn set_rate(&self, kind: RateKind, index: usize) -> MountResult<()>;

    async fn pulse_guide(&self, direction: Direction, duration: Duration) -> MountResult<()> {
        let _ = (direction, duration);
        Err(self.unsupported("pulse_guide"))
    }

    /// Toggle the hand-box button mapping of the flagged axes.
    async fn swap_buttons(&self, toggle_north_south: bool, toggle_east_west: bool) -> MountResult<()> {
        let _ = (toggle_north_south, toggle_east_west);
        Err(self.unsupported("swap_buttons"))
    }

    /// Send local time to the controller. `utc_offset_hours` is east-positive.
    async fn update_time(&self, utc: DateTime<Utc>, utc_offset_hours: f64) -> MountResult<()> {
        let _ = (utc, utc_offset_hours);
        Ok(())
    }

    async fn update_location(&self, observer: &ObserverLocation) -> MountResult<()> {
        let _ = observer;
        Ok(())
    }

    fn unsupported(&self, operation: &'static str) -> MountError {
        MountError::Unsupported {
            driver: self.dialect(),
            operation,
        }
    }
}
