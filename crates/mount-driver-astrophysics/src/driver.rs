//! Astro-Physics GTO mount driver.
//!
//! Reference: Astro-Physics GTO command set, revisions E through V (GTOCP2 to
//! GTOCP4).
//!
//! Protocol Overview:
//! - Format: LX200 dialect, commands start with `:` and end with `#`
//! - Baud: 9600, 8N1, no flow control
//! - Set commands answer `1`; motion and mode commands answer nothing
//! - Positions are sexagesimal in long format (`HH:MM:SS`, `sDD*MM:SS`)
//!
//! Parking uses the controller's horizontal goto (`:Sz`/`:Sa`/`:MS#`) and then
//! `:KA#` once the mount has stopped. Mounts without a usable horizontal goto
//! can park through an equatorial slew instead ([`ApParkMode::Equatorial`]).
//!
//! # Usage
//!
//! ```rust,ignore
//! use mount_driver_astrophysics::AstroPhysicsFactory;
//!
//! registry.register_factory(AstroPhysicsFactory);
//!
//! let config = toml::toml! {
//!     port = "/dev/ttyUSB0"
//! };
//! let protocol = registry.build("astrophysics", config.into()).await?;
//! ```

use crate::codec::{text_reply, ApCodec, GOTO_RATES, GUIDE_RATES, MOVE_RATES};
use crate::revision::{parse_controller_revision, ControllerRevision, ControllerVersion};
use crate::sim::ApSimulator;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use mount_core::clock::SkyContext;
use mount_core::coords::{park_pose_to_equatorial, range360};
use mount_core::driver::{Capability, MountDriverFactory};
use mount_core::error::{MountError, MountResult};
use mount_core::protocol::{AxisReading, Codec, MountProtocol, ParkMotion};
use mount_core::sim::SimTransport;
use mount_core::transport::{transact, transact_all, Exchange, SerialTransport, Transport};
use mount_core::types::{
    Axis, Direction, EquatorialPosition, FirmwareInfo, HorizontalPosition, InitStatus,
    ObserverLocation, PierSide, RateKind, SyncMode, TrackMode, TrackRate,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Two values closer than this are considered equal by the init check.
const INIT_EPSILON: f64 = 1e-5;

/// RA drift below one arcsecond of time means the mount is tracking.
const TRACKING_RA_DRIFT_HOURS: f64 = 1.0 / (15.0 * 3600.0);

const DEFAULT_PARK_PROBE_DELAY: Duration = Duration::from_millis(250);

// =============================================================================
// AstroPhysicsFactory - MountDriverFactory implementation
// =============================================================================

/// How the driver moves the mount to its park pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApParkMode {
    /// `:Sz`/`:Sa` then `:MS#`; settle on azimuth/altitude readings
    #[default]
    Horizontal,
    /// Convert the pose to RA/Dec and slew there
    Equatorial,
}

/// Configuration for the Astro-Physics driver
#[derive(Debug, Clone, Deserialize)]
pub struct AstroPhysicsConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0"); unused when simulating
    #[serde(default)]
    pub port: String,
    /// Baud rate (default: 9600)
    #[serde(default)]
    pub baud_rate: Option<u32>,
    /// Reply timeout in milliseconds (default: 5000)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Talk to the built-in simulator instead of a serial port
    #[serde(default)]
    pub simulate: bool,
    #[serde(default)]
    pub park_mode: ApParkMode,
}

impl AstroPhysicsConfig {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(5000))
    }
}

/// Factory for creating Astro-Physics driver instances.
pub struct AstroPhysicsFactory;

/// Static capabilities for Astro-Physics GTO controllers
static ASTROPHYSICS_CAPABILITIES: &[Capability] = &[
    Capability::Goto,
    Capability::Sync,
    Capability::Park,
    Capability::Abort,
    Capability::TrackModes,
    Capability::CustomTrackRate,
    Capability::Jog,
    Capability::PulseGuide,
    Capability::Horizontal,
    Capability::PierSide,
    Capability::Home,
    Capability::SwapButtons,
];

impl MountDriverFactory for AstroPhysicsFactory {
    fn driver_type(&self) -> &'static str {
        "astrophysics"
    }

    fn name(&self) -> &'static str {
        "Astro-Physics GTO Mount"
    }

    fn capabilities(&self) -> &'static [Capability] {
        ASTROPHYSICS_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: AstroPhysicsConfig = config.clone().try_into()?;
        if !cfg.simulate && cfg.port.trim().is_empty() {
            return Err(anyhow!("Astro-Physics: 'port' is required unless simulate = true"));
        }
        if cfg.timeout_ms == Some(0) {
            return Err(anyhow!("Astro-Physics: timeout_ms must be positive"));
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Arc<dyn MountProtocol>>> {
        Box::pin(async move {
            let cfg: AstroPhysicsConfig =
                config.try_into().context("Invalid Astro-Physics config")?;

            let transport: Arc<dyn Transport> = if cfg.simulate {
                info!("Astro-Physics: using simulated controller");
                Arc::new(SimTransport::new(ApSimulator::new()))
            } else {
                let transport = SerialTransport::open(
                    &cfg.port,
                    cfg.baud_rate.unwrap_or(9600),
                    cfg.timeout(),
                    "Astro-Physics GTO",
                )
                .await?;
                Arc::new(transport)
            };

            let driver = AstroPhysicsMount::new(transport).with_park_mode(cfg.park_mode);
            Ok(Arc::new(driver) as Arc<dyn MountProtocol>)
        })
    }
}

// =============================================================================
// AstroPhysicsMount
// =============================================================================

/// Driver for Astro-Physics GTO controllers.
///
/// The controller revision is read once at handshake and cached for the session.
pub struct AstroPhysicsMount {
    transport: Arc<dyn Transport>,
    codec: ApCodec,
    park_mode: ApParkMode,
    park_probe_delay: Duration,
    version: Mutex<Option<ControllerVersion>>,
}

impl AstroPhysicsMount {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            codec: ApCodec,
            park_mode: ApParkMode::default(),
            park_probe_delay: DEFAULT_PARK_PROBE_DELAY,
            version: Mutex::new(None),
        }
    }

    pub fn with_park_mode(mut self, park_mode: ApParkMode) -> Self {
        self.park_mode = park_mode;
        self
    }

    /// Interval between the two RA reads of the parked-status fallback.
    pub fn with_park_probe_delay(mut self, delay: Duration) -> Self {
        self.park_probe_delay = delay;
        self
    }

    /// Revision read at handshake; `Unknown` before it.
    pub fn revision(&self) -> ControllerRevision {
        self.version
            .lock()
            .as_ref()
            .map_or(ControllerRevision::Unknown, |v| v.revision)
    }

    async fn send(&self, exchange: &Exchange) -> MountResult<Vec<u8>> {
        transact(self.transport.as_ref(), exchange).await
    }

    async fn send_all(&self, exchanges: &[Exchange]) -> MountResult<()> {
        transact_all(self.transport.as_ref(), exchanges).await
    }

    async fn read_axis(&self, axis: Axis) -> MountResult<f64> {
        let response = self.send(&self.codec.encode_get_position(axis)).await?;
        self.codec.decode_position(axis, &response)
    }

    async fn read_ra_dec(&self) -> MountResult<EquatorialPosition> {
        let ra = self.read_axis(Axis::Ra).await?;
        let dec = self.read_axis(Axis::Dec).await?;
        Ok(EquatorialPosition::new(ra, dec))
    }

    /// Set the object coordinates used by `:MS#` and `:CM#`.
    async fn set_object(&self, target: &EquatorialPosition) -> MountResult<()> {
        self.send_all(&[
            self.codec.encode_set_position(Axis::Ra, target.ra_hours),
            self.codec.encode_set_position(Axis::Dec, target.dec_degrees),
        ])
        .await
    }

    async fn start_slew(&self) -> MountResult<()> {
        let slew = self.codec.slew();
        let response = self.send(&slew).await?;
        self.codec.check_slew(&slew, &response)
    }

    /// Zero backlash compensation. Controllers often miss the first request.
    async fn disable_backlash(&self) -> MountResult<()> {
        let command = self.codec.set_backlash_zero();
        if let Err(first) = self.send(&command).await {
            debug!(error = %first, "Backlash command not acknowledged, resending");
            self.send(&command).await?;
        }
        Ok(())
    }

    /// Make sure positions come back in long format.
    async fn ensure_long_format(&self) -> MountResult<()> {
        let probe = self.codec.probe_ra_format();
        let response = self.send(&probe).await?;
        match response.len() {
            9 => Ok(()),
            // HH:MM.T#
            8 => {
                info!("Controller in short coordinate format, switching to long");
                self.send(&self.codec.toggle_precision()).await?;
                let response = self.send(&probe).await?;
                if response.len() == 9 {
                    Ok(())
                } else {
                    Err(MountError::Protocol(format!(
                        "controller did not switch to long format: {:?}",
                        String::from_utf8_lossy(&response)
                    )))
                }
            }
            _ => Err(MountError::Protocol(format!(
                "unrecognized coordinate format: {:?}",
                String::from_utf8_lossy(&response)
            ))),
        }
    }

    /// Parked status from `:GOS#`, or from RA drift on older revisions.
    async fn parked_status(&self) -> MountResult<Option<bool>> {
        if self.revision().supports_status_query() {
            match self.send(&self.codec.get_status_string()).await {
                Ok(response) => {
                    let status = text_reply(&response);
                    debug!(%status, "Controller status string");
                    return Ok(Some(status.starts_with('P')));
                }
                Err(e) => warn!(error = %e, "Status query failed, falling back to RA drift"),
            }
        }

        let first = self.read_axis(Axis::Ra).await?;
        tokio::time::sleep(self.park_probe_delay).await;
        let second = self.read_axis(Axis::Ra).await?;

        if (first - second).abs() < TRACKING_RA_DRIFT_HOURS {
            Ok(Some(false))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl MountProtocol for AstroPhysicsMount {
    fn dialect(&self) -> &'static str {
        "astrophysics"
    }

    fn capabilities(&self) -> &'static [Capability] {
        ASTROPHYSICS_CAPABILITIES
    }

    #[instrument(skip(self), err)]
    async fn handshake(&self) -> MountResult<FirmwareInfo> {
        self.send(&self.codec.clear_buffer()).await?;
        self.disable_backlash().await?;

        let response = self.send(&self.codec.get_version()).await?;
        let version = parse_controller_revision(&text_reply(&response));
        if version.revision == ControllerRevision::Unknown {
            warn!(raw = %version.raw, "Unrecognized controller version");
        }
        info!(
            board = version.board.model(),
            revision = %version.revision,
            raw = %version.raw,
            "Astro-Physics controller detected"
        );

        let firmware = FirmwareInfo {
            model: format!("Astro-Physics {}", version.board.model()),
            version: format!("{} (rev {})", version.raw, version.revision),
            resets_guide_rate_after_motion: version.revision.resets_guide_rate_after_motion(),
        };
        *self.version.lock() = Some(version);

        self.ensure_long_format().await?;
        Ok(firmware)
    }

    /// A controller without a valid position reports RA 0 and Dec 0 or 90.
    async fn init_status(&self, _sky: &SkyContext) -> MountResult<InitStatus> {
        let position = self.read_ra_dec().await?;
        let ra_zero = position.ra_hours.abs() < INIT_EPSILON;
        let dec_zero = position.dec_degrees.abs() < INIT_EPSILON;
        let dec_pole = (position.dec_degrees - 90.0).abs() < INIT_EPSILON;
        let initialized = !(ra_zero && (dec_zero || dec_pole));

        let parked = self.parked_status().await?;
        Ok(InitStatus { initialized, parked })
    }

    async fn home(&self) -> MountResult<()> {
        self.send(&self.codec.unpark()).await.map(|_| ())
    }

    async fn read_position(&self, _sky: &SkyContext) -> MountResult<AxisReading> {
        Ok(AxisReading::new(self.read_ra_dec().await?))
    }

    async fn read_horizontal(&self) -> MountResult<Option<HorizontalPosition>> {
        let az = self.send(&self.codec.get_azimuth()).await?;
        let alt = self.send(&self.codec.get_altitude()).await?;
        Ok(Some(HorizontalPosition::new(
            self.codec.decode_azimuth(&az)?,
            self.codec.decode_altitude(&alt)?,
        )))
    }

    async fn read_pier_side(&self, _sky: &SkyContext) -> MountResult<PierSide> {
        let response = self.send(&self.codec.encode_get_status(Axis::Ra)).await?;
        self.codec.decode_status(Axis::Ra, &response)
    }

    #[instrument(skip(self, _sky), fields(target = %target), err)]
    async fn goto(
        &self,
        target: &EquatorialPosition,
        _pier: PierSide,
        _sky: &SkyContext,
    ) -> MountResult<()> {
        self.set_object(target).await?;
        self.start_slew().await
    }

    #[instrument(skip(self, _sky), fields(target = %target), err)]
    async fn sync(
        &self,
        target: &EquatorialPosition,
        _pier: PierSide,
        _sky: &SkyContext,
        mode: SyncMode,
    ) -> MountResult<()> {
        self.set_object(target).await?;
        let response = self.send(&self.codec.sync(mode)).await?;
        debug!(reply = %text_reply(&response), ?mode, "Sync acknowledged");
        Ok(())
    }

    #[instrument(skip(self, sky), fields(pose = %pose), err)]
    async fn park(&self, pose: &HorizontalPosition, sky: &SkyContext) -> MountResult<ParkMotion> {
        match self.park_mode {
            ApParkMode::Horizontal => {
                self.send_all(&[
                    self.codec.set_azimuth(pose.azimuth_degrees),
                    self.codec.set_altitude(pose.altitude_degrees),
                ])
                .await?;
                self.start_slew().await?;
                Ok(ParkMotion::Horizontal(*pose))
            }
            ApParkMode::Equatorial => {
                let target = park_pose_to_equatorial(pose, &sky.observer, sky.lst_hours);
                self.set_object(&target).await?;
                self.start_slew().await?;
                Ok(ParkMotion::Equatorial(target))
            }
        }
    }

    async fn complete_park(&self) -> MountResult<()> {
        self.send(&self.codec.park()).await.map(|_| ())
    }

    async fn abort(&self) -> MountResult<()> {
        self.send(&self.codec.abort()).await.map(|_| ())
    }

    async fn start_motion(&self, direction: Direction, rate_index: usize) -> MountResult<()> {
        if rate_index >= MOVE_RATES.len() {
            return Err(MountError::InvalidParameter(format!(
                "move rate index {} outside 0..{}",
                rate_index,
                MOVE_RATES.len()
            )));
        }
        self.send_all(&self.codec.encode_motion_start(direction, rate_index))
            .await
    }

    async fn stop_motion(&self, direction: Direction) -> MountResult<()> {
        self.send_all(&self.codec.encode_motion_stop(direction)).await
    }

    /// Custom tracking selects sidereal and then applies the RA/Dec offsets.
    async fn set_track_mode(&self, mode: TrackMode, custom: TrackRate) -> MountResult<()> {
        self.send(&self.codec.set_tracking(mode)).await?;
        if mode == TrackMode::Custom {
            self.set_track_rate(custom).await?;
        }
        Ok(())
    }

    async fn set_track_rate(&self, rate: TrackRate) -> MountResult<()> {
        let mut frames = self.codec.encode_set_rate(Axis::Ra, rate.ra_arcsec_per_sec);
        frames.extend(self.codec.encode_set_rate(Axis::Dec, rate.dec_arcsec_per_sec));
        self.send_all(&frames).await
    }

    fn rates(&self, kind: RateKind) -> &'static [f64] {
        match kind {
            RateKind::Move => &MOVE_RATES,
            RateKind::Goto => &GOTO_RATES,
            RateKind::Guide => &GUIDE_RATES,
        }
    }

    async fn set_rate(&self, kind: RateKind, index: usize) -> MountResult<()> {
        let table = self.rates(kind);
        if index >= table.len() {
            return Err(MountError::InvalidParameter(format!(
                "{:?} rate index {} outside 0..{}",
                kind,
                index,
                table.len()
            )));
        }
        self.send(&self.codec.select_rate(kind, index)).await.map(|_| ())
    }

    async fn pulse_guide(&self, direction: Direction, duration: Duration) -> MountResult<()> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        if millis > crate::codec::MAX_PULSE_MS {
            debug!(millis, "Guide pulse clamped to controller maximum");
        }
        self.send(&self.codec.pulse(direction, millis)).await.map(|_| ())
    }

    async fn swap_buttons(&self, toggle_north_south: bool, toggle_east_west: bool) -> MountResult<()> {
        if toggle_north_south {
            self.send(&self.codec.swap_north_south()).await?;
        }
        if toggle_east_west {
            self.send(&self.codec.swap_east_west()).await?;
        }
        Ok(())
    }

    /// Local time, date and the unsigned UTC offset.
    async fn update_time(&self, utc: DateTime<Utc>, utc_offset_hours: f64) -> MountResult<()> {
        let local = ApCodec::local_time(utc, utc_offset_hours)?;
        self.send_all(&self.codec.set_local_time(local)).await
    }

    /// The controller takes west-positive longitude.
    async fn update_location(&self, observer: &ObserverLocation) -> MountResult<()> {
        let west = range360(360.0 - range360(observer.longitude_degrees));
        self.send_all(&[
            self.codec.set_longitude(west),
            self.codec.set_latitude(observer.latitude_degrees),
        ])
        .await
    }
}
