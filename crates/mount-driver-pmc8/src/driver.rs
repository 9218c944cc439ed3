//! Explore Scientific PMC-Eight mount driver.
//!
//! Reference: PMC-Eight ASCII command set (`ES` prefix, `!` terminator).
//!
//! Protocol Overview:
//! - Format: `ES` + verb + axis digit + hex payload + `!`
//! - Baud: 115200, 8N1, no flow control
//! - Set commands echo back with `G` in place of the verb
//! - Positions are signed 24-bit motor counts, 4 608 000 per revolution
//!
//! The controller has no notion of RA/Dec. Targets are converted to motor
//! counts for the pier side chosen by the caller, and readings are converted
//! back with the pier side implied by the Dec count sign. Writing a target
//! position starts the slew; parking drives both axes to count zero.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mount_driver_pmc8::Pmc8Factory;
//!
//! registry.register_factory(Pmc8Factory);
//!
//! let config = toml::toml! {
//!     port = "/dev/ttyUSB0"
//! };
//! let protocol = registry.build("pmc8", config.into()).await?;
//! ```

use crate::codec::{
    jog_rate, move_rate_to_motor, Pmc8Codec, AXIS_SCALE, MIN_SLEW_RATE, MOVE_RATES,
};
use crate::sim::Pmc8Simulator;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use mount_core::clock::{SkyContext, SystemClock};
use mount_core::coords::{from_motor_counts, pier_side_from_counts, to_motor_counts};
use mount_core::driver::{Capability, MountDriverFactory};
use mount_core::error::{MountError, MountResult};
use mount_core::protocol::{AxisReading, Codec, MountProtocol, ParkMotion};
use mount_core::sim::SimTransport;
use mount_core::tracker::SettleFrame;
use mount_core::transport::{transact, transact_all, Exchange, SerialTransport, Transport};
use mount_core::types::{
    Axis, Direction, EquatorialPosition, FirmwareInfo, HorizontalPosition, InitStatus,
    MotorCount, PierSide, RateKind, SyncMode, TrackMode, TrackRate,
};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// `ESGv!` is retried this many times before the handshake fails.
const HANDSHAKE_ATTEMPTS: usize = 2;

// =============================================================================
// Pmc8Factory - MountDriverFactory implementation
// =============================================================================

/// Configuration for the PMC-Eight driver
#[derive(Debug, Clone, Deserialize)]
pub struct Pmc8Config {
    /// Serial port path (e.g., "/dev/ttyUSB0"); unused when simulating
    #[serde(default)]
    pub port: String,
    /// Baud rate (default: 115200)
    #[serde(default)]
    pub baud_rate: Option<u32>,
    /// Reply timeout in milliseconds (default: 1000)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Talk to the built-in simulator instead of a serial port
    #[serde(default)]
    pub simulate: bool,
}

/// Factory for creating PMC-Eight driver instances.
pub struct Pmc8Factory;

/// Static capabilities for PMC-Eight controllers
static PMC8_CAPABILITIES: &[Capability] = &[
    Capability::Goto,
    Capability::Sync,
    Capability::Park,
    Capability::Abort,
    Capability::TrackModes,
    Capability::CustomTrackRate,
    Capability::Jog,
];

impl MountDriverFactory for Pmc8Factory {
    fn driver_type(&self) -> &'static str {
        "pmc8"
    }

    fn name(&self) -> &'static str {
        "Explore Scientific PMC-Eight"
    }

    fn capabilities(&self) -> &'static [Capability] {
        PMC8_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: Pmc8Config = config.clone().try_into()?;
        if !cfg.simulate && cfg.port.trim().is_empty() {
            return Err(anyhow!("PMC-Eight: 'port' is required unless simulate = true"));
        }
        if cfg.timeout_ms == Some(0) {
            return Err(anyhow!("PMC-Eight: timeout_ms must be positive"));
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Arc<dyn MountProtocol>>> {
        Box::pin(async move {
            let cfg: Pmc8Config = config.try_into().context("Invalid PMC-Eight config")?;

            let transport: Arc<dyn Transport> = if cfg.simulate {
                info!("PMC-Eight: using simulated controller");
                Arc::new(SimTransport::new(
                    Pmc8Simulator::new().with_clock(Arc::new(SystemClock)),
                ))
            } else {
                let transport = SerialTransport::open(
                    &cfg.port,
                    cfg.baud_rate.unwrap_or(115_200),
                    std::time::Duration::from_millis(cfg.timeout_ms.unwrap_or(1000)),
                    "PMC-Eight",
                )
                .await?;
                Arc::new(transport)
            };

            Ok(Arc::new(Pmc8Mount::new(transport)) as Arc<dyn MountProtocol>)
        })
    }
}

// =============================================================================
// Pmc8Mount
// =============================================================================

/// Driver for PMC-Eight controllers.
pub struct Pmc8Mount {
    transport: Arc<dyn Transport>,
    codec: Pmc8Codec,
    dec_rate_warned: AtomicBool,
}

impl Pmc8Mount {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            codec: Pmc8Codec,
            dec_rate_warned: AtomicBool::new(false),
        }
    }

    async fn send(&self, exchange: &Exchange) -> MountResult<Vec<u8>> {
        transact(self.transport.as_ref(), exchange).await
    }

    async fn send_all(&self, exchanges: &[Exchange]) -> MountResult<()> {
        transact_all(self.transport.as_ref(), exchanges).await
    }

    async fn read_axis(&self, axis: Axis) -> MountResult<i32> {
        let response = self.send(&self.codec.encode_get_position(axis)).await?;
        self.codec.decode_position(axis, &response)
    }

    async fn read_counts(&self) -> MountResult<MotorCount> {
        let ra = self.read_axis(Axis::Ra).await?;
        let dec = self.read_axis(Axis::Dec).await?;
        Ok(MotorCount::new(ra, dec))
    }

    async fn read_rate(&self, axis: Axis) -> MountResult<u32> {
        let response = self.send(&self.codec.encode_get_status(axis)).await?;
        self.codec.decode_status(axis, &response)
    }

    /// Whether either axis turns faster than tracking.
    async fn axes_slewing(&self) -> MountResult<bool> {
        let ra = self.read_rate(Axis::Ra).await?;
        let dec = self.read_rate(Axis::Dec).await?;
        Ok(ra > MIN_SLEW_RATE || dec > MIN_SLEW_RATE)
    }

    async fn move_to_counts(&self, counts: MotorCount) -> MountResult<()> {
        self.send_all(&[
            self.codec.encode_target_position(Axis::Ra, counts.ra),
            self.codec.encode_target_position(Axis::Dec, counts.dec),
        ])
        .await
    }

    /// Direction of the RA axis as last set on the controller.
    pub async fn ra_direction(&self) -> MountResult<u8> {
        let response = self.send(&self.codec.encode_get_direction(Axis::Ra)).await?;
        self.codec.decode_direction(Axis::Ra, &response)
    }
}

#[async_trait]
impl MountProtocol for Pmc8Mount {
    fn dialect(&self) -> &'static str {
        "pmc8"
    }

    fn capabilities(&self) -> &'static [Capability] {
        PMC8_CAPABILITIES
    }

    #[instrument(skip(self), err)]
    async fn handshake(&self) -> MountResult<FirmwareInfo> {
        let mut last_error = None;
        for attempt in 1..=HANDSHAKE_ATTEMPTS {
            let result = match self.send(&self.codec.get_version()).await {
                Ok(response) => self.codec.decode_version(&response),
                Err(e) => Err(e),
            };
            match result {
                Ok(board) => {
                    info!(%board, "PMC-Eight controller detected");
                    return Ok(FirmwareInfo {
                        model: "PMC-Eight".to_string(),
                        version: board,
                        resets_guide_rate_after_motion: false,
                    });
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Version query failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| MountError::Protocol("no version reply".to_string())))
    }

    /// Encoder counts are always valid; the board cannot report a park.
    async fn init_status(&self, _sky: &SkyContext) -> MountResult<InitStatus> {
        Ok(InitStatus {
            initialized: true,
            parked: None,
        })
    }

    async fn read_position(&self, sky: &SkyContext) -> MountResult<AxisReading> {
        let counts = self.read_counts().await?;
        Ok(AxisReading {
            equatorial: from_motor_counts(counts, sky.lst_hours, AXIS_SCALE),
            pier_side: Some(pier_side_from_counts(counts)),
            counts: Some(counts),
        })
    }

    async fn read_pier_side(&self, _sky: &SkyContext) -> MountResult<PierSide> {
        Ok(pier_side_from_counts(self.read_counts().await?))
    }

    async fn is_slewing(&self) -> MountResult<Option<bool>> {
        self.axes_slewing().await.map(Some)
    }

    /// The decoded RA drifts with sidereal time whenever tracking lags, so a
    /// stopped motor is the only reliable end-of-motion signal.
    fn slew_settle_frame(&self) -> SettleFrame {
        SettleFrame::Reported
    }

    fn park_settle_frame(&self, _motion: &ParkMotion) -> SettleFrame {
        SettleFrame::Reported
    }

    #[instrument(skip(self, sky), fields(target = %target), err)]
    async fn goto(
        &self,
        target: &EquatorialPosition,
        pier: PierSide,
        sky: &SkyContext,
    ) -> MountResult<()> {
        let counts = to_motor_counts(target, pier, sky.lst_hours, AXIS_SCALE)?;
        debug!(ra = counts.ra, dec = counts.dec, %pier, "Goto motor counts");
        self.move_to_counts(counts).await
    }

    #[instrument(skip(self, sky), fields(target = %target), err)]
    async fn sync(
        &self,
        target: &EquatorialPosition,
        pier: PierSide,
        sky: &SkyContext,
        mode: SyncMode,
    ) -> MountResult<()> {
        if mode != SyncMode::Standard {
            debug!(?mode, "PMC-Eight sync always overwrites the axis positions");
        }
        let counts = to_motor_counts(target, pier, sky.lst_hours, AXIS_SCALE)?;
        self.send_all(&[
            self.codec.encode_set_position(Axis::Ra, counts.ra),
            self.codec.encode_set_position(Axis::Dec, counts.dec),
        ])
        .await
    }

    /// Drive both axes to count zero, counterweight down and pointing at the pole.
    async fn park(&self, _pose: &HorizontalPosition, _sky: &SkyContext) -> MountResult<ParkMotion> {
        self.move_to_counts(MotorCount::default()).await?;
        Ok(ParkMotion::Home)
    }

    async fn complete_park(&self) -> MountResult<()> {
        Ok(())
    }

    async fn abort(&self) -> MountResult<()> {
        self.send_all(&self.codec.encode_stop_all()).await
    }

    async fn start_motion(&self, direction: Direction, rate_index: usize) -> MountResult<()> {
        if jog_rate(rate_index).is_none() {
            return Err(MountError::InvalidParameter(format!(
                "move rate index {} outside 0..{}",
                rate_index,
                MOVE_RATES.len()
            )));
        }
        if self.axes_slewing().await? {
            return Err(MountError::Busy("cannot jog while slewing".into()));
        }
        self.send_all(&self.codec.encode_motion_start(direction, rate_index))
            .await
    }

    async fn stop_motion(&self, direction: Direction) -> MountResult<()> {
        self.send_all(&self.codec.encode_motion_stop(direction)).await
    }

    async fn set_track_mode(&self, mode: TrackMode, custom: TrackRate) -> MountResult<()> {
        self.set_track_rate(mode.rate(custom)).await
    }

    async fn set_track_rate(&self, rate: TrackRate) -> MountResult<()> {
        if rate.dec_arcsec_per_sec != 0.0 && !self.dec_rate_warned.swap(true, Ordering::Relaxed) {
            warn!(
                dec = rate.dec_arcsec_per_sec,
                "PMC-Eight has no Dec tracking, custom Dec rate ignored"
            );
        }
        let mut frames = self.codec.encode_set_rate(Axis::Ra, rate.ra_arcsec_per_sec);
        frames.extend(self.codec.encode_set_rate(Axis::Dec, rate.dec_arcsec_per_sec));
        self.send_all(&frames).await
    }

    fn rates(&self, kind: RateKind) -> &'static [f64] {
        match kind {
            RateKind::Move => &MOVE_RATES,
            RateKind::Goto | RateKind::Guide => &[],
        }
    }

    /// The move rate is sent with each jog; goto and guide rates are fixed.
    async fn set_rate(&self, kind: RateKind, index: usize) -> MountResult<()> {
        match kind {
            RateKind::Move => match jog_rate(index) {
                Some(rate) => {
                    debug!(index, motor = move_rate_to_motor(rate), "Move rate selected");
                    Ok(())
                }
                None => Err(MountError::InvalidParameter(format!(
                    "move rate index {} outside 0..{}",
                    index,
                    MOVE_RATES.len()
                ))),
            },
            RateKind::Goto => Err(self.unsupported("goto rate")),
            RateKind::Guide => Err(self.unsupported("guide rate")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mount_core::sim::Fault;
    use tracing_test::traced_test;
    use mount_core::types::{ObserverLocation, SIDEREAL_RATE};

    fn sky() -> SkyContext {
        SkyContext::with_sidereal_time(ObserverLocation::new(40.0, 250.0, 0.0), 2_460_000.5, 10.0)
    }

    fn mount() -> (Pmc8Mount, SimTransport<Pmc8Simulator>) {
        let sim = SimTransport::new(Pmc8Simulator::new());
        (Pmc8Mount::new(Arc::new(sim.clone())), sim)
    }

    #[test]
    fn factory_validation() {
        let factory = Pmc8Factory;
        assert!(factory.validate(&toml::Value::Table(toml::toml! { simulate = true })).is_ok());
        assert!(factory.validate(&toml::Value::Table(toml::toml! { port = "/dev/ttyACM0" })).is_ok());
        assert!(factory.validate(&toml::Value::Table(toml::toml! { baud_rate = 115200 })).is_err());
        assert!(factory
            .validate(&toml::Value::Table(toml::toml! { simulate = true
            timeout_ms = 0 }))
            .is_err());
    }

    #[tokio::test]
    async fn handshake_reads_board_firmware() {
        let (driver, sim) = mount();
        let firmware = driver.handshake().await.unwrap();
        assert_eq!(firmware.model, "PMC-Eight");
        assert_eq!(firmware.version, "06B9T9");
        assert_eq!(sim.commands(), vec!["ESGv!"]);
    }

    #[tokio::test]
    async fn handshake_retries_once() {
        let (driver, sim) = mount();
        sim.inject_on("ESGv", Fault::Timeout);
        driver.handshake().await.unwrap();
        assert_eq!(sim.commands().len(), 2);

        sim.inject_on("ESGv", Fault::Reply(b"ESGv1234567!".to_vec()));
        sim.inject_on("ESGv", Fault::Timeout);
        assert!(driver.handshake().await.is_err());
    }

    #[tokio::test]
    async fn goto_writes_motor_targets() {
        let (driver, sim) = mount();
        driver
            .goto(&EquatorialPosition::new(8.0, 20.0), PierSide::East, &sky())
            .await
            .unwrap();
        assert_eq!(sim.commands(), vec!["ESPt0F44800!", "ESPt1F25400!"]);
    }

    #[tokio::test]
    async fn goto_with_unknown_pier_sends_nothing() {
        let (driver, sim) = mount();
        let err = driver
            .goto(&EquatorialPosition::new(8.0, 20.0), PierSide::Unknown, &sky())
            .await
            .unwrap_err();
        assert!(matches!(err, MountError::InvalidPierSide { .. }));
        assert!(sim.commands().is_empty());
    }

    #[tokio::test]
    async fn reading_decodes_counts_and_pier_side() {
        let (driver, sim) = mount();
        sim.device().set_counts(MotorCount::new(-768_000, -896_000));
        let reading = driver.read_position(&sky()).await.unwrap();
        assert_eq!(reading.counts, Some(MotorCount::new(-768_000, -896_000)));
        assert_eq!(reading.pier_side, Some(PierSide::East));
        assert!((reading.equatorial.ra_hours - 8.0).abs() < 1e-6);
        assert!((reading.equatorial.dec_degrees - 20.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn short_track_rate_reply_is_protocol_error() {
        let (driver, sim) = mount();
        sim.inject_on("ESTr", Fault::Reply(b"ESGr0".to_vec()));
        let err = driver
            .set_track_mode(TrackMode::Sidereal, TrackRate::sidereal())
            .await
            .unwrap_err();
        assert!(matches!(err, MountError::Protocol(_)));
    }

    #[tokio::test]
    async fn wrong_echo_is_protocol_error() {
        let (driver, sim) = mount();
        sim.inject_on("ESPt0", Fault::Reply(b"ESGt0000001!".to_vec()));
        let err = driver
            .goto(&EquatorialPosition::new(8.0, 20.0), PierSide::East, &sky())
            .await
            .unwrap_err();
        assert!(matches!(err, MountError::Protocol(_)));
        // The Dec target is never written
        assert_eq!(sim.commands(), vec!["ESPt0F44800!"]);
    }

    #[tokio::test]
    async fn jog_rejected_while_slewing() {
        let (driver, sim) = mount();
        sim.device().set_counts(MotorCount::new(1000, 1000));
        driver.move_to_counts(MotorCount::default()).await.unwrap();
        sim.clear_log();

        let err = driver.start_motion(Direction::North, 1).await.unwrap_err();
        assert!(matches!(err, MountError::Busy(_)));
        assert_eq!(sim.commands(), vec!["ESGr0!", "ESGr1!"]);
    }

    #[tokio::test]
    async fn jog_sets_direction_and_rate() {
        let (driver, sim) = mount();
        driver.start_motion(Direction::South, 2).await.unwrap();
        assert_eq!(sim.device().move_rate(Axis::Dec), -3413);
        driver.stop_motion(Direction::South).await.unwrap();
        assert_eq!(sim.device().move_rate(Axis::Dec), 0);
        assert!(driver.start_motion(Direction::South, 4).await.is_err());
    }

    #[tokio::test]
    async fn park_drives_to_home() {
        let (driver, sim) = mount();
        sim.device().set_counts(MotorCount::new(500_000, -200_000));
        let motion = driver
            .park(&HorizontalPosition::new(0.0, 40.0), &sky())
            .await
            .unwrap();
        assert_eq!(motion, ParkMotion::Home);
        assert_eq!(sim.commands(), vec!["ESPt0000000!", "ESPt1000000!"]);

        driver.read_position(&sky()).await.unwrap();
        driver.read_position(&sky()).await.unwrap();
        assert_eq!(sim.device().counts(), MotorCount::default());
    }

    #[tokio::test]
    async fn sync_overwrites_counts() {
        let (driver, sim) = mount();
        driver
            .sync(&EquatorialPosition::new(8.0, 20.0), PierSide::East, &sky(), SyncMode::Standard)
            .await
            .unwrap();
        assert_eq!(sim.commands(), vec!["ESSp0F44800!", "ESSp1F25400!"]);
        assert_eq!(sim.device().counts(), MotorCount::new(-768_000, -896_000));
    }

    #[tokio::test]
    async fn tracking_modes() {
        let (driver, sim) = mount();
        driver
            .set_track_mode(TrackMode::Sidereal, TrackRate::sidereal())
            .await
            .unwrap();
        assert_eq!(sim.commands(), vec!["ESTr0538!", "ESSd01!"]);
        assert_eq!(driver.is_slewing().await.unwrap(), Some(false));

        sim.clear_log();
        driver.set_track_mode(TrackMode::Off, TrackRate::sidereal()).await.unwrap();
        assert_eq!(sim.commands(), vec!["ESTr0000!", "ESSd01!"]);
        assert_eq!(driver.ra_direction().await.unwrap(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn dec_rate_is_dropped() {
        let (driver, sim) = mount();
        let rate = TrackRate::new(SIDEREAL_RATE, 2.0);
        driver.set_track_rate(rate).await.unwrap();
        driver.set_track_rate(rate).await.unwrap();
        assert!(sim.commands().iter().all(|c| c.starts_with("ESTr") || c == "ESSd01!"));
        assert!(driver.dec_rate_warned.load(Ordering::Relaxed));
        assert!(logs_contain("custom Dec rate ignored"));
    }

    #[tokio::test]
    async fn only_move_rates_are_selectable() {
        let (driver, sim) = mount();
        driver.set_rate(RateKind::Move, 3).await.unwrap();
        assert!(matches!(
            driver.set_rate(RateKind::Goto, 0).await,
            Err(MountError::Unsupported { .. })
        ));
        assert!(matches!(
            driver.set_rate(RateKind::Move, 4).await,
            Err(MountError::InvalidParameter(_))
        ));
        assert!(sim.commands().is_empty());
    }
}
