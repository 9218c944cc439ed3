//! Mount state machine.
//!
//! [`Mount`] owns the [`MountState`], the park pose and the persisted settings,
//! and is the only place that transitions state. Every intent follows the same
//! discipline:
//!
//! 1. validate arguments and the current state without touching the device,
//! 2. issue the device commands through the [`MountProtocol`],
//! 3. transition only when every command succeeded.
//!
//! ```text
//!           goto                settled
//!   Idle ───────────▶ Slewing ───────────▶ Tracking
//!    │ ▲                 │ goto (abort first)  │
//!    │ │ unpark          ▼                     │ park
//!    │ └──────────── Parked ◀── settled ── Parking ◀─┘
//!    └─────────────────────── park ─────────────┘
//!
//!   any ── abort ──▶ Aborting ──▶ Idle
//! ```
//!
//! Arrival is detected by [`Mount::refresh`], which the host calls on a fixed
//! cadence. A failed poll marks the status degraded and keeps the current state.

use crate::clock::{Clock, SkyContext};
use crate::coords::{default_park_pose, derive_pier_side, equatorial_to_park_pose, hour_angle};
use crate::driver::Capability;
use crate::error::{MountError, MountResult};
use crate::protocol::{MountProtocol, ParkMotion};
use crate::quirk::GuideRateQuirk;
use crate::settings::{MountSettings, SettingsStore};
use crate::tracker::{PositionTracker, SettleFrame};
use crate::types::{
    Direction, EquatorialPosition, FirmwareInfo, HorizontalPosition, Motion, ObserverLocation,
    PierSide, RateKind, SyncMode, TrackMode, TrackRate,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Current activity of the mount.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MountState {
    Idle,
    Slewing { target: EquatorialPosition },
    Tracking { rate: TrackRate },
    /// Moving to the park pose (north-referenced azimuth).
    Parking { target: HorizontalPosition },
    Parked,
    Aborting,
}

impl MountState {
    pub fn name(&self) -> &'static str {
        match self {
            MountState::Idle => "Idle",
            MountState::Slewing { .. } => "Slewing",
            MountState::Tracking { .. } => "Tracking",
            MountState::Parking { .. } => "Parking",
            MountState::Parked => "Parked",
            MountState::Aborting => "Aborting",
        }
    }

    /// Slewing or parking.
    pub fn is_moving(&self) -> bool {
        matches!(self, MountState::Slewing { .. } | MountState::Parking { .. })
    }
}

/// Telemetry snapshot for the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub state: MountState,
    pub position: Option<EquatorialPosition>,
    pub horizontal: Option<HorizontalPosition>,
    pub pier_side: PierSide,
    pub firmware: Option<String>,
    /// Last poll failed; position is the last known one.
    pub degraded: bool,
    pub hour_angle: Option<f64>,
    pub tracking: bool,
    pub parked: bool,
}

/// Mount session: state machine over one protocol driver.
pub struct Mount {
    protocol: Arc<dyn MountProtocol>,
    store: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    state: MountState,
    settings: MountSettings,
    tracker: PositionTracker,
    quirk: GuideRateQuirk,
    firmware: Option<FirmwareInfo>,
    observer: Option<ObserverLocation>,
    default_park: HorizontalPosition,
    park_motion: Option<ParkMotion>,
    time_set: bool,
    initialized: bool,
    degraded: bool,
    pier_side: PierSide,
    jogging: Vec<Direction>,
    tracking_enabled: bool,
}

impl Mount {
    /// Create a session, restoring persisted settings.
    ///
    /// A mount persisted as parked starts in [`MountState::Parked`].
    pub fn new(
        protocol: Arc<dyn MountProtocol>,
        store: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
    ) -> MountResult<Self> {
        let settings = store.load()?;
        let state = if settings.parked {
            MountState::Parked
        } else {
            MountState::Idle
        };
        let tracking_enabled = !settings.parked && settings.track_mode != TrackMode::Off;
        let default_park = default_park_pose(&ObserverLocation::default());

        Ok(Self {
            protocol,
            store,
            clock,
            state,
            settings,
            tracker: PositionTracker::new(0.0),
            quirk: GuideRateQuirk::default(),
            firmware: None,
            observer: None,
            default_park,
            park_motion: None,
            time_set: false,
            initialized: false,
            degraded: false,
            pier_side: PierSide::Unknown,
            jogging: Vec::new(),
            tracking_enabled,
        })
    }

    /// Per-axis tolerance for settle detection; zero means exact equality.
    pub fn with_settle_tolerance(mut self, tolerance: f64) -> Self {
        self.tracker = PositionTracker::new(tolerance);
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> MountState {
        self.state
    }

    pub fn settings(&self) -> &MountSettings {
        &self.settings
    }

    pub fn firmware(&self) -> Option<&FirmwareInfo> {
        self.firmware.as_ref()
    }

    pub fn observer(&self) -> Option<ObserverLocation> {
        self.observer
    }

    pub fn default_park_pose(&self) -> HorizontalPosition {
        self.default_park
    }

    /// Park pose in effect: the configured one or the default.
    pub fn park_pose(&self) -> HorizontalPosition {
        self.settings.park_pose.unwrap_or(self.default_park)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn is_tracking_enabled(&self) -> bool {
        self.tracking_enabled
    }

    pub fn guide_rate_quirk(&self) -> GuideRateQuirk {
        self.quirk
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    /// Directions with an active jog.
    pub fn active_jogs(&self) -> &[Direction] {
        &self.jogging
    }

    pub fn protocol(&self) -> &Arc<dyn MountProtocol> {
        &self.protocol
    }

    // =========================================================================
    // Session setup
    // =========================================================================

    /// Identify the controller and resolve firmware quirks for the session.
    #[instrument(skip(self), fields(dialect = self.protocol.dialect()), err)]
    pub async fn connect(&mut self) -> MountResult<FirmwareInfo> {
        let firmware = self.protocol.handshake().await?;
        self.quirk = GuideRateQuirk::new(&firmware);
        info!(
            %firmware,
            guide_rate_quirk = self.quirk.is_enabled(),
            "Mount connected"
        );
        self.firmware = Some(firmware.clone());
        Ok(firmware)
    }

    /// Host supplied the site position.
    #[instrument(skip(self), err)]
    pub async fn update_location(&mut self, observer: ObserverLocation) -> MountResult<()> {
        observer.validate()?;
        self.protocol.update_location(&observer).await?;
        self.observer = Some(observer);
        self.default_park = default_park_pose(&observer);
        debug!(default_park = %self.default_park, "Location updated");
        self.maybe_initialize().await
    }

    /// Host supplied the time. `utc_offset_hours` is east-positive.
    #[instrument(skip(self), err)]
    pub async fn update_time(
        &mut self,
        utc: DateTime<Utc>,
        utc_offset_hours: f64,
    ) -> MountResult<()> {
        if !utc_offset_hours.is_finite() || utc_offset_hours.abs() > 14.0 {
            return Err(MountError::InvalidParameter(format!(
                "UTC offset {} outside [-14, 14] hours",
                utc_offset_hours
            )));
        }
        self.protocol.update_time(utc, utc_offset_hours).await?;
        self.time_set = true;
        self.maybe_initialize().await
    }

    /// Run the first-connect sequence once both time and location are known.
    async fn maybe_initialize(&mut self) -> MountResult<()> {
        if self.initialized || !self.time_set || self.observer.is_none() {
            return Ok(());
        }
        self.initialize().await
    }

    /// First-connect sequence: home an uninitialized controller, unpark, and
    /// apply the configured rates.
    ///
    /// Marked done only on success, so a failed attempt reruns on the next
    /// time or location update.
    #[instrument(skip(self), err)]
    async fn initialize(&mut self) -> MountResult<()> {
        let sky = self.sky();
        let status = self.protocol.init_status(&sky).await?;
        info!(
            initialized = status.initialized,
            parked = ?status.parked,
            "Controller status at connect"
        );

        if !status.initialized {
            info!("Controller not initialized, homing");
            self.protocol.home().await?;
            self.protocol.abort().await?;
        }

        self.enable_tracking().await?;
        if self.state == MountState::Parked {
            self.state = MountState::Idle;
        }
        if self.settings.parked {
            self.settings.parked = false;
            self.persist()?;
        }

        for (kind, index) in [
            (RateKind::Move, self.settings.move_rate_index),
            (RateKind::Goto, self.settings.goto_rate_index),
            (RateKind::Guide, self.settings.guide_rate_index),
        ] {
            match self.protocol.set_rate(kind, index).await {
                Ok(()) | Err(MountError::Unsupported { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        self.initialized = true;
        info!("Mount initialized");
        Ok(())
    }

    // =========================================================================
    // Motion intents
    // =========================================================================

    /// Slew to `target`.
    ///
    /// A goto while slewing or parking first aborts the running motion. If the
    /// goto command then fails the mount is left Idle, since the device has
    /// already stopped.
    #[instrument(skip(self), fields(state = self.state.name()), err)]
    pub async fn goto(&mut self, target: EquatorialPosition) -> MountResult<()> {
        target.validate()?;
        match self.state {
            MountState::Parked => return Err(self.invalid("goto")),
            MountState::Aborting => return Err(MountError::Busy("abort in progress".into())),
            _ => {}
        }

        let sky = self.located_sky()?;
        let pier = derive_pier_side(target.ra_hours, sky.lst_hours);
        if pier == PierSide::Unknown {
            return Err(MountError::InvalidPierSide {
                ra_hours: target.ra_hours,
            });
        }

        if self.state.is_moving() {
            debug!(from = self.state.name(), "Aborting running motion before goto");
            self.protocol.abort().await?;
            self.jogging.clear();
            self.park_motion = None;
            self.tracker.clear_settle();
            self.state = MountState::Idle;
        }

        self.protocol.goto(&target, pier, &sky).await?;

        self.state = MountState::Slewing { target };
        self.tracker.seed(target.into());
        self.quirk.note_motion();
        info!(%target, %pier, "Slewing");
        Ok(())
    }

    /// Tell the device it is pointing at `target`.
    #[instrument(skip(self), fields(state = self.state.name()), err)]
    pub async fn sync(&mut self, target: EquatorialPosition) -> MountResult<()> {
        target.validate()?;
        match self.state {
            MountState::Idle | MountState::Tracking { .. } => {}
            MountState::Parked => return Err(self.invalid("sync")),
            _ => return Err(MountError::Busy(format!("cannot sync while {}", self.state.name()))),
        }

        let sky = self.located_sky()?;
        let pier = derive_pier_side(target.ra_hours, sky.lst_hours);
        if pier == PierSide::Unknown {
            return Err(MountError::InvalidPierSide {
                ra_hours: target.ra_hours,
            });
        }

        self.protocol
            .sync(&target, pier, &sky, self.settings.sync_mode)
            .await?;
        self.tracker.set_last_known(target);
        info!(%target, mode = ?self.settings.sync_mode, "Synced");
        Ok(())
    }

    /// Move to the park pose.
    #[instrument(skip(self), fields(state = self.state.name()), err)]
    pub async fn park(&mut self) -> MountResult<()> {
        match self.state {
            MountState::Idle | MountState::Tracking { .. } => {}
            MountState::Parked => return Err(self.invalid("park")),
            _ => return Err(MountError::Busy(format!("cannot park while {}", self.state.name()))),
        }

        let sky = self.located_sky()?;
        let pose = self.park_pose();
        let motion = self.protocol.park(&pose, &sky).await?;

        self.tracker.seed(motion.settle_target());
        self.park_motion = Some(motion);
        self.state = MountState::Parking { target: pose };
        self.quirk.note_motion();
        info!(%pose, ?motion, "Parking");
        Ok(())
    }

    /// Leave the parked state.
    ///
    /// Sends no clear-park command; only re-enables tracking and clears the flag.
    #[instrument(skip(self), fields(state = self.state.name()), err)]
    pub async fn unpark(&mut self) -> MountResult<()> {
        if self.state != MountState::Parked {
            return Err(self.invalid("unpark"));
        }
        self.enable_tracking().await?;
        self.settings.parked = false;
        self.state = MountState::Idle;
        info!("Unparked");
        self.persist()
    }

    /// Stop all motion.
    ///
    /// A parked mount is left untouched. When the stop command fails the
    /// previous state is restored.
    #[instrument(skip(self), fields(state = self.state.name()), err)]
    pub async fn abort(&mut self) -> MountResult<()> {
        if self.state == MountState::Parked {
            debug!("Abort while parked, nothing to stop");
            return Ok(());
        }

        let prior = self.state;
        self.state = MountState::Aborting;
        if let Err(e) = self.protocol.abort().await {
            self.state = prior;
            return Err(e);
        }

        self.jogging.clear();
        self.park_motion = None;
        self.tracker.clear_settle();
        self.state = MountState::Idle;
        info!(from = prior.name(), "Motion aborted");
        Ok(())
    }

    /// Start or stop a manual move.
    #[instrument(skip(self), fields(state = self.state.name()), err)]
    pub async fn jog(&mut self, direction: Direction, motion: Motion) -> MountResult<()> {
        match motion {
            Motion::Start => {
                match self.state {
                    MountState::Parked => return Err(self.invalid("jog")),
                    MountState::Slewing { .. } | MountState::Parking { .. } | MountState::Aborting => {
                        return Err(MountError::Busy(format!(
                            "axis rate channel in use while {}",
                            self.state.name()
                        )))
                    }
                    _ => {}
                }
                self.protocol
                    .start_motion(direction, self.settings.move_rate_index)
                    .await?;
                if !self.jogging.contains(&direction) {
                    self.jogging.push(direction);
                }
                self.quirk.note_motion();
            }
            Motion::Stop => {
                self.protocol.stop_motion(direction).await?;
                self.jogging.retain(|d| *d != direction);
            }
        }
        Ok(())
    }

    /// Send a guide pulse.
    #[instrument(skip(self), fields(state = self.state.name()), err)]
    pub async fn pulse_guide(&mut self, direction: Direction, duration: Duration) -> MountResult<()> {
        match self.state {
            MountState::Parked => return Err(self.invalid("pulse guide")),
            s if s.is_moving() => {
                return Err(MountError::Busy(format!("cannot guide while {}", s.name())))
            }
            _ => {}
        }
        if duration.is_zero() {
            return Err(MountError::InvalidParameter(
                "guide pulse duration must be positive".into(),
            ));
        }

        self.quirk
            .before_pulse(self.protocol.as_ref(), self.settings.guide_rate_index)
            .await?;
        self.protocol.pulse_guide(direction, duration).await
    }

    // =========================================================================
    // Tracking and rates
    // =========================================================================

    /// Select a tracking mode.
    ///
    /// While parked the mode is only stored and applied on unpark.
    #[instrument(skip(self), fields(state = self.state.name()), err)]
    pub async fn set_track_mode(&mut self, mode: TrackMode) -> MountResult<()> {
        if matches!(self.state, MountState::Parking { .. }) {
            return Err(MountError::Busy("cannot change tracking while parking".into()));
        }

        if self.state != MountState::Parked {
            self.protocol
                .set_track_mode(mode, self.settings.custom_rate)
                .await?;
            self.tracking_enabled = mode != TrackMode::Off;
            match self.state {
                MountState::Tracking { .. } if mode == TrackMode::Off => {
                    self.state = MountState::Idle;
                }
                MountState::Tracking { .. } => {
                    self.state = MountState::Tracking {
                        rate: mode.rate(self.settings.custom_rate),
                    };
                }
                _ => {}
            }
        }

        self.settings.track_mode = mode;
        self.persist()
    }

    /// Set the custom tracking rate.
    ///
    /// Sent to the device only while the custom mode is active.
    #[instrument(skip(self), fields(state = self.state.name()), err)]
    pub async fn set_track_rate(&mut self, rate: TrackRate) -> MountResult<()> {
        if matches!(self.state, MountState::Parking { .. }) {
            return Err(MountError::Busy("cannot change tracking while parking".into()));
        }
        if !rate.ra_arcsec_per_sec.is_finite() || !rate.dec_arcsec_per_sec.is_finite() {
            return Err(MountError::InvalidParameter(format!(
                "track rate {:?} is not finite",
                rate
            )));
        }

        if self.settings.track_mode == TrackMode::Custom && self.state != MountState::Parked {
            self.protocol.set_track_rate(rate).await?;
            if let MountState::Tracking { .. } = self.state {
                self.state = MountState::Tracking { rate };
            }
        }

        self.settings.custom_rate = rate;
        self.persist()
    }

    /// Select an entry of a rate table. Stored only while parked.
    #[instrument(skip(self), err)]
    pub async fn set_rate(&mut self, kind: RateKind, index: usize) -> MountResult<()> {
        let table = self.protocol.rates(kind);
        if index >= table.len() {
            return Err(MountError::InvalidParameter(format!(
                "{:?} rate index {} outside 0..{}",
                kind,
                index,
                table.len()
            )));
        }

        if self.state != MountState::Parked {
            self.protocol.set_rate(kind, index).await?;
        }

        match kind {
            RateKind::Move => self.settings.move_rate_index = index,
            RateKind::Goto => self.settings.goto_rate_index = index,
            RateKind::Guide => self.settings.guide_rate_index = index,
        }
        debug!(?kind, index, multiple = table[index], "Rate selected");
        self.persist()
    }

    pub async fn set_sync_mode(&mut self, mode: SyncMode) -> MountResult<()> {
        self.settings.sync_mode = mode;
        self.persist()
    }

    /// Set the hand-box button mapping.
    pub async fn swap_buttons(&mut self, north_south: bool, east_west: bool) -> MountResult<()> {
        let toggle_ns = north_south != self.settings.swap_north_south;
        let toggle_ew = east_west != self.settings.swap_east_west;
        if !toggle_ns && !toggle_ew {
            return Ok(());
        }
        self.protocol.swap_buttons(toggle_ns, toggle_ew).await?;
        self.settings.swap_north_south = north_south;
        self.settings.swap_east_west = east_west;
        self.persist()
    }

    // =========================================================================
    // Park pose
    // =========================================================================

    /// Use `pose` (north-referenced) for future parks.
    pub fn set_park_pose(&mut self, pose: HorizontalPosition) -> MountResult<()> {
        pose.validate()?;
        self.settings.park_pose = Some(pose);
        self.persist()
    }

    /// Use the current pointing for future parks.
    pub fn set_park_to_current(&mut self) -> MountResult<HorizontalPosition> {
        let position = self
            .tracker
            .last_known()
            .ok_or_else(|| MountError::Telemetry("no position read yet".into()))?;
        let sky = self.located_sky()?;
        let pose = equatorial_to_park_pose(&position, &sky.observer, sky.lst_hours);
        self.settings.park_pose = Some(pose);
        self.persist()?;
        info!(%pose, "Park pose set to current position");
        Ok(pose)
    }

    /// Go back to the pole-pointing default pose.
    pub fn set_default_park(&mut self) -> MountResult<HorizontalPosition> {
        self.settings.park_pose = None;
        self.persist()?;
        Ok(self.default_park)
    }

    // =========================================================================
    // Status refresh
    // =========================================================================

    /// Poll the device and advance Slewing/Parking on settle.
    ///
    /// A failed poll returns [`MountError::Telemetry`], marks the status degraded
    /// and leaves the state unchanged.
    #[instrument(skip(self), fields(state = self.state.name()), level = "trace", err)]
    pub async fn refresh(&mut self) -> MountResult<StatusReport> {
        let sky = self.sky();
        let want_horizontal = self.protocol.has_capability(Capability::Horizontal);

        let sample = match self
            .tracker
            .poll(self.protocol.as_ref(), &sky, want_horizontal)
            .await
        {
            Ok(sample) => sample,
            Err(e) => {
                self.degraded = true;
                self.tracker.note_failure(&e);
                return Err(e);
            }
        };
        if self.degraded {
            info!("Telemetry recovered");
        }
        self.degraded = false;
        self.pier_side = sample.pier_side;

        match self.state {
            MountState::Slewing { target } => {
                if self.tracker.observe(&sample, self.protocol.slew_settle_frame()) {
                    self.tracker.clear_settle();
                    self.state = if self.tracking_enabled {
                        MountState::Tracking {
                            rate: self.settings.track_mode.rate(self.settings.custom_rate),
                        }
                    } else {
                        MountState::Idle
                    };
                    info!(%target, position = %sample.equatorial, next = self.state.name(), "Slew complete");
                }
            }
            MountState::Parking { .. } => {
                let frame = self
                    .park_motion
                    .map_or(SettleFrame::Equatorial, |m| self.protocol.park_settle_frame(&m));
                if self.tracker.observe(&sample, frame) {
                    self.finish_park().await?;
                }
            }
            _ => {}
        }

        Ok(self.status())
    }

    async fn finish_park(&mut self) -> MountResult<()> {
        self.protocol.complete_park().await?;
        self.protocol
            .set_track_mode(TrackMode::Off, self.settings.custom_rate)
            .await?;

        self.tracking_enabled = false;
        self.tracker.clear_settle();
        self.park_motion = None;
        self.jogging.clear();
        self.state = MountState::Parked;
        info!("Mount parked");

        if !self.settings.parked {
            self.settings.parked = true;
            self.persist()?;
        }
        Ok(())
    }

    /// Snapshot of the current state and last-known telemetry.
    pub fn status(&self) -> StatusReport {
        let position = self.tracker.last_known();
        let lst = self.sky().lst_hours;
        StatusReport {
            state: self.state,
            position,
            horizontal: self.tracker.last_sample().and_then(|s| s.horizontal),
            pier_side: self.pier_side,
            firmware: self.firmware.as_ref().map(ToString::to_string),
            degraded: self.degraded,
            hour_angle: position.map(|p| hour_angle(p.ra_hours, lst)),
            tracking: self.tracking_enabled,
            parked: self.state == MountState::Parked,
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Observer and sidereal time for the current instant.
    pub fn sky(&self) -> SkyContext {
        SkyContext::from_utc(self.observer.unwrap_or_default(), self.clock.now())
    }

    /// Like [`Mount::sky`], but refuses to guess a site or time for motion.
    fn located_sky(&self) -> MountResult<SkyContext> {
        match self.observer {
            Some(observer) if self.time_set => Ok(SkyContext::from_utc(observer, self.clock.now())),
            Some(_) => Err(MountError::Configuration("mount time not set".into())),
            None => Err(MountError::Configuration("observer location not set".into())),
        }
    }

    async fn enable_tracking(&mut self) -> MountResult<()> {
        let mode = match self.settings.track_mode {
            TrackMode::Off => TrackMode::Sidereal,
            mode => mode,
        };
        self.protocol
            .set_track_mode(mode, self.settings.custom_rate)
            .await?;
        self.settings.track_mode = mode;
        self.tracking_enabled = true;
        Ok(())
    }

    fn persist(&self) -> MountResult<()> {
        self.store.save(&self.settings).map_err(|e| {
            warn!(error = %e, "Failed to persist mount settings");
            e
        })
    }

    fn invalid(&self, intent: &'static str) -> MountError {
        MountError::InvalidState {
            state: self.state.name(),
            intent,
        }
    }
}
