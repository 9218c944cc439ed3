//! Mount data model.
//!
//! Plain value types shared by the coordinate transforms, the protocol
//! drivers and the state machine. Angles are stored in the unit the wire
//! protocols use: right ascension in hours, everything else in degrees.

use crate::error::{MountError, MountResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sidereal tracking rate in arcseconds per second.
pub const SIDEREAL_RATE: f64 = 15.041_067;
/// Mean solar tracking rate in arcseconds per second.
pub const SOLAR_RATE: f64 = 15.0;
/// Mean lunar tracking rate in arcseconds per second.
pub const LUNAR_RATE: f64 = 14.685;

/// Arcseconds in a full circle.
pub const ARCSEC_IN_CIRCLE: f64 = 1_296_000.0;

/// Celestial position in the equatorial frame of date.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EquatorialPosition {
    /// Right ascension, hours in `[0, 24)`
    pub ra_hours: f64,
    /// Declination, degrees in `[-90, 90]`
    pub dec_degrees: f64,
}

impl EquatorialPosition {
    pub fn new(ra_hours: f64, dec_degrees: f64) -> Self {
        Self {
            ra_hours,
            dec_degrees,
        }
    }

    /// Reject coordinates outside their physical domain.
    ///
    /// Transforms never clamp, so every host-supplied target passes through here.
    pub fn validate(&self) -> MountResult<()> {
        if !self.ra_hours.is_finite() || !(0.0..24.0).contains(&self.ra_hours) {
            return Err(MountError::InvalidTarget(format!(
                "right ascension {} outside [0, 24) hours",
                self.ra_hours
            )));
        }
        if !self.dec_degrees.is_finite() || !(-90.0..=90.0).contains(&self.dec_degrees) {
            return Err(MountError::InvalidTarget(format!(
                "declination {} outside [-90, 90] degrees",
                self.dec_degrees
            )));
        }
        Ok(())
    }
}

impl fmt::Display for EquatorialPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RA {:.5}h Dec {:+.4}°", self.ra_hours, self.dec_degrees)
    }
}

/// Position in the horizontal frame.
///
/// Park poses use the north-referenced azimuth convention (0° north, 90° east);
/// [`crate::coords::to_horizontal`] returns the south-referenced convention and
/// callers rotate with [`crate::coords::south_to_north_azimuth`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizontalPosition {
    /// Azimuth, degrees in `[0, 360)`
    pub azimuth_degrees: f64,
    /// Altitude, degrees in `[-90, 90]`
    pub altitude_degrees: f64,
}

impl HorizontalPosition {
    pub fn new(azimuth_degrees: f64, altitude_degrees: f64) -> Self {
        Self {
            azimuth_degrees,
            altitude_degrees,
        }
    }

    pub fn validate(&self) -> MountResult<()> {
        if !self.azimuth_degrees.is_finite() || !(0.0..360.0).contains(&self.azimuth_degrees) {
            return Err(MountError::InvalidTarget(format!(
                "azimuth {} outside [0, 360) degrees",
                self.azimuth_degrees
            )));
        }
        if !self.altitude_degrees.is_finite()
            || !(-90.0..=90.0).contains(&self.altitude_degrees)
        {
            return Err(MountError::InvalidTarget(format!(
                "altitude {} outside [-90, 90] degrees",
                self.altitude_degrees
            )));
        }
        Ok(())
    }
}

impl fmt::Display for HorizontalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Az {:.4}° Alt {:+.4}°",
            self.azimuth_degrees, self.altitude_degrees
        )
    }
}

/// Side of the pier the optical tube is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PierSide {
    East,
    West,
    #[default]
    Unknown,
}

impl fmt::Display for PierSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PierSide::East => "East",
            PierSide::West => "West",
            PierSide::Unknown => "Unknown",
        };
        write!(f, "{}", label)
    }
}

/// Mount axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Ra,
    Dec,
}

impl Axis {
    /// Axis number used on the wire by motor-count controllers.
    pub fn index(self) -> u8 {
        match self {
            Axis::Ra => 0,
            Axis::Dec => 1,
        }
    }
}

/// Jog direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub fn axis(self) -> Axis {
        match self {
            Direction::North | Direction::South => Axis::Dec,
            Direction::East | Direction::West => Axis::Ra,
        }
    }

    /// Lower-case LX200 direction letter.
    pub fn letter(self) -> char {
        match self {
            Direction::North => 'n',
            Direction::South => 's',
            Direction::East => 'e',
            Direction::West => 'w',
        }
    }
}

/// Start or stop of a jog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    Start,
    Stop,
}

/// Device-native encoder positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MotorCount {
    pub ra: i32,
    pub dec: i32,
}

impl MotorCount {
    pub fn new(ra: i32, dec: i32) -> Self {
        Self { ra, dec }
    }
}

/// Encoder counts per full revolution, per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisScale {
    pub ra: f64,
    pub dec: f64,
}

impl AxisScale {
    /// Explore Scientific PMC-Eight: 4 608 000 counts per revolution on both axes.
    pub const PMC8: AxisScale = AxisScale {
        ra: 4_608_000.0,
        dec: 4_608_000.0,
    };
}

/// Tracking rate in arcseconds per second, per axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackRate {
    pub ra_arcsec_per_sec: f64,
    pub dec_arcsec_per_sec: f64,
}

impl TrackRate {
    pub fn new(ra_arcsec_per_sec: f64, dec_arcsec_per_sec: f64) -> Self {
        Self {
            ra_arcsec_per_sec,
            dec_arcsec_per_sec,
        }
    }

    pub fn sidereal() -> Self {
        Self::new(SIDEREAL_RATE, 0.0)
    }

    /// RA rate as a delta from sidereal, in sidereal multiples.
    pub fn ra_sidereal_delta(&self) -> f64 {
        (self.ra_arcsec_per_sec - SIDEREAL_RATE) / SIDEREAL_RATE
    }

    /// Dec rate in sidereal multiples.
    pub fn dec_sidereal_multiple(&self) -> f64 {
        self.dec_arcsec_per_sec / SIDEREAL_RATE
    }
}

impl Default for TrackRate {
    fn default() -> Self {
        Self::sidereal()
    }
}

/// Tracking mode selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackMode {
    #[default]
    Sidereal,
    Solar,
    Lunar,
    Custom,
    Off,
}

impl TrackMode {
    /// Nominal rate for the mode. `Custom` returns `custom`, `Off` returns zero.
    pub fn rate(self, custom: TrackRate) -> TrackRate {
        match self {
            TrackMode::Sidereal => TrackRate::sidereal(),
            TrackMode::Solar => TrackRate::new(SOLAR_RATE, 0.0),
            TrackMode::Lunar => TrackRate::new(LUNAR_RATE, 0.0),
            TrackMode::Custom => custom,
            TrackMode::Off => TrackRate::new(0.0, 0.0),
        }
    }
}

/// Sync command flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Plain sync (`:CM#`)
    #[default]
    Standard,
    /// Recalibrate (`:CMR#`)
    Recalibrate,
}

/// Rate table selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateKind {
    /// Jog speed for N/S/E/W motion
    Move,
    /// Slew speed for goto
    Goto,
    /// Pulse-guide speed
    Guide,
}

/// Site position, east-positive longitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObserverLocation {
    pub latitude_degrees: f64,
    pub longitude_degrees: f64,
    #[serde(default)]
    pub elevation_m: f64,
}

impl ObserverLocation {
    pub fn new(latitude_degrees: f64, longitude_degrees: f64, elevation_m: f64) -> Self {
        Self {
            latitude_degrees,
            longitude_degrees,
            elevation_m,
        }
    }

    /// Longitude folded into `(-180, 180]`.
    pub fn normalized_longitude(&self) -> f64 {
        let lon = self.longitude_degrees.rem_euclid(360.0);
        if lon > 180.0 {
            lon - 360.0
        } else {
            lon
        }
    }

    pub fn validate(&self) -> MountResult<()> {
        if !self.latitude_degrees.is_finite() || !(-90.0..=90.0).contains(&self.latitude_degrees)
        {
            return Err(MountError::InvalidParameter(format!(
                "latitude {} outside [-90, 90]",
                self.latitude_degrees
            )));
        }
        if !self.longitude_degrees.is_finite()
            || !(-180.0..=360.0).contains(&self.longitude_degrees)
        {
            return Err(MountError::InvalidParameter(format!(
                "longitude {} outside [-180, 360]",
                self.longitude_degrees
            )));
        }
        Ok(())
    }
}

impl Default for ObserverLocation {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

/// Controller identification resolved at handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    pub model: String,
    pub version: String,
    /// Controller forgets the guide rate after any jog or slew.
    pub resets_guide_rate_after_motion: bool,
}

impl fmt::Display for FirmwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.model, self.version)
    }
}

/// First-connect status reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitStatus {
    /// Controller holds a valid pointing model.
    pub initialized: bool,
    /// `None` when the controller cannot tell.
    pub parked: Option<bool>,
}
