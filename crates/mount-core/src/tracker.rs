//! Position polling and settle detection.
//!
//! The tracker owns the last-known position and the settle sample. Arrival is
//! detected by comparing two consecutive polls: when neither axis moved by more
//! than the tolerance, the mount has settled. With the default tolerance of zero
//! this is exact equality, so a controller that stalls for one poll mid-slew is
//! reported as arrived.
//!
//! Controllers whose position readout keeps moving after arrival (motor counts
//! that advance while tracking, RA decoded against a running sidereal clock)
//! settle on their reported slew status instead, see [`SettleFrame::Reported`].

use crate::clock::SkyContext;
use crate::error::{MountError, MountResult};
use crate::protocol::MountProtocol;
use crate::types::{EquatorialPosition, HorizontalPosition, MotorCount, PierSide};
use tracing::{trace, warn};

/// Two-axis value compared between polls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettlePoint {
    pub first: f64,
    pub second: f64,
}

impl SettlePoint {
    pub fn new(first: f64, second: f64) -> Self {
        Self { first, second }
    }
}

impl From<EquatorialPosition> for SettlePoint {
    fn from(p: EquatorialPosition) -> Self {
        Self::new(p.ra_hours, p.dec_degrees)
    }
}

impl From<HorizontalPosition> for SettlePoint {
    fn from(p: HorizontalPosition) -> Self {
        Self::new(p.azimuth_degrees, p.altitude_degrees)
    }
}

impl From<MotorCount> for SettlePoint {
    fn from(c: MotorCount) -> Self {
        Self::new(f64::from(c.ra), f64::from(c.dec))
    }
}

/// Frame compared between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleFrame {
    /// RA/Dec readings; fixed once tracking resumes after a slew.
    Equatorial,
    /// Az/Alt readings, for controllers parking in the horizontal frame.
    Horizontal,
    /// Raw encoder counts, for controllers parking to a home position.
    Counts,
    /// No position comparison: settled once the device reports no active slew.
    /// Without a slew report this falls back to equatorial readings.
    Reported,
}

/// One poll of the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub equatorial: EquatorialPosition,
    pub horizontal: Option<HorizontalPosition>,
    pub pier_side: PierSide,
    pub counts: Option<MotorCount>,
    /// Device-reported slew status, when available.
    pub slewing: Option<bool>,
}

impl PositionSample {
    /// Value compared for settle detection; falls back to equatorial when the
    /// requested frame was not read.
    pub fn settle_point(&self, frame: SettleFrame) -> SettlePoint {
        match frame {
            SettleFrame::Horizontal => self
                .horizontal
                .map_or_else(|| self.equatorial.into(), SettlePoint::from),
            SettleFrame::Counts => self
                .counts
                .map_or_else(|| self.equatorial.into(), SettlePoint::from),
            SettleFrame::Equatorial | SettleFrame::Reported => self.equatorial.into(),
        }
    }
}

/// Whether both axes moved by no more than `tolerance` between polls.
pub fn has_settled(current: SettlePoint, previous: SettlePoint, tolerance: f64) -> bool {
    (current.first - previous.first).abs() <= tolerance
        && (current.second - previous.second).abs() <= tolerance
}

/// Last-known position and settle state.
#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    tolerance: f64,
    last_known: Option<EquatorialPosition>,
    last_sample: Option<PositionSample>,
    settle: Option<SettlePoint>,
}

impl PositionTracker {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.max(0.0),
            ..Default::default()
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Read position, pier side and slew status from the device.
    ///
    /// Any failure is reported as [`MountError::Telemetry`] and leaves the
    /// last-known position untouched.
    pub async fn poll(
        &mut self,
        protocol: &dyn MountProtocol,
        sky: &SkyContext,
        want_horizontal: bool,
    ) -> MountResult<PositionSample> {
        let reading = protocol
            .read_position(sky)
            .await
            .map_err(MountError::into_telemetry)?;

        let horizontal = if want_horizontal {
            protocol
                .read_horizontal()
                .await
                .map_err(MountError::into_telemetry)?
        } else {
            None
        };

        let pier_side = match reading.pier_side {
            Some(side) => side,
            None => protocol
                .read_pier_side(sky)
                .await
                .map_err(MountError::into_telemetry)?,
        };

        let slewing = protocol
            .is_slewing()
            .await
            .map_err(MountError::into_telemetry)?;

        let sample = PositionSample {
            equatorial: reading.equatorial,
            horizontal,
            pier_side,
            counts: reading.counts,
            slewing,
        };
        trace!(position = %sample.equatorial, %pier_side, ?slewing, "Polled mount position");

        self.last_known = Some(sample.equatorial);
        self.last_sample = Some(sample);
        Ok(sample)
    }

    /// Compare `sample` with the previous settle sample and replace it.
    ///
    /// Returns `true` when the mount has settled. A device that still reports an
    /// active slew never settles, and the first sample after a reset only seeds.
    pub fn observe(&mut self, sample: &PositionSample, frame: SettleFrame) -> bool {
        let current = sample.settle_point(frame);
        let previous = self.settle.replace(current);

        let Some(previous) = previous else {
            return false;
        };
        let settled = match (frame, sample.slewing) {
            (_, Some(true)) => return false,
            (SettleFrame::Reported, Some(false)) => true,
            _ => has_settled(current, previous, self.tolerance),
        };
        if settled {
            trace!(?frame, ?current, "Mount settled");
        }
        settled
    }

    /// Seed the settle sample, e.g. with the commanded target.
    pub fn seed(&mut self, point: SettlePoint) {
        self.settle = Some(point);
    }

    /// Forget the settle sample on leaving Slewing or Parking.
    pub fn clear_settle(&mut self) {
        self.settle = None;
    }

    pub fn is_seeded(&self) -> bool {
        self.settle.is_some()
    }

    /// Overwrite the last-known position, e.g. after a sync.
    pub fn set_last_known(&mut self, position: EquatorialPosition) {
        self.last_known = Some(position);
    }

    pub fn last_known(&self) -> Option<EquatorialPosition> {
        self.last_known
    }

    pub fn last_sample(&self) -> Option<&PositionSample> {
        self.last_sample.as_ref()
    }

    /// Log and keep the last-known position after a failed poll.
    pub fn note_failure(&self, err: &MountError) {
        warn!(error = %err, last_known = ?self.last_known, "Position poll failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ra: f64, dec: f64) -> PositionSample {
        PositionSample {
            equatorial: EquatorialPosition::new(ra, dec),
            horizontal: None,
            pier_side: PierSide::West,
            counts: None,
            slewing: None,
        }
    }

    #[test]
    fn zero_tolerance_is_exact_equality() {
        let a = SettlePoint::new(5.0, 20.0);
        assert!(has_settled(a, a, 0.0));
        assert!(!has_settled(SettlePoint::new(5.0, 20.000_001), a, 0.0));
        assert!(has_settled(SettlePoint::new(5.0, 20.000_001), a, 1e-5));
    }

    #[test]
    fn first_sample_only_seeds() {
        let mut tracker = PositionTracker::new(0.0);
        assert!(!tracker.observe(&sample(1.0, 2.0), SettleFrame::Equatorial));
        assert!(tracker.observe(&sample(1.0, 2.0), SettleFrame::Equatorial));
    }

    #[test]
    fn moving_mount_does_not_settle() {
        let mut tracker = PositionTracker::new(0.0);
        tracker.seed(SettlePoint::new(3.0, 40.0));
        assert!(!tracker.observe(&sample(1.0, 2.0), SettleFrame::Equatorial));
        assert!(!tracker.observe(&sample(1.5, 2.0), SettleFrame::Equatorial));
        assert!(tracker.observe(&sample(1.5, 2.0), SettleFrame::Equatorial));
    }

    #[test]
    fn seeded_target_settles_on_first_matching_poll() {
        let mut tracker = PositionTracker::new(0.0);
        tracker.seed(EquatorialPosition::new(1.0, 2.0).into());
        assert!(tracker.observe(&sample(1.0, 2.0), SettleFrame::Equatorial));
    }

    #[test]
    fn device_slew_flag_blocks_settle() {
        let mut tracker = PositionTracker::new(0.0);
        let mut s = sample(1.0, 2.0);
        s.slewing = Some(true);
        tracker.seed(s.settle_point(SettleFrame::Equatorial));
        assert!(!tracker.observe(&s, SettleFrame::Equatorial));
        s.slewing = Some(false);
        assert!(tracker.observe(&s, SettleFrame::Equatorial));
    }

    #[test]
    fn reported_frame_ignores_moving_readout() {
        let mut tracker = PositionTracker::new(0.0);
        tracker.seed(SettlePoint::new(8.0, 20.0));
        let mut s = sample(8.0005, 20.0);
        s.slewing = Some(true);
        assert!(!tracker.observe(&s, SettleFrame::Reported));
        s.slewing = Some(false);
        s.equatorial.ra_hours = 8.0008;
        assert!(tracker.observe(&s, SettleFrame::Reported));

        // The same readings never settle on positions
        let mut tracker = PositionTracker::new(0.0);
        tracker.seed(SettlePoint::new(8.0, 20.0));
        assert!(!tracker.observe(&sample(8.0005, 20.0), SettleFrame::Equatorial));
        assert!(!tracker.observe(&sample(8.0008, 20.0), SettleFrame::Equatorial));
    }

    #[test]
    fn reported_frame_without_slew_report_compares_positions() {
        let mut tracker = PositionTracker::new(0.0);
        tracker.seed(SettlePoint::new(8.0, 20.0));
        assert!(!tracker.observe(&sample(7.0, 20.0), SettleFrame::Reported));
        assert!(tracker.observe(&sample(7.0, 20.0), SettleFrame::Reported));
    }

    #[test]
    fn settle_frame_selects_reading() {
        let mut s = sample(1.0, 2.0);
        assert_eq!(s.settle_point(SettleFrame::Counts), SettlePoint::new(1.0, 2.0));
        s.counts = Some(MotorCount::new(10, -20));
        assert_eq!(s.settle_point(SettleFrame::Counts), SettlePoint::new(10.0, -20.0));
        s.horizontal = Some(HorizontalPosition::new(180.0, 40.0));
        assert_eq!(s.settle_point(SettleFrame::Horizontal), SettlePoint::new(180.0, 40.0));
        assert_eq!(s.settle_point(SettleFrame::Equatorial), SettlePoint::new(1.0, 2.0));
    }

    #[test]
    fn clear_settle_resets() {
        let mut tracker = PositionTracker::new(0.0);
        tracker.seed(SettlePoint::new(1.0, 2.0));
        tracker.clear_settle();
        assert!(!tracker.is_seeded());
        assert!(!tracker.observe(&sample(1.0, 2.0), SettleFrame::Equatorial));
    }
}
