//! Firmware quirks.
//!
//! Some controllers forget the configured guide rate after a jog or slew and
//! fall back to the last motion rate. [`GuideRateQuirk`] tracks whether motion
//! happened since the last guide pulse and re-asserts the guide rate first.

use crate::error::MountResult;
use crate::protocol::MountProtocol;
use crate::types::{FirmwareInfo, RateKind};
use tracing::debug;

/// Guide-rate re-assertion state, fixed for the session at handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuideRateQuirk {
    enabled: bool,
    motion_commanded: bool,
}

impl GuideRateQuirk {
    pub fn new(firmware: &FirmwareInfo) -> Self {
        Self {
            enabled: firmware.resets_guide_rate_after_motion,
            motion_commanded: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn motion_commanded(&self) -> bool {
        self.motion_commanded
    }

    /// Record a jog or slew.
    pub fn note_motion(&mut self) {
        self.motion_commanded = true;
    }

    /// Run before every pulse guide.
    ///
    /// On affected firmware with motion since the last guide, re-sends the
    /// guide rate. The flag is cleared only after the rate was accepted.
    pub async fn before_pulse(
        &mut self,
        protocol: &dyn MountProtocol,
        guide_rate_index: usize,
    ) -> MountResult<()> {
        if self.enabled && self.motion_commanded {
            debug!(guide_rate_index, "Re-asserting guide rate after motion");
            protocol.set_rate(RateKind::Guide, guide_rate_index).await?;
        }
        self.motion_commanded = false;
        Ok(())
    }
}
