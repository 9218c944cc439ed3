//! Simulated Astro-Physics controller.
//!
//! Answers the LX200 subset the driver uses. A slew moves the reported position
//! a fraction of the way to the target on every position read and lands exactly
//! on it after [`ApSimulator::slew_polls`] reads, so settle detection sees two
//! identical readings once the mount arrives.

use crate::codec::{format_dec, format_ra, parse_ra, parse_signed_degrees};
use mount_core::error::{MountError, MountResult};
use mount_core::sim::SimulatedDevice;
use mount_core::types::{EquatorialPosition, HorizontalPosition, PierSide};

/// Frame of the pending or running slew.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlewFrame {
    Equatorial,
    Horizontal,
}

/// In-memory GTO controller.
#[derive(Debug, Clone)]
pub struct ApSimulator {
    /// `:V#` reply body
    pub version: String,
    /// Long (`HH:MM:SS`) or short (`HH:MM.T`) coordinate format
    pub long_format: bool,
    pub parked: bool,
    /// Answer `:MS#` with a refusal
    pub reject_slews: bool,
    pub pier_side: PierSide,
    /// Position reads per slew
    pub slew_polls: u32,
    /// `:RTn#` index last selected
    pub tracking_mode: Option<u8>,
    pub move_rate: Option<u8>,
    pub goto_rate: Option<u8>,
    pub guide_rate: Option<u8>,
    pub swapped_north_south: bool,
    pub swapped_east_west: bool,
    /// Last guide pulse, direction letter and milliseconds
    pub last_pulse: Option<(char, u32)>,

    equatorial: EquatorialPosition,
    horizontal: HorizontalPosition,
    object: EquatorialPosition,
    object_horizontal: HorizontalPosition,
    pending: SlewFrame,
    slew: Option<(SlewFrame, u32)>,
}

impl Default for ApSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ApSimulator {
    /// A GTOCP4 that has just been powered on: RA 0, Dec 90.
    pub fn new() -> Self {
        Self {
            version: "VCP4-P01-01".to_string(),
            long_format: true,
            parked: false,
            reject_slews: false,
            pier_side: PierSide::West,
            slew_polls: 2,
            tracking_mode: None,
            move_rate: None,
            goto_rate: None,
            guide_rate: None,
            swapped_north_south: false,
            swapped_east_west: false,
            last_pulse: None,
            equatorial: EquatorialPosition::new(0.0, 90.0),
            horizontal: HorizontalPosition::new(0.0, 0.0),
            object: EquatorialPosition::new(0.0, 90.0),
            object_horizontal: HorizontalPosition::new(0.0, 0.0),
            pending: SlewFrame::Equatorial,
            slew: None,
        }
    }

    /// Jump to `ra`/`dec` without slewing.
    pub fn set_position(&mut self, ra_hours: f64, dec_degrees: f64) {
        self.equatorial = EquatorialPosition::new(ra_hours, dec_degrees);
        self.slew = None;
    }

    pub fn position(&self) -> EquatorialPosition {
        self.equatorial
    }

    pub fn horizontal(&self) -> HorizontalPosition {
        self.horizontal
    }

    pub fn is_slewing(&self) -> bool {
        self.slew.is_some()
    }

    /// Advance a running slew in `frame` by one read.
    fn step(&mut self, frame: SlewFrame) {
        let Some((slew_frame, remaining)) = self.slew else {
            return;
        };
        if slew_frame != frame {
            return;
        }

        let fraction = 1.0 / f64::from(remaining.max(1));
        match frame {
            SlewFrame::Equatorial => {
                let cur = self.equatorial;
                self.equatorial = EquatorialPosition::new(
                    cur.ra_hours + (self.object.ra_hours - cur.ra_hours) * fraction,
                    cur.dec_degrees + (self.object.dec_degrees - cur.dec_degrees) * fraction,
                );
            }
            SlewFrame::Horizontal => {
                let cur = self.horizontal;
                let target = self.object_horizontal;
                self.horizontal = HorizontalPosition::new(
                    cur.azimuth_degrees + (target.azimuth_degrees - cur.azimuth_degrees) * fraction,
                    cur.altitude_degrees
                        + (target.altitude_degrees - cur.altitude_degrees) * fraction,
                );
            }
        }

        self.slew = if remaining <= 1 {
            None
        } else {
            Some((frame, remaining - 1))
        };
    }

    fn ra_reply(&self) -> Vec<u8> {
        if self.long_format {
            format!("{}#", format_ra(self.equatorial.ra_hours)).into_bytes()
        } else {
            let tenths = (self.equatorial.ra_hours * 600.0).round() as u64;
            format!(
                "{:02}:{:02}.{}#",
                (tenths / 600) % 24,
                (tenths % 600) / 10,
                tenths % 10
            )
            .into_bytes()
        }
    }

    fn azimuth_reply(&self) -> Vec<u8> {
        let total = (self.horizontal.azimuth_degrees * 3600.0).round() as u64;
        format!(
            "{:03}*{:02}:{:02}#",
            (total / 3600) % 360,
            (total % 3600) / 60,
            total % 60
        )
        .into_bytes()
    }
}

fn field(command: &str, prefix: &str) -> MountResult<String> {
    command
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix('#'))
        .map(|f| f.trim().to_string())
        .ok_or_else(|| MountError::Protocol(format!("simulator: malformed command {}", command)))
}

/// `DDD*MM` or `sDD*MM`
fn parse_degrees_minutes(text: &str) -> MountResult<f64> {
    let bad = || MountError::Protocol(format!("simulator: bad angle {}", text));
    let (negative, body) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let (deg, min) = body.split_once('*').ok_or_else(bad)?;
    let value = deg.parse::<f64>().map_err(|_| bad())? + min.parse::<f64>().map_err(|_| bad())? / 60.0;
    Ok(if negative { -value } else { value })
}

fn single_digit(command: &str, prefix: &str) -> MountResult<u8> {
    field(command, prefix)?
        .parse::<u8>()
        .map_err(|_| MountError::Protocol(format!("simulator: bad index in {}", command)))
}

impl SimulatedDevice for ApSimulator {
    fn respond(&mut self, command: &[u8]) -> MountResult<Vec<u8>> {
        let command = String::from_utf8_lossy(command).into_owned();
        let ok = || Ok(b"1".to_vec());
        let none = || Ok(Vec::new());

        match command.as_str() {
            "#" => none(),
            ":V#" => Ok(format!("{}#", self.version).into_bytes()),
            ":U#" => {
                self.long_format = !self.long_format;
                none()
            }
            ":GR#" => {
                self.step(SlewFrame::Equatorial);
                Ok(self.ra_reply())
            }
            ":GD#" => Ok(format!("{}#", format_dec(self.equatorial.dec_degrees)).into_bytes()),
            ":GZ#" => {
                self.step(SlewFrame::Horizontal);
                Ok(self.azimuth_reply())
            }
            ":GA#" => Ok(format!("{}#", format_dec(self.horizontal.altitude_degrees)).into_bytes()),
            ":GOS#" => Ok(if self.parked { b"P0000#".to_vec() } else { b"00000#".to_vec() }),
            ":pS#" => Ok(match self.pier_side {
                PierSide::East => b"East#".to_vec(),
                _ => b"West#".to_vec(),
            }),
            ":MS#" => {
                if self.reject_slews {
                    return Ok(b"1".to_vec());
                }
                self.slew = Some((self.pending, self.slew_polls.max(1)));
                self.parked = false;
                Ok(b"0".to_vec())
            }
            ":CM#" | ":CMR#" => {
                self.equatorial = self.object;
                self.slew = None;
                Ok(b"Coordinates matched.    #".to_vec())
            }
            ":Q#" => {
                self.slew = None;
                none()
            }
            ":Qn#" | ":Qs#" | ":Qe#" | ":Qw#" | ":Mn#" | ":Ms#" | ":Me#" | ":Mw#" => none(),
            ":PO#" => {
                self.parked = false;
                none()
            }
            ":KA#" => {
                self.parked = true;
                self.slew = None;
                none()
            }
            ":NS#" => {
                self.swapped_north_south = !self.swapped_north_south;
                none()
            }
            ":EW#" => {
                self.swapped_east_west = !self.swapped_east_west;
                none()
            }
            c if c.starts_with(":Sr ") => {
                let text = format!("{}#", field(c, ":Sr ")?);
                self.object.ra_hours = parse_ra(text.as_bytes())?;
                self.pending = SlewFrame::Equatorial;
                ok()
            }
            c if c.starts_with(":Sd ") => {
                let text = format!("{}#", field(c, ":Sd ")?);
                self.object.dec_degrees = parse_signed_degrees(text.as_bytes())?;
                self.pending = SlewFrame::Equatorial;
                ok()
            }
            c if c.starts_with(":Sz ") => {
                self.object_horizontal.azimuth_degrees = parse_degrees_minutes(&field(c, ":Sz ")?)?;
                self.pending = SlewFrame::Horizontal;
                ok()
            }
            c if c.starts_with(":Sa ") => {
                self.object_horizontal.altitude_degrees = parse_degrees_minutes(&field(c, ":Sa ")?)?;
                self.pending = SlewFrame::Horizontal;
                ok()
            }
            c if [":Sg ", ":St ", ":SL ", ":SC ", ":SG ", ":Br "]
                .iter()
                .any(|p| c.starts_with(p)) =>
            {
                ok()
            }
            c if c.starts_with(":RR") || c.starts_with(":RD") => {
                let prefix = &c[..3];
                field(c, prefix)?
                    .parse::<f64>()
                    .map_err(|_| MountError::Protocol(format!("simulator: bad rate {}", c)))?;
                ok()
            }
            c if c.starts_with(":RT") => {
                self.tracking_mode = Some(single_digit(c, ":RT")?);
                none()
            }
            c if c.starts_with(":RC") => {
                self.move_rate = Some(single_digit(c, ":RC")?);
                none()
            }
            c if c.starts_with(":RS") => {
                self.goto_rate = Some(single_digit(c, ":RS")?);
                none()
            }
            c if c.starts_with(":RG") => {
                self.guide_rate = Some(single_digit(c, ":RG")?);
                none()
            }
            c if c.len() == 7 && c.starts_with(":M") => {
                let direction = c[2..3].chars().next().unwrap_or('?');
                let millis = c[3..6]
                    .parse::<u32>()
                    .map_err(|_| MountError::Protocol(format!("simulator: bad pulse {}", c)))?;
                self.last_pulse = Some((direction, millis));
                none()
            }
            other => Err(MountError::Protocol(format!(
                "simulator: unknown command {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(sim: &mut ApSimulator, command: &str) -> String {
        String::from_utf8(sim.respond(command.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn slew_lands_on_target() {
        let mut sim = ApSimulator::new();
        sim.set_position(2.0, 10.0);
        assert_eq!(send(&mut sim, ":Sr 05:30:00#"), "1");
        assert_eq!(send(&mut sim, ":Sd -05*24:00#"), "1");
        assert_eq!(send(&mut sim, ":MS#"), "0");
        assert!(sim.is_slewing());

        let first = send(&mut sim, ":GR#");
        assert_ne!(first, "05:30:00#");
        assert_eq!(send(&mut sim, ":GR#"), "05:30:00#");
        assert_eq!(send(&mut sim, ":GD#"), "-05*24:00#");
        assert!(!sim.is_slewing());
        assert_eq!(send(&mut sim, ":GR#"), "05:30:00#");
    }

    #[test]
    fn horizontal_slew_and_park() {
        let mut sim = ApSimulator::new();
        send(&mut sim, ":Sz 180*30#");
        send(&mut sim, ":Sa +40*00#");
        send(&mut sim, ":MS#");
        send(&mut sim, ":GZ#");
        assert_eq!(send(&mut sim, ":GZ#"), "180*30:00#");
        assert_eq!(send(&mut sim, ":GA#"), "+40*00:00#");
        send(&mut sim, ":KA#");
        assert_eq!(send(&mut sim, ":GOS#"), "P0000#");
    }

    #[test]
    fn short_format_and_toggle() {
        let mut sim = ApSimulator::new();
        sim.long_format = false;
        sim.set_position(5.5, 0.0);
        assert_eq!(send(&mut sim, ":GR#"), "05:30.0#");
        send(&mut sim, ":U#");
        assert_eq!(send(&mut sim, ":GR#"), "05:30:00#");
    }

    #[test]
    fn records_modes_and_pulses() {
        let mut sim = ApSimulator::new();
        send(&mut sim, ":RT9#");
        send(&mut sim, ":RG2#");
        send(&mut sim, ":Mw250#");
        assert_eq!(sim.tracking_mode, Some(9));
        assert_eq!(sim.guide_rate, Some(2));
        assert_eq!(sim.last_pulse, Some(('w', 250)));
        assert!(sim.respond(b":XYZ#").is_err());
    }
}
