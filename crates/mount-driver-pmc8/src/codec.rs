//! PMC-Eight `ES` frames.
//!
//! Every command starts with `ES`, carries an axis digit (0 = RA, 1 = Dec) and
//! ends with `!`. The controller echoes each set command with `G` in place of
//! the verb, so replies are checked byte for byte against the expected echo.
//!
//! | Command           | Reply             | Bytes | Meaning                 |
//! |-------------------|-------------------|-------|-------------------------|
//! | `ESGv!`           | `ESGvES06B9T9!`   | var   | firmware version        |
//! | `ESGp{a}!`        | `ESGp{a}XXXXXX!`  | 12    | axis position           |
//! | `ESSp{a}XXXXXX!`  | `ESGp{a}XXXXXX!`  | 12    | set position (sync)     |
//! | `ESPt{a}XXXXXX!`  | `ESGt{a}XXXXXX!`  | 12    | move to target (goto)   |
//! | `ESGr{a}!`        | `ESGr{a}XXXX!`    | 10    | axis motor rate         |
//! | `ESSr{a}XXXX!`    | `ESGr{a}XXXX!`    | 10    | axis move rate          |
//! | `ESTr XXXX!`      | `ESGrXXXX!`       | 9     | RA tracking rate        |
//! | `ESGd{a}!`        | `ESGd{a}D!`       | 7     | axis direction          |
//! | `ESSd{a}D!`       | `ESGd{a}D!`       | 7     | set axis direction      |
//!
//! Positions are 24-bit two's-complement counts sent as six hex digits.

use mount_core::coords::axis_position_to_motor;
use mount_core::error::{MountError, MountResult};
use mount_core::protocol::Codec;
use mount_core::transport::{Exchange, Reply};
use mount_core::types::{Axis, AxisScale, Direction, ARCSEC_IN_CIRCLE};

pub const TERMINATOR: u8 = b'!';

/// Counts per revolution on both axes.
pub const AXIS_SCALE: AxisScale = AxisScale::PMC8;

/// Largest precise (tracking) motor rate.
pub const MAX_PRECISE_MOTOR_RATE: i32 = 2641;

/// Largest move rate, 256x sidereal in move units.
pub const MAX_MOVE_MOTOR_RATE: i32 = 256 * 15;

/// Axis motor rate above which the mount is slewing. Sidereal is 53.
pub const MIN_SLEW_RATE: u32 = 55;

/// Jog speeds in sidereal multiples.
pub const MOVE_RATES: [f64; 4] = [4.0, 16.0, 64.0, 256.0];

/// Version reply prefix of a PMC-Eight controller.
pub const VERSION_PREFIX: &[u8] = b"ESGvES";

/// Motor counts per arcsecond.
fn counts_per_arcsec() -> f64 {
    AXIS_SCALE.ra / ARCSEC_IN_CIRCLE
}

// =============================================================================
// Two's-complement hex
// =============================================================================

/// Eight-digit two's-complement hex of `value`.
pub fn hex_encode(value: i32) -> String {
    let bits = if value < 0 {
        (!value.unsigned_abs()).wrapping_add(1)
    } else {
        value.unsigned_abs()
    };
    format!("{:08X}", bits)
}

/// Inverse of [`hex_encode`]; accepts up to eight hex digits.
pub fn hex_decode(text: &str) -> MountResult<i32> {
    if text.is_empty() || text.len() > 8 {
        return Err(MountError::Protocol(format!("bad hex field {:?}", text)));
    }
    u32::from_str_radix(text, 16)
        .map(|bits| bits as i32)
        .map_err(|_| MountError::Protocol(format!("bad hex field {:?}", text)))
}

/// Six-digit position field: the low 24 bits of the two's-complement value.
pub fn position_field(counts: i32) -> String {
    hex_encode(counts)[2..].to_string()
}

/// Decode a six-digit position field into signed counts.
pub fn decode_position_field(text: &str) -> MountResult<i32> {
    if text.len() != 6 {
        return Err(MountError::Protocol(format!("bad position field {:?}", text)));
    }
    let raw = hex_decode(text)?;
    Ok(axis_position_to_motor(raw as u32))
}

// =============================================================================
// Rate conversion
// =============================================================================

/// Tracking rate in arcsec/s to the precise motor rate, truncated and clamped.
pub fn precise_rate_to_motor(arcsec_per_sec: f64) -> i32 {
    let rate = (25.0 * arcsec_per_sec * counts_per_arcsec()) as i32;
    rate.clamp(-MAX_PRECISE_MOTOR_RATE, MAX_PRECISE_MOTOR_RATE)
}

/// Move rate in arcsec/s to the move motor rate, truncated and clamped.
pub fn move_rate_to_motor(arcsec_per_sec: f64) -> i32 {
    let rate = (arcsec_per_sec * counts_per_arcsec()) as i32;
    rate.clamp(-MAX_MOVE_MOTOR_RATE, MAX_MOVE_MOTOR_RATE)
}

/// Jog speed for a move rate index, arcsec/s.
pub fn jog_rate(index: usize) -> Option<f64> {
    MOVE_RATES.get(index).map(|multiple| multiple * 15.0)
}

/// Direction digit: 1 for positive rates, 0 for negative.
fn direction_digit(rate: i32) -> u8 {
    if rate < 0 {
        0
    } else {
        1
    }
}

fn rate_field(rate: i32) -> String {
    format!("{:04X}", rate.unsigned_abs().min(0xFFFF))
}

// =============================================================================
// Frames
// =============================================================================

fn echo(command: String, reply: String) -> Exchange {
    let len = reply.len();
    Exchange::new(command, Reply::framed(TERMINATOR, len)).expecting(reply)
}

/// Stateless PMC-Eight frame builder and parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pmc8Codec;

impl Pmc8Codec {
    pub fn get_version(&self) -> Exchange {
        Exchange::new("ESGv!", Reply::until(TERMINATOR))
    }

    /// Board firmware from a version reply, e.g. `06B9T9` from `ESGvES06B9T9!`.
    pub fn decode_version(&self, response: &[u8]) -> MountResult<String> {
        if !response.starts_with(VERSION_PREFIX) || response.len() != 13 {
            return Err(MountError::Protocol(format!(
                "not a PMC-Eight version reply: {:?}",
                String::from_utf8_lossy(response)
            )));
        }
        Ok(String::from_utf8_lossy(&response[6..12]).into_owned())
    }

    /// Move `axis` to `counts`. Motion starts immediately.
    pub fn encode_target_position(&self, axis: Axis, counts: i32) -> Exchange {
        let field = position_field(counts);
        echo(
            format!("ESPt{}{}!", axis.index(), field),
            format!("ESGt{}{}!", axis.index(), field),
        )
    }

    pub fn encode_set_direction(&self, axis: Axis, direction: u8) -> Exchange {
        echo(
            format!("ESSd{}{}!", axis.index(), direction),
            format!("ESGd{}{}!", axis.index(), direction),
        )
    }

    pub fn encode_get_direction(&self, axis: Axis) -> Exchange {
        Exchange::new(format!("ESGd{}!", axis.index()), Reply::framed(TERMINATOR, 7))
    }

    pub fn decode_direction(&self, axis: Axis, response: &[u8]) -> MountResult<u8> {
        self.check_prefix("direction", axis, b"ESGd", response, 7)?;
        match response[5] {
            b'0' => Ok(0),
            b'1' => Ok(1),
            _ => Err(malformed("direction", response)),
        }
    }

    /// Move rate for one axis in move motor units, sign selecting the direction.
    pub fn encode_move_rate(&self, axis: Axis, motor_rate: i32) -> Vec<Exchange> {
        let field = rate_field(motor_rate);
        vec![
            self.encode_set_direction(axis, direction_digit(motor_rate)),
            echo(
                format!("ESSr{}{}!", axis.index(), field),
                format!("ESGr{}{}!", axis.index(), field),
            ),
        ]
    }

    /// RA tracking rate in precise motor units, sign selecting the direction.
    pub fn encode_track_rate(&self, motor_rate: i32) -> Vec<Exchange> {
        vec![
            Exchange::new(
                format!("ESTr{}!", rate_field(motor_rate)),
                Reply::framed(TERMINATOR, 9),
            ),
            self.encode_set_direction(Axis::Ra, direction_digit(motor_rate)),
        ]
    }

    /// Stop move motion on both axes.
    pub fn encode_stop_all(&self) -> Vec<Exchange> {
        let mut frames = self.encode_move_rate(Axis::Ra, 0);
        frames.extend(self.encode_move_rate(Axis::Dec, 0));
        frames
    }

    fn check_prefix(
        &self,
        what: &str,
        axis: Axis,
        prefix: &[u8],
        response: &[u8],
        len: usize,
    ) -> MountResult<()> {
        if response.len() != len {
            return Err(MountError::Protocol(format!(
                "{} reply has {} bytes, expected {}: {:?}",
                what,
                response.len(),
                len,
                String::from_utf8_lossy(response)
            )));
        }
        if !response.starts_with(prefix)
            || response[4] != b'0' + axis.index()
            || response[len - 1] != TERMINATOR
        {
            return Err(malformed(what, response));
        }
        Ok(())
    }
}

fn malformed(what: &str, response: &[u8]) -> MountError {
    MountError::Protocol(format!(
        "malformed {} reply {:?}",
        what,
        String::from_utf8_lossy(response)
    ))
}

impl Codec for Pmc8Codec {
    /// Signed motor counts.
    type AxisValue = i32;
    /// Axis motor rate in move units.
    type Status = u32;

    fn terminator(&self) -> u8 {
        TERMINATOR
    }

    /// Overwrite the axis position register (sync).
    fn encode_set_position(&self, axis: Axis, counts: i32) -> Exchange {
        let field = position_field(counts);
        echo(
            format!("ESSp{}{}!", axis.index(), field),
            format!("ESGp{}{}!", axis.index(), field),
        )
    }

    fn encode_get_position(&self, axis: Axis) -> Exchange {
        Exchange::new(format!("ESGp{}!", axis.index()), Reply::framed(TERMINATOR, 12))
    }

    /// RA only; the controller has no Dec tracking.
    fn encode_set_rate(&self, axis: Axis, rate: f64) -> Vec<Exchange> {
        match axis {
            Axis::Ra => self.encode_track_rate(precise_rate_to_motor(rate)),
            Axis::Dec => Vec::new(),
        }
    }

    fn encode_motion_start(&self, direction: Direction, rate_index: usize) -> Vec<Exchange> {
        let speed = move_rate_to_motor(jog_rate(rate_index).unwrap_or(0.0));
        let rate = match direction {
            Direction::North | Direction::West => speed,
            Direction::South | Direction::East => -speed,
        };
        self.encode_move_rate(direction.axis(), rate)
    }

    fn encode_motion_stop(&self, direction: Direction) -> Vec<Exchange> {
        self.encode_move_rate(direction.axis(), 0)
    }

    fn decode_position(&self, axis: Axis, response: &[u8]) -> MountResult<i32> {
        self.check_prefix("position", axis, b"ESGp", response, 12)?;
        decode_position_field(&String::from_utf8_lossy(&response[5..11]))
    }

    fn encode_get_status(&self, axis: Axis) -> Exchange {
        Exchange::new(format!("ESGr{}!", axis.index()), Reply::framed(TERMINATOR, 10))
    }

    fn decode_status(&self, axis: Axis, response: &[u8]) -> MountResult<u32> {
        self.check_prefix("rate", axis, b"ESGr", response, 10)?;
        hex_decode(&String::from_utf8_lossy(&response[5..9])).map(|rate| rate as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mount_core::types::SIDEREAL_RATE;

    #[test]
    fn hex_round_trip_edges() {
        for value in [0, 1, -1, 768_000, -768_000, 4_608_000, -4_608_000, i32::MAX, i32::MIN] {
            assert_eq!(hex_decode(&hex_encode(value)).unwrap(), value, "value {}", value);
        }
        assert_eq!(hex_encode(0), "00000000");
        assert_eq!(hex_encode(-1), "FFFFFFFF");
        assert_eq!(hex_encode(-768_000), "FFF44800");
    }

    #[test]
    fn position_field_is_24_bit() {
        assert_eq!(position_field(-768_000), "F44800");
        assert_eq!(position_field(-896_000), "F25400");
        assert_eq!(decode_position_field("F44800").unwrap(), -768_000);
        assert_eq!(decode_position_field("000000").unwrap(), 0);
        assert!(decode_position_field("F448").is_err());
        assert!(decode_position_field("F4480G").is_err());
    }

    #[test]
    fn rate_conversion() {
        // Sidereal is 53 in move units, well under the slew threshold
        assert_eq!(move_rate_to_motor(SIDEREAL_RATE), 53);
        assert_eq!(precise_rate_to_motor(SIDEREAL_RATE), 1336);
        assert_eq!(precise_rate_to_motor(1000.0), MAX_PRECISE_MOTOR_RATE);
        assert_eq!(precise_rate_to_motor(-1000.0), -MAX_PRECISE_MOTOR_RATE);
        assert_eq!(move_rate_to_motor(jog_rate(3).unwrap()), MAX_MOVE_MOTOR_RATE);
        assert_eq!(move_rate_to_motor(jog_rate(0).unwrap()), 213);
        assert_eq!(jog_rate(4), None);
    }

    #[test]
    fn target_frame_expects_echo() {
        let ex = Pmc8Codec.encode_target_position(Axis::Ra, -768_000);
        assert_eq!(ex.command, b"ESPt0F44800!");
        assert!(ex.verify(b"ESGt0F44800!").is_ok());
        assert!(matches!(ex.verify(b"ESGt0F44801!"), Err(MountError::Protocol(_))));
    }

    #[test]
    fn motion_frames_carry_direction() {
        let north = Pmc8Codec.encode_motion_start(Direction::North, 1);
        assert_eq!(north[0].command, b"ESSd11!");
        assert_eq!(north[1].command, b"ESSr10355!");
        let east = Pmc8Codec.encode_motion_start(Direction::East, 1);
        assert_eq!(east[0].command, b"ESSd00!");
        assert_eq!(east[1].command, b"ESSr00355!");
        let stop = Pmc8Codec.encode_motion_stop(Direction::South);
        assert_eq!(stop[1].command, b"ESSr10000!");
    }

    #[test]
    fn track_rate_frames() {
        let frames = Pmc8Codec.encode_set_rate(Axis::Ra, SIDEREAL_RATE);
        assert_eq!(frames[0].command, b"ESTr0538!");
        assert_eq!(frames[0].reply, Reply::framed(b'!', 9));
        assert_eq!(frames[1].command, b"ESSd01!");
        assert!(Pmc8Codec.encode_set_rate(Axis::Dec, 5.0).is_empty());

        let reverse = Pmc8Codec.encode_track_rate(-100);
        assert_eq!(reverse[0].command, b"ESTr0064!");
        assert_eq!(reverse[1].command, b"ESSd00!");
    }

    #[test]
    fn decodes_replies() {
        assert_eq!(Pmc8Codec.decode_position(Axis::Dec, b"ESGp1F25400!").unwrap(), -896_000);
        assert!(Pmc8Codec.decode_position(Axis::Ra, b"ESGp1F25400!").is_err());
        assert!(Pmc8Codec.decode_position(Axis::Ra, b"ESGp0F254!").is_err());
        assert_eq!(Pmc8Codec.decode_status(Axis::Ra, b"ESGr00035!").unwrap(), 53);
        assert_eq!(Pmc8Codec.decode_direction(Axis::Ra, b"ESGd01!").unwrap(), 1);
        assert_eq!(
            Pmc8Codec.decode_version(b"ESGvES06B9T9!").unwrap(),
            "06B9T9"
        );
        assert!(Pmc8Codec.decode_version(b"ESGv1234!").is_err());
    }
}
