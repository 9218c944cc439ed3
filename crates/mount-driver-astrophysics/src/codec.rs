//! LX200 frames as spoken by Astro-Physics GTO controllers.
//!
//! Positions travel as sexagesimal fields, replies end in `#`. Set commands are
//! acknowledged with a single `1` and no terminator; motion and mode commands
//! have no reply at all.
//!
//! | Command              | Reply           | Bytes |
//! |----------------------|-----------------|-------|
//! | `:Sr HH:MM:SS#`      | `1`             | 1     |
//! | `:Sd sDD*MM:SS#`     | `1`             | 1     |
//! | `:GR#`               | `HH:MM:SS#`     | 9     |
//! | `:GD#` / `:GA#`      | `sDD*MM:SS#`    | 10    |
//! | `:GZ#`               | `DDD*MM:SS#`    | 10    |
//! | `:MS#`               | `0` or `1<why>#`| 1     |
//! | `:pS#`               | `East#`/`West#` | 5     |
//! | `:V#`, `:GOS#`, `:CM#` | text `#`      | var   |

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use mount_core::error::{MountError, MountResult};
use mount_core::protocol::Codec;
use mount_core::transport::{Exchange, Reply};
use mount_core::types::{Axis, Direction, PierSide, RateKind, SyncMode, TrackMode, SIDEREAL_RATE};

pub const TERMINATOR: u8 = b'#';

/// Longest pulse the controller accepts, milliseconds.
pub const MAX_PULSE_MS: u64 = 999;

/// Jog rates selected with `:RCn#`, sidereal multiples.
pub const MOVE_RATES: [f64; 4] = [12.0, 64.0, 600.0, 1200.0];
/// Slew rates selected with `:RSn#`, sidereal multiples.
pub const GOTO_RATES: [f64; 3] = [600.0, 900.0, 1200.0];
/// Guide rates selected with `:RGn#`, sidereal multiples.
pub const GUIDE_RATES: [f64; 3] = [0.25, 0.5, 1.0];

const ACK: &[u8] = b"1";

/// Stateless Astro-Physics frame builder and parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApCodec;

// =============================================================================
// Sexagesimal formatting
// =============================================================================

/// Split `value` into whole units, minutes and seconds, rounded to the second.
fn split_seconds(value: f64) -> (u64, u64, u64) {
    let total = (value.abs() * 3600.0).round() as u64;
    (total / 3600, (total % 3600) / 60, total % 60)
}

/// Split `value` into whole units and minutes, rounded to the minute.
fn split_minutes(value: f64) -> (u64, u64) {
    let total = (value.abs() * 60.0).round() as u64;
    (total / 60, total % 60)
}

fn sign(value: f64) -> char {
    if value < 0.0 {
        '-'
    } else {
        '+'
    }
}

/// `HH:MM:SS`, wrapping 24h to 00.
pub fn format_ra(hours: f64) -> String {
    let (h, m, s) = split_seconds(hours);
    format!("{:02}:{:02}:{:02}", h % 24, m, s)
}

/// `sDD*MM:SS`
pub fn format_dec(degrees: f64) -> String {
    let (d, m, s) = split_seconds(degrees);
    format!("{}{:02}*{:02}:{:02}", sign(degrees), d, m, s)
}

/// `DDD*MM`, wrapping 360° to 000.
pub fn format_azimuth(degrees: f64) -> String {
    let (d, m) = split_minutes(degrees);
    format!("{:03}*{:02}", d % 360, m)
}

/// `sDD*MM`
pub fn format_signed_degrees(degrees: f64) -> String {
    let (d, m) = split_minutes(degrees);
    format!("{}{:02}*{:02}", sign(degrees), d, m)
}

/// Sidereal-multiple rate field, `±n.nnnn`.
pub fn format_rate(multiple: f64) -> String {
    // Avoid "-0.0000"
    let multiple = if multiple == 0.0 { 0.0 } else { multiple };
    format!("{:+.4}", multiple)
}

// =============================================================================
// Sexagesimal parsing
// =============================================================================

fn protocol_error(what: &str, response: &[u8]) -> MountError {
    MountError::Protocol(format!(
        "malformed {} reply {:?}",
        what,
        String::from_utf8_lossy(response)
    ))
}

fn check_frame(what: &str, response: &[u8], len: usize) -> MountResult<()> {
    if response.len() != len {
        return Err(MountError::Protocol(format!(
            "{} reply has {} bytes, expected {}: {:?}",
            what,
            response.len(),
            len,
            String::from_utf8_lossy(response)
        )));
    }
    if response[len - 1] != TERMINATOR {
        return Err(protocol_error(what, response));
    }
    Ok(())
}

fn digits(what: &str, response: &[u8], range: std::ops::Range<usize>) -> MountResult<f64> {
    let field = &response[range];
    if field.is_empty() || !field.iter().all(u8::is_ascii_digit) {
        return Err(protocol_error(what, response));
    }
    Ok(field
        .iter()
        .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'))
        .into())
}

fn expect_byte(what: &str, response: &[u8], at: usize, allowed: &[u8]) -> MountResult<()> {
    if allowed.contains(&response[at]) {
        Ok(())
    } else {
        Err(protocol_error(what, response))
    }
}

/// Degree separator: `*` or the controller's 0xDF degree glyph.
const DEGREE_SEPARATORS: &[u8] = &[b'*', 0xDF];
/// Minute separator: `:` or `'`.
const MINUTE_SEPARATORS: &[u8] = &[b':', b'\''];

/// `HH:MM:SS#`
pub fn parse_ra(response: &[u8]) -> MountResult<f64> {
    const WHAT: &str = "right ascension";
    check_frame(WHAT, response, 9)?;
    expect_byte(WHAT, response, 2, b":")?;
    expect_byte(WHAT, response, 5, b":")?;
    let h = digits(WHAT, response, 0..2)?;
    let m = digits(WHAT, response, 3..5)?;
    let s = digits(WHAT, response, 6..8)?;
    if h >= 24.0 || m >= 60.0 || s >= 60.0 {
        return Err(protocol_error(WHAT, response));
    }
    Ok(h + m / 60.0 + s / 3600.0)
}

/// `sDD*MM:SS#`, used for declination and altitude.
pub fn parse_signed_degrees(response: &[u8]) -> MountResult<f64> {
    const WHAT: &str = "signed degrees";
    check_frame(WHAT, response, 10)?;
    let negative = match response[0] {
        b'-' => true,
        b'+' => false,
        _ => return Err(protocol_error(WHAT, response)),
    };
    expect_byte(WHAT, response, 3, DEGREE_SEPARATORS)?;
    expect_byte(WHAT, response, 6, MINUTE_SEPARATORS)?;
    let d = digits(WHAT, response, 1..3)?;
    let m = digits(WHAT, response, 4..6)?;
    let s = digits(WHAT, response, 7..9)?;
    if d > 90.0 || m >= 60.0 || s >= 60.0 {
        return Err(protocol_error(WHAT, response));
    }
    let value = d + m / 60.0 + s / 3600.0;
    Ok(if negative { -value } else { value })
}

/// `DDD*MM:SS#`
pub fn parse_azimuth(response: &[u8]) -> MountResult<f64> {
    const WHAT: &str = "azimuth";
    check_frame(WHAT, response, 10)?;
    expect_byte(WHAT, response, 3, DEGREE_SEPARATORS)?;
    expect_byte(WHAT, response, 6, MINUTE_SEPARATORS)?;
    let d = digits(WHAT, response, 0..3)?;
    let m = digits(WHAT, response, 4..6)?;
    let s = digits(WHAT, response, 7..9)?;
    if d >= 360.0 || m >= 60.0 || s >= 60.0 {
        return Err(protocol_error(WHAT, response));
    }
    Ok(d + m / 60.0 + s / 3600.0)
}

/// Body of a variable-length `#` reply, without the terminator.
pub fn text_reply(response: &[u8]) -> String {
    let body = response.strip_suffix(&[TERMINATOR]).unwrap_or(response);
    String::from_utf8_lossy(body).trim().to_string()
}

// =============================================================================
// Frames
// =============================================================================

fn set_command(command: String) -> Exchange {
    Exchange::new(command, Reply::Exact(1)).expecting(ACK)
}

impl ApCodec {
    /// `#` on its own flushes the controller's command buffer.
    pub fn clear_buffer(&self) -> Exchange {
        Exchange::send("#")
    }

    /// Zero backlash compensation.
    pub fn set_backlash_zero(&self) -> Exchange {
        set_command(":Br 00:00:00#".to_string())
    }

    pub fn get_version(&self) -> Exchange {
        Exchange::new(":V#", Reply::until(TERMINATOR))
    }

    /// Toggle between short and long coordinate formats.
    pub fn toggle_precision(&self) -> Exchange {
        Exchange::send(":U#")
    }

    /// Mount status string, revision T and later.
    pub fn get_status_string(&self) -> Exchange {
        Exchange::new(":GOS#", Reply::until(TERMINATOR))
    }

    /// Raw `:GR#` with a variable-length reply, for the format check.
    pub fn probe_ra_format(&self) -> Exchange {
        Exchange::new(":GR#", Reply::until(TERMINATOR))
    }

    pub fn set_azimuth(&self, degrees: f64) -> Exchange {
        set_command(format!(":Sz {}#", format_azimuth(degrees)))
    }

    pub fn set_altitude(&self, degrees: f64) -> Exchange {
        set_command(format!(":Sa {}#", format_signed_degrees(degrees)))
    }

    pub fn get_azimuth(&self) -> Exchange {
        Exchange::new(":GZ#", Reply::framed(TERMINATOR, 10))
    }

    pub fn get_altitude(&self) -> Exchange {
        Exchange::new(":GA#", Reply::framed(TERMINATOR, 10))
    }

    /// Start the slew to the object set with `:Sr`/`:Sd` or `:Sz`/`:Sa`.
    ///
    /// `0` means accepted; anything else starts an error text.
    pub fn slew(&self) -> Exchange {
        Exchange::new(":MS#", Reply::Exact(1))
    }

    /// Stop all motion.
    pub fn abort(&self) -> Exchange {
        Exchange::send(":Q#")
    }

    pub fn sync(&self, mode: SyncMode) -> Exchange {
        let command = match mode {
            SyncMode::Standard => ":CM#",
            SyncMode::Recalibrate => ":CMR#",
        };
        Exchange::new(command, Reply::until(TERMINATOR))
    }

    /// Tracking preset. Custom tracking uses sidereal plus `:RR`/`:RD` offsets.
    pub fn set_tracking(&self, mode: TrackMode) -> Exchange {
        let index = match mode {
            TrackMode::Lunar => 0,
            TrackMode::Solar => 1,
            TrackMode::Sidereal | TrackMode::Custom => 2,
            TrackMode::Off => 9,
        };
        Exchange::send(format!(":RT{}#", index))
    }

    pub fn select_rate(&self, kind: RateKind, index: usize) -> Exchange {
        let prefix = match kind {
            RateKind::Move => "RC",
            RateKind::Goto => "RS",
            RateKind::Guide => "RG",
        };
        Exchange::send(format!(":{}{}#", prefix, index))
    }

    /// `:PO#`, initialization of a controller without a valid position.
    pub fn unpark(&self) -> Exchange {
        Exchange::send(":PO#")
    }

    /// `:KA#`, park once the mount sits at the park pose.
    pub fn park(&self) -> Exchange {
        Exchange::send(":KA#")
    }

    /// Guide pulse of up to [`MAX_PULSE_MS`].
    pub fn pulse(&self, direction: Direction, duration_ms: u64) -> Exchange {
        Exchange::send(format!(
            ":M{}{:03}#",
            direction.letter(),
            duration_ms.min(MAX_PULSE_MS)
        ))
    }

    pub fn swap_north_south(&self) -> Exchange {
        Exchange::send(":NS#")
    }

    pub fn swap_east_west(&self) -> Exchange {
        Exchange::send(":EW#")
    }

    pub fn get_pier_side(&self) -> Exchange {
        Exchange::new(":pS#", Reply::framed(TERMINATOR, 5))
    }

    /// Site longitude, west-positive `[0, 360)`.
    pub fn set_longitude(&self, west_degrees: f64) -> Exchange {
        set_command(format!(":Sg {}#", format_azimuth(west_degrees)))
    }

    pub fn set_latitude(&self, degrees: f64) -> Exchange {
        set_command(format!(":St {}#", format_signed_degrees(degrees)))
    }

    /// `:SL`, `:SC` and `:SG` for a local time. The offset is sent unsigned.
    pub fn set_local_time(&self, local: DateTime<FixedOffset>) -> Vec<Exchange> {
        let offset_hours = f64::from(local.offset().local_minus_utc()) / 3600.0;
        let (oh, om, os) = split_seconds(offset_hours);
        vec![
            set_command(format!(
                ":SL {:02}:{:02}:{:02}#",
                local.hour(),
                local.minute(),
                local.second()
            )),
            set_command(format!(
                ":SC {:02}/{:02}/{:02}#",
                local.month(),
                local.day(),
                local.year().rem_euclid(100)
            )),
            set_command(format!(":SG +{:02}:{:02}:{:02}#", oh, om, os)),
        ]
    }

    /// Local time for a UTC instant and an east-positive offset.
    pub fn local_time(utc: DateTime<Utc>, utc_offset_hours: f64) -> MountResult<DateTime<FixedOffset>> {
        let seconds = (utc_offset_hours * 3600.0).round() as i32;
        let offset = FixedOffset::east_opt(seconds).ok_or_else(|| {
            MountError::InvalidParameter(format!("UTC offset {} hours", utc_offset_hours))
        })?;
        Ok(utc.with_timezone(&offset))
    }

    pub fn decode_azimuth(&self, response: &[u8]) -> MountResult<f64> {
        parse_azimuth(response)
    }

    pub fn decode_altitude(&self, response: &[u8]) -> MountResult<f64> {
        parse_signed_degrees(response)
    }

    /// Interpret the `:MS#` reply.
    pub fn check_slew(&self, command: &Exchange, response: &[u8]) -> MountResult<()> {
        match response {
            b"0" => Ok(()),
            _ => Err(MountError::Rejected {
                command: command.command_str().into_owned(),
                reason: match response.first() {
                    Some(b'1') => "object below horizon".to_string(),
                    Some(b'2') => "object below higher limit".to_string(),
                    _ => format!("unexpected reply {:?}", String::from_utf8_lossy(response)),
                },
            }),
        }
    }
}

impl Codec for ApCodec {
    /// RA in hours or Dec in degrees.
    type AxisValue = f64;
    /// `:pS#` pier side.
    type Status = PierSide;

    fn terminator(&self) -> u8 {
        TERMINATOR
    }

    fn encode_set_position(&self, axis: Axis, value: f64) -> Exchange {
        match axis {
            Axis::Ra => set_command(format!(":Sr {}#", format_ra(value))),
            Axis::Dec => set_command(format!(":Sd {}#", format_dec(value))),
        }
    }

    fn encode_get_position(&self, axis: Axis) -> Exchange {
        match axis {
            Axis::Ra => Exchange::new(":GR#", Reply::framed(TERMINATOR, 9)),
            Axis::Dec => Exchange::new(":GD#", Reply::framed(TERMINATOR, 10)),
        }
    }

    /// RA as a delta from sidereal, Dec as a multiple of sidereal.
    fn encode_set_rate(&self, axis: Axis, rate: f64) -> Vec<Exchange> {
        match axis {
            Axis::Ra => vec![set_command(format!(
                ":RR{}#",
                format_rate((rate - SIDEREAL_RATE) / SIDEREAL_RATE)
            ))],
            Axis::Dec => vec![set_command(format!(
                ":RD{}#",
                format_rate(rate / SIDEREAL_RATE)
            ))],
        }
    }

    fn encode_motion_start(&self, direction: Direction, rate_index: usize) -> Vec<Exchange> {
        vec![
            self.select_rate(RateKind::Move, rate_index),
            Exchange::send(format!(":M{}#", direction.letter())),
        ]
    }

    fn encode_motion_stop(&self, direction: Direction) -> Vec<Exchange> {
        vec![Exchange::send(format!(":Q{}#", direction.letter()))]
    }

    fn decode_position(&self, axis: Axis, response: &[u8]) -> MountResult<f64> {
        match axis {
            Axis::Ra => parse_ra(response),
            Axis::Dec => parse_signed_degrees(response),
        }
    }

    fn encode_get_status(&self, _axis: Axis) -> Exchange {
        self.get_pier_side()
    }

    fn decode_status(&self, _axis: Axis, response: &[u8]) -> MountResult<PierSide> {
        match response {
            b"East#" => Ok(PierSide::East),
            b"West#" => Ok(PierSide::West),
            _ => Err(protocol_error("pier side", response)),
        }
    }
}
