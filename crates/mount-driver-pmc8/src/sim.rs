//! In-memory PMC-Eight controller.
//!
//! Answers `ES...!` frames with the same echoes as the board. A target set
//! with `ESPt` is reached over `slew_polls` position reads of that axis, and
//! the axis reports a slewing motor rate until then.
//!
//! With a clock attached the RA axis also advances at the tracking rate
//! between commands, as long as it is neither slewing nor jogging.

use crate::codec::{decode_position_field, hex_decode, position_field, MAX_MOVE_MOTOR_RATE};
use chrono::{DateTime, Utc};
use mount_core::clock::Clock;
use mount_core::error::{MountError, MountResult};
use mount_core::sim::SimulatedDevice;
use mount_core::types::{Axis, MotorCount};
use std::fmt;
use std::sync::Arc;

/// Precise tracking units per RA motor count per second.
const TRACK_UNITS_PER_COUNT: f64 = 25.0;

/// Simulated PMC-Eight board.
#[derive(Clone)]
pub struct Pmc8Simulator {
    /// Version text after `ESGv`, e.g. `ES06B9T9`.
    pub version: String,
    /// Position reads an axis needs to reach its target.
    pub slew_polls: u32,
    /// RA tracking rate in precise motor units.
    pub track_rate: u32,
    position: [i32; 2],
    slew: [Option<(i32, u32)>; 2],
    move_rate: [u32; 2],
    direction: [u8; 2],
    clock: Option<Arc<dyn Clock>>,
    last_tick: Option<DateTime<Utc>>,
    track_residual: f64,
}

impl fmt::Debug for Pmc8Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pmc8Simulator")
            .field("version", &self.version)
            .field("track_rate", &self.track_rate)
            .field("position", &self.position)
            .field("slew", &self.slew)
            .field("move_rate", &self.move_rate)
            .field("direction", &self.direction)
            .field("clocked", &self.clock.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Pmc8Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Pmc8Simulator {
    pub fn new() -> Self {
        Self {
            version: "ES06B9T9".to_string(),
            slew_polls: 2,
            track_rate: 0,
            position: [0, 0],
            slew: [None, None],
            move_rate: [0, 0],
            direction: [1, 1],
            clock: None,
            last_tick: None,
            track_residual: 0.0,
        }
    }

    /// Track in RA against `clock` from now on.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.last_tick = Some(clock.now());
        self.clock = Some(clock);
        self
    }

    pub fn counts(&self) -> MotorCount {
        MotorCount::new(self.position[0], self.position[1])
    }

    pub fn set_counts(&mut self, counts: MotorCount) {
        self.position = [counts.ra, counts.dec];
        self.slew = [None, None];
    }

    pub fn is_slewing(&self) -> bool {
        self.slew.iter().any(Option::is_some)
    }

    /// Signed move rate of an axis in move motor units.
    pub fn move_rate(&self, axis: Axis) -> i32 {
        let i = usize::from(axis.index());
        let rate = self.move_rate[i] as i32;
        if self.direction[i] == 0 {
            -rate
        } else {
            rate
        }
    }

    pub fn track_direction(&self) -> u8 {
        self.direction[0]
    }

    /// Advance RA by the tracking rate for the time since the last command.
    fn track(&mut self) {
        let Some(clock) = &self.clock else {
            return;
        };
        let now = clock.now();
        let Some(last) = self.last_tick.replace(now) else {
            return;
        };
        let elapsed = (now - last).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return;
        }
        if self.slew[0].is_some() || self.move_rate[0] > 0 {
            self.track_residual = 0.0;
            return;
        }

        let counts =
            self.track_residual + elapsed * f64::from(self.track_rate) / TRACK_UNITS_PER_COUNT;
        let whole = counts.trunc();
        self.track_residual = counts - whole;
        let whole = whole as i32;
        self.position[0] += if self.direction[0] == 0 { -whole } else { whole };
    }

    fn step(&mut self, i: usize) {
        if let Some((target, remaining)) = self.slew[i] {
            if remaining <= 1 {
                self.position[i] = target;
                self.slew[i] = None;
            } else {
                self.position[i] += (target - self.position[i]) / 2;
                self.slew[i] = Some((target, remaining - 1));
            }
        }
    }

    /// Motor rate the board reports for an axis, in move units.
    fn reported_rate(&self, i: usize) -> u32 {
        if self.slew[i].is_some() {
            MAX_MOVE_MOTOR_RATE as u32
        } else if self.move_rate[i] > 0 {
            self.move_rate[i]
        } else if i == 0 {
            self.track_rate / 25
        } else {
            0
        }
    }
}

fn bad(command: &str) -> MountError {
    MountError::Protocol(format!("simulator: unknown command {:?}", command))
}

fn axis_of(command: &str, body: &str) -> MountResult<usize> {
    match body.as_bytes().first() {
        Some(b'0') => Ok(0),
        Some(b'1') => Ok(1),
        _ => Err(bad(command)),
    }
}

impl SimulatedDevice for Pmc8Simulator {
    fn respond(&mut self, raw: &[u8]) -> MountResult<Vec<u8>> {
        let command = String::from_utf8_lossy(raw).into_owned();
        let body = command
            .strip_prefix("ES")
            .and_then(|c| c.strip_suffix('!'))
            .ok_or_else(|| bad(&command))?;
        if body.len() < 2 {
            return Err(bad(&command));
        }
        let (verb, args) = body.split_at(2);
        self.track();

        let reply = match verb {
            "Gv" => format!("ESGv{}!", self.version),
            "Gp" => {
                let i = axis_of(&command, args)?;
                self.step(i);
                format!("ESGp{}{}!", i, position_field(self.position[i]))
            }
            "Sp" | "Pt" => {
                let i = axis_of(&command, args)?;
                let field = args.get(1..).ok_or_else(|| bad(&command))?;
                let counts = decode_position_field(field)?;
                if verb == "Sp" {
                    self.position[i] = counts;
                    self.slew[i] = None;
                    format!("ESGp{}{}!", i, field)
                } else {
                    self.slew[i] = Some((counts, self.slew_polls.max(1)));
                    format!("ESGt{}{}!", i, field)
                }
            }
            "Gr" => {
                let i = axis_of(&command, args)?;
                format!("ESGr{}{:04X}!", i, self.reported_rate(i))
            }
            "Sr" => {
                let i = axis_of(&command, args)?;
                let field = args.get(1..).ok_or_else(|| bad(&command))?;
                self.move_rate[i] = hex_decode(field)? as u32;
                format!("ESGr{}{}!", i, field)
            }
            "Tr" => {
                self.track_rate = hex_decode(args)? as u32;
                format!("ESGr{}!", args)
            }
            "Gd" => {
                let i = axis_of(&command, args)?;
                format!("ESGd{}{}!", i, self.direction[i])
            }
            "Sd" => {
                let i = axis_of(&command, args)?;
                self.direction[i] = match args.as_bytes().get(1) {
                    Some(b'0') => 0,
                    Some(b'1') => 1,
                    _ => return Err(bad(&command)),
                };
                format!("ESGd{}{}!", i, self.direction[i])
            }
            _ => return Err(bad(&command)),
        };
        Ok(reply.into_bytes())
    }
}
