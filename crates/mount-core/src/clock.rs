//! Time source and sky context.
//!
//! Coordinate transforms need the local sidereal time at the moment a command
//! is encoded. The state machine reads time through [`Clock`] so tests can pin
//! it with [`FixedClock`].

use crate::coords::{julian_date, local_sidereal_time};
use crate::types::ObserverLocation;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

/// Source of the current UTC time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulation.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Observer, Julian date and local sidereal time for one command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyContext {
    pub observer: ObserverLocation,
    pub julian_date: f64,
    pub lst_hours: f64,
}

impl SkyContext {
    pub fn from_utc(observer: ObserverLocation, utc: DateTime<Utc>) -> Self {
        let jd = julian_date(utc);
        Self {
            observer,
            julian_date: jd,
            lst_hours: local_sidereal_time(jd, observer.longitude_degrees),
        }
    }

    /// Context with an explicit sidereal time, bypassing the clock.
    pub fn with_sidereal_time(observer: ObserverLocation, julian_date: f64, lst_hours: f64) -> Self {
        Self {
            observer,
            julian_date,
            lst_hours,
        }
    }
}
