//! Coordinate transforms.
//!
//! Pure functions converting between equatorial, horizontal and motor-count
//! representations. Every output is normalized into its documented domain;
//! inputs are never clamped, so callers validate targets first.
//!
//! # Conventions
//!
//! - Hour angle = local sidereal time - right ascension, normalized to `(-12, 12]`.
//! - Horizontal coordinates returned by [`to_horizontal`] use the south-referenced
//!   azimuth (0° south, increasing westward). Park poses are north-referenced;
//!   rotate with [`south_to_north_azimuth`] / [`north_to_south_azimuth`].
//! - Motor counts follow the German-equatorial layout of motor-count controllers:
//!   the RA motor angle is `HA - 6h` on the east side and `HA + 6h` on the west
//!   side, the declination motor angle is `dec - 90°` east and `90° - dec` west.
//!
//! The inverse conversion infers the pier side from the sign of the declination
//! count rather than querying the mount. A target exactly at the pole on the east
//! side produces a zero declination count and decodes through the west branch.

use crate::error::{MountError, MountResult};
use crate::types::{
    AxisScale, EquatorialPosition, HorizontalPosition, MotorCount, ObserverLocation, PierSide,
};
use chrono::{DateTime, Utc};

/// Julian date of the Unix epoch.
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
/// Julian date of J2000.0.
const J2000_JD: f64 = 2_451_545.0;

/// Axis position registers are 24 bits wide.
const AXIS_REGISTER_MODULUS: i64 = 16_777_216;
const AXIS_REGISTER_HALF: i64 = 8_388_608;

/// Fold hours into `[0, 24)`.
pub fn range24(hours: f64) -> f64 {
    let r = hours.rem_euclid(24.0);
    // rem_euclid can round up to exactly 24.0 for tiny negative inputs
    if r >= 24.0 {
        0.0
    } else {
        r
    }
}

/// Fold degrees into `[0, 360)`.
pub fn range360(degrees: f64) -> f64 {
    let r = degrees.rem_euclid(360.0);
    if r >= 360.0 {
        0.0
    } else {
        r
    }
}

/// Fold an hour angle into `(-12, 12]`.
pub fn normalize_hour_angle(hours: f64) -> f64 {
    12.0 - (12.0 - hours).rem_euclid(24.0)
}

/// Hour angle of `ra_hours` at local sidereal time `lst_hours`, in `(-12, 12]`.
pub fn hour_angle(ra_hours: f64, lst_hours: f64) -> f64 {
    normalize_hour_angle(lst_hours - ra_hours)
}

/// Pier side a German equatorial mount uses for a target.
///
/// West when the hour angle is negative (target east of the meridian), East
/// otherwise; a target exactly on the meridian resolves to East. Declination
/// does not take part. A non-finite hour angle yields [`PierSide::Unknown`].
pub fn derive_pier_side(ra_hours: f64, lst_hours: f64) -> PierSide {
    let ha = hour_angle(ra_hours, lst_hours);
    if !ha.is_finite() {
        PierSide::Unknown
    } else if ha < 0.0 {
        PierSide::West
    } else {
        PierSide::East
    }
}

/// Convert a target into motor counts for the given pier side.
///
/// Counts are truncated toward zero, matching the controller firmware.
pub fn to_motor_counts(
    target: &EquatorialPosition,
    pier: PierSide,
    lst_hours: f64,
    scale: AxisScale,
) -> MountResult<MotorCount> {
    let ha = hour_angle(target.ra_hours, lst_hours);

    let (ra_motor_hours, dec_motor_degrees) = match pier {
        PierSide::East => (ha - 6.0, target.dec_degrees - 90.0),
        PierSide::West => (ha + 6.0, -(target.dec_degrees - 90.0)),
        PierSide::Unknown => {
            return Err(MountError::InvalidPierSide {
                ra_hours: target.ra_hours,
            })
        }
    };

    Ok(MotorCount {
        ra: (ra_motor_hours * scale.ra / 24.0) as i32,
        dec: (dec_motor_degrees * scale.dec / 360.0) as i32,
    })
}

/// Convert motor counts back into equatorial coordinates.
///
/// The branch is chosen by the sign of the declination count: negative counts
/// decode as east-side, zero and positive as west-side.
pub fn from_motor_counts(counts: MotorCount, lst_hours: f64, scale: AxisScale) -> EquatorialPosition {
    let ra_motor_hours = 24.0 * f64::from(counts.ra) / scale.ra;
    let ha = if counts.dec < 0 {
        ra_motor_hours + 6.0
    } else {
        ra_motor_hours - 6.0
    };

    let dec_motor_degrees = 360.0 * f64::from(counts.dec) / scale.dec;
    let dec = if dec_motor_degrees >= 0.0 {
        90.0 - dec_motor_degrees
    } else {
        90.0 + dec_motor_degrees
    };

    EquatorialPosition {
        ra_hours: range24(lst_hours - ha),
        dec_degrees: dec,
    }
}

/// Pier side implied by motor counts, using the same sign rule as [`from_motor_counts`].
pub fn pier_side_from_counts(counts: MotorCount) -> PierSide {
    if counts.dec < 0 {
        PierSide::East
    } else {
        PierSide::West
    }
}

/// Sign-extend a 24-bit axis position register.
pub fn axis_position_to_motor(raw: u32) -> i32 {
    let raw = i64::from(raw) % AXIS_REGISTER_MODULUS;
    let value = if raw > AXIS_REGISTER_HALF {
        raw - AXIS_REGISTER_MODULUS
    } else {
        raw
    };
    value as i32
}

/// Julian date of a UTC instant.
pub fn julian_date(utc: DateTime<Utc>) -> f64 {
    let seconds = utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_nanos()) * 1e-9;
    UNIX_EPOCH_JD + seconds / 86_400.0
}

/// Greenwich mean sidereal time, hours.
pub fn greenwich_sidereal_time(jd: f64) -> f64 {
    let d = jd - J2000_JD;
    let t = d / 36_525.0;
    let degrees = 280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * t * t
        - t * t * t / 38_710_000.0;
    range360(degrees) / 15.0
}

/// Local mean sidereal time for an east-positive longitude, hours.
pub fn local_sidereal_time(jd: f64, longitude_degrees: f64) -> f64 {
    range24(greenwich_sidereal_time(jd) + longitude_degrees / 15.0)
}

/// Equatorial to horizontal at a given sidereal time. South-referenced azimuth.
pub fn to_horizontal_at(
    position: &EquatorialPosition,
    latitude_degrees: f64,
    lst_hours: f64,
) -> HorizontalPosition {
    let h = ((lst_hours - position.ra_hours) * 15.0).to_radians();
    let dec = position.dec_degrees.to_radians();
    let lat = latitude_degrees.to_radians();

    let altitude = (lat.sin() * dec.sin() + lat.cos() * dec.cos() * h.cos())
        .clamp(-1.0, 1.0)
        .asin();
    let azimuth = h.sin().atan2(h.cos() * lat.sin() - dec.tan() * lat.cos());

    HorizontalPosition {
        azimuth_degrees: range360(azimuth.to_degrees()),
        altitude_degrees: altitude.to_degrees(),
    }
}

/// Horizontal (south-referenced azimuth) to equatorial at a given sidereal time.
pub fn to_equatorial_at(
    position: &HorizontalPosition,
    latitude_degrees: f64,
    lst_hours: f64,
) -> EquatorialPosition {
    let a = position.azimuth_degrees.to_radians();
    let alt = position.altitude_degrees.to_radians();
    let lat = latitude_degrees.to_radians();

    let h = a.sin().atan2(a.cos() * lat.sin() + alt.tan() * lat.cos());
    let dec = (lat.sin() * alt.sin() - lat.cos() * alt.cos() * a.cos())
        .clamp(-1.0, 1.0)
        .asin();

    EquatorialPosition {
        ra_hours: range24(lst_hours - h.to_degrees() / 15.0),
        dec_degrees: dec.to_degrees(),
    }
}

/// Equatorial to horizontal for an observer at a Julian date.
pub fn to_horizontal(
    position: &EquatorialPosition,
    observer: &ObserverLocation,
    jd: f64,
) -> HorizontalPosition {
    let lst = local_sidereal_time(jd, observer.normalized_longitude());
    to_horizontal_at(position, observer.latitude_degrees, lst)
}

/// Horizontal (south-referenced azimuth) to equatorial for an observer at a Julian date.
pub fn to_equatorial(
    position: &HorizontalPosition,
    observer: &ObserverLocation,
    jd: f64,
) -> EquatorialPosition {
    let lst = local_sidereal_time(jd, observer.normalized_longitude());
    to_equatorial_at(position, observer.latitude_degrees, lst)
}

/// North-referenced azimuth to south-referenced.
pub fn north_to_south_azimuth(azimuth_degrees: f64) -> f64 {
    range360(azimuth_degrees + 180.0)
}

/// South-referenced azimuth to north-referenced.
pub fn south_to_north_azimuth(azimuth_degrees: f64) -> f64 {
    range360(azimuth_degrees - 180.0)
}

/// Default park pose: pointing at the celestial pole.
///
/// Azimuth 0° (north) in the northern hemisphere, 180° in the southern, altitude
/// equal to the latitude. North-referenced.
pub fn default_park_pose(observer: &ObserverLocation) -> HorizontalPosition {
    HorizontalPosition {
        azimuth_degrees: if observer.latitude_degrees >= 0.0 {
            0.0
        } else {
            180.0
        },
        altitude_degrees: observer.latitude_degrees,
    }
}

/// Equatorial position of a north-referenced park pose.
pub fn park_pose_to_equatorial(
    pose: &HorizontalPosition,
    observer: &ObserverLocation,
    lst_hours: f64,
) -> EquatorialPosition {
    let south_referenced = HorizontalPosition {
        azimuth_degrees: north_to_south_azimuth(pose.azimuth_degrees),
        altitude_degrees: pose.altitude_degrees,
    };
    to_equatorial_at(&south_referenced, observer.latitude_degrees, lst_hours)
}

/// North-referenced park pose for an equatorial position.
pub fn equatorial_to_park_pose(
    position: &EquatorialPosition,
    observer: &ObserverLocation,
    lst_hours: f64,
) -> HorizontalPosition {
    let hz = to_horizontal_at(position, observer.latitude_degrees, lst_hours);
    HorizontalPosition {
        azimuth_degrees: south_to_north_azimuth(hz.azimuth_degrees),
        altitude_degrees: hz.altitude_degrees,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SCALE: AxisScale = AxisScale::PMC8;

    fn ra_step() -> f64 {
        24.0 / SCALE.ra
    }

    fn dec_step() -> f64 {
        360.0 / SCALE.dec
    }

    fn circular_hours(a: f64, b: f64) -> f64 {
        let d = (a - b).rem_euclid(24.0);
        d.min(24.0 - d)
    }

    #[test]
    fn hour_angle_normalization_bounds() {
        assert_eq!(normalize_hour_angle(12.0), 12.0);
        assert_eq!(normalize_hour_angle(-12.0), 12.0);
        assert_eq!(normalize_hour_angle(13.0), -11.0);
        assert_eq!(normalize_hour_angle(-13.0), 11.0);
        assert_eq!(normalize_hour_angle(0.0), 0.0);
        assert_eq!(hour_angle(8.0, 10.0), 2.0);
        assert_eq!(hour_angle(23.0, 1.0), 2.0);
    }

    #[test]
    fn pier_side_tie_break_is_east() {
        assert_eq!(derive_pier_side(5.0, 5.0), PierSide::East);
        assert_eq!(derive_pier_side(5.0, 4.999), PierSide::West);
        assert_eq!(derive_pier_side(5.0, 5.001), PierSide::East);
        // HA of exactly -12 normalizes to +12
        assert_eq!(derive_pier_side(12.0, 0.0), PierSide::East);
        assert_eq!(derive_pier_side(f64::NAN, 0.0), PierSide::Unknown);
    }

    #[test]
    fn unknown_pier_side_is_rejected() {
        let target = EquatorialPosition::new(8.0, 20.0);
        let err = to_motor_counts(&target, PierSide::Unknown, 10.0, SCALE).unwrap_err();
        assert!(matches!(err, MountError::InvalidPierSide { .. }));
    }

    #[test]
    fn scenario_lst_ten_hours() {
        // Observer at +40 / 250° east (-110°), LST 10h, target RA 8h Dec +20°.
        let observer = ObserverLocation::new(40.0, 250.0, 0.0);
        assert_eq!(observer.normalized_longitude(), -110.0);

        let target = EquatorialPosition::new(8.0, 20.0);
        let pier = derive_pier_side(target.ra_hours, 10.0);
        assert_eq!(pier, PierSide::East);

        let counts = to_motor_counts(&target, pier, 10.0, SCALE).unwrap();
        assert_eq!(counts.ra, (-4.0 * SCALE.ra / 24.0) as i32);
        assert_eq!(counts.ra, -768_000);
        assert_eq!(counts.dec, -896_000);
    }

    #[test]
    fn motor_count_round_trip_both_pier_sides() {
        let lst = 7.25;
        for pier in [PierSide::East, PierSide::West] {
            let mut ra = 0.0;
            while ra < 24.0 {
                let mut dec = -90.0;
                while dec < 89.5 {
                    let target = EquatorialPosition::new(ra, dec);
                    let counts = to_motor_counts(&target, pier, lst, SCALE).unwrap();
                    assert_eq!(pier_side_from_counts(counts), pier);

                    let back = from_motor_counts(counts, lst, SCALE);
                    assert!(
                        circular_hours(back.ra_hours, ra) <= ra_step() * 1.01,
                        "ra {} -> {} ({:?})",
                        ra,
                        back.ra_hours,
                        pier
                    );
                    assert!(
                        (back.dec_degrees - dec).abs() <= dec_step() * 1.01,
                        "dec {} -> {} ({:?})",
                        dec,
                        back.dec_degrees,
                        pier
                    );
                    dec += 7.3;
                }
                ra += 0.37;
            }
        }
    }

    #[test]
    fn west_pole_decodes_exactly() {
        let target = EquatorialPosition::new(3.0, 90.0);
        let counts = to_motor_counts(&target, PierSide::West, 3.0, SCALE).unwrap();
        assert_eq!(counts.dec, 0);
        let back = from_motor_counts(counts, 3.0, SCALE);
        assert_eq!(back.dec_degrees, 90.0);
        assert!(circular_hours(back.ra_hours, 3.0) <= ra_step());
    }

    #[test]
    fn east_pole_decodes_through_west_branch() {
        // Zero dec count loses the pier side; RA comes back 12h away.
        let target = EquatorialPosition::new(3.0, 90.0);
        let counts = to_motor_counts(&target, PierSide::East, 3.0, SCALE).unwrap();
        assert_eq!(counts.dec, 0);
        assert_eq!(pier_side_from_counts(counts), PierSide::West);
        let back = from_motor_counts(counts, 3.0, SCALE);
        assert!(circular_hours(back.ra_hours, 15.0) <= ra_step());
    }

    #[test]
    fn axis_register_wraps_at_24_bits() {
        assert_eq!(axis_position_to_motor(0), 0);
        assert_eq!(axis_position_to_motor(8_388_608), 8_388_608);
        assert_eq!(axis_position_to_motor(8_388_609), -8_388_607);
        assert_eq!(axis_position_to_motor(0xFF_FFFF), -1);
        assert_eq!(axis_position_to_motor(0xF4_4800), -768_000);
    }

    #[test]
    fn j2000_sidereal_time() {
        let utc = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        let jd = julian_date(utc);
        assert!((jd - J2000_JD).abs() < 1e-9);
        assert!((greenwich_sidereal_time(jd) - 280.460_618_37 / 15.0).abs() < 1e-9);
        assert!((local_sidereal_time(jd, -110.0) - range24(280.460_618_37 / 15.0 - 110.0 / 15.0)).abs() < 1e-9);
    }

    #[test]
    fn meridian_object_is_due_south() {
        let hz = to_horizontal_at(&EquatorialPosition::new(6.0, 0.0), 40.0, 6.0);
        assert!(hz.azimuth_degrees.abs() < 1e-9 || (hz.azimuth_degrees - 360.0).abs() < 1e-9);
        assert!((hz.altitude_degrees - 50.0).abs() < 1e-9);

        let zenith = to_horizontal_at(&EquatorialPosition::new(6.0, 40.0), 40.0, 6.0);
        assert!((zenith.altitude_degrees - 90.0).abs() < 1e-5);
    }

    #[test]
    fn west_of_meridian_has_westward_azimuth() {
        // HA +2h: object set toward the west, south-referenced azimuth in (0, 180)
        let hz = to_horizontal_at(&EquatorialPosition::new(4.0, 10.0), 40.0, 6.0);
        assert!(hz.azimuth_degrees > 0.0 && hz.azimuth_degrees < 180.0);
    }

    #[test]
    fn horizontal_round_trip() {
        let lst = 13.5;
        for (ra, dec) in [(1.0, 10.0), (13.0, -20.0), (20.5, 60.0), (9.0, 85.0)] {
            let eq = EquatorialPosition::new(ra, dec);
            let hz = to_horizontal_at(&eq, 40.0, lst);
            let back = to_equatorial_at(&hz, 40.0, lst);
            assert!(circular_hours(back.ra_hours, ra) < 1e-9, "ra {}", ra);
            assert!((back.dec_degrees - dec).abs() < 1e-9, "dec {}", dec);
        }
    }

    #[test]
    fn default_park_pose_points_at_pole() {
        let north = default_park_pose(&ObserverLocation::new(40.0, 0.0, 0.0));
        assert_eq!(north, HorizontalPosition::new(0.0, 40.0));
        let south = default_park_pose(&ObserverLocation::new(-33.0, 0.0, 0.0));
        assert_eq!(south, HorizontalPosition::new(180.0, -33.0));

        // Northern default park pose resolves to the celestial pole
        let observer = ObserverLocation::new(40.0, 0.0, 0.0);
        let eq = park_pose_to_equatorial(&north, &observer, 4.0);
        assert!((eq.dec_degrees - 90.0).abs() < 1e-5);
    }

    #[test]
    fn azimuth_rotation() {
        assert_eq!(north_to_south_azimuth(0.0), 180.0);
        assert_eq!(north_to_south_azimuth(270.0), 90.0);
        assert_eq!(south_to_north_azimuth(180.0), 0.0);
        assert_eq!(south_to_north_azimuth(90.0), 270.0);
    }

    #[test]
    fn park_pose_round_trip() {
        let observer = ObserverLocation::new(35.0, -100.0, 0.0);
        let pose = HorizontalPosition::new(120.0, 30.0);
        let eq = park_pose_to_equatorial(&pose, &observer, 2.0);
        let back = equatorial_to_park_pose(&eq, &observer, 2.0);
        assert!((back.azimuth_degrees - 120.0).abs() < 1e-9);
        assert!((back.altitude_degrees - 30.0).abs() < 1e-9);
    }
}
