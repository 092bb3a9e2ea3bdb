//! The fix data model and merge/error-model pipeline (spec.md 3, 4.9).
//!
//! `Fix` accumulates per-cycle updates from sentence/frame decoders.
//! Every field is `Option<T>`; `None` is the "not available" sentinel,
//! matching Rust idiom rather than gpsd's in-band `NaN`/`-1` sentinels
//! (see DESIGN.md, Open Questions).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// What changed during the most recent parser call (spec.md 6).
    #[derive(Serialize, Deserialize)]
    pub struct ChangeMask: u32 {
        const ONLINE          = 0x0000_0001;
        const TIME            = 0x0000_0002;
        const LATLON          = 0x0000_0004;
        const ALTITUDE        = 0x0000_0008;
        const SPEED           = 0x0000_0010;
        const TRACK           = 0x0000_0020;
        const CLIMB           = 0x0000_0040;
        const STATUS          = 0x0000_0080;
        const MODE            = 0x0000_0100;
        const DOP             = 0x0000_0200;
        const HERR            = 0x0000_0400;
        const VERR            = 0x0000_0800;
        const PERR            = 0x0000_1000;
        const SATELLITE       = 0x0000_2000;
        const USED            = 0x0000_4000;
        const GST             = 0x0000_8000;
        const MAGNETIC_TRACK  = 0x0001_0000;
        const REPORT          = 0x0002_0000;
        const CLEAR           = 0x0004_0000;
        const DEVICEID        = 0x0008_0000;
        const DRIVER          = 0x0010_0000;
    }
}

impl Default for ChangeMask {
    fn default() -> Self {
        ChangeMask::empty()
    }
}

/// Fix status as reported by RMC/GGA/GNS/GLL FAA-mode or fix-quality fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    NoFix,
    Fix,
    Dgps,
    Rtk,
    RtkFloat,
    Dr,
}

/// Fix mode, ordered so the "minimum quality" invariant (spec.md 3) has a
/// natural `min`/`max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mode {
    NoFix,
    Fix2D,
    Fix3D,
}

/// A GNSS constellation identifier, used to normalize per-talker PRN
/// numbering in GSV/GSA (spec.md 4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GnssId {
    Gps,
    Sbas,
    Glonass,
    Galileo,
    Beidou,
    Qzss,
    Imes,
    Unknown,
}

/// A single satellite's sky-view entry (spec.md 3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyViewEntry {
    pub prn: u16,
    pub gnss_id: GnssId,
    pub sig_id: u8,
    pub elevation: Option<f64>,
    pub azimuth: Option<f64>,
    pub snr: Option<f64>,
    pub used: bool,
}

impl SkyViewEntry {
    pub fn new(prn: u16, gnss_id: GnssId) -> Self {
        SkyViewEntry {
            prn,
            gnss_id,
            sig_id: 0,
            elevation: None,
            azimuth: None,
            snr: None,
            used: false,
        }
    }
}

/// Dilution-of-precision set (spec.md 3, 4.9). Device-reported values take
/// precedence; `dop::fill` only fills currently-`None` slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dop {
    pub xdop: Option<f64>,
    pub ydop: Option<f64>,
    pub hdop: Option<f64>,
    pub vdop: Option<f64>,
    pub pdop: Option<f64>,
    pub tdop: Option<f64>,
    pub gdop: Option<f64>,
}

/// A position/velocity/time fix, merged cycle by cycle (spec.md 3, 4.9).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    /// Unix time, fractional seconds.
    pub time: Option<f64>,
    pub mode: Option<Mode>,
    pub status: Option<Status>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt_msl: Option<f64>,
    pub alt_hae: Option<f64>,
    pub track: Option<f64>,
    pub speed: Option<f64>,
    pub climb: Option<f64>,
    /// Time error, seconds.
    pub ept: Option<f64>,
    pub epx: Option<f64>,
    pub epy: Option<f64>,
    pub epv: Option<f64>,
    pub eps: Option<f64>,
    pub epc: Option<f64>,
    pub epd: Option<f64>,
    pub magnetic_var: Option<f64>,
    pub geoid_sep: Option<f64>,
    pub dgps_age: Option<f64>,
    pub dgps_station: Option<i32>,
}

impl Fix {
    pub fn new() -> Self {
        Fix::default()
    }
}

/// Horizontal/vertical user-equivalent-range-error constants (spec.md 4.9).
pub const H_UERE_2D: f64 = 15.0;
pub const H_UERE_DGPS: f64 = 3.75;
pub const V_UERE_3D: f64 = 23.0;
pub const V_UERE_DGPS: f64 = 5.75;

/// WGS-84 semi-major axis (m) and eccentricity, used by `earth_distance`.
const WGS84_A: f64 = 6_378_137.0;
const WGS84_E: f64 = 0.081_082;

/// Ellipsoidal radius of curvature at `lat` (radians), gpsd's `CalcRad`.
fn calc_rad(lat_rad: f64) -> f64 {
    let sc = lat_rad.sin();
    let x = 1.0 - WGS84_E * WGS84_E * sc * sc;
    WGS84_A * (1.0 - WGS84_E * WGS84_E) / x.powf(1.5)
}

/// Great-circle-ish distance (m) between two lat/lon points on the local
/// radius-of-curvature sphere (spec.md 4.9, gpsd's `earth_distance`).
pub fn earth_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let avg_lat = (lat1 + lat2) / 2.0;
    let r = calc_rad(avg_lat.to_radians());

    let lat1r = lat1.to_radians();
    let lon1r = lon1.to_radians();
    let lat2r = lat2.to_radians();
    let lon2r = lon2.to_radians();

    let x1 = r * lat1r.cos() * lon1r.cos();
    let y1 = r * lat1r.cos() * lon1r.sin();
    let z1 = r * lat1r.sin();
    let x2 = r * lat2r.cos() * lon2r.cos();
    let y2 = r * lat2r.cos() * lon2r.sin();
    let z2 = r * lat2r.sin();

    let dot = (x1 * x2 + y1 * y2 + z1 * z2) / (r * r);
    let dot = dot.max(-1.0).min(1.0);
    r * dot.acos()
}

/// `EMIX(x, y)`: the larger-magnitude of two optional values, or whichever
/// is finite (spec.md 4.9).
fn emix(x: Option<f64>, y: Option<f64>) -> Option<f64> {
    match (x, y) {
        (Some(a), Some(b)) => Some(a.abs().max(b.abs())),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Merge `newdata` into `fix` for every bit set in `mask` (spec.md 4.9).
/// The only special case: a mode downgrade is suppressed if the previous
/// cycle held a valid 3D fix, the new mode isn't `NoFix`, and either
/// altitude is finite (absorbs RMC's lack of 2D/3D reporting).
pub fn merge(fix: &mut Fix, mask: ChangeMask, newdata: &Fix, old_mode: Option<Mode>) {
    macro_rules! take {
        ($bit:ident, $field:ident) => {
            if mask.contains(ChangeMask::$bit) {
                fix.$field = newdata.$field;
            }
        };
    }

    if mask.contains(ChangeMask::MODE) {
        let downgrade = matches!(old_mode, Some(Mode::Fix3D))
            && newdata.mode != Some(Mode::NoFix)
            && newdata.mode.map_or(false, |m| m < Mode::Fix3D)
            && (fix.alt_msl.is_some() || newdata.alt_msl.is_some());
        if !downgrade {
            fix.mode = newdata.mode;
        }
    }

    take!(TIME, time);
    take!(STATUS, status);
    take!(LATLON, lat);
    take!(LATLON, lon);
    take!(ALTITUDE, alt_msl);
    take!(ALTITUDE, alt_hae);
    take!(TRACK, track);
    take!(SPEED, speed);
    take!(CLIMB, climb);
    take!(HERR, epx);
    take!(HERR, epy);
    take!(VERR, epv);
    take!(PERR, ept);
    take!(GST, eps);
    take!(GST, epc);
    take!(MAGNETIC_TRACK, magnetic_var);
    if mask.contains(ChangeMask::STATUS) {
        fix.dgps_age = newdata.dgps_age;
        fix.dgps_station = newdata.dgps_station;
    }
}

/// Fill in derived quantities once `newdata` has been merged into `fix`
/// (spec.md 4.9, gpsd's `gpsd_error_model`).
pub fn error_model(fix: &mut Fix, old: &Fix, dop: &Dop, dgps: bool) {
    let dt = match (fix.time, old.time) {
        (Some(t), Some(ot)) if t.is_finite() && ot.is_finite() => Some(t - ot),
        _ => None,
    };

    if fix.speed.is_none() {
        if let (Some(dt), Some(lat1), Some(lon1), Some(lat2), Some(lon2)) =
            (dt, old.lat, old.lon, fix.lat, fix.lon)
        {
            if dt.abs() > f64::EPSILON {
                fix.speed = Some(earth_distance(lat1, lon1, lat2, lon2) / dt);
            }
        }
    }

    if fix.climb.is_none() {
        if let (Some(dt), Some(a0), Some(a1)) = (dt, old.alt_msl, fix.alt_msl) {
            if dt.abs() > f64::EPSILON {
                fix.climb = Some((a1 - a0) / dt);
            }
        }
    }

    if fix.ept.is_none() {
        fix.ept = Some(0.005);
    }

    let h_uere = if dgps { H_UERE_DGPS } else { H_UERE_2D };
    let v_uere = if dgps { V_UERE_DGPS } else { V_UERE_3D };

    if fix.epx.is_none() {
        fix.epx = dop.xdop.map(|x| x * h_uere);
    }
    if fix.epy.is_none() {
        fix.epy = dop.ydop.map(|y| y * h_uere);
    }
    if fix.epv.is_none() {
        fix.epv = dop.vdop.map(|v| v * v_uere);
    }

    if fix.epd.is_none() {
        if let (Some(lat1), Some(lon1), Some(lat2), Some(lon2)) = (old.lat, old.lon, fix.lat, fix.lon) {
            let adj = earth_distance(lat1, lon1, lat2, lon2);
            if let Some(e) = emix(fix.epx, fix.epy) {
                if adj > e {
                    fix.epd = Some(2.0 * (e / adj.hypot(e)).asin().to_degrees());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_mask_roundtrips_through_bits() {
        let m = ChangeMask::TIME | ChangeMask::LATLON;
        assert!(m.contains(ChangeMask::TIME));
        assert!(!m.contains(ChangeMask::SPEED));
    }

    #[test]
    fn merge_only_touches_masked_fields() {
        let mut fix = Fix::new();
        fix.speed = Some(1.0);
        let mut newdata = Fix::new();
        newdata.lat = Some(49.0);
        newdata.speed = Some(99.0);
        merge(&mut fix, ChangeMask::LATLON, &newdata, None);
        assert_eq!(fix.lat, Some(49.0));
        assert_eq!(fix.speed, Some(1.0));
    }

    #[test]
    fn mode_downgrade_suppressed_with_altitude_present() {
        let mut fix = Fix::new();
        fix.mode = Some(Mode::Fix3D);
        fix.alt_msl = Some(100.0);
        let mut newdata = Fix::new();
        newdata.mode = Some(Mode::Fix2D);
        merge(&mut fix, ChangeMask::MODE, &newdata, Some(Mode::Fix3D));
        assert_eq!(fix.mode, Some(Mode::Fix3D));
    }

    #[test]
    fn mode_downgrade_applies_without_altitude() {
        let mut fix = Fix::new();
        fix.mode = Some(Mode::Fix3D);
        let mut newdata = Fix::new();
        newdata.mode = Some(Mode::Fix2D);
        merge(&mut fix, ChangeMask::MODE, &newdata, Some(Mode::Fix3D));
        assert_eq!(fix.mode, Some(Mode::Fix2D));
    }

    #[test]
    fn earth_distance_is_symmetric_and_zero_at_same_point() {
        let d = earth_distance(49.2742, -123.1853, 49.2742, -123.1853);
        assert!(d.abs() < 1e-6);
        let d1 = earth_distance(49.0, -123.0, 50.0, -122.0);
        let d2 = earth_distance(50.0, -122.0, 49.0, -123.0);
        assert!((d1 - d2).abs() < 1e-6);
    }
}
