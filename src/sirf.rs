//! SiRF-II binary protocol decoder (spec.md 4.7). Ported from gpsd's
//! `sirf.c`; operates on a `Frame::payload` (message-id byte followed by
//! the message body, sync/length/checksum framing already stripped by
//! the lexer).

use crate::bits::{get_i16_be, get_i32_be, get_u16_be, get_u8, get_u32_be};
use crate::error::BitsError;
use crate::fix::{ChangeMask, Fix, GnssId, Mode, SkyViewEntry, Status};
use crate::time::gpstime_to_unix;

type Result<T> = std::result::Result<T, BitsError>;

pub const MAX_CHANNELS: usize = 12;

/// Firmware generation, gated off the ASCII version string in message
/// 0x06 (spec.md 5, "firmware-revision gating"). gpsd's `sirf.c` keys
/// behavior off `fv = atof(version_string)` compared against 231.0 and
/// 232.0; message 0x29's UTC fields are only valid from 232 onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirmwareRev {
    #[default]
    Unknown,
    Lt231,
    Eq231,
    Ge232,
}

impl FirmwareRev {
    /// Classify the ASCII version string carried in message 0x06 (e.g.
    /// `"231.000.000-SDK"`), as gpsd's `atof()`-based comparison does.
    pub fn from_version_string(s: &str) -> Self {
        let fv: f64 = s
            .split(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
            .next()
            .unwrap_or("")
            .parse()
            .unwrap_or(0.0);
        if fv < 231.0 {
            FirmwareRev::Lt231
        } else if fv < 232.0 {
            FirmwareRev::Eq231
        } else {
            FirmwareRev::Ge232
        }
    }
}

/// Per-session SiRF decoder state: firmware gating and the leap-second
/// value recovered from subframe 4 page 18 (message 0x08) or message
/// 0x34, needed to turn GPS time into Unix time.
#[derive(Debug, Clone, Default)]
pub struct SirfState {
    pub firmware: FirmwareRev,
    pub leap_seconds: Option<i32>,
}

impl SirfState {
    pub fn new() -> Self {
        SirfState::default()
    }
}

fn navtype_to_status_mode(navtype: u32) -> (Status, Mode) {
    let low3 = navtype & 0x07;
    let status = if navtype & 0x80 != 0 {
        Status::Dgps
    } else if low3 > 0 && low3 < 7 {
        Status::Fix
    } else {
        Status::NoFix
    };
    let mode = if low3 == 4 || low3 == 6 {
        Mode::Fix3D
    } else if status != Status::NoFix {
        Mode::Fix2D
    } else {
        Mode::NoFix
    };
    (status, mode)
}

/// ECEF X/Y/Z (m) + velocity (m/s) -> WGS-84 lat/lon/alt/track/speed/climb,
/// gpsd's `ecef_to_wgs84fix`.
fn ecef_to_wgs84(x: f64, y: f64, z: f64, vx: f64, vy: f64, vz: f64, fix: &mut Fix) {
    const A: f64 = 6_378_137.0;
    const F: f64 = 1.0 / 298.257223563;
    const E2: f64 = F * (2.0 - F);

    let p = (x * x + y * y).sqrt();
    let mut lat = (z / p).atan2(1.0 - E2);
    for _ in 0..5 {
        let sin_lat = lat.sin();
        let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
        let alt = p / lat.cos() - n;
        lat = (z / p * (1.0 - E2 * n / (n + alt)).recip()).atan();
    }
    let sin_lat = lat.sin();
    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
    let alt = p / lat.cos() - n;
    let lon = y.atan2(x);

    fix.lat = Some(lat.to_degrees());
    fix.lon = Some(lon.to_degrees());
    fix.alt_hae = Some(alt);

    let speed = (vx * vx + vy * vy).sqrt();
    fix.speed = Some(speed);
    fix.climb = Some(vz);
    if speed > 0.0 {
        fix.track = Some(vy.atan2(vx).to_degrees().rem_euclid(360.0));
    }
}

/// Message 0x02, Measured Navigation Data Out: ECEF position/velocity,
/// fix status/mode, HDOP, GPS time.
fn decode_0x02(payload: &[u8], state: &SirfState) -> Result<(ChangeMask, Fix)> {
    let mut mask = ChangeMask::empty();
    let mut fix = Fix::new();

    let satellites_used = get_u8(payload, 28)?;
    if satellites_used == 0 {
        return Ok((mask, fix));
    }

    let x = get_i32_be(payload, 1)? as f64;
    let y = get_i32_be(payload, 5)? as f64;
    let z = get_i32_be(payload, 9)? as f64;
    let vx = get_i16_be(payload, 13)? as f64 / 8.0;
    let vy = get_i16_be(payload, 15)? as f64 / 8.0;
    let vz = get_i16_be(payload, 17)? as f64 / 8.0;
    ecef_to_wgs84(x, y, z, vx, vy, vz, &mut fix);

    let navtype = get_u8(payload, 19)? as u32;
    let (status, mode) = navtype_to_status_mode(navtype);
    fix.status = Some(status);
    fix.mode = Some(mode);
    mask |= ChangeMask::STATUS | ChangeMask::MODE | ChangeMask::LATLON | ChangeMask::TRACK | ChangeMask::SPEED;
    if mode == Mode::Fix3D {
        mask |= ChangeMask::ALTITUDE;
    }

    let week = get_u16_be(payload, 22)? as i64;
    let tow = get_u32_be(payload, 24)? as f64 * 1e-2;
    let leap = state.leap_seconds.unwrap_or(0);
    fix.time = Some(gpstime_to_unix(week, tow, leap));
    mask |= ChangeMask::TIME;

    let hdop = get_u8(payload, 20)? as f64 / 5.0;
    if hdop > 0.0 {
        mask |= ChangeMask::DOP;
    }
    let _ = hdop;

    Ok((mask, fix))
}

/// Message 0x04, Measured Tracker Data Out: per-channel PRN/az/el/SNR.
/// Populates `sky_view`, replacing any previous contents (gpsd's
/// `gpsd_zero_satellites`).
fn decode_0x04(payload: &[u8], sky_view: &mut Vec<SkyViewEntry>) -> Result<ChangeMask> {
    sky_view.clear();
    for i in 0..MAX_CHANNELS {
        let off = 8 + 15 * i;
        if off + 15 > payload.len() {
            break;
        }
        let prn = get_u8(payload, off)? as u16;
        let azimuth = (get_u8(payload, off + 1)? as f64 * 3.0) / 2.0;
        let elevation = get_u8(payload, off + 2)? as f64 / 2.0;
        let mut cn = 0u32;
        for j in 0..10 {
            cn += get_u8(payload, off + 5 + j)? as u32;
        }
        let snr = cn as f64 / 10.0;

        let good = prn != 0 && azimuth != 0.0 && elevation != 0.0;
        if !good {
            continue;
        }
        let mut entry = SkyViewEntry::new(prn, GnssId::Gps);
        entry.azimuth = Some(azimuth);
        entry.elevation = Some(elevation);
        entry.snr = Some(snr);
        entry.used = true;
        sky_view.push(entry);
    }
    Ok(ChangeMask::SATELLITE)
}

/// Message 0x06, Software Version String: drives `FirmwareRev` gating
/// (spec.md 5). The message body is an ASCII string starting at byte 1.
fn decode_0x06(payload: &[u8], state: &mut SirfState) {
    let s = payload[1..]
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect::<String>();
    state.firmware = FirmwareRev::from_version_string(&s);
}

/// Message 0x08, 50 BPS subframe data: the leap-second source. Only
/// subframe 4, page 18 (magic SVID 56) carries it, in the high byte of
/// the ninth data word; gpsd notes a firmware bug that sometimes
/// two's-complements this byte, corrected the same way here.
fn decode_0x08(payload: &[u8], state: &mut SirfState) -> Result<()> {
    if payload.len() < 43 {
        return Ok(());
    }
    let mut words = [0u32; 10];
    for (i, w) in words.iter_mut().enumerate() {
        *w = get_u32_be(payload, 3 + 4 * i)?;
    }
    for w in words.iter_mut() {
        *w = (*w & 0x3fff_ffff) >> 6;
    }
    let tag = words[0] & 0xff_0000;
    if tag != 0x8b_0000 && tag != 0x74_0000 {
        return Ok(());
    }
    if tag == 0x74_0000 {
        for w in words.iter_mut().skip(1) {
            *w ^= 0xff_ffff;
        }
    }
    let subframe = (words[1] >> 2) & 0x07;
    if subframe != 4 {
        return Ok(());
    }
    let pageid = (words[2] & 0x3f_0000) >> 16;
    if pageid != 56 {
        return Ok(());
    }
    let mut leap = (words[8] & 0xff_0000) >> 16;
    if leap > 128 {
        leap ^= 0xff;
    }
    state.leap_seconds = Some(leap as i32);
    Ok(())
}

/// Message 0x29, Geodetic Navigation Information: only reliably filled
/// in from firmware 2.3.2 onward (spec.md 5); earlier firmware leaves
/// the UTC fields zeroed, so this is a no-op gated on `FirmwareRev::Ge232`.
fn decode_0x29(payload: &[u8], state: &SirfState) -> Result<(ChangeMask, Fix)> {
    let mut mask = ChangeMask::empty();
    let mut fix = Fix::new();
    if state.firmware != FirmwareRev::Ge232 {
        return Ok((mask, fix));
    }

    let navtype = get_u16_be(payload, 3)? as u32;
    let (status, mode) = navtype_to_status_mode(navtype);
    fix.status = Some(status);
    fix.mode = Some(mode);
    mask |= ChangeMask::STATUS | ChangeMask::MODE;

    let utc_year = get_u16_be(payload, 11)? as i32;
    if utc_year != 0 {
        let month = get_u8(payload, 13)? as u32;
        let day = get_u8(payload, 14)? as u32;
        let hour = get_u8(payload, 15)? as u32;
        let minute = get_u8(payload, 16)? as u32;
        let subsec_ms = get_u16_be(payload, 17)? as f64;
        if let Some(date) = chrono::NaiveDate::from_ymd_opt(utc_year, month, day) {
            if let Some(time) = date.and_hms_opt(hour, minute, 0) {
                let secs = time.and_utc().timestamp() as f64 + subsec_ms * 1e-3;
                fix.time = Some(secs);
                mask |= ChangeMask::TIME;
            }
        }
    }

    fix.lat = Some(get_i32_be(payload, 23)? as f64 * 1e-7);
    fix.lon = Some(get_i32_be(payload, 27)? as f64 * 1e-7);
    fix.alt_msl = Some(get_i32_be(payload, 31)? as f64 * 1e-2);
    fix.speed = Some(get_i16_be(payload, 36)? as f64 * 1e-2);
    fix.track = Some(get_i16_be(payload, 38)? as f64 * 1e-2);
    fix.climb = Some(get_i16_be(payload, 42)? as f64 * 1e-2);
    mask |= ChangeMask::LATLON | ChangeMask::ALTITUDE | ChangeMask::SPEED | ChangeMask::TRACK | ChangeMask::CLIMB;

    Ok((mask, fix))
}

/// Message 0x34, PPS Time: the second leap-second/UTC source, gated on
/// a valid-UTC status bit (low 3 bits of byte 14 all set).
fn decode_0x34(payload: &[u8], state: &mut SirfState) -> Result<(ChangeMask, Fix)> {
    let mut mask = ChangeMask::empty();
    let mut fix = Fix::new();
    let status = get_u8(payload, 14)? as u32;
    if status & 0x07 != 0x07 {
        return Ok((mask, fix));
    }
    let hour = get_u8(payload, 1)? as u32;
    let minute = get_u8(payload, 2)? as u32;
    let second = get_u8(payload, 3)? as u32;
    let day = get_u8(payload, 4)? as u32;
    let month = get_u8(payload, 5)? as u32;
    let year = get_u16_be(payload, 6)? as i32;
    state.leap_seconds = Some(get_u16_be(payload, 8)? as i32);

    if let Some(date) = chrono::NaiveDate::from_ymd_opt(year, month, day) {
        if let Some(time) = date.and_hms_opt(hour, minute, second) {
            fix.time = Some(time.and_utc().timestamp() as f64);
            mask |= ChangeMask::TIME;
        }
    }
    Ok((mask, fix))
}

/// Decode one SiRF payload (message id in `payload[0]`), dispatching to
/// the per-message decoders above and updating `state`/`sky_view` as a
/// side effect (spec.md 4.7).
pub fn decode(
    payload: &[u8],
    state: &mut SirfState,
    sky_view: &mut Vec<SkyViewEntry>,
) -> Result<(ChangeMask, Fix)> {
    if payload.is_empty() {
        return Ok((ChangeMask::empty(), Fix::new()));
    }
    match payload[0] {
        0x02 => decode_0x02(payload, state),
        0x04 => {
            let mask = decode_0x04(payload, sky_view)?;
            Ok((mask, Fix::new()))
        }
        0x06 => {
            decode_0x06(payload, state);
            Ok((ChangeMask::DRIVER, Fix::new()))
        }
        0x08 => {
            decode_0x08(payload, state)?;
            Ok((ChangeMask::empty(), Fix::new()))
        }
        0x29 => decode_0x29(payload, state),
        0x34 => decode_0x34(payload, state),
        _ => Ok((ChangeMask::empty(), Fix::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg_0x02() -> Vec<u8> {
        let mut buf = vec![0u8; 91];
        buf[0] = 0x02;
        buf[1..5].copy_from_slice(&0i32.to_be_bytes());
        buf[5..9].copy_from_slice(&0i32.to_be_bytes());
        buf[9..13].copy_from_slice(&6_378_137i32.to_be_bytes());
        buf[28] = 4;
        buf[19] = 4; // navtype: valid 3D fix
        buf[20] = 10; // hdop*5
        buf[22..24].copy_from_slice(&2000u16.to_be_bytes());
        buf[24..28].copy_from_slice(&(100_00i32).to_be_bytes());
        buf
    }

    #[test]
    fn mnd_reports_3d_fix_and_time() {
        let state = SirfState::new();
        let (mask, fix) = decode_0x02(&msg_0x02(), &state).unwrap();
        assert_eq!(fix.mode, Some(Mode::Fix3D));
        assert_eq!(fix.status, Some(Status::Fix));
        assert!(mask.contains(ChangeMask::TIME));
        assert!(fix.time.unwrap() > 0.0);
    }

    #[test]
    fn mnd_with_zero_satellites_is_a_noop() {
        let mut buf = msg_0x02();
        buf[28] = 0;
        let state = SirfState::new();
        let (mask, fix) = decode_0x02(&buf, &state).unwrap();
        assert!(mask.is_empty());
        assert!(fix.mode.is_none());
    }

    #[test]
    fn firmware_string_classifies_by_threshold() {
        assert_eq!(FirmwareRev::from_version_string("230.000.000-GSW"), FirmwareRev::Lt231);
        assert_eq!(FirmwareRev::from_version_string("231.000.000-GSW"), FirmwareRev::Eq231);
        assert_eq!(FirmwareRev::from_version_string("232.001.000-GSW"), FirmwareRev::Ge232);
    }

    #[test]
    fn geodetic_nav_info_is_ignored_before_232() {
        let mut state = SirfState::new();
        state.firmware = FirmwareRev::Eq231;
        let payload = vec![0u8; 91];
        let (mask, _) = decode_0x29(&payload, &state).unwrap();
        assert!(mask.is_empty());
    }

    #[test]
    fn tracker_data_drops_channels_missing_az_or_el() {
        let mut payload = vec![0u8; 8 + 15 * MAX_CHANNELS];
        payload[0] = 0x04;
        let off = 8;
        payload[off] = 12; // PRN
        payload[off + 1] = 40; // azimuth raw
        payload[off + 2] = 60; // elevation raw
        for j in 0..10 {
            payload[off + 5 + j] = 30;
        }
        let mut sky = Vec::new();
        decode_0x04(&payload, &mut sky).unwrap();
        assert_eq!(sky.len(), 1);
        assert_eq!(sky[0].prn, 12);
        assert_eq!(sky[0].snr, Some(30.0));
    }

    #[test]
    fn pps_time_ignored_without_valid_status_bits() {
        let mut state = SirfState::new();
        let mut payload = vec![0u8; 15];
        payload[0] = 0x34;
        payload[14] = 0x03; // not all 3 low bits set
        let (mask, _) = decode_0x34(&payload, &mut state).unwrap();
        assert!(mask.is_empty());
        assert!(state.leap_seconds.is_none());
    }
}
