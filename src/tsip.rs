//! Trimble TSIP binary protocol decoder (spec.md 4.7). Ported from gpsd's
//! `tsip.c`. Big-endian throughout; `Frame::payload` is `[id, data...]`
//! with DLE-stuffing already undone by the lexer.

use crate::bits::{get_f32_be, get_f64_be, get_i16_be, get_u8};
use crate::error::BitsError;
use crate::fix::{ChangeMask, Dop, Fix, Mode, SkyViewEntry, Status};
use crate::time::gpstime_to_unix;

type Result<T> = std::result::Result<T, BitsError>;

const RAD_2_DEG: f64 = 180.0 / std::f64::consts::PI;

/// Per-session TSIP decoder state: the GPS week number, learned from
/// message 0x41/0x57 and needed by 0x4a/0x84 to turn a bare
/// time-of-week into Unix time, plus the leap-second count.
#[derive(Debug, Clone, Copy, Default)]
pub struct TsipState {
    pub gps_week: Option<u16>,
    pub leap_seconds: Option<i32>,
}

impl TsipState {
    pub fn new() -> Self {
        TsipState::default()
    }
}

/// Message 0x41, GPS Time: time-of-week + week + leap seconds. gpsd only
/// trusts the leap-second field once it exceeds 10 (its power-on default
/// is implausibly small).
fn decode_0x41(data: &[u8], state: &mut TsipState) -> Result<(ChangeMask, Fix)> {
    let mut fix = Fix::new();
    let mut mask = ChangeMask::empty();
    if data.len() < 10 {
        return Ok((mask, fix));
    }
    let tow = get_f32_be(data, 0)? as f64;
    let week = get_i16_be(data, 4)? as i64;
    let leap = get_f32_be(data, 6)?;
    if leap > 10.0 {
        let leap = leap.round() as i32;
        state.gps_week = Some(week as u16);
        state.leap_seconds = Some(leap);
        fix.time = Some(gpstime_to_unix(week, tow, leap));
        mask |= ChangeMask::TIME;
    }
    Ok((mask, fix))
}

/// Message 0x47, Signal Levels for all Satellites.
fn decode_0x47(data: &[u8], sky_view: &mut Vec<SkyViewEntry>) -> Result<ChangeMask> {
    if data.is_empty() {
        return Ok(ChangeMask::empty());
    }
    let count = get_u8(data, 0)? as usize;
    if data.len() < 1 + 5 * count {
        return Ok(ChangeMask::empty());
    }
    sky_view.clear();
    for i in 0..count {
        let prn = get_u8(data, 5 * i + 1)? as u16;
        let snr = get_f32_be(data, 5 * i + 2)? as f64;
        let mut entry = SkyViewEntry::new(prn, crate::fix::GnssId::Gps);
        entry.snr = Some(snr);
        entry.used = true;
        sky_view.push(entry);
    }
    Ok(ChangeMask::SATELLITE)
}

/// Message 0x4a, Single-Precision Position LLA. Time-of-fix is bare TOW;
/// only convertible to Unix time once a GPS week is known from 0x41/0x57.
fn decode_0x4a(data: &[u8], state: &TsipState) -> Result<(ChangeMask, Fix)> {
    let mut fix = Fix::new();
    let mut mask = ChangeMask::empty();
    if data.len() < 20 {
        return Ok((mask, fix));
    }
    fix.lat = Some(get_f32_be(data, 0)? as f64 * RAD_2_DEG);
    fix.lon = Some(get_f32_be(data, 4)? as f64 * RAD_2_DEG);
    fix.alt_msl = Some(get_f32_be(data, 8)? as f64);
    let tow = get_f32_be(data, 16)? as f64;
    fix.status = Some(Status::Fix);
    mask |= ChangeMask::LATLON | ChangeMask::ALTITUDE | ChangeMask::STATUS;
    if let Some(week) = state.gps_week {
        let leap = state.leap_seconds.unwrap_or(0);
        fix.time = Some(gpstime_to_unix(week as i64, tow, leap));
        mask |= ChangeMask::TIME;
    }
    Ok((mask, fix))
}

/// Message 0x56, Velocity Fix, East-North-Up.
fn decode_0x56(data: &[u8]) -> Result<(ChangeMask, Fix)> {
    let mut fix = Fix::new();
    let mut mask = ChangeMask::empty();
    if data.len() < 20 {
        return Ok((mask, fix));
    }
    let east = get_f32_be(data, 0)? as f64;
    let north = get_f32_be(data, 4)? as f64;
    let up = get_f32_be(data, 8)? as f64;
    fix.climb = Some(up);
    fix.speed = Some((east * east + north * north).sqrt());
    let mut track = east.atan2(north).to_degrees();
    if track < 0.0 {
        track += 360.0;
    }
    fix.track = Some(track);
    mask |= ChangeMask::SPEED | ChangeMask::TRACK | ChangeMask::CLIMB;
    Ok((mask, fix))
}

/// Message 0x6d, All-In-View Satellite Selection: mode + DOPs.
fn decode_0x6d(data: &[u8]) -> Result<(ChangeMask, Fix, Dop, Vec<bool>)> {
    let mut fix = Fix::new();
    let mut mask = ChangeMask::empty();
    let mut dop = Dop::default();
    let mut used = Vec::new();
    if data.is_empty() {
        return Ok((mask, fix, dop, used));
    }
    let u1 = get_u8(data, 0)? as u32;
    fix.mode = Some(match u1 & 0x07 {
        3 => Mode::Fix2D,
        4 => Mode::Fix3D,
        _ => Mode::NoFix,
    });
    mask |= ChangeMask::MODE;

    let nused = ((u1 >> 4) & 0x0f) as usize;
    if data.len() < 16 + nused {
        return Ok((mask, fix, dop, used));
    }
    dop.pdop = Some(get_f32_be(data, 1)? as f64);
    dop.hdop = Some(get_f32_be(data, 5)? as f64);
    dop.vdop = Some(get_f32_be(data, 9)? as f64);
    dop.tdop = Some(get_f32_be(data, 13)? as f64);
    if let (Some(p), Some(t)) = (dop.pdop, dop.tdop) {
        dop.gdop = Some((p * p + t * t).sqrt());
    }
    mask |= ChangeMask::DOP;

    for i in 0..nused {
        used.push(get_u8(data, 16 + i)? != 0);
    }
    Ok((mask, fix, dop, used))
}

/// Message 0x82, Differential Position Fix Mode: only ever upgrades a
/// plain fix to DGPS, never the reverse.
fn decode_0x82(data: &[u8], fix: &mut Fix) -> Result<ChangeMask> {
    if data.is_empty() {
        return Ok(ChangeMask::empty());
    }
    let flags = get_u8(data, 0)?;
    if fix.status == Some(Status::Fix) && flags & 0x01 != 0 {
        fix.status = Some(Status::Dgps);
        return Ok(ChangeMask::STATUS);
    }
    Ok(ChangeMask::empty())
}

/// Message 0x84, Double-Precision LLA Position Fix and Bias Information.
fn decode_0x84(data: &[u8], state: &TsipState) -> Result<(ChangeMask, Fix)> {
    let mut fix = Fix::new();
    let mut mask = ChangeMask::empty();
    if data.len() < 36 {
        return Ok((mask, fix));
    }
    fix.lat = Some(get_f64_be(data, 0)? * RAD_2_DEG);
    fix.lon = Some(get_f64_be(data, 8)? * RAD_2_DEG);
    fix.alt_msl = Some(get_f64_be(data, 16)?);
    let tow = get_f32_be(data, 32)? as f64;
    fix.status = Some(Status::Fix);
    mask |= ChangeMask::LATLON | ChangeMask::ALTITUDE | ChangeMask::STATUS;
    if let Some(week) = state.gps_week {
        let leap = state.leap_seconds.unwrap_or(0);
        fix.time = Some(gpstime_to_unix(week as i64, tow, leap));
        mask |= ChangeMask::TIME;
    }
    Ok((mask, fix))
}

/// Decode one TSIP payload (`payload[0]` is the message id, `payload[1..]`
/// the DLE-destuffed body). Returns the change mask, fix delta, and a DOP
/// delta (0x6d is the only TSIP message that reports DOPs); `used_flags`
/// is a placeholder for the per-satellite used array 0x6d also reports,
/// which callers may fold into `Session::sky_view`.
pub fn decode(
    payload: &[u8],
    state: &mut TsipState,
    sky_view: &mut Vec<SkyViewEntry>,
) -> Result<(ChangeMask, Fix, Dop)> {
    if payload.is_empty() {
        return Ok((ChangeMask::empty(), Fix::new(), Dop::default()));
    }
    let data = &payload[1..];
    match payload[0] {
        0x41 => {
            let (mask, fix) = decode_0x41(data, state)?;
            Ok((mask, fix, Dop::default()))
        }
        0x47 => {
            let mask = decode_0x47(data, sky_view)?;
            Ok((mask, Fix::new(), Dop::default()))
        }
        0x4a => {
            let (mask, fix) = decode_0x4a(data, state)?;
            Ok((mask, fix, Dop::default()))
        }
        0x56 => {
            let (mask, fix) = decode_0x56(data)?;
            Ok((mask, fix, Dop::default()))
        }
        0x6d => {
            let (mask, fix, dop, used) = decode_0x6d(data)?;
            for (i, flag) in used.into_iter().enumerate() {
                if let Some(entry) = sky_view.get_mut(i) {
                    entry.used = flag;
                }
            }
            Ok((mask, fix, dop))
        }
        0x82 => {
            let mut fix = Fix::new();
            fix.status = Some(Status::Fix);
            let mask = decode_0x82(data, &mut fix)?;
            Ok((mask, fix, Dop::default()))
        }
        0x84 => {
            let (mask, fix) = decode_0x84(data, state)?;
            Ok((mask, fix, Dop::default()))
        }
        _ => Ok((ChangeMask::empty(), Fix::new(), Dop::default())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gps_time_ignores_implausible_leap_seconds() {
        let mut state = TsipState::new();
        let mut data = vec![0u8; 10];
        data[4..6].copy_from_slice(&2000i16.to_be_bytes());
        data[6..10].copy_from_slice(&1.0f32.to_be_bytes());
        let (mask, fix) = decode_0x41(&data, &mut state).unwrap();
        assert!(mask.is_empty());
        assert!(fix.time.is_none());
        assert!(state.leap_seconds.is_none());
    }

    #[test]
    fn gps_time_accepts_plausible_leap_seconds() {
        let mut state = TsipState::new();
        let mut data = vec![0u8; 10];
        data[4..6].copy_from_slice(&2000i16.to_be_bytes());
        data[6..10].copy_from_slice(&18.0f32.to_be_bytes());
        let (mask, fix) = decode_0x41(&data, &mut state).unwrap();
        assert!(mask.contains(ChangeMask::TIME));
        assert_eq!(state.leap_seconds, Some(18));
        assert!(fix.time.unwrap() > 0.0);
    }

    #[test]
    fn lla_position_needs_gps_week_for_time() {
        let state = TsipState::new();
        let mut data = vec![0u8; 20];
        data[0..4].copy_from_slice(&0.7f32.to_be_bytes());
        let (mask, fix) = decode_0x4a(&data, &state).unwrap();
        assert!(mask.contains(ChangeMask::LATLON));
        assert!(!mask.contains(ChangeMask::TIME));
        assert!(fix.time.is_none());
    }

    #[test]
    fn dgps_mode_upgrades_plain_fix_only() {
        let mut fix = Fix::new();
        fix.status = Some(Status::Fix);
        let mask = decode_0x82(&[0x01], &mut fix).unwrap();
        assert!(mask.contains(ChangeMask::STATUS));
        assert_eq!(fix.status, Some(Status::Dgps));
    }

    #[test]
    fn all_in_view_reports_dop_and_mode() {
        let nused = 3usize;
        let mut data = vec![0u8; 16 + nused];
        data[0] = 0x34; // dim=4 (3D), nused=3
        data[1..5].copy_from_slice(&2.0f32.to_be_bytes());
        data[5..9].copy_from_slice(&1.0f32.to_be_bytes());
        data[9..13].copy_from_slice(&1.5f32.to_be_bytes());
        data[13..17].copy_from_slice(&1.0f32.to_be_bytes());
        let (mask, fix, dop, used) = decode_0x6d(&data).unwrap();
        assert_eq!(fix.mode, Some(Mode::Fix3D));
        assert!(mask.contains(ChangeMask::DOP));
        assert_eq!(dop.hdop, Some(1.0));
        assert_eq!(used.len(), nused);
    }
}
