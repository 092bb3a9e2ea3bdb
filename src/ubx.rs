//! u-blox UBX binary protocol decoder (spec.md 4.7). `Frame::payload` is
//! `[class, id, len_lo, len_hi, body...]`; the lexer has already verified
//! the Fletcher-8 checksum. Grounded on the NAV-PVT/NAV-DOP field layout
//! from u-blox's own receiver protocol description (class 0x01, id 0x07
//! and 0x04 respectively).

use chrono::NaiveDate;

use crate::bits::{get_i32_le, get_u16_le, get_u32_le, get_u8};
use crate::error::BitsError;
use crate::fix::{ChangeMask, Dop, Fix, Mode, Status};

type Result<T> = std::result::Result<T, BitsError>;

const NAV_CLASS: u8 = 0x01;
const NAV_PVT: u8 = 0x07;
const NAV_DOP: u8 = 0x04;

/// Decode UBX-NAV-PVT: combined position/velocity/time + fix status.
fn decode_nav_pvt(body: &[u8]) -> Result<(ChangeMask, Fix)> {
    let mut fix = Fix::new();
    let mut mask = ChangeMask::empty();
    if body.len() < 84 {
        return Ok((mask, fix));
    }

    let year = get_u16_le(body, 4)? as i32;
    let month = get_u8(body, 6)? as u32;
    let day = get_u8(body, 7)? as u32;
    let hour = get_u8(body, 8)? as u32;
    let min = get_u8(body, 9)? as u32;
    let sec = get_u8(body, 10)? as u32;
    let valid = get_u8(body, 11)?;
    let nano = get_i32_le(body, 16)?;
    if valid & 0x04 != 0 {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            if let Some(time) = date.and_hms_opt(hour, min, sec) {
                let mut secs = time.and_utc().timestamp() as f64;
                secs += nano as f64 * 1e-9;
                fix.time = Some(secs);
                mask |= ChangeMask::TIME;
            }
        }
    }

    let fix_type = get_u8(body, 20)?;
    let flags = get_u8(body, 21)?;
    let gps_fix_ok = flags & 0x01 != 0;
    let diff_soln = flags & 0x02 != 0;
    fix.status = Some(if !gps_fix_ok {
        Status::NoFix
    } else if diff_soln {
        Status::Dgps
    } else {
        Status::Fix
    });
    fix.mode = Some(match fix_type {
        3 | 4 => Mode::Fix3D,
        2 => Mode::Fix2D,
        _ => Mode::NoFix,
    });
    mask |= ChangeMask::STATUS | ChangeMask::MODE;

    fix.lon = Some(get_i32_le(body, 24)? as f64 * 1e-7);
    fix.lat = Some(get_i32_le(body, 28)? as f64 * 1e-7);
    fix.alt_hae = Some(get_i32_le(body, 32)? as f64 * 1e-3);
    fix.alt_msl = Some(get_i32_le(body, 36)? as f64 * 1e-3);
    fix.epx = Some(get_u32_le(body, 40)? as f64 * 1e-3);
    fix.epy = fix.epx;
    fix.epv = Some(get_u32_le(body, 44)? as f64 * 1e-3);
    mask |= ChangeMask::LATLON | ChangeMask::ALTITUDE | ChangeMask::HERR | ChangeMask::VERR;

    fix.speed = Some(get_u32_le(body, 60)? as f64 * 1e-3);
    fix.track = Some(get_i32_le(body, 64)? as f64 * 1e-5);
    fix.eps = Some(get_u32_le(body, 68)? as f64 * 1e-3);
    mask |= ChangeMask::SPEED | ChangeMask::TRACK | ChangeMask::GST;

    Ok((mask, fix))
}

/// Decode UBX-NAV-DOP: all seven DOP figures, scaled by 0.01.
fn decode_nav_dop(body: &[u8]) -> Result<(ChangeMask, Dop)> {
    let mut dop = Dop::default();
    if body.len() < 18 {
        return Ok((ChangeMask::empty(), dop));
    }
    dop.gdop = Some(get_u16_le(body, 4)? as f64 * 0.01);
    dop.pdop = Some(get_u16_le(body, 6)? as f64 * 0.01);
    dop.tdop = Some(get_u16_le(body, 8)? as f64 * 0.01);
    dop.vdop = Some(get_u16_le(body, 10)? as f64 * 0.01);
    dop.hdop = Some(get_u16_le(body, 12)? as f64 * 0.01);
    dop.ydop = Some(get_u16_le(body, 14)? as f64 * 0.01);
    dop.xdop = Some(get_u16_le(body, 16)? as f64 * 0.01);
    Ok((ChangeMask::DOP, dop))
}

/// Decode one UBX frame. Message classes/ids outside NAV-PVT/NAV-DOP are
/// acknowledged but not yet decoded (spec.md 4.7 allows binary parsers
/// other than SiRF/TSIP/one u-blox family to be stubs).
pub fn decode(payload: &[u8]) -> Result<(ChangeMask, Fix, Dop)> {
    if payload.len() < 4 {
        return Ok((ChangeMask::empty(), Fix::new(), Dop::default()));
    }
    let class = payload[0];
    let id = payload[1];
    let body = &payload[4..];
    match (class, id) {
        (NAV_CLASS, NAV_PVT) => {
            let (mask, fix) = decode_nav_pvt(body)?;
            Ok((mask, fix, Dop::default()))
        }
        (NAV_CLASS, NAV_DOP) => {
            let (mask, dop) = decode_nav_dop(body)?;
            Ok((mask, Fix::new(), dop))
        }
        _ => {
            log::trace!("unhandled UBX message class={:#04x} id={:#04x}", class, id);
            Ok((ChangeMask::empty(), Fix::new(), Dop::default()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nav_pvt_body() -> Vec<u8> {
        let mut b = vec![0u8; 84];
        b[4..6].copy_from_slice(&2024u16.to_le_bytes());
        b[6] = 6;
        b[7] = 15;
        b[8] = 12;
        b[9] = 30;
        b[10] = 0;
        b[11] = 0x04; // validDate|validTime not both, but validTime bit set
        b[20] = 3; // fixType 3D
        b[21] = 0x03; // gpsFixOk | diffSoln
        b[24..28].copy_from_slice(&(-1_231_853_000i32).to_le_bytes()); // lon
        b[28..32].copy_from_slice(&(49_274_200i32).to_le_bytes()); // lat
        b[60..64].copy_from_slice(&1500u32.to_le_bytes()); // gSpeed mm/s
        b
    }

    #[test]
    fn nav_pvt_decodes_fix_and_position() {
        let (mask, fix) = decode_nav_pvt(&nav_pvt_body()).unwrap();
        assert_eq!(fix.mode, Some(Mode::Fix3D));
        assert_eq!(fix.status, Some(Status::Dgps));
        assert!(mask.contains(ChangeMask::LATLON));
        assert!((fix.lat.unwrap() - 4.92742).abs() < 1e-3);
        assert_eq!(fix.speed, Some(1.5));
    }

    #[test]
    fn nav_dop_scales_by_hundredths() {
        let mut body = vec![0u8; 18];
        body[6..8].copy_from_slice(&150u16.to_le_bytes()); // pdop = 1.5
        let (mask, dop) = decode_nav_dop(&body).unwrap();
        assert!(mask.contains(ChangeMask::DOP));
        assert_eq!(dop.pdop, Some(1.5));
    }

    #[test]
    fn unknown_message_is_a_harmless_noop() {
        let payload = vec![0x02, 0x10, 0x00, 0x00];
        let (mask, fix, dop) = decode(&payload).unwrap();
        assert!(mask.is_empty());
        assert!(fix.time.is_none());
        assert!(dop.pdop.is_none());
    }
}
