//! RTCM SC-104 v2.x decoder (spec.md 4.7). Operates on the word array the
//! ISGPS transport (`isgps`) hands up once a preamble-matched, parity-
//! checked message completes; ported from gpsd's `driver_rtcm2.c`.
//!
//! Each 30-bit word carries a 24-bit data field (bits 29..6) and 6 parity
//! bits (bits 5..0, already checked and stripped by `isgps`). This module
//! concatenates the data fields into one flat bitstream and overlays
//! `bits::get_bits_*` on it rather than reconstructing gpsd's original
//! bitfield-struct-over-a-byte-buffer layout field by field.

use crate::bits::{get_bits_signed, get_bits_unsigned};

pub const ZCOUNT_SCALE: f64 = 0.6; // seconds
pub const PCSMALL: f64 = 0.02; // meters
pub const PCLARGE: f64 = 0.32; // meters
pub const RRSMALL: f64 = 0.002; // m/s
pub const RRLARGE: f64 = 0.032; // m/s
pub const XYZ_SCALE: f64 = 0.01; // meters
pub const DXYZ_SCALE: f64 = 0.1; // meters
pub const LA_SCALE: f64 = 90.0 / 32767.0; // degrees
pub const LO_SCALE: f64 = 180.0 / 32767.0; // degrees
pub const FREQ_SCALE: f64 = 0.1; // kHz
pub const FREQ_OFFSET: f64 = 99.9; // kHz
pub const TU_SCALE: f64 = 5.0; // minutes
pub const CNR_OFFSET: i32 = 24;

const TX_SPEED: [u16; 8] = [25, 50, 100, 110, 150, 200, 250, 300];

/// `word >> 6 & 0xff_ffff`: the 24-bit data field of one ISGPS word.
fn data_field(word: u32) -> u32 {
    (word >> 6) & 0x00ff_ffff
}

/// Word 0/1 (preamble+type+station id, zcount+seqno+length+health) are
/// header fields common to every message type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub message_type: u16,
    pub station_id: u16,
    pub zcount: f64,
    pub seqno: u8,
    pub length_words: u8,
    pub station_health: u8,
}

fn decode_header(words: &[u32]) -> Option<Header> {
    if words.len() < 2 {
        return None;
    }
    let w1 = data_field(words[0]);
    let w2 = data_field(words[1]);
    Some(Header {
        message_type: ((w1 >> 10) & 0x3f) as u16,
        station_id: (w1 & 0x3ff) as u16,
        zcount: ((w2 >> 11) & 0x1fff) as f64 * ZCOUNT_SCALE,
        seqno: ((w2 >> 8) & 0x07) as u8,
        length_words: ((w2 >> 3) & 0x1f) as u8,
        station_health: (w2 & 0x07) as u8,
    })
}

/// How many words the length field in word 2 says this message needs
/// (header + body), used by the ISGPS transport to know when to stop.
pub fn length_check(words: &[u32]) -> bool {
    match decode_header(words) {
        Some(h) => words.len() >= 2 + h.length_words as usize,
        None => false,
    }
}

/// Flatten every word's 24-bit data field into one big-endian bitstream,
/// byte-packed for `bits::get_bits_*`.
fn flatten(words: &[u32]) -> Vec<u8> {
    let total_bits = words.len() * 24;
    let mut out = vec![0u8; (total_bits + 7) / 8];
    let mut bit = 0;
    for &w in words {
        let data = data_field(w);
        for i in (0..24).rev() {
            if (data >> i) & 1 != 0 {
                out[bit / 8] |= 0x80 >> (bit % 8);
            }
            bit += 1;
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PseudorangeCorrection {
    pub sat_id: u8,
    pub udre: u8,
    pub issue_of_data: u8,
    pub range_error_m: f64,
    pub range_rate_error_mps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceStationEcef {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceDatum {
    pub glonass: bool,
    pub global_sense: bool,
    pub datum: String,
    pub dx: Option<f64>,
    pub dy: Option<f64>,
    pub dz: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SatelliteHealth {
    pub sat_id: u8,
    pub issue_of_data_link: bool,
    pub data_health: u8,
    pub snr: Option<i32>,
    pub health_enable: bool,
    pub new_nav_data: bool,
    pub loss_warning: bool,
    pub time_unhealthy_min: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlmanacStation {
    pub latitude: f64,
    pub longitude: f64,
    pub range_m: u16,
    pub frequency_khz: f64,
    pub health: u8,
    pub station_id: u16,
    pub bitrate_bps: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    PseudorangeCorrections(Vec<PseudorangeCorrection>),
    ReferenceStation(ReferenceStationEcef),
    ReferenceDatum(ReferenceDatum),
    ConstellationHealth(Vec<SatelliteHealth>),
    Almanac(Vec<AlmanacStation>),
    Text(String),
    Unhandled(u16),
}

/// Unpack message type 1/9 (GPS pseudorange corrections): 40-bit blocks,
/// up to 3 per 5-word group, per gpsd's `rtcm2_unpack` loop.
fn decode_corrections(data: &[u8], length_words: u8) -> Vec<PseudorangeCorrection> {
    let n_blocks = (length_words as usize * 24) / 40;
    let mut out = Vec::with_capacity(n_blocks);
    for i in 0..n_blocks {
        let base = i * 40;
        let scale_large = get_bits_unsigned(data, base, 1) != 0;
        let udre = get_bits_unsigned(data, base + 1, 2) as u8;
        let sat_id = get_bits_unsigned(data, base + 3, 5) as u8;
        let pc = get_bits_signed(data, base + 8, 16);
        let rr = get_bits_signed(data, base + 24, 8);
        let iod = get_bits_unsigned(data, base + 32, 8) as u8;
        let pc_scale = if scale_large { PCLARGE } else { PCSMALL };
        let rr_scale = if scale_large { RRLARGE } else { RRSMALL };
        out.push(PseudorangeCorrection {
            sat_id,
            udre,
            issue_of_data: iod,
            range_error_m: pc as f64 * pc_scale,
            range_rate_error_mps: rr as f64 * rr_scale,
        });
    }
    out
}

/// Unpack message type 3 (reference station ECEF coordinates).
fn decode_reference_station(data: &[u8]) -> ReferenceStationEcef {
    let x = get_bits_signed(data, 0, 32);
    let y = get_bits_signed(data, 32, 32);
    let z = get_bits_signed(data, 64, 32);
    ReferenceStationEcef {
        x: x as f64 * XYZ_SCALE,
        y: y as f64 * XYZ_SCALE,
        z: z as f64 * XYZ_SCALE,
    }
}

/// Unpack message type 4 (reference station datum + optional WGS-84
/// translation).
fn decode_datum(data: &[u8], length_words: u8) -> ReferenceDatum {
    let glonass = get_bits_unsigned(data, 0, 1) != 0;
    let global_sense = get_bits_unsigned(data, 1, 1) != 0;
    let mut datum = String::new();
    for (start, width) in [(2, 8), (10, 8), (24, 8), (32, 8), (40, 8)] {
        let c = get_bits_unsigned(data, start, width) as u8;
        if c != 0 {
            datum.push(c as char);
        }
    }
    let (dx, dy, dz) = if length_words >= 4 {
        (
            Some(get_bits_signed(data, 48, 16) as f64 * DXYZ_SCALE),
            Some(get_bits_signed(data, 64, 16) as f64 * DXYZ_SCALE),
            Some(get_bits_signed(data, 80, 16) as f64 * DXYZ_SCALE),
        )
    } else {
        (None, None, None)
    };
    ReferenceDatum { glonass, global_sense, datum, dx, dy, dz }
}

/// Unpack message type 5 (constellation health): one 24-bit entry per
/// satellite, one entry per data word.
fn decode_constellation_health(data: &[u8], length_words: u8) -> Vec<SatelliteHealth> {
    let mut out = Vec::with_capacity(length_words as usize);
    for i in 0..length_words as usize {
        let base = i * 24;
        let sat_id = get_bits_unsigned(data, base, 5) as u8;
        let iodl = get_bits_unsigned(data, base + 5, 1) != 0;
        let health = get_bits_unsigned(data, base + 6, 3) as u8;
        let cn0 = get_bits_unsigned(data, base + 9, 5) as i32;
        let health_enable = get_bits_unsigned(data, base + 14, 1) != 0;
        let new_data = get_bits_unsigned(data, base + 15, 1) != 0;
        let loss_warn = get_bits_unsigned(data, base + 16, 1) != 0;
        let tou = get_bits_unsigned(data, base + 17, 7) as f64;
        out.push(SatelliteHealth {
            sat_id,
            issue_of_data_link: iodl,
            data_health: health,
            snr: if cn0 != 0 { Some(cn0 + CNR_OFFSET) } else { None },
            health_enable,
            new_nav_data: new_data,
            loss_warning: loss_warn,
            time_unhealthy_min: tou * TU_SCALE,
        });
    }
    out
}

/// Unpack message type 7 (DGPS reference station almanac): 72-bit (3
/// word) entries.
fn decode_almanac(data: &[u8], length_words: u8) -> Vec<AlmanacStation> {
    let n = length_words as usize / 3;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let base = i * 72;
        let lat = get_bits_signed(data, base, 16) as f64 * LA_SCALE;
        let lon = get_bits_unsigned(data, base + 16, 16) as f64 * LO_SCALE;
        let range = get_bits_unsigned(data, base + 32, 10) as u16;
        let freq_raw = get_bits_unsigned(data, base + 42, 12) as f64;
        let health = get_bits_unsigned(data, base + 54, 2) as u8;
        let station_id = get_bits_unsigned(data, base + 56, 10) as u16;
        let bit_rate_idx = get_bits_unsigned(data, base + 66, 3) as usize;
        out.push(AlmanacStation {
            latitude: lat,
            longitude: lon,
            range_m: range,
            frequency_khz: freq_raw * FREQ_SCALE + FREQ_OFFSET,
            health,
            station_id,
            bitrate_bps: TX_SPEED[bit_rate_idx.min(7)],
        });
    }
    out
}

/// Unpack message type 16 (plain text): 3 ASCII bytes per word, stopping
/// at the first NUL.
fn decode_text(data: &[u8], length_words: u8) -> String {
    let mut s = String::new();
    'outer: for i in 0..length_words as usize {
        let base = i * 24;
        for byte_off in [0, 8, 16] {
            let c = get_bits_unsigned(data, base + byte_off, 8) as u8;
            if c == 0 {
                break 'outer;
            }
            s.push(c as char);
        }
    }
    s
}

/// Decode one RTCM v2 message from its assembled word array (the `Frame`
/// payload, reinterpreted as big-endian `u32`s by the caller).
pub fn decode(words: &[u32]) -> Option<(Header, Body)> {
    let header = decode_header(words)?;
    let data = flatten(&words[2..]);
    let body = match header.message_type {
        1 | 9 => Body::PseudorangeCorrections(decode_corrections(&data, header.length_words)),
        3 => Body::ReferenceStation(decode_reference_station(&data)),
        4 => Body::ReferenceDatum(decode_datum(&data, header.length_words)),
        5 => Body::ConstellationHealth(decode_constellation_health(&data, header.length_words)),
        7 => Body::Almanac(decode_almanac(&data, header.length_words)),
        16 => Body::Text(decode_text(&data, header.length_words)),
        other => Body::Unhandled(other),
    };
    Some((header, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack_word(preamble: u8, rest24_minus8: u32) -> u32 {
        let data24 = ((preamble as u32) << 16) | (rest24_minus8 & 0xffff);
        data24 << 6
    }

    #[test]
    fn header_extracts_type_station_and_length() {
        let w1 = pack_word(0x66, (1u32 << 10) | 42); // msgtype=1, stationid=42
        let w2 = (((100u32 << 11) | (0 << 8) | (1 << 3) | 0) & 0x00ff_ffff) << 6; // zcnt=100, len=1
        let header = decode_header(&[w1, w2]).unwrap();
        assert_eq!(header.message_type, 1);
        assert_eq!(header.station_id, 42);
        assert_eq!(header.length_words, 1);
    }

    #[test]
    fn length_check_false_until_enough_words_present() {
        let w1 = pack_word(0x66, (1u32 << 10) | 0);
        let w2 = (((0u32 << 11) | (0 << 8) | (2 << 3) | 0) & 0x00ff_ffff) << 6; // len=2
        assert!(!length_check(&[w1, w2]));
        assert!(length_check(&[w1, w2, 0, 0]));
    }

    #[test]
    fn text_message_stops_at_nul() {
        let mut data = vec![0u8; 3];
        data[0] = b'H';
        data[1] = b'I';
        // third byte stays 0 -> stop
        let s = decode_text(&data, 1);
        assert_eq!(s, "HI");
    }
}
