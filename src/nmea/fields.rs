//! Shared low-level combinators for NMEA sentence bodies: numeric field
//! parsing, HHMMSS.ss time, lat/lon, and DDMMYY date -- generalized from
//! the teacher crate's `parse.rs` (which only handled GGA/RMC/GSA/GSV/VTG/GLL).

use std::str;

use chrono::NaiveTime;
use nom::bytes::complete::{take, take_until};
use nom::character::complete::{char, digit1, one_of};
use nom::combinator::{map_parser, map_res, opt};
use nom::number::complete::double;
use nom::sequence::tuple;
use nom::IResult;

/// A single NMEA sentence split into talker/message id and raw data
/// (the lexer has already verified the `*HH` checksum and stripped the
/// CR/LF terminator by the time this runs).
pub struct NmeaSentence<'a> {
    pub talker_id: &'a [u8],
    pub message_id: &'a [u8],
    pub data: &'a [u8],
}

/// Split a lexer-validated NMEA frame (`$GPGGA,...*42\r\n` or
/// `!AIVDM,...`) into talker id, message id, and the comma-delimited body.
pub fn split_sentence(raw: &[u8]) -> Result<NmeaSentence<'_>, &'static str> {
    if raw.is_empty() || (raw[0] != b'$' && raw[0] != b'!') {
        return Err("sentence does not start with $ or !");
    }
    let body_end = raw
        .iter()
        .position(|&b| b == b'*' || b == b'\r' || b == b'\n')
        .unwrap_or(raw.len());
    let head = &raw[1..body_end];
    // Proprietary sentences (`$P...`) have a single talker-less tag word;
    // standard sentences split 2 (talker) + 3 (message).
    if head.starts_with(b"P") {
        let comma = head.iter().position(|&b| b == b',').unwrap_or(head.len());
        return Ok(NmeaSentence {
            talker_id: b"P",
            message_id: &head[1..comma],
            data: if comma < head.len() { &head[comma + 1..] } else { &[] },
        });
    }
    if head.len() < 5 {
        return Err("sentence head too short");
    }
    let talker_id = &head[0..2];
    let message_id = &head[2..5];
    let data = if head.len() > 6 { &head[6..] } else { &[] };
    Ok(NmeaSentence { talker_id, message_id, data })
}

fn parse_num<I: str::FromStr>(data: &[u8]) -> Result<I, &'static str> {
    str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse::<I>().ok())
        .ok_or("parse of number failed")
}

pub fn number<T: str::FromStr>(i: &[u8]) -> IResult<&[u8], T> {
    map_res(digit1, parse_num)(i)
}

fn parse_float_num<T: str::FromStr>(input: &[u8]) -> Result<T, &'static str> {
    str::from_utf8(input)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .ok_or("parse of float number failed")
}

/// `HHMMSS.ss,` -> `NaiveTime`, as in the teacher's `parse_hms`.
pub fn parse_hms(i: &[u8]) -> IResult<&[u8], NaiveTime> {
    map_res(
        tuple((
            map_res(take(2usize), parse_num::<u32>),
            map_res(take(2usize), parse_num::<u32>),
            map_parser(take_until(","), double),
        )),
        |(hour, minutes, sec)| -> Result<NaiveTime, &'static str> {
            if sec.is_sign_negative() {
                return Err("invalid time: second is negative");
            }
            if hour >= 24 {
                return Err("invalid time: hour >= 24");
            }
            if minutes >= 60 {
                return Err("invalid time: min >= 60");
            }
            Ok(NaiveTime::from_hms_nano(
                hour,
                minutes,
                sec.trunc() as u32,
                (sec.fract() * 1_000_000_000f64).round() as u32,
            ))
        },
    )(i)
}

/// `DDMMYY` -> `(day, month, two_digit_year)`, leaving century expansion
/// to `time::CenturyHint` (spec.md 4.8).
pub fn parse_ddmmyy(i: &[u8]) -> IResult<&[u8], (u32, u32, i32)> {
    map_res(
        tuple((
            map_res(take(2usize), parse_num::<u8>),
            map_res(take(2usize), parse_num::<u8>),
            map_res(take(2usize), parse_num::<u8>),
        )),
        |(day, month, yy)| -> Result<(u32, u32, i32), &'static str> {
            let (day, month) = (u32::from(day), u32::from(month));
            if !(1..=12).contains(&month) {
                return Err("invalid month");
            }
            if !(1..=31).contains(&day) {
                return Err("invalid day");
            }
            Ok((day, month, i32::from(yy)))
        },
    )(i)
}

/// `DDMM.mmmm,N/S,DDDMM.mmmm,E/W` -> signed decimal degrees.
pub fn do_parse_lat_lon(i: &[u8]) -> IResult<&[u8], (f64, f64)> {
    let (i, lat_deg) = map_res(take(2usize), parse_num::<u8>)(i)?;
    let (i, lat_min) = double(i)?;
    let (i, _) = char(',')(i)?;
    let (i, lat_dir) = one_of("NS")(i)?;
    let (i, _) = char(',')(i)?;
    let (i, lon_deg) = map_res(take(3usize), parse_num::<u8>)(i)?;
    let (i, lon_min) = double(i)?;
    let (i, _) = char(',')(i)?;
    let (i, lon_dir) = one_of("EW")(i)?;

    let mut lat = f64::from(lat_deg) + lat_min / 60.;
    if lat_dir == 'S' {
        lat = -lat;
    }
    let mut lon = f64::from(lon_deg) + lon_min / 60.;
    if lon_dir == 'W' {
        lon = -lon;
    }
    Ok((i, (lat, lon)))
}

pub fn parse_lat_lon_opt(i: &[u8]) -> IResult<&[u8], Option<(f64, f64)>> {
    use nom::branch::alt;
    use nom::bytes::complete::tag;
    use nom::combinator::map;
    alt((map(tag(",,,"), |_| None), map(do_parse_lat_lon, Some)))(i)
}

pub fn opt_float(i: &[u8]) -> IResult<&[u8], Option<f64>> {
    opt(double)(i)
}

pub fn opt_float_field<T: str::FromStr>(i: &[u8]) -> IResult<&[u8], Option<T>> {
    opt(map_res(take_until(","), parse_float_num::<T>))(i)
}
