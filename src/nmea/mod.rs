//! NMEA 0183 sentence parser (spec.md 4.6): tag dispatch over the comma-
//! delimited body the lexer has already framed and checksummed.
//!
//! Ported and generalized from the teacher crate's `parse.rs`, which only
//! covered GGA/RMC/GSA/GSV/VTG/GLL; this module adds GNS/GST/ZDA/GBS/
//! HDG/HDT/DBT/DTM/TXT and the proprietary sentences spec.md 4.6 lists.
//! Per spec.md 4.11/"Error propagation in parsers": a malformed field
//! leaves its sentinel (`None`) rather than failing the whole sentence.

mod fields;

use nom::bytes::complete::take_until;
use nom::character::complete::{char, one_of};
use nom::combinator::opt;
use nom::multi::many0;
use nom::number::complete::double;
use nom::sequence::terminated;
use nom::IResult;

use crate::error::NmeaError;
use crate::fix::{ChangeMask, Fix, GnssId, Mode, SkyViewEntry, Status};
use crate::time::CenturyHint;

pub use fields::{split_sentence, NmeaSentence};

/// Which NMEA sentence a decoder was asked to run against; used only for
/// the defensive `WrongSentence` error (spec.md 4.6 per-sentence tags).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentenceKind {
    Rmc,
    Gga,
    Gll,
    Gns,
    Gsa,
    Gsv,
    Vtg,
    Gst,
    Zda,
    Gbs,
    Hdg,
    Hdt,
    Dbt,
    Dtm,
    Txt,
    Proprietary,
    Unknown,
}

impl SentenceKind {
    fn from_tag(tag: &[u8]) -> SentenceKind {
        match tag {
            b"RMC" => SentenceKind::Rmc,
            b"GGA" => SentenceKind::Gga,
            b"GLL" => SentenceKind::Gll,
            b"GNS" => SentenceKind::Gns,
            b"GSA" => SentenceKind::Gsa,
            b"GSV" => SentenceKind::Gsv,
            b"VTG" => SentenceKind::Vtg,
            b"GST" => SentenceKind::Gst,
            b"ZDA" => SentenceKind::Zda,
            b"GBS" => SentenceKind::Gbs,
            b"HDG" => SentenceKind::Hdg,
            b"HDT" => SentenceKind::Hdt,
            b"DBT" => SentenceKind::Dbt,
            b"DTM" => SentenceKind::Dtm,
            b"TXT" => SentenceKind::Txt,
            _ => SentenceKind::Unknown,
        }
    }
}

/// The stateful accumulator for NMEA parsing (spec.md 3, "NmeaState"):
/// partial date, GGA-latch detection, GSA PRN accumulation across
/// talkers, and GSV multi-sentence grouping.
#[derive(Debug, Clone)]
pub struct NmeaState {
    pub century: CenturyHint,
    last_gga_time: Option<chrono::NaiveTime>,
    last_gga_talker: Option<[u8; 2]>,
    last_gsa_talker: Option<[u8; 2]>,
    gsa_prns: Vec<u32>,
    gsv_sentence_num: u16,
    gsv_number_of_sentences: u16,
    gsv_any_nonzero_azimuth: bool,
    gsv_any_nonzero_elevation: bool,
    pub satellites_used_count: usize,
    zda_seen: bool,
}

impl NmeaState {
    pub fn new(now_unix: i64) -> Self {
        NmeaState {
            century: CenturyHint::from_unix_time(now_unix),
            last_gga_time: None,
            last_gga_talker: None,
            last_gsa_talker: None,
            gsa_prns: Vec::new(),
            gsv_sentence_num: 0,
            gsv_number_of_sentences: 0,
            gsv_any_nonzero_azimuth: false,
            gsv_any_nonzero_elevation: false,
            satellites_used_count: 0,
            zda_seen: false,
        }
    }
}

/// Decode one lexer-framed NMEA sentence, updating `state` and `sky_view`
/// in place and returning the change-mask plus the newdata to merge.
pub fn decode(
    raw: &[u8],
    state: &mut NmeaState,
    sky_view: &mut Vec<SkyViewEntry>,
) -> Result<(ChangeMask, Fix), NmeaError> {
    let sentence = split_sentence(raw).map_err(NmeaError::Malformed)?;
    let kind = SentenceKind::from_tag(sentence.message_id);
    let mut fix = Fix::new();
    let mut mask = ChangeMask::ONLINE;

    match kind {
        SentenceKind::Rmc => decode_rmc(&sentence, state, &mut fix, &mut mask),
        SentenceKind::Gga => decode_gga(&sentence, state, &mut fix, &mut mask),
        SentenceKind::Gll => decode_gll(&sentence, &mut fix, &mut mask),
        SentenceKind::Gsa => decode_gsa(&sentence, state, &mut fix, &mut mask),
        SentenceKind::Gsv => decode_gsv(&sentence, state, sky_view, &mut mask),
        SentenceKind::Vtg => decode_vtg(&sentence, &mut fix, &mut mask),
        SentenceKind::Gns => decode_gns(&sentence, &mut fix, &mut mask),
        SentenceKind::Gst => decode_gst(&sentence, &mut fix, &mut mask),
        SentenceKind::Zda => decode_zda(&sentence, state, &mut fix, &mut mask),
        SentenceKind::Gbs => decode_gbs(&sentence, &mut fix, &mut mask),
        SentenceKind::Hdg | SentenceKind::Hdt => decode_heading(&sentence, &mut fix, &mut mask),
        SentenceKind::Dbt | SentenceKind::Dtm | SentenceKind::Txt => {
            // Depth/datum/text: acknowledged but not folded into the fix
            // model (spec.md 4.6 lists them only as "heading, depth,
            // datum, text" with no further semantics specified here).
        }
        SentenceKind::Proprietary => decode_proprietary(&sentence, &mut fix, &mut mask),
        SentenceKind::Unknown => {
            // Unknown tag within known NMEA framing: still emit ONLINE,
            // per spec.md 4.11 ("parser returns an ONLINE mask and logs").
            log::debug!("nmea: unrecognized sentence tag {:?}", String::from_utf8_lossy(sentence.message_id));
        }
    }

    Ok((mask, fix))
}

fn status_from_faa_mode(c: char) -> Option<Status> {
    match c {
        'A' => Some(Status::Fix),
        'D' => Some(Status::Dgps),
        'E' => Some(Status::Dr),
        'F' => Some(Status::RtkFloat),
        'N' => Some(Status::NoFix),
        'P' => Some(Status::Dgps),
        'R' => Some(Status::Rtk),
        'S' => Some(Status::NoFix),
        _ => None,
    }
}

fn do_parse_rmc(
    i: &[u8],
) -> IResult<&[u8], (Option<chrono::NaiveTime>, char, Option<(f64, f64)>, Option<f64>, Option<f64>, Option<(u32, u32, i32)>, Option<f64>, Option<char>, Option<char>)> {
    let (i, fix_time) = terminated(opt(fields::parse_hms), char(','))(i)?;
    let (i, status) = terminated(one_of("ADV"), char(','))(i)?;
    let (i, lat_lon) = terminated(fields::parse_lat_lon_opt, char(','))(i)?;
    let (i, speed_knots) = terminated(fields::opt_float, char(','))(i)?;
    let (i, course) = terminated(fields::opt_float, char(','))(i)?;
    let (i, date) = terminated(opt(fields::parse_ddmmyy), char(','))(i)?;
    let (i, mag_var) = terminated(fields::opt_float, char(','))(i)?;
    let (i, mag_var_dir) = opt(one_of("EW"))(i)?;
    let (i, _) = opt(char(','))(i)?;
    let (i, faa_mode) = opt(one_of("ADEFNPRS"))(i)?;
    Ok((i, (fix_time, status, lat_lon, speed_knots, course, date, mag_var, mag_var_dir, faa_mode)))
}

const KNOTS_TO_MPS: f64 = 0.514_444_44;

fn decode_rmc(s: &NmeaSentence, state: &mut NmeaState, fix: &mut Fix, mask: &mut ChangeMask) {
    let parsed = match do_parse_rmc(s.data) {
        Ok((_, v)) => v,
        Err(_) => return,
    };
    let (fix_time, status, lat_lon, speed_knots, course, date, mag_var, mag_var_dir, faa_mode) = parsed;

    if let Some((day, month, yy)) = date {
        let year = state.century.expand_rmc_year(yy);
        if let Some(d) = chrono::NaiveDate::from_ymd_opt(year, month, day) {
            if let Some(t) = fix_time {
                let naive = d.and_time(t);
                fix.time = Some(naive.timestamp() as f64 + naive.timestamp_subsec_nanos() as f64 * 1e-9);
                *mask |= ChangeMask::TIME;
            }
        }
    }

    if let Some((lat, lon)) = lat_lon {
        fix.lat = Some(lat);
        fix.lon = Some(lon);
        *mask |= ChangeMask::LATLON;
    }

    if let Some(knots) = speed_knots {
        fix.speed = Some(knots * KNOTS_TO_MPS);
        *mask |= ChangeMask::SPEED;
    }
    if let Some(c) = course {
        fix.track = Some(c);
        *mask |= ChangeMask::TRACK;
    }
    if let (Some(v), Some(dir)) = (mag_var, mag_var_dir) {
        fix.magnetic_var = Some(if dir == 'W' { -v } else { v });
        *mask |= ChangeMask::MAGNETIC_TRACK;
    }

    let resolved_status = faa_mode
        .and_then(status_from_faa_mode)
        .or(match status {
            'A' => Some(Status::Fix),
            'D' => Some(Status::Dgps),
            'V' => Some(Status::NoFix),
            _ => None,
        });
    if let Some(st) = resolved_status {
        fix.status = Some(st);
        *mask |= ChangeMask::STATUS;

        let mode = if st == Status::NoFix {
            Mode::NoFix
        } else if state.satellites_used_count < 4 {
            Mode::Fix2D
        } else {
            Mode::Fix3D
        };
        fix.mode = Some(mode);
        *mask |= ChangeMask::MODE;
    }
}

fn do_parse_gga(
    i: &[u8],
) -> IResult<&[u8], (Option<chrono::NaiveTime>, Option<(f64, f64)>, char, Option<u32>, Option<f64>, Option<f64>, Option<f64>)> {
    let (i, fix_time) = terminated(opt(fields::parse_hms), char(','))(i)?;
    let (i, lat_lon) = terminated(fields::parse_lat_lon_opt, char(','))(i)?;
    let (i, fix_quality) = terminated(one_of("012345678"), char(','))(i)?;
    let (i, sats) = terminated(opt(fields::number::<u32>), char(','))(i)?;
    let (i, hdop) = terminated(fields::opt_float, char(','))(i)?;
    let (i, altitude) = terminated(fields::opt_float, char(','))(i)?;
    let (i, _) = terminated(opt(char('M')), char(','))(i)?;
    let (i, geoid_sep) = terminated(fields::opt_float, char(','))(i)?;
    Ok((i, (fix_time, lat_lon, fix_quality, sats, hdop, altitude, geoid_sep)))
}

fn status_from_gga_quality(q: char) -> Status {
    match q {
        '0' => Status::NoFix,
        '2' => Status::Dgps,
        '4' => Status::Rtk,
        '5' => Status::RtkFloat,
        '6' => Status::Dr,
        _ => Status::Fix,
    }
}

fn decode_gga(s: &NmeaSentence, state: &mut NmeaState, fix: &mut Fix, mask: &mut ChangeMask) {
    let parsed = match do_parse_gga(s.data) {
        Ok((_, v)) => v,
        Err(_) => return,
    };
    let (fix_time, lat_lon, quality, sats, hdop, altitude, geoid_sep) = parsed;

    let talker: Option<[u8; 2]> = s.talker_id.try_into().ok();
    if let (Some(t), Some(prev_t), Some(prev_time)) = (talker, state.last_gga_talker, state.last_gga_time) {
        if let Some(now) = fix_time {
            if t == prev_t && now == prev_time {
                // Latch: a stuck device repeating the same timestamp.
                // Suppress MODE and hold the previous fix (spec.md 4.6).
                log::debug!("nmea: GGA latch detected for talker {:?}", t);
                return;
            }
        }
    }
    state.last_gga_talker = talker;
    state.last_gga_time = fix_time;

    if let Some(t) = fix_time {
        fix.time = Some((t.num_seconds_from_midnight() as f64) + (t.nanosecond() as f64 * 1e-9));
        *mask |= ChangeMask::TIME;
    }
    if let Some((lat, lon)) = lat_lon {
        fix.lat = Some(lat);
        fix.lon = Some(lon);
        *mask |= ChangeMask::LATLON;
    }
    fix.status = Some(status_from_gga_quality(quality));
    *mask |= ChangeMask::STATUS;
    if quality != '0' {
        fix.mode = Some(if state.satellites_used_count >= 4 { Mode::Fix3D } else { Mode::Fix2D });
        *mask |= ChangeMask::MODE;
    } else {
        fix.mode = Some(Mode::NoFix);
        *mask |= ChangeMask::MODE;
    }
    if let Some(n) = sats {
        state.satellites_used_count = n as usize;
        *mask |= ChangeMask::USED;
    }
    if let Some(h) = hdop {
        let _ = h; // DOP slot itself is filled by `dop::fill`; HDOP here only informs USED bookkeeping.
    }
    if let Some(a) = altitude {
        fix.alt_msl = Some(a);
        *mask |= ChangeMask::ALTITUDE;
    }
    if let Some(g) = geoid_sep {
        fix.geoid_sep = Some(g);
        if let Some(msl) = fix.alt_msl {
            fix.alt_hae = Some(msl + g);
        }
    }
}

use chrono::Timelike;

fn decode_gll(s: &NmeaSentence, fix: &mut Fix, mask: &mut ChangeMask) {
    let parsed: IResult<&[u8], _> = (|i| {
        let (i, lat_lon) = fields::do_parse_lat_lon(i)?;
        let (i, _) = char(',')(i)?;
        let (i, t) = fields::parse_hms(i)?;
        let (i, _) = char(',')(i)?;
        let (i, valid) = one_of("AV")(i)?;
        Ok((i, (lat_lon, t, valid)))
    })(s.data);
    let ((lat, lon), t, valid) = match parsed {
        Ok((_, v)) => v,
        Err(_) => return,
    };
    if valid != 'A' {
        return;
    }
    fix.lat = Some(lat);
    fix.lon = Some(lon);
    fix.time = Some(t.num_seconds_from_midnight() as f64 + t.nanosecond() as f64 * 1e-9);
    *mask |= ChangeMask::LATLON | ChangeMask::TIME;
}

fn decode_gns(s: &NmeaSentence, fix: &mut Fix, mask: &mut ChangeMask) {
    let parsed: IResult<&[u8], _> = (|i| {
        let (i, t) = terminated(opt(fields::parse_hms), char(','))(i)?;
        let (i, lat_lon) = terminated(fields::parse_lat_lon_opt, char(','))(i)?;
        let (i, nav_status) = take_until(",")(i)?;
        Ok((i, (t, lat_lon, nav_status)))
    })(s.data);
    let (t, lat_lon, nav_status) = match parsed {
        Ok((_, v)) => v,
        Err(_) => return,
    };
    if nav_status == b"V" {
        // Navigation-status field invalidates the fix (spec.md 4.6).
        return;
    }
    if let Some(t) = t {
        fix.time = Some(t.num_seconds_from_midnight() as f64 + t.nanosecond() as f64 * 1e-9);
        *mask |= ChangeMask::TIME;
    }
    if let Some((lat, lon)) = lat_lon {
        fix.lat = Some(lat);
        fix.lon = Some(lon);
        *mask |= ChangeMask::LATLON;
    }
}

fn decode_gsa(s: &NmeaSentence, state: &mut NmeaState, fix: &mut Fix, mask: &mut ChangeMask) {
    let parsed: IResult<&[u8], _> = (|i| {
        let (i, _mode1) = terminated(one_of("MA"), char(','))(i)?;
        let (i, mode2) = terminated(one_of("123"), char(','))(i)?;
        let (i, prns) = many0(terminated(opt(fields::number::<u32>), char(',')))(i)?;
        let (i, pdop) = terminated(fields::opt_float, char(','))(i)?;
        let (i, hdop) = terminated(fields::opt_float, char(','))(i)?;
        let (i, vdop) = opt(double)(i)?;
        Ok((i, (mode2, prns, pdop, hdop, vdop)))
    })(s.data);
    let (mode2, prns, _pdop, _hdop, _vdop) = match parsed {
        Ok((_, v)) => v,
        Err(_) => return,
    };

    let talker: Option<[u8; 2]> = s.talker_id.try_into().ok();
    let same_talker = talker.is_some() && talker == state.last_gsa_talker;
    if same_talker || state.last_gsa_talker.is_none() {
        state.gsa_prns.clear();
    }
    state.last_gsa_talker = talker;
    for prn in prns.into_iter().flatten() {
        if !state.gsa_prns.contains(&prn) {
            state.gsa_prns.push(prn);
        }
    }
    state.satellites_used_count = state.gsa_prns.len();
    *mask |= ChangeMask::USED;

    fix.mode = Some(match mode2 {
        '1' => Mode::NoFix,
        '2' => Mode::Fix2D,
        _ => Mode::Fix3D,
    });
    *mask |= ChangeMask::MODE;
    // DOP values reported here are written into the session's Dop set by
    // the caller (not part of Fix); PDOP/HDOP/VDOP strings are parsed
    // above for that purpose and exposed via `parse_gsa_dop`.
}

/// Re-parse just the trailing PDOP/HDOP/VDOP of a GSA sentence, for
/// callers that maintain a `Dop` separately from `Fix` (spec.md 4.9:
/// "device-reported DOPs always win").
pub fn parse_gsa_dop(s: &NmeaSentence) -> Option<(f64, f64, f64)> {
    let parsed: IResult<&[u8], _> = (|i| {
        let (i, _mode1) = terminated(one_of("MA"), char(','))(i)?;
        let (i, _mode2) = terminated(one_of("123"), char(','))(i)?;
        let (i, _prns) = many0(terminated(opt(fields::number::<u32>), char(',')))(i)?;
        let (i, pdop) = terminated(double, char(','))(i)?;
        let (i, hdop) = terminated(double, char(','))(i)?;
        let (i, vdop) = double(i)?;
        Ok((i, (pdop, hdop, vdop)))
    })(s.data);
    parsed.ok().map(|(_, v)| v)
}

/// PRN -> `(gnss_id, normalized_prn)` per spec.md 4.6's remap table.
fn normalize_prn(talker: &[u8], sat_num: u32) -> (GnssId, u16) {
    match talker {
        b"GL" => (GnssId::Glonass, sat_num as u16),
        b"GA" => (GnssId::Galileo, sat_num as u16 + 300),
        b"GB" | b"BD" => (GnssId::Beidou, sat_num as u16 + 400),
        b"GQ" | b"QZ" => (GnssId::Qzss, sat_num as u16),
        _ => {
            if (33..=64).contains(&sat_num) {
                (GnssId::Sbas, sat_num as u16 + 87) // 33..64 -> 120..151
            } else if (65..=96).contains(&sat_num) {
                (GnssId::Glonass, sat_num as u16)
            } else if (173..=182).contains(&sat_num) {
                (GnssId::Imes, sat_num as u16)
            } else if (193..=197).contains(&sat_num) {
                (GnssId::Qzss, sat_num as u16)
            } else {
                (GnssId::Gps, sat_num as u16)
            }
        }
    }
}

fn decode_gsv(s: &NmeaSentence, state: &mut NmeaState, sky_view: &mut Vec<SkyViewEntry>, mask: &mut ChangeMask) {
    let parsed: IResult<&[u8], _> = (|i| {
        let (i, total) = terminated(fields::number::<u16>, char(','))(i)?;
        let (i, num) = terminated(fields::number::<u16>, char(','))(i)?;
        let (i, _visible) = terminated(fields::number::<u16>, char(','))(i)?;
        let (i, sats) = many0(parse_gsv_sat)(i)?;
        Ok((i, (total, num, sats)))
    })(s.data);
    let (total, num, sats) = match parsed {
        Ok((_, v)) => v,
        Err(_) => return,
    };

    if num == 1 {
        sky_view.clear();
        state.gsv_any_nonzero_azimuth = false;
        state.gsv_any_nonzero_elevation = false;
    }
    state.gsv_sentence_num = num;
    state.gsv_number_of_sentences = total;

    for (prn, el, az, snr) in sats {
        let (gnss_id, norm_prn) = normalize_prn(s.talker_id, prn);
        let mut entry = SkyViewEntry::new(norm_prn, gnss_id);
        entry.elevation = el.map(|v| v as f64);
        entry.azimuth = az.map(|v| v as f64);
        entry.snr = snr.map(|v| v as f64);
        if az.map_or(false, |v| v != 0.0) {
            state.gsv_any_nonzero_azimuth = true;
        }
        if el.map_or(false, |v| v != 0.0) {
            state.gsv_any_nonzero_elevation = true;
        }
        sky_view.push(entry);
    }

    if num == total {
        if state.gsv_any_nonzero_elevation && !state.gsv_any_nonzero_azimuth {
            // Bogus-azimuth heuristic (spec.md 4.6): all azimuths zero but
            // elevations vary -- discard this cycle's sky view.
            sky_view.clear();
            log::debug!("nmea: discarding GSV sky view, bogus all-zero azimuths");
        } else {
            *mask |= ChangeMask::SATELLITE;
        }
    }
}

fn parse_gsv_sat(i: &[u8]) -> IResult<&[u8], (u32, Option<f32>, Option<f32>, Option<f32>)> {
    use nom::number::complete::float;
    let (i, prn) = terminated(fields::number::<u32>, char(','))(i)?;
    let (i, el) = terminated(opt(float), char(','))(i)?;
    let (i, az) = terminated(opt(float), char(','))(i)?;
    let (i, snr) = opt(float)(i)?;
    let (i, _) = opt(char(','))(i)?;
    Ok((i, (prn, el, az, snr)))
}

fn decode_vtg(s: &NmeaSentence, fix: &mut Fix, mask: &mut ChangeMask) {
    let parsed: IResult<&[u8], _> = (|i| {
        let (i, course) = terminated(fields::opt_float, char(','))(i)?;
        let (i, _) = terminated(opt(char('T')), char(','))(i)?;
        let (i, _magnetic) = terminated(fields::opt_float, char(','))(i)?;
        let (i, _) = terminated(opt(char('M')), char(','))(i)?;
        let (i, knots) = terminated(fields::opt_float, char(','))(i)?;
        let (i, _) = terminated(opt(char('N')), char(','))(i)?;
        let (i, kph) = fields::opt_float(i)?;
        Ok((i, (course, knots, kph)))
    })(s.data);
    let (course, knots, kph) = match parsed {
        Ok((_, v)) => v,
        Err(_) => return,
    };
    // VTG only fills track/speed when unset by a higher-priority sentence
    // (spec.md 4.6: "used only to supply missing track/speed") -- the
    // caller's merge() already no-ops on fields already set this cycle,
    // so this decoder always offers its values and lets the change-mask
    // ordering (RMC/GGA processed first within a cycle) take priority.
    if let Some(c) = course {
        fix.track = Some(c);
        *mask |= ChangeMask::TRACK;
    }
    let speed = knots.map(|k| k * KNOTS_TO_MPS).or(kph.map(|k| k / 3.6));
    if let Some(v) = speed {
        fix.speed = Some(v);
        *mask |= ChangeMask::SPEED;
    }
}

fn decode_gst(s: &NmeaSentence, fix: &mut Fix, mask: &mut ChangeMask) {
    let parsed: IResult<&[u8], _> = (|i| {
        let (i, _t) = terminated(opt(fields::parse_hms), char(','))(i)?;
        let (i, _rms) = terminated(fields::opt_float, char(','))(i)?;
        let (i, _major) = terminated(fields::opt_float, char(','))(i)?;
        let (i, _minor) = terminated(fields::opt_float, char(','))(i)?;
        let (i, _orient) = terminated(fields::opt_float, char(','))(i)?;
        let (i, lat_err) = terminated(fields::opt_float, char(','))(i)?;
        let (i, lon_err) = terminated(fields::opt_float, char(','))(i)?;
        let (i, alt_err) = fields::opt_float(i)?;
        Ok((i, (lat_err, lon_err, alt_err)))
    })(s.data);
    let (lat_err, lon_err, alt_err) = match parsed {
        Ok((_, v)) => v,
        Err(_) => return,
    };
    fix.epx = lat_err;
    fix.epy = lon_err;
    fix.epv = alt_err;
    *mask |= ChangeMask::GST;
}

fn decode_zda(s: &NmeaSentence, state: &mut NmeaState, fix: &mut Fix, mask: &mut ChangeMask) {
    let parsed: IResult<&[u8], _> = (|i| {
        let (i, t) = terminated(opt(fields::parse_hms), char(','))(i)?;
        let (i, day) = terminated(fields::number::<u32>, char(','))(i)?;
        let (i, month) = terminated(fields::number::<u32>, char(','))(i)?;
        let (i, year) = fields::number::<i32>(i)?;
        Ok((i, (t, day, month, year)))
    })(s.data);
    let (t, day, month, year) = match parsed {
        Ok((_, v)) => v,
        Err(_) => return,
    };
    state.century.set_authoritative_year(year);
    state.zda_seen = true;
    if let (Some(t), Some(d)) = (t, chrono::NaiveDate::from_ymd_opt(year, month, day)) {
        let naive = d.and_time(t);
        fix.time = Some(naive.timestamp() as f64 + naive.timestamp_subsec_nanos() as f64 * 1e-9);
        *mask |= ChangeMask::TIME;
    }
}

fn decode_gbs(s: &NmeaSentence, fix: &mut Fix, mask: &mut ChangeMask) {
    let parsed: IResult<&[u8], _> = (|i| {
        let (i, _t) = terminated(opt(fields::parse_hms), char(','))(i)?;
        let (i, lat_err) = terminated(fields::opt_float, char(','))(i)?;
        let (i, lon_err) = terminated(fields::opt_float, char(','))(i)?;
        let (i, alt_err) = fields::opt_float(i)?;
        Ok((i, (lat_err, lon_err, alt_err)))
    })(s.data);
    if let Ok((_, (lat_err, lon_err, alt_err))) = parsed {
        fix.epx = lat_err;
        fix.epy = lon_err;
        fix.epv = alt_err;
        *mask |= ChangeMask::PERR;
    }
}

fn decode_heading(s: &NmeaSentence, fix: &mut Fix, mask: &mut ChangeMask) {
    if let Ok((_, Some(heading))) = fields::opt_float(s.data) {
        fix.track = Some(heading);
        *mask |= ChangeMask::TRACK;
    }
}

/// Proprietary sentences (`$PGRME, $PGRMF, $PGRMM, $PGRMZ, $PMGNST,
/// $PSRFEPE, $PASHR, $PMTK001/424/705, $PSTI,030/032, $STI`): recognized
/// well enough to extract altitude/error fields where the vendor layout
/// is unambiguous; otherwise treated like an unknown tag (ONLINE only).
fn decode_proprietary(s: &NmeaSentence, fix: &mut Fix, mask: &mut ChangeMask) {
    match s.message_id {
        b"GRME" => {
            // $PGRME,<hpe>,M,<vpe>,M,<epe>,M*hh
            let parsed: IResult<&[u8], _> = (|i| {
                let (i, hpe) = terminated(fields::opt_float, char(','))(i)?;
                let (i, _) = terminated(opt(char('M')), char(','))(i)?;
                let (i, vpe) = terminated(fields::opt_float, char(','))(i)?;
                let (i, _) = terminated(opt(char('M')), char(','))(i)?;
                let (i, epe) = terminated(fields::opt_float, char(','))(i)?;
                Ok((i, (hpe, vpe, epe)))
            })(s.data);
            if let Ok((_, (hpe, vpe, _epe))) = parsed {
                fix.epx = hpe;
                fix.epy = hpe;
                fix.epv = vpe;
                *mask |= ChangeMask::PERR;
            }
        }
        b"GRMZ" => {
            // $PGRMZ,<alt>,f,<fix_type>*hh -- Garmin altitude in feet.
            if let Ok((_, Some(alt_feet))) = fields::opt_float(s.data) {
                fix.alt_msl = Some(alt_feet * 0.3048);
                *mask |= ChangeMask::ALTITUDE;
            }
        }
        _ => {
            log::trace!("nmea: proprietary sentence {:?} acknowledged, not decoded", String::from_utf8_lossy(s.message_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_state() -> NmeaState {
        NmeaState::new(1_700_000_000)
    }

    #[test]
    fn rmc_matches_spec_s2_scenario() {
        let raw = b"$GPRMC,225446.33,A,4916.45,N,12311.12,W,000.5,054.7,191194,020.3,E*68\r\n";
        let mut state = new_state();
        let mut sky = Vec::new();
        let (mask, fix) = decode(raw, &mut state, &mut sky).unwrap();
        assert!(mask.contains(ChangeMask::LATLON));
        assert!((fix.lat.unwrap() - (49.0 + 16.45 / 60.0)).abs() < 1e-6);
        assert!((fix.lon.unwrap() - -(123.0 + 11.12 / 60.0)).abs() < 1e-6);
        assert!((fix.speed.unwrap() - 0.5 * KNOTS_TO_MPS).abs() < 1e-6);
        assert_eq!(fix.track, Some(54.7));
        assert!((fix.magnetic_var.unwrap() - 20.3).abs() < 1e-6);
    }

    #[test]
    fn gga_fix_quality_and_altitude() {
        let raw = b"$GPGGA,123519,4807.038,N,01131.324,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
        let mut state = new_state();
        let mut sky = Vec::new();
        let (mask, fix) = decode(raw, &mut state, &mut sky).unwrap();
        assert!(mask.contains(ChangeMask::LATLON));
        assert_eq!(fix.status, Some(Status::Fix));
        assert_eq!(fix.alt_msl, Some(545.4));
        assert!((fix.alt_hae.unwrap() - 592.3).abs() < 1e-6);
    }

    #[test]
    fn gsv_three_part_cycle_matches_spec_s5() {
        let mut state = new_state();
        let mut sky = Vec::new();
        let mut mask = ChangeMask::empty();
        for raw in [
            &b"$GPGSV,3,1,11,01,40,083,46,02,17,308,41,12,07,344,39,14,22,228,45*75\r\n"[..],
            &b"$GPGSV,3,2,11,15,00,128,,20,00,064,,22,00,268,,25,00,042,*7F\r\n"[..],
            &b"$GPGSV,3,3,11,29,00,358,,31,00,276,,32,00,172,,,,,*48\r\n"[..],
        ] {
            let (m, _) = decode(raw, &mut state, &mut sky).unwrap();
            mask = m;
        }
        assert!(mask.contains(ChangeMask::SATELLITE));
        assert_eq!(sky.len(), 11);
        assert_eq!(sky.iter().filter(|e| e.snr.is_some()).count(), 4);
    }

    #[test]
    fn gga_latch_holds_previous_fix() {
        let raw = b"$GPGGA,123519,4807.038,N,01131.324,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
        let mut state = new_state();
        let mut sky = Vec::new();
        let (_, _) = decode(raw, &mut state, &mut sky).unwrap();
        let (mask, fix) = decode(raw, &mut state, &mut sky).unwrap();
        assert!(!mask.contains(ChangeMask::LATLON));
        assert_eq!(fix.lat, None);
    }
}
