//! The driver registry (spec.md 4.4): a static, indexable table of driver
//! descriptors, each a bundle of optional function pointers around a
//! mandatory `parse_packet`. `Session::step` looks a driver up by the
//! wire-format tag the lexer just produced.

use bitflags::bitflags;

use crate::fix::ChangeMask;
use crate::lexer::{Frame, WireType};
use crate::session::Session;

bitflags! {
    /// `flags` in spec.md 4.4's driver descriptor.
    pub struct DriverFlags: u8 {
        /// "If we switched to this driver once, remember that even while
        /// processing interleaved packets of other types."
        const STICKY       = 0x01;
        /// Never auto-selected by packet-type sniffing alone; must be
        /// chosen explicitly (reserved for configuration-only drivers).
        const NO_AUTOCONF  = 0x02;
    }
}

/// Lifecycle events a driver's `event_hook` may observe (spec.md 4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Wakeup,
    ProbeSubtype,
    Identified,
    Configure,
    DriverSwitch,
    Reactivate,
    Deactivate,
    TriggerMatch,
}

pub type ParsePacketFn = fn(&mut Session, &Frame) -> ChangeMask;
pub type EventHookFn = fn(&mut Session, EventKind);
pub type SpeedSwitcherFn = fn(&mut Session, u32, char, u8) -> bool;
pub type ModeSwitcherFn = fn(&mut Session, bool);
pub type RateSwitcherFn = fn(&mut Session, f64) -> bool;
pub type ControlSendFn = fn(&mut Session, &[u8]) -> std::io::Result<()>;
pub type TimeOffsetFn = fn(&Session) -> f64;
pub type InitQueryFn = fn(&mut Session);

/// One entry of the driver registry (spec.md 4.4).
pub struct Driver {
    pub name: &'static str,
    pub packet_type: WireType,
    pub flags: DriverFlags,
    /// Proprietary NMEA tag prefix (e.g. `"PSRFEPE"`, leading `P` included)
    /// that identifies this driver during probing (spec.md 4.5 probing)
    /// once another NMEA-speaking driver is locked as Generic NMEA.
    /// `None` for drivers only ever selected by their own wire-format tag.
    pub trigger: Option<&'static str>,
    pub min_cycle_s: f64,
    pub channels: usize,
    pub parse_packet: ParsePacketFn,
    pub rtcm_writer: Option<ControlSendFn>,
    pub init_query: Option<InitQueryFn>,
    pub event_hook: Option<EventHookFn>,
    pub speed_switcher: Option<SpeedSwitcherFn>,
    pub mode_switcher: Option<ModeSwitcherFn>,
    pub rate_switcher: Option<RateSwitcherFn>,
    pub control_send: Option<ControlSendFn>,
    pub time_offset: Option<TimeOffsetFn>,
}

impl Driver {
    pub fn is_sticky(&self) -> bool {
        self.flags.contains(DriverFlags::STICKY)
    }
}

fn parse_nmea(session: &mut Session, frame: &Frame) -> ChangeMask {
    match crate::nmea::decode(&frame.raw, &mut session.nmea_state, &mut session.sky_view) {
        Ok((mask, fix)) => {
            session.new_fix = fix;
            mask
        }
        Err(e) => {
            log::debug!("nmea decode error: {e}");
            ChangeMask::ONLINE
        }
    }
}

fn parse_sirf(session: &mut Session, frame: &Frame) -> ChangeMask {
    match crate::sirf::decode(&frame.payload, &mut session.sirf_state, &mut session.sky_view) {
        Ok((mask, fix)) => {
            session.new_fix = fix;
            mask
        }
        Err(e) => {
            log::debug!("sirf decode error: {e}");
            ChangeMask::ONLINE
        }
    }
}

fn parse_tsip(session: &mut Session, frame: &Frame) -> ChangeMask {
    match crate::tsip::decode(&frame.payload, &mut session.tsip_state, &mut session.sky_view) {
        Ok((mask, fix, dop)) => {
            session.new_fix = fix;
            if mask.contains(ChangeMask::DOP) {
                session.dop = dop;
            }
            mask
        }
        Err(e) => {
            log::debug!("tsip decode error: {e}");
            ChangeMask::ONLINE
        }
    }
}

fn parse_ubx(session: &mut Session, frame: &Frame) -> ChangeMask {
    match crate::ubx::decode(&frame.payload) {
        Ok((mask, fix, dop)) => {
            session.new_fix = fix;
            if mask.contains(ChangeMask::DOP) {
                session.dop = dop;
            }
            mask
        }
        Err(e) => {
            log::debug!("ubx decode error: {e}");
            ChangeMask::ONLINE
        }
    }
}

fn parse_evermore(session: &mut Session, frame: &Frame) -> ChangeMask {
    match crate::evermore::decode(&frame.payload) {
        Ok((mask, fix)) => {
            session.new_fix = fix;
            mask
        }
        Err(_) => ChangeMask::ONLINE,
    }
}

fn parse_zodiac(session: &mut Session, frame: &Frame) -> ChangeMask {
    match crate::zodiac::decode(&frame.payload) {
        Ok((mask, fix)) => {
            session.new_fix = fix;
            mask
        }
        Err(_) => ChangeMask::ONLINE,
    }
}

fn parse_ais(session: &mut Session, frame: &Frame) -> ChangeMask {
    let Some(armored) = session.ais_assembler.feed(&frame.raw) else {
        return ChangeMask::ONLINE;
    };
    match crate::ais::decode(&armored) {
        Ok(msg) => {
            session.last_ais = Some(msg);
            ChangeMask::ONLINE | ChangeMask::REPORT
        }
        Err(e) => {
            log::debug!("ais decode error: {e}");
            ChangeMask::ONLINE
        }
    }
}

fn words_from_payload(payload: &[u8]) -> Vec<u32> {
    payload
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn parse_rtcm2(session: &mut Session, frame: &Frame) -> ChangeMask {
    let words = words_from_payload(&frame.payload);
    match crate::rtcm2::decode(&words) {
        Some((header, body)) => {
            log::debug!("rtcm2: message type {} from station {}", header.message_type, header.station_id);
            session.last_rtcm2 = Some(body);
            ChangeMask::ONLINE
        }
        None => ChangeMask::ONLINE,
    }
}

fn parse_rtcm3(session: &mut Session, frame: &Frame) -> ChangeMask {
    let message = crate::rtcm3::decode(&frame.payload);
    session.last_rtcm3 = Some(message);
    ChangeMask::ONLINE
}

fn parse_garmin_text(_session: &mut Session, _frame: &Frame) -> ChangeMask {
    ChangeMask::ONLINE
}

fn parse_comment(_session: &mut Session, frame: &Frame) -> ChangeMask {
    log::info!("lexer: comment {:?}", String::from_utf8_lossy(&frame.payload));
    ChangeMask::ONLINE
}

/// The static driver registry (spec.md 4.4). Generic NMEA is first and is
/// the dispatcher's default driver until a binary frame or a probe match
/// identifies something more specific.
pub static DRIVERS: &[Driver] = &[
    Driver {
        name: "Generic NMEA",
        packet_type: WireType::Nmea,
        flags: DriverFlags::empty(),
        trigger: None,
        min_cycle_s: 1.0,
        channels: 12,
        parse_packet: parse_nmea,
        rtcm_writer: None,
        init_query: None,
        event_hook: None,
        speed_switcher: None,
        mode_switcher: None,
        rate_switcher: None,
        control_send: None,
        time_offset: None,
    },
    Driver {
        name: "SiRF-II",
        packet_type: WireType::Sirf,
        flags: DriverFlags::STICKY,
        trigger: Some("PSRFEPE"),
        min_cycle_s: 1.0,
        channels: 12,
        parse_packet: parse_sirf,
        rtcm_writer: None,
        init_query: None,
        event_hook: None,
        speed_switcher: None,
        mode_switcher: None,
        rate_switcher: None,
        control_send: None,
        time_offset: None,
    },
    Driver {
        name: "Trimble TSIP",
        packet_type: WireType::Tsip,
        flags: DriverFlags::STICKY,
        trigger: None,
        min_cycle_s: 1.0,
        channels: 12,
        parse_packet: parse_tsip,
        rtcm_writer: None,
        init_query: None,
        event_hook: None,
        speed_switcher: None,
        mode_switcher: None,
        rate_switcher: None,
        control_send: None,
        time_offset: None,
    },
    Driver {
        name: "u-blox UBX",
        packet_type: WireType::Ubx,
        flags: DriverFlags::STICKY,
        trigger: None,
        min_cycle_s: 1.0,
        channels: 32,
        parse_packet: parse_ubx,
        rtcm_writer: None,
        init_query: None,
        event_hook: None,
        speed_switcher: None,
        mode_switcher: None,
        rate_switcher: None,
        control_send: None,
        time_offset: None,
    },
    Driver {
        name: "EverMore",
        packet_type: WireType::EverMore,
        flags: DriverFlags::STICKY,
        trigger: None,
        min_cycle_s: 1.0,
        channels: 12,
        parse_packet: parse_evermore,
        rtcm_writer: None,
        init_query: None,
        event_hook: None,
        speed_switcher: None,
        mode_switcher: None,
        rate_switcher: None,
        control_send: None,
        time_offset: None,
    },
    Driver {
        name: "Zodiac",
        packet_type: WireType::Zodiac,
        flags: DriverFlags::STICKY,
        trigger: None,
        min_cycle_s: 1.0,
        channels: 12,
        parse_packet: parse_zodiac,
        rtcm_writer: None,
        init_query: None,
        event_hook: None,
        speed_switcher: None,
        mode_switcher: None,
        rate_switcher: None,
        control_send: None,
        time_offset: None,
    },
    Driver {
        name: "AIS",
        packet_type: WireType::Ais,
        flags: DriverFlags::NO_AUTOCONF,
        trigger: None,
        min_cycle_s: 0.0,
        channels: 0,
        parse_packet: parse_ais,
        rtcm_writer: None,
        init_query: None,
        event_hook: None,
        speed_switcher: None,
        mode_switcher: None,
        rate_switcher: None,
        control_send: None,
        time_offset: None,
    },
    Driver {
        name: "RTCM104v2",
        packet_type: WireType::Rtcm2,
        flags: DriverFlags::NO_AUTOCONF,
        trigger: None,
        min_cycle_s: 1.0,
        channels: 0,
        parse_packet: parse_rtcm2,
        rtcm_writer: None,
        init_query: None,
        event_hook: None,
        speed_switcher: None,
        mode_switcher: None,
        rate_switcher: None,
        control_send: None,
        time_offset: None,
    },
    Driver {
        name: "RTCM104v3",
        packet_type: WireType::Rtcm3,
        flags: DriverFlags::NO_AUTOCONF,
        trigger: None,
        min_cycle_s: 1.0,
        channels: 0,
        parse_packet: parse_rtcm3,
        rtcm_writer: None,
        init_query: None,
        event_hook: None,
        speed_switcher: None,
        mode_switcher: None,
        rate_switcher: None,
        control_send: None,
        time_offset: None,
    },
    Driver {
        name: "Garmin Text",
        packet_type: WireType::GarminText,
        flags: DriverFlags::NO_AUTOCONF,
        trigger: None,
        min_cycle_s: 1.0,
        channels: 0,
        parse_packet: parse_garmin_text,
        rtcm_writer: None,
        init_query: None,
        event_hook: None,
        speed_switcher: None,
        mode_switcher: None,
        rate_switcher: None,
        control_send: None,
        time_offset: None,
    },
    Driver {
        name: "Comment",
        packet_type: WireType::Comment,
        flags: DriverFlags::NO_AUTOCONF,
        trigger: None,
        min_cycle_s: 0.0,
        channels: 0,
        parse_packet: parse_comment,
        rtcm_writer: None,
        init_query: None,
        event_hook: None,
        speed_switcher: None,
        mode_switcher: None,
        rate_switcher: None,
        control_send: None,
        time_offset: None,
    },
];

/// O(1)-in-practice lookup by packet-type tag (spec.md 4.4: "enables
/// `tag → driver` lookup used on driver switch").
pub fn lookup(tag: WireType) -> Option<&'static Driver> {
    DRIVERS.iter().find(|d| d.packet_type == tag)
}

pub fn index_of(driver: &'static Driver) -> usize {
    DRIVERS.iter().position(|d| std::ptr::eq(d, driver)).unwrap_or(0)
}

/// Proprietary NMEA sentence tags that upgrade a Generic-NMEA lock to a
/// vendor-specific probe match (spec.md 4.5 probing). Only tags with a
/// matching registered driver's `trigger` actually cause a switch; the
/// rest (Ashtech, MTK, STI, Garmin) are recognized signatures from
/// spec.md's vendor list that this crate has no corresponding driver for
/// yet and are listed so a future driver's `trigger` can reuse them.
pub const PROBE_TRIGGERS: &[&str] = &["PSRFEPE", "PASHR", "PSTI", "PMTK", "PGRM"];

/// How many additional NMEA frames the dispatcher keeps probing for a
/// vendor signature before giving up (spec.md 4.5, `REDIRECT_SNIFF`).
pub const REDIRECT_SNIFF: u32 = 20;

/// Find the driver whose `trigger` prefixes `full_tag` (the proprietary
/// NMEA tag including its leading `P`, e.g. `"PSRFEPE"` for
/// `$PSRFEPE,...`). Used by the dispatcher's probing check.
pub fn lookup_by_trigger(full_tag: &str) -> Option<&'static Driver> {
    DRIVERS.iter().find(|d| d.trigger.map_or(false, |t| full_tag.starts_with(t)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_registered_driver_by_tag() {
        let driver = lookup(WireType::Sirf).expect("SiRF driver registered");
        assert_eq!(driver.name, "SiRF-II");
        assert!(driver.is_sticky());
    }

    #[test]
    fn generic_nmea_is_first_and_not_sticky() {
        assert_eq!(DRIVERS[0].packet_type, WireType::Nmea);
        assert!(!DRIVERS[0].is_sticky());
    }

    #[test]
    fn unregistered_tag_has_no_driver() {
        assert!(lookup(WireType::Bad).is_none());
    }

    #[test]
    fn trigger_lookup_matches_sirf_probe_tag() {
        let driver = lookup_by_trigger("PSRFEPE").expect("SiRF trigger registered");
        assert_eq!(driver.name, "SiRF-II");
    }

    #[test]
    fn trigger_lookup_has_no_match_for_unregistered_vendor_tag() {
        assert!(lookup_by_trigger("PMTK001").is_none());
    }
}
