//! Per-connection state (spec.md §3, "Session"): the owned lexer, current
//! driver pointer, identification bookkeeping, accumulated sky view, and
//! the last/old/new fix triple the synthesizer merges each cycle.

use bitflags::bitflags;

use crate::ais::{AisMessage, FragmentAssembler};
use crate::driver::{self, Driver};
use crate::fix::{Dop, Fix, SkyViewEntry};
use crate::lexer::{Lexer, WireType};
use crate::nmea::NmeaState;
use crate::rtcm2;
use crate::rtcm3;
use crate::sirf::SirfState;
use crate::tsip::TsipState;

bitflags! {
    /// Which wire formats this session has seen at least one frame of
    /// (spec.md §3, "observed_types_bitset").
    pub struct ObservedTypes: u16 {
        const NMEA        = 0x0001;
        const SIRF        = 0x0002;
        const TSIP        = 0x0004;
        const EVERMORE    = 0x0008;
        const ZODIAC      = 0x0010;
        const UBX         = 0x0020;
        const RTCM2       = 0x0040;
        const RTCM3       = 0x0080;
        const AIS         = 0x0100;
        const GARMIN_TEXT = 0x0200;
    }
}

impl ObservedTypes {
    fn from_wire_type(wire_type: WireType) -> Option<ObservedTypes> {
        match wire_type {
            WireType::Nmea => Some(ObservedTypes::NMEA),
            WireType::Sirf => Some(ObservedTypes::SIRF),
            WireType::Tsip => Some(ObservedTypes::TSIP),
            WireType::EverMore => Some(ObservedTypes::EVERMORE),
            WireType::Zodiac => Some(ObservedTypes::ZODIAC),
            WireType::Ubx => Some(ObservedTypes::UBX),
            WireType::Rtcm2 => Some(ObservedTypes::RTCM2),
            WireType::Rtcm3 => Some(ObservedTypes::RTCM3),
            WireType::Ais => Some(ObservedTypes::AIS),
            WireType::GarminText => Some(ObservedTypes::GARMIN_TEXT),
            WireType::Comment | WireType::Bad => None,
        }
    }
}

/// End-of-cycle bookkeeping carried across dispatch steps (spec.md §4.10).
#[derive(Debug, Clone, Default)]
pub struct CycleState {
    pub this_frac_time: Option<f64>,
    pub last_frac_time: Option<f64>,
    pub latch_frac_time: bool,
    /// Per-tag bitset of sentence tags known to end a cycle, keyed by the
    /// 3-character NMEA tag that was seen ending a cycle at least once.
    pub cycle_enders: Vec<[u8; 3]>,
    pub current_ender: Option<[u8; 3]>,
}

/// `{lexer, driver_ptr, observed_types_bitset, fixcnt, satellites_used_list,
/// sky_view, last_fix, old_fix, new_fix, dop, nmea_state, cycle_state,
/// sticky_driver_ptr, subtype_string}` (spec.md §3).
pub struct Session {
    pub lexer: Lexer,
    pub driver: Option<&'static Driver>,
    /// The sticky driver displaced by a dependent-NMEA switch, remembered
    /// so the dispatcher can revert to it once that NMEA frame is parsed
    /// (spec.md §4.5 step 5; `dispatcher::maybe_revert_sticky_driver`).
    pub sticky_driver: Option<&'static Driver>,
    pub observed_types: ObservedTypes,
    /// Parallel to `driver::DRIVERS`: whether `identified` has already
    /// fired for that driver index this session (spec.md 4.5 step 7).
    pub drivers_identified: Vec<bool>,
    pub fixcnt: u64,
    pub satellites_used: Vec<u16>,
    pub sky_view: Vec<SkyViewEntry>,
    pub last_fix: Fix,
    pub old_fix: Fix,
    pub new_fix: Fix,
    pub dop: Dop,
    pub nmea_state: NmeaState,
    pub sirf_state: SirfState,
    pub tsip_state: TsipState,
    pub ais_assembler: FragmentAssembler,
    pub last_ais: Option<AisMessage>,
    pub last_rtcm2: Option<rtcm2::Body>,
    pub last_rtcm3: Option<rtcm3::Message>,
    pub cycle: CycleState,
    pub subtype: Option<String>,
    /// Probe sub-state: frames left to examine for a vendor signature
    /// before giving up (spec.md 4.5 probing, `REDIRECT_SNIFF`). Armed and
    /// counted down by `dispatcher::maybe_probe_upgrade`.
    pub probe_frames_remaining: u32,
}

impl Session {
    pub fn new(now_unix: i64) -> Self {
        Session {
            lexer: Lexer::new(),
            driver: None,
            sticky_driver: None,
            observed_types: ObservedTypes::empty(),
            drivers_identified: vec![false; driver::DRIVERS.len()],
            fixcnt: 0,
            satellites_used: Vec::new(),
            sky_view: Vec::new(),
            last_fix: Fix::new(),
            old_fix: Fix::new(),
            new_fix: Fix::new(),
            dop: Dop::default(),
            nmea_state: NmeaState::new(now_unix),
            sirf_state: SirfState::new(),
            tsip_state: TsipState::new(),
            ais_assembler: FragmentAssembler::new(),
            last_ais: None,
            last_rtcm2: None,
            last_rtcm3: None,
            cycle: CycleState::default(),
            subtype: None,
            probe_frames_remaining: 0,
        }
    }

    /// Record that a frame of `wire_type` was just seen (spec.md §3
    /// "observed_types_bitset"; spec.md 4.5 step 5, "record the tag into
    /// observed_types").
    pub fn note_observed(&mut self, wire_type: WireType) {
        if let Some(bit) = ObservedTypes::from_wire_type(wire_type) {
            self.observed_types |= bit;
        }
    }

    /// gpsd's `gpsd_zero_satellites`-equivalent (SPEC_FULL.md §5,
    /// grounded on `sirf.c` case 0x04): reset the sky view, e.g. before a
    /// Measured Tracker Data report replaces it wholesale.
    pub fn clear_sky_view(&mut self) {
        self.sky_view.clear();
    }

    /// Whether `identified` has already fired for `driver` this session.
    pub fn is_identified(&self, driver: &'static Driver) -> bool {
        self.drivers_identified
            .get(driver::index_of(driver))
            .copied()
            .unwrap_or(false)
    }

    pub fn mark_identified(&mut self, driver: &'static Driver) {
        if let Some(slot) = self.drivers_identified.get_mut(driver::index_of(driver)) {
            *slot = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_has_no_driver_and_empty_state() {
        let session = Session::new(1_700_000_000);
        assert!(session.driver.is_none());
        assert!(session.sky_view.is_empty());
        assert!(session.observed_types.is_empty());
    }

    #[test]
    fn note_observed_sets_the_matching_bit() {
        let mut session = Session::new(0);
        session.note_observed(WireType::Sirf);
        assert!(session.observed_types.contains(ObservedTypes::SIRF));
        assert!(!session.observed_types.contains(ObservedTypes::TSIP));
    }

    #[test]
    fn identification_is_tracked_per_driver() {
        let mut session = Session::new(0);
        let sirf = driver::lookup(WireType::Sirf).unwrap();
        assert!(!session.is_identified(sirf));
        session.mark_identified(sirf);
        assert!(session.is_identified(sirf));
    }
}
