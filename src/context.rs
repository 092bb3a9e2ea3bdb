//! Process-wide shared state (spec.md §3, "Context"): the leap-second
//! value, century hint, and RTCM reinjection buffer that every session
//! reads and at most one writer updates, plus the Rollover-of-Doom check
//! that consults both.

use crate::time::CenturyHint;

/// `{leap_seconds, leap_valid, century_hint, start_time_unix, rtcm_buf
/// +bytecount+timestamp, fixcnt_global}` (spec.md §3). Mutable fields are
/// single-writer/many-reader across sessions sharing one device context;
/// this crate leaves the actual sharing mechanism (`Arc<Mutex<_>>` or
/// similar) to the caller and only specifies the data and its update
/// rules.
#[derive(Debug, Clone)]
pub struct Context {
    pub leap_seconds: Option<i32>,
    pub leap_valid: bool,
    pub century_hint: CenturyHint,
    pub start_time_unix: i64,
    /// Opaque RTCM correction bytes accepted from an external DGPSIP/NTRIP
    /// collaborator for reinjection into a device's control channel
    /// (spec.md §1 Non-goals: the transport itself is out of scope, but
    /// the reinjection hook is not).
    pub rtcm_buf: Vec<u8>,
    pub rtcm_bytecount: usize,
    pub rtcm_timestamp: Option<i64>,
    pub fixcnt_global: u64,
}

impl Context {
    pub fn new(start_time_unix: i64) -> Self {
        Context {
            leap_seconds: None,
            leap_valid: false,
            century_hint: CenturyHint::from_unix_time(start_time_unix),
            start_time_unix,
            rtcm_buf: Vec::new(),
            rtcm_bytecount: 0,
            rtcm_timestamp: None,
            fixcnt_global: 0,
        }
    }

    /// Record a leap-second value learned from a subframe decode (SiRF
    /// 0x08) or TSIP 0x41 (spec.md §4.8: "stored in `context.leap_seconds`
    /// with a `LEAP_SECOND_VALID` flag").
    pub fn set_leap_seconds(&mut self, leap_seconds: i32) {
        self.leap_seconds = Some(leap_seconds);
        self.leap_valid = true;
    }

    /// The Rollover-of-Doom check (spec.md §4.8), consulting whatever
    /// leap-second value is currently known.
    pub fn check_rollover(&self, now_unix: i64) -> bool {
        match self.leap_seconds {
            Some(leap) => crate::time::check_utc(now_unix, leap),
            None => false,
        }
    }

    /// Accept opaque RTCM correction bytes from an external differential
    /// source for later reinjection by a driver's `rtcm_writer`.
    pub fn accept_rtcm(&mut self, bytes: &[u8], now_unix: i64) {
        self.rtcm_buf.clear();
        self.rtcm_buf.extend_from_slice(bytes);
        self.rtcm_bytecount += bytes.len();
        self.rtcm_timestamp = Some(now_unix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leap_seconds_start_unset() {
        let ctx = Context::new(1_700_000_000);
        assert!(!ctx.leap_valid);
        assert!(!ctx.check_rollover(1_700_000_000));
    }

    #[test]
    fn setting_leap_seconds_enables_rollover_check() {
        let mut ctx = Context::new(1_520_000_000);
        ctx.set_leap_seconds(14); // table says 20 for this era
        assert!(ctx.check_rollover(1_520_000_000));
    }

    #[test]
    fn rtcm_injection_updates_bytecount_and_timestamp() {
        let mut ctx = Context::new(0);
        ctx.accept_rtcm(&[1, 2, 3], 42);
        assert_eq!(ctx.rtcm_bytecount, 3);
        assert_eq!(ctx.rtcm_timestamp, Some(42));
        ctx.accept_rtcm(&[1, 2], 43);
        assert_eq!(ctx.rtcm_bytecount, 5);
        assert_eq!(ctx.rtcm_buf, vec![1, 2]);
    }
}
