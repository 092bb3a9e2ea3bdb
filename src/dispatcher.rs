//! The per-session dispatch loop (spec.md §4.5): pulls bytes from a
//! caller-supplied source, feeds them to the lexer, routes the resulting
//! frame to a driver, and folds the driver's `ChangeMask` into the fix
//! triple, DOP, and end-of-cycle detector.
//!
//! The core has no opinion on how bytes arrive or where a baud change is
//! actually applied (spec.md §1 Non-goals) — `ByteSource` and
//! `SpeedControl` are the seams a caller plugs a real tty, a replay file,
//! or a test fixture into.

use crate::config::Config;
use crate::context::Context;
use crate::cycle;
use crate::driver::{self, EventKind};
use crate::fix::{self, ChangeMask};
use crate::lexer::WireType;
use crate::session::Session;

/// Where the dispatcher reads device bytes from.
pub trait ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// Where a driver's `rtcm_writer`/`control_send` hooks write bytes back.
pub trait RtcmSink {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()>;
}

/// Optional serial-port control a `ByteSource` may also implement, used
/// only for the baud-ladder stepping spec.md §4.5 step 2 describes.
pub trait SpeedControl {
    fn set_speed(&mut self, bps: u32, parity: char, stopbits: u8) -> std::io::Result<()>;
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// The lexer has buffered bytes but no complete frame yet.
    NeedsMore,
    /// A frame was seen but produced no reportable change (a comment, a
    /// still-unidentified driver, or a bad packet below the retry
    /// threshold).
    NoData { mask: ChangeMask },
    /// `read` returned an I/O error.
    DeviceError(std::io::Error),
    /// A frame was parsed and folded into the fix triple.
    Frame { mask: ChangeMask },
}

/// One iteration of the dispatch loop (spec.md §4.5's ten steps).
pub fn step(
    session: &mut Session,
    context: &mut Context,
    source: &mut dyn ByteSource,
    speed_control: Option<&mut dyn SpeedControl>,
    config: &mut Config,
    now_unix: i64,
) -> DispatchOutcome {
    let mut buf = [0u8; 4096];
    match source.read(&mut buf) {
        Ok(0) => return DispatchOutcome::NoData { mask: ChangeMask::empty() },
        Ok(n) => session.lexer.feed(&buf[..n]),
        Err(e) => return DispatchOutcome::DeviceError(e),
    }

    let frame = match session.lexer.step() {
        Some(frame) => frame,
        None => return DispatchOutcome::NeedsMore,
    };

    if frame.wire_type == WireType::Bad {
        step_baud_on_sustained_garbage(session, speed_control, config);
        return DispatchOutcome::NoData { mask: ChangeMask::empty() };
    }

    if frame.wire_type == WireType::Comment {
        log::info!("lexer: comment {:?}", String::from_utf8_lossy(&frame.payload));
        return DispatchOutcome::NoData { mask: ChangeMask::ONLINE };
    }

    session.note_observed(frame.wire_type);
    maybe_switch_driver(session, frame.wire_type);

    let driver = match session.driver {
        Some(driver) => driver,
        None => return DispatchOutcome::NoData { mask: ChangeMask::empty() },
    };

    let mut mask = (driver.parse_packet)(session, &frame);

    if frame.wire_type == WireType::Nmea {
        maybe_probe_upgrade(session, &frame);
    }

    if !session.is_identified(driver) {
        session.mark_identified(driver);
        fire(driver, session, EventKind::Identified);
        if let Some(init_query) = driver.init_query {
            init_query(session);
        }
        fire(driver, session, EventKind::Configure);
    }

    let old_mode = session.last_fix.mode;
    session.old_fix = session.last_fix.clone();
    fix::merge(&mut session.last_fix, mask, &session.new_fix, old_mode);
    let dgps = matches!(session.last_fix.status, Some(crate::fix::Status::Dgps));
    fix::error_model(&mut session.last_fix, &session.old_fix, &session.dop, dgps);

    if mask.contains(ChangeMask::SATELLITE) {
        crate::dop::fill(&mut session.dop, &session.sky_view);
    }

    mask |= detect_cycle_boundary(session, &frame);

    if mask.contains(ChangeMask::CLEAR) {
        session.fixcnt += 1;
        context.fixcnt_global += 1;
    }

    maybe_revert_sticky_driver(session);

    DispatchOutcome::Frame { mask }
}

fn fire(driver: &'static crate::driver::Driver, session: &mut Session, event: EventKind) {
    if let Some(hook) = driver.event_hook {
        hook(session, event);
    }
}

fn step_baud_on_sustained_garbage(
    session: &Session,
    speed_control: Option<&mut dyn SpeedControl>,
    config: &mut Config,
) {
    if session.lexer.bad_count() <= 1 || !config.allow_autobaud {
        return;
    }
    let Some(ctl) = speed_control else { return };
    let bps = config.step_baud();
    if let Err(e) = ctl.set_speed(bps, 'N', 1) {
        log::warn!("dispatcher: failed to step baud ladder to {bps}: {e}");
    } else {
        log::warn!("dispatcher: stepping baud ladder to {bps}");
    }
}

/// Switch the current driver when the incoming tag doesn't match, unless
/// the current driver is a binary protocol temporarily emitting NMEA
/// through its own mode switcher (spec.md §4.5, "dependent NMEA").
fn maybe_switch_driver(session: &mut Session, tag: WireType) {
    let switch = match session.driver {
        None => true,
        Some(current) => {
            let dependent_nmea = current.mode_switcher.is_some()
                && tag == WireType::Nmea
                && current.packet_type != WireType::Nmea;
            current.packet_type != tag && !dependent_nmea
        }
    };
    if !switch {
        return;
    }
    let Some(new_driver) = driver::lookup(tag) else {
        return;
    };
    if let Some(old_driver) = session.driver {
        if old_driver.is_sticky() && !new_driver.is_sticky() {
            session.sticky_driver = Some(old_driver);
        }
    }
    session.driver = Some(new_driver);
    log::debug!("dispatcher: driver switch to {}", new_driver.name);
    fire(new_driver, session, EventKind::DriverSwitch);
}

/// Once a sticky driver has been displaced and the dispatcher is back on
/// Generic NMEA for a one-off dependent-NMEA frame, revert `session.driver`
/// to the remembered sticky driver immediately after that frame is parsed
/// (spec.md §4.5 step 5), so the binary driver's control methods
/// (`speed_switcher`, `mode_switcher`, `rate_switcher`, ...) stay reachable
/// between dispatch steps instead of being permanently lost to Generic NMEA.
fn maybe_revert_sticky_driver(session: &mut Session) {
    let Some(sticky) = session.sticky_driver else { return };
    let Some(current) = session.driver else { return };
    if current.packet_type == WireType::Nmea && !current.is_sticky() {
        log::debug!("dispatcher: reverting to sticky driver {} after dependent NMEA", sticky.name);
        session.driver = Some(sticky);
        session.sticky_driver = None;
    }
}

/// Probing (spec.md §4.5 final paragraph): while locked onto plain Generic
/// NMEA, watch each NMEA frame for a proprietary tag that matches a
/// registered driver's `trigger` (`$PSRFEPE`, `$PASHR`, ...) and upgrade
/// the lock on a match. `probe_frames_remaining` bounds how many frames
/// the dispatcher keeps sniffing before giving up on this probing window;
/// it is re-armed to `REDIRECT_SNIFF` the first time probing starts and
/// counts down with each unmatched NMEA frame.
fn maybe_probe_upgrade(session: &mut Session, frame: &crate::lexer::Frame) {
    let Some(current) = session.driver else { return };
    if current.packet_type != WireType::Nmea || current.trigger.is_some() {
        return;
    }
    let Ok(sentence) = crate::nmea::split_sentence(&frame.raw) else {
        return;
    };
    if sentence.talker_id == b"P" {
        let full_tag = format!("P{}", String::from_utf8_lossy(sentence.message_id));
        if let Some(matched) = driver::lookup_by_trigger(&full_tag) {
            log::debug!("dispatcher: probe matched {full_tag}, switching to {}", matched.name);
            session.driver = Some(matched);
            session.probe_frames_remaining = 0;
            fire(matched, session, EventKind::TriggerMatch);
            fire(matched, session, EventKind::DriverSwitch);
            return;
        }
    }
    if session.probe_frames_remaining == 0 {
        session.probe_frames_remaining = driver::REDIRECT_SNIFF;
    }
    session.probe_frames_remaining = session.probe_frames_remaining.saturating_sub(1);
}

/// Feed the sentence tag and fix time into the cycle detector (spec.md
/// §4.10). Only NMEA frames carry a usable tag; binary protocols report
/// their own cycle boundaries through `ChangeMask::CLEAR` already set by
/// the driver, so this is a no-op for them.
fn detect_cycle_boundary(session: &mut Session, frame: &crate::lexer::Frame) -> ChangeMask {
    if frame.wire_type != WireType::Nmea {
        return ChangeMask::empty();
    }
    let Ok(sentence) = crate::nmea::split_sentence(&frame.raw) else {
        return ChangeMask::empty();
    };
    if sentence.message_id.len() != 3 {
        return ChangeMask::empty();
    }
    let Some(time) = session.last_fix.time else {
        return ChangeMask::empty();
    };
    let tag = [sentence.message_id[0], sentence.message_id[1], sentence.message_id[2]];
    cycle::step(&mut session.cycle, tag, time.fract())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FixedSource {
        chunks: VecDeque<Vec<u8>>,
    }

    impl FixedSource {
        fn new(chunks: Vec<&[u8]>) -> Self {
            FixedSource {
                chunks: chunks.into_iter().map(|c| c.to_vec()).collect(),
            }
        }
    }

    impl ByteSource for FixedSource {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        }
    }

    #[test]
    fn empty_read_reports_no_data() {
        let mut session = Session::new(0);
        let mut context = Context::new(0);
        let mut config = Config::default();
        let mut source = FixedSource::new(vec![]);
        let outcome = step(&mut session, &mut context, &mut source, None, &mut config, 0);
        assert!(matches!(outcome, DispatchOutcome::NoData { .. }));
    }

    #[test]
    fn nmea_frame_selects_generic_nmea_driver() {
        let mut session = Session::new(0);
        let mut context = Context::new(0);
        let mut config = Config::default();
        let sentence = b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
        let mut source = FixedSource::new(vec![sentence]);
        let outcome = step(&mut session, &mut context, &mut source, None, &mut config, 0);
        assert!(matches!(outcome, DispatchOutcome::Frame { .. }));
        let driver = session.driver.expect("driver selected");
        assert_eq!(driver.name, "Generic NMEA");
        assert!(session.observed_types.contains(crate::session::ObservedTypes::NMEA));
    }

    #[test]
    fn second_cycle_with_jumped_time_clears_the_fix() {
        let mut session = Session::new(0);
        let mut context = Context::new(0);
        let mut config = Config::default();
        let first = b"$GPGGA,123519.50,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*6c\r\n";
        let second = b"$GPGGA,123520.80,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*6b\r\n";
        let mut source = FixedSource::new(vec![first, second]);
        let first_outcome = step(&mut session, &mut context, &mut source, None, &mut config, 0);
        assert!(matches!(first_outcome, DispatchOutcome::Frame { .. }));
        let second_outcome = step(&mut session, &mut context, &mut source, None, &mut config, 0);
        match second_outcome {
            DispatchOutcome::Frame { mask } => assert!(mask.contains(ChangeMask::CLEAR)),
            other => panic!("expected a frame outcome, got {other:?}"),
        }
    }

    #[test]
    fn proprietary_probe_tag_upgrades_generic_nmea_to_sirf() {
        let mut session = Session::new(0);
        let mut context = Context::new(0);
        let mut config = Config::default();
        let gga = b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
        let probe = b"$PSRFEPE,1,2,3*5b\r\n";
        let mut source = FixedSource::new(vec![gga, probe]);

        step(&mut session, &mut context, &mut source, None, &mut config, 0);
        assert_eq!(session.driver.unwrap().name, "Generic NMEA");

        step(&mut session, &mut context, &mut source, None, &mut config, 0);
        assert_eq!(session.driver.unwrap().name, "SiRF-II");
    }

    #[test]
    fn sticky_sirf_driver_is_restored_after_one_nmea_frame() {
        let mut session = Session::new(0);
        let mut context = Context::new(0);
        let mut config = Config::default();
        let sirf_empty = [0xa0, 0xa2, 0x00, 0x00, 0x00, 0x00, 0xb0, 0xb3];
        let gga = b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
        let mut source = FixedSource::new(vec![&sirf_empty[..], gga]);

        step(&mut session, &mut context, &mut source, None, &mut config, 0);
        assert_eq!(session.driver.unwrap().name, "SiRF-II");

        step(&mut session, &mut context, &mut source, None, &mut config, 0);
        assert_eq!(session.driver.unwrap().name, "SiRF-II");
        assert!(session.sticky_driver.is_none());
    }
}
