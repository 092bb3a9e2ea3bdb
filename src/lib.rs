//! GNSS reception core: a multi-protocol packet lexer, driver dispatch
//! and auto-detection state machine, and fix-synthesis pipeline.
//!
//! This crate owns the parsing and state-machine layers of a GPS
//! reception daemon. It deliberately does not own a tty, a network
//! socket, or a scheduler loop — callers plug those in through
//! [`dispatcher::ByteSource`] and friends.

pub mod ais;
pub mod bits;
pub mod config;
pub mod context;
pub mod cycle;
pub mod dispatcher;
pub mod dop;
pub mod driver;
pub mod error;
pub mod evermore;
pub mod fix;
pub mod isgps;
pub mod lexer;
pub mod nmea;
pub mod rtcm2;
pub mod rtcm3;
pub mod session;
pub mod sirf;
pub mod time;
pub mod tsip;
pub mod ubx;
pub mod zodiac;

pub use config::Config;
pub use context::Context;
pub use dispatcher::{ByteSource, DispatchOutcome, RtcmSink, SpeedControl};
pub use error::GpsdError;
pub use fix::{ChangeMask, Fix, Mode, Status};
pub use session::Session;
