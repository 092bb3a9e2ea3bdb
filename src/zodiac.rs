//! Rockwell Zodiac binary protocol stub (spec.md 4.7), analogous to
//! `evermore` -- the lexer frames and checksums these packets, but no
//! message catalog from this family is in the grounding corpus, so only
//! the dispatcher plumbing (ONLINE on a recognized frame) is implemented.

use crate::error::BitsError;
use crate::fix::{ChangeMask, Fix};

type Result<T> = std::result::Result<T, BitsError>;

pub fn decode(payload: &[u8]) -> Result<(ChangeMask, Fix)> {
    if payload.len() < 2 {
        return Ok((ChangeMask::empty(), Fix::new()));
    }
    let id = u16::from_le_bytes([payload[0], payload[1]]);
    log::trace!("unhandled Zodiac message id={:#06x}", id);
    Ok((ChangeMask::ONLINE, Fix::new()))
}
