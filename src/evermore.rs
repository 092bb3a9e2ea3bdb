//! EverMore binary protocol stub (spec.md 4.7). EverMore is DLE-framed
//! like TSIP but its message catalog isn't in the corpus this crate was
//! built from; the lexer already frames and checksums these packets, so
//! the dispatcher plumbing is complete even though no message is
//! interpreted yet. Per spec.md 4.7 this is an allowed stub: a recognized
//! frame still counts as "online" without decoding its payload.

use crate::error::BitsError;
use crate::fix::{ChangeMask, Fix};

type Result<T> = std::result::Result<T, BitsError>;

pub fn decode(payload: &[u8]) -> Result<(ChangeMask, Fix)> {
    if payload.is_empty() {
        return Ok((ChangeMask::empty(), Fix::new()));
    }
    log::trace!("unhandled EverMore message id={:#04x}", payload[0]);
    Ok((ChangeMask::ONLINE, Fix::new()))
}
