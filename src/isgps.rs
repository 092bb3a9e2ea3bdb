//! ISGPS transport: the IS-GPS-200 30-bit-word, parity-checked bit layer
//! used as the framing underneath RTCM v2 (spec.md 4.3).
//!
//! Ported from gpsd's `isgps.c`. The lower layer here only synchronizes
//! with the incoming bitstream and checks parity; it hands complete
//! 30-bit words up to the RTCM v2 message unpackers (`rtcm2`), which
//! overlay bitfields on the assembled words.

const MAG_TAG_DATA: u32 = 1 << 6;
const MAG_TAG_MASK: u32 = 3 << 6;
const P_30_MASK: u32 = 0x4000_0000;
const W_DATA_MASK: u32 = 0x3fff_ffc0;

const PARITY_25: u32 = 0xbb1f_3480;
const PARITY_26: u32 = 0x5d8f_9a40;
const PARITY_27: u32 = 0xaec7_cd00;
const PARITY_28: u32 = 0x5763_e680;
const PARITY_29: u32 = 0x6bb1_f340;
const PARITY_30: u32 = 0x8b7a_89c0;

#[rustfmt::skip]
const PARITY_ARRAY: [u8; 256] = [
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
];

#[rustfmt::skip]
const REVERSE_BITS: [u32; 64] = [
    0, 32, 16, 48, 8, 40, 24, 56, 4, 36, 20, 52, 12, 44, 28, 60,
    2, 34, 18, 50, 10, 42, 26, 58, 6, 38, 22, 54, 14, 46, 30, 62,
    1, 33, 17, 49, 9, 41, 25, 57, 5, 37, 21, 53, 13, 45, 29, 61,
    3, 35, 19, 51, 11, 43, 27, 59, 7, 39, 23, 55, 15, 47, 31, 63,
];

fn parity_byte(t: u32) -> u8 {
    PARITY_ARRAY[(t & 0xff) as usize]
        ^ PARITY_ARRAY[((t >> 8) & 0xff) as usize]
        ^ PARITY_ARRAY[((t >> 16) & 0xff) as usize]
        ^ PARITY_ARRAY[((t >> 24) & 0xff) as usize]
}

/// Compute the 6 parity bits for a candidate 30-bit word.
pub fn isgps_parity(word: u32) -> u8 {
    let mut p = 0u8;
    for mask in [PARITY_25, PARITY_26, PARITY_27, PARITY_28, PARITY_29, PARITY_30] {
        p = (p << 1) | parity_byte(word & mask);
    }
    p
}

fn parity_ok(word: u32) -> bool {
    isgps_parity(word) == (word & 0x3f) as u8
}

/// Maximum words buffered per message before a forced resync (guards
/// against a buffer-overflow attack per gpsd's isgps.c comment).
pub const MAXWORDS: usize = 33;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsgpsStatus {
    /// No complete word is ready yet; still hunting for sync.
    NoSync,
    /// Locked and mid-message; a word was absorbed but the message isn't
    /// complete.
    Sync,
    /// Locked, and the word just absorbed completed a full message.
    Message,
}

/// Companion decoder for RTCM v2: assembles raw input octets into
/// parity-checked 30-bit words.
pub struct IsgpsDecoder {
    curr_word: u32,
    curr_offset: i32,
    locked: bool,
    buf: [u32; MAXWORDS],
    bufindex: usize,
}

impl Default for IsgpsDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl IsgpsDecoder {
    pub fn new() -> Self {
        IsgpsDecoder {
            curr_word: 0,
            curr_offset: 24,
            locked: false,
            buf: [0; MAXWORDS],
            bufindex: 0,
        }
    }

    pub fn words(&self) -> &[u32] {
        &self.buf[..self.bufindex]
    }

    /// Feed one input octet. `preamble_match` tests whether the given
    /// word (or word 0 of the message) looks like a valid preamble;
    /// `length_check` tests, once word 2 (the length word) has been
    /// absorbed, whether the message is now complete.
    pub fn step(
        &mut self,
        c: u8,
        preamble_match: impl Fn(u32) -> bool,
        length_check: impl Fn(&[u32]) -> bool,
    ) -> IsgpsStatus {
        let c = c as u32;
        if (c & MAG_TAG_MASK) != MAG_TAG_DATA {
            log::trace!("isgps: word tag not correct, skipping");
            return IsgpsStatus::NoSync;
        }
        let c = REVERSE_BITS[(c & 0x3f) as usize];

        if !self.locked {
            self.curr_offset = -5;
            self.bufindex = 0;
            while self.curr_offset <= 0 {
                self.curr_word <<= 1;
                if self.curr_offset > 0 {
                    self.curr_word |= c << self.curr_offset;
                } else {
                    self.curr_word |= c >> (-self.curr_offset);
                }
                if preamble_match(self.curr_word) && parity_ok(self.curr_word) {
                    log::debug!("isgps: preamble ok, parity ok -- locked");
                    self.locked = true;
                    break;
                }
                self.curr_offset += 1;
            }
        }

        if !self.locked {
            return IsgpsStatus::NoSync;
        }

        let mut res = IsgpsStatus::Sync;
        if self.curr_offset > 0 {
            self.curr_word |= c << self.curr_offset;
        } else {
            self.curr_word |= c >> (-self.curr_offset);
        }

        if self.curr_offset <= 0 {
            if self.curr_word & P_30_MASK != 0 {
                self.curr_word ^= W_DATA_MASK;
            }
            if parity_ok(self.curr_word) {
                if self.bufindex >= MAXWORDS {
                    self.bufindex = 0;
                    log::warn!("isgps: buffer overflowing, resetting");
                    self.locked = false;
                    return IsgpsStatus::NoSync;
                }
                self.buf[self.bufindex] = self.curr_word;
                if self.bufindex == 0 && !preamble_match(self.buf[0]) {
                    log::trace!("isgps: word 0 not a preamble, punting");
                    self.locked = false;
                    return IsgpsStatus::NoSync;
                }
                self.bufindex += 1;
                if length_check(&self.buf[..self.bufindex]) {
                    self.bufindex = 0;
                    res = IsgpsStatus::Message;
                }
                self.curr_word <<= 30;
                self.curr_offset += 30;
                if self.curr_offset > 0 {
                    self.curr_word |= c << self.curr_offset;
                } else {
                    self.curr_word |= c >> (-self.curr_offset);
                }
            } else {
                log::debug!("isgps: parity failure, lost lock");
                self.locked = false;
            }
        }
        self.curr_offset -= 6;
        res
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

/// RTCM v2 preamble pattern: `0x66` in the top 8 bits of a 30-bit word.
pub const RTCM2_PREAMBLE_PATTERN: u32 = 0x66;
pub const RTCM2_PREAMBLE_SHIFT: u32 = 22;

pub fn rtcm2_preamble_match(word: u32) -> bool {
    ((word >> RTCM2_PREAMBLE_SHIFT) & 0xff) == RTCM2_PREAMBLE_PATTERN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_known_all_zero_word_is_even() {
        // The all-zero word trivially has zero parity over every mask.
        assert_eq!(isgps_parity(0), 0);
    }

    #[test]
    fn reverse_bits_involution() {
        for v in 0..64u32 {
            let r = REVERSE_BITS[v as usize];
            assert_eq!(REVERSE_BITS[r as usize], v);
        }
    }

    #[test]
    fn decoder_never_locks_on_pure_noise() {
        let mut dec = IsgpsDecoder::new();
        let mut any_sync = false;
        for c in 0..=255u8 {
            match dec.step(c, rtcm2_preamble_match, |_| false) {
                IsgpsStatus::NoSync => {}
                _ => any_sync = true,
            }
        }
        // Noise may occasionally produce a spurious lock; we only assert
        // that the decoder doesn't panic and returns a status for every byte.
        let _ = any_sync;
    }
}
