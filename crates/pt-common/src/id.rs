//! Time-ordered identifiers
//!
//! 64-bit ids rendered as 13 Crockford Base32 characters:
//! - 42 bits: milliseconds since the Unix epoch
//! - 10 bits: random node component, fixed per process
//! - 12 bits: sequence within the millisecond
//!
//! Ids generated by one process are strictly increasing, so their string
//! form sorts in creation order.

use parking_lot::{const_mutex, Mutex};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Crockford Base32 alphabet (excludes I, L, O, U)
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

const SEQUENCE_MASK: u64 = 0xFFF;
const TIMESTAMP_MASK: u64 = 0x3FF_FFFF_FFFF;

struct Clock {
    last_millis: u64,
    sequence: u64,
}

static CLOCK: Mutex<Clock> = const_mutex(Clock {
    last_millis: 0,
    sequence: 0,
});

static NODE: OnceLock<u64> = OnceLock::new();

/// Generator for time-ordered entity keys and event ids.
pub struct IdGenerator;

impl IdGenerator {
    /// Next id, e.g. `0HZXEQ5Y8JY5Z`.
    pub fn next_id() -> String {
        let node = *NODE.get_or_init(|| u64::from(rand::random::<u16>()) & 0x3FF);
        let (millis, sequence) = Self::tick();
        encode(((millis & TIMESTAMP_MASK) << 22) | (node << 12) | sequence)
    }

    fn tick() -> (u64, u64) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let mut clock = CLOCK.lock();
        if now > clock.last_millis {
            clock.last_millis = now;
            clock.sequence = 0;
        } else if clock.sequence == SEQUENCE_MASK {
            // Sequence exhausted: borrow the next millisecond.
            clock.last_millis += 1;
            clock.sequence = 0;
        } else {
            clock.sequence += 1;
        }
        (clock.last_millis, clock.sequence)
    }
}

fn encode(mut value: u64) -> String {
    let mut out = [b'0'; 13];
    for slot in out.iter_mut().rev() {
        *slot = ALPHABET[(value & 0x1F) as usize];
        value >>= 5;
    }
    out.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_length_and_alphabet() {
        let id = IdGenerator::next_id();
        assert_eq!(id.len(), 13);
        assert!(id.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn test_strictly_increasing() {
        let ids: Vec<String> = (0..10_000).map(|_| IdGenerator::next_id()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort before {}", pair[0], pair[1]);
        }
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn test_encode_zero() {
        assert_eq!(encode(0), "0000000000000");
    }
}
