//! Session ID and password generation
//!
//! Both values gate access to a session, so callers must pass a
//! cryptographically secure generator.

use rand::CryptoRng;
use rand::Rng;
use rand::seq::SliceRandom;

/// Smallest session ID (inclusive)
pub const SESSION_ID_MIN: u32 = 100_000_000;
/// Largest session ID (inclusive)
pub const SESSION_ID_MAX: u32 = 999_999_999;

/// Password length in characters
pub const PASSWORD_LEN: usize = 8;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Draw a nine-digit session ID candidate. Uniqueness is the caller's job.
pub fn session_id<R: CryptoRng + ?Sized>(rng: &mut R) -> String {
    rng.random_range(SESSION_ID_MIN..=SESSION_ID_MAX).to_string()
}

/// Draw an eight-character lowercase alphanumeric password with at least one
/// letter and at least one digit, in random positions.
pub fn password<R: CryptoRng + ?Sized>(rng: &mut R) -> String {
    let mut chars = Vec::with_capacity(PASSWORD_LEN);
    chars.push(pick(rng, LETTERS));
    chars.push(pick(rng, DIGITS));
    while chars.len() < PASSWORD_LEN {
        chars.push(pick(rng, ALPHANUMERIC));
    }
    chars.shuffle(rng);

    chars.into_iter().map(char::from).collect()
}

fn pick<R: CryptoRng + ?Sized>(rng: &mut R, alphabet: &[u8]) -> u8 {
    alphabet[rng.random_range(0..alphabet.len())]
}
