//! Deterministic token derivation.
//!
//! Two independently constructed sessions with the same `(channel, step,
//! max_step)` must derive byte-identical tokens, with no shared state beyond
//! those three numbers. This is the rendezvous mechanism the whole tunnel
//! depends on: it lets two processes that never talk to each other agree on
//! "what key do we both touch next."

use uuid::Uuid;

/// 57-character alphabet (shortuuid's default): digits 2-9, uppercase minus
/// I/O, lowercase minus l. Avoids characters that are visually ambiguous in
/// a URL query string.
const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// A fixed namespace for the deterministic UUIDs minted from token seeds.
/// Any stable constant works here since both peers compile against the
/// same namespace; this one is arbitrary.
const TOKEN_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x14, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8,
]);

/// Encode `number` in `alphabet`, most-significant digit first, optionally
/// left-padded with the alphabet's first character to `padding` digits.
fn int_to_string(mut number: u128, alphabet: &[u8], padding: Option<usize>) -> String {
    let base = alphabet.len() as u128;
    let mut digits = Vec::new();
    if number == 0 {
        digits.push(alphabet[0]);
    }
    while number > 0 {
        let digit = (number % base) as usize;
        digits.push(alphabet[digit]);
        number /= base;
    }
    if let Some(pad) = padding {
        while digits.len() < pad {
            digits.push(alphabet[0]);
        }
    }
    digits.reverse();
    String::from_utf8(digits).expect("alphabet is ASCII")
}

/// Number of digits needed to represent any 128-bit value in `ALPHABET`.
fn uuid_padding() -> usize {
    let base = ALPHABET.len() as f64;
    ((128.0_f64) / base.log2()).ceil() as usize
}

/// Bit length of `n` (0 has bit length 0, matching Python's `int.bit_length`).
fn bit_length(n: u64) -> u32 {
    u64::BITS - n.leading_zeros()
}

/// Derive the token for `(channel, step mod max_step)`.
///
/// `max_step` must be nonzero; callers enforce this at `Session` construction.
pub fn derive_token(channel: u64, step: u64, max_step: u64) -> String {
    debug_assert!(max_step > 0, "max_step must be nonzero");
    let wrapped_step = step % max_step;
    let number = (u128::from(channel) << bit_length(max_step)) + u128::from(wrapped_step);
    let seed = int_to_string(number, ALPHABET, None);
    let uuid = Uuid::new_v5(&TOKEN_NAMESPACE, seed.as_bytes());
    int_to_string(uuid.as_u128(), ALPHABET, Some(uuid_padding()))
}
