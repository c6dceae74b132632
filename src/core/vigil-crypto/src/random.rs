//! Cryptographically secure random generation.
//!
//! All randomness comes from the operating system's CSPRNG.

use rand::{rngs::OsRng, Rng, RngCore};
use zeroize::Zeroizing;

use crate::aead::{KEY_SIZE, NONCE_SIZE};
use crate::error::CryptoError;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"-_.!#%+=";
const API_KEY_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Minimum accepted length for generated passwords.
pub const MIN_PASSWORD_LENGTH: usize = 12;

/// Maximum accepted length for generated passwords.
pub const MAX_PASSWORD_LENGTH: usize = 256;

/// Length of generated API keys.
pub const API_KEY_LENGTH: usize = 44;

/// Generates a random 256-bit key, zeroized on drop.
pub fn generate_key() -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng.fill_bytes(&mut key[..]);
    key
}

/// Generates a random AES-GCM nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Generates a password of `length` characters.
///
/// The result always contains at least one lowercase letter, one uppercase
/// letter, one digit and one symbol.
pub fn generate_password(length: usize) -> Result<Zeroizing<String>, CryptoError> {
    if !(MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&length) {
        return Err(CryptoError::InvalidInput(format!(
            "password length must be between {MIN_PASSWORD_LENGTH} and {MAX_PASSWORD_LENGTH}, got {length}"
        )));
    }

    let classes = [LOWER, UPPER, DIGITS, SYMBOLS];
    let mut chars: Vec<u8> = classes.iter().map(|class| pick(class)).collect();

    let all: Vec<u8> = classes.concat();
    while chars.len() < length {
        chars.push(pick(&all));
    }

    // Fisher-Yates so the guaranteed characters are not always first.
    for i in (1..chars.len()).rev() {
        let j = OsRng.gen_range(0..=i);
        chars.swap(i, j);
    }

    let password = String::from_utf8(chars)
        .map_err(|e| CryptoError::InvalidInput(format!("non-ascii password alphabet: {e}")))?;
    Ok(Zeroizing::new(password))
}

/// Generates an IAM-style API key.
pub fn generate_api_key() -> Zeroizing<String> {
    let key: String = (0..API_KEY_LENGTH)
        .map(|_| pick(API_KEY_ALPHABET) as char)
        .collect();
    Zeroizing::new(key)
}

/// Generates a certificate serial number as colon-separated hex octets.
pub fn generate_serial_number() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    // Positive integer per RFC 5280.
    bytes[0] &= 0x7F;
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Generates a random lowercase hex token of `byte_len` bytes.
pub fn generate_token(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn pick(alphabet: &[u8]) -> u8 {
    alphabet[OsRng.gen_range(0..alphabet.len())]
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_key_unique() {
        assert_ne!(*generate_key(), *generate_key());
    }

    #[test]
    fn test_password_length_and_classes() {
        for length in [MIN_PASSWORD_LENGTH, 32, 64] {
            let password = generate_password(length).unwrap();
            assert_eq!(password.len(), length);
            assert!(password.bytes().any(|c| LOWER.contains(&c)));
            assert!(password.bytes().any(|c| UPPER.contains(&c)));
            assert!(password.bytes().any(|c| DIGITS.contains(&c)));
            assert!(password.bytes().any(|c| SYMBOLS.contains(&c)));
        }
    }

    #[test]
    fn test_password_length_bounds() {
        assert!(generate_password(MIN_PASSWORD_LENGTH - 1).is_err());
        assert!(generate_password(MAX_PASSWORD_LENGTH + 1).is_err());
    }

    #[test]
    fn test_api_key_format() {
        let key = generate_api_key();
        assert_eq!(key.len(), API_KEY_LENGTH);
        assert!(key.bytes().all(|c| API_KEY_ALPHABET.contains(&c)));
    }

    #[test]
    fn test_serial_number_format() {
        let serial = generate_serial_number();
        let octets: Vec<&str> = serial.split(':').collect();
        assert_eq!(octets.len(), 16);
        assert!(octets.iter().all(|o| o.len() == 2));
        assert!(u8::from_str_radix(octets[0], 16).unwrap() < 0x80);
    }

    #[test]
    fn test_tokens_do_not_repeat() {
        let mut seen = HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(generate_token(8)), "duplicate token generated");
        }
    }
}
