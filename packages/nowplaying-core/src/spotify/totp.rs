//! Time-based one-time codes for web-player token minting.

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::protocol_constants::{TOTP_DIGITS, TOTP_PERIOD_SECS};
use crate::utils::now_secs;

type HmacSha1 = Hmac<Sha1>;

/// RFC 6238 generator (HMAC-SHA1, 30-second steps, 6 digits).
#[derive(Clone)]
pub struct Totp {
    secret: Vec<u8>,
    version: u32,
}

impl Totp {
    /// Builds a generator from the obfuscated cipher bytes.
    #[must_use]
    pub fn from_cipher(cipher: &[u8], version: u32) -> Self {
        Self {
            secret: derive_secret(cipher),
            version,
        }
    }

    /// Builds a generator from a raw secret.
    #[must_use]
    pub fn with_secret(secret: impl Into<Vec<u8>>, version: u32) -> Self {
        Self {
            secret: secret.into(),
            version,
        }
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Code for the current time step.
    #[must_use]
    pub fn now(&self) -> String {
        self.code_at(now_secs())
    }

    /// Code for the step containing `unix_secs`.
    #[must_use]
    pub fn code_at(&self, unix_secs: u64) -> String {
        hotp(&self.secret, unix_secs / TOTP_PERIOD_SECS, TOTP_DIGITS)
    }
}

/// De-obfuscates the cipher: XOR each byte with `(i % 33) + 9`, join the
/// decimal values, and use the UTF-8 bytes of that string as the key.
#[must_use]
pub fn derive_secret(cipher: &[u8]) -> Vec<u8> {
    cipher
        .iter()
        .enumerate()
        .map(|(i, byte)| (byte ^ ((i % 33) as u8 + 9)).to_string())
        .collect::<String>()
        .into_bytes()
}

fn hotp(key: &[u8], counter: u64, digits: u32) -> String {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);

    let code = binary % 10u32.pow(digits);
    format!("{:0width$}", code, width = digits as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_constants::TOTP_SECRET_CIPHER;

    #[test]
    fn matches_rfc6238_vectors() {
        let totp = Totp::with_secret(b"12345678901234567890".to_vec(), 1);
        assert_eq!(totp.code_at(59), "287082");
        assert_eq!(totp.code_at(1_111_111_109), "081804");
        assert_eq!(totp.code_at(1_234_567_890), "005924");
    }

    #[test]
    fn codes_are_stable_within_a_step() {
        let totp = Totp::from_cipher(&TOTP_SECRET_CIPHER, 5);
        assert_eq!(totp.code_at(60), totp.code_at(89));
        assert_eq!(totp.code_at(60).len(), 6);
        assert_eq!(totp.version(), 5);
    }

    #[test]
    fn derive_secret_joins_decimal_values() {
        let secret = derive_secret(&TOTP_SECRET_CIPHER);
        assert!(secret.starts_with(b"55071"));
        assert!(secret.iter().all(u8::is_ascii_digit));
    }
}
