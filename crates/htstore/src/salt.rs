//! Sources of salt characters for the salted schemes.

use crate::scheme::{Error, SaltGenerationSnafu};

/// The crypt(3) alphabet (`./0-9A-Za-z`), shared by DES crypt and APR1-MD5.
pub const ITOA64: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Supplies fresh salts when a password is hashed without an existing hash.
pub trait SaltSource: Send + Sync {
    /// Produce up to `len` characters from [`ITOA64`].
    fn salt(&self, len: usize) -> Result<String, Error>;
}

/// Draws every salt character independently and uniformly from the OS RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSaltSource;

impl SaltSource for OsSaltSource {
    fn salt(&self, len: usize) -> Result<String, Error> {
        let mut bytes = vec![0u8; len];
        getrandom::fill(&mut bytes).map_err(|e| {
            SaltGenerationSnafu {
                message: e.to_string(),
            }
            .build()
        })?;
        // 256 is a multiple of 64, so masking keeps the distribution uniform.
        Ok(bytes
            .iter()
            .map(|b| ITOA64[usize::from(b & 0x3f)] as char)
            .collect())
    }
}

/// Always hands out the same salt, truncated to the requested length.
///
/// Meant for tests and reproducible fixtures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedSalt(String);

impl FixedSalt {
    /// Wrap a fixed salt string.
    pub fn new(salt: impl Into<String>) -> Self {
        Self(salt.into())
    }
}

impl SaltSource for FixedSalt {
    fn salt(&self, len: usize) -> Result<String, Error> {
        Ok(self.0.chars().take(len).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_salt_length_and_alphabet() {
        for len in [2, 8] {
            let salt = OsSaltSource.salt(len).unwrap();
            assert_eq!(salt.len(), len);
            for ch in salt.chars() {
                assert!(ITOA64.contains(&(ch as u8)), "Invalid salt character: {}", ch);
            }
        }
    }

    #[test]
    fn test_os_salts_differ() {
        // 48 random bits; a collision here means the source is broken.
        assert_ne!(OsSaltSource.salt(8).unwrap(), OsSaltSource.salt(8).unwrap());
    }

    #[test]
    fn test_fixed_salt_truncates() {
        let fixed = FixedSalt::new("xlWep/gn");
        assert_eq!(fixed.salt(2).unwrap(), "xl");
        assert_eq!(fixed.salt(8).unwrap(), "xlWep/gn");
        assert_eq!(fixed.salt(12).unwrap(), "xlWep/gn");
    }
}
