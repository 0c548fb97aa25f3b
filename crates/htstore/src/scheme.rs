use crate::apr1_md5;
use crate::salt::{ITOA64, OsSaltSource, SaltSource};
use base64::Engine;
use sha1::{Digest, Sha1};
use snafu::{OptionExt, Snafu};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Prefix of unsalted SHA-1 hashes.
pub const SHA1_PREFIX: &str = "{SHA}";

/// Salt length of DES crypt.
pub const CRYPT_SALT_LEN: usize = 2;

const CRYPT_HASH_LEN: usize = 13;

/// Errors raised while producing a password hash.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The scheme name is not one of `plain`, `crypt`, `md5`, `sha1`.
    #[snafu(display("Unknown hash scheme '{name}'"))]
    UnknownScheme { name: String },

    /// The existing hash does not start with a usable salt.
    #[snafu(display("Invalid salt in '{salt}'"))]
    InvalidSalt { salt: String },

    /// The DES crypt implementation rejected its input.
    #[snafu(display("crypt failed: {message}"))]
    Crypt { message: String },

    /// The randomness source failed.
    #[snafu(display("Can't generate salt: {message}"))]
    SaltGeneration { message: String },
}

/// A password hash scheme as found in Apache credential files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashScheme {
    /// The password itself.
    Plain,
    /// Traditional DES-based crypt(3) with a 2-character salt.
    Crypt,
    /// Apache's `$apr1$` salted MD5.
    Md5,
    /// Unsalted SHA-1, base64 encoded, prefixed with `{SHA}`.
    Sha1,
}

/// Verification order used when none is configured.
pub const DEFAULT_CHECK_ORDER: [HashScheme; 4] = [
    HashScheme::Md5,
    HashScheme::Sha1,
    HashScheme::Crypt,
    HashScheme::Plain,
];

impl HashScheme {
    /// Guess which scheme produced `hash`.
    ///
    /// Plain text that happens to look like a crypt digest is reported as
    /// crypt; the guess is for display, verification never relies on it.
    pub fn detect(hash: &str) -> HashScheme {
        if hash.starts_with(apr1_md5::PREFIX) {
            HashScheme::Md5
        } else if hash.starts_with(SHA1_PREFIX) {
            HashScheme::Sha1
        } else if hash.len() == CRYPT_HASH_LEN && hash.bytes().all(|b| ITOA64.contains(&b)) {
            HashScheme::Crypt
        } else {
            HashScheme::Plain
        }
    }
}

impl FromStr for HashScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "plain" => Ok(HashScheme::Plain),
            "crypt" => Ok(HashScheme::Crypt),
            "md5" | "apr1" | "apr1-md5" => Ok(HashScheme::Md5),
            "sha1" | "sha" => Ok(HashScheme::Sha1),
            _ => UnknownSchemeSnafu { name: s }.fail(),
        }
    }
}

impl fmt::Display for HashScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashScheme::Plain => write!(f, "plain"),
            HashScheme::Crypt => write!(f, "crypt"),
            HashScheme::Md5 => write!(f, "md5"),
            HashScheme::Sha1 => write!(f, "sha1"),
        }
    }
}

/// Turns plaintext passwords into hash strings.
///
/// When an existing hash is supplied its salt is reused, which makes the
/// result a pure function of `(scheme, password, existing)`; that is how
/// verification works. Without one, a fresh salt comes from the configured
/// [`SaltSource`].
#[derive(Clone)]
pub struct HashCodec {
    salts: Arc<dyn SaltSource>,
}

impl Default for HashCodec {
    fn default() -> Self {
        Self::new(OsSaltSource)
    }
}

impl fmt::Debug for HashCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashCodec").finish_non_exhaustive()
    }
}

impl HashCodec {
    /// Create a codec drawing fresh salts from `salts`.
    pub fn new(salts: impl SaltSource + 'static) -> Self {
        Self {
            salts: Arc::new(salts),
        }
    }

    /// Hash `password` under `scheme`, reusing the salt of `existing` if given.
    pub fn encrypt(
        &self,
        scheme: HashScheme,
        password: &str,
        existing: Option<&str>,
    ) -> Result<String, Error> {
        match scheme {
            HashScheme::Plain => Ok(password.to_string()),
            HashScheme::Crypt => self.crypt(password, existing),
            HashScheme::Md5 => {
                let salt = match existing {
                    Some(hash) => apr1_md5::salt_of(hash).to_string(),
                    None => self.salts.salt(apr1_md5::SALT_LEN)?,
                };
                Ok(apr1_md5::hash(password, &salt))
            }
            HashScheme::Sha1 => {
                let digest = Sha1::digest(password.as_bytes());
                Ok(format!(
                    "{SHA1_PREFIX}{}",
                    base64::engine::general_purpose::STANDARD.encode(digest)
                ))
            }
        }
    }

    fn crypt(&self, password: &str, existing: Option<&str>) -> Result<String, Error> {
        let salt = match existing {
            Some(hash) => hash
                .get(..CRYPT_SALT_LEN)
                .context(InvalidSaltSnafu { salt: hash })?
                .to_string(),
            None => self.salts.salt(CRYPT_SALT_LEN)?,
        };
        pwhash::unix_crypt::hash_with(&salt, password).map_err(|e| {
            CryptSnafu {
                message: e.to_string(),
            }
            .build()
        })
    }
}

/// Hash with the default codec (OS randomness for fresh salts).
pub fn encrypt(scheme: HashScheme, password: &str, existing: Option<&str>) -> Result<String, Error> {
    HashCodec::default().encrypt(scheme, password, existing)
}
