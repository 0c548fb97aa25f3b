use crate::scheme::{self, DEFAULT_CHECK_ORDER, HashCodec, HashScheme};
use std::fmt;
use tracing::trace;

/// One `username:hash[:extra_info]` line of a credential file.
///
/// A record is a plain value. Changing it does not touch any file; use
/// [`CredentialStore::bind`](crate::CredentialStore::bind) for records that
/// write through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    username: String,
    hashed_password: String,
    extra_info: Option<String>,
    scheme: HashScheme,
    check_order: Vec<HashScheme>,
}

impl UserRecord {
    /// Build a record from an already hashed password.
    ///
    /// The record starts with the `crypt` scheme and the default check order.
    pub fn new(username: impl Into<String>, hashed_password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            hashed_password: hashed_password.into(),
            extra_info: None,
            scheme: HashScheme::Crypt,
            check_order: DEFAULT_CHECK_ORDER.to_vec(),
        }
    }

    /// Set the third field.
    pub fn with_extra_info(mut self, extra_info: impl Into<String>) -> Self {
        self.extra_info = Some(extra_info.into());
        self
    }

    /// Set the scheme used by [`set_password`](Self::set_password).
    pub fn with_scheme(mut self, scheme: HashScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Set the schemes tried by [`verify_password`](Self::verify_password).
    pub fn with_check_order(mut self, check_order: impl Into<Vec<HashScheme>>) -> Self {
        self.check_order = check_order.into();
        self
    }

    /// Parse a line without its terminator.
    ///
    /// The line is split on the first two `:` only, so an extra field may
    /// itself contain colons. Lines with fewer than two fields or an empty
    /// username are not records and yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.splitn(3, ':');
        let username = fields.next().filter(|name| !name.is_empty())?;
        let hashed_password = fields.next()?;
        let record = Self::new(username, hashed_password);
        Some(match fields.next() {
            Some(extra) => record.with_extra_info(extra),
            None => record,
        })
    }

    /// Serialize back to the line format, without a terminator.
    pub fn to_line(&self) -> String {
        match &self.extra_info {
            Some(extra) => format!("{}:{}:{}", self.username, self.hashed_password, extra),
            None => format!("{}:{}", self.username, self.hashed_password),
        }
    }

    /// The username field.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The stored hash.
    pub fn hashed_password(&self) -> &str {
        &self.hashed_password
    }

    /// The third field, if the line has one (possibly empty).
    pub fn extra_info(&self) -> Option<&str> {
        self.extra_info.as_deref()
    }

    /// Scheme used when a new password is set.
    pub fn scheme(&self) -> HashScheme {
        self.scheme
    }

    /// Schemes tried, in order, when verifying a password.
    pub fn check_order(&self) -> &[HashScheme] {
        &self.check_order
    }

    /// Replace the stored hash verbatim.
    pub fn set_hashed_password(&mut self, hashed_password: impl Into<String>) {
        self.hashed_password = hashed_password.into();
    }

    /// Replace or clear the third field.
    pub fn set_extra_info(&mut self, extra_info: Option<String>) {
        self.extra_info = extra_info;
    }

    /// Change the scheme used for new passwords.
    pub fn set_scheme(&mut self, scheme: HashScheme) {
        self.scheme = scheme;
    }

    /// Change the verification order.
    pub fn set_check_order(&mut self, check_order: impl Into<Vec<HashScheme>>) {
        self.check_order = check_order.into();
    }

    /// Check `password` against the stored hash using the record's check order.
    pub fn verify_password(&self, password: &str) -> bool {
        self.verify_password_with(password, &self.check_order)
    }

    /// Check `password` trying each scheme of `check_order` in turn.
    ///
    /// Every scheme re-hashes the password with the salt of the stored hash
    /// and compares the result. A scheme that cannot use the stored hash as
    /// salt simply does not match.
    pub fn verify_password_with(&self, password: &str, check_order: &[HashScheme]) -> bool {
        check_order.iter().any(|&scheme| {
            match scheme::encrypt(scheme, password, Some(&self.hashed_password)) {
                Ok(candidate) => constant_time_eq(&candidate, &self.hashed_password),
                Err(e) => {
                    trace!(user = %self.username, %scheme, error = %e, "scheme not applicable");
                    false
                }
            }
        })
    }

    /// Hash `password` under the record's scheme with a fresh salt.
    pub fn set_password(&mut self, password: &str) -> Result<(), scheme::Error> {
        self.set_password_with(&HashCodec::default(), password)
    }

    /// Like [`set_password`](Self::set_password) with an explicit codec.
    pub fn set_password_with(
        &mut self,
        codec: &HashCodec,
        password: &str,
    ) -> Result<(), scheme::Error> {
        self.hashed_password = codec.encrypt(self.scheme, password, None)?;
        Ok(())
    }
}

impl fmt::Display for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::salt::FixedSalt;

    #[test]
    fn test_parse_two_fields() {
        let record = UserRecord::parse("alice:aZGJuE6EXrjEE").unwrap();
        assert_eq!(record.username(), "alice");
        assert_eq!(record.hashed_password(), "aZGJuE6EXrjEE");
        assert_eq!(record.extra_info(), None);
    }

    #[test]
    fn test_parse_keeps_colons_in_extra_info() {
        let record = UserRecord::parse("bob:hash:admin:ops:x").unwrap();
        assert_eq!(record.hashed_password(), "hash");
        assert_eq!(record.extra_info(), Some("admin:ops:x"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(UserRecord::parse("").is_none());
        assert!(UserRecord::parse("no-colon-here").is_none());
        assert!(UserRecord::parse(":hash").is_none());
    }

    #[test]
    fn test_line_round_trip() {
        for line in ["jim:abc", "jim:abc:", "jim:abc:admin", "jim::"] {
            let record = UserRecord::parse(line).unwrap();
            assert_eq!(record.to_line(), line);
            let again = UserRecord::parse(&record.to_line()).unwrap();
            assert_eq!(again.username(), record.username());
            assert_eq!(again.hashed_password(), record.hashed_password());
            assert_eq!(again.extra_info(), record.extra_info());
        }
    }

    #[test]
    fn test_empty_extra_info_differs_from_none() {
        let without = UserRecord::new("jim", "abc");
        let with_empty = UserRecord::new("jim", "abc").with_extra_info("");
        assert_eq!(without.to_line(), "jim:abc");
        assert_eq!(with_empty.to_line(), "jim:abc:");
    }

    #[test]
    fn test_verify_under_every_scheme() {
        for scheme in DEFAULT_CHECK_ORDER {
            let mut record = UserRecord::new("jim", "").with_scheme(scheme);
            record.set_password("frobnicate").unwrap();
            assert!(record.verify_password("frobnicate"), "scheme {}", scheme);
            // DES crypt only reads eight characters, so differ early.
            assert!(!record.verify_password("Frobnicate"), "scheme {}", scheme);
            assert!(!record.verify_password(""), "scheme {}", scheme);
        }
    }

    #[test]
    fn test_restricted_check_order() {
        let record = UserRecord::new("jim", "frobnicate").with_check_order([HashScheme::Crypt]);
        assert!(!record.verify_password("frobnicate"));
        assert!(record.verify_password_with("frobnicate", &[HashScheme::Plain]));
        assert!(!record.verify_password_with("frobnicate", &[]));
    }

    #[test]
    fn test_set_password_uses_fresh_salt() {
        let codec = HashCodec::new(FixedSalt::new("Q9p.z1Ab"));
        let mut record = UserRecord::new("jim", "$apr1$oldsalt$xxxxxxxxxxxxxxxxxxxxxx")
            .with_scheme(HashScheme::Md5);
        record.set_password_with(&codec, "frobnicate").unwrap();
        assert!(record.hashed_password().starts_with("$apr1$Q9p.z1Ab$"));
        assert!(record.verify_password("frobnicate"));
    }

    #[test]
    fn test_known_apache_hashes_verify() {
        let md5 = UserRecord::parse("a:$apr1$xlWep/gn$6UNiHq3WE714EKfeH2X5c.").unwrap();
        assert!(md5.verify_password("hello"));
        let sha = UserRecord::parse("a:{SHA}W6ph5Mm5Pz8GgiULbPgzG37mj9g=").unwrap();
        assert!(sha.verify_password("password"));
        let crypt = UserRecord::parse("a:xOAFZqRz5RduI").unwrap();
        assert!(crypt.verify_password("password"));
        assert!(!crypt.verify_password("passwore"));
    }
}
