#![warn(missing_docs)]

//! Read, verify and atomically rewrite Apache-style credential files.
//!
//! A credential file holds one `username:hash[:extra_info]` record per line.
//! Passwords are checked against the `plain`, `crypt` (DES), `md5`
//! (`$apr1$`) and `sha1` (`{SHA}`) schemes in a configurable order. Every
//! change streams the file into a temporary sibling and renames it over the
//! original, so the file on disk is never half written, and lines the
//! library does not understand are carried over byte for byte.
//!
//! # Example
//!
//! ```no_run
//! use htstore::{CredentialStore, HashScheme};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Create the file if needed and hash new passwords with APR1-MD5
//! let store = CredentialStore::create(".htpasswd")?.with_default_scheme(HashScheme::Md5);
//!
//! // Add a new user
//! store.add_user("alice", "password123", Some("admin"))?;
//!
//! // Verify a user's password
//! if store.check_user_password("alice", "password123")? {
//!     println!("Password correct!");
//! }
//!
//! // Change the password; the `admin` field is kept
//! store.update_user("alice", "correct horse", None)?;
//!
//! // List all users
//! for user in store.list_users()? {
//!     println!("{}", user);
//! }
//! # Ok(())
//! # }
//! ```

mod apr1_md5;
mod record;
mod rewrite;
mod salt;
mod scheme;
mod store;

pub use record::UserRecord;
pub use salt::{FixedSalt, OsSaltSource, SaltSource};
pub use scheme::{DEFAULT_CHECK_ORDER, Error as SchemeError, HashCodec, HashScheme, encrypt};
pub use store::{BoundRecord, CredentialStore, Error as StoreError};
