use crate::record::UserRecord;
use crate::rewrite::{self, Edit};
use crate::scheme::{self, DEFAULT_CHECK_ORDER, HashCodec, HashScheme};
use snafu::{OptionExt, ResultExt, Snafu};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::ops::{ControlFlow, Deref};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Errors that can occur during credential file operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The user is not in the credential file.
    #[snafu(display("User '{username}' not found"))]
    UserNotFound { username: String },

    /// The user is already in the credential file.
    #[snafu(display("User '{username}' already exists"))]
    DuplicateUser { username: String },

    /// Username is empty or contains `:` or a line break.
    #[snafu(display("Invalid username '{username}'"))]
    InvalidUsername { username: String },

    /// A field value contains `:` or a line break.
    #[snafu(display("The {field} can't contain ':' or line breaks"))]
    InvalidField { field: &'static str },

    /// Failed to open the credential file.
    #[snafu(display("Failed to open credential file '{}'", path.display()))]
    FileOpen {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to read from the credential file.
    #[snafu(display("Failed to read credential file '{}'", path.display()))]
    FileRead {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to create the temporary replacement file.
    #[snafu(display("Failed to create temporary file in '{}'", path.display()))]
    TempFile {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to write the temporary replacement file.
    #[snafu(display("Failed to write '{}'", path.display()))]
    FileWrite {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to move the replacement over the credential file.
    #[snafu(display("Failed to replace credential file '{}'", path.display()))]
    Rename {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to create the parent directory.
    #[snafu(display("Failed to create parent directory '{}'", path.display()))]
    CreateDir {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to hash the password.
    #[snafu(display("Failed to hash password"))]
    Hash { source: scheme::Error },
}

/// Handle on a credential file.
///
/// The store keeps no file open between calls. Every read scans the whole
/// file; every change rewrites it into a temporary sibling and renames that
/// over the original, so readers see either the old or the new file.
///
/// There is no locking: concurrent writers from other processes can lose
/// each other's changes.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    default_scheme: HashScheme,
    check_order: Vec<HashScheme>,
    codec: HashCodec,
}

impl CredentialStore {
    /// Handle on `path` with the `crypt` scheme and the default check order.
    ///
    /// Nothing is read until an operation is called.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            default_scheme: HashScheme::Crypt,
            check_order: DEFAULT_CHECK_ORDER.to_vec(),
            codec: HashCodec::default(),
        }
    }

    /// Create an empty credential file if none exists, then open a handle on it.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).context(CreateDirSnafu { path: parent })?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(false);
        #[cfg(unix)]
        options.mode(0o600);
        options.open(path).context(FileOpenSnafu { path })?;

        Ok(Self::new(path))
    }

    /// Scheme for passwords hashed by [`add_user`](Self::add_user) and
    /// [`update_user`](Self::update_user).
    pub fn with_default_scheme(mut self, scheme: HashScheme) -> Self {
        self.default_scheme = scheme;
        self
    }

    /// Schemes tried, in order, by [`check_user_password`](Self::check_user_password).
    pub fn with_check_order(mut self, check_order: impl Into<Vec<HashScheme>>) -> Self {
        self.check_order = check_order.into();
        self
    }

    /// Codec used for new hashes, e.g. one with a fixed salt.
    pub fn with_codec(mut self, codec: HashCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Get the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the default scheme.
    pub fn default_scheme(&self) -> HashScheme {
        self.default_scheme
    }

    /// Get the check order.
    pub fn check_order(&self) -> &[HashScheme] {
        &self.check_order
    }

    /// Get the codec.
    pub fn codec(&self) -> &HashCodec {
        &self.codec
    }

    fn scan(&self, mut visit: impl FnMut(UserRecord) -> ControlFlow<()>) -> Result<(), Error> {
        let path = self.path.as_path();
        let mut reader = BufReader::new(File::open(path).context(FileOpenSnafu { path })?);
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader
                .read_until(b'\n', &mut line)
                .context(FileReadSnafu { path })?
                == 0
            {
                return Ok(());
            }
            let (content, _) = rewrite::split_terminator(&line);
            if let Some(record) = rewrite::parse_line(content)
                && visit(record).is_break()
            {
                return Ok(());
            }
        }
    }

    fn adopt(&self, record: UserRecord) -> UserRecord {
        record
            .with_scheme(self.default_scheme)
            .with_check_order(self.check_order.clone())
    }

    /// Find the first line for `username`.
    ///
    /// Later lines for the same user are ignored. A missing user is
    /// `Ok(None)`, not an error.
    pub fn lookup_user(&self, username: &str) -> Result<Option<UserRecord>, Error> {
        let mut found = None;
        self.scan(|record| {
            if record.username() == username {
                found = Some(record);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        Ok(found.map(|record| self.adopt(record)))
    }

    /// Look up `username` as a record whose setters write back to this store.
    pub fn bind(&self, username: &str) -> Result<Option<BoundRecord<'_>>, Error> {
        Ok(self.lookup_user(username)?.map(|record| BoundRecord {
            store: self,
            record,
        }))
    }

    /// Check if a user exists in the credential file.
    pub fn user_exists(&self, username: &str) -> Result<bool, Error> {
        Ok(self.lookup_user(username)?.is_some())
    }

    /// The first record of every user, in file order, read in one pass.
    pub fn records(&self) -> Result<Vec<UserRecord>, Error> {
        let mut records: Vec<UserRecord> = Vec::new();
        self.scan(|record| {
            if !records.iter().any(|seen| seen.username() == record.username()) {
                records.push(self.adopt(record));
            }
            ControlFlow::Continue(())
        })?;
        Ok(records)
    }

    /// List usernames in file order, each once.
    pub fn list_users(&self) -> Result<Vec<String>, Error> {
        Ok(self
            .records()?
            .into_iter()
            .map(|record| record.username().to_string())
            .collect())
    }

    /// Verify `password` for `username` using the store's check order.
    pub fn check_user_password(&self, username: &str, password: &str) -> Result<bool, Error> {
        let record = self
            .lookup_user(username)?
            .context(UserNotFoundSnafu { username })?;
        Ok(record.verify_password(password))
    }

    /// Append a new user. Fails with [`Error::DuplicateUser`] if the user
    /// exists, leaving the file untouched.
    pub fn add_user(
        &self,
        username: &str,
        password: &str,
        extra_info: Option<&str>,
    ) -> Result<(), Error> {
        let record = self.new_record(username, password, extra_info)?;
        rewrite::rewrite(&self.path, Edit::Add(&record))?;
        Ok(())
    }

    /// Set the password of `username`, adding the user if absent.
    ///
    /// Without `extra_info` the existing third field is kept.
    pub fn update_user(
        &self,
        username: &str,
        password: &str,
        extra_info: Option<&str>,
    ) -> Result<(), Error> {
        let record = self.new_record(username, password, extra_info)?;
        rewrite::rewrite(
            &self.path,
            Edit::Upsert {
                record: &record,
                keep_extra_info: true,
            },
        )?;
        Ok(())
    }

    /// Remove every line of `username`. Removing an absent user is a no-op.
    pub fn delete_user(&self, username: &str) -> Result<(), Error> {
        let found = rewrite::rewrite(&self.path, Edit::Delete(username))?;
        if !found {
            debug!(user = username, "delete of absent user");
        }
        Ok(())
    }

    /// Write `record` exactly as it is over the user's line.
    fn replace_record(&self, record: &UserRecord) -> Result<(), Error> {
        validate(record)?;
        rewrite::rewrite(
            &self.path,
            Edit::Upsert {
                record,
                keep_extra_info: false,
            },
        )?;
        Ok(())
    }

    fn new_record(
        &self,
        username: &str,
        password: &str,
        extra_info: Option<&str>,
    ) -> Result<UserRecord, Error> {
        let mut record = self.adopt(UserRecord::new(username, ""));
        if let Some(extra) = extra_info {
            record = record.with_extra_info(extra);
        }
        record
            .set_password_with(&self.codec, password)
            .context(HashSnafu)?;
        validate(&record)?;
        Ok(record)
    }
}

fn is_clean(value: &str) -> bool {
    !value.contains([':', '\r', '\n'])
}

fn validate(record: &UserRecord) -> Result<(), Error> {
    let username = record.username();
    snafu::ensure!(
        !username.is_empty() && is_clean(username),
        InvalidUsernameSnafu { username }
    );
    snafu::ensure!(
        is_clean(record.hashed_password()),
        InvalidFieldSnafu {
            field: "password hash"
        }
    );
    snafu::ensure!(
        record.extra_info().is_none_or(is_clean),
        InvalidFieldSnafu {
            field: "extra info"
        }
    );
    Ok(())
}

/// A record obtained from [`CredentialStore::bind`].
///
/// Every setter rewrites the user's line immediately. The record's own
/// fields are written verbatim, so `set_extra_info(None)` does drop the
/// third field. The in-memory record only changes once the file has.
#[derive(Debug)]
pub struct BoundRecord<'a> {
    store: &'a CredentialStore,
    record: UserRecord,
}

impl Deref for BoundRecord<'_> {
    type Target = UserRecord;

    fn deref(&self) -> &UserRecord {
        &self.record
    }
}

impl BoundRecord<'_> {
    fn write(
        &mut self,
        change: impl FnOnce(&mut UserRecord) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let mut updated = self.record.clone();
        change(&mut updated)?;
        self.store.replace_record(&updated)?;
        self.record = updated;
        Ok(())
    }

    /// Hash `password` with the store's codec and write it.
    pub fn set_password(&mut self, password: &str) -> Result<(), Error> {
        let store = self.store;
        self.write(|record| {
            record
                .set_password_with(store.codec(), password)
                .context(HashSnafu)
        })
    }

    /// Write an already hashed password.
    pub fn set_hashed_password(&mut self, hashed_password: impl Into<String>) -> Result<(), Error> {
        let hashed_password = hashed_password.into();
        self.write(|record| {
            record.set_hashed_password(hashed_password);
            Ok(())
        })
    }

    /// Write a new third field, or remove it with `None`.
    pub fn set_extra_info(&mut self, extra_info: Option<String>) -> Result<(), Error> {
        self.write(|record| {
            record.set_extra_info(extra_info);
            Ok(())
        })
    }

    /// Detach from the store.
    pub fn into_record(self) -> UserRecord {
        self.record
    }
}
