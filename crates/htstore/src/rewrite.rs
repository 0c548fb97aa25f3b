//! Scan-rewrite-swap: stream the credential file into a sibling temp file,
//! applying one edit, then rename the temp file over the original.
//!
//! Until the rename the original is never opened for writing. Any error
//! drops the [`NamedTempFile`], which deletes it.

use crate::record::UserRecord;
use crate::store::{
    DuplicateUserSnafu, Error, FileOpenSnafu, FileReadSnafu, FileWriteSnafu, RenameSnafu,
    TempFileSnafu,
};
use snafu::ResultExt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, trace};

/// The change applied while streaming.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Edit<'a> {
    /// Append `record`; fail if the username is already present.
    Add(&'a UserRecord),
    /// Replace the first line of the user, or append if there is none.
    ///
    /// With `keep_extra_info`, a record without a third field inherits the
    /// one of the line it replaces.
    Upsert {
        record: &'a UserRecord,
        keep_extra_info: bool,
    },
    /// Drop every line of the user.
    Delete(&'a str),
}

impl Edit<'_> {
    fn username(&self) -> &str {
        match self {
            Edit::Add(record) | Edit::Upsert { record, .. } => record.username(),
            Edit::Delete(username) => *username,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Edit::Add(_) => "add",
            Edit::Upsert { .. } => "update",
            Edit::Delete(_) => "delete",
        }
    }
}

/// Split a raw line into its content and its `\n` / `\r\n` terminator.
pub(crate) fn split_terminator(line: &[u8]) -> (&[u8], &[u8]) {
    let content_len = match line {
        [rest @ .., b'\r', b'\n'] => rest.len(),
        [rest @ .., b'\n'] => rest.len(),
        _ => line.len(),
    };
    line.split_at(content_len)
}

fn fields(content: &[u8]) -> impl Iterator<Item = &[u8]> {
    content.splitn(3, |&b| b == b':')
}

/// Username of a record line, as raw bytes.
///
/// A record line has a non-empty first field and at least two fields. The
/// other fields may hold any bytes.
pub(crate) fn line_username(content: &[u8]) -> Option<&[u8]> {
    let mut fields = fields(content);
    let username = fields.next().filter(|name| !name.is_empty())?;
    fields.next()?;
    Some(username)
}

/// Parse the content of a raw line. Lines that are not records, or whose
/// username is not UTF-8, are `None`. Invalid bytes in the other fields
/// are replaced with U+FFFD.
pub(crate) fn parse_line(content: &[u8]) -> Option<UserRecord> {
    std::str::from_utf8(line_username(content)?).ok()?;
    UserRecord::parse(&String::from_utf8_lossy(content))
}

/// Line for `record`. With `keep_extra_info`, a record without a third
/// field takes the raw third field of `existing`.
fn replacement_line(record: &UserRecord, existing: &[u8], keep_extra_info: bool) -> Vec<u8> {
    let mut line = record.to_line().into_bytes();
    if keep_extra_info
        && record.extra_info().is_none()
        && let Some(extra) = fields(existing).nth(2)
    {
        line.push(b':');
        line.extend_from_slice(extra);
    }
    line
}

/// Apply `edit` to the file at `path`. Returns whether the user was present.
pub(crate) fn rewrite(path: &Path, edit: Edit<'_>) -> Result<bool, Error> {
    let source = File::open(path).context(FileOpenSnafu { path })?;
    let permissions = source
        .metadata()
        .context(FileReadSnafu { path })?
        .permissions();

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(dir)
        .context(TempFileSnafu { path: dir })?;
    let temp_path = temp.path().to_path_buf();

    debug!(path = %path.display(), op = edit.name(), user = edit.username(), "rewriting");

    let mut reader = BufReader::new(source);
    let mut writer = BufWriter::new(temp);
    let mut line = Vec::new();
    let mut found = false;
    // Whether the last line written lacks a terminator.
    let mut open_line = false;

    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .context(FileReadSnafu { path })?;
        if read == 0 {
            break;
        }
        let (content, terminator) = split_terminator(&line);

        let username = line_username(content);
        if username.is_none() {
            trace!(bytes = content.len(), "passing malformed line through");
        }
        let matches = match edit {
            Edit::Upsert { .. } if found => false,
            _ => username == Some(edit.username().as_bytes()),
        };
        if !matches {
            writer
                .write_all(&line)
                .context(FileWriteSnafu { path: &temp_path })?;
            open_line = terminator.is_empty();
            continue;
        }

        found = true;
        match edit {
            Edit::Add(record) => {
                return DuplicateUserSnafu {
                    username: record.username(),
                }
                .fail();
            }
            Edit::Upsert {
                record,
                keep_extra_info,
            } => {
                let replacement = replacement_line(record, content, keep_extra_info);
                writer
                    .write_all(&replacement)
                    .and_then(|()| writer.write_all(terminator))
                    .context(FileWriteSnafu { path: &temp_path })?;
                open_line = terminator.is_empty();
            }
            Edit::Delete(_) => {}
        }
    }

    if !found && let Edit::Add(record) | Edit::Upsert { record, .. } = edit {
        if open_line {
            writer
                .write_all(b"\n")
                .context(FileWriteSnafu { path: &temp_path })?;
        }
        writeln!(writer, "{}", record.to_line()).context(FileWriteSnafu { path: &temp_path })?;
    }

    let temp = writer
        .into_inner()
        .map_err(|e| e.into_error())
        .context(FileWriteSnafu { path: &temp_path })?;
    temp.as_file()
        .sync_all()
        .context(FileWriteSnafu { path: &temp_path })?;
    fs::set_permissions(&temp_path, permissions).context(FileWriteSnafu { path: &temp_path })?;
    persist(temp, path)?;

    debug!(path = %path.display(), op = edit.name(), user = edit.username(), found, "swapped");
    Ok(found)
}

fn persist(temp: NamedTempFile, path: &Path) -> Result<(), Error> {
    temp.persist(path)
        .map(drop)
        .map_err(|e| e.error)
        .context(RenameSnafu { path })
}
