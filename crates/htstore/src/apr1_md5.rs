//! Apache's `$apr1$` variant of the iterated MD5 crypt.
//!
//! The output is `$apr1$<salt>$<digest>` where the salt is at most eight
//! characters and the digest is the 16-byte MD5 result in crypt(3)'s base64
//! ordering (22 characters).
//!
//! MD5 is broken as a password hash. It is implemented here so existing
//! Apache credential files keep working.

use crate::salt::ITOA64;
use md5::{Digest, Md5};

/// Magic prefix of every APR1 hash.
pub const PREFIX: &str = "$apr1$";

/// Longest salt the algorithm consumes.
pub const SALT_LEN: usize = 8;

const ROUNDS: u32 = 1000;

/// Digest bytes packed into each 4-character group, in output order.
const GROUPS: [[usize; 3]; 5] = [[0, 6, 12], [1, 7, 13], [2, 8, 14], [3, 9, 15], [4, 10, 5]];

fn push_itoa64(out: &mut String, mut value: u32, count: usize) {
    for _ in 0..count {
        out.push(ITOA64[(value & 0x3f) as usize] as char);
        value >>= 6;
    }
}

/// Extract the salt from a stored hash.
///
/// The `$apr1$` prefix is optional, the salt ends at the next `$` and is cut
/// to [`SALT_LEN`] characters, so a bare salt passes through unchanged.
pub fn salt_of(stored: &str) -> &str {
    let rest = stored.strip_prefix(PREFIX).unwrap_or(stored);
    let rest = rest.split('$').next().unwrap_or(rest);
    match rest.char_indices().nth(SALT_LEN) {
        Some((end, _)) => &rest[..end],
        None => rest,
    }
}

/// Hash `password` with `salt` (already extracted, see [`salt_of`]).
pub fn hash(password: &str, salt: &str) -> String {
    let pw = password.as_bytes();
    let salt_bytes = salt.as_bytes();

    let alternate = Md5::new()
        .chain_update(pw)
        .chain_update(salt_bytes)
        .chain_update(pw)
        .finalize();

    let mut ctx = Md5::new();
    ctx.update(pw);
    ctx.update(PREFIX.as_bytes());
    ctx.update(salt_bytes);
    for chunk in pw.chunks(16) {
        ctx.update(&alternate[..chunk.len()]);
    }
    let mut bits = pw.len();
    while bits > 0 {
        if bits & 1 == 1 {
            ctx.update([0u8]);
        } else {
            ctx.update(&pw[..1]);
        }
        bits >>= 1;
    }
    let mut digest = ctx.finalize();

    for round in 0..ROUNDS {
        let mut ctx = Md5::new();
        if round & 1 == 1 {
            ctx.update(pw);
        } else {
            ctx.update(&digest[..]);
        }
        if round % 3 != 0 {
            ctx.update(salt_bytes);
        }
        if round % 7 != 0 {
            ctx.update(pw);
        }
        if round & 1 == 1 {
            ctx.update(&digest[..]);
        } else {
            ctx.update(pw);
        }
        digest = ctx.finalize();
    }

    let mut out = String::with_capacity(PREFIX.len() + salt.len() + 23);
    out.push_str(PREFIX);
    out.push_str(salt);
    out.push('$');
    for [hi, mid, lo] in GROUPS {
        let value =
            u32::from(digest[hi]) << 16 | u32::from(digest[mid]) << 8 | u32::from(digest[lo]);
        push_itoa64(&mut out, value, 4);
    }
    push_itoa64(&mut out, u32::from(digest[11]), 2);
    out
}
