//! Random identifiers: line provisioning codes, endpoint names and secrets
//!
//! Every draw goes through a caller-supplied [`Rng`] so tests can seed it.
//! The "unused" checks only see rows persisted at call time; two transactions
//! racing for the same value are caught by the unique constraints instead.

use rand::distributions::{Alphanumeric, Uniform};
use rand::Rng;
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::endpoint::Protocol;
use crate::error::Result;

pub const PROVISIONING_CODE_MIN: u32 = 100_000;
pub const PROVISIONING_CODE_MAX: u32 = 999_999;
pub const HASH_LENGTH: usize = 8;
pub const SECRET_LENGTH: usize = 16;

const HASH_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Draw one six-digit provisioning code. Never starts with `0`.
pub fn random_provisioning_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    rng.sample(Uniform::new_inclusive(PROVISIONING_CODE_MIN, PROVISIONING_CODE_MAX))
        .to_string()
}

/// Draw an 8 character lowercase alphanumeric string.
pub fn random_hash<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..HASH_LENGTH)
        .map(|_| HASH_ALPHABET[rng.gen_range(0..HASH_ALPHABET.len())] as char)
        .collect()
}

pub fn random_secret<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SECRET_LENGTH)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}

/// Draw hashes until `exists` rejects one.
pub fn find_unused_hash<R, F>(rng: &mut R, mut exists: F) -> String
where
    R: Rng + ?Sized,
    F: FnMut(&str) -> bool,
{
    loop {
        let candidate = random_hash(rng);
        if !exists(&candidate) {
            return candidate;
        }
        warn!("Generated hash {} already in use, drawing again", candidate);
    }
}

/// Draw provisioning codes until one is not held by any line.
pub async fn generate_provisioning_code<R: Rng + ?Sized>(
    conn: &mut SqliteConnection,
    rng: &mut R,
) -> Result<String> {
    loop {
        let code = random_provisioning_code(rng);
        let taken: Option<i64> =
            sqlx::query_scalar("SELECT id FROM lines WHERE provisioning_code = ?")
                .bind(&code)
                .fetch_optional(&mut *conn)
                .await?;
        if taken.is_none() {
            debug!("Generated provisioning code {}", code);
            return Ok(code);
        }
        warn!("Provisioning code {} already in use, drawing again", code);
    }
}

/// Find a name no endpoint of `protocol` uses yet.
///
/// Custom endpoints have no name column; their generated value is used as the
/// interface.
pub async fn find_unused_endpoint_name<R: Rng + ?Sized>(
    conn: &mut SqliteConnection,
    rng: &mut R,
    protocol: Protocol,
) -> Result<String> {
    let query = match protocol {
        Protocol::Sip => "SELECT id FROM endpoint_sip WHERE name = ?",
        Protocol::Sccp => "SELECT id FROM endpoint_sccp WHERE name = ?",
        Protocol::Iax => "SELECT id FROM endpoint_iax WHERE name = ?",
        Protocol::Custom => "SELECT id FROM endpoint_custom WHERE interface = ?",
    };
    loop {
        let candidate = random_hash(rng);
        let taken: Option<i64> = sqlx::query_scalar(query)
            .bind(&candidate)
            .fetch_optional(&mut *conn)
            .await?;
        if taken.is_none() {
            return Ok(candidate);
        }
        warn!("{} endpoint name {} already in use, drawing again", protocol, candidate);
    }
}
