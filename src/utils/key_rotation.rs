//! Key-age tracking for the RS256 token signer. Keys are rotated wholesale
//! (old access tokens simply fail verification after rotation); this is
//! acceptable because access tokens are short-lived (`access_token_ttl`).

use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

const PRIVATE_KEY_PATH: &str = "data/keys/jwt_private.pem";

pub fn get_key_age() -> std::io::Result<u64> {
    let metadata = fs::metadata(PRIVATE_KEY_PATH)?;
    let modified = metadata.modified()?;
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default();
    Ok(age.as_secs())
}

pub fn is_key_expired(age_secs: u64, max_age_secs: u64) -> bool {
    age_secs > max_age_secs
}

pub fn rotate_keys() -> Result<(), Box<dyn std::error::Error>> {
    super::jwt_keys::generate_and_save_keys()
}

#[allow(dead_code)]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
