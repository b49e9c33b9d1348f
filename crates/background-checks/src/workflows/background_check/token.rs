//! Opaque bearer tokens addressing a single run of an instance.
//!
//! A token is `"<len>:<instance>/<run>"` followed by a short SHA-256 checksum
//! of that text, encoded as URL-safe base64 without padding. `<len>` is the
//! byte length of the instance id, so either component may contain `/`.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::domain::{InstanceId, RunId, RunKey};

const CHECKSUM_LEN: usize = 8;
const SEPARATOR: char = '/';
const LENGTH_MARKER: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionToken(String);

impl DecisionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DecisionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DecisionToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token is not valid base64")]
    Encoding,
    #[error("token is truncated")]
    Truncated,
    #[error("token checksum does not match")]
    ChecksumMismatch,
    #[error("token payload is not utf-8")]
    NotUtf8,
    #[error("token payload has no run separator")]
    MissingSeparator,
    #[error("token payload has a malformed instance length")]
    BadLength,
    #[error("token names an empty instance or run")]
    EmptyComponent,
}

pub fn issue(instance_id: &InstanceId, run_id: &RunId) -> DecisionToken {
    let instance = instance_id.as_str();
    let payload = format!(
        "{}{LENGTH_MARKER}{instance}{SEPARATOR}{}",
        instance.len(),
        run_id.as_str()
    );
    let mut bytes = payload.into_bytes();
    let checksum = checksum(&bytes);
    bytes.extend_from_slice(&checksum);
    DecisionToken(URL_SAFE_NO_PAD.encode(bytes))
}

pub fn issue_for(key: &RunKey) -> DecisionToken {
    issue(&key.instance_id, &key.run_id)
}

pub fn resolve(token: &str) -> Result<(InstanceId, RunId), TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|_| TokenError::Encoding)?;
    // Shortest payload is "1:a/b".
    if bytes.len() < CHECKSUM_LEN + 5 {
        return Err(TokenError::Truncated);
    }

    let (payload, expected) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if checksum(payload) != expected {
        return Err(TokenError::ChecksumMismatch);
    }

    let payload = std::str::from_utf8(payload).map_err(|_| TokenError::NotUtf8)?;
    let (length, rest) = payload
        .split_once(LENGTH_MARKER)
        .ok_or(TokenError::BadLength)?;
    if length.is_empty() || !length.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TokenError::BadLength);
    }
    let length: usize = length.parse().map_err(|_| TokenError::BadLength)?;
    let instance = rest.get(..length).ok_or(TokenError::BadLength)?;
    let run = rest[length..]
        .strip_prefix(SEPARATOR)
        .ok_or(TokenError::MissingSeparator)?;
    if instance.is_empty() || run.is_empty() {
        return Err(TokenError::EmptyComponent);
    }

    Ok((InstanceId(instance.to_string()), RunId(run.to_string())))
}

pub fn resolve_key(token: &str) -> Result<RunKey, TokenError> {
    let (instance_id, run_id) = resolve(token)?;
    Ok(RunKey::new(instance_id, run_id))
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(payload);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}
