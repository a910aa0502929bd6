//! Line checksums for LCOV `DA` records.
//!
//! A line checksum is the MD5 digest of the raw source line (terminator
//! included), written into the trace as 24 characters of padded base64.
//!
//! ```
//! use lcovmerge_checksum::{decode_checksum, encode_checksum, line_checksum};
//!
//! let digest = line_checksum(b"int x;\n");
//! let text = encode_checksum(&digest);
//! assert_eq!(text.len(), 24);
//! assert_eq!(decode_checksum(&text).unwrap(), digest);
//! ```

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use thiserror::Error;

pub use base64::DecodeError;

/// Size of an MD5 digest in bytes.
pub const DIGEST_LEN: usize = 16;

/// A 128-bit line fingerprint.
pub type Checksum = [u8; DIGEST_LEN];

/// Length of an encoded [`Checksum`].
pub const ENCODED_CHECKSUM_LEN: usize = 24;

/// Errors from [`decode_checksum`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChecksumError {
    #[error("expected {ENCODED_CHECKSUM_LEN} characters, got {0}")]
    Length(usize),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("decoded to {0} bytes, expected {DIGEST_LEN}")]
    DecodedLength(usize),
}

/// Digest of one raw source line.
pub fn line_checksum(line: &[u8]) -> Checksum {
    Md5::digest(line).into()
}

/// Encode a checksum for a `DA` record.
pub fn encode_checksum(checksum: &Checksum) -> String {
    STANDARD.encode(checksum)
}

/// Parse the checksum field of a `DA` record.
pub fn decode_checksum(text: &str) -> Result<Checksum, ChecksumError> {
    if text.len() != ENCODED_CHECKSUM_LEN {
        return Err(ChecksumError::Length(text.len()));
    }
    let bytes = STANDARD.decode(text)?;
    Checksum::try_from(bytes.as_slice()).map_err(|_| ChecksumError::DecodedLength(bytes.len()))
}
