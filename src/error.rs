//! Typed error taxonomy for the authenticator core.
//!
//! Mirrors `circuitkey/error.py`: transport framing violations become
//! [`CtapError`], CBOR/PIN-layer failures become [`CborError`], and a
//! broadcast-channel INIT collision is the special [`AbortError`] case that
//! the HID framing layer has to distinguish from an ordinary channel
//! violation (spec.md §4.1).

use thiserror::Error;

use crate::schema::StatusCode;

/// A transport-layer error, surfaced as a `CTAPHID_ERROR` frame on the cid
/// that triggered it (spec.md §7). Only codes in the "CTAP error" range
/// (`StatusCode::is_ctap_error`) are valid here — see Design Notes §9's
/// open question about the `is_ctap_error` boundary; callers that would
/// otherwise construct this with a CBOR-layer code have a routing bug.
#[derive(Debug, Error)]
#[error("CTAP error {code:?}: {message}")]
pub struct CtapError {
    pub code: StatusCode,
    pub message: String,
}

impl CtapError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        debug_assert!(
            code.is_ctap_error(),
            "{code:?} is not a transport-layer error code"
        );
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A CBOR/protocol/PIN-policy error, encoded as a one-byte status in the
/// normal CBOR reply slot (spec.md §7). Any [`StatusCode`] is valid here.
#[derive(Debug, Error)]
#[error("CBOR error {code:?}: {message}")]
pub struct CborError {
    pub code: StatusCode,
    pub message: String,
}

impl CborError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Raised by [`crate::hid::receive`] when a broadcast-cid INIT packet
/// arrives while a different channel's multi-packet message is still being
/// reassembled — the host is aborting the in-flight transaction, not
/// violating channel locking (spec.md §4.1, step 2).
#[derive(Debug, Error)]
#[error("abort requested for cid {cid:08x} with nonce {nonce:02x?}")]
pub struct AbortError {
    pub cid: u32,
    pub nonce: [u8; 8],
}

/// Failure from the [`crate::ui::UserInterface`] adapter.
#[derive(Debug, Error)]
pub enum UiError {
    #[error("user did not confirm presence within the timeout")]
    Timeout,
}
