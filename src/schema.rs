//! Wire constants: status codes, command codes, capability flags, and the
//! CBOR integer keys used by the clientPIN and getInfo maps.
//!
//! Ported from `circuitkey/schema.py`. The full FIDO2 status-code catalog
//! is carried (spec.md §6 lists only the subset this core must recognize
//! at minimum) since a real dispatcher has to be able to reject or pass
//! through codes it never originates.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The broadcast channel identifier, used only for `CTAPHID_INIT`.
pub const BROADCAST_CID: u32 = 0xFFFF_FFFF;

/// The all-zero cid is reserved and never allocated.
pub const RESERVED_ZERO_CID: u32 = 0x0000_0000;

/// Fixed HID report size (spec.md §3).
pub const REPORT_LEN: usize = 64;

/// Bytes of payload that fit in an initialization packet.
pub const INIT_PAYLOAD_LEN: usize = 57;

/// Bytes of payload that fit in a continuation packet.
pub const CONT_PAYLOAD_LEN: usize = 59;

/// Largest logical message payload representable in a `u16` bcnt field
/// after the first packet's header, per spec.md §3.
pub const MAX_PAYLOAD_LEN: usize = 7609;

/// Status/error codes.
///
/// https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#error-responses
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum StatusCode {
    Success = 0x00,
    InvalidCommand = 0x01,
    InvalidParameter = 0x02,
    InvalidLength = 0x03,
    InvalidSeq = 0x04,
    Timeout = 0x05,
    ChannelBusy = 0x06,
    LockRequired = 0x0A,
    InvalidChannel = 0x0B,
    CborUnexpectedType = 0x11,
    InvalidCbor = 0x12,
    MissingParameter = 0x14,
    LimitExceeded = 0x15,
    UnsupportedExtension = 0x16,
    CredentialExcluded = 0x19,
    Processing = 0x21,
    InvalidCredential = 0x22,
    UserActionPending = 0x23,
    OperationPending = 0x24,
    NoOperations = 0x25,
    UnsupportedAlgorithm = 0x26,
    OperationDenied = 0x27,
    KeyStoreFull = 0x28,
    NoOperationPending = 0x2A,
    UnsupportedOption = 0x2B,
    InvalidOption = 0x2C,
    KeepaliveCancel = 0x2D,
    NoCredentials = 0x2E,
    UserActionTimeout = 0x2F,
    NotAllowed = 0x30,
    PinInvalid = 0x31,
    PinBlocked = 0x32,
    PinAuthInvalid = 0x33,
    PinAuthBlocked = 0x34,
    PinNotSet = 0x35,
    PuatRequired = 0x36,
    PinPolicyViolation = 0x37,
    PinTokenExpired = 0x38,
    RequestTooLarge = 0x39,
    ActionTimeout = 0x3A,
    UpRequired = 0x3B,
}

impl StatusCode {
    pub fn to_byte(self) -> u8 {
        self.into()
    }

    /// Valid status for a `CTAPHID_ERROR` transport frame (spec.md §4.1,
    /// Design Notes §9's open question on the `is_ctap_error` boundary).
    pub fn is_ctap_error(self) -> bool {
        (self as u8) <= 0x0B
    }
}

/// CTAPHID transport command codes (spec.md §4.3).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum CtaphidCmd {
    Ping = 0x01,
    Init = 0x06,
    Wink = 0x08,
    Cbor = 0x10,
    Cancel = 0x11,
    Keepalive = 0x3B,
    Error = 0x3F,
}

/// CTAP2 CBOR command byte (spec.md §4.5).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum CborCmd {
    MakeCredential = 0x01,
    GetAssertion = 0x02,
    GetInfo = 0x04,
    ClientPin = 0x06,
    Reset = 0x07,
    GetNextAssertion = 0x08,
}

/// clientPIN subcommand byte (spec.md §4.6).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum PinSubCmd {
    GetRetries = 0x01,
    GetKeyAgreement = 0x02,
    SetNewPin = 0x03,
    ChangePin = 0x04,
    GetPinToken = 0x05,
}

/// Status byte carried in a `CTAPHID_KEEPALIVE` frame.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum KeepaliveStatusCode {
    Processing = 0x01,
    UpNeeded = 0x02,
}

/// `CTAPHID_INIT` capability flags, OR'd together into a single byte.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapabilityFlag {
    Wink = 0x01,
    Cbor = 0x04,
    Nmsg = 0x08,
}

/// This authenticator implements WINK and CBOR, but not CTAPHID_MSG (U2F
/// is out of scope per spec.md §1) — so NMSG is not set; we simply never
/// advertise it and it's absent from the OR'd byte.
pub fn capabilities_byte(flags: &[CapabilityFlag]) -> u8 {
    flags.iter().fold(0u8, |acc, f| acc | (*f as u8))
}

/// CTAPHID protocol version advertised in `CTAPHID_INIT` responses.
pub const CTAPHID_PROTOCOL_VERSION: u8 = 2;

/// Device version triple advertised in `CTAPHID_INIT` responses.
pub const DEVICE_VERSION: [u8; 3] = [0, 1, 0];

/// clientPIN request map integer keys (spec.md §6).
pub mod pin_req_key {
    pub const PIN_PROTOCOL: i64 = 0x01;
    pub const SUB_COMMAND: i64 = 0x02;
    pub const KEY_AGREEMENT: i64 = 0x03;
    pub const PIN_AUTH: i64 = 0x04;
    pub const NEW_PIN_ENC: i64 = 0x05;
    pub const PIN_HASH_ENC: i64 = 0x06;
}

/// clientPIN response map integer keys (spec.md §6).
pub mod pin_resp_key {
    pub const KEY_AGREEMENT: i64 = 0x01;
    pub const PIN_TOKEN: i64 = 0x02;
    pub const RETRIES: i64 = 0x03;
}

/// getInfo response map integer keys.
pub mod info_key {
    pub const VERSIONS: i64 = 0x01;
    pub const AAGUID: i64 = 0x03;
    pub const OPTIONS: i64 = 0x04;
    pub const PIN_UV_AUTH_PROTOCOLS: i64 = 0x06;
    pub const FIRMWARE_VERSION: i64 = 0x0E;
}

/// COSE_Key integer keys for the getKeyAgreement EC2/P-256 key.
pub mod cose_key {
    pub const KTY: i64 = 1;
    pub const ALG: i64 = 3;
    pub const CRV: i64 = -1;
    pub const X: i64 = -2;
    pub const Y: i64 = -3;

    pub const KTY_EC2: i64 = 2;
    pub const ALG_ECDH_ES_HKDF_256: i64 = -25;
    pub const CRV_P256: i64 = 1;
}
