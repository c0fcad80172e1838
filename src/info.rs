//! Static `getInfo` response and `CTAPHID_INIT` capability/version constants
//! (spec.md §4.3, §4.5).
//!
//! Grounded on `circuitkey/info.py`'s `CTAP_INFO`/`CBOR_INFO` tuples,
//! rebuilt as a `ciborium::Value` map the way the teacher builds its CBOR
//! request/response bodies in `native/src/fido2.rs`.

use ciborium::value::Value;

use crate::schema::{self, info_key, CapabilityFlag, CTAPHID_PROTOCOL_VERSION, DEVICE_VERSION};

/// 16-byte AAGUID: all-zero except the final byte, matching the original's
/// placeholder value (a real device would provision a unique AAGUID here).
pub const AAGUID: [u8; 16] = {
    let mut bytes = [0u8; 16];
    bytes[15] = 0x01;
    bytes
};

/// Capabilities advertised in `CTAPHID_INIT` responses: WINK and CBOR, no
/// NMSG (U2F/CTAPHID_MSG is out of scope).
pub fn capabilities() -> u8 {
    schema::capabilities_byte(&[CapabilityFlag::Wink, CapabilityFlag::Cbor])
}

pub fn device_version() -> [u8; 3] {
    DEVICE_VERSION
}

pub fn protocol_version() -> u8 {
    CTAPHID_PROTOCOL_VERSION
}

/// The `authenticatorGetInfo` response map. `clientPin` reflects whether a
/// PIN is currently set, per the CTAP2 spec's definition of that option —
/// the original source hardcodes it to `true`; this core reports the real
/// state (Design Notes §9's resolved Open Question).
pub fn cbor_info(pin_is_set: bool) -> Value {
    Value::Map(vec![
        (
            Value::Integer(info_key::VERSIONS.into()),
            Value::Array(vec![Value::Text("FIDO_2_0".into())]),
        ),
        (
            Value::Integer(info_key::AAGUID.into()),
            Value::Bytes(AAGUID.to_vec()),
        ),
        (
            Value::Integer(info_key::OPTIONS.into()),
            Value::Map(vec![
                (Value::Text("rk".into()), Value::Bool(false)),
                (Value::Text("up".into()), Value::Bool(true)),
                (Value::Text("plat".into()), Value::Bool(false)),
                (Value::Text("clientPin".into()), Value::Bool(pin_is_set)),
            ]),
        ),
        (
            Value::Integer(info_key::PIN_UV_AUTH_PROTOCOLS.into()),
            Value::Array(vec![Value::Integer(1.into())]),
        ),
        (
            Value::Integer(info_key::FIRMWARE_VERSION.into()),
            Value::Integer(1.into()),
        ),
    ])
}

/// The `pinUvAuthProtocols` list advertised above, as plain integers, for
/// callers that need to validate a request's `pinProtocol` without
/// re-parsing the CBOR map.
pub const SUPPORTED_PIN_PROTOCOLS: [i64; 1] = [1];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbor_info_reflects_pin_state() {
        let unset = cbor_info(false);
        let set = cbor_info(true);
        assert_ne!(
            format!("{unset:?}"),
            format!("{set:?}"),
            "clientPin option should differ"
        );
    }

    #[test]
    fn capabilities_excludes_nmsg() {
        assert_eq!(capabilities() & 0x08, 0, "NMSG is not supported");
        assert_ne!(capabilities() & 0x01, 0, "WINK is supported");
        assert_ne!(capabilities() & 0x04, 0, "CBOR is supported");
    }
}
