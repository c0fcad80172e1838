//! CTAP2 CBOR command dispatcher and clientPIN subcommand router
//! (spec.md §4.5, §4.6).
//!
//! Ported from `circuitkey/cbor.py`'s `process()`/`authenticator_client_PIN`.
//! The source builds a linear `(code, function)` table and checks
//! `inspect.iscoroutine` on every call; per Design Notes §9 this becomes a
//! dense match over `CborCmd`/`PinSubCmd` with a uniform async handler
//! signature, removing the coroutine-vs-value ambiguity entirely.

use ciborium::value::Value;
use tokio_util::sync::CancellationToken;

use crate::app::App;
use crate::info;
use crate::schema::{cose_key, info_key, pin_req_key, pin_resp_key, CborCmd, PinSubCmd, StatusCode};

const SUCCESS: u8 = 0x00;

fn encode_error(code: StatusCode) -> Vec<u8> {
    vec![code.to_byte()]
}

fn encode_success(value: Option<Value>) -> Vec<u8> {
    let mut out = vec![SUCCESS];
    if let Some(value) = value {
        let mut cbor = Vec::new();
        ciborium::ser::into_writer(&value, &mut cbor).expect("map serialization cannot fail");
        out.extend(cbor);
    }
    out
}

/// Processes one CBOR-layer request: `payload[0]` is the CTAP2 command
/// byte, `payload[1..]` is the CBOR body (possibly empty for commands that
/// take none). Always returns a wire-ready reply — errors are encoded, not
/// propagated, matching the original's catch-all in `process()`.
pub async fn process(payload: &[u8], app: &App, cancel: &CancellationToken) -> Vec<u8> {
    let Some((&cmd_byte, body)) = payload.split_first() else {
        return encode_error(StatusCode::InvalidLength);
    };

    let Ok(cmd) = CborCmd::try_from(cmd_byte) else {
        return encode_error(StatusCode::InvalidCommand);
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => encode_error(StatusCode::KeepaliveCancel),
        result = dispatch(cmd, body, app) => result,
    }
}

async fn dispatch(cmd: CborCmd, body: &[u8], app: &App) -> Vec<u8> {
    match cmd {
        CborCmd::GetInfo => encode_success(Some(info::cbor_info(app.pin.is_pin_set()))),
        CborCmd::Reset => match authenticator_reset(app).await {
            Ok(()) => encode_success(None),
            Err(code) => encode_error(code),
        },
        CborCmd::ClientPin => match parse_body(body) {
            Ok(req) => match client_pin(&req, app).await {
                Ok(value) => encode_success(value),
                Err(code) => encode_error(code),
            },
            Err(code) => encode_error(code),
        },
        CborCmd::MakeCredential | CborCmd::GetAssertion | CborCmd::GetNextAssertion => {
            encode_error(StatusCode::NotAllowed)
        }
    }
}

fn parse_body(body: &[u8]) -> Result<Value, StatusCode> {
    ciborium::de::from_reader(body).map_err(|_| StatusCode::InvalidCbor)
}

async fn authenticator_reset(app: &App) -> Result<(), StatusCode> {
    if app.uptime() > app.config.reset_uptime_window {
        return Err(StatusCode::NotAllowed);
    }

    app.ui
        .verify_user_presence(app.config.reset_presence_timeout)
        .await
        .map_err(|_| StatusCode::UserActionTimeout)?;

    app.store.reset().map_err(|_| StatusCode::NotAllowed)
}

fn map_get<'a>(map: &'a [(Value, Value)], key: i64) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Integer(i) if i64::try_from(*i) == Ok(key)))
        .map(|(_, v)| v)
}

fn as_bytes(value: &Value) -> Option<&[u8]> {
    match value {
        Value::Bytes(b) => Some(b),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => i64::try_from(*i).ok(),
        _ => None,
    }
}

fn key_agreement_from_cose(value: &Value) -> Result<crate::crypto::EcPublicKey, StatusCode> {
    let Value::Map(map) = value else {
        return Err(StatusCode::InvalidParameter);
    };
    let x = map_get(map, cose_key::X).and_then(as_bytes).ok_or(StatusCode::MissingParameter)?;
    let y = map_get(map, cose_key::Y).and_then(as_bytes).ok_or(StatusCode::MissingParameter)?;
    if x.len() != 32 || y.len() != 32 {
        return Err(StatusCode::InvalidParameter);
    }
    let mut key = crate::crypto::EcPublicKey { x: [0u8; 32], y: [0u8; 32] };
    key.x.copy_from_slice(x);
    key.y.copy_from_slice(y);
    Ok(key)
}

fn cose_key_value(key: &crate::crypto::EcPublicKey) -> Value {
    Value::Map(vec![
        (Value::Integer(cose_key::KTY.into()), Value::Integer(cose_key::KTY_EC2.into())),
        (Value::Integer(cose_key::ALG.into()), Value::Integer(cose_key::ALG_ECDH_ES_HKDF_256.into())),
        (Value::Integer(cose_key::CRV.into()), Value::Integer(cose_key::CRV_P256.into())),
        (Value::Integer(cose_key::X.into()), Value::Bytes(key.x.to_vec())),
        (Value::Integer(cose_key::Y.into()), Value::Bytes(key.y.to_vec())),
    ])
}

async fn client_pin(req: &Value, app: &App) -> Result<Option<Value>, StatusCode> {
    let Value::Map(map) = req else {
        return Err(StatusCode::InvalidParameter);
    };

    let protocol = map_get(map, pin_req_key::PIN_PROTOCOL)
        .and_then(as_i64)
        .ok_or(StatusCode::MissingParameter)?;
    let sub_command = map_get(map, pin_req_key::SUB_COMMAND)
        .and_then(as_i64)
        .ok_or(StatusCode::MissingParameter)?;

    if !info::SUPPORTED_PIN_PROTOCOLS.contains(&protocol) {
        return Err(StatusCode::PinAuthInvalid);
    }

    let Ok(sub_command) = PinSubCmd::try_from(sub_command as u8) else {
        return Err(StatusCode::InvalidCommand);
    };

    match sub_command {
        PinSubCmd::GetRetries => {
            let retries = app.pin.get_retries().await;
            Ok(Some(Value::Map(vec![(
                Value::Integer(pin_resp_key::RETRIES.into()),
                Value::Integer(retries.into()),
            )])))
        }
        PinSubCmd::GetKeyAgreement => {
            let key = app.pin.get_key_agreement_pub_key().await;
            Ok(Some(Value::Map(vec![(
                Value::Integer(pin_resp_key::KEY_AGREEMENT.into()),
                cose_key_value(&key),
            )])))
        }
        PinSubCmd::SetNewPin => {
            if app.pin.is_pin_set() {
                return Err(StatusCode::PinAuthInvalid);
            }
            let key_agreement = map_get(map, pin_req_key::KEY_AGREEMENT)
                .ok_or(StatusCode::MissingParameter)
                .and_then(key_agreement_from_cose)?;
            let new_pin_enc = map_get(map, pin_req_key::NEW_PIN_ENC)
                .and_then(as_bytes)
                .ok_or(StatusCode::MissingParameter)?;
            let pin_auth = map_get(map, pin_req_key::PIN_AUTH)
                .and_then(as_bytes)
                .ok_or(StatusCode::MissingParameter)?;

            app.pin
                .set_pin(new_pin_enc, pin_auth, &key_agreement)
                .await
                .map_err(|e| e.code)?;
            Ok(None)
        }
        PinSubCmd::ChangePin => {
            if app.pin.is_blocked().await {
                return Err(StatusCode::PinBlocked);
            }
            let key_agreement = map_get(map, pin_req_key::KEY_AGREEMENT)
                .ok_or(StatusCode::MissingParameter)
                .and_then(key_agreement_from_cose)?;
            let pin_hash_enc = map_get(map, pin_req_key::PIN_HASH_ENC)
                .and_then(as_bytes)
                .ok_or(StatusCode::MissingParameter)?;
            let new_pin_enc = map_get(map, pin_req_key::NEW_PIN_ENC)
                .and_then(as_bytes)
                .ok_or(StatusCode::MissingParameter)?;
            let pin_auth = map_get(map, pin_req_key::PIN_AUTH)
                .and_then(as_bytes)
                .ok_or(StatusCode::MissingParameter)?;

            app.pin
                .verify(pin_hash_enc, &key_agreement)
                .await
                .map_err(|e| e.code)?;
            app.pin
                .set_pin(new_pin_enc, pin_auth, &key_agreement)
                .await
                .map_err(|e| e.code)?;
            Ok(None)
        }
        PinSubCmd::GetPinToken => {
            let key_agreement = map_get(map, pin_req_key::KEY_AGREEMENT)
                .ok_or(StatusCode::MissingParameter)
                .and_then(key_agreement_from_cose)?;
            let pin_hash_enc = map_get(map, pin_req_key::PIN_HASH_ENC)
                .and_then(as_bytes)
                .ok_or(StatusCode::MissingParameter)?;

            let token = app
                .pin
                .verify(pin_hash_enc, &key_agreement)
                .await
                .map_err(|e| e.code)?;
            Ok(Some(Value::Map(vec![(
                Value::Integer(pin_resp_key::PIN_TOKEN.into()),
                Value::Bytes(token),
            )])))
        }
    }
}
