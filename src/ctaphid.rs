//! CTAPHID transport command dispatcher and keepalive driver
//! (spec.md §4.3, §4.4).
//!
//! Ported from `circuitkey/ctaphid.py`'s `process()` and its per-command
//! handlers. Two corrections relative to the original, both grounded in
//! the spec's explicit operational text over the source's behavior:
//! - `keepalive_task` there hardcodes the broadcast cid; the handler it
//!   accompanies is racing on one specific channel, and a keepalive on the
//!   wrong cid would never reach the host waiting on that channel. This
//!   sends it on the same cid as the in-flight CBOR command.
//! - `cbor_active_tasks` there stores `(cid, keepalive_task)`, but
//!   `cancel_cmd` reads it expecting `(cid, handler_task)` pairs — the
//!   thing actually being raced against the handler for cancellation
//!   purposes must be the handler itself. `App::begin_cbor_task` registers
//!   a cancellation token the CBOR handler observes directly.

use tokio_util::sync::CancellationToken;

use crate::app::App;
use crate::cbor;
use crate::channel;
use crate::error::CtapError;
use crate::hid::{self, HidTransport};
use crate::info;
use crate::schema::{CtaphidCmd, KeepaliveStatusCode, StatusCode, BROADCAST_CID};

pub async fn process(cid: u32, cmd: u8, payload: &[u8], app: &App, transport: &dyn HidTransport) {
    let result = match CtaphidCmd::try_from(cmd) {
        Ok(CtaphidCmd::Ping) => {
            hid::send(transport, cid, CtaphidCmd::Ping as u8, payload).await;
            Ok(())
        }
        Ok(CtaphidCmd::Init) => init_cmd(transport, cid, payload).await,
        Ok(CtaphidCmd::Wink) => {
            hid::send(transport, cid, CtaphidCmd::Wink as u8, &[]).await;
            app.ui.wink(3).await;
            Ok(())
        }
        Ok(CtaphidCmd::Cbor) => {
            cbor_cmd(transport, cid, payload, app).await;
            Ok(())
        }
        Ok(CtaphidCmd::Cancel) => {
            app.cancel_cid(cid).await;
            Ok(())
        }
        Ok(CtaphidCmd::Keepalive) | Ok(CtaphidCmd::Error) => Err(CtapError::new(
            StatusCode::InvalidCommand,
            "reply-only command received from host",
        )),
        Err(_) => Err(CtapError::new(
            StatusCode::InvalidCommand,
            format!("unsupported command {cmd:#04x}"),
        )),
    };

    if let Err(e) = result {
        error_cmd(transport, cid, e.code).await;
    }
}

async fn error_cmd(transport: &dyn HidTransport, cid: u32, code: StatusCode) {
    hid::send(transport, cid, CtaphidCmd::Error as u8, &[code.to_byte()]).await;
}

async fn init_cmd(transport: &dyn HidTransport, cid: u32, payload: &[u8]) -> Result<(), CtapError> {
    if payload.len() != 8 {
        return Err(CtapError::new(
            StatusCode::InvalidLength,
            "INIT nonce must be exactly 8 bytes",
        ));
    }

    let assigned_cid = if cid == BROADCAST_CID {
        channel::generate_cid()
    } else {
        cid
    };

    let mut response = Vec::with_capacity(17);
    response.extend_from_slice(payload);
    response.extend_from_slice(&assigned_cid.to_be_bytes());
    response.push(info::protocol_version());
    response.extend_from_slice(&info::device_version());
    response.push(info::capabilities());

    hid::send(transport, cid, CtaphidCmd::Init as u8, &response).await;
    Ok(())
}

/// Runs the CBOR handler against a keepalive loop on the same cid,
/// cancellable by a `CANCEL` frame (spec.md §4.3, §5). The keepalive loop
/// never completes on its own; whichever of the two finishes first (in
/// practice, always the handler) determines when the other is dropped.
async fn cbor_cmd(transport: &dyn HidTransport, cid: u32, payload: &[u8], app: &App) {
    let token = app.begin_cbor_task(cid).await;

    let handler = cbor::process(payload, app, &token);
    let keepalive = keepalive_loop(transport, cid, app.config.keepalive_interval);

    tokio::pin!(handler);
    tokio::pin!(keepalive);

    let response = tokio::select! {
        response = &mut handler => response,
        _ = &mut keepalive => unreachable!("keepalive loop never completes on its own"),
    };

    app.end_cbor_task(cid, &token).await;
    hid::send(transport, cid, CtaphidCmd::Cbor as u8, &response).await;
}

async fn keepalive_loop(
    transport: &dyn HidTransport,
    cid: u32,
    interval: std::time::Duration,
) -> Vec<u8> {
    loop {
        hid::send(
            transport,
            cid,
            CtaphidCmd::Keepalive as u8,
            &[KeepaliveStatusCode::Processing as u8],
        )
        .await;
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::HostCrypto;
    use crate::schema::REPORT_LEN;
    use crate::store::{Bucket, Store, StoreError};
    use crate::ui::NullUserInterface;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct InMemoryTransport {
        sent: Mutex<Vec<[u8; REPORT_LEN]>>,
    }

    impl InMemoryTransport {
        fn sent_reports(&self) -> Vec<[u8; REPORT_LEN]> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl HidTransport for InMemoryTransport {
        async fn send_report(&self, report: &[u8; REPORT_LEN]) {
            self.sent.lock().unwrap().push(*report);
        }
        fn poll_report(&self) -> Option<Vec<u8>> {
            None
        }
    }

    #[derive(Default)]
    struct MemStore(Mutex<Option<Bucket>>);
    impl Store for MemStore {
        fn load(&self, _b: &str) -> Result<Bucket, StoreError> {
            Ok(self.0.lock().unwrap().clone().unwrap_or_default())
        }
        fn save(&self, _b: &str, data: &Bucket) -> Result<(), StoreError> {
            *self.0.lock().unwrap() = Some(data.clone());
            Ok(())
        }
        fn reset(&self) -> Result<(), StoreError> {
            *self.0.lock().unwrap() = None;
            Ok(())
        }
    }

    async fn test_app() -> App {
        App::new(
            Arc::new(HostCrypto),
            Arc::new(MemStore::default()),
            Arc::new(NullUserInterface),
            crate::config::Config::default(),
        )
        .await
    }

    #[tokio::test]
    async fn ping_echoes_payload() {
        let transport = InMemoryTransport::default();
        let app = test_app().await;

        process(0x01020304, CtaphidCmd::Ping as u8, b"hello", &app, &transport).await;

        let reports = transport.sent_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0][4], CtaphidCmd::Ping as u8);
        assert_eq!(&reports[0][7..12], b"hello");
    }

    #[tokio::test]
    async fn init_on_broadcast_assigns_fresh_cid() {
        let transport = InMemoryTransport::default();
        let app = test_app().await;
        let nonce = [0xA5u8; 8];

        process(BROADCAST_CID, CtaphidCmd::Init as u8, &nonce, &app, &transport).await;

        let reports = transport.sent_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0][4], CtaphidCmd::Init as u8);
        assert_eq!(&reports[0][7..15], &nonce);
        let assigned = u32::from_be_bytes([
            reports[0][15],
            reports[0][16],
            reports[0][17],
            reports[0][18],
        ]);
        assert_ne!(assigned, 0);
        assert_ne!(assigned, BROADCAST_CID);
        assert_eq!(reports[0][19], 2);
        assert_eq!(&reports[0][20..23], &[0, 1, 0]);
    }

    #[tokio::test]
    async fn init_rejects_wrong_nonce_length() {
        let transport = InMemoryTransport::default();
        let app = test_app().await;

        process(BROADCAST_CID, CtaphidCmd::Init as u8, &[0u8; 4], &app, &transport).await;

        let reports = transport.sent_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0][4], CtaphidCmd::Error as u8);
        assert_eq!(reports[0][7], StatusCode::InvalidLength.to_byte());
    }

    #[tokio::test]
    async fn unknown_command_replies_invalid_command() {
        let transport = InMemoryTransport::default();
        let app = test_app().await;

        process(0x01, 0x77, &[], &app, &transport).await;

        let reports = transport.sent_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0][4], CtaphidCmd::Error as u8);
        assert_eq!(reports[0][7], StatusCode::InvalidCommand.to_byte());
    }

    #[tokio::test]
    async fn cbor_get_info_replies_on_same_cid() {
        let transport = InMemoryTransport::default();
        let app = test_app().await;

        process(0x0A0B0C0D, CtaphidCmd::Cbor as u8, &[0x04], &app, &transport).await;

        let reports = transport.sent_reports();
        // The getInfo map spans more than one packet; find the
        // initialization packet of the CBOR reply rather than assuming
        // it's the last report overall (a continuation packet, or a
        // trailing keepalive, may follow or precede it).
        let init_report = reports
            .iter()
            .find(|r| r[4] == CtaphidCmd::Cbor as u8 && &r[0..4] == &0x0A0B0C0Du32.to_be_bytes())
            .expect("a CBOR reply init packet was sent");
        assert_eq!(init_report[7], 0x00);
    }

    #[tokio::test]
    async fn cancel_with_no_active_task_is_a_no_op() {
        let transport = InMemoryTransport::default();
        let app = test_app().await;

        process(0x01, CtaphidCmd::Cancel as u8, &[], &app, &transport).await;

        assert!(transport.sent_reports().is_empty());
    }
}
