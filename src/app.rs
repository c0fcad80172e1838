//! Device-wide context (Design Notes §9).
//!
//! The Python source memoizes its singletons as function attributes
//! (`get_pin_protocol.v1`, `get_ui._ui`, `get_device._device`) and keeps
//! `cbor_active_tasks` as a bare module-level list. Here they're fields of
//! one struct, built once at boot and handed to every handler as `&App` —
//! the same "explicit context object" shape the teacher uses for its own
//! device/session state in `native/src/device.rs`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::crypto::CryptoBackend;
use crate::pin::PinProtocolV1;
use crate::store::Store;
use crate::ui::UserInterface;

pub struct App {
    pub crypto: Arc<dyn CryptoBackend>,
    pub store: Arc<dyn Store>,
    pub ui: Arc<dyn UserInterface>,
    pub pin: PinProtocolV1,
    pub config: Config,
    boot: Instant,
    /// In-flight CBOR tasks per cid (spec.md §3's `active_cbor_tasks`),
    /// tracked as cancellation tokens rather than task handles: a CANCEL
    /// frame triggers the token, and the handler's own task observes it
    /// cooperatively at its next suspension point.
    cbor_tasks: Mutex<HashMap<u32, Vec<CancellationToken>>>,
}

impl App {
    pub async fn new(
        crypto: Arc<dyn CryptoBackend>,
        store: Arc<dyn Store>,
        ui: Arc<dyn UserInterface>,
        config: Config,
    ) -> Self {
        let pin = PinProtocolV1::new(store.clone(), crypto.clone()).await;
        Self {
            crypto,
            store,
            ui,
            pin,
            config,
            boot: Instant::now(),
            cbor_tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.boot.elapsed()
    }

    /// Registers a fresh cancellation token for a CBOR handler about to
    /// start on `cid`, returning it so the caller can pass it through to
    /// the handler and the keepalive race.
    pub async fn begin_cbor_task(&self, cid: u32) -> CancellationToken {
        let token = CancellationToken::new();
        self.cbor_tasks
            .lock()
            .await
            .entry(cid)
            .or_default()
            .push(token.clone());
        token
    }

    /// Removes a completed (or cancelled) handler's token once it's done —
    /// mirrors the original's `cbor_active_tasks.remove(...)` cleanup.
    pub async fn end_cbor_task(&self, cid: u32, token: &CancellationToken) {
        let mut tasks = self.cbor_tasks.lock().await;
        if let Some(tokens) = tasks.get_mut(&cid) {
            tokens.retain(|t| t != token);
            if tokens.is_empty() {
                tasks.remove(&cid);
            }
        }
    }

    /// Cancels every in-flight CBOR task on `cid` (`CTAPHID_CANCEL`,
    /// spec.md §4.3). Cancellation is fire-and-forget: the affected
    /// handlers notice on their own next suspension point.
    pub async fn cancel_cid(&self, cid: u32) {
        if let Some(tokens) = self.cbor_tasks.lock().await.get(&cid) {
            for token in tokens {
                token.cancel();
            }
        }
    }
}
