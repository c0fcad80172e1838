use std::sync::Arc;

use ctap_authenticator_core::app::App;
use ctap_authenticator_core::config::Config;
use ctap_authenticator_core::crypto::HostCrypto;
use ctap_authenticator_core::ctaphid;
use ctap_authenticator_core::hid::{self, ReceiveError};
use ctap_authenticator_core::store::FileStore;
use ctap_authenticator_core::ui::NullUserInterface;
use ctap_authenticator_core::usb::UsbHidTransport;

/// Runs the CTAPHID command loop forever: reassemble one message, dispatch
/// it as its own task, repeat. Ported from `circuitkey/main.py`'s `main()`.
///
/// The original also calls `ctaphid.abort_cmd(hdev, e.cid, e.nonce)` in its
/// `AbortError` branch, but that function is never defined anywhere in the
/// retrieved source — only referenced from this one call site. Rather than
/// invent its wire behavior, the abort is logged and the partially
/// reassembled message is simply dropped, which is what happens to the
/// cid's in-flight reassembly state regardless: the next report starts a
/// fresh message on whichever cid sent it, same as today.
async fn run(app: Arc<App>, transport: Arc<UsbHidTransport>) -> ! {
    loop {
        tokio::task::yield_now().await;

        let command = match hid::receive(transport.as_ref()) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(ReceiveError::Abort(e)) => {
                log::error!(
                    "received abort command for cid [{:08x}] with nonce [{:02x?}]",
                    e.cid,
                    e.nonce
                );
                continue;
            }
            Err(ReceiveError::Ctap(e)) => {
                log::error!("unable to receive message from HID due to: {e}");
                continue;
            }
        };

        log::debug!(
            "received command [{:#04x}] for cid [{:08x}] with payload length {}",
            command.cmd,
            command.cid,
            command.payload.len()
        );

        let app = app.clone();
        let transport = transport.clone();
        tokio::spawn(async move {
            ctaphid::process(command.cid, command.cmd, &command.payload, &app, transport.as_ref())
                .await;
        });
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    log::info!("Starting authenticator...");

    let transport = Arc::new(
        UsbHidTransport::open().map_err(|e| anyhow::anyhow!("failed to open HID device: {e}"))?,
    );

    let app = Arc::new(
        App::new(
            Arc::new(HostCrypto),
            Arc::new(FileStore::for_application()),
            Arc::new(NullUserInterface),
            Config::default(),
        )
        .await,
    );

    app.ui.wink(3).await;
    log::info!("Device is ready");

    run(app, transport).await;
}
