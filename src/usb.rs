//! USB HID transport (spec.md §6 external interfaces). The HID stack
//! itself is out of scope — this is the thin byte pipe the core requires
//! from it: open the one FIDO-usage-page interface, hand it 64-byte
//! reports, poll for inbound ones. Grounded on the teacher's own
//! `hidapi`-based device enumeration in `native/src/device.rs` and
//! `native/src/transport.rs`, trimmed to the single interface this core
//! needs rather than the teacher's multi-device Feitian inventory.

use std::sync::Mutex;

use hidapi::{HidApi, HidDevice};

use crate::hid::HidTransport;
use crate::schema::REPORT_LEN;

const FIDO_USAGE_PAGE: u16 = 0xF1D0;
const FIDO_USAGE: u16 = 0x01;

#[derive(Debug, thiserror::Error)]
pub enum UsbError {
    #[error("failed to initialize HID API: {0}")]
    Init(hidapi::HidError),
    #[error("no FIDO HID interface found (usage page {FIDO_USAGE_PAGE:#06x}, usage {FIDO_USAGE:#06x})")]
    NoDevice,
    #[error("failed to open HID device: {0}")]
    Open(hidapi::HidError),
}

pub struct UsbHidTransport {
    // `hidapi::HidDevice` isn't Sync; the core hands this transport to
    // spawned tasks through an `Arc`, so every access goes through one lock.
    device: Mutex<HidDevice>,
}

impl UsbHidTransport {
    /// Opens the first connected interface advertising the FIDO usage page,
    /// matching `device.rs`'s enumerate-then-open pattern.
    pub fn open() -> Result<Self, UsbError> {
        let api = HidApi::new().map_err(UsbError::Init)?;

        let info = api
            .device_list()
            .find(|d| d.usage_page() == FIDO_USAGE_PAGE && d.usage() == FIDO_USAGE)
            .ok_or(UsbError::NoDevice)?;

        let device = info.open_device(&api).map_err(UsbError::Open)?;
        device.set_blocking_mode(false).map_err(UsbError::Open)?;

        Ok(Self {
            device: Mutex::new(device),
        })
    }
}

#[async_trait::async_trait]
impl HidTransport for UsbHidTransport {
    async fn send_report(&self, report: &[u8; REPORT_LEN]) {
        if let Err(e) = self.device.lock().unwrap().write(report) {
            log::error!("failed to write HID report: {e}");
        }
    }

    fn poll_report(&self) -> Option<Vec<u8>> {
        let mut buf = [0u8; REPORT_LEN];
        match self.device.lock().unwrap().read(&mut buf) {
            Ok(0) => None,
            Ok(n) => Some(buf[..n].to_vec()),
            Err(e) => {
                log::error!("failed to read HID report: {e}");
                None
            }
        }
    }
}
