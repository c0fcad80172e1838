pub mod app;
pub mod cbor;
pub mod channel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod hid;
pub mod info;
pub mod pin;
pub mod schema;
pub mod store;
pub mod ui;
pub mod usb;

pub mod ctaphid;
