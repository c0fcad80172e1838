//! User interface adapter: presence confirmation and the wink signal
//! (spec.md §4.3, §4.8).
//!
//! Grounded on `circuitkey/ui.py`'s `UI` class. The real implementation
//! there drives a button and an LED; this core treats both as an external
//! collaborator behind a trait (Design Notes §9), with a `NullUserInterface`
//! that always confirms immediately, matching `circuitkey/ui_test.py`'s use
//! of a fake button.

use std::time::Duration;

use crate::error::UiError;

#[async_trait::async_trait]
pub trait UserInterface: Send + Sync {
    /// Blocks (cooperatively) until the user confirms presence or
    /// `timeout` elapses.
    async fn verify_user_presence(&self, timeout: Duration) -> Result<(), UiError>;

    /// Blinks the indicator `times` times; best-effort, no return value.
    async fn wink(&self, times: u32);
}

/// Confirms presence immediately, used where no physical button exists
/// (tests, and any build without the UI hardware wired up).
pub struct NullUserInterface;

#[async_trait::async_trait]
impl UserInterface for NullUserInterface {
    async fn verify_user_presence(&self, _timeout: Duration) -> Result<(), UiError> {
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn wink(&self, _times: u32) {
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_ui_confirms_presence_immediately() {
        let ui = NullUserInterface;
        ui.verify_user_presence(Duration::from_secs(30)).await.unwrap();
    }

    #[tokio::test]
    async fn null_ui_wink_completes() {
        let ui = NullUserInterface;
        ui.wink(3).await;
    }
}
