//! consumer side of the bridge.
//!
//! [`ClientConnectionManager`] is what a ui embeds; [`ClientSettings`] is the
//! persisted, user-editable address of the bridge; [`test_connection`] backs a
//! "test" button in a settings dialog.

mod manager;
mod settings;

pub use manager::{ClientConnectionManager, ClientState, ClientStatus, TransportKind};
pub use settings::ClientSettings;

use std::time::Duration;

use crate::domain::PollResponse;
use crate::error::{Error, Result};

/// timeout for a one-off connection test
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// one request against the bridge's poll endpoint
pub async fn test_connection(settings: &ClientSettings) -> Result<PollResponse> {
    let client = reqwest::Client::new();
    fetch_weight(&client, &settings.poll_url(), TEST_TIMEOUT).await
}

pub(crate) async fn fetch_weight(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<PollResponse> {
    let request = async {
        let response = client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus(status));
        }
        Ok(response.json::<PollResponse>().await?)
    };
    tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| Error::Timeout(timeout))?
}
