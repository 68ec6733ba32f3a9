use std::time::Duration;

use anyhow::{bail, Context};
use climate_common::{ControlPatch, ControlState, API_CONTROL, API_DEVICE_CONTROL};
use reqwest::{Client, Response};

/// HTTP client for the controller's control endpoints, writing as the device.
#[derive(Debug, Clone)]
pub struct ControlClient {
    client: Client,
    control_url: String,
    device_url: String,
}

impl ControlClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = base_url.trim_end_matches('/');
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            bail!("controller url must start with http:// or https://, got {base_url}");
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            client,
            control_url: format!("{base_url}{API_CONTROL}"),
            device_url: format!("{base_url}{API_DEVICE_CONTROL}"),
        })
    }

    pub async fn fetch(&self) -> anyhow::Result<ControlState> {
        let response = self
            .client
            .get(&self.control_url)
            .send()
            .await
            .with_context(|| format!("controller not reachable at {}", self.control_url))?;
        decode(response).await
    }

    pub async fn push(&self, patch: &ControlPatch) -> anyhow::Result<ControlState> {
        let response = self
            .client
            .post(&self.device_url)
            .json(patch)
            .send()
            .await
            .with_context(|| format!("controller not reachable at {}", self.device_url))?;
        decode(response).await
    }
}

async fn decode(response: Response) -> anyhow::Result<ControlState> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("controller answered {status}: {body}");
    }
    response
        .json::<ControlState>()
        .await
        .context("failed to decode control state")
}
