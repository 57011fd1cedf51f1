use async_trait::async_trait;
use reqwest::{Certificate, Client, ClientBuilder};
use serde::Serialize;

use super::RemoteDispatcher;
use super::interfaces::{CommandsPayload, ProcessesPayload};
use crate::auth::AuthContext;
use crate::collector::CommandRecord;
use crate::config::RemoteConfig;
use crate::prelude::*;
use crate::process::ProcessSnapshot;

const USER_AGENT: &str = concat!("lda/", env!("CARGO_PKG_VERSION"));
const PROCESSES_ROUTE: &str = "v1/processes";
const COMMANDS_ROUTE: &str = "v1/commands";

/// Sends batches as JSON over HTTP(S), one request per batch.
pub struct HttpDispatcher {
    client: Client,
    base_url: String,
}

fn base_url(server_address: &str, secure: bool) -> String {
    let server_address = server_address.trim_end_matches('/');
    if server_address.contains("://") {
        server_address.to_string()
    } else {
        let scheme = if secure { "https" } else { "http" };
        format!("{scheme}://{server_address}")
    }
}

impl HttpDispatcher {
    pub fn new(remote: &RemoteConfig) -> Result<Self> {
        let server_address = remote
            .server_address
            .as_deref()
            .filter(|address| !address.is_empty())
            .context("Remote collection is enabled but remote.server-address is not set")?;

        let mut builder = ClientBuilder::new()
            .user_agent(USER_AGENT)
            .timeout(remote.timeout());
        if let Some(cert_file) = remote.cert_file() {
            let pem = std::fs::read(&cert_file).with_context(|| {
                format!("Failed to read certificate at {}", cert_file.display())
            })?;
            let certificate = Certificate::from_pem(&pem).with_context(|| {
                format!("Invalid PEM certificate at {}", cert_file.display())
            })?;
            builder = builder.add_root_certificate(certificate);
        }

        let base_url = base_url(server_address, remote.secure_connection);
        debug!("Remote collection enabled, sending to {base_url}");
        Ok(Self {
            client: builder.build().context("Failed to build the HTTP client")?,
            base_url,
        })
    }

    async fn post<T: Serialize + Sync>(&self, route: &str, payload: &T) -> Result<()> {
        let url = format!("{}/{route}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!("Remote collector answered {status} on {url}: {error_text}");
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteDispatcher for HttpDispatcher {
    async fn send_processes(
        &self,
        batch: &[ProcessSnapshot],
        auth: Option<&AuthContext>,
    ) -> Result<()> {
        self.post(
            PROCESSES_ROUTE,
            &ProcessesPayload {
                processes: batch,
                auth,
            },
        )
        .await?;
        trace!("Sent {} processes", batch.len());
        Ok(())
    }

    async fn send_commands(
        &self,
        batch: &[CommandRecord],
        auth: Option<&AuthContext>,
    ) -> Result<()> {
        self.post(
            COMMANDS_ROUTE,
            &CommandsPayload {
                commands: batch,
                auth,
            },
        )
        .await?;
        trace!("Sent {} commands", batch.len());
        Ok(())
    }
}
