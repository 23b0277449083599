//! HTTP GET transport to the camera's CGI endpoints.

use std::time::Duration;

use dashlink_common::model::CameraAddress;
use tracing::debug;

use crate::error::CameraError;

const CONFIG_CGI: &str = "/cgi-bin/Config.cgi";
const IPC_CGI: &str = "/cgi-bin/ipc";

/// What the caller wants back from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// The trimmed response body; a non-2xx status is an error.
    Body,
    /// Only the HTTP status code, whatever it is.
    StatusCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Body(String),
    Status(u16),
}

/// Build the shared HTTP client with the same connect and read timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, CameraError> {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
        .map_err(CameraError::Client)
}

/// Requests against one camera address.
///
/// Cloning is cheap and clones share the connection pool; no state is
/// mutated per request, so concurrent requests are fine.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    address: CameraAddress,
}

impl Transport {
    pub fn new(client: reqwest::Client, address: CameraAddress) -> Self {
        Self { client, address }
    }

    pub fn address(&self) -> &CameraAddress {
        &self.address
    }

    /// `http://<addr>/cgi-bin/Config.cgi?<query>`
    pub fn config_url(&self, query: &str) -> String {
        self.address.http_url(&format!("{CONFIG_CGI}?{query}"))
    }

    pub async fn send(&self, query: &str, expect: Expect) -> Result<Reply, CameraError> {
        let url = self.config_url(query);
        match expect {
            Expect::Body => self.get_body(url).await.map(Reply::Body),
            Expect::StatusCode => self.get_status(url).await.map(Reply::Status),
        }
    }

    /// Trimmed body of a `Config.cgi` request.
    pub async fn text(&self, query: &str) -> Result<String, CameraError> {
        match self.send(query, Expect::Body).await? {
            Reply::Body(body) => Ok(body),
            Reply::Status(code) => Err(CameraError::Status(code)),
        }
    }

    /// Run a numbered command on the `ipc` endpoint and return its body.
    pub async fn exec(&self, command: u32) -> Result<String, CameraError> {
        let url = self
            .address
            .http_url(&format!("{IPC_CGI}?-function=exec&-command={command}"));
        self.get_body(url).await
    }

    async fn get_status(&self, url: String) -> Result<u16, CameraError> {
        debug!("GET {url} (status only)");
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().as_u16()),
            Err(source) => Err(CameraError::Network { url, source }),
        }
    }

    async fn get_body(&self, url: String) -> Result<String, CameraError> {
        debug!("GET {url}");
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(source) => return Err(CameraError::Network { url, source }),
        };

        let status = resp.status();
        if !status.is_success() {
            debug!("GET {url} returned {status}");
            return Err(CameraError::Status(status.as_u16()));
        }

        match resp.text().await {
            Ok(body) => Ok(body.trim().to_string()),
            Err(source) => Err(CameraError::Network { url, source }),
        }
    }
}
