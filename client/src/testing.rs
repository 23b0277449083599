//! In-process stand-in for the camera firmware's CGI endpoints.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use dashlink_common::config::Config;
use dashlink_common::model::CameraAddress;

const ACCEPTED: &str = "0\nOK";
const REJECTED: &str = "-1\nERR";

/// Replies the fake firmware gives; tests tweak them through [`FakeCamera::with`].
#[derive(Debug)]
pub struct FirmwareState {
    pub handshake_reply: String,
    pub recording: bool,
    pub sd_reply: String,
    pub preview_reply: String,
    pub file_list_xml: String,
    pub storage_reply: String,
    pub format_reply: String,
    pub heartbeat_status: u16,
    /// Queries containing one of these get a rejection body.
    pub reject: Vec<String>,
    /// Queries containing one of these get HTTP 500.
    pub fail: Vec<String>,
    /// Applied before every reply.
    pub delay: Duration,
    /// Raw query strings in arrival order.
    pub requests: Vec<String>,
}

impl Default for FirmwareState {
    fn default() -> Self {
        Self {
            handshake_reply: ACCEPTED.to_string(),
            recording: false,
            sd_reply: "Camera.Menu.SD0=NORMAL".to_string(),
            preview_reply: "Camera.Preview.RTSP.av=1".to_string(),
            file_list_xml: "<LIST><ALLFile></ALLFile></LIST>".to_string(),
            storage_reply: "SDCard.Capacity.Total=30436\nSDCard.Capacity.Free=10000".to_string(),
            format_reply: "<Function><Status>0</Status></Function>".to_string(),
            heartbeat_status: 200,
            reject: Vec::new(),
            fail: Vec::new(),
            delay: Duration::ZERO,
            requests: Vec::new(),
        }
    }
}

type Shared = Arc<Mutex<FirmwareState>>;

pub struct FakeCamera {
    address: CameraAddress,
    state: Shared,
    server: JoinHandle<()>,
}

impl FakeCamera {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(FirmwareState::default()));
        let app = Router::new()
            .route("/cgi-bin/Config.cgi", get(config_cgi))
            .route("/cgi-bin/ipc", get(ipc))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            address: CameraAddress::new(addr.to_string()),
            state,
            server,
        }
    }

    pub fn address(&self) -> CameraAddress {
        self.address.clone()
    }

    pub fn with(&self, f: impl FnOnce(&mut FirmwareState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn recording(&self) -> bool {
        self.state.lock().unwrap().recording
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Requests whose query contains `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|q| q.contains(needle))
            .count()
    }
}

impl Drop for FakeCamera {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Fast timings and a fixed camera address for driving a [`FakeCamera`].
pub fn test_config() -> Config {
    Config {
        request_timeout_ms: 1000,
        handshake_delay_ms: 10,
        heartbeat_interval_secs: 30,
        status_poll_interval_secs: 1,
        command_settle_ms: 3000,
        ..Config::default()
    }
}

/// Log the query, wait out the configured delay, and report whether a
/// `fail` or `reject` rule matches.
async fn receive(state: &Shared, query: &str) -> Option<(StatusCode, String)> {
    let delay = {
        let mut fw = state.lock().unwrap();
        fw.requests.push(query.to_string());
        fw.delay
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let fw = state.lock().unwrap();
    if fw.fail.iter().any(|n| query.contains(n.as_str())) {
        return Some((StatusCode::INTERNAL_SERVER_ERROR, String::new()));
    }
    if fw.reject.iter().any(|n| query.contains(n.as_str())) {
        return Some((StatusCode::OK, REJECTED.to_string()));
    }
    None
}

async fn config_cgi(
    State(state): State<Shared>,
    RawQuery(query): RawQuery,
) -> (StatusCode, String) {
    let query = query.unwrap_or_default();
    if let Some(reply) = receive(&state, &query).await {
        return reply;
    }

    let mut fw = state.lock().unwrap();
    let body = if query.contains("property=hbt") {
        let status = StatusCode::from_u16(fw.heartbeat_status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, String::new());
    } else if query.contains("property=Net&value=connect")
        || query.contains("property=MovieLive")
        || query.contains("action=play&property=Live")
    {
        fw.handshake_reply.clone()
    } else if query.contains("property=Video&value=record") {
        fw.recording = !fw.recording;
        ACCEPTED.to_string()
    } else if query.contains("status.record") {
        let mode = if fw.recording { "Recording" } else { "Standby" };
        format!("Camera.Preview.MJPEG.status.record={mode}")
    } else if query.contains("Camera.Menu.SD0") {
        fw.sd_reply.clone()
    } else if query.contains("Camera.Preview.RTSP.av") {
        fw.preview_reply.clone()
    } else if query.contains("action=dir") {
        fw.file_list_xml.clone()
    } else if query.contains("SDCard.Capacity") {
        fw.storage_reply.clone()
    } else {
        ACCEPTED.to_string()
    };
    (StatusCode::OK, body)
}

async fn ipc(State(state): State<Shared>, RawQuery(query): RawQuery) -> (StatusCode, String) {
    let query = query.unwrap_or_default();
    if let Some(reply) = receive(&state, &query).await {
        return reply;
    }
    let fw = state.lock().unwrap();
    (StatusCode::OK, fw.format_reply.clone())
}
