//! Simulated device for integration tests
//!
//! A `TcpListener` that speaks just enough HTTP/1.1 to stand in for the phone
//! app:
//!
//! - `GET /hello` answers with a scriptable status
//! - `GET /measurement` answers with the current payload, JSON-wrapped or raw
//! - `GET /measurementStream` writes the current payload as one line per
//!   frame until the client hangs up or the stream is dropped
//!
//! While stalled, the device accepts connections and reads requests but
//! writes nothing, on every path, including open streams.

#![allow(dead_code)]

use lidar_link::config::{AcquisitionMode, EndpointConfig};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Read timeout used by endpoints built for the simulated device.
pub const TEST_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Pause between frames served by the device.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(10);

struct DeviceState {
    hello_status: AtomicU16,
    payload: Mutex<String>,
    envelope: AtomicBool,
    stalled: AtomicBool,
    stream_generation: AtomicU64,
    hello_hits: AtomicUsize,
    measurement_hits: AtomicUsize,
    stream_opens: AtomicUsize,
}

impl DeviceState {
    fn body(&self) -> String {
        let payload = self
            .payload
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default();
        if self.envelope.load(Ordering::SeqCst) {
            serde_json::json!({ "poclo": payload }).to_string()
        } else {
            payload
        }
    }

    async fn wait_while_stalled(&self) {
        while self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Fake phone app bound to an ephemeral localhost port.
pub struct SimulatedDevice {
    addr: SocketAddr,
    state: Arc<DeviceState>,
    task: JoinHandle<()>,
}

impl SimulatedDevice {
    /// Healthy device serving `payload`, JSON-wrapped.
    pub async fn start(payload: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind simulated device");
        let addr = listener.local_addr().expect("local addr");

        let state = Arc::new(DeviceState {
            hello_status: AtomicU16::new(200),
            payload: Mutex::new(payload.to_string()),
            envelope: AtomicBool::new(true),
            stalled: AtomicBool::new(false),
            stream_generation: AtomicU64::new(0),
            hello_hits: AtomicUsize::new(0),
            measurement_hits: AtomicUsize::new(0),
            stream_opens: AtomicUsize::new(0),
        });

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(handle_connection(socket, accept_state.clone()));
            }
        });

        Self { addr, state, task }
    }

    /// Endpoint pointing at this device, with a short read timeout.
    pub fn endpoint(&self, mode: AcquisitionMode) -> EndpointConfig {
        EndpointConfig::new(self.addr.ip().to_string(), self.addr.port())
            .with_mode(mode)
            .with_read_timeout(TEST_READ_TIMEOUT)
    }

    /// Replace the payload served from now on.
    pub fn set_payload(&self, payload: &str) {
        if let Ok(mut p) = self.state.payload.lock() {
            *p = payload.to_string();
        }
    }

    /// Serve payloads raw instead of JSON-wrapped.
    pub fn set_envelope(&self, enabled: bool) {
        self.state.envelope.store(enabled, Ordering::SeqCst);
    }

    /// Status returned by `/hello`.
    pub fn set_hello_status(&self, status: u16) {
        self.state.hello_status.store(status, Ordering::SeqCst);
    }

    /// Stop (or resume) writing anything on any connection.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.stalled.store(stalled, Ordering::SeqCst);
    }

    /// End every open measurement stream, as when the app is backgrounded.
    pub fn drop_streams(&self) {
        self.state.stream_generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of `/hello` requests answered.
    pub fn hello_hits(&self) -> usize {
        self.state.hello_hits.load(Ordering::SeqCst)
    }

    /// Number of `/measurement` requests answered.
    pub fn measurement_hits(&self) -> usize {
        self.state.measurement_hits.load(Ordering::SeqCst)
    }

    /// Number of `/measurementStream` responses started.
    pub fn stream_opens(&self) -> usize {
        self.state.stream_opens.load(Ordering::SeqCst)
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("local addr").port()
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

async fn handle_connection(mut socket: TcpStream, state: Arc<DeviceState>) {
    let Some(path) = read_request_path(&mut socket).await else {
        return;
    };

    state.wait_while_stalled().await;

    match path.as_str() {
        "/hello" => {
            state.hello_hits.fetch_add(1, Ordering::SeqCst);
            let status = state.hello_status.load(Ordering::SeqCst);
            respond(&mut socket, status, "hello!").await;
        }
        "/measurement" => {
            state.measurement_hits.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(FRAME_INTERVAL).await;
            let body = state.body();
            respond(&mut socket, 200, &body).await;
        }
        "/measurementStream" => {
            state.stream_opens.fetch_add(1, Ordering::SeqCst);
            serve_stream(socket, state).await;
        }
        _ => respond(&mut socket, 404, "not found").await,
    }
}

async fn read_request_path(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 || buf.len() > 16 * 1024 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&buf);
    let request_line = head.lines().next()?;
    let mut parts = request_line.split_whitespace();
    let _method = parts.next()?;
    parts.next().map(str::to_string)
}

async fn respond(socket: &mut TcpStream, status: u16, body: &str) {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Status",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

async fn serve_stream(mut socket: TcpStream, state: Arc<DeviceState>) {
    let header = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n";
    if socket.write_all(header.as_bytes()).await.is_err() {
        return;
    }

    let generation = state.stream_generation.load(Ordering::SeqCst);
    loop {
        if state.stream_generation.load(Ordering::SeqCst) != generation {
            break;
        }
        if state.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
            continue;
        }

        let line = format!("{}\n", state.body());
        if socket.write_all(line.as_bytes()).await.is_err() {
            return;
        }
        tokio::time::sleep(FRAME_INTERVAL).await;
    }
    let _ = socket.shutdown().await;
}
