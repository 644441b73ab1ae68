//! Background acquisition loop
//!
//! One worker task per client drives the transport through a small state
//! machine and publishes every decoded payload into the [`SnapshotCache`]:
//!
//! ```text
//! Probing ──ok──▶ Fetching ◀──────────────┐
//!    │              │  payload ok/bad       │ reconnect ok
//!    │ fail         │  → stay               │
//!    ▼              │  timeout / conn error │
//! (construction     ▼                       │
//!  error)        Backoff ──────────────────┘
//!                   │ reconnect fails → stay
//!      shutdown from any state ──▶ Stopped
//! ```
//!
//! Probing only happens once, as the admission gate in [`AcquisitionLoop::admit`];
//! a client that fails it never gets a worker, so the running loop only knows
//! the states after it. Every fetch is bounded by the endpoint's read timeout,
//! and every await in the loop is raced against the shutdown signal, so
//! stopping never waits on the device. Each iteration yields to the runtime
//! first: a transport that is always ready must not starve the shutdown
//! signal or the timers. Decode failures are counted and the payload is
//! dropped; the connection is left alone.
//!
//! The loop is the only writer of the cache and of [`SharedStatus`]; readers
//! only ever see snapshots.

use crate::cache::SnapshotCache;
use crate::config::EndpointConfig;
use crate::decoder::decode;
use crate::error::ConnError;
use crate::point::Measurement;
use crate::transport::Transport;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Worker position in the acquisition state machine, after admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopState {
    /// Connected; fetching payloads
    Fetching,
    /// Lost the device; retrying
    Backoff,
    /// Worker exited
    Stopped,
}

/// Coarse client lifecycle derived from the loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClientState {
    Initializing,
    Connected,
    Reconnecting,
    Closed,
}

impl From<LoopState> for ClientState {
    fn from(state: LoopState) -> Self {
        match state {
            LoopState::Fetching => ClientState::Connected,
            LoopState::Backoff => ClientState::Reconnecting,
            LoopState::Stopped => ClientState::Closed,
        }
    }
}

impl ClientState {
    fn as_u8(self) -> u8 {
        match self {
            ClientState::Initializing => 0,
            ClientState::Connected => 1,
            ClientState::Reconnecting => 2,
            ClientState::Closed => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ClientState::Initializing,
            1 => ClientState::Connected,
            2 => ClientState::Reconnecting,
            _ => ClientState::Closed,
        }
    }
}

/// Point-in-time copy of the acquisition counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AcquisitionStats {
    /// Measurements published to the cache
    pub published: u64,
    /// Payloads discarded because they did not decode
    pub decode_failures: u64,
    /// Fetches that failed at the transport layer
    pub fetch_failures: u64,
    /// Fetches that exceeded the read timeout
    pub timeouts: u64,
    /// Transitions from `Fetching` into `Backoff`
    pub backoffs: u64,
    /// Successful reconnects out of `Backoff`
    pub reconnects: u64,
}

/// State and counters shared between the worker (writer) and the client.
#[derive(Debug)]
pub(crate) struct SharedStatus {
    state: AtomicU8,
    published: AtomicU64,
    decode_failures: AtomicU64,
    fetch_failures: AtomicU64,
    timeouts: AtomicU64,
    backoffs: AtomicU64,
    reconnects: AtomicU64,
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(ClientState::Initializing.as_u8()),
            published: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            backoffs: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }
}

impl SharedStatus {
    pub(crate) fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ClientState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub(crate) fn snapshot(&self) -> AcquisitionStats {
        AcquisitionStats {
            published: self.published.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            backoffs: self.backoffs.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Worker that owns the transport for its whole life.
pub(crate) struct AcquisitionLoop<T: Transport> {
    transport: T,
    cache: SnapshotCache,
    status: Arc<SharedStatus>,
    endpoint: String,
    read_timeout: Duration,
    reconnect_delay: Duration,
}

impl<T: Transport> std::fmt::Debug for AcquisitionLoop<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionLoop")
            .field("endpoint", &self.endpoint)
            .field("read_timeout", &self.read_timeout)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

impl<T: Transport> AcquisitionLoop<T> {
    /// Run the admission probe; on success the loop is ready to [`run`](Self::run).
    pub(crate) async fn admit(
        mut transport: T,
        config: &EndpointConfig,
        cache: SnapshotCache,
        status: Arc<SharedStatus>,
    ) -> Result<Self, ConnError> {
        status.set_state(ClientState::Initializing);

        let probe = match tokio::time::timeout(config.read_timeout(), transport.probe()).await {
            Ok(result) => result,
            Err(_) => Err(ConnError::Unreachable {
                url: config.health_url(),
                message: format!("probe timed out after {} ms", config.read_timeout_ms),
            }),
        };
        if let Err(err) = probe {
            warn!(endpoint = %config.endpoint(), error = %err, "admission probe failed");
            if let Err(close_err) = transport.close().await {
                debug!(endpoint = %config.endpoint(), error = %close_err, "close after failed probe");
            }
            status.set_state(LoopState::Stopped.into());
            return Err(err);
        }

        info!(endpoint = %config.endpoint(), mode = ?config.mode, "device reachable");
        status.set_state(LoopState::Fetching.into());

        Ok(Self {
            transport,
            cache,
            status,
            endpoint: config.endpoint(),
            read_timeout: config.read_timeout(),
            reconnect_delay: config.reconnect_delay(),
        })
    }

    /// Drive the state machine until `shutdown_rx` fires or its sender is
    /// dropped, then release the transport.
    pub(crate) async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) -> Result<(), ConnError> {
        let mut state = LoopState::Fetching;

        loop {
            tokio::task::yield_now().await;
            state = match state {
                LoopState::Fetching => self.fetch_step(&mut shutdown_rx).await,
                LoopState::Backoff => self.backoff_step(&mut shutdown_rx).await,
                LoopState::Stopped => break,
            };
            self.status.set_state(state.into());
        }

        debug!(endpoint = %self.endpoint, "acquisition loop stopped");
        let closed = self.transport.close().await;
        self.status.set_state(ClientState::Closed);
        closed
    }

    async fn fetch_step(&mut self, shutdown_rx: &mut oneshot::Receiver<()>) -> LoopState {
        let outcome = tokio::select! {
            biased;
            _ = &mut *shutdown_rx => return LoopState::Stopped,
            result = tokio::time::timeout(self.read_timeout, self.transport.fetch_one()) => result,
        };

        match outcome {
            Ok(Ok(payload)) => {
                match decode(payload.as_str()) {
                    Ok(points) => {
                        debug!(endpoint = %self.endpoint, points = points.len(), "measurement published");
                        self.cache.publish(Measurement::now(points));
                        SharedStatus::bump(&self.status.published);
                    }
                    Err(err) => {
                        debug!(endpoint = %self.endpoint, error = %err, "payload discarded");
                        SharedStatus::bump(&self.status.decode_failures);
                    }
                }
                LoopState::Fetching
            }
            Ok(Err(err)) => {
                warn!(endpoint = %self.endpoint, error = %err, "fetch failed");
                SharedStatus::bump(&self.status.fetch_failures);
                self.enter_backoff()
            }
            Err(_) => {
                warn!(
                    endpoint = %self.endpoint,
                    timeout_ms = self.read_timeout.as_millis() as u64,
                    "fetch timed out"
                );
                SharedStatus::bump(&self.status.timeouts);
                self.enter_backoff()
            }
        }
    }

    fn enter_backoff(&mut self) -> LoopState {
        // the dropped fetch may have left a half-read response behind
        self.transport.reset();
        SharedStatus::bump(&self.status.backoffs);
        LoopState::Backoff
    }

    async fn backoff_step(&mut self, shutdown_rx: &mut oneshot::Receiver<()>) -> LoopState {
        if !self.reconnect_delay.is_zero() {
            tokio::select! {
                biased;
                _ = &mut *shutdown_rx => return LoopState::Stopped,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = &mut *shutdown_rx => return LoopState::Stopped,
            result = tokio::time::timeout(self.read_timeout, self.transport.reconnect()) => result,
        };

        match outcome {
            Ok(Ok(())) => {
                info!(endpoint = %self.endpoint, "reconnected");
                SharedStatus::bump(&self.status.reconnects);
                LoopState::Fetching
            }
            Ok(Err(err)) => {
                debug!(endpoint = %self.endpoint, error = %err, "reconnect failed");
                LoopState::Backoff
            }
            Err(_) => {
                debug!(endpoint = %self.endpoint, "reconnect timed out");
                self.transport.reset();
                LoopState::Backoff
            }
        }
    }
}
