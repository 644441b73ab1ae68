//! Client facade
//!
//! [`LidarClient`] owns one background acquisition worker and exposes the
//! latest measurement as points or as a rendered image. Reads never touch
//! the network: they clone the current snapshot out of the cache and return
//! immediately, [`ClientError::NoData`] if nothing has arrived yet.
//!
//! # Example
//! ```no_run
//! use lidar_link::client::LidarClient;
//! use lidar_link::config::EndpointConfig;
//! use std::time::Duration;
//!
//! # async fn demo() -> lidar_link::error::AppResult<()> {
//! let client = LidarClient::connect(EndpointConfig::new("192.168.1.20", 3000)).await?;
//! let measurement = client.wait_for_measurement(Duration::from_secs(5)).await?;
//! println!("{} points", measurement.points.len());
//!
//! let image = client.latest_image(640, 480)?;
//! image.save("frame.png").ok();
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Dropping a client without calling [`close`](LidarClient::close) still
//! stops the worker: the shutdown sender is dropped with it, which the loop
//! treats as a stop signal.

use crate::acquisition::{AcquisitionLoop, AcquisitionStats, ClientState, SharedStatus};
use crate::cache::SnapshotCache;
use crate::config::{EndpointConfig, RasterConfig};
use crate::error::{AppResult, ClientError, ConnError};
use crate::point::{Measurement, PointSet};
use crate::raster::{rasterize, RasterStyle};
use crate::transport::{HttpTransport, Transport};
use image::RgbaImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

struct Worker {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), ConnError>>,
}

/// Handle to one device.
pub struct LidarClient {
    config: EndpointConfig,
    raster: RasterConfig,
    cache: SnapshotCache,
    status: Arc<SharedStatus>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for LidarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LidarClient")
            .field("endpoint", &self.config.endpoint())
            .field("mode", &self.config.mode)
            .field("state", &self.status.state())
            .finish()
    }
}

impl LidarClient {
    /// Probe the device and start acquisition.
    ///
    /// # Errors
    /// [`ClientError::Configuration`] for an invalid endpoint,
    /// [`ClientError::Construction`] if the device does not answer the
    /// liveness probe. No worker is started in either case.
    pub async fn connect(config: EndpointConfig) -> AppResult<Self> {
        Self::connect_with_raster(config, RasterConfig::default()).await
    }

    /// Like [`connect`](Self::connect), with image settings for
    /// [`latest_frame`](Self::latest_frame).
    pub async fn connect_with_raster(config: EndpointConfig, raster: RasterConfig) -> AppResult<Self> {
        config.validate()?;
        let transport = HttpTransport::new(config.clone()).map_err(|source| {
            ClientError::Construction {
                endpoint: config.endpoint(),
                source,
            }
        })?;
        Self::with_transport(config, raster, transport).await
    }

    /// Start acquisition over a caller-supplied transport.
    pub async fn with_transport<T>(config: EndpointConfig, raster: RasterConfig, transport: T) -> AppResult<Self>
    where
        T: Transport + 'static,
    {
        let cache = SnapshotCache::new();
        let status = Arc::new(SharedStatus::default());

        let acquisition = AcquisitionLoop::admit(transport, &config, cache.clone(), status.clone())
            .await
            .map_err(|source| ClientError::Construction {
                endpoint: config.endpoint(),
                source,
            })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(acquisition.run(shutdown_rx));

        Ok(Self {
            config,
            raster,
            cache,
            status,
            worker: Mutex::new(Some(Worker { shutdown_tx, handle })),
        })
    }

    /// Endpoint this client was built for.
    pub fn endpoint(&self) -> &EndpointConfig {
        &self.config
    }

    /// Image settings used by [`latest_frame`](Self::latest_frame).
    pub fn raster_config(&self) -> &RasterConfig {
        &self.raster
    }

    /// Most recent measurement.
    pub fn latest_measurement(&self) -> AppResult<Measurement> {
        if self.status.state() == ClientState::Closed {
            return Err(ClientError::NoData);
        }
        self.cache.latest().ok_or(ClientError::NoData)
    }

    /// Points of the most recent measurement. The set is shared, not copied.
    pub fn latest_point_cloud(&self) -> AppResult<PointSet> {
        self.latest_measurement().map(|m| m.points)
    }

    /// Most recent measurement rendered at `width × height`.
    pub fn latest_image(&self, width: u32, height: u32) -> AppResult<RgbaImage> {
        let style = RasterStyle::from(&self.raster);
        self.latest_image_with(width, height, &style)
    }

    /// Most recent measurement rendered with an explicit style.
    pub fn latest_image_with(&self, width: u32, height: u32, style: &RasterStyle) -> AppResult<RgbaImage> {
        let points = self.latest_point_cloud()?;
        Ok(rasterize(&points, width, height, style))
    }

    /// Most recent measurement rendered at the configured size.
    pub fn latest_frame(&self) -> AppResult<RgbaImage> {
        self.latest_image(self.raster.width, self.raster.height)
    }

    /// Wait up to `timeout` for a measurement to be available.
    ///
    /// Returns at once if one already is. [`ClientError::NoData`] on timeout,
    /// or as soon as the client is closed, including while waiting.
    pub async fn wait_for_measurement(&self, timeout: Duration) -> AppResult<Measurement> {
        if self.status.state() == ClientState::Closed {
            return Err(ClientError::NoData);
        }

        let mut rx = self.cache.subscribe();
        // close() marks the client closed before clearing the cache, so the
        // clear wakes waiters into the closed check
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|m| m.is_some() || self.status.state() == ClientState::Closed)
                .await
                .map(|m| (*m).clone())
        })
        .await;

        match waited {
            Ok(Ok(Some(measurement))) => Ok(measurement),
            _ => Err(ClientError::NoData),
        }
    }

    /// Counters since the client was constructed.
    pub fn stats(&self) -> AcquisitionStats {
        self.status.snapshot()
    }

    /// True until [`close`](Self::close) has run.
    pub fn is_open(&self) -> bool {
        self.status.state() != ClientState::Closed
    }

    /// Stop the worker, release the connection and drop the cached
    /// measurement.
    ///
    /// Returns once the worker has exited; no device I/O happens afterwards.
    /// Calling it again is a no-op.
    ///
    /// # Errors
    /// [`ClientError::Shutdown`] if the worker panicked or the transport
    /// reported an error while closing. The client is closed either way.
    pub async fn close(&self) -> AppResult<()> {
        let mut guard = self.worker.lock().await;
        let Some(worker) = guard.take() else {
            return Ok(());
        };

        // receiver may already be gone if the worker died
        let _ = worker.shutdown_tx.send(());
        let joined = worker.handle.await;

        self.status.set_state(ClientState::Closed);
        self.cache.clear();
        tracing::info!(endpoint = %self.config.endpoint(), "client closed");

        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(ClientError::Shutdown(err.to_string())),
            Err(join_err) => Err(ClientError::Shutdown(format!(
                "acquisition worker failed: {}",
                join_err
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RawPayload;
    use async_trait::async_trait;

    /// Serves the same payload forever.
    struct Repeating {
        payload: &'static str,
        probe_ok: bool,
        fail_close: bool,
    }

    #[async_trait]
    impl Transport for Repeating {
        async fn probe(&mut self) -> Result<(), ConnError> {
            if self.probe_ok {
                Ok(())
            } else {
                Err(ConnError::BadStatus(503))
            }
        }

        async fn fetch_one(&mut self) -> Result<RawPayload, ConnError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(RawPayload(self.payload.to_string()))
        }

        async fn reconnect(&mut self) -> Result<(), ConnError> {
            Ok(())
        }

        fn reset(&mut self) {}

        async fn close(&mut self) -> Result<(), ConnError> {
            if self.fail_close {
                Err(ConnError::Protocol("close refused".into()))
            } else {
                Ok(())
            }
        }
    }

    fn repeating(payload: &'static str) -> Repeating {
        Repeating {
            payload,
            probe_ok: true,
            fail_close: false,
        }
    }

    async fn client(transport: Repeating) -> AppResult<LidarClient> {
        LidarClient::with_transport(
            EndpointConfig::new("device.test", 3000),
            RasterConfig {
                width: 16,
                height: 12,
                ..Default::default()
            },
            transport,
        )
        .await
    }

    #[tokio::test]
    async fn probe_failure_is_a_construction_error() {
        let err = client(Repeating {
            probe_ok: false,
            ..repeating("[]")
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Construction {
                source: ConnError::BadStatus(503),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn invalid_endpoint_is_rejected_before_io() {
        let err = LidarClient::connect(EndpointConfig::new("", 3000)).await.unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[tokio::test]
    async fn readers_see_published_points_and_images() {
        let client = client(repeating("[(1, 1, 0), (-1, -1, 0, 9, 9, 9)]")).await.unwrap();
        let measurement = client.wait_for_measurement(Duration::from_secs(2)).await.unwrap();
        assert_eq!(measurement.points.len(), 2);

        let points = client.latest_point_cloud().unwrap();
        assert_eq!(points[1].x, -1.0);

        let frame = client.latest_frame().unwrap();
        assert_eq!(frame.dimensions(), (16, 12));
        let image = client.latest_image(4, 4).unwrap();
        assert_eq!(image.dimensions(), (4, 4));

        assert!(client.stats().published >= 1);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn undecodable_feed_never_publishes() {
        let client = client(repeating("garbage")).await.unwrap();
        let err = client.wait_for_measurement(Duration::from_millis(100)).await.unwrap_err();
        assert!(err.is_no_data());
        assert!(client.latest_point_cloud().unwrap_err().is_no_data());
        assert!(client.latest_image(8, 8).unwrap_err().is_no_data());
        assert!(client.stats().decode_failures >= 1);
        assert!(client.is_open());
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_clears_data() {
        let client = client(repeating("[(1, 2, 3)]")).await.unwrap();
        client.wait_for_measurement(Duration::from_secs(2)).await.unwrap();

        client.close().await.unwrap();
        assert!(!client.is_open());
        assert!(client.latest_measurement().unwrap_err().is_no_data());

        tokio::time::timeout(Duration::from_millis(100), client.close())
            .await
            .expect("second close blocked")
            .unwrap();
        assert!(client
            .wait_for_measurement(Duration::from_secs(1))
            .await
            .unwrap_err()
            .is_no_data());
    }

    /// Always ready: never suspends inside `fetch_one`.
    struct AlwaysReady;

    #[async_trait]
    impl Transport for AlwaysReady {
        async fn probe(&mut self) -> Result<(), ConnError> {
            Ok(())
        }

        async fn fetch_one(&mut self) -> Result<RawPayload, ConnError> {
            Ok(RawPayload("[(1, 2, 3)]".to_string()))
        }

        async fn reconnect(&mut self) -> Result<(), ConnError> {
            Ok(())
        }

        fn reset(&mut self) {}

        async fn close(&mut self) -> Result<(), ConnError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn ready_transport_does_not_starve_readers_or_close() {
        let client = LidarClient::with_transport(
            EndpointConfig::new("device.test", 3000),
            RasterConfig::default(),
            AlwaysReady,
        )
        .await
        .unwrap();

        let measurement = tokio::time::timeout(
            Duration::from_secs(2),
            client.wait_for_measurement(Duration::from_millis(500)),
        )
        .await
        .expect("reader starved by the worker")
        .unwrap();
        assert_eq!(measurement.points[0].z, 3.0);

        tokio::time::timeout(Duration::from_secs(2), client.close())
            .await
            .expect("close starved by the worker")
            .unwrap();
    }

    #[tokio::test]
    async fn close_wakes_pending_waiters() {
        let client = Arc::new(client(repeating("garbage")).await.unwrap());

        let waiter = {
            let client = client.clone();
            tokio::spawn(async move {
                let started = std::time::Instant::now();
                let result = client.wait_for_measurement(Duration::from_secs(3)).await;
                (result, started.elapsed())
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        client.close().await.unwrap();

        let (result, waited) = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter outlived close")
            .unwrap();
        assert!(result.unwrap_err().is_no_data());
        assert!(waited < Duration::from_secs(1), "waited {waited:?}");
    }

    #[tokio::test]
    async fn close_reports_transport_errors_but_still_closes() {
        let client = client(Repeating {
            fail_close: true,
            ..repeating("[(1, 2, 3)]")
        })
        .await
        .unwrap();

        let err = client.close().await.unwrap_err();
        assert!(matches!(err, ClientError::Shutdown(_)));
        assert!(!client.is_open());
        client.close().await.unwrap();
    }
}
