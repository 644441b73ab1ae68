//! Camera-style interface for component registries
//!
//! Host frameworks that manage "cameras" expect a constructor that takes a
//! generic attribute map and hands back an object with `next` (an image),
//! `next_point_cloud` and `close`. [`LidarCameraFactory`] is that
//! constructor; [`LidarClient`] is the object.
//!
//! # Example
//! ```no_run
//! use lidar_link::camera::LidarCameraFactory;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let attributes: toml::Value = toml::from_str(
//!     r#"
//!     host = "192.168.1.20"
//!     port = 3000
//!
//!     [raster]
//!     width = 640
//!     height = 480
//!     "#,
//! )?;
//!
//! let factory = LidarCameraFactory;
//! factory.validate(&attributes)?;
//! let camera = factory.build(attributes).await?;
//! let frame = camera.next().await?;
//! camera.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::client::LidarClient;
use crate::config::{EndpointConfig, RasterConfig};
use crate::point::PointSet;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use image::RgbaImage;
use std::sync::Arc;

/// Capability of a device that yields point clouds and rendered frames.
#[async_trait]
pub trait PointCloudCamera: Send + Sync {
    /// Latest frame at the camera's configured size.
    async fn next(&self) -> Result<RgbaImage>;

    /// Latest point cloud.
    async fn next_point_cloud(&self) -> Result<PointSet>;

    /// Release the device. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl PointCloudCamera for LidarClient {
    async fn next(&self) -> Result<RgbaImage> {
        Ok(self.latest_frame()?)
    }

    async fn next_point_cloud(&self) -> Result<PointSet> {
        Ok(self.latest_point_cloud()?)
    }

    async fn close(&self) -> Result<()> {
        LidarClient::close(self).await?;
        Ok(())
    }
}

/// Builds [`LidarClient`] cameras from attribute maps.
///
/// Attribute keys are those of the `[device]` configuration table, plus an
/// optional nested `raster` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct LidarCameraFactory;

impl LidarCameraFactory {
    /// Registry key for this driver.
    pub const DRIVER_TYPE: &'static str = "iphonelidar";

    /// Registry key for this driver.
    pub fn driver_type(&self) -> &'static str {
        Self::DRIVER_TYPE
    }

    /// Human-readable driver name.
    pub fn name(&self) -> &'static str {
        "Phone LiDAR point-cloud camera"
    }

    /// Check attributes without touching the network.
    pub fn validate(&self, attributes: &toml::Value) -> Result<()> {
        parse_attributes(attributes.clone()).map(|_| ())
    }

    /// Probe the device and start a client.
    pub fn build(&self, attributes: toml::Value) -> BoxFuture<'static, Result<Arc<dyn PointCloudCamera>>> {
        Box::pin(async move {
            let (endpoint, raster) = parse_attributes(attributes)?;
            let target = endpoint.endpoint();
            let client = LidarClient::connect_with_raster(endpoint, raster)
                .await
                .with_context(|| format!("building {} camera for {}", Self::DRIVER_TYPE, target))?;
            Ok(Arc::new(client) as Arc<dyn PointCloudCamera>)
        })
    }
}

fn parse_attributes(attributes: toml::Value) -> Result<(EndpointConfig, RasterConfig)> {
    let raster = match attributes.get("raster") {
        Some(table) => table
            .clone()
            .try_into::<RasterConfig>()
            .context("invalid raster attributes")?,
        None => RasterConfig::default(),
    };
    if raster.width == 0 || raster.height == 0 {
        anyhow::bail!("invalid raster size {}x{}", raster.width, raster.height);
    }

    let endpoint = EndpointConfig::from_attributes(attributes).context("invalid device attributes")?;
    Ok((endpoint, raster))
}
