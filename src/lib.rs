//! # LiDAR Link
//!
//! Client library for phone LiDAR apps that serve point clouds over HTTP. It
//! keeps one background connection per device, decodes the textual point
//! tuples the device sends, and hands out the latest snapshot as points or as
//! a rendered image without ever blocking a reader on the network.
//!
//! ## Crate Structure
//!
//! - **`point`**: `Point`, `PointSet` and `Measurement`, the immutable data model.
//! - **`decoder`**: Parses `[(x, y, z[, r, g, b]), ...]` payloads into a `PointSet`.
//! - **`raster`**: Projects a `PointSet` onto a fixed-size RGBA image.
//! - **`transport`**: The `Transport` trait and its `reqwest` implementation
//!   (poll and stream modes).
//! - **`acquisition`**: The background worker state machine, with timeouts,
//!   reconnects and counters.
//! - **`cache`**: Single-slot store of the latest `Measurement`.
//! - **`client`**: `LidarClient`, the public façade.
//! - **`camera`**: Camera-style trait and factory for component registries.
//! - **`config`**: Figment-based configuration (`Settings`, `EndpointConfig`).
//! - **`error`**: Error enums per layer.
//! - **`logging`**: `tracing-subscriber` setup for binaries and tests.

pub mod acquisition;
pub mod cache;
pub mod camera;
pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod logging;
pub mod point;
pub mod raster;
pub mod transport;

pub use client::LidarClient;
pub use config::{AcquisitionMode, EndpointConfig, Settings};
pub use error::{AppResult, ClientError};
pub use point::{Measurement, Point, PointSet, Rgb};
