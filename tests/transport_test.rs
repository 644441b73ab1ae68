//! Integration tests for the HTTP transport against a simulated device.

mod common;

use common::{closed_port, SimulatedDevice};
use lidar_link::config::{AcquisitionMode, EndpointConfig};
use lidar_link::error::ConnError;
use lidar_link::transport::{HttpTransport, Transport};
use std::time::Duration;

#[tokio::test]
async fn test_probe_accepts_200() {
    let device = SimulatedDevice::start("[]").await;
    let mut transport = HttpTransport::new(device.endpoint(AcquisitionMode::Poll)).unwrap();

    transport.probe().await.unwrap();
    assert_eq!(device.hello_hits(), 1);
}

#[tokio::test]
async fn test_probe_rejects_other_status() {
    let device = SimulatedDevice::start("[]").await;
    device.set_hello_status(503);
    let mut transport = HttpTransport::new(device.endpoint(AcquisitionMode::Poll)).unwrap();

    let err = transport.probe().await.unwrap_err();
    assert!(matches!(err, ConnError::BadStatus(503)), "{err:?}");
}

#[tokio::test]
async fn test_probe_unreachable_device() {
    let config = EndpointConfig::new("127.0.0.1", closed_port());
    let mut transport = HttpTransport::new(config).unwrap();

    let err = transport.probe().await.unwrap_err();
    assert!(matches!(err, ConnError::Unreachable { .. }), "{err:?}");
}

#[tokio::test]
async fn test_poll_fetch_unwraps_envelope() {
    let device = SimulatedDevice::start("[(1.0, 2.0, 3.0)]").await;
    let mut transport = HttpTransport::new(device.endpoint(AcquisitionMode::Poll)).unwrap();

    let payload = transport.fetch_one().await.unwrap();
    assert_eq!(payload.as_str(), "[(1.0, 2.0, 3.0)]");
    assert_eq!(device.measurement_hits(), 1);
}

#[tokio::test]
async fn test_poll_fetch_accepts_raw_body() {
    let device = SimulatedDevice::start("[(4, 5, 6)]").await;
    device.set_envelope(false);
    let mut transport = HttpTransport::new(device.endpoint(AcquisitionMode::Poll)).unwrap();

    let payload = transport.fetch_one().await.unwrap();
    assert_eq!(payload.as_str(), "[(4, 5, 6)]");
}

#[tokio::test]
async fn test_stream_reuses_one_connection() {
    let device = SimulatedDevice::start("[(1, 1, 1)]").await;
    let mut transport = HttpTransport::new(device.endpoint(AcquisitionMode::Stream)).unwrap();

    for _ in 0..3 {
        let payload = transport.fetch_one().await.unwrap();
        assert_eq!(payload.as_str(), "[(1, 1, 1)]");
    }
    assert!(transport.is_stream_open());
    assert_eq!(device.stream_opens(), 1);

    device.set_payload("[(2, 2, 2)]");
    // lines already in flight may still carry the old payload
    let mut latest = String::new();
    for _ in 0..20 {
        latest = transport.fetch_one().await.unwrap().0;
        if latest == "[(2, 2, 2)]" {
            break;
        }
    }
    assert_eq!(latest, "[(2, 2, 2)]");
    assert_eq!(device.stream_opens(), 1);
}

#[tokio::test]
async fn test_stream_end_is_disconnected_and_reopens() {
    let device = SimulatedDevice::start("[(1, 1, 1)]").await;
    let mut transport = HttpTransport::new(device.endpoint(AcquisitionMode::Stream)).unwrap();
    transport.fetch_one().await.unwrap();

    device.drop_streams();
    let mut saw_disconnect = false;
    for _ in 0..50 {
        match transport.fetch_one().await {
            Ok(_) => continue,
            Err(ConnError::Disconnected) => {
                saw_disconnect = true;
                break;
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert!(saw_disconnect);
    assert!(!transport.is_stream_open());

    // next fetch opens a fresh stream
    transport.fetch_one().await.unwrap();
    assert_eq!(device.stream_opens(), 2);
}

#[tokio::test]
async fn test_reset_and_reconnect_reopen_stream() {
    let device = SimulatedDevice::start("[(1, 1, 1)]").await;
    let mut transport = HttpTransport::new(device.endpoint(AcquisitionMode::Stream)).unwrap();
    transport.fetch_one().await.unwrap();

    transport.reset();
    assert!(!transport.is_stream_open());

    transport.reconnect().await.unwrap();
    assert!(transport.is_stream_open());
    assert_eq!(device.stream_opens(), 2);
    assert_eq!(device.hello_hits(), 1);

    transport.close().await.unwrap();
    assert!(!transport.is_stream_open());
}

#[tokio::test]
async fn test_stalled_stream_does_not_return() {
    let device = SimulatedDevice::start("[(1, 1, 1)]").await;
    let mut transport = HttpTransport::new(device.endpoint(AcquisitionMode::Stream)).unwrap();
    transport.fetch_one().await.unwrap();

    device.set_stalled(true);
    // drain whatever was buffered before the stall
    let mut stalled = false;
    for _ in 0..50 {
        if tokio::time::timeout(Duration::from_millis(100), transport.fetch_one())
            .await
            .is_err()
        {
            stalled = true;
            break;
        }
    }
    assert!(stalled);
    device.set_stalled(false);
}
