use super::*;
use crate::config::CameraConfig;
use std::time::Duration;

fn create_test_camera_config() -> CameraConfig {
    CameraConfig {
        backend: crate::config::CameraBackendKind::Synthetic,
        device_id: None,
        resolution: (64, 48),
        fps: 30,
        mobile: false,
    }
}

fn two_cameras() -> SyntheticBackend {
    SyntheticBackend::new(vec![
        CameraDevice::new("cam-front", "Front Camera"),
        CameraDevice::new("cam-back", ""),
    ])
}

#[tokio::test]
async fn test_registry_lists_and_labels_devices() {
    let backend = Arc::new(two_cameras());
    let registry = DeviceRegistry::new(backend.clone());

    let devices = registry.list().await.unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].label, "Front Camera");
    assert_eq!(devices[1].label, "Camera 2");
    assert_eq!(backend.access_requests(), 1);

    // The transient grant is released before enumeration returns
    assert_eq!(backend.active_captures(), 0);

    assert_eq!(registry.select("cam-back").unwrap().label, "Camera 2");
    assert!(registry.select("cam-missing").is_none());
}

#[tokio::test]
async fn test_registry_permission_denied() {
    let backend = Arc::new(two_cameras());
    backend.set_access_denied(true);
    let registry = DeviceRegistry::new(backend);

    let err = registry.list().await.unwrap_err();
    assert!(matches!(err, crate::error::CameraError::PermissionDenied { .. }));
    assert_eq!(
        err.user_message(),
        "Camera permission was denied. Please allow camera access."
    );
    assert!(registry.devices().is_empty());
}

#[tokio::test]
async fn test_registry_enumeration_failure_keeps_previous_listing() {
    let backend = Arc::new(two_cameras());
    let registry = DeviceRegistry::new(backend.clone());
    registry.list().await.unwrap();

    backend.set_enumeration_failure(true);
    let err = registry.list().await.unwrap_err();
    assert!(matches!(
        err,
        crate::error::CameraError::DeviceEnumerationFailed { .. }
    ));
    assert_eq!(registry.devices().len(), 2);
}

#[tokio::test]
async fn test_registry_next_after_wraps() {
    let registry = DeviceRegistry::new(Arc::new(two_cameras()));
    assert!(registry.next_after(None).is_none());

    registry.list().await.unwrap();
    assert_eq!(registry.next_after(None).unwrap().id, "cam-front");
    assert_eq!(registry.next_after(Some("cam-front")).unwrap().id, "cam-back");
    assert_eq!(registry.next_after(Some("cam-back")).unwrap().id, "cam-front");
}

#[tokio::test]
async fn test_session_opens_requested_device() {
    let backend = two_cameras();
    let config = create_test_camera_config();

    let mut session = CameraSession::open(&backend, Some("cam-back"), &config)
        .await
        .unwrap();
    assert_eq!(session.device().id, "cam-back");
    assert_eq!(backend.opened_devices(), vec!["cam-back".to_string()]);
    assert_eq!(backend.active_captures(), 1);

    let frame = session.pull().expect("first frame is available");
    assert_eq!((frame.width, frame.height), (64, 48));
    assert!(frame.validate_size());

    session.close().await;
    assert!(!session.is_open());
    assert_eq!(backend.active_captures(), 0);
}

#[tokio::test]
async fn test_session_close_is_idempotent() {
    let backend = SyntheticBackend::single();
    let config = create_test_camera_config();

    let mut session = CameraSession::open(&backend, None, &config).await.unwrap();
    session.close().await;
    session.close().await;
    assert_eq!(backend.active_captures(), 0);
}

#[tokio::test]
async fn test_mobile_without_device_prefers_rear_camera() {
    let backend = SyntheticBackend::new(vec![
        CameraDevice::new("cam-0", "Front Camera"),
        CameraDevice::new("cam-1", "Back Camera"),
    ]);
    let mut config = create_test_camera_config();
    config.mobile = true;

    let mut session = CameraSession::open(&backend, None, &config).await.unwrap();
    assert_eq!(session.device().id, "cam-1");
    session.close().await;

    // An explicit device ignores the hint
    let mut session = CameraSession::open(&backend, Some("cam-0"), &config)
        .await
        .unwrap();
    assert_eq!(session.device().id, "cam-0");
    session.close().await;
}

#[tokio::test]
async fn test_open_failures_are_distinct() {
    let config = create_test_camera_config();

    let empty = SyntheticBackend::new(Vec::new());
    let err = CameraSession::open(&empty, None, &config)
        .await
        .err()
        .unwrap();
    assert_eq!(err, crate::error::CameraError::NoCameraFound);
    assert_eq!(err.user_message(), "No camera found on this device.");

    let denied = SyntheticBackend::single();
    denied.set_access_denied(true);
    let err = CameraSession::open(&denied, None, &config)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, crate::error::CameraError::PermissionDenied { .. }));

    let err = CameraSession::open(&SyntheticBackend::single(), Some("nope"), &config)
        .await
        .err()
        .unwrap();
    assert!(err.user_message().starts_with("Failed to start camera: "));
}

#[tokio::test]
async fn test_reader_sees_new_frames() {
    let backend = SyntheticBackend::single();
    let config = create_test_camera_config();
    let mut session = CameraSession::open(&backend, None, &config).await.unwrap();

    let mut reader = session.reader();
    let first_id = reader.latest().unwrap().id;

    tokio::time::timeout(Duration::from_secs(2), async {
        while reader.latest().unwrap().id <= first_id {
            assert!(reader.changed().await);
        }
    })
    .await
    .unwrap();

    session.close().await;
}
