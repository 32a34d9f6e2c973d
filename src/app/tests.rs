use super::*;
use crate::alert::tests::RecordingSynthesizer;
use crate::camera::{CameraDevice, SyntheticBackend};
use crate::config::FirewatchConfig;
use crate::control::ControlCommand;
use crate::display::MemorySurface;
use crate::session::{SessionState, StreamController};
use crate::testing::{create_test_config, refused_endpoint, MockAnnotationServer};
use std::sync::Arc;
use std::time::Duration;

fn create_test_app(config: FirewatchConfig) -> (FirewatchApp, Arc<SyntheticBackend>) {
    let backend = Arc::new(SyntheticBackend::new(vec![CameraDevice::new(
        "cam-front",
        "Front Camera",
    )]));
    let controller = StreamController::builder(config.clone())
        .backend(backend.clone())
        .synthesizer(Arc::new(RecordingSynthesizer::default()))
        .surface(Box::new(MemorySurface::new((64, 48))))
        .build()
        .unwrap();
    (
        FirewatchApp::with_controller(config, Arc::new(controller)),
        backend,
    )
}

fn headless_config(endpoint: &str) -> FirewatchConfig {
    let mut config = create_test_config(endpoint);
    config.control.http_enabled = false;
    config.control.keyboard = false;
    config
}

#[tokio::test]
async fn test_quit_command_shuts_down_cleanly() {
    let server = MockAnnotationServer::start().await;
    let (mut app, backend) = create_test_app(headless_config(&server.endpoint));

    app.start(true).await.unwrap();
    let controller = app.controller();
    assert_eq!(controller.state(), SessionState::Live);
    assert_eq!(backend.active_captures(), 1);

    let commands = app.command_sender();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        commands
            .send(ControlCommand::Quit {
                reason: "test".to_string(),
            })
            .await
            .unwrap();
    });

    let exit_code = tokio::time::timeout(Duration::from_secs(10), app.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(exit_code, 0);
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(backend.active_captures(), 0);
}

#[tokio::test]
async fn test_autostart_failure_is_not_fatal() {
    let endpoint = refused_endpoint().await;
    let (mut app, backend) = create_test_app(headless_config(&endpoint));

    app.start(true).await.unwrap();

    let controller = app.controller();
    assert_eq!(controller.state(), SessionState::Failed);
    assert!(controller.status().last_error.is_some());
    assert_eq!(backend.active_captures(), 0);

    assert_eq!(app.shutdown().await.unwrap(), 0);
    assert_eq!(controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_no_autostart_waits_idle() {
    let server = MockAnnotationServer::start().await;
    let (mut app, backend) = create_test_app(headless_config(&server.endpoint));

    app.start(false).await.unwrap();
    assert_eq!(app.controller().state(), SessionState::Idle);
    assert!(backend.opened_devices().is_empty());

    app.command_sender()
        .send(ControlCommand::ToggleSession)
        .await
        .unwrap();
    let controller = app.controller();
    crate::testing::wait_until(Duration::from_secs(5), || {
        controller.state() == SessionState::Live
    })
    .await;

    assert_eq!(app.shutdown().await.unwrap(), 0);
    assert_eq!(backend.active_captures(), 0);
}
