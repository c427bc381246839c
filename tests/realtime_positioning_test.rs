/// 🎯 实时定位服务测试
///
/// 用模拟信号源驱动 tokio 定位服务：
/// - 接收端固定在 (3, 4) m
/// - 信标 A(0,0) B(10,0) C(0,10)，txPower = -59 dBm，n = 2.5
/// - 缩短校准和处理周期以加快测试

use beaconloc::algorithms::*;
use beaconloc::config::EngineConfig;
use beaconloc::positioning::{EngineEvent, PositioningEngine};
use beaconloc::service::{self, ServiceHandle};
use beaconloc::simulation::SimulatedSource;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use tokio_test::{assert_err, assert_ok};

const UUID: &str = "FDA50693-A4E2-4FB1-AFCF-C6EB07647825";

fn beacons() -> Vec<ConfiguredBeacon> {
    vec![
        ConfiguredBeacon::new(BeaconId::new(UUID, 1, 1), "A", 0.0, 0.0, -59),
        ConfiguredBeacon::new(BeaconId::new(UUID, 1, 2), "B", 10.0, 0.0, -59),
        ConfiguredBeacon::new(BeaconId::new(UUID, 1, 3), "C", 0.0, 10.0, -59),
    ]
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        calibration_duration_ms: 300,
        flush_interval_ms: 100,
        ..EngineConfig::default()
    }
}

fn start_service(
    config: EngineConfig,
    beacons: Vec<ConfiguredBeacon>,
) -> (
    ServiceHandle,
    mpsc::Sender<ReadingBatch>,
    mpsc::Receiver<EngineEvent>,
) {
    let engine = PositioningEngine::new(config, BeaconSet::from_vec(beacons)).unwrap();
    let (reading_tx, reading_rx) = mpsc::channel(100);
    let (event_tx, event_rx) = mpsc::channel(100);
    let handle = service::spawn(engine, reading_rx, event_tx);
    (handle, reading_tx, event_rx)
}

fn fixed_point_source() -> SimulatedSource {
    SimulatedSource::new(beacons(), PathLossModel::default(), vec![(3.0, 4.0)])
        .without_jitter()
        .with_interval(Duration::from_millis(50))
        .with_batches_per_point(40)
}

#[tokio::test]
async fn test_calibration_seeds_then_tracks() {
    println!("\n========== 实时定位服务测试 ==========\n");

    let (handle, reading_tx, mut events) = start_service(fast_config(), beacons());
    assert_ok!(handle.start_locating().await);
    let source = tokio::spawn(fixed_point_source().run(reading_tx, 1));

    let mut started = false;
    let mut calibration = None;
    let mut update = None;

    let collected = timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::SessionStarted => started = true,
                EngineEvent::CalibrationFinished(outcome) => calibration = Some(outcome),
                EngineEvent::PositionUpdated(u) => {
                    update = Some(u);
                    break;
                }
                _ => {}
            }
        }
    })
    .await;
    assert!(collected.is_ok(), "no position update within timeout");

    assert!(started);
    let outcome = calibration.expect("calibration must finish before tracking");
    assert_eq!(outcome.status(), SeedStatus::Seeded);
    assert_eq!(outcome.beacons().len(), 3);
    let seed = outcome.position().unwrap();
    println!("✓ 校准位置: ({:.2}, {:.2}) m", seed.x, seed.y);

    let update = update.unwrap();
    println!(
        "📍 位置: ({:.2}, {:.2}) m | 方法: {}",
        update.position.x, update.position.y, update.position.method
    );
    assert_eq!(update.samples.len(), 3);
    assert!((update.position.x - 3.0).abs() < 1.0);
    assert!((update.position.y - 4.0).abs() < 1.0);

    source.abort();
    let engine = handle.shutdown().await.unwrap();
    assert!(!engine.is_locating());
    assert!(engine.current_position().is_some());
}

#[tokio::test]
async fn test_start_without_beacons_fails() {
    let (handle, _reading_tx, _events) = start_service(fast_config(), Vec::new());
    assert_err!(handle.start_locating().await);

    let engine = handle.shutdown().await.unwrap();
    assert!(!engine.is_locating());
}

#[tokio::test]
async fn test_duplicate_start_is_ignored() {
    let (handle, _reading_tx, mut events) = start_service(fast_config(), beacons());
    assert_ok!(handle.start_locating().await);
    assert_ok!(handle.start_locating().await);

    assert_eq!(events.recv().await, Some(EngineEvent::SessionStarted));
    // 第二次启动不会再发出事件，也不会重置校准
    let engine = handle.shutdown().await.unwrap();
    let mut started = 1;
    while let Ok(event) = events.try_recv() {
        if event == EngineEvent::SessionStarted {
            started += 1;
        }
    }
    assert_eq!(started, 1);
    assert!(!engine.is_locating());
}

#[tokio::test]
async fn test_stop_during_calibration_cancels_it() {
    let (handle, reading_tx, mut events) = start_service(fast_config(), beacons());
    assert_ok!(handle.start_locating().await);

    let source = fixed_point_source();
    reading_tx
        .send(source.readings_at(3.0, 4.0, 0, chrono::Utc::now()))
        .await
        .unwrap();
    assert_ok!(handle.stop_locating().await);

    // 等待超过原校准截止时间
    sleep(Duration::from_millis(500)).await;

    let engine = handle.shutdown().await.unwrap();
    assert_eq!(engine.calibration_state(), CalibrationState::Idle);
    assert!(engine.current_position().is_none());

    let mut saw_stop = false;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, EngineEvent::CalibrationFinished(_)));
        assert!(!matches!(event, EngineEvent::PositionUpdated(_)));
        if event == EngineEvent::SessionStopped {
            saw_stop = true;
        }
    }
    assert!(saw_stop);
}

#[tokio::test]
async fn test_closing_reading_channel_stops_service() {
    let (handle, reading_tx, mut events) = start_service(fast_config(), beacons());
    assert_ok!(handle.start_locating().await);
    drop(reading_tx);

    let mut stopped = false;
    while let Some(event) = events.recv().await {
        if event == EngineEvent::SessionStopped {
            stopped = true;
        }
    }
    assert!(stopped);

    let engine = handle.shutdown().await.unwrap();
    assert!(!engine.is_locating());
}

#[tokio::test]
async fn test_path_loss_exponent_update_through_handle() {
    let (handle, _reading_tx, _events) = start_service(fast_config(), beacons());
    assert_err!(handle.set_path_loss_exponent(-1.0).await);
    assert_ok!(handle.set_path_loss_exponent(3.0).await);

    let engine = handle.shutdown().await.unwrap();
    assert_eq!(engine.path_loss_exponent(), 3.0);
}
