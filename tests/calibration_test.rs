/// 校准预热流程测试（引擎级，时间由测试注入）

use beaconloc::algorithms::*;
use beaconloc::config::EngineConfig;
use beaconloc::positioning::{EngineEvent, PositioningEngine, SessionState};
use chrono::{DateTime, Duration, Utc};

const UUID: &str = "FDA50693-A4E2-4FB1-AFCF-C6EB07647825";

fn id(minor: u16) -> BeaconId {
    BeaconId::new(UUID, 1, minor)
}

fn engine() -> PositioningEngine {
    let beacons = BeaconSet::from_vec(vec![
        ConfiguredBeacon::new(id(1), "A", 0.0, 0.0, -59),
        ConfiguredBeacon::new(id(2), "B", 10.0, 0.0, -59),
        ConfiguredBeacon::new(id(3), "C", 0.0, 10.0, -59),
        ConfiguredBeacon::new(id(4), "D", 10.0, 10.0, -59),
    ]);
    PositioningEngine::new(EngineConfig::default(), beacons).unwrap()
}

/// 接收端在 (3, 4) 时 A/B/C 的整数 RSSI
fn batch_at(now: DateTime<Utc>) -> Vec<RawReading> {
    vec![
        RawReading::new(id(1), -76, now),
        RawReading::new(id(2), -82, now),
        RawReading::new(id(3), -80, now),
    ]
}

#[test]
fn test_three_beacons_three_samples_seed_once() {
    let mut engine = engine();
    let start = Utc::now();
    engine.start_locating(start).unwrap();
    assert_eq!(engine.session_state(), SessionState::Calibrating);

    for i in 0..3 {
        let at = start + Duration::milliseconds(500 * (i + 1));
        engine.ingest(&batch_at(at));
        // 校准期间不输出位置
        assert!(engine.tick(at).is_empty());
    }
    assert_eq!(engine.calibration().sample_count(&id(1)), 3);

    let deadline = start + Duration::milliseconds(3000);
    let events = engine.tick(deadline);
    let EngineEvent::CalibrationFinished(outcome) = &events[0] else {
        panic!("expected calibration to finish, got {:?}", events);
    };

    assert_eq!(outcome.status(), SeedStatus::Seeded);
    assert_eq!(outcome.beacons().len(), 3);
    assert!(outcome.beacons().iter().all(|b| b.sample_count == 3));
    let seed = outcome.position().unwrap();
    assert!((seed.x - 3.0).abs() < 1.0);
    assert!((seed.y - 4.0).abs() < 1.0);

    assert_eq!(
        engine.calibration_state(),
        CalibrationState::Done(SeedStatus::Seeded)
    );
    let (sx, sy) = engine.smoother().position().unwrap();
    assert!((sx - seed.x).abs() < 1e-6);
    assert!((sy - seed.y).abs() < 1e-6);

    // 缓冲区中仍有新鲜样本，同一 tick 内直接输出位置
    assert!(matches!(events.get(1), Some(EngineEvent::PositionUpdated(_))));

    // 截止后不再重复结束校准
    let later = deadline + Duration::milliseconds(1000);
    assert!(engine.poll_calibration(later).is_none());
    assert!(engine.finish_calibration().is_none());
}

#[test]
fn test_underrun_seeds_from_first_solve() {
    let mut engine = engine();
    let start = Utc::now();
    engine.start_locating(start).unwrap();

    engine.ingest(&[
        RawReading::new(id(1), -70, start),
        RawReading::new(id(2), -75, start),
    ]);

    let deadline = start + Duration::milliseconds(3000);
    let outcome = engine.poll_calibration(deadline).unwrap();
    assert_eq!(outcome.status(), SeedStatus::Unseeded);
    assert!(matches!(
        outcome,
        CalibrationOutcome::Unseeded {
            reason: UnseededReason::Underrun {
                qualified: 2,
                required: 3
            },
            ..
        }
    ));
    assert!(!engine.smoother().is_seeded());
    assert_eq!(engine.session_state(), SessionState::Tracking);

    engine.ingest(&batch_at(deadline));
    let update = engine.flush(deadline).unwrap();
    // 首次解算的结果原样作为平滑位置
    assert_eq!(update.position.xy(), update.raw.xy());
    assert!(engine.smoother().is_seeded());
}

#[test]
fn test_calibration_prefers_beacons_with_more_samples() {
    let mut engine = engine();
    let start = Utc::now();
    engine.start_locating(start).unwrap();

    for i in 0..3 {
        engine.ingest(&batch_at(start + Duration::milliseconds(100 * i)));
    }
    // D 只出现一次
    engine.ingest(&[RawReading::new(id(4), -78, start)]);

    let outcome = engine.finish_calibration().unwrap();
    let ranked: Vec<BeaconId> = outcome.beacons().iter().map(|b| b.id.clone()).collect();
    assert_eq!(ranked.len(), 4);
    assert_eq!(ranked[3], id(4));
    assert_eq!(outcome.status(), SeedStatus::Seeded);
}

#[test]
fn test_restart_opens_new_window() {
    let mut engine = engine();
    let start = Utc::now();
    engine.start_locating(start).unwrap();
    engine.ingest(&batch_at(start));
    engine.stop_locating();
    assert_eq!(engine.calibration_state(), CalibrationState::Idle);

    let restart = start + Duration::milliseconds(10_000);
    engine.start_locating(restart).unwrap();
    assert_eq!(
        engine.calibration_deadline(),
        Some(restart + Duration::milliseconds(3000))
    );
    assert_eq!(engine.calibration().accumulated_beacons(), 0);
}
