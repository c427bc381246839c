//! 实时定位命令行
//!
//! 用法: beaconloc <config.json> [--simulate] [--verbose]

use beaconloc::algorithms::{BeaconSet, PathLossModel};
use beaconloc::config::BeaconConfigFile;
use beaconloc::positioning::{EngineEvent, PositionUpdate, PositioningEngine};
use beaconloc::service;
use beaconloc::simulation::SimulatedSource;
use beaconloc::Result;
use chrono::Local;
use tokio::sync::mpsc;
use tracing::{error, info};

fn format_signal_level(rssi: i16) -> &'static str {
    match rssi {
        r if r > -50 => "▓▓▓▓▓ 极强",
        r if r > -60 => "▓▓▓▓░ 强",
        r if r > -70 => "▓▓▓░░ 中",
        r if r > -80 => "▓▓░░░ 弱",
        _ => "▓░░░░ 极弱",
    }
}

fn print_update(result_no: usize, update: &PositionUpdate) {
    let position = &update.position;
    println!("📍 定位结果 #{}", result_no);
    println!("┌─ 位置坐标 (m)");
    println!("│  X: {:>8.2} m  (原始 {:>8.2})", position.x, update.raw.x);
    println!("│  Y: {:>8.2} m  (原始 {:>8.2})", position.y, update.raw.y);
    println!("├─ 定位质量");
    println!("│  方法: {}", position.method);
    if let Some(residual) = position.residual {
        println!("│  残差: {:>7.2} m", residual);
    }
    println!("├─ 信号信息");
    for sample in &update.samples {
        println!(
            "│  {} ({}): {} dBm {} ≈ {:.2} m",
            sample.name,
            sample.id,
            sample.rssi,
            format_signal_level(sample.rssi),
            sample.distance
        );
    }
    println!("└─ 时间: {}", Local::now().format("%H:%M:%S%.3f"));
}

/// 模拟路径：沿信标包围盒内侧走一圈
fn simulated_path(beacons: &BeaconSet) -> Vec<(f64, f64)> {
    let xs = beacons.iter().map(|(_, b)| b.x);
    let ys = beacons.iter().map(|(_, b)| b.y);
    let (min_x, max_x) = xs.fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let (min_y, max_y) = ys.fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));

    let inset_x = (max_x - min_x) * 0.25;
    let inset_y = (max_y - min_y) * 0.25;
    vec![
        (min_x + inset_x, min_y + inset_y),
        (max_x - inset_x, min_y + inset_y),
        (max_x - inset_x, max_y - inset_y),
        (min_x + inset_x, max_y - inset_y),
    ]
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = args.iter().any(|a| a == "--verbose");
    let simulate = args.iter().any(|a| a == "--simulate");

    tracing_subscriber::fmt()
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let Some(path) = args.iter().find(|a| !a.starts_with("--")) else {
        eprintln!("用法: beaconloc <config.json> [--simulate] [--verbose]");
        std::process::exit(2);
    };

    if let Err(e) = run(path, simulate).await {
        error!(error = %e, "locating failed");
        std::process::exit(1);
    }
}

async fn run(path: &str, simulate: bool) -> Result<()> {
    let file = BeaconConfigFile::from_path(path)?;
    let beacons = BeaconSet::try_from_vec(file.beacons.clone())?;
    info!(beacons = beacons.len(), "configuration loaded from {}", path);

    let engine = PositioningEngine::new(file.engine.clone(), beacons.clone())?;
    let (reading_tx, reading_rx) = mpsc::channel(100);
    let (event_tx, mut event_rx) = mpsc::channel(100);

    let handle = service::spawn(engine, reading_rx, event_tx);
    handle.start_locating().await?;

    let source = if simulate {
        let model = PathLossModel::new(file.engine.path_loss_exponent)?;
        let source = SimulatedSource::new(file.beacons.clone(), model, simulated_path(&beacons));
        tokio::spawn(source.run(reading_tx, 3))
    } else {
        spawn_scanner(reading_tx)?
    };

    let mut result_count = 0;
    while let Some(event) = event_rx.recv().await {
        match event {
            EngineEvent::CalibrationFinished(outcome) => {
                println!("🎯 校准完成: {:?}，参与信标 {} 个", outcome.status(), outcome.beacons().len());
            }
            EngineEvent::PositionUpdated(update) => {
                result_count += 1;
                print_update(result_count, &update);
            }
            EngineEvent::SessionStopped => break,
            _ => {}
        }
    }

    let _ = source.await;
    handle.shutdown().await?;
    println!("✓ 定位已停止，共输出 {} 个位置", result_count);
    Ok(())
}

#[cfg(feature = "ble")]
fn spawn_scanner(
    readings: mpsc::Sender<beaconloc::algorithms::ReadingBatch>,
) -> Result<tokio::task::JoinHandle<()>> {
    use beaconloc::scanner::BleScanner;

    Ok(tokio::spawn(async move {
        if let Err(e) = BleScanner::default().run(readings).await {
            error!(error = %e, "ble scanner stopped");
        }
    }))
}

#[cfg(not(feature = "ble"))]
fn spawn_scanner(
    _readings: mpsc::Sender<beaconloc::algorithms::ReadingBatch>,
) -> Result<tokio::task::JoinHandle<()>> {
    Err(beaconloc::PositioningError::Scanner(
        "built without the `ble` feature, use --simulate".to_string(),
    ))
}
