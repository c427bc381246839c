//! 模拟信号源
//!
//! 沿给定路径移动的接收端，用对数距离模型反推各信标的 RSSI，
//! 叠加固定的抖动序列后按批次推送。用于演示和集成测试。

use crate::algorithms::{ConfiguredBeacon, PathLossModel, RawReading, ReadingBatch, MAX_DISTANCE};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;

/// 抖动序列（dB），按步数和信标序号循环取用
const JITTER_PATTERN: [i16; 7] = [0, 2, -1, -3, 1, 3, -2];

/// 模拟信号源
#[derive(Clone, Debug)]
pub struct SimulatedSource {
    beacons: Vec<ConfiguredBeacon>,
    model: PathLossModel,
    path: Vec<(f64, f64)>,
    /// 每个路径点发送的批次数
    batches_per_point: usize,
    interval: Duration,
    jitter: bool,
}

impl SimulatedSource {
    pub fn new(beacons: Vec<ConfiguredBeacon>, model: PathLossModel, path: Vec<(f64, f64)>) -> Self {
        SimulatedSource {
            beacons,
            model,
            path,
            batches_per_point: 4,
            interval: Duration::from_millis(250),
            jitter: true,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batches_per_point(mut self, batches: usize) -> Self {
        self.batches_per_point = batches.max(1);
        self
    }

    /// 关闭抖动，生成理想读数
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// 接收端位于 (x, y) 时的一批读数
    pub fn readings_at(&self, x: f64, y: f64, step: usize, timestamp: DateTime<Utc>) -> ReadingBatch {
        self.beacons
            .iter()
            .enumerate()
            .filter_map(|(i, beacon)| {
                let distance = ((x - beacon.x).powi(2) + (y - beacon.y).powi(2)).sqrt();
                if distance > MAX_DISTANCE {
                    return None;
                }
                let ideal = self.model.distance_to_rssi(distance, beacon.tx_power);
                let ideal = ideal.clamp(i16::MIN as f64, beacon.tx_power as f64 + 10.0);
                let jitter = if self.jitter {
                    JITTER_PATTERN[(step + i) % JITTER_PATTERN.len()]
                } else {
                    0
                };
                let rssi = ideal.round() as i16 + jitter;
                Some(RawReading::new(beacon.id.clone(), rssi, timestamp))
            })
            .collect()
    }

    /// 沿路径发送读数，`rounds` 为走完路径的次数；通道关闭时提前结束
    pub async fn run(self, readings: mpsc::Sender<ReadingBatch>, rounds: usize) {
        let mut step = 0;
        for _ in 0..rounds {
            for &(x, y) in &self.path {
                for _ in 0..self.batches_per_point {
                    let batch = self.readings_at(x, y, step, Utc::now());
                    if readings.send(batch).await.is_err() {
                        debug!("reading channel closed, simulation stopped");
                        return;
                    }
                    step += 1;
                    sleep(self.interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::BeaconId;

    #[test]
    fn test_ideal_readings_follow_model() {
        let beacon = ConfiguredBeacon::new(
            BeaconId::new("FDA50693-A4E2-4FB1-AFCF-C6EB07647825", 1, 1),
            "A",
            0.0,
            0.0,
            -59,
        );
        let source = SimulatedSource::new(vec![beacon], PathLossModel::default(), vec![])
            .without_jitter();
        let batch = source.readings_at(10.0, 0.0, 0, Utc::now());
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].rssi, -84);
    }
}
