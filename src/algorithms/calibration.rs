/// 定位启动校准（预热）状态机
///
/// Idle → Calibrating → Done(Seeded) | Done(Unseeded)
///
/// 开始定位后的固定时间窗口内只累积样本、不输出位置；窗口结束时对每个信标的
/// 距离求平均，用一次解算结果为平滑器播种，避免起始阶段的跳变。

use crate::algorithms::{
    BeaconId, ConditionedSample, PositionEstimate, PositionSolver, PositioningMethod,
    RangeMeasurement,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

/// 默认校准时长（毫秒）
pub const DEFAULT_CALIBRATION_DURATION_MS: u64 = 3000;
/// 播种所需的最少信标数
pub const DEFAULT_MIN_CALIBRATION_BEACONS: usize = 3;

/// 毫秒数转为 chrono 时长，超出可表示范围时取最大值
pub fn saturating_millis(ms: u64) -> Duration {
    i64::try_from(ms)
        .ok()
        .and_then(Duration::try_milliseconds)
        .unwrap_or(Duration::MAX)
}

/// 校准结束后的播种结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeedStatus {
    Seeded,
    Unseeded,
}

/// 校准状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationState {
    Idle,
    Calibrating { deadline: DateTime<Utc> },
    Done(SeedStatus),
}

/// 校准窗口内的单个样本
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationSample {
    pub distance: f64,
    pub rssi: i16,
    pub timestamp: DateTime<Utc>,
    pub x: f64,
    pub y: f64,
}

impl From<&ConditionedSample> for CalibrationSample {
    fn from(sample: &ConditionedSample) -> Self {
        CalibrationSample {
            distance: sample.distance,
            rssi: sample.rssi,
            timestamp: sample.timestamp,
            x: sample.x,
            y: sample.y,
        }
    }
}

/// 单个信标在校准窗口内的平均值
#[derive(Clone, Debug, PartialEq)]
pub struct BeaconAverage {
    pub id: BeaconId,
    pub x: f64,
    pub y: f64,
    pub mean_distance: f64,
    pub mean_rssi: f64,
    pub sample_count: usize,
}

impl BeaconAverage {
    fn from_samples(id: &BeaconId, samples: &[CalibrationSample]) -> Option<Self> {
        let last = samples.last()?;
        let count = samples.len() as f64;
        Some(BeaconAverage {
            id: id.clone(),
            x: last.x,
            y: last.y,
            mean_distance: samples.iter().map(|s| s.distance).sum::<f64>() / count,
            mean_rssi: samples.iter().map(|s| s.rssi as f64).sum::<f64>() / count,
            sample_count: samples.len(),
        })
    }

    pub fn range(&self) -> RangeMeasurement {
        RangeMeasurement::new(self.x, self.y, self.mean_distance)
    }
}

/// 未能播种的原因
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnseededReason {
    /// 合格信标不足
    Underrun { qualified: usize, required: usize },
    /// 解算失败
    SolverFailed,
}

/// 校准结论
#[derive(Clone, Debug, PartialEq)]
pub enum CalibrationOutcome {
    Seeded {
        position: PositionEstimate,
        beacons: Vec<BeaconAverage>,
    },
    Unseeded {
        reason: UnseededReason,
        beacons: Vec<BeaconAverage>,
    },
}

impl CalibrationOutcome {
    pub fn status(&self) -> SeedStatus {
        match self {
            CalibrationOutcome::Seeded { .. } => SeedStatus::Seeded,
            CalibrationOutcome::Unseeded { .. } => SeedStatus::Unseeded,
        }
    }

    /// 播种位置（仅 Seeded）
    pub fn position(&self) -> Option<&PositionEstimate> {
        match self {
            CalibrationOutcome::Seeded { position, .. } => Some(position),
            CalibrationOutcome::Unseeded { .. } => None,
        }
    }

    pub fn beacons(&self) -> &[BeaconAverage] {
        match self {
            CalibrationOutcome::Seeded { beacons, .. } => beacons,
            CalibrationOutcome::Unseeded { beacons, .. } => beacons,
        }
    }
}

/// 校准控制器
#[derive(Clone, Debug)]
pub struct CalibrationController {
    duration: Duration,
    min_beacons: usize,
    state: CalibrationState,
    accumulator: HashMap<BeaconId, Vec<CalibrationSample>>,
}

impl CalibrationController {
    pub fn new(duration_ms: u64, min_beacons: usize) -> Self {
        CalibrationController {
            duration: saturating_millis(duration_ms),
            min_beacons: min_beacons.max(1),
            state: CalibrationState::Idle,
            accumulator: HashMap::new(),
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_calibrating(&self) -> bool {
        matches!(self.state, CalibrationState::Calibrating { .. })
    }

    /// 校准截止时间（仅 Calibrating）
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match self.state {
            CalibrationState::Calibrating { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// 开始新的校准窗口，清空累积器
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.accumulator.clear();
        let deadline = now
            .checked_add_signed(self.duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.state = CalibrationState::Calibrating { deadline };
        debug!(deadline = %deadline, "calibration window opened");
    }

    /// 取消校准并回到 Idle
    pub fn stop(&mut self) {
        self.accumulator.clear();
        self.state = CalibrationState::Idle;
    }

    /// 把一批样本加入累积器，返回加入的数量；非校准状态下不做任何事
    pub fn accumulate(&mut self, samples: &[ConditionedSample]) -> usize {
        if !self.is_calibrating() {
            return 0;
        }
        for sample in samples {
            self.accumulator
                .entry(sample.id.clone())
                .or_default()
                .push(CalibrationSample::from(sample));
        }
        samples.len()
    }

    /// 某信标已累积的样本数
    pub fn sample_count(&self, id: &BeaconId) -> usize {
        self.accumulator.get(id).map_or(0, Vec::len)
    }

    /// 已累积样本的信标数
    pub fn accumulated_beacons(&self) -> usize {
        self.accumulator.len()
    }

    /// 校准窗口是否已到期
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            CalibrationState::Calibrating { deadline } => now >= deadline,
            _ => false,
        }
    }

    /// 按样本数排序后的各信标平均值（样本多者在前，同数时距离近者在前）
    pub fn averages(&self) -> Vec<BeaconAverage> {
        let mut averages: Vec<BeaconAverage> = self
            .accumulator
            .iter()
            .filter_map(|(id, samples)| BeaconAverage::from_samples(id, samples))
            .collect();

        averages.sort_by(|a, b| {
            b.sample_count
                .cmp(&a.sample_count)
                .then(a.mean_distance.total_cmp(&b.mean_distance))
                .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
        });
        averages
    }

    /// 结束校准，返回结论；不在校准状态时返回 None
    ///
    /// 累积器无论成功与否都会被丢弃。
    pub fn conclude(
        &mut self,
        solver: &PositionSolver,
        preferred: Option<PositioningMethod>,
    ) -> Option<CalibrationOutcome> {
        if !self.is_calibrating() {
            return None;
        }

        let beacons = self.averages();
        self.accumulator.clear();

        let outcome = if beacons.len() < self.min_beacons {
            CalibrationOutcome::Unseeded {
                reason: UnseededReason::Underrun {
                    qualified: beacons.len(),
                    required: self.min_beacons,
                },
                beacons,
            }
        } else {
            let ranges: Vec<RangeMeasurement> = beacons.iter().map(BeaconAverage::range).collect();
            match solver.solve(&ranges, preferred) {
                Some(position) => CalibrationOutcome::Seeded { position, beacons },
                None => CalibrationOutcome::Unseeded {
                    reason: UnseededReason::SolverFailed,
                    beacons,
                },
            }
        };

        self.state = CalibrationState::Done(outcome.status());
        info!(status = ?outcome.status(), beacons = outcome.beacons().len(), "calibration finished");
        Some(outcome)
    }
}

impl Default for CalibrationController {
    fn default() -> Self {
        Self::new(DEFAULT_CALIBRATION_DURATION_MS, DEFAULT_MIN_CALIBRATION_BEACONS)
    }
}
