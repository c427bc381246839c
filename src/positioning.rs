/// 蓝牙室内定位引擎
///
/// 处理流程：
/// - 读数批次 → RSSI 滑动平均 → 对数距离模型测距 → 缓冲区
/// - 校准期间样本进入校准累积器，不输出位置
/// - 周期性处理缓冲区：淘汰过期样本 → 解算 → 卡尔曼平滑 → 位置更新
///
/// 引擎本身是同步的单一所有者状态机，异步调度见 [`crate::service`]。

use crate::algorithms::{
    BeaconId, BeaconSet, CalibrationController, CalibrationOutcome, CalibrationState,
    ConditionedSample, PathLossModel, PositionEstimate, PositionHistory, PositionSmoother,
    PositionSolver, RangeMeasurement, RawReading, RssiConditioner, UnseededReason, saturating_millis,
};
use crate::config::EngineConfig;
use crate::error::{PositioningError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info, trace, warn};

/// 定位会话状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// 未在定位
    Idle,
    /// 校准预热中
    Calibrating,
    /// 正常跟踪
    Tracking,
}

/// 一次位置更新
#[derive(Clone, Debug, PartialEq)]
pub struct PositionUpdate {
    /// 平滑后的位置
    pub position: PositionEstimate,
    /// 解算器原始输出
    pub raw: PositionEstimate,
    /// 本周期参与解算的样本
    pub samples: Vec<ConditionedSample>,
}

/// 引擎对外发出的事件
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    SessionStarted,
    SessionStopped,
    /// 本批次中匹配并测距成功的信标（用于界面反馈）
    BeaconsDetected(Vec<ConditionedSample>),
    CalibrationFinished(CalibrationOutcome),
    PositionUpdated(PositionUpdate),
}

/// 定位引擎
pub struct PositioningEngine {
    config: EngineConfig,
    beacons: BeaconSet,
    model: PathLossModel,
    conditioner: RssiConditioner,
    solver: PositionSolver,
    calibration: CalibrationController,
    smoother: PositionSmoother,
    /// 每个信标最新的样本
    buffer: HashMap<BeaconId, ConditionedSample>,
    history: PositionHistory,
    locating: bool,
}

impl PositioningEngine {
    /// 创建引擎，配置不合法时返回错误
    pub fn new(config: EngineConfig, beacons: BeaconSet) -> Result<Self> {
        config.validate()?;
        let model = PathLossModel::new(config.path_loss_exponent)?;

        Ok(PositioningEngine {
            model,
            conditioner: RssiConditioner::new(config.rssi_window),
            solver: PositionSolver::new(config.solver),
            calibration: CalibrationController::new(
                config.calibration_duration_ms,
                config.min_calibration_beacons,
            ),
            smoother: PositionSmoother::new(config.smoother),
            buffer: HashMap::new(),
            history: PositionHistory::new(config.history_limit),
            locating: false,
            beacons,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn beacons(&self) -> &BeaconSet {
        &self.beacons
    }

    pub fn path_loss_exponent(&self) -> f64 {
        self.model.exponent()
    }

    // ========================================================================
    // 配置更新
    // ========================================================================

    /// 替换信标配置快照
    ///
    /// 缓冲区中不再配置的信标样本会被丢弃，RSSI 历史保持不变。
    pub fn update_beacons(&mut self, beacons: BeaconSet) {
        self.beacons = beacons;
        let configured = &self.beacons;
        self.buffer.retain(|id, _| configured.get(id).is_some());
        info!(count = self.beacons.len(), "beacon configuration updated");
    }

    /// 更新路径损耗指数，非法值被拒绝并保留原值
    pub fn set_path_loss_exponent(&mut self, n: f64) -> Result<()> {
        if let Err(e) = self.model.set_exponent(n) {
            warn!(value = n, "rejected path loss exponent update");
            return Err(e);
        }
        self.config.path_loss_exponent = n;
        info!(value = n, "path loss exponent updated");
        Ok(())
    }

    // ========================================================================
    // 会话生命周期
    // ========================================================================

    /// 开始定位：清空历史和平滑器，进入校准
    pub fn start_locating(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.locating {
            debug!("already locating, ignoring start");
            return Ok(());
        }
        if self.beacons.is_empty() {
            return Err(PositioningError::InvalidConfig(
                "no configured beacons, cannot start locating".to_string(),
            ));
        }

        self.reset_session();
        self.calibration.start(now);
        self.locating = true;
        info!(beacons = self.beacons.len(), "locating session started");
        Ok(())
    }

    /// 停止定位：取消校准、清空历史和累积器、作废平滑器状态
    pub fn stop_locating(&mut self) {
        if !self.locating {
            return;
        }
        self.reset_session();
        self.locating = false;
        info!("locating session stopped");
    }

    fn reset_session(&mut self) {
        self.calibration.stop();
        self.conditioner.reset();
        self.smoother.reset();
        self.buffer.clear();
        self.history.clear();
    }

    pub fn is_locating(&self) -> bool {
        self.locating
    }

    pub fn session_state(&self) -> SessionState {
        if !self.locating {
            SessionState::Idle
        } else if self.calibration.is_calibrating() {
            SessionState::Calibrating
        } else {
            SessionState::Tracking
        }
    }

    pub fn calibration_state(&self) -> CalibrationState {
        self.calibration.state()
    }

    /// 校准截止时间（仅校准期间）
    pub fn calibration_deadline(&self) -> Option<DateTime<Utc>> {
        self.calibration.deadline()
    }

    pub fn calibration(&self) -> &CalibrationController {
        &self.calibration
    }

    pub fn smoother(&self) -> &PositionSmoother {
        &self.smoother
    }

    pub fn conditioner(&self) -> &RssiConditioner {
        &self.conditioner
    }

    // ========================================================================
    // 数据处理
    // ========================================================================

    /// 处理一批原始读数，返回匹配并测距成功的样本
    ///
    /// 未配置的信标和无效距离被静默丢弃；校准期间样本同时进入校准累积器。
    pub fn ingest(&mut self, batch: &[RawReading]) -> Vec<ConditionedSample> {
        if !self.locating {
            trace!(readings = batch.len(), "not locating, batch dropped");
            return Vec::new();
        }

        let mut samples = Vec::with_capacity(batch.len());
        for reading in batch {
            match self.condition(reading) {
                Ok(sample) => samples.push(sample),
                Err(e) => debug!(error = %e, "reading dropped"),
            }
        }

        for sample in &samples {
            self.buffer.insert(sample.id.clone(), sample.clone());
        }
        self.calibration.accumulate(&samples);
        samples
    }

    fn condition(&mut self, reading: &RawReading) -> Result<ConditionedSample> {
        let beacon = self
            .beacons
            .get(&reading.id)
            .ok_or_else(|| PositioningError::UnmatchedBeacon(reading.id.clone()))?;

        let rssi = self.conditioner.observe(&reading.id, reading.rssi);
        let distance = self.model.estimate(rssi, beacon.tx_power)?;
        Ok(ConditionedSample::new(beacon, rssi, distance, reading.timestamp))
    }

    /// 校准窗口到期时结束校准
    pub fn poll_calibration(&mut self, now: DateTime<Utc>) -> Option<CalibrationOutcome> {
        if self.calibration.is_expired(now) {
            self.finish_calibration()
        } else {
            None
        }
    }

    /// 立即结束校准（计时器到期时调用），成功时为平滑器播种
    pub fn finish_calibration(&mut self) -> Option<CalibrationOutcome> {
        let outcome = self
            .calibration
            .conclude(&self.solver, self.config.preferred_method)?;

        match &outcome {
            CalibrationOutcome::Seeded { position, .. } => {
                self.smoother.seed(position.x, position.y);
                info!(position = %position, "smoother seeded from calibration");
            }
            CalibrationOutcome::Unseeded {
                reason: UnseededReason::Underrun { qualified, required },
                ..
            } => {
                let error = PositioningError::CalibrationUnderrun {
                    qualified: *qualified,
                    required: *required,
                };
                info!(error = %error, "smoother will seed from the first solve");
            }
            CalibrationOutcome::Unseeded { .. } => {
                warn!("calibration solve failed, smoother will seed from the first solve");
            }
        }
        Some(outcome)
    }

    /// 淘汰过期样本
    fn evict_stale(&mut self, now: DateTime<Utc>) {
        let max_age = saturating_millis(self.config.stale_after_ms);
        let before = self.buffer.len();
        self.buffer.retain(|_, sample| now - sample.timestamp < max_age);
        let evicted = before - self.buffer.len();
        if evicted > 0 {
            debug!(evicted, "stale samples evicted");
        }
    }

    /// 当前缓冲区样本快照（距离近者在前）
    pub fn buffered_samples(&self) -> Vec<ConditionedSample> {
        let mut samples: Vec<ConditionedSample> = self.buffer.values().cloned().collect();
        samples.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
        });
        samples
    }

    /// 处理一次缓冲区：淘汰过期样本、解算并平滑
    ///
    /// 校准期间、无可用样本或解算失败时返回 None，之前的平滑位置保持不变。
    pub fn flush(&mut self, now: DateTime<Utc>) -> Option<PositionUpdate> {
        if !self.locating {
            return None;
        }

        self.evict_stale(now);
        if self.calibration.is_calibrating() {
            return None;
        }

        let samples = self.buffered_samples();
        let ranges: Vec<RangeMeasurement> = samples.iter().map(RangeMeasurement::from).collect();

        let raw = match self.solver.try_solve(&ranges, self.config.preferred_method) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "no position this cycle");
                return None;
            }
        };

        let was_seeded = self.smoother.is_seeded();
        let (x, y) = self.smoother.smooth(raw.x, raw.y);
        if !was_seeded {
            info!(x, y, "smoother seeded from first solve");
        }

        let position = raw.with_xy(x, y);
        self.history.push(position.clone());
        trace!(raw = %raw, smoothed = %position, "position updated");

        Some(PositionUpdate {
            position,
            raw,
            samples,
        })
    }

    /// 周期处理：先检查校准到期，再处理缓冲区
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        if let Some(outcome) = self.poll_calibration(now) {
            events.push(EngineEvent::CalibrationFinished(outcome));
        }
        if let Some(update) = self.flush(now) {
            events.push(EngineEvent::PositionUpdated(update));
        }
        events
    }

    /// 最近一次平滑位置
    pub fn current_position(&self) -> Option<&PositionEstimate> {
        self.history.last()
    }

    pub fn history(&self) -> &PositionHistory {
        &self.history
    }
}
