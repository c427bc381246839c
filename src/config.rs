//! 引擎配置
//!
//! 所有可调参数都是普通数值配置，持久化由配置端负责；这里只负责
//! JSON 解析、默认值和合法性校验。

use crate::algorithms::{
    ConfiguredBeacon, PositioningMethod, SmootherConfig, SolverConfig,
    DEFAULT_CALIBRATION_DURATION_MS, DEFAULT_MIN_CALIBRATION_BEACONS,
    DEFAULT_PATH_LOSS_EXPONENT, DEFAULT_RSSI_WINDOW,
};
use crate::error::{PositioningError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 样本过期时间（毫秒）
pub const DEFAULT_STALE_AFTER_MS: u64 = 5000;
/// 缓冲区处理周期（毫秒）
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;
/// 位置历史保留条数
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
/// 各时长配置的上限（毫秒，一天）
pub const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1000;

/// 定位引擎配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// RSSI 滑动窗口大小
    pub rssi_window: usize,
    /// 路径损耗指数 n
    pub path_loss_exponent: f64,
    /// 校准时长（毫秒）
    pub calibration_duration_ms: u64,
    /// 校准播种所需最少信标数
    pub min_calibration_beacons: usize,
    /// 样本过期时间（毫秒）
    pub stale_after_ms: u64,
    /// 缓冲区处理周期（毫秒）
    pub flush_interval_ms: u64,
    /// 位置历史保留条数
    pub history_limit: usize,
    /// 偏好的定位算法，None 为自动选择
    pub preferred_method: Option<PositioningMethod>,
    /// 平滑器噪声参数
    pub smoother: SmootherConfig,
    /// 解算器参数
    pub solver: SolverConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            rssi_window: DEFAULT_RSSI_WINDOW,
            path_loss_exponent: DEFAULT_PATH_LOSS_EXPONENT,
            calibration_duration_ms: DEFAULT_CALIBRATION_DURATION_MS,
            min_calibration_beacons: DEFAULT_MIN_CALIBRATION_BEACONS,
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            preferred_method: None,
            smoother: SmootherConfig::default(),
            solver: SolverConfig::default(),
        }
    }
}

impl EngineConfig {
    /// 校验配置的合理性
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: impl Into<String>) -> Result<()> {
            Err(PositioningError::InvalidConfig(msg.into()))
        }

        if self.rssi_window == 0 {
            return invalid("rssi_window must be at least 1");
        }
        if !self.path_loss_exponent.is_finite() || self.path_loss_exponent <= 0.0 {
            return invalid(format!(
                "path_loss_exponent must be positive, got {}",
                self.path_loss_exponent
            ));
        }
        if self.min_calibration_beacons == 0 {
            return invalid("min_calibration_beacons must be at least 1");
        }
        if self.flush_interval_ms == 0 {
            return invalid("flush_interval_ms must be positive");
        }
        if self.stale_after_ms == 0 {
            return invalid("stale_after_ms must be positive");
        }
        for (name, value) in [
            ("calibration_duration_ms", self.calibration_duration_ms),
            ("flush_interval_ms", self.flush_interval_ms),
            ("stale_after_ms", self.stale_after_ms),
        ] {
            if value > MAX_DURATION_MS {
                return invalid(format!(
                    "{} must not exceed {} ms, got {}",
                    name, MAX_DURATION_MS, value
                ));
            }
        }
        if self.history_limit == 0 {
            return invalid("history_limit must be at least 1");
        }

        let smoother = &self.smoother;
        for (name, value) in [
            ("smoother.process_noise", smoother.process_noise),
            ("smoother.measurement_noise", smoother.measurement_noise),
            ("smoother.initial_covariance", smoother.initial_covariance),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return invalid(format!("{} must be positive, got {}", name, value));
            }
        }

        if self.solver.max_iterations == 0 {
            return invalid("solver.max_iterations must be at least 1");
        }
        if !self.solver.convergence_threshold.is_finite() || self.solver.convergence_threshold <= 0.0
        {
            return invalid("solver.convergence_threshold must be positive");
        }
        let epsilon = self.solver.degeneracy_epsilon;
        if !epsilon.is_finite() || epsilon < 0.0 {
            return invalid(format!(
                "solver.degeneracy_epsilon must be finite and non-negative, got {}",
                epsilon
            ));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

/// 信标配置文件
///
/// ```json
/// {
///   "path_loss_exponent": 2.5,
///   "beacons": [
///     { "uuid": "...", "major": 1, "minor": 1, "x": 0.0, "y": 0.0, "txPower": -59 }
///   ],
///   "engine": { "calibration_duration_ms": 3000 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BeaconConfigFile {
    pub beacons: Vec<ConfiguredBeacon>,
    /// 覆盖 engine.path_loss_exponent
    #[serde(default)]
    pub path_loss_exponent: Option<f64>,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl BeaconConfigFile {
    /// 解析并校验配置
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut file: BeaconConfigFile = serde_json::from_str(json)?;
        if let Some(n) = file.path_loss_exponent {
            file.engine.path_loss_exponent = n;
        }
        file.engine.validate()?;
        for beacon in &file.beacons {
            beacon.validate()?;
        }
        Ok(file)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
