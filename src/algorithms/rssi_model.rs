/// RSSI 到距离转换模型
///
/// 对数距离路径损耗模型: d = 10^((txPower - RSSI) / (10 * n))

use crate::error::{PositioningError, Result};
use std::fmt;

/// 距离估计下限（米），接收端比 1 米参考点更近时直接返回该值
pub const MIN_DISTANCE: f64 = 0.1;
/// 距离估计上限（米），防止单个噪声读数主导后续加权
pub const MAX_DISTANCE: f64 = 100.0;
/// 默认路径损耗指数
pub const DEFAULT_PATH_LOSS_EXPONENT: f64 = 2.5;

/// 对数距离路径损耗模型
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PathLossModel {
    /// 路径损耗指数 n（与环境相关）
    n: f64,
}

impl PathLossModel {
    /// 创建模型，n 必须是正的有限数
    pub fn new(n: f64) -> Result<Self> {
        if !n.is_finite() || n <= 0.0 {
            return Err(PositioningError::InvalidConfig(format!(
                "path loss exponent must be a positive finite number, got {}",
                n
            )));
        }
        Ok(PathLossModel { n })
    }

    pub fn exponent(&self) -> f64 {
        self.n
    }

    /// 更新路径损耗指数；非法值会被拒绝并保留原值
    pub fn set_exponent(&mut self, n: f64) -> Result<()> {
        *self = PathLossModel::new(n)?;
        Ok(())
    }

    /// 根据平均 RSSI 和参考发射功率估计距离（米）
    ///
    /// - `rssi > tx_power` 时返回 [`MIN_DISTANCE`]
    /// - 结果非有限或非正时返回 `InvalidDistance`
    /// - 结果被限制在 `[MIN_DISTANCE, MAX_DISTANCE]`
    pub fn estimate(&self, rssi: i16, tx_power: i16) -> Result<f64> {
        if rssi > tx_power {
            return Ok(MIN_DISTANCE);
        }

        let exponent = (tx_power as f64 - rssi as f64) / (10.0 * self.n);
        let distance = 10_f64.powf(exponent);

        if !distance.is_finite() || distance <= 0.0 {
            return Err(PositioningError::InvalidDistance { rssi, tx_power });
        }

        Ok(distance.clamp(MIN_DISTANCE, MAX_DISTANCE))
    }

    /// 根据距离反推期望 RSSI（用于模拟信号源）
    pub fn distance_to_rssi(&self, distance: f64, tx_power: i16) -> f64 {
        if distance <= 0.0 {
            return f64::INFINITY;
        }
        tx_power as f64 - 10.0 * self.n * distance.log10()
    }
}

impl Default for PathLossModel {
    fn default() -> Self {
        PathLossModel {
            n: DEFAULT_PATH_LOSS_EXPONENT,
        }
    }
}

impl fmt::Display for PathLossModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d = 10^((txPower - RSSI) / (10 * {:.2}))", self.n)
    }
}
