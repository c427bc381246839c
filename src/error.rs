//! 定位引擎错误类型
//!
//! 大部分错误在引擎内部就地恢复（丢弃样本、本周期不输出位置），
//! 只有扫描端的持续故障（如蓝牙不可用）会传播到引擎之外。

use crate::algorithms::BeaconId;
use thiserror::Error;

/// 定位操作的结果类型
pub type Result<T> = std::result::Result<T, PositioningError>;

/// 定位引擎可能产生的错误
#[derive(Error, Debug)]
pub enum PositioningError {
    /// 读数没有对应的已配置信标（静默丢弃）
    #[error("beacon {0} is not configured")]
    UnmatchedBeacon(BeaconId),

    /// RSSI 推算出的距离无效（非有限值、非正数或超出范围）
    #[error("invalid distance estimate for rssi {rssi} dBm (txPower {tx_power} dBm)")]
    InvalidDistance { rssi: i16, tx_power: i16 },

    /// 可用样本不足，本周期不输出位置
    #[error("insufficient beacons: need at least {required}, got {available}")]
    InsufficientBeacons { required: usize, available: usize },

    /// 三边定位方程组奇异（信标共线或重合）
    #[error("degenerate beacon geometry (|det| = {det:e})")]
    DegenerateGeometry { det: f64 },

    /// 所有数值方法都没能给出有限解
    #[error("no finite position could be solved from {0} samples")]
    NoSolution(usize),

    /// 校准窗口结束时合格信标不足
    #[error("calibration underrun: {qualified} beacons qualified, {required} required")]
    CalibrationUnderrun { qualified: usize, required: usize },

    /// 配置值不合法
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// 配置 JSON 解析失败
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// 配置文件读取失败
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// 服务通道已关闭
    #[error("locating service channel closed")]
    ChannelClosed,

    /// 扫描端故障（蓝牙不可用等）
    #[error("scanner unavailable: {0}")]
    Scanner(String),
}

impl PositioningError {
    /// 是否属于引擎内部可恢复的错误
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PositioningError::UnmatchedBeacon(_)
                | PositioningError::InvalidDistance { .. }
                | PositioningError::InsufficientBeacons { .. }
                | PositioningError::DegenerateGeometry { .. }
                | PositioningError::NoSolution(_)
                | PositioningError::CalibrationUnderrun { .. }
        )
    }
}
