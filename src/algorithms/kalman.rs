/// 标量卡尔曼滤波与二维位置平滑
///
/// 状态转移为单位阵（更新频率下近似静止）：
/// - 预测: x' = x, P' = P + R
/// - 校正: K = P' / (P' + Q), x = x' + K (z - x'), P = (1 - K) P'

use serde::{Deserialize, Serialize};

/// 默认过程噪声 R（偏向平滑）
pub const DEFAULT_PROCESS_NOISE: f64 = 0.01;
/// 默认测量噪声 Q（不信任单次解算）
pub const DEFAULT_MEASUREMENT_NOISE: f64 = 4.0;
/// 默认初始协方差
pub const DEFAULT_INITIAL_COVARIANCE: f64 = 1.0;

/// 滤波器噪声参数
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    /// 过程噪声 R
    pub process_noise: f64,
    /// 测量噪声 Q
    pub measurement_noise: f64,
    /// 播种时使用的初始协方差
    pub initial_covariance: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        SmootherConfig {
            process_noise: DEFAULT_PROCESS_NOISE,
            measurement_noise: DEFAULT_MEASUREMENT_NOISE,
            initial_covariance: DEFAULT_INITIAL_COVARIANCE,
        }
    }
}

/// 滤波器状态：未初始化或已播种
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FilterState {
    Uninitialized,
    Seeded { estimate: f64, covariance: f64 },
}

/// 一维卡尔曼滤波器
#[derive(Clone, Debug)]
pub struct KalmanFilter1D {
    /// 过程噪声 R
    pub r: f64,
    /// 测量噪声 Q
    pub q: f64,
    state: FilterState,
}

impl KalmanFilter1D {
    /// 创建未初始化的滤波器
    pub fn new(r: f64, q: f64) -> Self {
        KalmanFilter1D {
            r,
            q,
            state: FilterState::Uninitialized,
        }
    }

    /// 用初始估计和协方差播种
    pub fn initialize(&mut self, estimate: f64, covariance: f64) {
        self.state = FilterState::Seeded {
            estimate,
            covariance,
        };
    }

    /// 输入一个测量值，返回滤波后的值；未播种时返回 None
    pub fn update(&mut self, measurement: f64) -> Option<f64> {
        let FilterState::Seeded {
            estimate,
            covariance,
        } = self.state
        else {
            return None;
        };

        // 预测
        let x_pred = estimate;
        let p_pred = covariance + self.r;

        // 校正
        let k = p_pred / (p_pred + self.q);
        let x = x_pred + k * (measurement - x_pred);
        let p = (1.0 - k) * p_pred;

        self.state = FilterState::Seeded {
            estimate: x,
            covariance: p,
        };
        Some(x)
    }

    /// 回到未初始化状态
    pub fn reset(&mut self) {
        self.state = FilterState::Uninitialized;
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    pub fn is_seeded(&self) -> bool {
        matches!(self.state, FilterState::Seeded { .. })
    }

    /// 当前估计值
    pub fn estimate(&self) -> Option<f64> {
        match self.state {
            FilterState::Seeded { estimate, .. } => Some(estimate),
            FilterState::Uninitialized => None,
        }
    }
}

/// 二维位置平滑器（x、y 两个独立的标量滤波器）
#[derive(Clone, Debug)]
pub struct PositionSmoother {
    config: SmootherConfig,
    x_filter: KalmanFilter1D,
    y_filter: KalmanFilter1D,
}

impl PositionSmoother {
    pub fn new(config: SmootherConfig) -> Self {
        PositionSmoother {
            config,
            x_filter: KalmanFilter1D::new(config.process_noise, config.measurement_noise),
            y_filter: KalmanFilter1D::new(config.process_noise, config.measurement_noise),
        }
    }

    /// 用一个原始位置播种两个轴
    pub fn seed(&mut self, x: f64, y: f64) {
        self.x_filter.initialize(x, self.config.initial_covariance);
        self.y_filter.initialize(y, self.config.initial_covariance);
    }

    /// 平滑一个原始位置
    ///
    /// 未播种时以该位置自播种并原样返回。
    pub fn smooth(&mut self, x: f64, y: f64) -> (f64, f64) {
        if !self.is_seeded() {
            self.seed(x, y);
            return (x, y);
        }
        let sx = self.x_filter.update(x).unwrap_or(x);
        let sy = self.y_filter.update(y).unwrap_or(y);
        (sx, sy)
    }

    pub fn reset(&mut self) {
        self.x_filter.reset();
        self.y_filter.reset();
    }

    pub fn is_seeded(&self) -> bool {
        self.x_filter.is_seeded() && self.y_filter.is_seeded()
    }

    /// 当前平滑位置
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.x_filter.estimate()?, self.y_filter.estimate()?))
    }
}

impl Default for PositionSmoother {
    fn default() -> Self {
        Self::new(SmootherConfig::default())
    }
}
