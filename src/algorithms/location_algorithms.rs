/// 多种定位算法实现
///
/// 支持：
/// - 线性三边定位（前三个样本，2x2 方程组）
/// - 非线性最小二乘（梯度迭代，三边定位退化时的回退）
/// - 加权质心（1~2 个样本，或以上方法都失败时）

use crate::algorithms::{BeaconId, ConfiguredBeacon, PositionEstimate, PositioningMethod};
use crate::error::{PositioningError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

// ============================================================================
// 信号测量数据结构
// ============================================================================

/// 扫描端上报的单个原始读数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    /// 信标身份
    pub id: BeaconId,
    /// 原始 RSSI (dBm)
    pub rssi: i16,
    /// 到达时间
    pub timestamp: DateTime<Utc>,
}

impl RawReading {
    pub fn new(id: BeaconId, rssi: i16, timestamp: DateTime<Utc>) -> Self {
        RawReading { id, rssi, timestamp }
    }

    /// 以当前时间创建读数
    pub fn now(id: BeaconId, rssi: i16) -> Self {
        Self::new(id, rssi, Utc::now())
    }
}

/// 扫描端一次回调送来的一批读数
pub type ReadingBatch = Vec<RawReading>;

/// 经过平均和测距后的样本
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConditionedSample {
    /// 信标身份
    pub id: BeaconId,
    /// 信标名称
    pub name: String,
    /// 窗口平均后的 RSSI (dBm)
    pub rssi: i16,
    /// 估计距离（米），保证在 [0.1, 100] 内
    pub distance: f64,
    /// 信标 X 坐标
    pub x: f64,
    /// 信标 Y 坐标
    pub y: f64,
    /// 读数时间
    pub timestamp: DateTime<Utc>,
}

impl ConditionedSample {
    pub fn new(
        beacon: &ConfiguredBeacon,
        rssi: i16,
        distance: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        ConditionedSample {
            id: beacon.id.clone(),
            name: beacon.name.clone(),
            rssi,
            distance,
            x: beacon.x,
            y: beacon.y,
            timestamp,
        }
    }

    /// 转换为解算器输入
    pub fn range(&self) -> RangeMeasurement {
        RangeMeasurement::new(self.x, self.y, self.distance)
    }
}

/// 解算器输入：信标坐标 + 估计距离
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeMeasurement {
    pub x: f64,
    pub y: f64,
    pub distance: f64,
}

impl RangeMeasurement {
    pub fn new(x: f64, y: f64, distance: f64) -> Self {
        RangeMeasurement { x, y, distance }
    }

    fn is_usable(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.distance.is_finite() && self.distance > 0.0
    }
}

impl From<&ConditionedSample> for RangeMeasurement {
    fn from(sample: &ConditionedSample) -> Self {
        sample.range()
    }
}

// ============================================================================
// 解算器参数
// ============================================================================

/// 最小二乘最大迭代次数
pub const DEFAULT_MAX_ITERATIONS: usize = 10;
/// 收敛阈值（米）
pub const DEFAULT_CONVERGENCE_THRESHOLD: f64 = 0.01;
/// 行列式奇异阈值
pub const DEFAULT_DEGENERACY_EPSILON: f64 = 1e-10;
/// 估计点与信标距离小于该值时跳过该信标
const MIN_GRADIENT_DISTANCE: f64 = 1e-4;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iterations: usize,
    pub convergence_threshold: f64,
    pub degeneracy_epsilon: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            convergence_threshold: DEFAULT_CONVERGENCE_THRESHOLD,
            degeneracy_epsilon: DEFAULT_DEGENERACY_EPSILON,
        }
    }
}

// ============================================================================
// 定位解算器
// ============================================================================

/// 定位解算器 - 按样本数量和几何质量选择算法
#[derive(Clone, Debug, Default)]
pub struct PositionSolver {
    config: SolverConfig,
}

impl PositionSolver {
    pub fn new(config: SolverConfig) -> Self {
        PositionSolver { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// 解算位置，失败时返回 None
    ///
    /// `preferred` 为偏好算法：`WeightedCentroid` 强制质心，
    /// `LeastSquares` 跳过线性三边定位，其余按自动策略。
    pub fn solve(
        &self,
        samples: &[RangeMeasurement],
        preferred: Option<PositioningMethod>,
    ) -> Option<PositionEstimate> {
        match self.try_solve(samples, preferred) {
            Ok(estimate) => Some(estimate),
            Err(e) => {
                debug!(error = %e, "position solve failed");
                None
            }
        }
    }

    /// 解算位置，返回失败原因
    pub fn try_solve(
        &self,
        samples: &[RangeMeasurement],
        preferred: Option<PositioningMethod>,
    ) -> Result<PositionEstimate> {
        let usable: Vec<RangeMeasurement> =
            samples.iter().copied().filter(RangeMeasurement::is_usable).collect();

        if usable.is_empty() {
            return Err(PositioningError::InsufficientBeacons {
                required: 1,
                available: 0,
            });
        }

        let allow_multilateration = preferred != Some(PositioningMethod::WeightedCentroid);

        if allow_multilateration && usable.len() >= 3 {
            if preferred != Some(PositioningMethod::LeastSquares) {
                match self.trilaterate(&usable) {
                    Ok((x, y)) => {
                        return Ok(Self::estimate(&usable, x, y, PositioningMethod::Trilateration));
                    }
                    Err(e) => debug!(error = %e, "trilateration rejected, falling back to least squares"),
                }
            }

            if let Some((x, y)) = self.least_squares(&usable) {
                return Ok(Self::estimate(&usable, x, y, PositioningMethod::LeastSquares));
            }
            debug!("least squares produced a non-finite result, falling back to centroid");
        }

        match Self::weighted_centroid(&usable) {
            Some((x, y)) => Ok(Self::estimate(
                &usable,
                x,
                y,
                PositioningMethod::WeightedCentroid,
            )),
            None => Err(PositioningError::NoSolution(usable.len())),
        }
    }

    /// 线性三边定位
    ///
    /// 以第一个样本为参考，用前三个样本的圆方程相减得到 2x2 线性方程组。
    pub fn trilaterate(&self, samples: &[RangeMeasurement]) -> Result<(f64, f64)> {
        if samples.len() < 3 {
            return Err(PositioningError::InsufficientBeacons {
                required: 3,
                available: samples.len(),
            });
        }

        let p0 = samples[0];
        let p1 = samples[1];
        let p2 = samples[2];

        let a11 = 2.0 * (p1.x - p0.x);
        let a12 = 2.0 * (p1.y - p0.y);
        let a21 = 2.0 * (p2.x - p0.x);
        let a22 = 2.0 * (p2.y - p0.y);

        let b1 = Self::linearized_rhs(p0, p1);
        let b2 = Self::linearized_rhs(p0, p2);

        let det = a11 * a22 - a12 * a21;
        if !det.is_finite() || det.abs() < self.config.degeneracy_epsilon {
            return Err(PositioningError::DegenerateGeometry { det });
        }

        let x = (b1 * a22 - b2 * a12) / det;
        let y = (a11 * b2 - a21 * b1) / det;

        if !x.is_finite() || !y.is_finite() {
            return Err(PositioningError::NoSolution(3));
        }
        Ok((x, y))
    }

    /// 圆方程相减后的右端项: d0² − di² − x0² + xi² − y0² + yi²
    fn linearized_rhs(reference: RangeMeasurement, other: RangeMeasurement) -> f64 {
        reference.distance * reference.distance - other.distance * other.distance
            - reference.x * reference.x
            + other.x * other.x
            - reference.y * reference.y
            + other.y * other.y
    }

    /// 非线性最小二乘（梯度迭代）
    ///
    /// 从加权质心出发，步长 1/(n + i)，移动量小于收敛阈值时提前结束。
    pub fn least_squares(&self, samples: &[RangeMeasurement]) -> Option<(f64, f64)> {
        if samples.is_empty() {
            return None;
        }

        let (mut x, mut y) = Self::weighted_centroid(samples).unwrap_or((0.0, 0.0));
        let n = samples.len();

        for iteration in 0..self.config.max_iterations {
            let mut gradient_x = 0.0;
            let mut gradient_y = 0.0;

            for sample in samples {
                let dx = x - sample.x;
                let dy = y - sample.y;
                let range = (dx * dx + dy * dy).sqrt();
                if range <= MIN_GRADIENT_DISTANCE {
                    continue;
                }
                let residual = range - sample.distance;
                gradient_x += residual * dx / range;
                gradient_y += residual * dy / range;
            }

            let step = 1.0 / (n + iteration) as f64;
            let move_x = step * gradient_x;
            let move_y = step * gradient_y;
            x -= move_x;
            y -= move_y;

            let moved = (move_x * move_x + move_y * move_y).sqrt();
            if moved < self.config.convergence_threshold {
                trace!(iteration = iteration + 1, "least squares converged");
                break;
            }
        }

        (x.is_finite() && y.is_finite()).then_some((x, y))
    }

    /// 加权质心，权重为 1/d²；只有一个样本时返回该信标坐标
    pub fn weighted_centroid(samples: &[RangeMeasurement]) -> Option<(f64, f64)> {
        match samples {
            [] => None,
            [only] => Some((only.x, only.y)),
            _ => {
                let mut total_weight = 0.0;
                let mut weighted_x = 0.0;
                let mut weighted_y = 0.0;

                for sample in samples {
                    let weight = 1.0 / (sample.distance * sample.distance);
                    total_weight += weight;
                    weighted_x += sample.x * weight;
                    weighted_y += sample.y * weight;
                }

                if !total_weight.is_finite() || total_weight < 1e-10 {
                    return None;
                }

                let x = weighted_x / total_weight;
                let y = weighted_y / total_weight;
                (x.is_finite() && y.is_finite()).then_some((x, y))
            }
        }
    }

    /// 平均绝对残差：|估计点到信标距离 − 测量距离| 的均值
    pub fn residual(samples: &[RangeMeasurement], x: f64, y: f64) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let total: f64 = samples
            .iter()
            .map(|s| {
                let range = ((x - s.x).powi(2) + (y - s.y).powi(2)).sqrt();
                (range - s.distance).abs()
            })
            .sum();
        total / samples.len() as f64
    }

    fn estimate(
        samples: &[RangeMeasurement],
        x: f64,
        y: f64,
        method: PositioningMethod,
    ) -> PositionEstimate {
        let residual = Self::residual(samples, x, y);
        PositionEstimate::new(x, y, method, Some(residual), samples.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_to(x: f64, y: f64, true_x: f64, true_y: f64) -> RangeMeasurement {
        let d = ((x - true_x).powi(2) + (y - true_y).powi(2)).sqrt();
        RangeMeasurement::new(x, y, d)
    }

    #[test]
    fn test_trilateration_exact() {
        let solver = PositionSolver::default();
        let samples = vec![
            range_to(0.0, 0.0, 3.0, 4.0),
            range_to(10.0, 0.0, 3.0, 4.0),
            range_to(0.0, 10.0, 3.0, 4.0),
        ];
        let result = solver.solve(&samples, None).unwrap();
        assert_eq!(result.method, PositioningMethod::Trilateration);
        assert!((result.x - 3.0).abs() < 1e-9);
        assert!((result.y - 4.0).abs() < 1e-9);
        assert!(result.residual.unwrap() < 1e-9);
    }

    #[test]
    fn test_collinear_falls_back_to_least_squares() {
        let solver = PositionSolver::default();
        let samples = vec![
            range_to(0.0, 0.0, 1.0, 1.0),
            range_to(1.0, 0.0, 1.0, 1.0),
            range_to(2.0, 0.0, 1.0, 1.0),
        ];
        assert!(matches!(
            solver.trilaterate(&samples),
            Err(PositioningError::DegenerateGeometry { .. })
        ));
        let result = solver.solve(&samples, None).unwrap();
        assert_eq!(result.method, PositioningMethod::LeastSquares);
        assert!(result.is_finite());
    }

    #[test]
    fn test_single_sample_centroid() {
        let solver = PositionSolver::default();
        let result = solver
            .solve(&[RangeMeasurement::new(5.0, 7.0, 2.0)], None)
            .unwrap();
        assert_eq!(result.method, PositioningMethod::WeightedCentroid);
        assert_eq!(result.xy(), (5.0, 7.0));
    }

    #[test]
    fn test_two_samples_weighted_toward_closer() {
        let samples = vec![
            RangeMeasurement::new(0.0, 0.0, 1.0),
            RangeMeasurement::new(10.0, 0.0, 3.0),
        ];
        let (x, y) = PositionSolver::weighted_centroid(&samples).unwrap();
        // 权重 1 和 1/9
        assert!((x - 1.0).abs() < 1e-9);
        assert_eq!(y, 0.0);
    }

    #[test]
    fn test_empty_and_invalid_samples() {
        let solver = PositionSolver::default();
        assert!(solver.solve(&[], None).is_none());
        let invalid = [RangeMeasurement::new(1.0, 1.0, f64::NAN)];
        assert!(matches!(
            solver.try_solve(&invalid, None),
            Err(PositioningError::InsufficientBeacons { available: 0, .. })
        ));
    }

    #[test]
    fn test_preferred_method() {
        let solver = PositionSolver::default();
        let samples = vec![
            range_to(0.0, 0.0, 3.0, 4.0),
            range_to(10.0, 0.0, 3.0, 4.0),
            range_to(0.0, 10.0, 3.0, 4.0),
        ];
        let centroid = solver
            .solve(&samples, Some(PositioningMethod::WeightedCentroid))
            .unwrap();
        assert_eq!(centroid.method, PositioningMethod::WeightedCentroid);

        let ls = solver
            .solve(&samples, Some(PositioningMethod::LeastSquares))
            .unwrap();
        assert_eq!(ls.method, PositioningMethod::LeastSquares);
        assert!(ls.residual.unwrap() < centroid.residual.unwrap());
    }

    #[test]
    fn test_least_squares_improves_on_centroid() {
        let solver = PositionSolver::new(SolverConfig {
            max_iterations: 20,
            ..SolverConfig::default()
        });
        let samples = vec![
            range_to(0.0, 0.0, 2.0, 6.0),
            range_to(8.0, 0.0, 2.0, 6.0),
            range_to(8.0, 8.0, 2.0, 6.0),
            range_to(0.0, 8.0, 2.0, 6.0),
        ];
        let (cx, cy) = PositionSolver::weighted_centroid(&samples).unwrap();
        let (x, y) = solver.least_squares(&samples).unwrap();
        assert!(
            PositionSolver::residual(&samples, x, y) < PositionSolver::residual(&samples, cx, cy)
        );
    }
}
