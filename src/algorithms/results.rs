/// 定位结果数据结构
///
/// 包含定位输出的坐标、所用算法和残差等元数据

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// 实际产生结果的定位算法
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositioningMethod {
    /// 线性三边定位
    Trilateration,
    /// 非线性最小二乘
    LeastSquares,
    /// 加权质心
    WeightedCentroid,
}

impl PositioningMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositioningMethod::Trilateration => "trilateration",
            PositioningMethod::LeastSquares => "least_squares",
            PositioningMethod::WeightedCentroid => "weighted_centroid",
        }
    }
}

impl fmt::Display for PositioningMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 定位结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    /// X 坐标（米）
    pub x: f64,
    /// Y 坐标（米）
    pub y: f64,
    /// 使用的算法
    pub method: PositioningMethod,
    /// 平均绝对残差（米）
    pub residual: Option<f64>,
    /// 参与定位的信标数量
    pub beacon_count: usize,
    /// 时间戳
    pub timestamp: DateTime<Utc>,
}

impl PositionEstimate {
    /// 创建新的定位结果
    pub fn new(
        x: f64,
        y: f64,
        method: PositioningMethod,
        residual: Option<f64>,
        beacon_count: usize,
    ) -> Self {
        PositionEstimate {
            x,
            y,
            method,
            residual,
            beacon_count,
            timestamp: Utc::now(),
        }
    }

    /// 替换坐标，保留其余元数据（平滑后使用）
    pub fn with_xy(&self, x: f64, y: f64) -> Self {
        PositionEstimate {
            x,
            y,
            ..self.clone()
        }
    }

    /// 获取 2D 坐标
    pub fn xy(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// 坐标是否为有限值
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// 与另一结果的 2D 距离
    pub fn distance_to(&self, other: &PositionEstimate) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl fmt::Display for PositionEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}) [{}", self.x, self.y, self.method)?;
        if let Some(residual) = self.residual {
            write!(f, ", ±{:.2}m", residual)?;
        }
        write!(f, "]")
    }
}

/// 定位结果序列（有界，保留最近的结果）
#[derive(Clone, Debug)]
pub struct PositionHistory {
    limit: usize,
    results: VecDeque<PositionEstimate>,
}

impl PositionHistory {
    /// 创建最多保留 `limit` 条记录的序列
    pub fn new(limit: usize) -> Self {
        PositionHistory {
            limit: limit.max(1),
            results: VecDeque::new(),
        }
    }

    /// 添加结果，超出上限时丢弃最旧的
    pub fn push(&mut self, result: PositionEstimate) {
        self.results.push_back(result);
        while self.results.len() > self.limit {
            self.results.pop_front();
        }
    }

    pub fn last(&self) -> Option<&PositionEstimate> {
        self.results.back()
    }

    /// 最近 n 条结果，按时间先后排列
    pub fn recent(&self, n: usize) -> Vec<PositionEstimate> {
        let skip = self.results.len().saturating_sub(n);
        self.results.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }
}

impl Default for PositionHistory {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_calculation() {
        let r1 = PositionEstimate::new(0.0, 0.0, PositioningMethod::Trilateration, None, 3);
        let r2 = PositionEstimate::new(3.0, 4.0, PositioningMethod::Trilateration, None, 3);
        assert_eq!(r1.distance_to(&r2), 5.0);
    }

    #[test]
    fn test_method_serializes_snake_case() {
        let json = serde_json::to_string(&PositioningMethod::WeightedCentroid).unwrap();
        assert_eq!(json, "\"weighted_centroid\"");
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = PositionHistory::new(2);
        for i in 0..3 {
            history.push(PositionEstimate::new(
                i as f64,
                0.0,
                PositioningMethod::LeastSquares,
                Some(0.5),
                3,
            ));
        }
        assert_eq!(history.len(), 2);
        assert_eq!(history.last().map(|p| p.x), Some(2.0));
        let recent: Vec<f64> = history.recent(5).iter().map(|p| p.x).collect();
        assert_eq!(recent, vec![1.0, 2.0]);
    }
}
