/// 定位算法模块
///
/// 该模块提供室内定位引擎的各个叶子组件：
/// - 信标身份与配置快照
/// - RSSI 滑动窗口平均与对数距离模型
/// - 定位解算（三边定位、最小二乘、加权质心）
/// - 校准预热状态机与卡尔曼平滑

pub mod beacon;
pub mod calibration;
pub mod kalman;
pub mod location_algorithms;
pub mod results;
pub mod rssi_filter;
pub mod rssi_model;

pub use beacon::*;
pub use calibration::*;
pub use kalman::*;
pub use location_algorithms::*;
pub use results::*;
pub use rssi_filter::*;
pub use rssi_model::*;
