//! beaconloc - 基于 iBeacon RSSI 的室内定位引擎
//!
//! - [`algorithms`]: RSSI 平滑、测距、定位解算、校准与卡尔曼平滑
//! - [`positioning`]: 同步定位引擎
//! - [`service`]: tokio 定位服务
//! - [`config`]: 引擎与信标配置

pub mod algorithms;
pub mod config;
pub mod error;
pub mod ibeacon;
pub mod positioning;
#[cfg(feature = "ble")]
pub mod scanner;
pub mod service;
pub mod simulation;

pub use error::{PositioningError, Result};
