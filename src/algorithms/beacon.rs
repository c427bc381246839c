/// 蓝牙信标定义和相关数据结构

use crate::error::{PositioningError, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use tracing::warn;

/// 标准 UUID 格式: XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX
const UUID_PATTERN: &str =
    r"^[0-9A-F]{8}-[0-9A-F]{4}-[0-9A-F]{4}-[0-9A-F]{4}-[0-9A-F]{12}$";

static UUID_REGEX: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(UUID_PATTERN));

/// iBeacon 身份标识（uuid + major + minor）
///
/// uuid 在构造时统一转为大写，比较时不区分大小写。
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeaconId {
    #[serde(deserialize_with = "deserialize_uuid")]
    pub uuid: String,
    pub major: u16,
    pub minor: u16,
}

impl BeaconId {
    /// 创建新的信标标识
    pub fn new(uuid: impl AsRef<str>, major: u16, minor: u16) -> Self {
        BeaconId {
            uuid: normalize_uuid(uuid.as_ref()),
            major,
            minor,
        }
    }
}

impl fmt::Display for BeaconId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.uuid, self.major, self.minor)
    }
}

fn normalize_uuid(uuid: &str) -> String {
    uuid.trim().to_uppercase()
}

fn deserialize_uuid<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(normalize_uuid(&raw))
}

/// 已配置的固定信标
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredBeacon {
    /// 信标身份
    #[serde(flatten)]
    pub id: BeaconId,
    /// 信标友好名称
    #[serde(default)]
    pub name: String,
    /// X 坐标（米）
    pub x: f64,
    /// Y 坐标（米）
    pub y: f64,
    /// 1 米处的参考信号强度 (dBm)
    #[serde(rename = "txPower")]
    pub tx_power: i16,
}

impl ConfiguredBeacon {
    /// 创建新的信标
    pub fn new(id: BeaconId, name: impl Into<String>, x: f64, y: f64, tx_power: i16) -> Self {
        ConfiguredBeacon {
            id,
            name: name.into(),
            x,
            y,
            tx_power,
        }
    }

    /// 获取信标的 2D 坐标
    pub fn coordinates(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// 计算与另一信标的欧几里得距离
    pub fn distance_to(&self, other: &ConfiguredBeacon) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// 校验信标配置
    ///
    /// uuid 不能为空，坐标必须是有限数值；uuid 格式不标准时只给出警告。
    pub fn validate(&self) -> Result<()> {
        if self.id.uuid.is_empty() {
            return Err(PositioningError::InvalidConfig(
                "beacon uuid must not be empty".to_string(),
            ));
        }
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(PositioningError::InvalidConfig(format!(
                "beacon {} has non-finite coordinates ({}, {})",
                self.id, self.x, self.y
            )));
        }

        let pattern = UUID_REGEX
            .as_ref()
            .map_err(|e| PositioningError::InvalidConfig(e.to_string()))?;
        if !pattern.is_match(&self.id.uuid) {
            warn!(beacon = %self.id, "uuid is not in canonical 8-4-4-4-12 form");
        }
        Ok(())
    }
}

/// 信标集合 - 引擎持有的只读配置快照
#[derive(Clone, Debug, Default)]
pub struct BeaconSet {
    /// 信标标识 -> 信标 的映射
    beacons: HashMap<BeaconId, ConfiguredBeacon>,
}

impl BeaconSet {
    /// 创建空的信标集合
    pub fn new() -> Self {
        BeaconSet {
            beacons: HashMap::new(),
        }
    }

    /// 从信标向量创建集合（不做校验）
    pub fn from_vec(beacons: Vec<ConfiguredBeacon>) -> Self {
        let mut set = BeaconSet::new();
        for beacon in beacons {
            set.add_beacon(beacon);
        }
        set
    }

    /// 校验后创建集合，任一信标无效即返回错误
    pub fn try_from_vec(beacons: Vec<ConfiguredBeacon>) -> Result<Self> {
        for beacon in &beacons {
            beacon.validate()?;
        }
        Ok(Self::from_vec(beacons))
    }

    /// 添加信标（相同标识会覆盖）
    pub fn add_beacon(&mut self, beacon: ConfiguredBeacon) {
        self.beacons.insert(beacon.id.clone(), beacon);
    }

    /// 查找与读数标识匹配的信标
    pub fn get(&self, id: &BeaconId) -> Option<&ConfiguredBeacon> {
        self.beacons.get(id)
    }

    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    /// 迭代信标标识和信标
    pub fn iter(&self) -> impl Iterator<Item = (&BeaconId, &ConfiguredBeacon)> {
        self.beacons.iter()
    }
}
