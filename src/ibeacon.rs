//! iBeacon 广播帧解析
//!
//! 帧格式（Apple 厂商数据）：
//! `4C 00 | 02 15 | UUID(16) | major(2, BE) | minor(2, BE) | txPower(1, i8)`
//!
//! 部分平台把公司 ID 单独剥离，只留下 `02 15` 开头的负载，两种形式都支持。

use crate::algorithms::{BeaconId, RawReading, ReadingBatch};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;

/// Apple 公司 ID
pub const APPLE_COMPANY_ID: u16 = 0x004C;

const IBEACON_MARKER: [u8; 2] = [0x02, 0x15];
/// 标记之后的负载长度：UUID 16 + major 2 + minor 2 + txPower 1
const PAYLOAD_LEN: usize = 21;

/// 解析出的 iBeacon 帧
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IBeaconFrame {
    pub id: BeaconId,
    /// 帧内携带的 1 米参考功率
    pub tx_power: i8,
}

/// 在原始广播数据中查找 iBeacon 帧
///
/// 先找带 `4C 00` 公司前缀的标准形式，找不到再找只有 `02 15` 标记的形式。
pub fn parse_advertisement(data: &[u8]) -> Option<IBeaconFrame> {
    let standard = [0x4C, 0x00, IBEACON_MARKER[0], IBEACON_MARKER[1]];
    find_frame(data, &standard).or_else(|| find_frame(data, &IBEACON_MARKER))
}

/// 解析已去掉公司 ID 的厂商数据（btleplug 的 `manufacturer_data` 值）
pub fn parse_manufacturer_payload(payload: &[u8]) -> Option<IBeaconFrame> {
    if payload.len() < IBEACON_MARKER.len() + PAYLOAD_LEN || payload[..2] != IBEACON_MARKER {
        return None;
    }
    decode_payload(&payload[2..])
}

fn find_frame(data: &[u8], prefix: &[u8]) -> Option<IBeaconFrame> {
    let frame_len = prefix.len() + PAYLOAD_LEN;
    if data.len() < frame_len {
        return None;
    }
    (0..=data.len() - frame_len)
        .find(|&i| &data[i..i + prefix.len()] == prefix)
        .and_then(|i| decode_payload(&data[i + prefix.len()..]))
}

fn decode_payload(payload: &[u8]) -> Option<IBeaconFrame> {
    if payload.len() < PAYLOAD_LEN {
        return None;
    }

    let uuid = format_uuid(&payload[..16]);
    let major = u16::from_be_bytes([payload[16], payload[17]]);
    let minor = u16::from_be_bytes([payload[18], payload[19]]);
    let tx_power = payload[20] as i8;

    Some(IBeaconFrame {
        id: BeaconId::new(uuid, major, minor),
        tx_power,
    })
}

/// 16 字节格式化为 8-4-4-4-12 大写 UUID
fn format_uuid(bytes: &[u8]) -> String {
    let mut uuid = String::with_capacity(36);
    for (i, byte) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            uuid.push('-');
        }
        uuid.push_str(&format!("{:02X}", byte));
    }
    uuid
}

// ============================================================================
// 广播事件追踪
// ============================================================================

/// 触发读取的广播事件类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdvertisementKind {
    /// 收到一条新的厂商数据广播
    Advertisement,
    /// 外设属性变化（RSSI、名称等），可能只是缓存属性被刷新
    PropertiesUpdated,
}

/// 把扫描端的广播事件转换为读数批次
///
/// 只在事件到达时产生读数，扫描端缓存的外设列表不会被重复上报。
/// 属性更新事件的 RSSI 和厂商数据都与上次相同时视为同一条广播并跳过；
/// 同一批次内每个信标只保留最新读数。
#[derive(Debug)]
pub struct AdvertisementTracker<K> {
    last_seen: HashMap<K, (i16, Vec<u8>)>,
    pending: Vec<RawReading>,
}

impl<K: Eq + Hash> AdvertisementTracker<K> {
    pub fn new() -> Self {
        AdvertisementTracker {
            last_seen: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// 处理一次广播事件，产生新读数时返回 true
    pub fn observe(
        &mut self,
        peripheral: K,
        kind: AdvertisementKind,
        rssi: Option<i16>,
        manufacturer_data: &HashMap<u16, Vec<u8>>,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let Some(rssi) = rssi else {
            return false;
        };
        let Some(payload) = manufacturer_data.get(&APPLE_COMPANY_ID) else {
            return false;
        };
        let Some(frame) = parse_manufacturer_payload(payload) else {
            return false;
        };

        let unchanged = self
            .last_seen
            .get(&peripheral)
            .is_some_and(|(last_rssi, last_payload)| *last_rssi == rssi && last_payload == payload);
        if kind == AdvertisementKind::PropertiesUpdated && unchanged {
            return false;
        }
        self.last_seen.insert(peripheral, (rssi, payload.clone()));

        let reading = RawReading::new(frame.id, rssi, timestamp);
        match self.pending.iter_mut().find(|r| r.id == reading.id) {
            Some(existing) => *existing = reading,
            None => self.pending.push(reading),
        }
        true
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// 取出当前批次
    pub fn take_batch(&mut self) -> ReadingBatch {
        std::mem::take(&mut self.pending)
    }

    /// 外设消失时丢弃其记录
    pub fn forget(&mut self, peripheral: &K) {
        self.last_seen.remove(peripheral);
    }
}

impl<K: Eq + Hash> Default for AdvertisementTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}
