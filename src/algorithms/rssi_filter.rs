/// RSSI 滑动窗口平均
///
/// 每个信标保留最近 W 个原始 RSSI，返回四舍五入到整数 dBm 的算术平均。

use crate::algorithms::BeaconId;
use std::collections::{HashMap, VecDeque};

/// 默认窗口大小
pub const DEFAULT_RSSI_WINDOW: usize = 5;

/// 按信标分组的 RSSI 滑动窗口平均器
#[derive(Clone, Debug)]
pub struct RssiConditioner {
    window: usize,
    histories: HashMap<BeaconId, VecDeque<i16>>,
}

impl RssiConditioner {
    /// 创建平均器，窗口至少为 1
    pub fn new(window: usize) -> Self {
        RssiConditioner {
            window: window.max(1),
            histories: HashMap::new(),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// 记录一个原始 RSSI 并返回当前窗口平均值
    pub fn observe(&mut self, id: &BeaconId, raw_rssi: i16) -> i16 {
        let window = self.window;
        let history = self
            .histories
            .entry(id.clone())
            .or_insert_with(|| VecDeque::with_capacity(window));

        history.push_back(raw_rssi);
        while history.len() > window {
            history.pop_front();
        }

        let sum: i64 = history.iter().map(|&v| v as i64).sum();
        let mean = sum as f64 / history.len() as f64;
        // 半数向正无穷取整：-62.5 -> -62
        (mean + 0.5).floor() as i16
    }

    /// 某个信标当前保存的样本数
    pub fn history_len(&self, id: &BeaconId) -> usize {
        self.histories.get(id).map_or(0, VecDeque::len)
    }

    /// 已跟踪的信标数
    pub fn tracked(&self) -> usize {
        self.histories.len()
    }

    /// 清空所有信标的历史
    pub fn reset(&mut self) {
        self.histories.clear();
    }
}

impl Default for RssiConditioner {
    fn default() -> Self {
        Self::new(DEFAULT_RSSI_WINDOW)
    }
}
