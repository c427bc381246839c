//! btleplug 蓝牙扫描适配器（feature = "ble"）
//!
//! 订阅第一个蓝牙适配器的事件流，只在收到广播或属性变化事件时读取 RSSI，
//! 按固定间隔把累积的读数作为一个批次推送给定位服务。

use crate::algorithms::ReadingBatch;
use crate::error::{PositioningError, Result};
use crate::ibeacon::{AdvertisementKind, AdvertisementTracker};
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager as PlatformManager, PeripheralId};
use chrono::Utc;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 默认批次间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 蓝牙扫描器
pub struct BleScanner {
    poll_interval: Duration,
}

impl BleScanner {
    pub fn new(poll_interval: Duration) -> Self {
        BleScanner { poll_interval }
    }

    /// 持续扫描直到读数通道关闭
    ///
    /// 适配器不可用时返回 `Scanner` 错误，这是唯一会传出引擎范围的故障。
    pub async fn run(&self, readings: mpsc::Sender<ReadingBatch>) -> Result<()> {
        let manager = PlatformManager::new()
            .await
            .map_err(|e| PositioningError::Scanner(format!("蓝牙管理器初始化失败: {}", e)))?;

        let adapter = manager
            .adapters()
            .await
            .map_err(|e| PositioningError::Scanner(format!("获取蓝牙适配器失败: {}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| PositioningError::Scanner("未找到蓝牙适配器".to_string()))?;

        let mut events = adapter
            .events()
            .await
            .map_err(|e| PositioningError::Scanner(format!("订阅蓝牙事件失败: {}", e)))?;

        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| PositioningError::Scanner(format!("启动蓝牙扫描失败: {}", e)))?;
        info!("ble scan started");

        let mut tracker = AdvertisementTracker::new();
        let mut flush = time::interval(self.poll_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else {
                        warn!("ble event stream ended");
                        break;
                    };
                    observe_event(&adapter, &mut tracker, event).await;
                }
                _ = flush.tick() => {
                    if !tracker.has_pending() {
                        continue;
                    }
                    if readings.send(tracker.take_batch()).await.is_err() {
                        info!("reading channel closed, stopping scan");
                        break;
                    }
                }
            }
        }

        if let Err(e) = adapter.stop_scan().await {
            warn!(error = %e, "failed to stop ble scan");
        }
        Ok(())
    }
}

async fn observe_event(
    adapter: &Adapter,
    tracker: &mut AdvertisementTracker<PeripheralId>,
    event: CentralEvent,
) {
    let (id, kind, advertised) = match event {
        CentralEvent::ManufacturerDataAdvertisement {
            id,
            manufacturer_data,
        } => (id, AdvertisementKind::Advertisement, Some(manufacturer_data)),
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
            (id, AdvertisementKind::PropertiesUpdated, None)
        }
        CentralEvent::DeviceDisconnected(id) => {
            tracker.forget(&id);
            return;
        }
        _ => return,
    };

    let properties = match adapter.peripheral(&id).await {
        Ok(peripheral) => match peripheral.properties().await {
            Ok(Some(properties)) => properties,
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "failed to read peripheral properties");
                return;
            }
        },
        Err(e) => {
            debug!(error = %e, "peripheral vanished before it could be read");
            return;
        }
    };

    let manufacturer_data = advertised.unwrap_or(properties.manufacturer_data);
    tracker.observe(id, kind, properties.rssi, &manufacturer_data, Utc::now());
}

impl Default for BleScanner {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}
