#![cfg(feature = "ble")]

use beaconloc::scanner::BleScanner;
use beaconloc::PositioningError;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// 真实蓝牙扫描冒烟测试
/// 要求：有适配器时扫描 5 秒并打印收到的 iBeacon 读数；无适配器时跳过
#[tokio::test]
async fn test_scan_ibeacon_readings() {
    println!("\n========== iBeacon 扫描测试 ==========\n");

    let (tx, mut rx) = mpsc::channel(32);
    let scanner = BleScanner::new(Duration::from_millis(500));
    let scan = tokio::spawn(async move { scanner.run(tx).await });

    let mut batches = 0;
    let _ = timeout(Duration::from_secs(5), async {
        while let Some(batch) = rx.recv().await {
            batches += 1;
            println!("{:<5} {:<45} {:<10}", "批次", "信标", "RSSI(dBm)");
            println!("{}", "=".repeat(65));
            for reading in &batch {
                println!("{:<5} {:<45} {:<10}", batches, reading.id, reading.rssi);
            }
        }
    })
    .await;

    // 关闭接收端，扫描循环在下一次发送时退出
    drop(rx);

    match timeout(Duration::from_secs(5), scan).await {
        Ok(Ok(Err(PositioningError::Scanner(e)))) => {
            println!("⚠ 蓝牙不可用，测试跳过: {}", e);
        }
        Ok(Ok(result)) => assert!(result.is_ok(), "扫描失败: {:?}", result),
        Ok(Err(e)) => panic!("扫描任务异常: {}", e),
        Err(_) => println!("⚠ 未扫描到 iBeacon，扫描仍在等待"),
    }

    println!("✓ 共收到 {} 个读数批次", batches);
}
