//! 异步定位服务
//!
//! 引擎由单个 tokio 任务独占，所有状态变更都串行发生在这个任务里：
//! - 扫描端通过有界通道推送读数批次
//! - 周期计时器触发缓冲区处理
//! - 校准截止计时器结束预热
//! - 控制命令（开始/停止/更新配置）
//!
//! 关闭读数通道或发送 `Shutdown` 会结束任务。

use crate::algorithms::{BeaconSet, ReadingBatch};
use crate::error::{PositioningError, Result};
use crate::positioning::{EngineEvent, PositioningEngine};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

/// 服务控制命令
#[derive(Debug)]
enum Command {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<()>),
    UpdateBeacons(BeaconSet, oneshot::Sender<()>),
    SetPathLossExponent(f64, oneshot::Sender<Result<()>>),
    Shutdown,
}

/// 运行中服务的句柄
pub struct ServiceHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<PositioningEngine>,
}

impl ServiceHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| PositioningError::ChannelClosed)?;
        rx.await.map_err(|_| PositioningError::ChannelClosed)
    }

    /// 开始定位会话
    pub async fn start_locating(&self) -> Result<()> {
        self.request(Command::Start).await?
    }

    /// 停止定位会话
    pub async fn stop_locating(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// 替换信标配置快照
    pub async fn update_beacons(&self, beacons: BeaconSet) -> Result<()> {
        self.request(|tx| Command::UpdateBeacons(beacons, tx)).await
    }

    /// 更新路径损耗指数
    pub async fn set_path_loss_exponent(&self, n: f64) -> Result<()> {
        self.request(|tx| Command::SetPathLossExponent(n, tx)).await?
    }

    /// 结束服务并取回引擎
    pub async fn shutdown(self) -> Result<PositioningEngine> {
        // 任务可能已因读数通道关闭而退出
        let _ = self.commands.send(Command::Shutdown).await;
        self.task
            .await
            .map_err(|_| PositioningError::ChannelClosed)
    }
}

/// 启动定位服务任务
pub fn spawn(
    engine: PositioningEngine,
    readings: mpsc::Receiver<ReadingBatch>,
    events: mpsc::Sender<EngineEvent>,
) -> ServiceHandle {
    let (commands, command_rx) = mpsc::channel(16);
    let task = tokio::spawn(run(engine, readings, command_rx, events));
    ServiceHandle { commands, task }
}

async fn emit(events: &mpsc::Sender<EngineEvent>, event: EngineEvent) {
    if events.send(event).await.is_err() {
        debug!("event receiver dropped");
    }
}

async fn run(
    mut engine: PositioningEngine,
    mut readings: mpsc::Receiver<ReadingBatch>,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<EngineEvent>,
) -> PositioningEngine {
    let period = Duration::from_millis(engine.config().flush_interval_ms);
    let mut flush = time::interval(period);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(flush_ms = period.as_millis() as u64, "locating service running");

    loop {
        let calibration_wait = engine
            .calibration_deadline()
            .map(|deadline| (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO));

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Start(reply)) => {
                    let was_locating = engine.is_locating();
                    let result = engine.start_locating(Utc::now());
                    if result.is_ok() && !was_locating {
                        flush.reset();
                        emit(&events, EngineEvent::SessionStarted).await;
                    }
                    let _ = reply.send(result);
                }
                Some(Command::Stop(reply)) => {
                    let was_locating = engine.is_locating();
                    engine.stop_locating();
                    if was_locating {
                        emit(&events, EngineEvent::SessionStopped).await;
                    }
                    let _ = reply.send(());
                }
                Some(Command::UpdateBeacons(beacons, reply)) => {
                    engine.update_beacons(beacons);
                    let _ = reply.send(());
                }
                Some(Command::SetPathLossExponent(n, reply)) => {
                    let _ = reply.send(engine.set_path_loss_exponent(n));
                }
                Some(Command::Shutdown) | None => break,
            },
            batch = readings.recv() => match batch {
                Some(batch) => {
                    let samples = engine.ingest(&batch);
                    if !samples.is_empty() {
                        emit(&events, EngineEvent::BeaconsDetected(samples)).await;
                    }
                }
                None => {
                    info!("reading channel closed");
                    break;
                }
            },
            _ = flush.tick() => {
                for event in engine.tick(Utc::now()) {
                    emit(&events, event).await;
                }
            }
            _ = async {
                match calibration_wait {
                    Some(wait) => time::sleep(wait).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                if let Some(outcome) = engine.finish_calibration() {
                    emit(&events, EngineEvent::CalibrationFinished(outcome)).await;
                }
            }
        }
    }

    if engine.is_locating() {
        engine.stop_locating();
        emit(&events, EngineEvent::SessionStopped).await;
    }
    info!("locating service stopped");
    engine
}
