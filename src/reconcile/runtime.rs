//! 观察循环的 tokio 驱动
//!
//! `ObservationLoop` 自身不读时钟也不睡眠，这里把它接到 tokio 的计时器和通道上：
//! 宿主通过 `LoopHandle` 转发变更批次和宿主事件，驱动在下一个截止时间醒来调用 `poll`。
//! DOM 句柄基于 `Rc`，驱动只能运行在 current-thread 运行时或 `LocalSet` 中。

use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::reconcile::error::{ReconcileError, ReconcileResult};
use crate::reconcile::observer::{
    HostEvent, LoopState, MutationRecord, ObservationLoop, ReadyState,
};

/// 宿主一侧的句柄
///
/// 句柄被丢弃时驱动随之停止。
pub struct LoopHandle {
    mutations: mpsc::UnboundedSender<Vec<MutationRecord>>,
    events: mpsc::UnboundedSender<HostEvent>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl LoopHandle {
    /// 转发一批 DOM 变更
    pub fn send_mutations(&self, batch: Vec<MutationRecord>) -> ReconcileResult<()> {
        self.mutations
            .send(batch)
            .map_err(|_| ReconcileError::InternalError("观察循环已停止".to_string()))
    }

    /// 转发宿主事件
    pub fn send_host_event(&self, event: HostEvent) -> ReconcileResult<()> {
        self.events
            .send(event)
            .map_err(|_| ReconcileError::InternalError("观察循环已停止".to_string()))
    }

    /// 请求驱动停止并执行 teardown
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// 驱动本体
pub struct LoopDriver {
    observation: ObservationLoop,
    mutations: mpsc::UnboundedReceiver<Vec<MutationRecord>>,
    events: mpsc::UnboundedReceiver<HostEvent>,
    shutdown: oneshot::Receiver<()>,
}

/// 为观察循环创建驱动和句柄
pub fn channel(observation: ObservationLoop) -> (LoopDriver, LoopHandle) {
    let (mutation_tx, mutation_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let driver = LoopDriver {
        observation,
        mutations: mutation_rx,
        events: event_rx,
        shutdown: shutdown_rx,
    };
    let handle = LoopHandle {
        mutations: mutation_tx,
        events: event_tx,
        shutdown: Some(shutdown_tx),
    };
    (driver, handle)
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
        }
        None => std::future::pending::<()>().await,
    }
}

impl LoopDriver {
    /// 运行直到收到停止信号或句柄被丢弃，返回已经 teardown 的观察循环
    pub async fn run(mut self, ready: ReadyState) -> ObservationLoop {
        self.observation.start(ready, now());

        loop {
            let deadline = self.observation.next_deadline();

            tokio::select! {
                biased;

                _ = &mut self.shutdown => {
                    tracing::debug!("收到停止信号");
                    break;
                }
                Some(batch) = self.mutations.recv() => {
                    self.observation.on_mutations(&batch, now());
                }
                Some(event) = self.events.recv() => {
                    self.observation.on_host_event(&event, now());
                }
                _ = sleep_until(deadline) => {
                    self.observation.poll(now());
                }
            }

            if self.observation.state() == LoopState::TornDown {
                break;
            }
        }

        self.observation.teardown();
        self.observation
    }
}
