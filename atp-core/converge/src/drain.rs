//! 队列式批量清理
//!
//! 生产者/消费者模型：控制任务把待清理项逐个放入有界工作队列（容量等于
//! worker 数，队列满时阻塞），全部放入后关闭队列。K 个 worker 从队列取项
//! 执行 `pre_check` → `remove`，把结果放入结果队列。
//! 控制任务收齐结果（即所有项处理完毕）后回收 worker，最后执行一次
//! 整批的 `post_check`（通常是确认所有实体已从平台消失）。取消后不再执行
//! `post_check`。
//!
//! 清理是幂等的：`pre_check` 或 `remove` 报告实体不存在时视为已清理成功，
//! 因此部分失败后可以安全地重新执行。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::sampler::cancellable;
use crate::Result;

/// 默认清理 worker 数
pub const DEFAULT_DRAIN_WORKERS: usize = 4;

/// 清理操作
#[async_trait]
pub trait Teardown: Send + Sync {
    /// 清理前把实体置于安全状态（例如强制关机），默认不做任何事
    async fn pre_check(&self, _item: &str) -> Result<()> {
        Ok(())
    }

    /// 执行清理
    async fn remove(&self, item: &str) -> Result<()>;

    /// 整批清理完成后的最终确认，默认通过
    async fn post_check(&self, _items: &[String]) -> Result<bool> {
        Ok(true)
    }
}

/// 单项清理状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainStatus {
    /// 已清理
    Removed,
    /// 清理前已不存在
    AlreadyAbsent,
    /// 清理失败
    Failed(String),
}

impl DrainStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// 单项清理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainOutcome {
    pub item: String,
    pub status: DrainStatus,
}

/// 批量清理报告
#[derive(Debug, Clone)]
pub struct DrainReport {
    /// 各项结果（按提交顺序）
    pub outcomes: Vec<DrainOutcome>,

    /// 整批最终确认是否通过
    pub batch_converged: bool,

    /// 最终确认出错时的错误信息
    pub post_check_error: Option<String>,

    /// 总耗时
    pub elapsed: Duration,
}

impl DrainReport {
    /// 所有项成功且整批确认通过
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(|o| o.status.is_success()) && self.batch_converged
    }

    pub fn get(&self, item: &str) -> Option<&DrainStatus> {
        self.outcomes
            .iter()
            .find(|o| o.item == item)
            .map(|o| &o.status)
    }

    pub fn failed_items(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| !o.status.is_success())
            .map(|o| o.item.clone())
            .collect()
    }
}

/// 队列式批量清理
#[derive(Debug, Clone)]
pub struct AsyncQueueDrain {
    workers: usize,
    cancel: Option<CancellationToken>,
}

impl AsyncQueueDrain {
    /// 创建清理器，`workers` 为 0 时按 1 处理
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 执行批量清理
    pub async fn run<D>(&self, teardown: Arc<D>, items: Vec<String>) -> DrainReport
    where
        D: Teardown + ?Sized + 'static,
    {
        let started = Instant::now();
        let total = items.len();
        let worker_count = self.workers.min(total.max(1));

        info!("开始批量清理: {} 项, {} 个 worker", total, worker_count);

        let (work_tx, work_rx) = async_channel::bounded::<(usize, String)>(worker_count);
        // 结果队列容纳全部结果，worker 不会因控制任务仍在投递而阻塞
        let (result_tx, result_rx) =
            async_channel::bounded::<(usize, DrainOutcome)>(total.max(1));

        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let teardown = Arc::clone(&teardown);
            let cancel = self.cancel.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let (index, item) = match cancellable(cancel.as_ref(), work_rx.recv()).await {
                        Some(Ok(job)) => job,
                        // 队列已关闭且为空，或已取消
                        _ => break,
                    };

                    let status =
                        match cancellable(cancel.as_ref(), teardown_one(teardown.as_ref(), &item))
                            .await
                        {
                            Some(status) => status,
                            None => DrainStatus::Failed("已取消".to_string()),
                        };
                    debug!("worker {} 处理 {}: {:?}", worker_id, item, status);

                    if result_tx.send((index, DrainOutcome { item, status })).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(work_rx);
        drop(result_tx);

        for job in items.iter().cloned().enumerate() {
            if work_tx.send(job).await.is_err() {
                break;
            }
        }
        work_tx.close();

        let mut slots: Vec<Option<DrainOutcome>> = (0..total).map(|_| None).collect();
        for _ in 0..total {
            match result_rx.recv().await {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                // 所有 worker 都已退出
                Err(_) => break,
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("❌ 清理 worker 异常退出: {}", e);
            }
        }

        let outcomes: Vec<DrainOutcome> = slots
            .into_iter()
            .zip(items.iter())
            .map(|(slot, item)| {
                slot.unwrap_or_else(|| DrainOutcome {
                    item: item.clone(),
                    status: DrainStatus::Failed("未被处理".to_string()),
                })
            })
            .collect();

        for outcome in &outcomes {
            match &outcome.status {
                DrainStatus::AlreadyAbsent => info!("{} 已不存在，视为清理成功", outcome.item),
                DrainStatus::Failed(reason) => warn!("⚠️  {} 清理失败: {}", outcome.item, reason),
                DrainStatus::Removed => {}
            }
        }

        let post_check = if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            None
        } else {
            cancellable(self.cancel.as_ref(), teardown.post_check(&items)).await
        };
        let (batch_converged, post_check_error) = match post_check {
            Some(Ok(converged)) => (converged, None),
            Some(Err(e)) => {
                warn!("⚠️  批量清理最终确认失败: {}", e);
                (false, Some(e.to_string()))
            }
            None => (false, Some("已取消".to_string())),
        };

        let report = DrainReport {
            outcomes,
            batch_converged,
            post_check_error,
            elapsed: started.elapsed(),
        };

        if report.success() {
            info!("✅ 批量清理完成: {} 项, 耗时 {:?}", total, report.elapsed);
        } else {
            error!(
                "❌ 批量清理未完全成功: 失败项 [{}], 最终确认: {}",
                report.failed_items().join(", "),
                report.batch_converged
            );
        }
        report
    }
}

async fn teardown_one<D: Teardown + ?Sized>(teardown: &D, item: &str) -> DrainStatus {
    match teardown.pre_check(item).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => return DrainStatus::AlreadyAbsent,
        Err(e) => return DrainStatus::Failed(e.to_string()),
    }

    match teardown.remove(item).await {
        Ok(()) => DrainStatus::Removed,
        Err(e) if e.is_not_found() => DrainStatus::AlreadyAbsent,
        Err(e) => DrainStatus::Failed(e.to_string()),
    }
}

/// 批量清理，返回整体是否成功
pub async fn drain_queue<D>(teardown: Arc<D>, items: Vec<String>, workers: usize) -> bool
where
    D: Teardown + ?Sized + 'static,
{
    AsyncQueueDrain::new(workers)
        .run(teardown, items)
        .await
        .success()
}
