//! 并发批量执行器
//!
//! 对一批相互独立的实体并发执行同一个远程操作，等待全部完成后
//! 按提交顺序返回每个实体的结果。单个任务的错误、panic 或取消
//! 只记录在该任务自己的结果里，不会中断其他任务。
//!
//! 并发度由固定大小的工作池（信号量）限制，与批量大小无关。
//! 执行器本身不对单个任务设置超时，超时由操作内部的等待逻辑负责。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::sampler::cancellable;
use crate::{ExecutorError, Result};

/// 默认工作池大小
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// 提交给执行器的任务
#[derive(Debug, Clone)]
pub struct Task<A> {
    /// 目标实体
    pub entity: String,

    /// 该实体专属的参数
    pub args: A,
}

impl<A> Task<A> {
    pub fn new(entity: impl Into<String>, args: A) -> Self {
        Self {
            entity: entity.into(),
            args,
        }
    }
}

/// 单个任务的结果
#[derive(Debug)]
pub struct TaskOutcome<R> {
    /// 目标实体
    pub entity: String,

    /// 操作返回值或错误
    pub result: Result<R>,

    /// 操作耗时（不含排队时间）
    pub elapsed: Duration,
}

impl<R> TaskOutcome<R> {
    pub fn ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn value(&self) -> Option<&R> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ExecutorError> {
        self.result.as_ref().err()
    }
}

/// 批量执行结果（按提交顺序）
#[derive(Debug)]
pub struct BatchOutcome<R> {
    outcomes: Vec<TaskOutcome<R>>,
    elapsed: Duration,
}

impl<R> BatchOutcome<R> {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// 按实体查找结果
    pub fn get(&self, entity: &str) -> Option<&TaskOutcome<R>> {
        self.outcomes.iter().find(|o| o.entity == entity)
    }

    pub fn outcomes(&self) -> &[TaskOutcome<R>] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<TaskOutcome<R>> {
        self.outcomes
    }

    /// 整批是否成功（逐项结果的逻辑与）
    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(TaskOutcome::ok)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &TaskOutcome<R>> {
        self.outcomes.iter().filter(|o| o.ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskOutcome<R>> {
        self.outcomes.iter().filter(|o| !o.ok())
    }

    pub fn failed_entities(&self) -> Vec<String> {
        self.failed().map(|o| o.entity.clone()).collect()
    }

    /// 整批总耗时
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// 全部成功时返回各任务的值，否则返回 `BatchPartialFailure`
    pub fn into_result(self) -> Result<Vec<R>> {
        if !self.all_ok() {
            return Err(ExecutorError::BatchPartialFailure {
                failed: self.failed_entities(),
                total: self.outcomes.len(),
            });
        }
        self.outcomes.into_iter().map(|o| o.result).collect()
    }

    /// 输出批量执行摘要
    pub fn log_summary(&self, what: &str) {
        let failed = self.failed_entities();
        if failed.is_empty() {
            info!(
                "✅ {} 完成: {}/{} 成功, 耗时 {:?}",
                what,
                self.len(),
                self.len(),
                self.elapsed
            );
        } else {
            error!(
                "❌ {} 部分失败: {}/{} 成功, 失败: {}",
                what,
                self.len() - failed.len(),
                self.len(),
                failed.join(", ")
            );
        }
    }
}

/// 并发批量执行器
#[derive(Debug, Clone)]
pub struct ConcurrentTaskRunner {
    max_workers: usize,
    cancel: Option<CancellationToken>,
}

impl Default for ConcurrentTaskRunner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}

impl ConcurrentTaskRunner {
    /// 创建执行器，`max_workers` 为 0 时按 1 处理
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            cancel: None,
        }
    }

    /// 设置取消令牌，触发后排队中和执行中的任务都以 `Cancelled` 结束
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// 并发执行一批任务
    ///
    /// 每个任务恰好产生一个结果，所有任务都结束后才返回。
    pub async fn run<A, R, F, Fut>(&self, tasks: Vec<Task<A>>, operation: F) -> BatchOutcome<R>
    where
        A: Send + 'static,
        R: Send + 'static,
        F: Fn(String, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let operation = Arc::new(operation);

        debug!(
            "提交 {} 个任务 (工作池大小: {})",
            tasks.len(),
            self.max_workers
        );

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let entity = task.entity.clone();
            let semaphore = Arc::clone(&semaphore);
            let operation = Arc::clone(&operation);
            let cancel = self.cancel.clone();

            let handle = tokio::spawn(async move {
                let Task { entity, args } = task;
                let work = async {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return (Err(ExecutorError::Cancelled(entity.clone())), Duration::ZERO)
                        }
                    };
                    let task_started = Instant::now();
                    let result = operation(entity.clone(), args).await;
                    (result, task_started.elapsed())
                };

                let finished = cancellable(cancel.as_ref(), work).await;
                finished.unwrap_or_else(|| (Err(ExecutorError::Cancelled(entity)), Duration::ZERO))
            });
            handles.push((entity, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (entity, handle) in handles {
            let (result, elapsed) = match handle.await {
                Ok(joined) => joined,
                Err(join_err) => {
                    let reason = if join_err.is_panic() {
                        let payload = join_err.into_panic();
                        let message = payload
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| payload.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "未知 panic".to_string());
                        format!("panic: {}", message)
                    } else {
                        "任务被中止".to_string()
                    };
                    (
                        Err(ExecutorError::TaskFailure {
                            entity: entity.clone(),
                            reason,
                        }),
                        Duration::ZERO,
                    )
                }
            };

            if let Err(e) = &result {
                warn!("⚠️  {} 执行失败: {}", entity, e);
            }
            outcomes.push(TaskOutcome {
                entity,
                result,
                elapsed,
            });
        }

        BatchOutcome {
            outcomes,
            elapsed: started.elapsed(),
        }
    }

    /// 对每个实体执行同一个无额外参数的操作
    pub async fn run_concurrently<I, S, R, F, Fut>(
        &self,
        entities: I,
        operation: F,
    ) -> BatchOutcome<R>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        R: Send + 'static,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let tasks = entities.into_iter().map(|e| Task::new(e, ())).collect();
        self.run(tasks, move |entity, ()| operation(entity)).await
    }
}

/// 使用默认工作池对每个实体并发执行操作
pub async fn run_concurrently<I, S, R, F, Fut>(entities: I, operation: F) -> BatchOutcome<R>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    R: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    ConcurrentTaskRunner::default()
        .run_concurrently(entities, operation)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_workers_clamped() {
        assert_eq!(ConcurrentTaskRunner::new(0).max_workers(), 1);
        assert_eq!(ConcurrentTaskRunner::default().max_workers(), DEFAULT_MAX_WORKERS);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let outcome = run_concurrently(Vec::<String>::new(), |_| async { Ok(()) }).await;
        assert!(outcome.is_empty());
        assert!(outcome.all_ok());
        assert!(outcome.into_result().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_task_args_and_order() {
        let runner = ConcurrentTaskRunner::new(2);
        let tasks = vec![Task::new("a", 1u32), Task::new("b", 2), Task::new("c", 3)];
        let outcome = runner
            .run(tasks, |entity, n| async move { Ok(format!("{}{}", entity, n)) })
            .await;

        let values = outcome.into_result().unwrap();
        assert_eq!(values, vec!["a1", "b2", "c3"]);
    }

    #[tokio::test]
    async fn test_into_result_partial_failure() {
        let outcome = run_concurrently(["ok", "bad"], |entity| async move {
            if entity == "bad" {
                Err(ExecutorError::ActionRejected(entity))
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(outcome.failed_entities(), vec!["bad".to_string()]);
        match outcome.into_result() {
            Err(ExecutorError::BatchPartialFailure { failed, total }) => {
                assert_eq!(failed, vec!["bad".to_string()]);
                assert_eq!(total, 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
