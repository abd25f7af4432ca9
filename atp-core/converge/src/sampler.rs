//! 超时采样器
//!
//! 对任意探针函数做有时间上限的惰性重试：第一次立即调用，之后每次先等待
//! `poll_interval` 再调用，直到累计耗时达到 `timeout`。
//!
//! 探针报错不会中止采样，错误作为样本交给调用方判断。
//! 单次探针调用的截止时间为 `开始时间 + timeout + poll_interval`，
//! 挂起的远程调用会被直接丢弃（取消），因此放弃等待的时刻总在
//! `[timeout, timeout + poll_interval]` 区间内。

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{ExecutorError, RemoteError, Result};

/// 单次采样结果
#[derive(Debug, Clone)]
pub struct Sample<T> {
    /// 第几次尝试（从 1 开始）
    pub attempt: u32,

    /// 本次探针返回时距采样开始的耗时
    pub elapsed: Duration,

    /// 探针结果
    pub result: std::result::Result<T, RemoteError>,
}

/// 调用方对单个样本的判定
#[derive(Debug)]
pub enum Verdict<R> {
    /// 已收敛，结束采样
    Converged(R),
    /// 继续采样
    Retry,
    /// 立即失败
    Abort(ExecutorError),
}

/// 超时采样器
pub struct TimeoutSampler<F> {
    what: String,
    timeout: Duration,
    poll_interval: Duration,
    probe: F,
    cancel: Option<CancellationToken>,
    started: Option<Instant>,
    attempts: u32,
    last_observed: Option<String>,
    last_error: Option<String>,
    cancelled: bool,
}

impl<F, Fut, T> TimeoutSampler<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, RemoteError>>,
    T: Debug,
{
    /// 创建采样器
    ///
    /// `timeout` 和 `poll_interval` 必须大于 0。
    pub fn new(timeout: Duration, poll_interval: Duration, probe: F) -> Result<Self> {
        if timeout.is_zero() {
            return Err(ExecutorError::InvalidArgument(
                "timeout 必须大于 0".to_string(),
            ));
        }
        if poll_interval.is_zero() {
            return Err(ExecutorError::InvalidArgument(
                "poll_interval 必须大于 0".to_string(),
            ));
        }

        Ok(Self {
            what: "probe".to_string(),
            timeout,
            poll_interval,
            probe,
            cancel: None,
            started: None,
            attempts: 0,
            last_observed: None,
            last_error: None,
            cancelled: false,
        })
    }

    /// 设置描述（用于日志和超时错误）
    pub fn describe(mut self, what: impl Into<String>) -> Self {
        self.what = what.into();
        self
    }

    /// 设置取消令牌
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// 采样开始后的耗时，尚未开始时为 0
    pub fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// 取下一个样本
    ///
    /// 超时或被取消后返回 `None`，此时可调用 [`Self::exhausted_error`] 获取终止原因。
    pub async fn next_sample(&mut self) -> Option<Sample<T>> {
        if self.cancelled {
            return None;
        }
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            self.cancelled = true;
            return None;
        }

        let started = *self.started.get_or_insert_with(Instant::now);

        if self.attempts > 0 {
            if started.elapsed() >= self.timeout {
                return None;
            }
            if cancellable(self.cancel.as_ref(), tokio::time::sleep(self.poll_interval))
                .await
                .is_none()
            {
                self.cancelled = true;
                return None;
            }
        }

        self.attempts += 1;
        let deadline = started + self.timeout + self.poll_interval;
        let probe = tokio::time::timeout_at(deadline, (self.probe)());

        let result = match cancellable(self.cancel.as_ref(), probe).await {
            None => {
                self.cancelled = true;
                return None;
            }
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(RemoteError::ProbeTimeout(self.timeout + self.poll_interval)),
        };

        let elapsed = started.elapsed();
        match &result {
            Ok(value) => {
                debug!(
                    "{} 第 {} 次采样 ({:?}): {:?}",
                    self.what, self.attempts, elapsed, value
                );
                self.last_observed = Some(format!("{:?}", value));
                self.last_error = None;
            }
            Err(e) => {
                debug!(
                    "{} 第 {} 次采样 ({:?}) 出错: {}",
                    self.what, self.attempts, elapsed, e
                );
                self.last_error = Some(e.to_string());
            }
        }

        Some(Sample {
            attempt: self.attempts,
            elapsed,
            result,
        })
    }

    /// 采样终止时的错误
    ///
    /// `last_error` 仅在最后一次尝试本身失败时存在。
    pub fn exhausted_error(&self) -> ExecutorError {
        if self.cancelled {
            return ExecutorError::Cancelled(self.what.clone());
        }
        ExecutorError::TimeoutExceeded {
            what: self.what.clone(),
            timeout: self.timeout,
            attempts: self.attempts,
            last_observed: self.last_observed.clone(),
            last_error: self.last_error.clone(),
        }
    }

    /// 持续采样直到判定收敛、判定失败或超时
    pub async fn until<R, J>(mut self, mut judge: J) -> Result<R>
    where
        J: FnMut(Sample<T>) -> Verdict<R>,
    {
        while let Some(sample) = self.next_sample().await {
            match judge(sample) {
                Verdict::Converged(value) => return Ok(value),
                Verdict::Retry => {}
                Verdict::Abort(e) => return Err(e),
            }
        }
        Err(self.exhausted_error())
    }
}

/// 在取消令牌触发时放弃（丢弃）future，未设置令牌时直接等待
///
/// 令牌已触发时总是返回 `None`，即使 future 已经可以完成。
pub(crate) async fn cancellable<Fut: Future>(
    cancel: Option<&CancellationToken>,
    fut: Fut,
) -> Option<Fut::Output> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => None,
            out = fut => Some(out),
        },
        None => Some(fut.await),
    }
}
