//! 状态收敛等待
//!
//! 基于 [`TimeoutSampler`] 轮询远程实体，直到其状态满足条件或超时。
//! 只观察，从不修改远程状态。
//!
//! 轮询期间实体不存在时的处理由 [`AbsencePolicy`] 显式指定：
//! - `Success`: 实体消失即视为收敛（等待删除完成）
//! - `Failure`: 立即失败，返回 `EntityNotFound`
//! - `Transient`: 视为暂时状态（创建中/迁移中），继续轮询
//!
//! 等待消失（[`ConditionWait::disappearance`]）时不存在总是视为收敛。
//!
//! 状态比较前两侧都会做归一化，`"powering_up"`、`"PoweringUp"`、`"poweringup"` 视为相同。

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::remote::{EntityFetcher, EntityKind, EntityState, RemoteError};
use crate::sampler::{TimeoutSampler, Verdict};
use crate::{ExecutorError, Result};

/// 实体不存在时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbsencePolicy {
    Success,
    Failure,
    #[default]
    Transient,
}

/// 等待结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    /// 观察到满足条件的状态
    Reached(EntityState),
    /// 实体已消失（仅在 `AbsencePolicy::Success` 下出现）
    Absent,
}

impl Convergence {
    pub fn state(&self) -> Option<&EntityState> {
        match self {
            Self::Reached(state) => Some(state),
            Self::Absent => None,
        }
    }

    pub fn into_state(self) -> Option<EntityState> {
        match self {
            Self::Reached(state) => Some(state),
            Self::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// 等待时间参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTiming {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitTiming {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    pub fn from_secs(timeout: u64, poll_interval: u64) -> Self {
        Self::new(
            Duration::from_secs(timeout),
            Duration::from_secs(poll_interval),
        )
    }
}

impl Default for WaitTiming {
    fn default() -> Self {
        Self::from_secs(300, 5)
    }
}

/// 状态字符串归一化：转小写并去掉 `_` `-` `.` 和空白
pub fn normalize_status(status: &str) -> String {
    status
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | '.') && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

type Predicate = Arc<dyn Fn(&EntityState) -> bool + Send + Sync>;

/// 单个实体的收敛等待
#[derive(Clone)]
pub struct ConditionWait {
    kind: EntityKind,
    id: String,
    description: String,
    /// `None` 表示等待消失
    predicate: Option<Predicate>,
    expected_empty: bool,
    timing: WaitTiming,
    absence: AbsencePolicy,
    cancel: Option<CancellationToken>,
}

impl ConditionWait {
    /// 等待状态进入期望集合中的任意一个
    pub fn status<I, S>(kind: EntityKind, id: impl Into<String>, expected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let expected: Vec<String> = expected
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        let normalized: HashSet<String> = expected.iter().map(|s| normalize_status(s)).collect();
        let expected_empty = normalized.is_empty();

        let mut wait = Self::matching(
            kind,
            id,
            format!("状态 ∈ {{{}}}", expected.join(", ")),
            move |state| normalized.contains(&normalize_status(&state.status)),
        );
        wait.expected_empty = expected_empty;
        wait
    }

    /// 等待任意条件成立
    pub fn matching<P>(
        kind: EntityKind,
        id: impl Into<String>,
        description: impl Into<String>,
        predicate: P,
    ) -> Self
    where
        P: Fn(&EntityState) -> bool + Send + Sync + 'static,
    {
        Self {
            kind,
            id: id.into(),
            description: description.into(),
            predicate: Some(Arc::new(predicate)),
            expected_empty: false,
            timing: WaitTiming::default(),
            absence: AbsencePolicy::Transient,
            cancel: None,
        }
    }

    /// 等待实体消失
    pub fn disappearance(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            description: "消失".to_string(),
            predicate: None,
            expected_empty: false,
            timing: WaitTiming::default(),
            absence: AbsencePolicy::Success,
            cancel: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timing.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.timing.poll_interval = poll_interval;
        self
    }

    pub fn with_timing(mut self, timing: WaitTiming) -> Self {
        self.timing = timing;
        self
    }

    /// 设置实体不存在时的处理策略
    ///
    /// 对等待消失无效，不存在始终视为收敛。
    pub fn treat_absence_as(mut self, policy: AbsencePolicy) -> Self {
        if self.predicate.is_none() {
            debug!("{} 忽略不存在处理策略 {:?}", self, policy);
            return self;
        }
        self.absence = policy;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timing(&self) -> WaitTiming {
        self.timing
    }

    pub fn absence_policy(&self) -> AbsencePolicy {
        self.absence
    }

    /// 执行等待
    pub async fn run(&self, fetcher: &dyn EntityFetcher) -> Result<Convergence> {
        if self.expected_empty {
            return Err(ExecutorError::InvalidArgument(format!(
                "{} {}: 期望状态集合为空",
                self.kind, self.id
            )));
        }

        let what = self.to_string();
        let kind = self.kind;
        let id = self.id.clone();
        let mut sampler = TimeoutSampler::new(self.timing.timeout, self.timing.poll_interval, {
            let id = id.clone();
            move || {
                let id = id.clone();
                async move { fetcher.fetch(kind, &id).await }
            }
        })?
        .describe(what.clone());
        if let Some(token) = &self.cancel {
            sampler = sampler.with_cancel(token.clone());
        }

        let predicate = self.predicate.clone();
        let absence = self.absence;
        let result = sampler
            .until(|sample| match sample.result {
                Ok(state) => match &predicate {
                    Some(p) if p(&state) => Verdict::Converged(Convergence::Reached(state)),
                    _ => Verdict::Retry,
                },
                Err(e) if e.is_not_found() => match absence {
                    AbsencePolicy::Success => Verdict::Converged(Convergence::Absent),
                    AbsencePolicy::Failure => {
                        Verdict::Abort(ExecutorError::EntityNotFound(format!("{} {}", kind, id)))
                    }
                    AbsencePolicy::Transient => Verdict::Retry,
                },
                Err(_) => Verdict::Retry,
            })
            .await;

        match &result {
            Ok(Convergence::Reached(state)) => {
                info!("✅ {} 已收敛 (状态: {})", what, state.status)
            }
            Ok(Convergence::Absent) => info!("✅ {} 已确认不存在", what),
            Err(e) => warn!("⚠️  {} 未收敛: {}", what, e),
        }
        result
    }
}

impl fmt::Display for ConditionWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} 等待{}", self.kind, self.id, self.description)
    }
}

impl fmt::Debug for ConditionWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionWait")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("description", &self.description)
            .field("timing", &self.timing)
            .field("absence", &self.absence)
            .finish()
    }
}

// ============================================
// 便捷函数
// ============================================

/// 等待实体状态进入期望集合
///
/// 收敛返回 `Ok(true)`，超时返回 `Ok(false)`。轮询期间实体不存在视为暂时状态。
pub async fn wait_for_status<I, S>(
    fetcher: &dyn EntityFetcher,
    kind: EntityKind,
    id: &str,
    expected: I,
    timing: WaitTiming,
) -> Result<bool>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let wait = ConditionWait::status(kind, id, expected)
        .with_timing(timing)
        .treat_absence_as(AbsencePolicy::Transient);

    match wait.run(fetcher).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_timeout() => Ok(false),
        Err(e) => Err(e),
    }
}

/// 等待一批实体全部消失
///
/// 整批共用一个超时预算。已确认消失的实体不再查询，每次采样只检查剩余的实体。
pub async fn wait_until_all_absent(
    fetcher: &dyn EntityFetcher,
    kind: EntityKind,
    ids: &[String],
    timing: WaitTiming,
    cancel: Option<&CancellationToken>,
) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }

    let what = format!("{} 个 {} 全部消失", ids.len(), kind);
    let pending = Arc::new(Mutex::new(ids.to_vec()));
    let mut sampler = TimeoutSampler::new(timing.timeout, timing.poll_interval, move || {
        let pending = Arc::clone(&pending);
        async move {
            let ids = pending.lock().await.clone();
            let mut remaining = Vec::with_capacity(ids.len());
            let mut failure = None;
            for id in ids {
                if failure.is_some() {
                    remaining.push(id);
                    continue;
                }
                match fetcher.fetch(kind, &id).await {
                    Ok(_) => remaining.push(id),
                    Err(RemoteError::NotFound(_)) => debug!("{} {} 已消失", kind, id),
                    Err(e) => {
                        failure = Some(e);
                        remaining.push(id);
                    }
                }
            }
            *pending.lock().await = remaining.clone();
            match failure {
                Some(e) => Err(e),
                None => Ok(remaining),
            }
        }
    })?
    .describe(what.clone());
    if let Some(token) = cancel {
        sampler = sampler.with_cancel(token.clone());
    }

    sampler
        .until(|sample| match sample.result {
            Ok(remaining) if remaining.is_empty() => Verdict::Converged(()),
            _ => Verdict::Retry,
        })
        .await?;

    info!("✅ {}", what);
    Ok(())
}
