//! ATP 收敛引擎
//!
//! 远程虚拟化平台上的一切变更都是异步生效的，只能通过轮询观察到收敛。
//! 本 crate 提供围绕这一点的几个基础组件：
//!
//! - [`TimeoutSampler`]: 有时间上限的惰性重试采样器
//! - [`ConditionWait`]: 等待实体状态收敛到期望值（或消失）
//! - [`ConcurrentTaskRunner`]: 并发批量执行，逐实体收集结果
//! - [`AsyncQueueDrain`]: 队列式批量清理，最终确认整批实体消失
//! - [`OrchestratedAction`]: 下发操作 → 等待中间信号 → 等待最终状态
//!
//! 以及基于上述组件的 VDI 平台适配 ([`vdi_ops`]) 和测试配置 ([`test_config`])。

pub mod action;
pub mod drain;
pub mod migration;
pub mod remote;
pub mod runner;
pub mod sampler;
pub mod test_config;
pub mod vdi_ops;
pub mod wait;

use std::time::Duration;

pub use action::{ActionPhase, OrchestratedAction};
pub use drain::{
    drain_queue, AsyncQueueDrain, DrainOutcome, DrainReport, DrainStatus, Teardown,
    DEFAULT_DRAIN_WORKERS,
};
pub use migration::{plan_migrations, seeded_rng, MigrationPlan};
pub use remote::{
    actions, ActionInvoker, EntityFetcher, EntityKind, EntityState, RemoteApi, RemoteError,
};
pub use runner::{
    run_concurrently, BatchOutcome, ConcurrentTaskRunner, Task, TaskOutcome, DEFAULT_MAX_WORKERS,
};
pub use sampler::{Sample, TimeoutSampler, Verdict};
pub use test_config::{TestConfig, VdiConnectionConfig};
pub use vdi_ops::{matches_pattern, online_hosts, select_vms, VmLifecycle, VmTeardown};
pub use wait::{
    normalize_status, wait_for_status, wait_until_all_absent, AbsencePolicy, ConditionWait,
    Convergence, WaitTiming,
};

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ExecutorError {
    #[error(
        "等待超时: {what} (超时 {timeout:?}, 尝试 {attempts} 次, 最后状态: {}, 最后错误: {})",
        .last_observed.as_deref().unwrap_or("无"),
        .last_error.as_deref().unwrap_or("无")
    )]
    TimeoutExceeded {
        what: String,
        timeout: Duration,
        attempts: u32,
        last_observed: Option<String>,
        last_error: Option<String>,
    },

    #[error("实体不存在: {0}")]
    EntityNotFound(String),

    #[error("任务执行失败: {entity}: {reason}")]
    TaskFailure { entity: String, reason: String },

    #[error("批量操作部分失败: {}/{total} 个失败 ({})", .failed.len(), .failed.join(", "))]
    BatchPartialFailure { failed: Vec<String>, total: usize },

    #[error("操作被拒绝: {0}")]
    ActionRejected(String),

    #[error("已取消: {0}")]
    Cancelled(String),

    #[error("参数错误: {0}")]
    InvalidArgument(String),

    #[error("远程调用失败: {0}")]
    Remote(#[from] RemoteError),
}

impl ExecutorError {
    /// 是否为实体不存在
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::EntityNotFound(_) => true,
            Self::Remote(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// 是否为等待超时（区别于远程操作本身失败）
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutExceeded { .. })
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
