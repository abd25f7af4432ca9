//! VDI 平台适配与虚拟机批量生命周期操作
//!
//! - `VdiClient` 实现 [`EntityFetcher`] / [`ActionInvoker`]，把平台 REST API
//!   映射为收敛引擎使用的两个窄接口
//! - [`VmLifecycle`]: 基于并发执行器、清理队列和编排操作的批量启动/关闭/删除/迁移
//! - [`VmTeardown`]: 删除虚拟机的清理策略（先强制关机，再删除，最后确认整批消失）

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use atp_vdiplatform::{Domain, VdiClient, VdiError};

use crate::action::OrchestratedAction;
use crate::drain::{AsyncQueueDrain, DrainReport, Teardown, DEFAULT_DRAIN_WORKERS};
use crate::migration::plan_migrations;
use crate::remote::{
    actions, ActionInvoker, EntityFetcher, EntityKind, EntityState, RemoteApi, RemoteError,
};
use crate::runner::{BatchOutcome, ConcurrentTaskRunner, Task, DEFAULT_MAX_WORKERS};
use crate::test_config::TestConfig;
use crate::wait::{
    normalize_status, wait_until_all_absent, AbsencePolicy, ConditionWait, Convergence, WaitTiming,
};
use crate::{ExecutorError, Result};

// ============================================================================
// VdiClient 适配
// ============================================================================

fn remote_error(e: VdiError) -> RemoteError {
    if e.is_not_found() {
        return RemoteError::NotFound(e.to_string());
    }
    match e {
        VdiError::OperationFailed(msg) => RemoteError::ActionRejected(msg),
        other => RemoteError::Transport(other.to_string()),
    }
}

fn domain_state(domain: Domain) -> EntityState {
    EntityState {
        kind: EntityKind::Vm,
        status: domain.domain_status().name().to_string(),
        id: domain.id,
        name: domain.name,
        location: domain.host_id,
    }
}

fn required_param<'a>(params: &'a Value, key: &str) -> std::result::Result<&'a str, RemoteError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RemoteError::InvalidParams(format!("缺少参数 {}", key)))
}

#[async_trait]
impl EntityFetcher for VdiClient {
    async fn fetch(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> std::result::Result<EntityState, RemoteError> {
        let result = match kind {
            EntityKind::Vm => self.domain().get(id).await.map(domain_state),
            EntityKind::Disk => self.storage().get_volume(id).await.map(|v| EntityState {
                kind,
                id: v.id,
                name: v.name,
                status: v.status,
                location: v.storage_pool_id,
            }),
            EntityKind::Snapshot => self.snapshot().get(id).await.map(|s| EntityState {
                kind,
                id: s.id,
                name: s.name,
                status: s.status,
                location: s.domain_id,
            }),
            EntityKind::Host => self.host().get(id).await.map(|h| EntityState {
                kind,
                status: h.host_status().name().to_string(),
                id: h.id,
                name: h.name,
                location: Some(h.ip).filter(|ip| !ip.is_empty()),
            }),
        };
        result.map_err(remote_error)
    }
}

#[async_trait]
impl ActionInvoker for VdiClient {
    async fn invoke(
        &self,
        kind: EntityKind,
        id: &str,
        action: &str,
        params: &Value,
    ) -> std::result::Result<bool, RemoteError> {
        let result = match (kind, action) {
            (EntityKind::Vm, actions::START) => self.domain().start(id).await,
            (EntityKind::Vm, actions::SHUTDOWN) => {
                let force = params.get("force").and_then(Value::as_bool).unwrap_or(false);
                self.domain().shutdown(id, force).await
            }
            (EntityKind::Vm, actions::REBOOT) => self.domain().reboot(id).await,
            (EntityKind::Vm, actions::DELETE) => self.domain().delete(id).await,
            (EntityKind::Vm, actions::MIGRATE) => {
                let host_id = required_param(params, "host_id")?;
                self.domain().migrate(id, host_id).await
            }
            (EntityKind::Vm, actions::SNAPSHOT) => {
                let name = required_param(params, "name")?;
                let description = params.get("description").and_then(Value::as_str);
                self.snapshot()
                    .create(id, name, description)
                    .await
                    .map(|_| ())
            }
            (EntityKind::Disk, actions::MIGRATE) => {
                let pool = required_param(params, "storage_pool_id")?;
                self.storage().migrate_volume(id, pool).await
            }
            (EntityKind::Disk, actions::DELETE) => self.storage().delete_volume(id).await,
            (EntityKind::Snapshot, actions::DELETE) => self.snapshot().delete(id).await,
            (EntityKind::Snapshot, actions::RESTORE) => self.snapshot().restore(id).await,
            _ => return Err(RemoteError::Unsupported(format!("{} {}", kind, action))),
        };

        result.map(|()| true).map_err(remote_error)
    }
}

/// 按名称模式查询虚拟机
pub async fn select_vms(client: &VdiClient, pattern: &str) -> Result<Vec<Domain>> {
    let all = client
        .domain()
        .list_all()
        .await
        .map_err(|e| ExecutorError::Remote(remote_error(e)))?;
    Ok(all
        .into_iter()
        .filter(|vm| matches_pattern(&vm.name, pattern))
        .collect())
}

/// 查询在线主机 ID 列表
pub async fn online_hosts(client: &VdiClient) -> Result<Vec<String>> {
    let hosts = client
        .host()
        .list_all()
        .await
        .map_err(|e| ExecutorError::Remote(remote_error(e)))?;
    Ok(hosts
        .into_iter()
        .filter(|h| h.host_status().is_online())
        .map(|h| h.id)
        .collect())
}

// ============================================================================
// 批量生命周期操作
// ============================================================================

/// 下发操作并等待单个实体收敛
async fn act_and_wait<C: RemoteApi>(
    remote: &C,
    id: &str,
    action: &str,
    params: Value,
    wait: ConditionWait,
) -> Result<EntityState> {
    if !remote.invoke(EntityKind::Vm, id, action, &params).await? {
        return Err(ExecutorError::ActionRejected(format!("vm {} {}", id, action)));
    }
    match wait.run(remote).await? {
        Convergence::Reached(state) => Ok(state),
        Convergence::Absent => Err(ExecutorError::EntityNotFound(format!("vm {}", id))),
    }
}

/// 虚拟机批量生命周期操作
pub struct VmLifecycle<C> {
    remote: Arc<C>,
    timing: WaitTiming,
    final_timing: WaitTiming,
    max_workers: usize,
    drain_workers: usize,
    cancel: Option<CancellationToken>,
}

impl<C: RemoteApi + 'static> VmLifecycle<C> {
    pub fn new(remote: Arc<C>) -> Self {
        Self {
            remote,
            timing: WaitTiming::default(),
            final_timing: WaitTiming::default(),
            max_workers: DEFAULT_MAX_WORKERS,
            drain_workers: DEFAULT_DRAIN_WORKERS,
            cancel: None,
        }
    }

    /// 按测试配置设置等待参数和并发度
    pub fn from_config(remote: Arc<C>, config: &TestConfig) -> Self {
        Self::new(remote)
            .with_timing(config.wait_timing())
            .with_final_timing(config.final_check_timing())
            .with_max_workers(config.batch.max_workers)
            .with_drain_workers(config.batch.drain_workers)
    }

    pub fn with_timing(mut self, timing: WaitTiming) -> Self {
        self.timing = timing;
        self
    }

    /// 批量删除后整批消失确认的等待参数
    pub fn with_final_timing(mut self, timing: WaitTiming) -> Self {
        self.final_timing = timing;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_drain_workers(mut self, workers: usize) -> Self {
        self.drain_workers = workers;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn drain_workers(&self) -> usize {
        self.drain_workers
    }

    fn runner(&self) -> ConcurrentTaskRunner {
        let runner = ConcurrentTaskRunner::new(self.max_workers);
        match &self.cancel {
            Some(token) => runner.with_cancel(token.clone()),
            None => runner,
        }
    }

    fn status_wait(&self, id: &str, expected: &[&str]) -> ConditionWait {
        let wait = ConditionWait::status(EntityKind::Vm, id, expected.iter().copied())
            .with_timing(self.timing)
            .treat_absence_as(AbsencePolicy::Failure);
        match &self.cancel {
            Some(token) => wait.with_cancel(token.clone()),
            None => wait,
        }
    }

    /// 批量启动并等待进入 running
    pub async fn start_all(&self, ids: &[String]) -> BatchOutcome<EntityState> {
        self.act_all(ids, actions::START, json!({}), &["running"], "批量启动")
            .await
    }

    /// 批量关机并等待进入 shutoff
    pub async fn stop_all(&self, ids: &[String], force: bool) -> BatchOutcome<EntityState> {
        self.act_all(
            ids,
            actions::SHUTDOWN,
            json!({ "force": force }),
            &["shutoff"],
            "批量关机",
        )
        .await
    }

    /// 批量重启并等待回到 running
    pub async fn reboot_all(&self, ids: &[String]) -> BatchOutcome<EntityState> {
        self.act_all(ids, actions::REBOOT, json!({}), &["running"], "批量重启")
            .await
    }

    async fn act_all(
        &self,
        ids: &[String],
        action: &'static str,
        params: Value,
        expected: &[&str],
        what: &str,
    ) -> BatchOutcome<EntityState> {
        info!("{}: {} 台虚拟机", what, ids.len());
        let tasks = ids
            .iter()
            .map(|id| Task::new(id.clone(), self.status_wait(id, expected)))
            .collect();

        let remote = Arc::clone(&self.remote);
        let outcome = self
            .runner()
            .run(tasks, move |id, wait| {
                let remote = Arc::clone(&remote);
                let params = params.clone();
                async move { act_and_wait(remote.as_ref(), &id, action, params, wait).await }
            })
            .await;

        outcome.log_summary(what);
        outcome
    }

    /// 等待一批虚拟机进入期望状态（不下发任何操作）
    pub async fn wait_all(&self, ids: &[String], expected: &[&str]) -> BatchOutcome<EntityState> {
        let tasks = ids
            .iter()
            .map(|id| {
                let wait = self
                    .status_wait(id, expected)
                    .treat_absence_as(AbsencePolicy::Transient);
                Task::new(id.clone(), wait)
            })
            .collect();

        let remote = Arc::clone(&self.remote);
        let outcome = self
            .runner()
            .run(tasks, move |id, wait| {
                let remote = Arc::clone(&remote);
                async move {
                    wait.run(remote.as_ref())
                        .await?
                        .into_state()
                        .ok_or(ExecutorError::EntityNotFound(id))
                }
            })
            .await;

        outcome.log_summary("批量状态等待");
        outcome
    }

    /// 批量删除（幂等）
    pub async fn remove_all(&self, ids: &[String]) -> DrainReport {
        info!("批量删除: {} 台虚拟机", ids.len());
        let teardown = Arc::new(VmTeardown {
            remote: Arc::clone(&self.remote),
            timing: self.timing,
            final_timing: self.final_timing,
            cancel: self.cancel.clone(),
        });

        let drain = AsyncQueueDrain::new(self.drain_workers);
        let drain = match &self.cancel {
            Some(token) => drain.with_cancel(token.clone()),
            None => drain,
        };
        drain.run(teardown, ids.to_vec()).await
    }

    /// 批量热迁移到随机选择的其他主机
    ///
    /// 目标主机由调用方传入的随机数发生器选择，同一种子得到同一份计划。
    /// 查询当前主机失败的虚拟机不参与计划，失败记录在该虚拟机自己的结果里。
    /// 任意一台虚拟机没有候选目标主机时整批返回 `InvalidArgument`，不下发任何迁移。
    pub async fn migrate_all<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        ids: &[String],
        hosts: &[String],
    ) -> Result<BatchOutcome<EntityState>> {
        let remote = Arc::clone(&self.remote);
        let located = self
            .runner()
            .run_concurrently(ids.iter().cloned(), move |id| {
                let remote = Arc::clone(&remote);
                async move { Ok(remote.fetch(EntityKind::Vm, &id).await?) }
            })
            .await;

        let current: Vec<EntityState> = located
            .succeeded()
            .filter_map(|o| o.value().cloned())
            .collect();
        let mut plans = plan_migrations(rng, &current, hosts)?.into_iter();

        let tasks = located
            .into_outcomes()
            .into_iter()
            .map(|located| {
                let target = match located.result {
                    Ok(_) => plans
                        .next()
                        .map(|plan| plan.target_host)
                        .ok_or_else(|| {
                            ExecutorError::InvalidArgument(format!(
                                "{} 没有迁移计划",
                                located.entity
                            ))
                        }),
                    Err(e) => Err(e),
                };
                Task::new(located.entity, target)
            })
            .collect();

        let timing = self.timing;
        let cancel = self.cancel.clone();
        let remote = Arc::clone(&self.remote);
        let outcome = self
            .runner()
            .run(tasks, move |id, target: Result<String>| {
                let remote = Arc::clone(&remote);
                let cancel = cancel.clone();
                async move {
                    let target = target?;
                    let mut action = OrchestratedAction::live_migrate_vm(&id, &target, timing);
                    if let Some(token) = cancel {
                        action = action.with_cancel(token);
                    }
                    action.execute_on(remote.as_ref()).await
                }
            })
            .await;

        outcome.log_summary("批量迁移");
        Ok(outcome)
    }

    /// 批量创建快照，快照名为 `{prefix}-{vm_id}`
    pub async fn snapshot_all(&self, ids: &[String], prefix: &str) -> BatchOutcome<EntityState> {
        let timing = self.timing;
        let cancel = self.cancel.clone();
        let tasks = ids
            .iter()
            .map(|id| Task::new(id.clone(), format!("{}-{}", prefix, id)))
            .collect();

        let remote = Arc::clone(&self.remote);
        let outcome = self
            .runner()
            .run(tasks, move |id, name| {
                let remote = Arc::clone(&remote);
                let mut action = OrchestratedAction::create_snapshot(&id, &name, timing);
                if let Some(token) = &cancel {
                    action = action.with_cancel(token.clone());
                }
                async move { action.execute_on(remote.as_ref()).await }
            })
            .await;

        outcome.log_summary("批量快照");
        outcome
    }

    /// 磁盘热迁移到目标存储池
    pub async fn migrate_disk(&self, disk_id: &str, target_pool: &str) -> Result<EntityState> {
        let mut action = OrchestratedAction::live_migrate_disk(disk_id, target_pool, self.timing);
        if let Some(token) = &self.cancel {
            action = action.with_cancel(token.clone());
        }
        action.execute_on(self.remote.as_ref()).await
    }
}

/// 虚拟机删除策略
pub struct VmTeardown<C> {
    remote: Arc<C>,
    timing: WaitTiming,
    final_timing: WaitTiming,
    cancel: Option<CancellationToken>,
}

impl<C> VmTeardown<C> {
    pub fn new(remote: Arc<C>, timing: WaitTiming, final_timing: WaitTiming) -> Self {
        Self {
            remote,
            timing,
            final_timing,
            cancel: None,
        }
    }
}

#[async_trait]
impl<C: RemoteApi + 'static> Teardown for VmTeardown<C> {
    /// 未关机的虚拟机先强制关机并等待进入 shutoff
    async fn pre_check(&self, item: &str) -> Result<()> {
        let state = self.remote.fetch(EntityKind::Vm, item).await?;
        if normalize_status(&state.status) == "shutoff" {
            return Ok(());
        }

        info!("{} 当前状态 {}，删除前强制关机", item, state.status);
        let accepted = self
            .remote
            .invoke(EntityKind::Vm, item, actions::SHUTDOWN, &json!({ "force": true }))
            .await?;
        if !accepted {
            return Err(ExecutorError::ActionRejected(format!("vm {} shutdown", item)));
        }

        let mut wait = ConditionWait::status(EntityKind::Vm, item, ["shutoff"])
            .with_timing(self.timing)
            .treat_absence_as(AbsencePolicy::Success);
        if let Some(token) = &self.cancel {
            wait = wait.with_cancel(token.clone());
        }

        match wait.run(self.remote.as_ref()).await? {
            Convergence::Reached(_) => Ok(()),
            Convergence::Absent => Err(ExecutorError::EntityNotFound(format!("vm {}", item))),
        }
    }

    async fn remove(&self, item: &str) -> Result<()> {
        let accepted = self
            .remote
            .invoke(EntityKind::Vm, item, actions::DELETE, &json!({}))
            .await?;
        if !accepted {
            return Err(ExecutorError::ActionRejected(format!("vm {} delete", item)));
        }
        Ok(())
    }

    /// 确认整批虚拟机都已从平台消失
    async fn post_check(&self, items: &[String]) -> Result<bool> {
        match wait_until_all_absent(
            self.remote.as_ref(),
            EntityKind::Vm,
            items,
            self.final_timing,
            self.cancel.as_ref(),
        )
        .await
        {
            Ok(()) => Ok(true),
            Err(e) if e.is_timeout() => {
                warn!("⚠️  删除后仍有虚拟机存在: {}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// 工具函数
// ============================================================================

/// 名称模式匹配
/// 支持: * (全部), prefix* (前缀), *suffix (后缀), *middle* (包含), exact (精确)
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        _ if pattern == "*" || pattern == "**" => true,
        (Some(rest), Some(_)) => name.contains(&rest[..rest.len() - 1]),
        (Some(suffix), None) => name.ends_with(suffix),
        (None, Some(prefix)) => name.starts_with(prefix),
        (None, None) => name == pattern,
    }
}
