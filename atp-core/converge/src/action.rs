//! 编排操作（两阶段收敛）
//!
//! 状态机：`Requested → InProgress → Converged`，任何一步失败进入 `Failed`。
//!
//! 1. 下发变更操作（只下发一次，不重试）
//! 2. 等待中间信号（例如磁盘出现在新存储池、虚拟机进入迁移中），进入 `InProgress`
//! 3. 等待最终状态，进入 `Converged`
//!
//! 必须先观察到中间信号才会开始等待最终状态。操作静默失败并回退到原状态时，
//! 单独等待最终状态可能误判为成功，中间信号排除了这种情况。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::remote::{actions, ActionInvoker, EntityFetcher, EntityKind, EntityState, RemoteApi};
use crate::wait::{normalize_status, ConditionWait, Convergence, WaitTiming};
use crate::{ExecutorError, Result};

/// 编排操作阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionPhase {
    Requested,
    InProgress,
    Converged,
    Failed,
}

/// 编排操作
#[derive(Debug)]
pub struct OrchestratedAction {
    name: String,
    kind: EntityKind,
    id: String,
    action: String,
    params: Value,
    intermediate: ConditionWait,
    completion: ConditionWait,
    phase: ActionPhase,
    history: Vec<(ActionPhase, Duration)>,
    executed: bool,
}

impl OrchestratedAction {
    pub fn new(
        name: impl Into<String>,
        kind: EntityKind,
        id: impl Into<String>,
        action: impl Into<String>,
        params: Value,
        intermediate: ConditionWait,
        completion: ConditionWait,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            id: id.into(),
            action: action.into(),
            params,
            intermediate,
            completion,
            phase: ActionPhase::Requested,
            history: Vec::new(),
            executed: false,
        }
    }

    /// 同时为两个等待阶段设置取消令牌
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.intermediate = self.intermediate.with_cancel(token.clone());
        self.completion = self.completion.with_cancel(token);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> ActionPhase {
        self.phase
    }

    /// 阶段变化记录：(阶段, 距开始执行的耗时)
    pub fn history(&self) -> &[(ActionPhase, Duration)] {
        &self.history
    }

    /// 在同时具备查询和下发能力的远程平台上执行
    pub async fn execute_on<C: RemoteApi>(&mut self, remote: &C) -> Result<EntityState> {
        self.execute(remote, remote).await
    }

    /// 执行编排操作，返回最终观察到的实体状态
    pub async fn execute(
        &mut self,
        fetcher: &dyn EntityFetcher,
        invoker: &dyn ActionInvoker,
    ) -> Result<EntityState> {
        if self.executed {
            return Err(ExecutorError::InvalidArgument(format!(
                "{} 已执行过，变更操作不会重复下发",
                self.name
            )));
        }
        self.executed = true;

        let started = Instant::now();
        self.transition(ActionPhase::Requested, started);
        info!("{}: 下发 {} {} {}", self.name, self.kind, self.id, self.action);

        let result = self.drive(fetcher, invoker, started).await;
        if let Err(e) = &result {
            self.transition(ActionPhase::Failed, started);
            error!("❌ {} 失败: {}", self.name, e);
        }
        result
    }

    async fn drive(
        &mut self,
        fetcher: &dyn EntityFetcher,
        invoker: &dyn ActionInvoker,
        started: Instant,
    ) -> Result<EntityState> {
        let accepted = invoker
            .invoke(self.kind, &self.id, &self.action, &self.params)
            .await?;
        if !accepted {
            return Err(ExecutorError::ActionRejected(format!(
                "{} {} {}",
                self.kind, self.id, self.action
            )));
        }

        self.intermediate.run(fetcher).await?;
        self.transition(ActionPhase::InProgress, started);
        info!("{}: 已观察到中间状态", self.name);

        match self.completion.run(fetcher).await? {
            Convergence::Reached(state) => {
                self.transition(ActionPhase::Converged, started);
                info!("✅ {} 完成, 耗时 {:?}", self.name, started.elapsed());
                Ok(state)
            }
            Convergence::Absent => Err(ExecutorError::EntityNotFound(format!(
                "{} {}",
                self.kind, self.id
            ))),
        }
    }

    fn transition(&mut self, phase: ActionPhase, started: Instant) {
        self.phase = phase;
        self.history.push((phase, started.elapsed()));
    }

    // ============================================
    // 常用编排操作
    // ============================================

    /// 磁盘热迁移：中间信号为磁盘出现在目标存储池，最终状态为 `ok`
    pub fn live_migrate_disk(disk_id: &str, target_pool: &str, timing: WaitTiming) -> Self {
        let pool = target_pool.to_string();
        let intermediate = ConditionWait::matching(
            EntityKind::Disk,
            disk_id,
            format!("位于存储池 {}", target_pool),
            move |state| state.location.as_deref() == Some(pool.as_str()),
        )
        .with_timing(timing);

        let pool = target_pool.to_string();
        let completion = ConditionWait::matching(
            EntityKind::Disk,
            disk_id,
            format!("在存储池 {} 上状态为 ok", target_pool),
            move |state| {
                state.location.as_deref() == Some(pool.as_str())
                    && normalize_status(&state.status) == "ok"
            },
        )
        .with_timing(timing);

        Self::new(
            format!("磁盘 {} 迁移到 {}", disk_id, target_pool),
            EntityKind::Disk,
            disk_id,
            actions::MIGRATE,
            json!({ "storage_pool_id": target_pool }),
            intermediate,
            completion,
        )
    }

    /// 虚拟机热迁移：中间信号为 `migrating`，最终状态为在目标主机上 `running`
    pub fn live_migrate_vm(vm_id: &str, target_host: &str, timing: WaitTiming) -> Self {
        let intermediate =
            ConditionWait::status(EntityKind::Vm, vm_id, ["migrating"]).with_timing(timing);

        let host = target_host.to_string();
        let completion = ConditionWait::matching(
            EntityKind::Vm,
            vm_id,
            format!("在主机 {} 上运行", target_host),
            move |state| {
                state.location.as_deref() == Some(host.as_str())
                    && normalize_status(&state.status) == "running"
            },
        )
        .with_timing(timing);

        Self::new(
            format!("虚拟机 {} 迁移到 {}", vm_id, target_host),
            EntityKind::Vm,
            vm_id,
            actions::MIGRATE,
            json!({ "host_id": target_host }),
            intermediate,
            completion,
        )
    }

    /// 创建快照：中间信号为 `snapshotting`，最终回到稳定状态
    pub fn create_snapshot(vm_id: &str, snapshot_name: &str, timing: WaitTiming) -> Self {
        let intermediate =
            ConditionWait::status(EntityKind::Vm, vm_id, ["snapshotting"]).with_timing(timing);
        let completion =
            ConditionWait::status(EntityKind::Vm, vm_id, ["running", "shutoff", "paused"])
                .with_timing(timing);

        Self::new(
            format!("虚拟机 {} 创建快照 {}", vm_id, snapshot_name),
            EntityKind::Vm,
            vm_id,
            actions::SNAPSHOT,
            json!({ "name": snapshot_name }),
            intermediate,
            completion,
        )
    }
}
