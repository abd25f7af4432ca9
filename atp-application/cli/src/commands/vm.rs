//! 虚拟机批量操作命令

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use atp_converge::{
    online_hosts, plan_migrations, seeded_rng, BatchOutcome, DrainReport, DrainStatus,
    EntityKind, EntityState, MigrationPlan, TestConfig, VmLifecycle,
};
use atp_vdiplatform::{Domain, VdiClient};
use serde::Serialize;
use tracing::info;

use crate::commands::common::{cancel_on_ctrl_c, connect, load_config, target_vms};
use crate::commands::output::{output_formatted, TableRow};
use crate::VmAction;

pub async fn handle(action: VmAction, config_path: Option<&str>) -> Result<()> {
    match action {
        VmAction::Start {
            pattern,
            dry_run,
            format,
        } => start(config_path, &pattern, dry_run, &format).await?,
        VmAction::Stop {
            pattern,
            force,
            dry_run,
            format,
        } => stop(config_path, &pattern, force, dry_run, &format).await?,
        VmAction::Remove {
            pattern,
            dry_run,
            format,
        } => remove(config_path, &pattern, dry_run, &format).await?,
        VmAction::Wait {
            pattern,
            status,
            format,
        } => wait(config_path, &pattern, &status, &format).await?,
        VmAction::Migrate {
            pattern,
            seed,
            dry_run,
            format,
        } => migrate(config_path, &pattern, seed, dry_run, &format).await?,
    }
    Ok(())
}

// ============================================
// 输出行
// ============================================

/// 虚拟机当前信息（预览模式）
#[derive(Debug, Serialize)]
struct VmRow {
    name: String,
    id: String,
    status: String,
    host: String,
}

impl TableRow for VmRow {
    fn headers() -> Vec<&'static str> {
        vec!["虚拟机名称", "ID", "状态", "主机"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.id.clone(),
            self.status.clone(),
            self.host.clone(),
        ]
    }
}

/// 单台虚拟机的操作结果
#[derive(Debug, Serialize)]
struct ResultRow {
    name: String,
    id: String,
    success: bool,
    detail: String,
    elapsed_secs: f64,
}

impl TableRow for ResultRow {
    fn headers() -> Vec<&'static str> {
        vec!["虚拟机名称", "ID", "结果", "状态/错误", "耗时(秒)"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.id.clone(),
            if self.success { "✅" } else { "❌" }.to_string(),
            self.detail.clone(),
            format!("{:.1}", self.elapsed_secs),
        ]
    }
}

/// 迁移计划
#[derive(Debug, Serialize)]
struct PlanRow {
    name: String,
    id: String,
    source_host: String,
    target_host: String,
}

impl TableRow for PlanRow {
    fn headers() -> Vec<&'static str> {
        vec!["虚拟机名称", "ID", "源主机", "目标主机"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.id.clone(),
            self.source_host.clone(),
            self.target_host.clone(),
        ]
    }
}

fn vm_rows(vms: &[Domain]) -> Vec<VmRow> {
    vms.iter()
        .map(|vm| VmRow {
            name: vm.name.clone(),
            id: vm.id.clone(),
            status: vm.domain_status().display_name().to_string(),
            host: vm
                .host_name
                .clone()
                .or_else(|| vm.host_id.clone())
                .unwrap_or_default(),
        })
        .collect()
}

fn names_by_id(vms: &[Domain]) -> HashMap<String, String> {
    vms.iter().map(|vm| (vm.id.clone(), vm.name.clone())).collect()
}

fn result_rows(vms: &[Domain], outcome: &BatchOutcome<EntityState>) -> Vec<ResultRow> {
    let names = names_by_id(vms);
    outcome
        .outcomes()
        .iter()
        .map(|task| ResultRow {
            name: names.get(&task.entity).cloned().unwrap_or_default(),
            id: task.entity.clone(),
            success: task.ok(),
            detail: match &task.result {
                Ok(state) => state.status.clone(),
                Err(e) => e.to_string(),
            },
            elapsed_secs: task.elapsed.as_secs_f64(),
        })
        .collect()
}

fn drain_rows(vms: &[Domain], report: &DrainReport) -> Vec<ResultRow> {
    let names = names_by_id(vms);
    report
        .outcomes
        .iter()
        .map(|outcome| ResultRow {
            name: names.get(&outcome.item).cloned().unwrap_or_default(),
            id: outcome.item.clone(),
            success: outcome.status.is_success(),
            detail: match &outcome.status {
                DrainStatus::Removed => "已删除".to_string(),
                DrainStatus::AlreadyAbsent => "已不存在".to_string(),
                DrainStatus::Failed(reason) => reason.clone(),
            },
            elapsed_secs: report.elapsed.as_secs_f64(),
        })
        .collect()
}

fn ids_of(vms: &[Domain]) -> Vec<String> {
    vms.iter().map(|vm| vm.id.clone()).collect()
}

fn finish(what: &str, failed: usize, total: usize) -> Result<()> {
    if failed > 0 {
        anyhow::bail!("{}: {}/{} 台虚拟机失败", what, failed, total);
    }
    info!("✅ {}: {} 台虚拟机全部成功", what, total);
    Ok(())
}

fn lifecycle(client: &Arc<VdiClient>, config: &TestConfig) -> VmLifecycle<VdiClient> {
    VmLifecycle::from_config(Arc::clone(client), config).with_cancel(cancel_on_ctrl_c())
}

// ============================================
// 命令实现
// ============================================

async fn start(
    config_path: Option<&str>,
    pattern: &str,
    dry_run: bool,
    format: &str,
) -> Result<()> {
    let config = load_config(config_path)?;
    let client = connect(&config).await?;
    let vms = target_vms(&client, pattern).await?;

    if dry_run {
        println!("🔍 预览模式: 将启动以下 {} 台虚拟机\n", vms.len());
        return output_formatted(&vm_rows(&vms), format);
    }

    let outcome = lifecycle(&client, &config).start_all(&ids_of(&vms)).await;
    output_formatted(&result_rows(&vms, &outcome), format)?;
    finish("批量启动", outcome.failed().count(), outcome.len())
}

async fn stop(
    config_path: Option<&str>,
    pattern: &str,
    force: bool,
    dry_run: bool,
    format: &str,
) -> Result<()> {
    let config = load_config(config_path)?;
    let client = connect(&config).await?;
    let vms = target_vms(&client, pattern).await?;

    if dry_run {
        println!(
            "🔍 预览模式: 将{}关闭以下 {} 台虚拟机\n",
            if force { "强制" } else { "" },
            vms.len()
        );
        return output_formatted(&vm_rows(&vms), format);
    }

    let outcome = lifecycle(&client, &config)
        .stop_all(&ids_of(&vms), force)
        .await;
    output_formatted(&result_rows(&vms, &outcome), format)?;
    finish("批量关机", outcome.failed().count(), outcome.len())
}

async fn remove(
    config_path: Option<&str>,
    pattern: &str,
    dry_run: bool,
    format: &str,
) -> Result<()> {
    let config = load_config(config_path)?;
    let client = connect(&config).await?;
    let vms = target_vms(&client, pattern).await?;

    if dry_run {
        println!("🔍 预览模式: 将删除以下 {} 台虚拟机\n", vms.len());
        return output_formatted(&vm_rows(&vms), format);
    }

    let report = lifecycle(&client, &config).remove_all(&ids_of(&vms)).await;
    output_formatted(&drain_rows(&vms, &report), format)?;

    if !report.batch_converged {
        anyhow::bail!(
            "批量删除最终确认未通过: {}",
            report
                .post_check_error
                .as_deref()
                .unwrap_or("超时后仍有虚拟机存在")
        );
    }
    finish("批量删除", report.failed_items().len(), report.outcomes.len())
}

async fn wait(
    config_path: Option<&str>,
    pattern: &str,
    expected: &[String],
    format: &str,
) -> Result<()> {
    let config = load_config(config_path)?;
    let client = connect(&config).await?;
    let vms = target_vms(&client, pattern).await?;

    let expected: Vec<&str> = expected.iter().map(String::as_str).collect();
    let outcome = lifecycle(&client, &config)
        .wait_all(&ids_of(&vms), &expected)
        .await;
    output_formatted(&result_rows(&vms, &outcome), format)?;
    finish("状态等待", outcome.failed().count(), outcome.len())
}

async fn migrate(
    config_path: Option<&str>,
    pattern: &str,
    seed: Option<u64>,
    dry_run: bool,
    format: &str,
) -> Result<()> {
    let config = load_config(config_path)?;
    let client = connect(&config).await?;
    let vms = target_vms(&client, pattern).await?;
    let hosts = online_hosts(&client).await.context("查询在线主机失败")?;

    let seed = seed.or(config.migration.seed);
    let mut rng = seeded_rng(seed);
    info!("迁移随机种子: {:?}", seed);

    if dry_run {
        let current: Vec<EntityState> = vms.iter().map(vm_state).collect();
        let plans = plan_migrations(&mut rng, &current, &hosts)?;
        println!("🔍 预览模式: 迁移计划\n");
        return output_formatted(&plan_rows(&vms, &plans), format);
    }

    let outcome = lifecycle(&client, &config)
        .migrate_all(&mut rng, &ids_of(&vms), &hosts)
        .await?;
    output_formatted(&result_rows(&vms, &outcome), format)?;
    finish("批量迁移", outcome.failed().count(), outcome.len())
}

fn vm_state(vm: &Domain) -> EntityState {
    EntityState {
        kind: EntityKind::Vm,
        id: vm.id.clone(),
        name: vm.name.clone(),
        status: vm.domain_status().name().to_string(),
        location: vm.host_id.clone(),
    }
}

fn plan_rows(vms: &[Domain], plans: &[MigrationPlan]) -> Vec<PlanRow> {
    let names = names_by_id(vms);
    plans
        .iter()
        .map(|plan| PlanRow {
            name: names.get(&plan.vm_id).cloned().unwrap_or_default(),
            id: plan.vm_id.clone(),
            source_host: plan.source_host.clone().unwrap_or_else(|| "未知".to_string()),
            target_host: plan.target_host.clone(),
        })
        .collect()
}
