//! 多虚拟机迁移计划
//!
//! 为每台虚拟机从候选主机中随机选择一个与当前所在主机不同的目标。
//! 随机数发生器由调用方持有并传入，同一种子总是得到同一份计划。

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::remote::EntityState;
use crate::{ExecutorError, Result};

/// 单台虚拟机的迁移计划
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub vm_id: String,
    pub source_host: Option<String>,
    pub target_host: String,
}

/// 生成迁移计划
///
/// 任意一台虚拟机没有可选目标主机时返回 `InvalidArgument`。
pub fn plan_migrations<R: Rng + ?Sized>(
    rng: &mut R,
    vms: &[EntityState],
    hosts: &[String],
) -> Result<Vec<MigrationPlan>> {
    let mut plans = Vec::with_capacity(vms.len());

    for vm in vms {
        let candidates: Vec<&String> = hosts
            .iter()
            .filter(|h| vm.location.as_deref() != Some(h.as_str()))
            .collect();

        let target = candidates.choose(rng).ok_or_else(|| {
            ExecutorError::InvalidArgument(format!(
                "虚拟机 {} 没有可迁移的目标主机 (当前: {})",
                vm.id,
                vm.location.as_deref().unwrap_or("未知")
            ))
        })?;

        info!(
            "迁移计划: {} {} -> {}",
            vm.id,
            vm.location.as_deref().unwrap_or("未知"),
            target
        );
        plans.push(MigrationPlan {
            vm_id: vm.id.clone(),
            source_host: vm.location.clone(),
            target_host: (*target).clone(),
        });
    }

    Ok(plans)
}

/// 创建随机数发生器：给定种子时可复现，否则使用系统熵
pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
