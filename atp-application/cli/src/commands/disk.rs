//! 磁盘操作命令

use std::sync::Arc;

use anyhow::{Context, Result};
use atp_converge::VmLifecycle;
use serde::Serialize;

use crate::commands::common::{cancel_on_ctrl_c, connect, load_config};
use crate::commands::output::{output_formatted, TableRow};
use crate::DiskAction;

pub async fn handle(action: DiskAction, config_path: Option<&str>) -> Result<()> {
    match action {
        DiskAction::Migrate { disk, pool, format } => {
            migrate(config_path, &disk, &pool, &format).await?
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct DiskRow {
    id: String,
    name: String,
    storage_pool: String,
    status: String,
}

impl TableRow for DiskRow {
    fn headers() -> Vec<&'static str> {
        vec!["磁盘ID", "名称", "存储池", "状态"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.storage_pool.clone(),
            self.status.clone(),
        ]
    }
}

/// 磁盘热迁移：先确认磁盘出现在目标存储池，再等待状态恢复 ok
async fn migrate(config_path: Option<&str>, disk: &str, pool: &str, format: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let client = connect(&config).await?;

    let state = VmLifecycle::from_config(Arc::clone(&client), &config)
        .with_cancel(cancel_on_ctrl_c())
        .migrate_disk(disk, pool)
        .await
        .with_context(|| format!("磁盘 {} 迁移到 {} 失败", disk, pool))?;

    output_formatted(
        &[DiskRow {
            id: state.id,
            name: state.name,
            storage_pool: state.location.unwrap_or_default(),
            status: state.status,
        }],
        format,
    )
}
