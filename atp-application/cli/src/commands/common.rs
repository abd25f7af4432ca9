//! 公共工具函数模块
//!
//! 提供各命令模块共享的功能，包括：
//! - 配置加载
//! - VDI 客户端创建和登录
//! - Ctrl-C 取消

use std::sync::Arc;

use anyhow::{Context, Result};
use atp_converge::{select_vms, TestConfig, VdiConnectionConfig};
use atp_vdiplatform::{Domain, VdiClient};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 加载并校验配置
pub fn load_config(path: Option<&str>) -> Result<TestConfig> {
    let config = match path {
        Some(path) => TestConfig::load_from_path(path)?,
        None => TestConfig::load()?,
    };
    config.validate().context("配置校验失败")?;
    Ok(config)
}

/// 创建并登录VDI客户端
pub async fn create_vdi_client(vdi_config: &VdiConnectionConfig) -> Result<VdiClient> {
    let mut client = VdiClient::new(&vdi_config.base_url, vdi_config.client_config())
        .context("创建VDI客户端失败")?;

    client
        .login(&vdi_config.username, &vdi_config.password)
        .await
        .context("VDI登录失败")?;

    Ok(client)
}

/// 按配置连接 VDI 平台
pub async fn connect(config: &TestConfig) -> Result<Arc<VdiClient>> {
    let client = create_vdi_client(config.require_vdi()?).await?;
    Ok(Arc::new(client))
}

/// 按名称模式选择目标虚拟机，没有匹配时报错
pub async fn target_vms(client: &VdiClient, pattern: &str) -> Result<Vec<Domain>> {
    let vms = select_vms(client, pattern)
        .await
        .with_context(|| format!("查询虚拟机失败 (模式: {})", pattern))?;
    if vms.is_empty() {
        anyhow::bail!("没有匹配模式 {} 的虚拟机", pattern);
    }
    info!("模式 {} 匹配 {} 台虚拟机", pattern, vms.len());
    Ok(vms)
}

/// Ctrl-C 时取消正在进行的批量操作
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⚠️  收到中断信号，正在取消...");
            trigger.cancel();
        }
    });
    token
}
