//! 快照 API
//!
//! 快照的创建、删除和恢复都是异步任务：接口只返回任务已受理，
//! 完成与否需要轮询快照详情或所属虚拟机的状态。

use reqwest::Method;
use tracing::{debug, info};

use crate::client::VdiClient;
use crate::error::Result;
use crate::models::Snapshot;

fn domain_snapshots_path(domain_id: &str) -> String {
    format!("/ocloud/v1/domain/{}/snapshot", domain_id)
}

fn snapshot_path(snapshot_id: &str) -> String {
    format!("/ocloud/v1/snapshot/{}", snapshot_id)
}

/// 快照 API
pub struct SnapshotApi<'a> {
    client: &'a VdiClient,
}

impl<'a> SnapshotApi<'a> {
    pub(crate) fn new(client: &'a VdiClient) -> Self {
        Self { client }
    }

    /// 为虚拟机创建快照，返回的快照状态通常为 creating
    pub async fn create(
        &self,
        domain_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Snapshot> {
        info!("下发快照创建: {} -> {}", domain_id, name);
        let body = serde_json::json!({
            "name": name,
            "description": description,
        });
        self.client
            .request(Method::POST, &domain_snapshots_path(domain_id), Some(body))
            .await
    }

    /// 查询快照详情（轮询使用）
    pub async fn get(&self, snapshot_id: &str) -> Result<Snapshot> {
        debug!("查询快照: {}", snapshot_id);
        self.client
            .request(Method::GET, &snapshot_path(snapshot_id), None::<()>)
            .await
    }

    pub async fn delete(&self, snapshot_id: &str) -> Result<()> {
        info!("下发快照删除: {}", snapshot_id);
        self.client
            .request(Method::DELETE, &snapshot_path(snapshot_id), None::<()>)
            .await
    }

    /// 用快照恢复所属虚拟机
    pub async fn restore(&self, snapshot_id: &str) -> Result<()> {
        info!("下发快照恢复: {}", snapshot_id);
        let path = format!("{}/restore", snapshot_path(snapshot_id));
        self.client.request(Method::POST, &path, None::<()>).await
    }
}
