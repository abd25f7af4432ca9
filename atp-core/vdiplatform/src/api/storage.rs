//! 存储管理 API
//!
//! 提供存储卷（虚拟磁盘）查询、热迁移和删除。

use reqwest::Method;
use tracing::info;

use crate::client::VdiClient;
use crate::error::Result;
use crate::models::Volume;

/// 存储管理 API
pub struct StorageApi<'a> {
    client: &'a VdiClient,
}

impl<'a> StorageApi<'a> {
    /// 创建新的存储 API 实例
    pub(crate) fn new(client: &'a VdiClient) -> Self {
        Self { client }
    }

    /// 查询存储卷详情
    pub async fn get_volume(&self, volume_id: &str) -> Result<Volume> {
        info!("查询存储卷详情: {}", volume_id);
        self.client
            .request(
                Method::GET,
                &format!("/ocloud/v1/storage-volume/{}", volume_id),
                None::<()>,
            )
            .await
    }

    /// 存储卷热迁移到目标存储池
    ///
    /// 请求被接受后立即返回，迁移进度需通过轮询存储卷的存储池和状态确认。
    pub async fn migrate_volume(&self, volume_id: &str, storage_pool_id: &str) -> Result<()> {
        info!("迁移存储卷: {} -> 存储池 {}", volume_id, storage_pool_id);
        self.client
            .request(
                Method::POST,
                &format!("/ocloud/v1/storage-volume/{}/migrate", volume_id),
                Some(serde_json::json!({ "storagePoolId": storage_pool_id })),
            )
            .await
    }

    /// 删除存储卷
    pub async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        info!("删除存储卷: {}", volume_id);
        self.client
            .request(
                Method::DELETE,
                &format!("/ocloud/v1/storage-volume/{}", volume_id),
                None::<()>,
            )
            .await
    }
}
