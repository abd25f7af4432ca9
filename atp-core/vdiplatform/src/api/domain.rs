//! 虚拟机管理 API
//!
//! 提供虚拟机生命周期操作，包括：
//! - 查询：列表、详情
//! - 基本操作：启动、关闭、重启、删除
//! - 热迁移：迁移到指定主机
//!
//! 所有变更操作只表示请求已被平台接受，是否完成需要调用方轮询状态确认。

use reqwest::Method;
use tracing::info;

use crate::client::VdiClient;
use crate::error::Result;
use crate::models::{Domain, PageData};

/// 虚拟机管理 API
pub struct DomainApi<'a> {
    client: &'a VdiClient,
}

impl<'a> DomainApi<'a> {
    /// 创建新的虚拟机 API 实例
    pub(crate) fn new(client: &'a VdiClient) -> Self {
        Self { client }
    }

    /// 查询虚拟机列表(支持分页)
    ///
    /// # Arguments
    /// * `page_num` - 页码(从1开始)
    /// * `page_size` - 每页数量
    pub async fn list_paged(&self, page_num: u32, page_size: u32) -> Result<Vec<Domain>> {
        info!("查询虚拟机列表: 第{}页, 每页{}条", page_num, page_size);
        let page: PageData<Domain> = self
            .client
            .request(
                Method::GET,
                &format!("/ocloud/v1/domain?pageNum={}&pageSize={}", page_num, page_size),
                None::<()>,
            )
            .await?;
        Ok(page.list)
    }

    /// 查询所有虚拟机
    pub async fn list_all(&self) -> Result<Vec<Domain>> {
        self.list_paged(1, 1000).await
    }

    /// 查询虚拟机详情
    pub async fn get(&self, domain_id: &str) -> Result<Domain> {
        info!("查询虚拟机详情: {}", domain_id);
        self.client
            .request(
                Method::GET,
                &format!("/ocloud/v1/domain/{}", domain_id),
                None::<()>,
            )
            .await
    }

    /// 启动虚拟机
    pub async fn start(&self, domain_id: &str) -> Result<()> {
        info!("启动虚拟机: {}", domain_id);
        self.client
            .request(
                Method::POST,
                "/ocloud/v1/domain/start",
                Some(serde_json::json!({ "domain_id": domain_id })),
            )
            .await
    }

    /// 关闭虚拟机
    ///
    /// # Arguments
    /// * `force` - 是否强制关机（断电）
    pub async fn shutdown(&self, domain_id: &str, force: bool) -> Result<()> {
        info!("关闭虚拟机: {} (强制: {})", domain_id, force);
        self.client
            .request(
                Method::POST,
                "/ocloud/v1/domain/close",
                Some(serde_json::json!({ "domain_id": domain_id, "is_force": force })),
            )
            .await
    }

    /// 重启虚拟机
    pub async fn reboot(&self, domain_id: &str) -> Result<()> {
        info!("重启虚拟机: {}", domain_id);
        self.client
            .request(
                Method::POST,
                "/ocloud/v1/domain/reboot",
                Some(serde_json::json!({ "domain_id": domain_id })),
            )
            .await
    }

    /// 删除虚拟机（彻底删除，不进入回收站）
    pub async fn delete(&self, domain_id: &str) -> Result<()> {
        info!("删除虚拟机: {}", domain_id);
        self.client
            .request(
                Method::DELETE,
                "/ocloud/v1/domain/delete",
                Some(serde_json::json!({ "domain_id": domain_id, "is_recycle": 0 })),
            )
            .await
    }

    /// 热迁移虚拟机到目标主机
    pub async fn migrate(&self, domain_id: &str, host_id: &str) -> Result<()> {
        info!("迁移虚拟机: {} -> 主机 {}", domain_id, host_id);
        self.client
            .request(
                Method::POST,
                &format!("/ocloud/v1/domain/{}/migrate", domain_id),
                Some(serde_json::json!({ "hostId": host_id })),
            )
            .await
    }
}
