//! 主机管理 API

use reqwest::Method;
use tracing::info;

use crate::client::VdiClient;
use crate::error::Result;
use crate::models::{Host, PageData};

/// 主机管理 API
pub struct HostApi<'a> {
    client: &'a VdiClient,
}

impl<'a> HostApi<'a> {
    /// 创建新的主机 API 实例
    pub(crate) fn new(client: &'a VdiClient) -> Self {
        Self { client }
    }

    /// 查询所有主机
    pub async fn list_all(&self) -> Result<Vec<Host>> {
        info!("查询主机列表");
        let page: PageData<Host> = self
            .client
            .request(Method::GET, "/ocloud/v1/host?pageNum=1&pageSize=1000", None::<()>)
            .await?;
        Ok(page.list)
    }

    /// 查询主机详情
    pub async fn get(&self, host_id: &str) -> Result<Host> {
        info!("查询主机详情: {}", host_id);
        self.client
            .request(Method::GET, &format!("/ocloud/v1/host/{}", host_id), None::<()>)
            .await
    }
}
