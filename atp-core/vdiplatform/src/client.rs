//! VDI 平台客户端核心实现

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::api::{DomainApi, HostApi, SnapshotApi, StorageApi};
use crate::error::{is_not_found_message, Result, VdiError};
use crate::models::ApiResponse;

/// VDI 平台客户端配置
#[derive(Debug, Clone)]
pub struct VdiConfig {
    /// 连接超时（秒）
    pub connect_timeout: u64,

    /// 请求超时（秒）
    pub request_timeout: u64,

    /// 是否验证 SSL 证书
    pub verify_ssl: bool,
}

impl Default for VdiConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 10,
            request_timeout: 30,
            verify_ssl: true,
        }
    }
}

/// VDI 平台客户端
pub struct VdiClient {
    /// API 基础 URL
    base_url: String,

    /// HTTP 客户端
    http_client: Client,

    /// 认证令牌
    access_token: Arc<RwLock<Option<String>>>,
}

impl VdiClient {
    /// 创建新的 VDI 客户端
    pub fn new(base_url: &str, config: VdiConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| VdiError::HttpError(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    /// 认证登录
    ///
    /// # Arguments
    /// * `username` - 用户名
    /// * `password` - 明文密码(将自动转换为MD5)
    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        info!("VDI 客户端登录: {}", username);

        let password_md5 = format!("{:x}", md5::compute(password.as_bytes()));

        let login_url = format!("{}/ocloud/v1/login", self.base_url);
        let login_data = serde_json::json!({
            "username": username,
            "password": password_md5,
            "client": ""
        });

        let response = self
            .http_client
            .post(&login_url)
            .json(&login_data)
            .send()
            .await
            .map_err(|e| VdiError::HttpError(e.to_string()))?;

        let login_result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VdiError::ParseError(e.to_string()))?;

        if login_result["status"].as_i64().unwrap_or(-1) != 0 {
            let msg = login_result["msg"].as_str().unwrap_or("未知错误");
            return Err(VdiError::AuthError(format!("VDI 登录失败: {}", msg)));
        }

        let token = login_result["data"]["token"]
            .as_str()
            .ok_or_else(|| VdiError::AuthError("未获取到 Token".to_string()))?
            .to_string();

        *self.access_token.write().await = Some(token);

        info!("VDI 客户端登录成功");
        Ok(())
    }

    /// 获取虚拟机管理 API
    pub fn domain(&self) -> DomainApi<'_> {
        DomainApi::new(self)
    }

    /// 获取主机管理 API
    pub fn host(&self) -> HostApi<'_> {
        HostApi::new(self)
    }

    /// 获取快照管理 API
    pub fn snapshot(&self) -> SnapshotApi<'_> {
        SnapshotApi::new(self)
    }

    /// 获取存储管理 API
    pub fn storage(&self) -> StorageApi<'_> {
        StorageApi::new(self)
    }

    /// 发送 HTTP 请求并解开 `{status, msg, data}` 响应封装
    pub(crate) async fn request<T: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<T>,
    ) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);
        debug!("VDI API 请求: {} {}", method, url);

        let token = self.get_token().await?;

        let mut request = self
            .http_client
            .request(method, &url)
            .header("Token", token)
            .header("Content-Type", "application/json");

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                VdiError::Timeout(format!("{}: {}", path, e))
            } else {
                VdiError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(VdiError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "无法读取错误响应".to_string());
            warn!("API 请求失败: {} - {}", status, error_text);
            return Err(VdiError::ApiError(status.as_u16(), error_text));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VdiError::ParseError(e.to_string()))?;

        unwrap_envelope(path, body)
    }

    /// 获取当前访问令牌
    pub async fn get_token(&self) -> Result<String> {
        let token = self.access_token.read().await;
        token
            .clone()
            .ok_or_else(|| VdiError::AuthError("未认证，请先登录".to_string()))
    }
}

/// 解开平台响应封装，`status != 0` 转换为错误
pub(crate) fn unwrap_envelope<R: DeserializeOwned>(
    path: &str,
    body: serde_json::Value,
) -> Result<R> {
    let envelope: ApiResponse<serde_json::Value> =
        serde_json::from_value(body).map_err(|e| VdiError::ParseError(e.to_string()))?;

    if envelope.status != 0 {
        let msg = envelope.msg.unwrap_or_else(|| "未知错误".to_string());
        if is_not_found_message(&msg) {
            return Err(VdiError::NotFound(format!("{}: {}", path, msg)));
        }
        return Err(VdiError::OperationFailed(format!(
            "{} (status={}): {}",
            path, envelope.status, msg
        )));
    }

    let data = envelope.data.unwrap_or(serde_json::Value::Null);
    serde_json::from_value(data).map_err(|e| VdiError::ParseError(format!("{}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Domain;
    use serde_json::json;

    #[test]
    fn test_vdi_client_creation() {
        let client = VdiClient::new("http://192.168.1.11:8088/", VdiConfig::default());
        assert!(client.is_ok());
        assert_eq!(client.unwrap().base_url, "http://192.168.1.11:8088");
    }

    #[tokio::test]
    async fn test_request_requires_login() {
        let client = VdiClient::new("http://127.0.0.1:1", VdiConfig::default()).unwrap();
        let result: Result<()> = client.request(Method::GET, "/ocloud/v1/host", None::<()>).await;
        assert!(matches!(result, Err(VdiError::AuthError(_))));
    }

    #[test]
    fn test_unwrap_envelope_success() {
        let body = json!({
            "status": 0,
            "msg": "success",
            "data": { "id": "vm-1", "name": "win10-01", "status": 1, "hostId": "h1" }
        });
        let domain: Domain = unwrap_envelope("/ocloud/v1/domain/vm-1", body).unwrap();
        assert_eq!(domain.id, "vm-1");
        assert_eq!(domain.host_id.as_deref(), Some("h1"));
    }

    #[test]
    fn test_unwrap_envelope_unit_without_data() {
        let body = json!({ "status": 0, "msg": "success" });
        let result: Result<()> = unwrap_envelope("/ocloud/v1/domain/start", body);
        assert!(result.is_ok());
    }

    #[test]
    fn test_unwrap_envelope_not_found() {
        let body = json!({ "status": 1, "msg": "虚拟机不存在" });
        let result: Result<Domain> = unwrap_envelope("/ocloud/v1/domain/vm-x", body);
        assert!(matches!(result, Err(VdiError::NotFound(_))));
    }

    #[test]
    fn test_unwrap_envelope_failure() {
        let body = json!({ "status": 500, "msg": "主机资源不足" });
        let result: Result<()> = unwrap_envelope("/ocloud/v1/domain/start", body);
        let err = result.unwrap_err();
        assert!(matches!(err, VdiError::OperationFailed(_)));
        assert!(!err.is_not_found());
    }
}
