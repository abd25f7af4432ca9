//! VDI 平台错误定义

use thiserror::Error;

/// VDI 平台错误类型
#[derive(Error, Debug)]
pub enum VdiError {
    #[error("HTTP 错误: {0}")]
    HttpError(String),

    #[error("认证错误: {0}")]
    AuthError(String),

    #[error("API 错误 [{0}]: {1}")]
    ApiError(u16, String),

    #[error("解析错误: {0}")]
    ParseError(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("超时错误: {0}")]
    Timeout(String),

    #[error("资源不存在: {0}")]
    NotFound(String),

    #[error("操作失败: {0}")]
    OperationFailed(String),
}

impl VdiError {
    /// 是否为资源不存在错误
    ///
    /// 平台对已删除资源可能返回 HTTP 404，也可能返回业务错误码，两者都视为不存在。
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::ApiError(404, _) => true,
            Self::ApiError(_, msg) | Self::OperationFailed(msg) => is_not_found_message(msg),
            _ => false,
        }
    }
}

/// 判断平台返回的错误消息是否表示资源不存在
pub fn is_not_found_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    msg.contains("不存在") || lower.contains("not found") || lower.contains("not exist")
}

/// VDI 平台结果类型
pub type Result<T> = std::result::Result<T, VdiError>;
