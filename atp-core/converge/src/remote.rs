//! 远程平台接口抽象
//!
//! 收敛引擎只依赖两个窄接口：
//! - [`EntityFetcher`]: 按 ID 查询实体当前状态（轮询探针）
//! - [`ActionInvoker`]: 对实体下发命名操作，返回请求是否被接受
//!
//! 操作是否真正完成永远通过状态轮询确认，而不是依赖下发结果。

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 实体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Vm,
    Disk,
    Snapshot,
    Host,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vm => "vm",
            Self::Disk => "disk",
            Self::Snapshot => "snapshot",
            Self::Host => "host",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 实体当前状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    /// 实体类型
    pub kind: EntityKind,

    /// 实体 ID
    pub id: String,

    /// 实体名称
    pub name: String,

    /// 平台上报的状态
    pub status: String,

    /// 所在位置：虚拟机为主机 ID，磁盘为存储池 ID，快照为所属虚拟机 ID
    pub location: Option<String>,
}

impl EntityState {
    pub fn new(kind: EntityKind, id: impl Into<String>, status: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            kind,
            name: id.clone(),
            id,
            status: status.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// 平台支持的操作名称
pub mod actions {
    pub const START: &str = "start";
    pub const SHUTDOWN: &str = "shutdown";
    pub const REBOOT: &str = "reboot";
    pub const DELETE: &str = "delete";
    pub const MIGRATE: &str = "migrate";
    pub const SNAPSHOT: &str = "snapshot";
    pub const RESTORE: &str = "restore";
}

/// 远程调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("实体不存在: {0}")]
    NotFound(String),

    #[error("操作被拒绝: {0}")]
    ActionRejected(String),

    #[error("不支持的操作: {0}")]
    Unsupported(String),

    #[error("操作参数错误: {0}")]
    InvalidParams(String),

    #[error("传输错误: {0}")]
    Transport(String),

    #[error("探针调用超时 ({0:?})")]
    ProbeTimeout(Duration),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// 实体状态查询接口
#[async_trait]
pub trait EntityFetcher: Send + Sync {
    /// 查询实体当前状态，实体不存在时返回 [`RemoteError::NotFound`]
    async fn fetch(&self, kind: EntityKind, id: &str) -> Result<EntityState, RemoteError>;
}

/// 实体操作下发接口
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    /// 下发操作，返回平台是否接受了请求（不代表操作已完成）
    async fn invoke(
        &self,
        kind: EntityKind,
        id: &str,
        action: &str,
        params: &serde_json::Value,
    ) -> Result<bool, RemoteError>;
}

/// 同时具备查询和下发能力的远程平台
pub trait RemoteApi: EntityFetcher + ActionInvoker {}

impl<T: EntityFetcher + ActionInvoker> RemoteApi for T {}
