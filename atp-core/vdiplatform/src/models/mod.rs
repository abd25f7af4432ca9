//! VDI 平台数据模型
//!
//! 平台接口统一返回 `{status, msg, data}` 封装，字段命名为 camelCase。

use serde::{Deserialize, Serialize};

/// API 响应封装
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// 业务状态码（0 表示成功）
    pub status: i64,

    /// 响应消息
    #[serde(default)]
    pub msg: Option<String>,

    /// 响应数据
    #[serde(default)]
    pub data: Option<T>,
}

/// 分页数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageData<T> {
    /// 总记录数
    #[serde(default)]
    pub total: u64,

    /// 数据列表
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
}

// ============================================
// 虚拟机
// ============================================

/// 虚拟机状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainStatus {
    Shutoff,
    Running,
    Paused,
    Hibernated,
    PoweringUp,
    PoweringDown,
    Rebooting,
    Migrating,
    Snapshotting,
    Deleting,
    Error,
    Unknown,
}

impl DomainStatus {
    /// 从平台状态码转换
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Shutoff,
            1 => Self::Running,
            2 => Self::Paused,
            3 => Self::Hibernated,
            4 => Self::PoweringUp,
            5 => Self::PoweringDown,
            6 => Self::Rebooting,
            7 => Self::Migrating,
            8 => Self::Snapshotting,
            9 => Self::Deleting,
            10 => Self::Error,
            _ => Self::Unknown,
        }
    }

    /// 平台状态码
    pub fn code(&self) -> i64 {
        match self {
            Self::Shutoff => 0,
            Self::Running => 1,
            Self::Paused => 2,
            Self::Hibernated => 3,
            Self::PoweringUp => 4,
            Self::PoweringDown => 5,
            Self::Rebooting => 6,
            Self::Migrating => 7,
            Self::Snapshotting => 8,
            Self::Deleting => 9,
            Self::Error => 10,
            Self::Unknown => -1,
        }
    }

    /// 状态名称（用于状态等待匹配）
    pub fn name(&self) -> &'static str {
        match self {
            Self::Shutoff => "shutoff",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Hibernated => "hibernated",
            Self::PoweringUp => "powering_up",
            Self::PoweringDown => "powering_down",
            Self::Rebooting => "rebooting",
            Self::Migrating => "migrating",
            Self::Snapshotting => "snapshotting",
            Self::Deleting => "deleting",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    /// 中文显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Shutoff => "已关机",
            Self::Running => "运行中",
            Self::Paused => "已暂停",
            Self::Hibernated => "已休眠",
            Self::PoweringUp => "启动中",
            Self::PoweringDown => "关机中",
            Self::Rebooting => "重启中",
            Self::Migrating => "迁移中",
            Self::Snapshotting => "快照中",
            Self::Deleting => "删除中",
            Self::Error => "错误",
            Self::Unknown => "未知",
        }
    }
}

/// 虚拟机信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    /// 虚拟机 ID
    pub id: String,

    /// 虚拟机名称
    #[serde(default)]
    pub name: String,

    /// 状态码
    #[serde(default = "unknown_code")]
    pub status: i64,

    /// 所在主机 ID
    #[serde(default)]
    pub host_id: Option<String>,

    /// 所在主机名称
    #[serde(default)]
    pub host_name: Option<String>,

    /// CPU 核心数
    #[serde(default)]
    pub cpu_num: Option<u32>,

    /// 内存大小 (MB)
    #[serde(default)]
    pub memory: Option<u64>,
}

impl Domain {
    /// 解析状态码
    pub fn domain_status(&self) -> DomainStatus {
        DomainStatus::from_code(self.status)
    }
}

fn unknown_code() -> i64 {
    -1
}

// ============================================
// 存储卷 / 快照 / 主机
// ============================================

/// 存储卷（虚拟磁盘）信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// 存储卷 ID
    pub id: String,

    /// 存储卷名称
    #[serde(default)]
    pub name: String,

    /// 所在存储池 ID
    #[serde(default)]
    pub storage_pool_id: Option<String>,

    /// 挂载的虚拟机 ID
    #[serde(default)]
    pub domain_id: Option<String>,

    /// 状态 (ok/locked/migrating/...)
    #[serde(default)]
    pub status: String,
}

/// 快照信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// 快照 ID
    pub id: String,

    /// 快照名称
    #[serde(default)]
    pub name: String,

    /// 所属虚拟机 ID
    #[serde(default)]
    pub domain_id: Option<String>,

    /// 状态 (creating/ok/...)
    #[serde(default)]
    pub status: String,
}

/// 主机状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostStatusCode {
    Offline,
    Online,
    Maintenance,
    Unknown,
}

impl HostStatusCode {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Offline,
            1 => Self::Online,
            2 => Self::Maintenance,
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
            Self::Maintenance => "maintenance",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

/// 主机信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    /// 主机 ID
    pub id: String,

    /// 主机名称
    #[serde(default)]
    pub name: String,

    /// 主机 IP
    #[serde(default)]
    pub ip: String,

    /// 状态码
    #[serde(default = "unknown_code")]
    pub status: i64,
}

impl Host {
    pub fn host_status(&self) -> HostStatusCode {
        HostStatusCode::from_code(self.status)
    }
}
