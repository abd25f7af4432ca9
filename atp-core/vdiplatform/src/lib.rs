//! OCloudView VDI 平台客户端
//!
//! 提供与 OCloudView 云桌面管理平台 API 交互的客户端实现，
//! 供生命周期测试框架查询实体状态和下发操作。
//!
//! # 功能
//!
//! - **虚拟机管理** (`DomainApi`): 查询、启动、关闭、重启、删除、热迁移
//! - **存储管理** (`StorageApi`): 存储卷查询、热迁移、删除
//! - **快照管理** (`SnapshotApi`): 虚拟机快照操作
//! - **主机管理** (`HostApi`): 宿主机查询
//!
//! # 示例
//!
//! ```ignore
//! use atp_vdiplatform::{VdiClient, VdiConfig};
//!
//! let mut client = VdiClient::new("http://vdi-server:8088", VdiConfig::default())?;
//! client.login("admin", "password").await?;
//!
//! client.domain().start("vm-id").await?;
//! let vm = client.domain().get("vm-id").await?;
//! println!("{}", vm.domain_status().display_name());
//! ```

pub mod api;
pub mod client;
pub mod error;
pub mod models;

pub use client::{VdiClient, VdiConfig};
pub use error::{Result, VdiError};

pub use api::{DomainApi, HostApi, SnapshotApi, StorageApi};

pub use models::{
    ApiResponse, Domain, DomainStatus, Host, HostStatusCode, PageData,
    Snapshot, Volume,
};
