//! VDI 平台 API 模块
//!
//! 提供测试框架用到的 VDI 平台 API 封装，包括：
//! - 虚拟机管理 (DomainApi)
//! - 主机管理 (HostApi)
//! - 快照管理 (SnapshotApi)
//! - 存储管理 (StorageApi)

pub mod domain;
pub mod host;
pub mod snapshot;
pub mod storage;

pub use domain::DomainApi;
pub use host::HostApi;
pub use snapshot::SnapshotApi;
pub use storage::StorageApi;
