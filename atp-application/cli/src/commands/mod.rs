//! CLI 命令处理模块

pub mod common; // 公共工具函数
pub mod disk;
pub mod output;
pub mod vm; // 虚拟机批量操作
