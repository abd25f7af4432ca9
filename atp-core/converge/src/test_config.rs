//! 测试配置管理
//!
//! 支持从多个源加载测试配置:
//! - 环境变量 (优先级最高)
//! - 配置文件 (TOML/YAML/JSON)
//! - 默认值 (优先级最低)
//!
//! 配置文件搜索路径 (按优先级):
//! 1. `ATP_TEST_CONFIG` 环境变量指定的路径
//! 2. `./test.toml` / `./test.yaml` / `./test.json` (当前目录)
//! 3. `./tests/config.toml` (tests 目录)
//! 4. `~/.config/atp/test.toml` (用户配置目录)
//! 5. `/etc/atp/test.toml` (系统配置目录)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::drain::DEFAULT_DRAIN_WORKERS;
use crate::runner::DEFAULT_MAX_WORKERS;
use crate::wait::WaitTiming;

// ============================================
// 核心配置结构
// ============================================

/// 测试配置 (顶层)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestConfig {
    /// 环境配置
    #[serde(default)]
    pub environment: EnvironmentConfig,

    /// VDI 平台配置
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vdi: Option<VdiConnectionConfig>,

    /// 状态等待配置
    #[serde(default)]
    pub wait: WaitConfig,

    /// 批量操作配置
    #[serde(default)]
    pub batch: BatchConfig,

    /// 迁移配置
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// 环境配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// 日志级别 (debug/info/warn/error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// VDI 平台连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdiConnectionConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,

    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,

    /// 连接超时 (秒)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// 请求超时 (秒)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

/// 状态等待配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitConfig {
    /// 单次等待超时 (秒)
    #[serde(default = "default_wait_timeout")]
    pub timeout: u64,

    /// 轮询间隔 (秒)
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

/// 批量操作配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// 并发执行器工作池大小
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// 批量清理 worker 数
    #[serde(default = "default_drain_workers")]
    pub drain_workers: usize,

    /// 批量清理后整批消失确认的超时 (秒)
    #[serde(default = "default_final_check_timeout")]
    pub final_check_timeout: u64,
}

/// 迁移配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// 目标主机随机选择的种子，设置后迁移计划可复现
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

// ============================================
// 默认值函数
// ============================================

fn default_log_level() -> String {
    "info".to_string()
}
fn default_verify_ssl() -> bool {
    false
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    30
}
fn default_wait_timeout() -> u64 {
    300
}
fn default_poll_interval() -> u64 {
    5
}
fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}
fn default_drain_workers() -> usize {
    DEFAULT_DRAIN_WORKERS
}
fn default_final_check_timeout() -> u64 {
    600
}

// ============================================
// Default 实现
// ============================================

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: default_wait_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            drain_workers: default_drain_workers(),
            final_check_timeout: default_final_check_timeout(),
        }
    }
}

impl VdiConnectionConfig {
    fn from_base_url(base_url: String) -> Self {
        Self {
            base_url,
            username: String::new(),
            password: String::new(),
            verify_ssl: default_verify_ssl(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
        }
    }

    /// 转换为 VDI 客户端配置
    pub fn client_config(&self) -> atp_vdiplatform::VdiConfig {
        atp_vdiplatform::VdiConfig {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            verify_ssl: self.verify_ssl,
        }
    }
}

// ============================================
// 配置加载实现
// ============================================

impl TestConfig {
    /// 从多个源加载配置 (优先级: 环境变量 > 配置文件 > 默认值)
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                tracing::debug!("加载配置文件: {:?}", path);
                Self::load_from_file(&path)?
            }
            None => {
                tracing::debug!("未找到配置文件，使用默认配置");
                Self::default()
            }
        };

        config.apply_env_vars()?;
        Ok(config)
    }

    /// 从指定文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;

        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("解析 TOML 配置失败: {:?}", path))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("解析 YAML 配置失败: {:?}", path))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("解析 JSON 配置失败: {:?}", path))?,
            _ => anyhow::bail!("不支持的配置文件格式: {:?}", path),
        };

        Ok(config)
    }

    /// 从指定路径字符串加载配置，并应用环境变量覆盖
    pub fn load_from_path(path: &str) -> Result<Self> {
        let mut config = Self::load_from_file(Path::new(path))?;
        config.apply_env_vars()?;
        Ok(config)
    }

    /// 查找配置文件 (按优先级搜索)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("ATP_TEST_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        let mut candidates = vec![
            PathBuf::from("./test.toml"),
            PathBuf::from("./test.yaml"),
            PathBuf::from("./test.json"),
            PathBuf::from("./tests/config.toml"),
        ];

        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".config/atp/test.toml"));
            candidates.push(home.join(".config/atp/test.yaml"));
        }

        #[cfg(target_os = "linux")]
        candidates.push(PathBuf::from("/etc/atp/test.toml"));

        candidates.into_iter().find(|p| p.exists())
    }

    /// 从环境变量覆盖配置
    fn apply_env_vars(&mut self) -> Result<()> {
        if let Ok(level) = env::var("ATP_LOG_LEVEL") {
            self.environment.log_level = level;
        }

        // VDI 平台
        if let Ok(base_url) = env::var("ATP_VDI_BASE_URL") {
            match self.vdi.as_mut() {
                Some(vdi) => vdi.base_url = base_url,
                None => self.vdi = Some(VdiConnectionConfig::from_base_url(base_url)),
            }
        }
        if let Some(vdi) = self.vdi.as_mut() {
            if let Ok(username) = env::var("ATP_VDI_USERNAME") {
                vdi.username = username;
            }
            if let Ok(password) = env::var("ATP_VDI_PASSWORD") {
                vdi.password = password;
            }
            if let Ok(verify_ssl) = env::var("ATP_VDI_VERIFY_SSL") {
                vdi.verify_ssl = verify_ssl.parse().unwrap_or(default_verify_ssl());
            }
        }

        // 等待与批量
        if let Ok(timeout) = env::var("ATP_WAIT_TIMEOUT") {
            self.wait.timeout = timeout.parse().context("ATP_WAIT_TIMEOUT 取值无效")?;
        }
        if let Ok(interval) = env::var("ATP_POLL_INTERVAL") {
            self.wait.poll_interval = interval.parse().context("ATP_POLL_INTERVAL 取值无效")?;
        }
        if let Ok(workers) = env::var("ATP_MAX_WORKERS") {
            self.batch.max_workers = workers.parse().context("ATP_MAX_WORKERS 取值无效")?;
        }

        Ok(())
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.wait.timeout == 0 {
            anyhow::bail!("wait.timeout 必须大于 0");
        }
        if self.wait.poll_interval == 0 {
            anyhow::bail!("wait.poll_interval 必须大于 0");
        }
        if self.wait.poll_interval > self.wait.timeout {
            anyhow::bail!(
                "wait.poll_interval ({}) 不能大于 wait.timeout ({})",
                self.wait.poll_interval,
                self.wait.timeout
            );
        }
        if self.batch.max_workers == 0 {
            anyhow::bail!("batch.max_workers 必须大于 0");
        }
        if self.batch.drain_workers == 0 {
            anyhow::bail!("batch.drain_workers 必须大于 0");
        }
        if self.batch.final_check_timeout == 0 {
            anyhow::bail!("batch.final_check_timeout 必须大于 0");
        }

        if let Some(ref vdi) = self.vdi {
            if vdi.base_url.is_empty() {
                anyhow::bail!("vdi.base_url 不能为空");
            }
            if vdi.username.is_empty() {
                anyhow::bail!("vdi.username 不能为空");
            }
        }

        Ok(())
    }

    /// VDI 配置，未配置时报错
    pub fn require_vdi(&self) -> Result<&VdiConnectionConfig> {
        self.vdi
            .as_ref()
            .context("未配置 VDI 平台 (配置文件 [vdi] 段或 ATP_VDI_BASE_URL)")
    }

    /// 单实体状态等待参数
    pub fn wait_timing(&self) -> WaitTiming {
        WaitTiming::from_secs(self.wait.timeout, self.wait.poll_interval)
    }

    /// 批量清理最终确认的等待参数
    pub fn final_check_timing(&self) -> WaitTiming {
        WaitTiming::new(
            Duration::from_secs(self.batch.final_check_timeout),
            Duration::from_secs(self.wait.poll_interval),
        )
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("创建目录失败: {:?}", parent))?;
        }

        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::to_string_pretty(self).context("序列化 TOML 失败")?,
            Some("yaml") | Some("yml") => {
                serde_yaml::to_string(self).context("序列化 YAML 失败")?
            }
            Some("json") => serde_json::to_string_pretty(self).context("序列化 JSON 失败")?,
            _ => anyhow::bail!("不支持的配置文件格式: {:?}", path),
        };

        fs::write(path, content).with_context(|| format!("写入配置文件失败: {:?}", path))?;

        Ok(())
    }
}
