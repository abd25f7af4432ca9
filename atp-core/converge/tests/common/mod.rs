//! 测试公共工具: 按实体脚本化的内存远程平台

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use atp_converge::{ActionInvoker, EntityFetcher, EntityKind, EntityState, RemoteError};

/// 初始化测试日志 (RUST_LOG 控制级别，重复调用无副作用)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// 单次查询返回的观察结果
#[derive(Debug, Clone)]
pub enum Observation {
    /// 实体存在，状态为给定值
    Status(String),
    /// 实体存在，状态和位置为给定值
    At(String, String),
    /// 实体不存在
    Missing,
    /// 查询出错
    Error(RemoteError),
    /// 查询永不返回
    Hang,
}

pub fn status(s: &str) -> Observation {
    Observation::Status(s.to_string())
}

pub fn at(s: &str, location: &str) -> Observation {
    Observation::At(s.to_string(), location.to_string())
}

pub fn transport(msg: &str) -> Observation {
    Observation::Error(RemoteError::Transport(msg.to_string()))
}

/// 操作下发结果
#[derive(Debug, Clone)]
pub enum ActionResult {
    Accept,
    Reject,
    Fail(RemoteError),
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub kind: EntityKind,
    pub id: String,
    pub action: String,
    pub params: Value,
}

type Key = (EntityKind, String);
type ActionKey = (EntityKind, String, String);

#[derive(Default)]
struct Inner {
    scripts: HashMap<Key, VecDeque<Observation>>,
    results: HashMap<ActionKey, ActionResult>,
    after_action: HashMap<ActionKey, Vec<Observation>>,
    delays: HashMap<String, Duration>,
    invocations: Vec<Invocation>,
    fetches: HashMap<String, usize>,
}

/// 脚本化远程平台
///
/// 每个实体的查询结果按脚本依次返回，脚本只剩最后一项时保持不变。
/// 没有脚本的实体视为不存在。
#[derive(Default)]
pub struct FakeRemote {
    inner: Mutex<Inner>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, kind: EntityKind, id: &str, script: Vec<Observation>) -> &Self {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .insert((kind, id.to_string()), script.into());
        self
    }

    pub fn vm(&self, id: &str, statuses: &[&str]) -> &Self {
        self.script(EntityKind::Vm, id, statuses.iter().map(|s| status(s)).collect())
    }

    pub fn on_action(
        &self,
        kind: EntityKind,
        id: &str,
        action: &str,
        result: ActionResult,
    ) -> &Self {
        self.inner
            .lock()
            .unwrap()
            .results
            .insert((kind, id.to_string(), action.to_string()), result);
        self
    }

    /// 操作被接受后把实体脚本替换为给定脚本
    pub fn after_action(
        &self,
        kind: EntityKind,
        id: &str,
        action: &str,
        script: Vec<Observation>,
    ) -> &Self {
        self.inner
            .lock()
            .unwrap()
            .after_action
            .insert((kind, id.to_string(), action.to_string()), script);
        self
    }

    /// 对该实体的每次操作下发都耗时 `delay`
    pub fn delay_actions(&self, id: &str, delay: Duration) -> &Self {
        self.inner
            .lock()
            .unwrap()
            .delays
            .insert(id.to_string(), delay);
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.inner.lock().unwrap().invocations.clone()
    }

    pub fn invocation_count(&self, id: &str, action: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .invocations
            .iter()
            .filter(|i| i.id == id && i.action == action)
            .count()
    }

    pub fn fetch_count(&self, id: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .fetches
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_concurrent_actions(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityFetcher for FakeRemote {
    async fn fetch(&self, kind: EntityKind, id: &str) -> Result<EntityState, RemoteError> {
        let observation = {
            let mut inner = self.inner.lock().unwrap();
            *inner.fetches.entry(id.to_string()).or_insert(0) += 1;
            match inner.scripts.get_mut(&(kind, id.to_string())) {
                Some(script) if script.len() > 1 => script.pop_front(),
                Some(script) => script.front().cloned(),
                None => None,
            }
        };

        match observation.unwrap_or(Observation::Missing) {
            Observation::Status(s) => Ok(EntityState::new(kind, id, s)),
            Observation::At(s, location) => {
                Ok(EntityState::new(kind, id, s).with_location(location))
            }
            Observation::Missing => Err(RemoteError::NotFound(format!("{} {}", kind, id))),
            Observation::Error(e) => Err(e),
            Observation::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl ActionInvoker for FakeRemote {
    async fn invoke(
        &self,
        kind: EntityKind,
        id: &str,
        action: &str,
        params: &Value,
    ) -> Result<bool, RemoteError> {
        let key = (kind, id.to_string(), action.to_string());
        let (result, delay) = {
            let mut inner = self.inner.lock().unwrap();
            inner.invocations.push(Invocation {
                kind,
                id: id.to_string(),
                action: action.to_string(),
                params: params.clone(),
            });
            (
                inner.results.get(&key).cloned().unwrap_or(ActionResult::Accept),
                inner.delays.get(id).copied(),
            )
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match result {
            ActionResult::Accept => {
                let mut inner = self.inner.lock().unwrap();
                if let Some(script) = inner.after_action.get(&key).cloned() {
                    inner.scripts.insert((kind, id.to_string()), script.into());
                }
                Ok(true)
            }
            ActionResult::Reject => Ok(false),
            ActionResult::Fail(e) => Err(e),
        }
    }
}
