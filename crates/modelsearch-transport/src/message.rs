//! # 载荷与内容哈希
//!
//! ## 核心意图（Why）
//! - 会话层以内容哈希作为去重键：两个逻辑上相同的请求只触发一次远端调用；
//! - 调用方会在载荷中夹带追踪上下文、客户端请求号等“每次调用都不同”的字段，
//!   这些字段必须排除在哈希之外，否则去重永远不会命中。
//!
//! ## 行为契约（What）
//! - [`Message::HASH_EXCLUDE`] 是排除字段的唯一来源，只作用于顶层对象键；
//! - 哈希输入为 `kind` + 过滤后的正文规范化 JSON；`serde_json` 的对象以有序映射存储，
//!   因此字段书写顺序不影响结果。

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// 载荷内容哈希，取 SHA-256 摘要前 8 字节（大端）。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(u64);

impl ContentHash {
    /// 以原始数值构造哈希，主要供测试与外部持久化回读使用。
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// 原始数值。
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// 发往模型搜索服务或由其返回的不可变消息。
///
/// # 教案式说明
/// - **意图 (Why)**：扇出时每个订阅者都要拿到一份消息，`Arc` 包裹使克隆只增加引用计数；
/// - **契约 (What)**：
///   - `kind`：消息类别，例如 `SearchSolutionsRequest`、`GetSearchResultsResponse`；
///   - `body`：任意 JSON 正文，构造后不可修改；
/// - **风险 (Trade-offs)**：正文使用 `serde_json::Value` 而非强类型结构，换取与服务端 schema 演进解耦。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    kind: Arc<str>,
    body: Arc<Value>,
}

impl Message {
    /// 参与去重时忽略的顶层正文字段。
    pub const HASH_EXCLUDE: &'static [&'static str] =
        &["trace_context", "client_request_id", "deadline_ms"];

    /// 构造新消息。
    pub fn new(kind: impl Into<Arc<str>>, body: Value) -> Self {
        Self {
            kind: kind.into(),
            body: Arc::new(body),
        }
    }

    /// 消息类别。
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// 消息正文。
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// 读取顶层正文字段；正文不是对象时返回 `None`。
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.as_object().and_then(|map| map.get(name))
    }

    /// 计算去重用内容哈希。
    ///
    /// # 教案式注释
    /// - **执行 (How)**：逐项写入 `键 0x00 值 0xFF`，以分隔符避免 `{"ab":"c"}` 与 `{"a":"bc"}` 碰撞；
    /// - **契约 (What)**：仅顶层键参与排除，嵌套对象内的同名字段照常参与哈希。
    pub fn content_hash(&self) -> ContentHash {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_bytes());
        hasher.update([0u8]);
        match self.body.as_ref() {
            Value::Object(map) => {
                for (key, value) in map
                    .iter()
                    .filter(|(key, _)| !Self::HASH_EXCLUDE.contains(&key.as_str()))
                {
                    hasher.update(key.as_bytes());
                    hasher.update([0u8]);
                    hasher.update(value.to_string().as_bytes());
                    hasher.update([0xFF]);
                }
            }
            other => hasher.update(other.to_string().as_bytes()),
        }
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        ContentHash(u64::from_be_bytes(prefix))
    }
}
