//! 连接参数。
//!
//! 以 `serde` 反序列化，字段缺省时回落到 [`ConnectionConfig::default`]，
//! 上层 `ClientConfig` 将其作为 `[connection]` 表嵌入 TOML。

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 默认拨号超时（毫秒）。
pub const DEFAULT_DIAL_TIMEOUT_MS: u64 = 5_000;
/// 默认单帧上限：4 MiB。
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// 拨号与分帧参数。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    /// 拨号超时（毫秒），超时视为拨号失败。
    pub dial_timeout_ms: u64,
    /// 单帧最大字节数（含换行符）。
    pub max_frame_bytes: usize,
}

impl ConnectionConfig {
    /// 拨号超时。
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            dial_timeout_ms: DEFAULT_DIAL_TIMEOUT_MS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}
