//! # 日志安装入口
//!
//! 宿主进程启动时调用一次 [`install`]（或读取 `RUST_LOG` 的 [`install_from_env`]），
//! 把 `fmt + EnvFilter` 组装为全局 Subscriber。会话、泵任务与传输层的事件均经由 `tracing` 输出：
//! 派发为 `info`，附加/回放/完成为 `debug`，远端错误为 `warn`。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 未设置 `RUST_LOG` 时的默认过滤指令。
pub const DEFAULT_FILTER: &str = "info";

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 安装阶段的错误。
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// 过滤指令无法解析。
    #[error("invalid log filter `{filter}`: {detail}")]
    InvalidFilter { filter: String, detail: String },

    /// 本模块已完成安装。
    #[error("telemetry is already installed")]
    AlreadyInstalled,

    /// 外部已设置全局 Subscriber。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
}

/// 以给定过滤指令安装全局 Subscriber。
///
/// # 教案式说明
/// - **契约（What）**：重复调用返回 [`TelemetryError::AlreadyInstalled`]；外部已设置 Subscriber 时返回
///   [`TelemetryError::SubscriberAlreadySet`]；指令非法时不产生任何副作用。
pub fn install(filter: &str) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_new(filter).map_err(|err| TelemetryError::InvalidFilter {
        filter: filter.to_owned(),
        detail: err.to_string(),
    })?;
    install_with(env_filter)
}

/// 读取 `RUST_LOG`，缺失或非法时回退到 [`DEFAULT_FILTER`]。
pub fn install_from_env() -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install_with(env_filter)
}

fn install_with(env_filter: EnvFilter) -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Err(TelemetryError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }
    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|_| TelemetryError::SubscriberAlreadySet)?;
    INSTALLED
        .set(())
        .map_err(|_| TelemetryError::AlreadyInstalled)
}
