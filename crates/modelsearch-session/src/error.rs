//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 区分调用方错误（未知请求、标识冲突、畸形描述）与传输失败，路由层据此选择响应码；
//! - 传输错误在派发之后只经由 [`ResultProxy`](crate::ResultProxy) 的事件流广播，
//!   这里的 [`SessionError::Transport`] 仅出现在建立会话阶段。

use std::io;

use thiserror::Error;

use modelsearch_pipeline::StructuralError;
use modelsearch_transport::TransportError;

use crate::descriptor::RequestId;

/// 会话层错误域。
#[derive(Debug, Error)]
pub enum SessionError {
    /// 请求标识既不在途也未完成。
    ///
    /// - **契约 (What)**：调用方错误，不应重试；通常意味着客户端持有过期标识。
    #[error("request `{id}` is neither pending nor completed")]
    UnknownRequest { id: RequestId },

    /// 描述符的标识已登记给另一份载荷。
    #[error("request id `{id}` is already registered for a different payload")]
    IdentifierConflict { id: RequestId },

    /// 管线描述未通过结构校验，未产生任何远端调用。
    #[error("malformed pipeline description: {0}")]
    Structural(#[from] StructuralError),

    /// 建立会话时的传输失败（例如拨号失败）。
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// 客户端配置无效。
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 当前线程不在 Tokio 运行时上下文中，无法派生泵任务。
    #[error("session requires a Tokio runtime context")]
    RuntimeUnavailable,
}

/// 配置加载错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件读取失败。
    #[error("failed to read `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    /// TOML 解析失败。
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// 字段取值不合法。
    #[error("invalid `{field}`: {detail}")]
    Invalid { field: &'static str, detail: String },
}
