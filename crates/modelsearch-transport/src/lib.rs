#![doc = r#"
# modelsearch-transport

## 设计动机（Why）
- **定位**：为模型搜索服务（pipeline create/execute/search）提供客户端侧的最小传输契约，
  上层会话层只依赖本 crate 暴露的 [`Connection`] 与 [`Message`]，不感知底层协议。
- **架构角色**：位于 `modelsearch-session` 之下；会话层负责去重、扇出与回放，
  本 crate 只负责“拨号 → 调用 → 关闭”这一条生命周期以及载荷的内容哈希。

## 核心契约（What）
- [`Connection`]：`Disconnected → Connected → Closed` 状态机；支持一元调用与服务端流式调用，
  关闭后所有在途流以 [`TransportError::Closed`] 结束；
- [`Channel`] / [`Dialer`]：具体协议实现的接入缝，内置 [`mem`]（进程内）与 `tcp`（换行分帧 JSON）两种实现；
- [`Message`]：不可变载荷，[`Message::content_hash`] 依据显式排除列表计算去重哈希。

## 实现策略（How）
- 流式响应统一表示为 [`ResponseStream`]（`BoxStream`），`None` 即 EOF；
- 关闭信号通过 `tokio::sync::watch` 广播，`Connection` 为每条流包裹关闭感知层，
  因此任何 `Channel` 实现都无需自行处理“关闭唤醒在途流”。

## 风险与考量（Trade-offs）
- 重试与退避不属于本层，任何错误都原样交给调用方；
- 拨号超时由 [`ConnectionConfig`] 统一控制，单次调用的截止时间由上层自行施加。
"#]

pub mod config;
pub mod connection;
pub mod error;
pub mod mem;
pub mod message;

#[cfg(feature = "tcp")]
pub mod frame;
#[cfg(feature = "tcp")]
pub mod tcp;

pub use config::ConnectionConfig;
pub use connection::{Channel, Connection, ConnectionState, Dialer, ResponseStream};
pub use error::TransportError;
pub use message::{ContentHash, Message};

/// 传输层统一返回别名。
pub type Result<T, E = TransportError> = core::result::Result<T, E>;
