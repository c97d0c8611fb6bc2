//! # error 模块说明
//!
//! 传输层错误需要广播给同一请求的全部订阅者，因此 [`TransportError`] 只携带可克隆的上下文字符串。

use thiserror::Error;

/// 传输层错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：区分“拨号失败”“连接已关闭”“流中途失败”等类别，会话层据此决定是否终结请求；
/// - **契约 (What)**：
///   - 全部变体满足 `Clone + Send + Sync + 'static`，可安全扇出到多个订阅者；
///   - 本层从不重试，错误原样向上传播。
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum TransportError {
    /// 建立连接失败；对 [`Connection`](crate::Connection) 的构造是致命的。
    #[error("failed to dial `{address}`: {detail}")]
    Dial { address: String, detail: String },

    /// 连接已被显式关闭，后续调用与在途流均以此结束。
    #[error("connection is closed")]
    Closed,

    /// 远端流在 EOF 之前失败。
    #[error("transport stream failed: {detail}")]
    Stream { detail: String },

    /// 帧编解码失败，例如超长帧或非法 JSON。
    #[error("frame codec failure: {detail}")]
    Codec { detail: String },
}

impl TransportError {
    /// 构造流错误。
    pub fn stream(detail: impl Into<String>) -> Self {
        Self::Stream {
            detail: detail.into(),
        }
    }

    /// 构造编解码错误。
    pub fn codec(detail: impl Into<String>) -> Self {
        Self::Codec {
            detail: detail.into(),
        }
    }

    /// 是否由连接关闭引起。
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
