//! # Connection：到计算服务的单一传输句柄
//!
//! ## 状态机约束（What）
//! - 合法跃迁：`Disconnected → Connected → Closed`，`Disconnected` 也可直接进入 `Closed`；
//! - `Connected` 只能通过显式 [`Connection::close`] 离开，不做自动重连；
//! - `Closed` 之后的 [`unary`](Connection::unary) / [`stream`](Connection::stream) 立即返回
//!   [`TransportError::Closed`]；关闭前已打开的流会以同一错误作为终止项。
//!
//! ## 实现策略（How）
//! - 关闭广播使用 `tokio::sync::watch`：接收端在订阅前错过的关闭也能通过当前值感知；
//! - 每条响应流都被包裹一层关闭感知（`guard_stream`），保证阻塞在远端接收上的泵任务被唤醒。

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{ConnectionConfig, Message, Result, TransportError};

/// 服务端流式调用的响应序列；`None` 表示 EOF，`Some(Err(_))` 表示流以错误终止。
pub type ResponseStream = BoxStream<'static, Result<Message>>;

/// 具体协议的调用通道。
///
/// # 教案式说明
/// - **意图 (Why)**：把“如何把一条消息送到远端”与连接生命周期分离，
///   让 [`Connection`] 统一处理状态与关闭语义；
/// - **契约 (What)**：
///   - `unary`：发送一条请求并等待唯一响应；
///   - `stream`：发送一条请求并返回响应流，返回时请求已经写出；
///   - `close`：释放底层资源，可被多次调用。
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// 一元调用。
    async fn unary(&self, request: Message) -> Result<Message>;

    /// 服务端流式调用。
    async fn stream(&self, request: Message) -> Result<ResponseStream>;

    /// 释放底层资源。
    async fn close(&self);
}

/// 建立 [`Channel`] 的拨号器。
#[async_trait]
pub trait Dialer: Send + Sync {
    /// 连接到 `address`；失败时应返回 [`TransportError::Dial`]。
    async fn dial(&self, address: &str, config: &ConnectionConfig) -> Result<Arc<dyn Channel>>;
}

/// 连接状态。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// 拨号完成之前的初始态。
    Disconnected,
    /// 拨号成功，可发起调用。
    Connected,
    /// 已显式关闭，终态。
    Closed,
}

impl ConnectionState {
    /// 判断状态是否允许跃迁至 `target`。
    pub fn can_transition_to(self, target: ConnectionState) -> bool {
        matches!(
            (self, target),
            (ConnectionState::Disconnected, ConnectionState::Connected)
                | (ConnectionState::Disconnected, ConnectionState::Closed)
                | (ConnectionState::Connected, ConnectionState::Closed)
                | (ConnectionState::Closed, ConnectionState::Closed)
        )
    }
}

struct ConnectionInner {
    address: Arc<str>,
    channel: Arc<dyn Channel>,
    state: Mutex<ConnectionState>,
    closed: watch::Sender<bool>,
}

/// 到模型搜索服务的连接，克隆即共享同一底层通道。
///
/// # 教案式注释
/// - **意图 (Why)**：会话层把连接克隆进每个泵任务，泵在后台打开并消费响应流；
/// - **契约 (What)**：只能经由 [`Connection::dial`] 或 [`Connection::from_channel`] 获得，
///   获得时状态已是 `Connected`；
/// - **风险 (Trade-offs)**：超时只作用于拨号；单次调用的截止时间由调用方自行包裹。
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.inner.address)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// 通过拨号器建立连接。
    ///
    /// # 教案式注释
    /// - **契约 (What)**：拨号失败或超时均返回 [`TransportError::Dial`]，不会产生半初始化的连接；
    /// - **执行 (How)**：以 `tokio::time::timeout` 包裹 `dialer.dial`，成功后执行
    ///   `Disconnected → Connected` 跃迁。
    pub async fn dial(
        dialer: &dyn Dialer,
        address: &str,
        config: &ConnectionConfig,
    ) -> Result<Self> {
        tracing::debug!(address, timeout_ms = config.dial_timeout_ms, "dialing compute service");
        let channel = match tokio::time::timeout(config.dial_timeout(), dialer.dial(address, config))
            .await
        {
            Ok(Ok(channel)) => channel,
            Ok(Err(TransportError::Dial { address, detail })) => {
                tracing::warn!(%address, %detail, "dial failed");
                return Err(TransportError::Dial { address, detail });
            }
            Ok(Err(other)) => {
                tracing::warn!(address, error = %other, "dial failed");
                return Err(TransportError::Dial {
                    address: address.to_owned(),
                    detail: other.to_string(),
                });
            }
            Err(_) => {
                tracing::warn!(address, "dial timed out");
                return Err(TransportError::Dial {
                    address: address.to_owned(),
                    detail: format!("timed out after {}ms", config.dial_timeout_ms),
                });
            }
        };
        Ok(Self::from_channel(address, channel))
    }

    /// 以已建立的通道构造连接。
    pub fn from_channel(address: &str, channel: Arc<dyn Channel>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(ConnectionInner {
                address: Arc::from(address),
                channel,
                state: Mutex::new(ConnectionState::Connected),
                closed,
            }),
        }
    }

    /// 远端地址。
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// 当前状态。
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// 发起一元调用。
    pub async fn unary(&self, request: Message) -> Result<Message> {
        self.ensure_connected()?;
        let mut closed = self.inner.closed.subscribe();
        tokio::select! {
            biased;
            _ = closed_signal(&mut closed) => Err(TransportError::Closed),
            response = self.inner.channel.unary(request) => response,
        }
    }

    /// 发起服务端流式调用，返回可轮询的响应流。
    pub async fn stream(&self, request: Message) -> Result<ResponseStream> {
        self.ensure_connected()?;
        let mut closed = self.inner.closed.subscribe();
        let responses = tokio::select! {
            biased;
            _ = closed_signal(&mut closed) => return Err(TransportError::Closed),
            opened = self.inner.channel.stream(request) => opened?,
        };
        Ok(guard_stream(responses, closed))
    }

    /// 关闭连接；重复调用无副作用。
    ///
    /// - **后置条件**：状态为 `Closed`；所有在途流的下一项为 `Err(TransportError::Closed)`。
    pub async fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == ConnectionState::Closed
                || !state.can_transition_to(ConnectionState::Closed)
            {
                return;
            }
            *state = ConnectionState::Closed;
        }
        self.inner.closed.send_replace(true);
        self.inner.channel.close().await;
        tracing::info!(address = %self.inner.address, "connection closed");
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected | ConnectionState::Closed => Err(TransportError::Closed),
        }
    }
}

async fn closed_signal(closed: &mut watch::Receiver<bool>) {
    // 发送端被丢弃同样视为关闭。
    let _ = closed.wait_for(|closed| *closed).await;
}

fn guard_stream(responses: ResponseStream, closed: watch::Receiver<bool>) -> ResponseStream {
    stream::unfold(Some((responses, closed)), |slot| async move {
        let (mut responses, mut closed) = slot?;
        tokio::select! {
            biased;
            _ = closed_signal(&mut closed) => Some((Err(TransportError::Closed), None)),
            item = responses.next() => item.map(|item| (item, Some((responses, closed)))),
        }
    })
    .boxed()
}
