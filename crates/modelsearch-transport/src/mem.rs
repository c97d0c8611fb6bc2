//! # 进程内通道
//!
//! ## 核心意图（Why）
//! - 让计算服务可以与客户端跑在同一进程（嵌入式部署、测试），无需真实网络；
//! - 记录一元/流式调用次数，供上层断言“同一内容哈希只触发一次远端调用”。
//!
//! ## 行为契约（What）
//! - 每次调用都把请求交给 `responder`，由其返回响应流；一元调用取流的第一项；
//! - [`ScriptFeed`] 提供逐条推送的响应流，用于模拟“流进行到一半”的场景。

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use futures::{
    StreamExt,
    channel::mpsc,
    stream,
};

use crate::{Channel, ConnectionConfig, Dialer, Message, ResponseStream, Result, TransportError};

type Responder = Arc<dyn Fn(Message) -> ResponseStream + Send + Sync>;

/// 由给定结果序列构成的响应流，依次产出后 EOF。
pub fn script(items: Vec<Result<Message>>) -> ResponseStream {
    stream::iter(items).boxed()
}

/// 创建一条由调用方逐条推送的响应流。
pub fn feed() -> (ScriptFeed, ResponseStream) {
    let (tx, rx) = mpsc::unbounded();
    (ScriptFeed { tx }, rx.boxed())
}

/// [`feed`] 的推送端；丢弃或调用 [`finish`](Self::finish) 即 EOF。
#[derive(Clone, Debug)]
pub struct ScriptFeed {
    tx: mpsc::UnboundedSender<Result<Message>>,
}

impl ScriptFeed {
    /// 推送一条响应；流已被丢弃时返回 `false`。
    pub fn emit(&self, message: Message) -> bool {
        self.tx.unbounded_send(Ok(message)).is_ok()
    }

    /// 推送一条错误。
    pub fn fail(&self, error: TransportError) -> bool {
        self.tx.unbounded_send(Err(error)).is_ok()
    }

    /// 结束流。
    pub fn finish(self) {
        self.tx.close_channel();
    }
}

/// 进程内调用通道。
pub struct MemoryChannel {
    responder: Responder,
    unary_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryChannel {
    /// 以响应函数构造通道。
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(Message) -> ResponseStream + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            unary_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// 已发起的一元调用次数。
    pub fn unary_calls(&self) -> usize {
        self.unary_calls.load(Ordering::SeqCst)
    }

    /// 已发起的流式调用次数。
    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// 一元与流式调用总数。
    pub fn total_calls(&self) -> usize {
        self.unary_calls() + self.stream_calls()
    }

    /// 是否已被关闭。
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn unary(&self, request: Message) -> Result<Message> {
        self.unary_calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = (self.responder)(request);
        match responses.next().await {
            Some(response) => response,
            None => Err(TransportError::stream("unary call produced no response")),
        }
    }

    async fn stream(&self, request: Message) -> Result<ResponseStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.responder)(request))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// 始终返回同一 [`MemoryChannel`] 的拨号器。
#[derive(Clone)]
pub struct MemoryDialer {
    channel: Arc<MemoryChannel>,
    refusal: Option<String>,
}

impl MemoryDialer {
    /// 以响应函数构造拨号器。
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(Message) -> ResponseStream + Send + Sync + 'static,
    {
        Self {
            channel: Arc::new(MemoryChannel::new(responder)),
            refusal: None,
        }
    }

    /// 构造一个总是拒绝拨号的拨号器。
    pub fn refusing(detail: impl Into<String>) -> Self {
        Self {
            channel: Arc::new(MemoryChannel::new(|_| stream::empty().boxed())),
            refusal: Some(detail.into()),
        }
    }

    /// 拨号成功时交出的通道。
    pub fn channel(&self) -> Arc<MemoryChannel> {
        Arc::clone(&self.channel)
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, address: &str, _config: &ConnectionConfig) -> Result<Arc<dyn Channel>> {
        if let Some(detail) = &self.refusal {
            return Err(TransportError::Dial {
                address: address.to_owned(),
                detail: detail.clone(),
            });
        }
        Ok(self.channel.clone() as Arc<dyn Channel>)
    }
}
