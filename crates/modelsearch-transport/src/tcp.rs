//! # TCP 通道
//!
//! ## 设计动机（Why）
//! - 在一条 TCP 连接上复用多个在途调用：写半部由异步互斥锁串行化，读半部由单个后台任务独占；
//! - 读任务依据帧中的 `call_id` 把响应投递到对应调用的无界队列，调用方以 [`ResponseStream`] 消费。
//!
//! ## 契约说明（What）
//! - `Response` 帧投递一条消息；`Error` 帧投递错误并结束该调用；`End` 帧结束该调用；
//! - 读端 EOF 或 IO 失败时，全部在途调用以 [`TransportError::Stream`] 结束；
//! - [`TcpChannel::close`] 终止读任务并关闭写半部，在途调用随即结束。
//!
//! ## 风险与考量（Trade-offs）
//! - 读任务只持有通道的弱引用，通道被丢弃后读任务在下一帧到达时退出；
//! - 单行累计长度越过 `max_frame_bytes` 即判定为编解码错误，不等待换行符，
//!   全部在途调用以 [`TransportError::Codec`] 结束。

use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{StreamExt, channel::mpsc};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex as AsyncMutex,
    task::JoinHandle,
};

use crate::{
    Channel, ConnectionConfig, Dialer, Message, ResponseStream, Result, TransportError,
    frame::{Frame, encode_frame, read_frame},
};

type CallSender = mpsc::UnboundedSender<Result<Message>>;

struct TcpChannelInner {
    writer: AsyncMutex<OwnedWriteHalf>,
    calls: DashMap<u64, CallSender>,
    next_call_id: AtomicU64,
    max_frame_bytes: usize,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    peer: String,
}

impl TcpChannelInner {
    /// 把一帧投递给对应调用。
    fn route(&self, frame: Frame) {
        match frame {
            Frame::Response { call_id, message } => {
                let delivered = self
                    .calls
                    .get(&call_id)
                    .map(|sender| sender.unbounded_send(Ok(message)).is_ok());
                match delivered {
                    Some(true) => {}
                    Some(false) => {
                        self.calls.remove(&call_id);
                    }
                    None => tracing::warn!(call_id, peer = %self.peer, "response for unknown call"),
                }
            }
            Frame::Error { call_id, detail } => {
                if let Some((_, sender)) = self.calls.remove(&call_id) {
                    let _ = sender.unbounded_send(Err(TransportError::Stream { detail }));
                }
            }
            Frame::End { call_id } => {
                self.calls.remove(&call_id);
            }
            Frame::Request { call_id, .. } => {
                tracing::warn!(call_id, peer = %self.peer, "server sent a request frame; ignored");
            }
        }
    }

    /// 以同一错误结束全部在途调用。
    fn fail_all(&self, error: &TransportError) {
        let call_ids: Vec<u64> = self.calls.iter().map(|entry| *entry.key()).collect();
        for call_id in call_ids {
            if let Some((_, sender)) = self.calls.remove(&call_id) {
                let _ = sender.unbounded_send(Err(error.clone()));
            }
        }
    }

    async fn write_frame(&self, frame: &Frame) -> Result<()> {
        let bytes = encode_frame(frame, self.max_frame_bytes)?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&bytes)
            .await
            .map_err(|err| TransportError::stream(err.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|err| TransportError::stream(err.to_string()))
    }
}

/// 基于 Tokio `TcpStream` 的多路复用通道。
#[derive(Clone)]
pub struct TcpChannel {
    inner: Arc<TcpChannelInner>,
}

impl TcpChannel {
    /// 接管已连接的套接字并启动读任务。必须在 Tokio 运行时中调用。
    pub fn spawn(stream: TcpStream, max_frame_bytes: usize) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "<unknown>".to_owned());
        let (read_half, write_half) = stream.into_split();
        let inner = Arc::new(TcpChannelInner {
            writer: AsyncMutex::new(write_half),
            calls: DashMap::new(),
            next_call_id: AtomicU64::new(1),
            max_frame_bytes,
            reader: parking_lot::Mutex::new(None),
            peer,
        });
        let reader = tokio::spawn(read_loop(Arc::downgrade(&inner), read_half, max_frame_bytes));
        *inner.reader.lock() = Some(reader);
        Self { inner }
    }

    /// 当前在途调用数。
    pub fn in_flight(&self) -> usize {
        self.inner.calls.len()
    }

    async fn open(&self, request: Message, streaming: bool) -> Result<ResponseStream> {
        let call_id = self.inner.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded();
        self.inner.calls.insert(call_id, sender);
        let frame = Frame::Request {
            call_id,
            streaming,
            message: request,
        };
        if let Err(err) = self.inner.write_frame(&frame).await {
            self.inner.calls.remove(&call_id);
            return Err(err);
        }
        tracing::trace!(call_id, streaming, peer = %self.inner.peer, "request written");
        Ok(receiver.boxed())
    }
}

#[async_trait]
impl Channel for TcpChannel {
    async fn unary(&self, request: Message) -> Result<Message> {
        let mut responses = self.open(request, false).await?;
        match responses.next().await {
            Some(response) => response,
            None => Err(TransportError::stream("call ended without a response")),
        }
    }

    async fn stream(&self, request: Message) -> Result<ResponseStream> {
        self.open(request, true).await
    }

    async fn close(&self) {
        let reader = self.inner.reader.lock().take();
        if let Some(reader) = reader {
            reader.abort();
        }
        let mut writer = self.inner.writer.lock().await;
        if let Err(err) = writer.shutdown().await {
            tracing::debug!(peer = %self.inner.peer, error = %err, "shutdown after close failed");
        }
        drop(writer);
        self.inner.fail_all(&TransportError::Closed);
    }
}

async fn read_loop(
    channel: Weak<TcpChannelInner>,
    read_half: OwnedReadHalf,
    max_frame_bytes: usize,
) {
    let mut reader = BufReader::new(read_half);
    let mut line = Vec::new();
    loop {
        let next = read_frame(&mut reader, &mut line, max_frame_bytes).await;
        let Some(inner) = channel.upgrade() else {
            return;
        };
        match next {
            Ok(Some(frame)) => inner.route(frame),
            Ok(None) => {
                tracing::debug!(peer = %inner.peer, "peer closed the connection");
                inner.fail_all(&TransportError::stream("connection closed by peer"));
                return;
            }
            Err(err) => {
                tracing::warn!(peer = %inner.peer, error = %err, "read failed; failing in-flight calls");
                inner.fail_all(&err);
                return;
            }
        }
    }
}

/// TCP 拨号器。
#[derive(Clone, Debug, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, address: &str, config: &ConnectionConfig) -> Result<Arc<dyn Channel>> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|err| TransportError::Dial {
                address: address.to_owned(),
                detail: err.to_string(),
            })?;
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(address, error = %err, "failed to set TCP_NODELAY");
        }
        Ok(Arc::new(TcpChannel::spawn(stream, config.max_frame_bytes)) as Arc<dyn Channel>)
    }
}
