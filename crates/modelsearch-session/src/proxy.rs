//! # ResultProxy：单个订阅者的结果视图
//!
//! 每个代理独占一条无界有序事件通道。同一请求的结果、错误与完成信号共用这一条通道，
//! 订阅者观察到的跨类别顺序与会话投递顺序一致；`Done` 至多出现一次且总是最后一个事件。

use tokio::sync::mpsc;

use modelsearch_transport::{ContentHash, Message, TransportError};

use crate::descriptor::RequestId;

/// 订阅者可观察的事件。
#[derive(Clone, Debug, PartialEq)]
pub enum ProxyEvent {
    /// 远端产出的一条结果。
    Result(Message),
    /// 远端或传输层报告的错误，之后紧跟 `Done`。
    Error(TransportError),
    /// 请求已终结，之后不再有事件。
    Done,
}

/// 会话一侧的投递端。
#[derive(Clone, Debug)]
pub(crate) struct ProxySink {
    tx: mpsc::UnboundedSender<ProxyEvent>,
}

impl ProxySink {
    /// 投递事件；订阅者已丢弃代理时返回 `false`。
    pub(crate) fn send(&self, event: ProxyEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// 订阅者一侧的结果视图。
///
/// # 教案式说明
/// - **契约 (What)**：先收到附加时刻之前已缓存的全部结果，随后无缝衔接实时结果，
///   不丢失也不重复；`Done` 之后 [`recv`](Self::recv) 恒返回 `None`；
/// - **前置条件**：只由会话创建；丢弃代理不会影响其他订阅者或远端调用。
#[derive(Debug)]
pub struct ResultProxy {
    request_id: RequestId,
    content_hash: ContentHash,
    rx: mpsc::UnboundedReceiver<ProxyEvent>,
    done: bool,
    abandoned: bool,
}

impl ResultProxy {
    pub(crate) fn channel(request_id: RequestId, content_hash: ContentHash) -> (ProxySink, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let proxy = Self {
            request_id,
            content_hash,
            rx,
            done: false,
            abandoned: false,
        };
        (ProxySink { tx }, proxy)
    }

    /// 所订阅请求的标识。
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// 所订阅请求的内容哈希。
    pub fn content_hash(&self) -> ContentHash {
        self.content_hash
    }

    /// 是否已观察到 `Done`。
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// 等待下一个事件。
    ///
    /// 投递端在未投递 `Done` 的情况下被丢弃（例如运行时关闭时泵任务被取消）时，
    /// 先合成 `Error(TransportError::Closed)`，再合成 `Done`，订阅者不会把它误认为正常完成。
    pub async fn recv(&mut self) -> Option<ProxyEvent> {
        if self.done {
            return None;
        }
        match self.rx.recv().await {
            Some(event) => self.observe(event),
            None => self.abandon(),
        }
    }

    /// 非阻塞地取出下一个已就绪事件。
    pub fn try_recv(&mut self) -> Option<ProxyEvent> {
        if self.done {
            return None;
        }
        match self.rx.try_recv() {
            Ok(event) => self.observe(event),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => self.abandon(),
        }
    }

    /// 消费代理直至 `Done`，汇总全部事件。
    pub async fn collect(mut self) -> ProxyOutcome {
        let mut outcome = ProxyOutcome::default();
        while let Some(event) = self.recv().await {
            match event {
                ProxyEvent::Result(message) => outcome.results.push(message),
                ProxyEvent::Error(error) => outcome.errors.push(error),
                ProxyEvent::Done => outcome.completed = true,
            }
        }
        outcome
    }

    fn abandon(&mut self) -> Option<ProxyEvent> {
        if self.abandoned {
            return self.observe(ProxyEvent::Done);
        }
        self.abandoned = true;
        Some(ProxyEvent::Error(TransportError::Closed))
    }

    fn observe(&mut self, event: ProxyEvent) -> Option<ProxyEvent> {
        if matches!(event, ProxyEvent::Done) {
            self.done = true;
            self.rx.close();
        }
        Some(event)
    }
}

/// [`ResultProxy::collect`] 的汇总结果。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProxyOutcome {
    /// 按到达顺序排列的结果。
    pub results: Vec<Message>,
    /// 按到达顺序排列的错误。
    pub errors: Vec<TransportError>,
    /// 是否观察到 `Done`。
    pub completed: bool,
}
