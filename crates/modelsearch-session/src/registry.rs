//! # 请求登记表
//!
//! 每个请求一条 [`Entry`]，以显式状态标签区分在途与完成；内容哈希另有一张索引。
//! 本模块只做同步状态变换，调用方（会话）负责加锁，这里的方法从不等待。

use std::{collections::HashMap, sync::Arc};

use modelsearch_transport::{ContentHash, Message, TransportError};

use crate::{
    descriptor::{Operation, RequestId},
    proxy::{ProxyEvent, ProxySink, ResultProxy},
};

/// 请求的对外可见状态。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RequestState {
    /// 远端流尚未结束。
    Pending,
    /// 远端流以 EOF 结束。
    Completed,
    /// 远端流以错误结束；缓存结果与错误仍可回放。
    Failed,
}

/// 已完成请求的终局。
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Outcome {
    Finished,
    Failed(TransportError),
}

#[derive(Debug)]
pub(crate) enum EntryState {
    Pending {
        buffer: Vec<Message>,
        subscribers: Vec<ProxySink>,
        error: Option<TransportError>,
    },
    Completed {
        buffer: Arc<[Message]>,
        outcome: Outcome,
    },
}

#[derive(Debug)]
pub(crate) struct Entry {
    content_hash: ContentHash,
    operation: Operation,
    state: EntryState,
}

impl Entry {
    pub(crate) fn pending(content_hash: ContentHash, operation: Operation) -> Self {
        Self {
            content_hash,
            operation,
            state: EntryState::Pending {
                buffer: Vec::new(),
                subscribers: Vec::new(),
                error: None,
            },
        }
    }

    pub(crate) fn content_hash(&self) -> ContentHash {
        self.content_hash
    }

    pub(crate) fn operation(&self) -> Operation {
        self.operation
    }

    pub(crate) fn state(&self) -> RequestState {
        match &self.state {
            EntryState::Pending { .. } => RequestState::Pending,
            EntryState::Completed {
                outcome: Outcome::Finished,
                ..
            } => RequestState::Completed,
            EntryState::Completed {
                outcome: Outcome::Failed(_),
                ..
            } => RequestState::Failed,
        }
    }

    /// 追加结果并广播；已完成时忽略。返回仍存活的订阅者数。
    pub(crate) fn append(&mut self, message: Message) -> Option<usize> {
        match &mut self.state {
            EntryState::Pending {
                buffer,
                subscribers,
                ..
            } => {
                subscribers.retain(|sink| sink.send(ProxyEvent::Result(message.clone())));
                buffer.push(message);
                Some(subscribers.len())
            }
            EntryState::Completed { .. } => None,
        }
    }

    /// 广播错误并记录首个错误，供后续附加者回放；已完成时忽略。
    pub(crate) fn fail(&mut self, err: TransportError) -> bool {
        match &mut self.state {
            EntryState::Pending {
                subscribers, error, ..
            } => {
                subscribers.retain(|sink| sink.send(ProxyEvent::Error(err.clone())));
                if error.is_none() {
                    *error = Some(err);
                }
                true
            }
            EntryState::Completed { .. } => false,
        }
    }

    /// 向全部订阅者投递 `Done` 并冻结缓存。重复调用返回 `None`。
    pub(crate) fn complete(&mut self) -> Option<RequestState> {
        let EntryState::Pending {
            buffer,
            subscribers,
            error,
        } = &mut self.state
        else {
            return None;
        };
        for sink in subscribers.drain(..) {
            sink.send(ProxyEvent::Done);
        }
        let outcome = match error.take() {
            Some(err) => Outcome::Failed(err),
            None => Outcome::Finished,
        };
        let buffer: Arc<[Message]> = Arc::from(std::mem::take(buffer));
        self.state = EntryState::Completed { buffer, outcome };
        Some(self.state())
    }

    /// 创建新代理。
    ///
    /// # 教案式注释
    /// - **在途**：在同一临界区内先回放缓存（及已记录的错误）再登记订阅者，之后到达的结果
    ///   只会经登记后的通道送达，因此无缺口也无重复；
    /// - **已完成**：只取缓存快照，回放由调用方在锁外通过 [`Attachment::finish`] 完成。
    pub(crate) fn attach(&mut self, id: &RequestId) -> Attachment {
        let (sink, proxy) = ResultProxy::channel(id.clone(), self.content_hash);
        match &mut self.state {
            EntryState::Pending {
                buffer,
                subscribers,
                error,
            } => {
                for message in buffer.iter() {
                    sink.send(ProxyEvent::Result(message.clone()));
                }
                if let Some(err) = error {
                    sink.send(ProxyEvent::Error(err.clone()));
                }
                subscribers.push(sink);
                Attachment::Live(proxy)
            }
            EntryState::Completed { buffer, outcome } => Attachment::Replay {
                proxy,
                sink,
                buffer: Arc::clone(buffer),
                error: match outcome {
                    Outcome::Failed(err) => Some(err.clone()),
                    Outcome::Finished => None,
                },
            },
        }
    }
}

/// 附加结果；已完成请求的回放在锁外进行。
#[derive(Debug)]
pub(crate) enum Attachment {
    Live(ResultProxy),
    Replay {
        proxy: ResultProxy,
        sink: ProxySink,
        buffer: Arc<[Message]>,
        error: Option<TransportError>,
    },
}

impl Attachment {
    pub(crate) fn finish(self) -> ResultProxy {
        match self {
            Attachment::Live(proxy) => proxy,
            Attachment::Replay {
                proxy,
                sink,
                buffer,
                error,
            } => {
                for message in buffer.iter() {
                    sink.send(ProxyEvent::Result(message.clone()));
                }
                if let Some(err) = error {
                    sink.send(ProxyEvent::Error(err));
                }
                sink.send(ProxyEvent::Done);
                proxy
            }
        }
    }
}

/// 会话持有的全部请求状态。
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: HashMap<RequestId, Entry>,
    by_hash: HashMap<ContentHash, RequestId>,
}

impl Registry {
    /// 按内容哈希查找已登记的请求（在途或已完成）。
    pub(crate) fn by_hash_mut(&mut self, hash: ContentHash) -> Option<(&RequestId, &mut Entry)> {
        let id = self.by_hash.get(&hash)?;
        let entry = self.entries.get_mut(id)?;
        Some((id, entry))
    }

    pub(crate) fn get(&self, id: &RequestId) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &RequestId) -> Option<&mut Entry> {
        self.entries.get_mut(id)
    }

    /// 登记新的在途请求；调用方已确认标识与哈希均未占用。
    pub(crate) fn insert(&mut self, id: RequestId, entry: Entry) -> &mut Entry {
        self.by_hash.insert(entry.content_hash(), id.clone());
        self.entries.entry(id).or_insert(entry)
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = &RequestId> {
        self.entries.keys()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
