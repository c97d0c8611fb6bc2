//! # Session：派发、去重、扇出与回放
//!
//! ## 核心意图（Why）
//! - 同一内容哈希在会话生命周期内至多派发一次远端调用，后来者复用同一结果流；
//! - 任意时刻附加的订阅者都能看到完整、有序、无重复的结果序列。
//!
//! ## 并发契约（What）
//! - 全部可变状态位于一把 `parking_lot::Mutex<Registry>` 之后；
//! - 临界区内只做无界通道投递与表操作，从不 `.await`；泵任务在锁释放后派生；
//! - 已完成请求的回放在锁外进行，不阻塞其他请求的结果投递。

use std::{collections::BTreeSet, sync::Arc};

use parking_lot::Mutex;
use tokio::runtime::Handle;

use modelsearch_transport::{Connection, Dialer, Message, TransportError};

use crate::{
    config::ClientConfig,
    descriptor::{RequestDescriptor, RequestId},
    error::SessionError,
    proxy::ResultProxy,
    pump,
    registry::{Entry, Registry, RequestState},
};

struct SessionInner {
    connection: Connection,
    registry: Mutex<Registry>,
    runtime: Handle,
}

/// 客户端会话。克隆只增加引用计数，所有克隆共享同一份状态。
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connection", &self.inner.connection)
            .field("requests", &self.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// 校验配置、拨号并建立会话。
    pub async fn connect(dialer: &dyn Dialer, config: &ClientConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let connection = Connection::dial(dialer, &config.endpoint, &config.connection).await?;
        Self::new(connection)
    }

    /// 以已建立的连接构造会话；泵任务派生在当前 Tokio 运行时上。
    pub fn new(connection: Connection) -> Result<Self, SessionError> {
        let runtime = Handle::try_current().map_err(|_| SessionError::RuntimeUnavailable)?;
        Ok(Self {
            inner: Arc::new(SessionInner {
                connection,
                registry: Mutex::new(Registry::default()),
                runtime,
            }),
        })
    }

    /// 底层连接。
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// 返回描述符对应请求的新代理，必要时派发远端调用。
    ///
    /// # 教案式注释
    /// - **契约 (What)**：
    ///   - 内容哈希已登记（在途或已完成）时直接附加，返回的代理携带被复用请求的标识；
    ///   - 否则描述符标识若已登记给另一份载荷，返回 [`SessionError::IdentifierConflict`]；
    ///   - 否则派发、登记并附加，随后派生恰好一个泵任务；
    /// - **执行 (How)**：查重、派发、登记、附加在同一临界区内完成，
    ///   两个并发调用不可能都观察到“未登记”。
    pub fn get_or_dispatch(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<ResultProxy, SessionError> {
        let hash = descriptor.content_hash();
        let (attachment, handle) = {
            let mut registry = self.inner.registry.lock();
            if let Some((id, entry)) = registry.by_hash_mut(hash) {
                tracing::debug!(
                    request_id = %id,
                    requested = %descriptor.id(),
                    %hash,
                    state = ?entry.state(),
                    "deduplicated request, attaching"
                );
                (entry.attach(id), None)
            } else if registry.get(descriptor.id()).is_some() {
                return Err(SessionError::IdentifierConflict {
                    id: descriptor.id().clone(),
                });
            } else {
                let handle = descriptor.dispatch(&self.inner.connection);
                let id = descriptor.id().clone();
                let entry =
                    registry.insert(id.clone(), Entry::pending(hash, descriptor.operation()));
                tracing::info!(
                    request_id = %id,
                    %hash,
                    operation = ?entry.operation(),
                    "dispatching request"
                );
                (entry.attach(&id), Some(handle))
            }
        };
        if let Some(handle) = handle {
            self.inner.runtime.spawn(pump::run(self.clone(), handle));
        }
        Ok(attachment.finish())
    }

    /// 为已登记的请求创建新代理。
    ///
    /// - 在途：先收到附加时刻的缓存快照，再无缝衔接实时结果；
    /// - 已完成：收到全部缓存结果、终局错误（若有）与 `Done`。
    pub fn attach(&self, id: &RequestId) -> Result<ResultProxy, SessionError> {
        let attachment = {
            let mut registry = self.inner.registry.lock();
            let entry = registry
                .get_mut(id)
                .ok_or_else(|| SessionError::UnknownRequest { id: id.clone() })?;
            tracing::debug!(request_id = %id, state = ?entry.state(), "attaching subscriber");
            entry.attach(id)
        };
        Ok(attachment.finish())
    }

    /// 全部已登记的请求标识（在途与已完成）。
    pub fn known_identifiers(&self) -> BTreeSet<RequestId> {
        self.inner.registry.lock().ids().cloned().collect()
    }

    /// 请求当前状态；未登记时返回 `None`。
    pub fn request_state(&self, id: &RequestId) -> Option<RequestState> {
        self.inner.registry.lock().get(id).map(Entry::state)
    }

    /// 已登记的请求数。
    pub fn len(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// 是否尚未登记任何请求。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 关闭连接；每个在途请求随后以 [`TransportError::Closed`] 终结。
    pub async fn shutdown(&self) {
        tracing::info!(address = self.inner.connection.address(), "shutting down session");
        self.inner.connection.close().await;
    }

    /// 缓存并广播一条结果；请求已完成时忽略。
    pub(crate) fn proxy_result(&self, id: &RequestId, message: Message) {
        let mut registry = self.inner.registry.lock();
        match registry.get_mut(id).map(|entry| entry.append(message)) {
            Some(Some(subscribers)) => {
                tracing::trace!(request_id = %id, subscribers, "result forwarded");
            }
            Some(None) => tracing::debug!(request_id = %id, "result after completion ignored"),
            None => tracing::warn!(request_id = %id, "result for unregistered request"),
        }
    }

    /// 广播一条错误并记录为终局错误；请求已完成时忽略。
    pub(crate) fn proxy_error(&self, id: &RequestId, error: TransportError) {
        tracing::warn!(request_id = %id, %error, "request failed");
        let mut registry = self.inner.registry.lock();
        if let Some(entry) = registry.get_mut(id) {
            if !entry.fail(error) {
                tracing::debug!(request_id = %id, "error after completion ignored");
            }
        }
    }

    /// 终结请求：向全部订阅者投递 `Done` 并冻结缓存。重复调用无副作用。
    pub(crate) fn proxy_done(&self, id: &RequestId) {
        let mut registry = self.inner.registry.lock();
        match registry.get_mut(id).map(Entry::complete) {
            Some(Some(state)) => tracing::debug!(request_id = %id, ?state, "request completed"),
            Some(None) => tracing::debug!(request_id = %id, "request already completed"),
            None => tracing::warn!(request_id = %id, "completion for unregistered request"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{descriptor::Operation, proxy::ProxyEvent};
    use futures::StreamExt;
    use modelsearch_transport::mem::{self, MemoryChannel};
    use serde_json::json;

    fn idle_session() -> Session {
        let channel = MemoryChannel::new(|_| futures::stream::pending().boxed());
        Session::new(Connection::from_channel("mem://idle", Arc::new(channel))).expect("runtime")
    }

    fn msg(n: i64) -> Message {
        Message::new("GetSearchResultsResponse", json!({ "n": n }))
    }

    #[tokio::test]
    async fn completion_is_idempotent() {
        let session = idle_session();
        let descriptor = RequestDescriptor::get_search_results("s-1");
        let mut proxy = session.get_or_dispatch(&descriptor).expect("dispatch");
        session.proxy_result(descriptor.id(), msg(1));
        session.proxy_done(descriptor.id());
        session.proxy_done(descriptor.id());
        assert_eq!(proxy.recv().await, Some(ProxyEvent::Result(msg(1))));
        assert_eq!(proxy.recv().await, Some(ProxyEvent::Done));
        assert_eq!(proxy.try_recv(), None);
        assert_eq!(
            session.request_state(descriptor.id()),
            Some(RequestState::Completed)
        );
    }

    #[tokio::test]
    async fn results_after_completion_are_ignored() {
        let session = idle_session();
        let descriptor = RequestDescriptor::get_search_results("s-2");
        drop(session.get_or_dispatch(&descriptor).expect("dispatch"));
        session.proxy_result(descriptor.id(), msg(1));
        session.proxy_done(descriptor.id());
        session.proxy_result(descriptor.id(), msg(2));
        session.proxy_error(descriptor.id(), TransportError::Closed);

        let outcome = session.attach(descriptor.id()).expect("attach").collect().await;
        assert_eq!(outcome.results, vec![msg(1)]);
        assert!(outcome.errors.is_empty());
        assert!(outcome.completed);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn dispatch_and_dedup_are_logged() {
        let session = idle_session();
        let first = RequestDescriptor::get_search_results("s-3");
        let second = RequestDescriptor::get_search_results("s-3");
        let a = session.get_or_dispatch(&first).expect("dispatch");
        let b = session.get_or_dispatch(&second).expect("attach");
        assert_eq!(a.request_id(), b.request_id());
        assert!(logs_contain("dispatching request"));
        assert!(logs_contain("deduplicated request"));
    }

    #[test]
    fn construction_requires_a_runtime() {
        let channel = MemoryChannel::new(|_| mem::script(Vec::new()));
        let result = Session::new(Connection::from_channel("mem://", Arc::new(channel)));
        assert!(matches!(result, Err(SessionError::RuntimeUnavailable)));
    }

    #[tokio::test]
    async fn dispatch_is_recorded_under_the_descriptor_id() {
        let session = idle_session();
        let descriptor =
            RequestDescriptor::new(Operation::EndSearch, Message::new("EndSearchRequest", json!({})))
                .with_id("end-1");
        let proxy = session.get_or_dispatch(&descriptor).expect("dispatch");
        assert_eq!(proxy.request_id().as_str(), "end-1");
        assert_eq!(
            session.known_identifiers().into_iter().collect::<Vec<_>>(),
            vec![RequestId::from("end-1")]
        );
    }
}
