//! 泵任务：把一个远端响应流搬运进会话状态。
//!
//! 每个已派发的请求恰好一个泵。源先被等待（此时才真正发起远端调用），
//! 随后逐项转交会话；首个错误或 EOF 之后终结请求并退出，不做重试。

use futures::StreamExt;
use tracing::Instrument;

use crate::{descriptor::RequestHandle, session::Session};

pub(crate) async fn run(session: Session, handle: RequestHandle) {
    let id = handle.id().clone();
    let span = tracing::debug_span!(
        "pump",
        request_id = %id,
        hash = %handle.content_hash(),
        operation = ?handle.operation()
    );
    async move {
        let mut responses = match handle.into_source().await {
            Ok(responses) => responses,
            Err(error) => {
                session.proxy_error(&id, error);
                session.proxy_done(&id);
                return;
            }
        };
        let mut received = 0usize;
        while let Some(item) = responses.next().await {
            match item {
                Ok(message) => {
                    received += 1;
                    session.proxy_result(&id, message);
                }
                Err(error) => {
                    session.proxy_error(&id, error);
                    session.proxy_done(&id);
                    return;
                }
            }
        }
        tracing::debug!(received, "response stream ended");
        session.proxy_done(&id);
    }
    .instrument(span)
    .await
}
