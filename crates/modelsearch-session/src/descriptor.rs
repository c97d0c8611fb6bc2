//! # 请求描述符与请求句柄
//!
//! ## 核心意图（Why）
//! - [`RequestDescriptor`] 是纯数据：标识 + 载荷内容哈希 + 调用形态，由调用方每次逻辑调用构造一次；
//! - 调用形态以 [`Operation`] / [`CallKind`] 显式建模（一元或服务端流式），可穷尽匹配；
//! - [`RequestDescriptor::dispatch`] 不做任何 IO：它只把连接与载荷装进延迟执行的响应源，
//!   会话可以在持锁状态下登记句柄，真正的远端调用由泵任务在锁外发起。

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::{
    FutureExt, StreamExt,
    future::BoxFuture,
    stream,
};
use serde_json::json;

use modelsearch_pipeline::{PipelineBuilder, PipelineDescription, StructuralError};
use modelsearch_transport::{Connection, ContentHash, Message, ResponseStream, TransportError};

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);

/// 请求标识。
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RequestId(Arc<str>);

impl RequestId {
    /// 以调用方给定的字符串构造。
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// 生成进程内唯一的标识（`req-<序号>`）。
    pub fn generate() -> Self {
        let seq = NEXT_REQUEST.fetch_add(1, Ordering::Relaxed);
        Self(Arc::from(format!("req-{seq}")))
    }

    /// 字符串视图。
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// 远端调用形态。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CallKind {
    /// 单请求单响应。
    Unary,
    /// 单请求多响应，以 EOF 或错误结束。
    Streaming,
}

/// 模型搜索服务提供的操作。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    /// 登记一条管线描述。
    CreatePipeline,
    /// 执行管线并流式返回进度与产出。
    ExecutePipeline,
    /// 以管线模板发起解空间搜索并流式返回搜索进度。
    SearchSolutions,
    /// 流式拉取某次搜索产出的候选解。
    GetSearchResults,
    /// 查询某个候选解的完整描述。
    DescribeSolution,
    /// 结束一次搜索并释放服务端资源。
    EndSearch,
}

impl Operation {
    /// 调用形态。
    pub fn call_kind(self) -> CallKind {
        match self {
            Operation::ExecutePipeline
            | Operation::SearchSolutions
            | Operation::GetSearchResults => CallKind::Streaming,
            Operation::CreatePipeline | Operation::DescribeSolution | Operation::EndSearch => {
                CallKind::Unary
            }
        }
    }

    /// 请求消息类别。
    pub fn request_kind(self) -> &'static str {
        match self {
            Operation::CreatePipeline => "CreatePipelineRequest",
            Operation::ExecutePipeline => "ExecutePipelineRequest",
            Operation::SearchSolutions => "SearchSolutionsRequest",
            Operation::GetSearchResults => "GetSearchResultsRequest",
            Operation::DescribeSolution => "DescribeSolutionRequest",
            Operation::EndSearch => "EndSearchRequest",
        }
    }
}

/// 解空间搜索参数。
///
/// `trace_context` 属于 [`Message::HASH_EXCLUDE`]，不同调用方携带不同追踪上下文时仍会去重。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchOptions {
    /// 问题描述标识（数据集 + 目标）。
    pub problem: String,
    /// 搜索时限（分钟），0 表示由服务端决定。
    pub time_bound_minutes: u32,
    /// 候选解数量上限，0 表示不限。
    pub rank_solutions_limit: u32,
    /// 调用方追踪上下文，缺省时不写入请求正文。
    pub trace_context: Option<String>,
}

/// 一次逻辑调用的不可变描述。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `id`：调用方视角的标识；去重命中时会话返回的代理携带被复用请求的标识；
///   - `content_hash`：由载荷计算，构造后不再变化；
///   - `operation` + `payload`：决定调用形态与请求正文。
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    id: RequestId,
    content_hash: ContentHash,
    operation: Operation,
    payload: Message,
}

impl RequestDescriptor {
    /// 以生成的标识构造。
    pub fn new(operation: Operation, payload: Message) -> Self {
        let content_hash = payload.content_hash();
        Self {
            id: RequestId::generate(),
            content_hash,
            operation,
            payload,
        }
    }

    /// 替换标识。
    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = id.into();
        self
    }

    /// 编译管线构建器并封装为描述符；结构错误在此处暴露，不会产生任何句柄。
    pub fn from_builder(
        operation: Operation,
        builder: &PipelineBuilder,
    ) -> Result<Self, StructuralError> {
        let description = builder.compile()?;
        Ok(Self::new(
            operation,
            description.to_message(operation.request_kind()),
        ))
    }

    /// 登记管线。
    pub fn create_pipeline(description: &PipelineDescription) -> Self {
        let operation = Operation::CreatePipeline;
        Self::new(operation, description.to_message(operation.request_kind()))
    }

    /// 执行管线，`inputs` 为数据集 URI。
    pub fn execute_pipeline(description: &PipelineDescription, inputs: &[&str]) -> Self {
        let operation = Operation::ExecutePipeline;
        let payload = Message::new(
            operation.request_kind(),
            json!({ "pipeline": description.as_json(), "inputs": inputs }),
        );
        Self::new(operation, payload)
    }

    /// 以管线模板发起搜索。
    pub fn search_solutions(template: &PipelineDescription, options: &SearchOptions) -> Self {
        let operation = Operation::SearchSolutions;
        let mut body = json!({
            "template": template.as_json(),
            "problem": options.problem,
            "time_bound_minutes": options.time_bound_minutes,
            "rank_solutions_limit": options.rank_solutions_limit,
        });
        if let (Some(trace), Some(map)) = (&options.trace_context, body.as_object_mut()) {
            map.insert("trace_context".into(), json!(trace));
        }
        Self::new(operation, Message::new(operation.request_kind(), body))
    }

    /// 拉取搜索产出的候选解。
    pub fn get_search_results(search_id: &str) -> Self {
        let operation = Operation::GetSearchResults;
        Self::new(
            operation,
            Message::new(operation.request_kind(), json!({ "search_id": search_id })),
        )
    }

    /// 查询候选解描述。
    pub fn describe_solution(solution_id: &str) -> Self {
        let operation = Operation::DescribeSolution;
        Self::new(
            operation,
            Message::new(operation.request_kind(), json!({ "solution_id": solution_id })),
        )
    }

    /// 结束搜索。
    pub fn end_search(search_id: &str) -> Self {
        let operation = Operation::EndSearch;
        Self::new(
            operation,
            Message::new(operation.request_kind(), json!({ "search_id": search_id })),
        )
    }

    /// 标识。
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// 内容哈希。
    pub fn content_hash(&self) -> ContentHash {
        self.content_hash
    }

    /// 操作。
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// 请求载荷。
    pub fn payload(&self) -> &Message {
        &self.payload
    }

    /// 针对连接生成请求句柄。
    ///
    /// # 教案式注释
    /// - **契约 (What)**：不发起 IO；返回的句柄在被泵任务轮询时才真正调用远端；
    /// - **执行 (How)**：一元调用被适配为只含一项的响应流，泵任务无需区分两种形态。
    pub fn dispatch(&self, connection: &Connection) -> RequestHandle {
        let connection = connection.clone();
        let payload = self.payload.clone();
        let source = match self.operation.call_kind() {
            CallKind::Unary => async move {
                let response = connection.unary(payload).await?;
                Ok(stream::iter([Ok(response)]).boxed())
            }
            .boxed(),
            CallKind::Streaming => async move { connection.stream(payload).await }.boxed(),
        };
        RequestHandle {
            id: self.id.clone(),
            content_hash: self.content_hash,
            operation: self.operation,
            payload: self.payload.clone(),
            source,
        }
    }
}

pub(crate) type ResponseSource = BoxFuture<'static, Result<ResponseStream, TransportError>>;

/// 一次已派发调用的执行记录，由其泵任务独占。
pub struct RequestHandle {
    id: RequestId,
    content_hash: ContentHash,
    operation: Operation,
    payload: Message,
    source: ResponseSource,
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.id)
            .field("content_hash", &self.content_hash)
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

impl RequestHandle {
    /// 标识。
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// 内容哈希。
    pub fn content_hash(&self) -> ContentHash {
        self.content_hash
    }

    /// 操作。
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// 请求载荷。
    pub fn payload(&self) -> &Message {
        &self.payload
    }

    pub(crate) fn into_source(self) -> ResponseSource {
        self.source
    }
}
