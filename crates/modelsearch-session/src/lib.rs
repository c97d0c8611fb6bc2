//! # modelsearch-session
//!
//! ## 定位与职责（Why）
//! - 客户端侧会话管理器：把长时间运行的流式计算请求（管线创建/执行/搜索）派发到远端，
//!   并把每个请求的结果流复用给任意数量的独立订阅者；
//! - 对内容相同的请求去重：同一内容哈希在会话生命周期内至多触发一次远端调用。
//!
//! ## 架构嵌入（Where）
//! - 自底向上：[`Connection`](modelsearch_transport::Connection) → [`RequestDescriptor`] →
//!   [`RequestHandle`] → [`Session`] → [`ResultProxy`]；
//! - 路由层只接触 [`Session::get_or_dispatch`]、[`Session::attach`] 与 [`Session::known_identifiers`]。
//!
//! ## 并发模型（How）
//! - 每个在途请求一个泵任务（`pump`），负责把远端流搬运进会话状态；
//! - 会话状态由单把互斥锁保护，临界区只做 O(订阅者数) 的无界通道投递，从不等待；
//! - 同一请求内所有订阅者观察到的顺序与远端到达顺序一致，跨请求不保证顺序。

pub mod config;
pub mod descriptor;
pub mod error;
pub mod proxy;
pub mod telemetry;

mod pump;
mod registry;
mod session;

pub use config::ClientConfig;
pub use descriptor::{CallKind, Operation, RequestDescriptor, RequestHandle, RequestId, SearchOptions};
pub use error::{ConfigError, SessionError};
pub use proxy::{ProxyEvent, ProxyOutcome, ResultProxy};
pub use registry::RequestState;
pub use session::Session;
