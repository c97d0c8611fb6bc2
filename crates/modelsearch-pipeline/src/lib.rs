//! # modelsearch-pipeline
//!
//! ## 定位与职责（Why）
//! - 把“有序的原语步骤”编译为一条不可变的管线描述载荷，供会话层作为请求正文发送；
//! - 会话层从不检查载荷内部结构，只关心编译是否成功以及载荷的内容哈希。
//!
//! ## 行为契约（What）
//! - [`PipelineBuilder::compile`]：成功时返回 [`PipelineDescription`]，否则返回 [`StructuralError`]；
//! - 结构错误在派发之前暴露，畸形描述永远不会产生远端调用。
//!
//! ## 编译规则（How）
//! - 线性链：[`Step::chained`] 在未显式给出 `inputs` 参数时，首步接 `inputs.0`，后续步骤接前一步的首个输出；
//! - 参数引用只能指向管线输入或更早的步骤，指向自身或之后的步骤视为结构错误；
//! - 超参数按类型带标签序列化（`{"type": "int", "value": 3}`）。

pub mod builder;
pub mod error;
pub mod step;

pub use builder::{PipelineBuilder, PipelineDescription};
pub use error::StructuralError;
pub use step::{ArgumentRef, Hyperparameter, Step};
