use thiserror::Error;

/// 管线描述的结构错误。
///
/// # 教案式说明
/// - **意图 (Why)**：在任何网络调用之前拒绝畸形描述；
/// - **契约 (What)**：`step` 均为零基步骤下标，便于调用方回指构建代码。
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum StructuralError {
    /// 管线不含任何步骤。
    #[error("pipeline has no steps")]
    EmptyChain,

    /// 步骤缺少原语名。
    #[error("step {step} has no primitive")]
    MissingPrimitive { step: usize },

    /// 步骤连线后仍没有任何参数。
    #[error("step {step} has no arguments")]
    MissingArguments { step: usize },

    /// 参数引用了自身或之后的步骤。
    #[error("step {step} references step {target}, which does not precede it")]
    ForwardReference { step: usize, target: usize },

    /// 参数引用了被引用步骤不存在的输出。
    #[error("step {step} references unknown output `{output}` of step {target}")]
    UnknownOutput {
        step: usize,
        target: usize,
        output: String,
    },

    /// 参数引用了不存在的管线输入。
    #[error("step {step} references pipeline input {index}, which is not declared")]
    UnknownInput { step: usize, index: usize },
}
