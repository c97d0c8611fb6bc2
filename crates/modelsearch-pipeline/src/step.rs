//! 步骤、参数引用与超参数。

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// 默认输出名。
pub const DEFAULT_OUTPUT: &str = "produce";

/// 参数的数据来源。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ArgumentRef {
    /// 第 `n` 个管线输入，序列化为 `inputs.n`。
    Input(usize),
    /// 某一步骤的某个输出，序列化为 `steps.step.output`。
    StepOutput { step: usize, output: String },
}

impl ArgumentRef {
    /// 引用某步骤的默认输出。
    pub fn produce_of(step: usize) -> Self {
        ArgumentRef::StepOutput {
            step,
            output: DEFAULT_OUTPUT.to_owned(),
        }
    }
}

impl fmt::Display for ArgumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentRef::Input(index) => write!(f, "inputs.{index}"),
            ArgumentRef::StepOutput { step, output } => write!(f, "steps.{step}.{output}"),
        }
    }
}

/// 带类型的超参数值。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Hyperparameter {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    List(Vec<Hyperparameter>),
}

impl From<i64> for Hyperparameter {
    fn from(value: i64) -> Self {
        Hyperparameter::Int(value)
    }
}

impl From<f64> for Hyperparameter {
    fn from(value: f64) -> Self {
        Hyperparameter::Float(value)
    }
}

impl From<bool> for Hyperparameter {
    fn from(value: bool) -> Self {
        Hyperparameter::Bool(value)
    }
}

impl From<&str> for Hyperparameter {
    fn from(value: &str) -> Self {
        Hyperparameter::Text(value.to_owned())
    }
}

impl From<String> for Hyperparameter {
    fn from(value: String) -> Self {
        Hyperparameter::Text(value)
    }
}

impl<T: Into<Hyperparameter>> From<Vec<T>> for Hyperparameter {
    fn from(values: Vec<T>) -> Self {
        Hyperparameter::List(values.into_iter().map(Into::into).collect())
    }
}

/// 管线中的一个原语步骤。
///
/// # 教案式注释
/// - **契约 (What)**：
///   - `primitive`：原语路径，例如 `d3m.primitives.classification.random_forest.SKlearn`；
///   - `arguments`：按插入顺序保存的 `(参数名, 来源)`，同名参数后写覆盖先写；
///   - `outputs`：对外暴露的输出名，默认仅 `produce`；
///   - `chained`：编译时是否自动补齐 `inputs` 参数。
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub(crate) primitive: String,
    pub(crate) arguments: Vec<(String, ArgumentRef)>,
    pub(crate) hyperparameters: BTreeMap<String, Hyperparameter>,
    pub(crate) outputs: Vec<String>,
    pub(crate) chained: bool,
}

impl Step {
    /// 构造参数完全由调用方给出的步骤。
    pub fn new(primitive: impl Into<String>) -> Self {
        Self {
            primitive: primitive.into(),
            arguments: Vec::new(),
            hyperparameters: BTreeMap::new(),
            outputs: vec![DEFAULT_OUTPUT.to_owned()],
            chained: false,
        }
    }

    /// 构造线性链步骤，`inputs` 参数在编译时自动接到上游。
    pub fn chained(primitive: impl Into<String>) -> Self {
        Self {
            chained: true,
            ..Self::new(primitive)
        }
    }

    /// 设置参数来源。
    pub fn argument(mut self, name: impl Into<String>, source: ArgumentRef) -> Self {
        let name = name.into();
        match self.arguments.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = source,
            None => self.arguments.push((name, source)),
        }
        self
    }

    /// 设置超参数。
    pub fn hyperparameter(mut self, name: impl Into<String>, value: impl Into<Hyperparameter>) -> Self {
        self.hyperparameters.insert(name.into(), value.into());
        self
    }

    /// 追加一个输出名。
    pub fn output(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.outputs.contains(&name) {
            self.outputs.push(name);
        }
        self
    }

    /// 原语名。
    pub fn primitive(&self) -> &str {
        &self.primitive
    }
}
