//! # PipelineBuilder：线性管线编译器
//!
//! 编译产物的 JSON 形态：
//!
//! ```text
//! {
//!   "name": "...",
//!   "inputs":  [{ "name": "dataset" }],
//!   "outputs": [{ "data": "steps.2.produce" }],
//!   "steps": [
//!     { "primitive": "...",
//!       "arguments": { "inputs": "inputs.0" },
//!       "outputs": ["produce"],
//!       "hyperparams": { "n_estimators": { "type": "int", "value": 100 } } }
//!   ]
//! }
//! ```

use serde_json::{Map, Value, json};

use modelsearch_transport::Message;

use crate::{
    error::StructuralError,
    step::{ArgumentRef, Step},
};

/// 线性链自动连线使用的参数名。
const CHAIN_ARGUMENT: &str = "inputs";

/// 管线描述构建器。
#[derive(Clone, Debug, Default)]
pub struct PipelineBuilder {
    name: String,
    inputs: Vec<String>,
    steps: Vec<Step>,
}

impl PipelineBuilder {
    /// 创建空构建器。
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// 声明一个管线输入，返回构建器自身。
    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    /// 追加一个步骤。
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// 已追加的步骤数。
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// 是否尚无步骤。
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 编译为不可变的管线描述。
    ///
    /// # 教案式注释
    /// - **契约 (What)**：任一步骤缺少原语或参数、引用越界、步骤链为空，均返回 [`StructuralError`]；
    /// - **执行 (How)**：先按线性链规则补齐 `inputs` 参数，再逐个校验引用，最后拼装 JSON。
    pub fn compile(&self) -> Result<PipelineDescription, StructuralError> {
        if self.steps.is_empty() {
            return Err(StructuralError::EmptyChain);
        }

        let mut steps_json = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            if step.primitive.trim().is_empty() {
                return Err(StructuralError::MissingPrimitive { step: index });
            }

            let mut arguments = step.arguments.clone();
            if step.chained && !arguments.iter().any(|(name, _)| name == CHAIN_ARGUMENT) {
                arguments.insert(0, (CHAIN_ARGUMENT.to_owned(), self.upstream_of(index)));
            }
            if arguments.is_empty() {
                return Err(StructuralError::MissingArguments { step: index });
            }

            let mut arguments_json = Map::new();
            for (name, source) in &arguments {
                self.check_reference(index, source)?;
                arguments_json.insert(name.clone(), Value::String(source.to_string()));
            }

            steps_json.push(json!({
                "primitive": step.primitive,
                "arguments": arguments_json,
                "outputs": step.outputs,
                "hyperparams": step.hyperparameters,
            }));
        }

        let last = self.steps.len() - 1;
        let final_output = ArgumentRef::StepOutput {
            step: last,
            output: self.steps[last].outputs[0].clone(),
        };
        let inputs: Vec<Value> = self
            .inputs
            .iter()
            .map(|name| json!({ "name": name }))
            .collect();
        let value = json!({
            "name": self.name,
            "inputs": inputs,
            "outputs": [{ "data": final_output.to_string() }],
            "steps": steps_json,
        });
        tracing::debug!(pipeline = %self.name, steps = self.steps.len(), "pipeline compiled");
        Ok(PipelineDescription {
            name: self.name.clone(),
            value,
        })
    }

    fn upstream_of(&self, index: usize) -> ArgumentRef {
        match index.checked_sub(1) {
            None => ArgumentRef::Input(0),
            Some(previous) => ArgumentRef::StepOutput {
                step: previous,
                output: self.steps[previous].outputs[0].clone(),
            },
        }
    }

    fn check_reference(&self, index: usize, source: &ArgumentRef) -> Result<(), StructuralError> {
        match source {
            ArgumentRef::Input(input) if *input >= self.inputs.len() => {
                Err(StructuralError::UnknownInput {
                    step: index,
                    index: *input,
                })
            }
            ArgumentRef::Input(_) => Ok(()),
            ArgumentRef::StepOutput { step, .. } if *step >= index => {
                Err(StructuralError::ForwardReference {
                    step: index,
                    target: *step,
                })
            }
            ArgumentRef::StepOutput { step, output } => {
                if self.steps[*step].outputs.contains(output) {
                    Ok(())
                } else {
                    Err(StructuralError::UnknownOutput {
                        step: index,
                        target: *step,
                        output: output.clone(),
                    })
                }
            }
        }
    }
}

/// 编译完成的管线描述。
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineDescription {
    name: String,
    value: Value,
}

impl PipelineDescription {
    /// 管线名。
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 描述的 JSON 视图。
    pub fn as_json(&self) -> &Value {
        &self.value
    }

    /// 以 `{"pipeline": <描述>}` 为正文封装为消息。
    pub fn to_message(&self, kind: &str) -> Message {
        Message::new(kind, json!({ "pipeline": self.value }))
    }
}
