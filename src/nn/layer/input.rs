/*
 * @Author       : 老董
 * @Date         : 2026-02-13
 * @Description  : InputLayer——占位输入层（可选包装一个具体数组）
 */

use super::Layer;
use crate::nn::error::GraphError;
use crate::nn::types::{CallArgs, DType, Mask, Shape, TensorData, TensorSpec};
use rand::rngs::StdRng;
use serde_json::{Value, json};

/// 占位输入层：无权重，单输出张量即它声明的占位规格。
///
/// `wrapping` 变体把一个具体数组固定在层上（克隆注入原始数值、
/// 或把外部张量接进图时使用），执行期不需要再喂值。
pub struct InputLayer {
    name: String,
    spec: TensorSpec,
    value: Option<TensorData>,
}

impl InputLayer {
    pub fn new(spec: TensorSpec, name: Option<&str>) -> Self {
        Self {
            name: name.unwrap_or_default().to_string(),
            spec,
            value: None,
        }
    }

    /// 包装一个具体数组：规格从数组形状推出（全定长）
    pub fn wrapping(value: TensorData, name: Option<&str>) -> Self {
        let spec = TensorSpec::dense(Shape::from_fixed(value.shape()), DType::F32);
        Self {
            name: name.unwrap_or_default().to_string(),
            spec,
            value: Some(value),
        }
    }

    pub fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    /// 被包装的固定数值（占位输入返回 None）
    pub fn fixed_value(&self) -> Option<&TensorData> {
        self.value.as_ref()
    }

    pub fn from_config(config: &Value) -> Result<Self, GraphError> {
        let spec: TensorSpec = serde_json::from_value(
            config
                .get("spec")
                .cloned()
                .ok_or_else(|| GraphError::InvalidConfig("InputLayer 配置缺少 spec".into()))?,
        )?;
        let name = config.get("name").and_then(Value::as_str).unwrap_or("");
        Ok(Self::new(spec, Some(name).filter(|s| !s.is_empty())))
    }
}

impl Layer for InputLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn class_name(&self) -> &'static str {
        "InputLayer"
    }

    fn batch_input_shape(&self) -> Option<Shape> {
        Some(self.spec.shape.clone())
    }

    fn dtype(&self) -> DType {
        self.spec.dtype
    }

    fn built(&self) -> bool {
        true
    }

    fn build(&mut self, _input_specs: &[TensorSpec], _rng: &mut StdRng) -> Result<(), GraphError> {
        Ok(())
    }

    fn compute_output_specs(
        &self,
        input_specs: &[TensorSpec],
    ) -> Result<Vec<TensorSpec>, GraphError> {
        if !input_specs.is_empty() {
            return Err(GraphError::InvalidOperation(format!(
                "输入层`{}`不接受上游张量",
                self.name
            )));
        }
        Ok(vec![self.spec.clone()])
    }

    fn call(
        &self,
        _inputs: &[TensorData],
        _arguments: &CallArgs,
    ) -> Result<Vec<TensorData>, GraphError> {
        match &self.value {
            Some(v) => Ok(vec![v.clone()]),
            None => Err(GraphError::InvalidOperation(format!(
                "占位输入层`{}`的值应由执行入口喂入",
                self.name
            ))),
        }
    }

    fn compute_mask(&self, _input_masks: &[Option<Mask>]) -> Vec<Option<Mask>> {
        vec![None]
    }

    fn get_config(&self) -> Value {
        json!({
            "name": self.name,
            "spec": serde_json::to_value(&self.spec).unwrap_or(Value::Null),
        })
    }

    fn fresh_clone(&self) -> Result<Box<dyn Layer>, GraphError> {
        Ok(Box::new(Self::from_config(&self.get_config())?))
    }

    fn is_input_layer(&self) -> bool {
        true
    }

    fn sparse(&self) -> bool {
        self.spec.sparse
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
