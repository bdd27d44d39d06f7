/*
 * @Author       : 老董
 * @Date         : 2026-02-13
 * @Description  : Activation 层与内置激活函数表
 */

use super::Layer;
use crate::nn::error::GraphError;
use crate::nn::types::{CallArgs, Shape, TensorData, TensorSpec};
use ndarray::{Axis, Ix2};
use rand::rngs::StdRng;
use serde_json::{Value, json};

/// 按名称应用内置激活函数（softmax 沿最后一维归一化）
pub(crate) fn apply_activation(name: &str, x: TensorData) -> Result<TensorData, GraphError> {
    match name {
        "linear" => Ok(x),
        "relu" => Ok(x.mapv(|v| v.max(0.0))),
        "sigmoid" => Ok(x.mapv(|v| 1.0 / (1.0 + (-v).exp()))),
        "tanh" => Ok(x.mapv(f32::tanh)),
        "softmax" => {
            let x2 = x
                .into_dimensionality::<Ix2>()
                .map_err(|_| GraphError::InvalidOperation("softmax 目前只支持二维输入".into()))?;
            let mut out = x2;
            for mut row in out.axis_iter_mut(Axis(0)) {
                let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                row.mapv_inplace(|v| (v - max).exp());
                let sum = row.sum();
                row.mapv_inplace(|v| v / sum);
            }
            Ok(out.into_dyn())
        }
        _ => Err(GraphError::UnknownIdentifier(format!(
            "未知的激活函数名：{name}"
        ))),
    }
}

pub(crate) fn is_known_activation(name: &str) -> bool {
    matches!(name, "linear" | "relu" | "sigmoid" | "tanh" | "softmax")
}

/// 逐元素激活层（无权重，形状不变）
pub struct Activation {
    name: String,
    activation: String,
    batch_input_shape: Option<Shape>,
}

impl Activation {
    pub fn new(activation: &str) -> Result<Self, GraphError> {
        if !is_known_activation(activation) {
            return Err(GraphError::UnknownIdentifier(format!(
                "未知的激活函数名：{activation}"
            )));
        }
        Ok(Self {
            name: String::new(),
            activation: activation.to_string(),
            batch_input_shape: None,
        })
    }

    /// 声明输入特征形状（作为 Sequential 首层时需要）
    pub fn with_input_shape(mut self, feature_dims: &[usize]) -> Self {
        self.batch_input_shape = Some(Shape::with_batch(feature_dims));
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn from_config(config: &Value) -> Result<Self, GraphError> {
        let activation = config
            .get("activation")
            .and_then(Value::as_str)
            .ok_or_else(|| GraphError::InvalidConfig("Activation 配置缺少 activation".into()))?;
        let mut layer = Self::new(activation)?;
        if let Some(name) = config.get("name").and_then(Value::as_str) {
            layer.name = name.to_string();
        }
        if let Some(shape) = config.get("batch_input_shape").filter(|v| !v.is_null()) {
            layer.batch_input_shape = Some(serde_json::from_value(shape.clone())?);
        }
        Ok(layer)
    }
}

impl Layer for Activation {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn class_name(&self) -> &'static str {
        "Activation"
    }

    fn batch_input_shape(&self) -> Option<Shape> {
        self.batch_input_shape.clone()
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
        if input_specs.len() != 1 {
            return Err(GraphError::TensorCountMismatch {
                expected: 1,
                got: input_specs.len(),
            });
        }
        Ok(vec![input_specs[0].clone()])
    }

    fn call(
        &self,
        inputs: &[TensorData],
        _arguments: &CallArgs,
    ) -> Result<Vec<TensorData>, GraphError> {
        if inputs.len() != 1 {
            return Err(GraphError::TensorCountMismatch {
                expected: 1,
                got: inputs.len(),
            });
        }
        Ok(vec![apply_activation(&self.activation, inputs[0].clone())?])
    }

    fn get_config(&self) -> Value {
        json!({
            "name": self.name,
            "activation": self.activation,
            "batch_input_shape": self
                .batch_input_shape
                .as_ref()
                .and_then(|s| serde_json::to_value(s).ok()),
        })
    }

    fn fresh_clone(&self) -> Result<Box<dyn Layer>, GraphError> {
        Ok(Box::new(Self::from_config(&self.get_config())?))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
