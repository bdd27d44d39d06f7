/*
 * @Author       : 老董
 * @Date         : 2026-03-01
 * @Description  : 测试公用件：双输出测试层 + 常用模型搭建
 */

use crate::nn::layer::Layer;
use crate::nn::{
    CallArgs, Dense, GraphError, Mask, Sequential, Shape, TensorData, TensorSpec,
};
use rand::rngs::StdRng;
use serde_json::{Value, json};

/// 双输出测试层：把输入原样复制成两份
///
/// Sequential 的单输出规则要靠它来触发；也注册进自定义对象表，
/// 验证被手改坏的配置在重建时按同样的位置失败。
pub struct Split {
    name: String,
    batch_input_shape: Option<Shape>,
}

impl Split {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            batch_input_shape: None,
        }
    }

    pub fn with_input_shape(mut self, feature_dims: &[usize]) -> Self {
        self.batch_input_shape = Some(Shape::with_batch(feature_dims));
        self
    }

    pub fn from_config(config: &Value) -> Result<Self, GraphError> {
        let mut layer = Self::new();
        if let Some(name) = config.get("name").and_then(Value::as_str) {
            layer.name = name.to_string();
        }
        if let Some(shape) = config.get("batch_input_shape").filter(|v| !v.is_null()) {
            layer.batch_input_shape = Some(serde_json::from_value(shape.clone())?);
        }
        Ok(layer)
    }
}

impl Layer for Split {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn class_name(&self) -> &'static str {
        "Split"
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
        Ok(vec![input_specs[0].clone(), input_specs[0].clone()])
    }

    fn call(
        &self,
        inputs: &[TensorData],
        _arguments: &CallArgs,
    ) -> Result<Vec<TensorData>, GraphError> {
        Ok(vec![inputs[0].clone(), inputs[0].clone()])
    }

    fn compute_mask(&self, _input_masks: &[Option<Mask>]) -> Vec<Option<Mask>> {
        vec![None, None]
    }

    fn get_config(&self) -> Value {
        json!({
            "name": self.name,
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

/// Split 的注册表构造函数（供 CustomObjects 使用）
pub fn split_ctor(config: &Value) -> Result<Box<dyn Layer>, GraphError> {
    Ok(Box::new(Split::from_config(config)?))
}

/// 搭一个 [4 -> 8(relu) -> 2] 的小 MLP（带种子，权重可重复）
pub fn small_mlp(seed: u64) -> Sequential {
    let mut model = Sequential::new_with_seed(None, seed);
    model
        .add(Box::new(
            Dense::new(8)
                .with_activation("relu")
                .expect("激活名应合法")
                .with_input_shape(&[4]),
        ))
        .expect("添加首层失败");
    model
        .add(Box::new(Dense::new(2)))
        .expect("添加第二层失败");
    model
}

/// 一批 [3, 4] 的输入数据
pub fn batch_3x4() -> TensorData {
    ndarray::Array::from_shape_vec(
        ndarray::IxDyn(&[3, 4]),
        (0..12).map(|i| i as f32 * 0.25).collect(),
    )
    .expect("构造测试数据失败")
}
