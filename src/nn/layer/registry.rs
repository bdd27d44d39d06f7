/*
 * @Author       : 老董
 * @Date         : 2026-02-14
 * @Description  : 类名注册表：字符串标签 -> 构造函数，支持调用方自定义对象合并
 *
 * 多态重建的约定：未知标签一律报错，绝不静默退化成某个默认实现。
 */

use super::{Activation, Dense, InputLayer, Layer};
use crate::nn::error::GraphError;
use crate::nn::model::Sequential;
use crate::nn::optimizer::OptimizerCtor;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// 层构造函数：从配置值重建层实例
pub type LayerCtor = fn(&Value) -> Result<Box<dyn Layer>, GraphError>;

/// 调用方自定义对象表，反序列化时与内置注册表合并（自定义优先）
#[derive(Default)]
pub struct CustomObjects {
    pub layers: HashMap<String, LayerCtor>,
    pub optimizers: HashMap<String, OptimizerCtor>,
    /// 自定义损失/指标名（只登记名字，数值求值属于执行后端）
    pub functions: HashSet<String>,
}

impl CustomObjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, class_name: &str, ctor: LayerCtor) -> Self {
        self.layers.insert(class_name.to_string(), ctor);
        self
    }

    pub fn with_optimizer(mut self, class_name: &str, ctor: OptimizerCtor) -> Self {
        self.optimizers.insert(class_name.to_string(), ctor);
        self
    }

    pub fn with_function(mut self, name: &str) -> Self {
        self.functions.insert(name.to_string());
        self
    }
}

fn builtin_layer_ctor(class_name: &str) -> Option<LayerCtor> {
    match class_name {
        "InputLayer" => Some(|config| Ok(Box::new(InputLayer::from_config(config)?) as _)),
        "Dense" => Some(|config| Ok(Box::new(Dense::from_config(config)?) as _)),
        "Activation" => Some(|config| Ok(Box::new(Activation::from_config(config)?) as _)),
        _ => None,
    }
}

/// 从 `{class_name, config}` 记录重建层
///
/// 解析顺序：自定义表 > 内置表；Sequential 单独分派（需要把
/// 自定义表继续传给它的子层）。
pub fn deserialize_layer(
    record: &Value,
    custom_objects: Option<&CustomObjects>,
) -> Result<Box<dyn Layer>, GraphError> {
    let class_name = record
        .get("class_name")
        .and_then(Value::as_str)
        .ok_or_else(|| GraphError::InvalidConfig("层记录缺少 class_name".into()))?;
    let config = record
        .get("config")
        .ok_or_else(|| GraphError::InvalidConfig(format!("层记录`{class_name}`缺少 config")))?;

    if let Some(ctor) = custom_objects.and_then(|c| c.layers.get(class_name).copied()) {
        return ctor(config);
    }
    if class_name == "Sequential" {
        return Ok(Box::new(Sequential::from_config(config, custom_objects)?));
    }
    match builtin_layer_ctor(class_name) {
        Some(ctor) => ctor(config),
        None => Err(GraphError::UnknownIdentifier(format!(
            "未知的层类名：{class_name}"
        ))),
    }
}
