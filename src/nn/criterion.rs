/*
 * @Author       : 老董
 * @Date         : 2026-02-16
 * @Description  : 损失/指标名称表、数值求值与自定义名称解析
 */

use crate::nn::error::GraphError;
use crate::nn::layer::CustomObjects;
use crate::nn::types::TensorData;
use serde_json::Value;

/// 损失/指标的数值求值函数（预测, 目标）-> 标量
pub(crate) type CriterionFn = fn(&TensorData, &TensorData) -> f32;

fn mean_squared_error(pred: &TensorData, target: &TensorData) -> f32 {
    let diff = pred - target;
    diff.mapv(|v| v * v).mean().unwrap_or(0.0)
}

fn mean_absolute_error(pred: &TensorData, target: &TensorData) -> f32 {
    (pred - target).mapv(f32::abs).mean().unwrap_or(0.0)
}

fn binary_crossentropy(pred: &TensorData, target: &TensorData) -> f32 {
    let eps = 1e-7;
    let mut sum = 0.0;
    let mut count = 0usize;
    for (&p, &t) in pred.iter().zip(target.iter()) {
        let p = p.clamp(eps, 1.0 - eps);
        sum -= t * p.ln() + (1.0 - t) * (1.0 - p).ln();
        count += 1;
    }
    if count == 0 { 0.0 } else { sum / count as f32 }
}

fn categorical_crossentropy(pred: &TensorData, target: &TensorData) -> f32 {
    let eps = 1e-7;
    let batch = pred.shape().first().copied().unwrap_or(1).max(1);
    let mut sum = 0.0;
    for (&p, &t) in pred.iter().zip(target.iter()) {
        if t > 0.0 {
            sum -= t * p.clamp(eps, 1.0).ln();
        }
    }
    sum / batch as f32
}

/// 分类准确率：按最后一维 argmax 比对
fn accuracy(pred: &TensorData, target: &TensorData) -> f32 {
    let last_dim = pred.shape().last().copied().unwrap_or(1);
    if last_dim <= 1 {
        // 二分类阈值 0.5
        let hits = pred
            .iter()
            .zip(target.iter())
            .filter(|&(&p, &t)| (p > 0.5) == (t > 0.5))
            .count();
        let total = pred.len().max(1);
        return hits as f32 / total as f32;
    }
    let rows = pred.len() / last_dim;
    let argmax = |data: &TensorData, row: usize| {
        let slice: Vec<f32> = data.iter().skip(row * last_dim).take(last_dim).copied().collect();
        slice
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map_or(0, |(i, _)| i)
    };
    let hits = (0..rows)
        .filter(|&r| argmax(pred, r) == argmax(target, r))
        .count();
    hits as f32 / rows.max(1) as f32
}

pub(crate) fn lookup_loss(name: &str) -> Option<CriterionFn> {
    match name {
        "mean_squared_error" | "mse" => Some(mean_squared_error),
        "mean_absolute_error" | "mae" => Some(mean_absolute_error),
        "binary_crossentropy" => Some(binary_crossentropy),
        "categorical_crossentropy" => Some(categorical_crossentropy),
        _ => None,
    }
}

pub(crate) fn lookup_metric(name: &str) -> Option<CriterionFn> {
    match name {
        "accuracy" | "acc" => Some(accuracy),
        _ => lookup_loss(name),
    }
}

fn is_known_name(name: &str, custom_objects: Option<&CustomObjects>) -> bool {
    lookup_metric(name).is_some()
        || custom_objects.is_some_and(|c| c.functions.contains(name))
}

/// 递归解析损失/指标描述里的名称（穿过列表与映射）
///
/// 字符串必须是内置名或 custom_objects 登记过的名字，否则报错；
/// null 与数值原样保留。
pub fn resolve_custom_objects(
    value: &Value,
    custom_objects: Option<&CustomObjects>,
) -> Result<Value, GraphError> {
    match value {
        Value::String(name) => {
            if is_known_name(name, custom_objects) {
                Ok(value.clone())
            } else {
                Err(GraphError::UnknownIdentifier(format!(
                    "未知的损失/指标名：{name}"
                )))
            }
        }
        Value::Array(items) => {
            let resolved: Result<Vec<Value>, GraphError> = items
                .iter()
                .map(|item| resolve_custom_objects(item, custom_objects))
                .collect();
            Ok(Value::Array(resolved?))
        }
        Value::Object(map) => {
            let mut resolved = serde_json::Map::new();
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_custom_objects(item, custom_objects)?);
            }
            Ok(Value::Object(resolved))
        }
        _ => Ok(value.clone()),
    }
}

/// 取损失描述里的单个名称求值（评估入口用）
pub(crate) fn evaluate_loss(
    spec: &Value,
    pred: &TensorData,
    target: &TensorData,
) -> Result<f32, GraphError> {
    let name = spec.as_str().ok_or_else(|| {
        GraphError::InvalidConfig("损失描述必须是单个名称（多输出模型不在本 crate 范围内）".into())
    })?;
    let f = lookup_loss(name)
        .ok_or_else(|| GraphError::UnknownIdentifier(format!("损失`{name}`没有内置数值实现")))?;
    Ok(f(pred, target))
}
