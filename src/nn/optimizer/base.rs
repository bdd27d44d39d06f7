/*
 * @Author       : 老董
 * @Date         : 2026-02-15
 * @Description  : Optimizer 契约与类名注册表
 *
 * 优化器在本 crate 里只承担"可存档的训练状态"角色：
 * 配置可导出/重建，槽变量在训练函数构建时按参数清单创建，
 * 状态张量具名有序、可整体导出与恢复。梯度与参数更新的数值
 * 实现属于执行后端。
 */

use super::{Adam, SGD};
use crate::nn::error::GraphError;
use crate::nn::layer::CustomObjects;
use crate::nn::types::TensorData;
use serde_json::Value;

pub trait Optimizer {
    fn class_name(&self) -> &'static str;

    /// 导出配置（与注册表里的构造函数对偶）
    fn get_config(&self) -> Value;

    /// 为可训练参数创建槽变量；参数以（名称, 形状）清单给出
    fn build(&mut self, params: &[(String, Vec<usize>)]) -> Result<(), GraphError>;

    /// 导出全部状态张量（首个为 iterations 标量），名称有序
    fn weights(&self) -> Vec<(String, TensorData)>;

    /// 按保存顺序恢复状态张量；数量或形状不匹配返回错误
    fn set_weights(&mut self, values: &[(String, TensorData)]) -> Result<(), GraphError>;

    /// 记一步（iterations += 1）
    fn step(&mut self);

    fn iterations(&self) -> u64;

    /// 是否为外部委托包装（状态不可内省，存档时跳过）
    fn is_external(&self) -> bool {
        false
    }
}

/// 优化器构造函数：从配置值重建实例
pub type OptimizerCtor = fn(&Value) -> Result<Box<dyn Optimizer>, GraphError>;

fn builtin_optimizer_ctor(class_name: &str) -> Option<OptimizerCtor> {
    match class_name {
        "SGD" => Some(|config| Ok(Box::new(SGD::from_config(config)?) as _)),
        "Adam" => Some(|config| Ok(Box::new(Adam::from_config(config)?) as _)),
        _ => None,
    }
}

/// 从 `{class_name, config}` 记录重建优化器（自定义表优先）
pub fn deserialize_optimizer(
    record: &Value,
    custom_objects: Option<&CustomObjects>,
) -> Result<Box<dyn Optimizer>, GraphError> {
    let class_name = record
        .get("class_name")
        .and_then(Value::as_str)
        .ok_or_else(|| GraphError::InvalidConfig("优化器记录缺少 class_name".into()))?;
    let config = record
        .get("config")
        .ok_or_else(|| GraphError::InvalidConfig(format!("优化器记录`{class_name}`缺少 config")))?;

    if let Some(ctor) = custom_objects.and_then(|c| c.optimizers.get(class_name).copied()) {
        return ctor(config);
    }
    match builtin_optimizer_ctor(class_name) {
        Some(ctor) => ctor(config),
        None => Err(GraphError::UnknownIdentifier(format!(
            "未知的优化器类名：{class_name}"
        ))),
    }
}

// ========== 状态张量的公共工具 ==========

/// iterations 标量张量
pub(super) fn iterations_tensor(iterations: u64) -> TensorData {
    ndarray::arr0(iterations as f32).into_dyn()
}

/// 校验并恢复一组具名槽变量（首个值为 iterations 标量）
pub(super) fn restore_slots(
    class_name: &str,
    iterations: &mut u64,
    slots: &mut [(String, TensorData)],
    values: &[(String, TensorData)],
) -> Result<(), GraphError> {
    let expected = 1 + slots.len();
    if values.len() != expected {
        return Err(GraphError::TensorCountMismatch {
            expected,
            got: values.len(),
        });
    }
    let iter_value = &values[0].1;
    if iter_value.ndim() != 0 {
        return Err(GraphError::ShapeMismatch {
            expected: "[]".to_string(),
            got: iter_value.shape().to_vec(),
            message: format!("{class_name} 的 iterations 标量"),
        });
    }
    for ((_, slot), (_, value)) in slots.iter().zip(&values[1..]) {
        if slot.shape() != value.shape() {
            return Err(GraphError::ShapeMismatch {
                expected: format!("{:?}", slot.shape()),
                got: value.shape().to_vec(),
                message: format!("{class_name} 的槽变量"),
            });
        }
    }
    *iterations = iter_value.iter().next().copied().unwrap_or(0.0) as u64;
    for ((_, slot), (_, value)) in slots.iter_mut().zip(&values[1..]) {
        *slot = value.clone();
    }
    Ok(())
}
