/*
 * @Author       : 老董
 * @Date         : 2026-03-05
 * @Description  : 损失/指标名称解析测试
 */

use crate::nn::{CustomObjects, GraphError, resolve_custom_objects};
use serde_json::json;

/// 内置名原样通过，穿透列表与映射
#[test]
fn test_builtin_names_resolve() {
    let spec = json!({
        "main": "mean_squared_error",
        "aux": ["mae", "accuracy"],
    });
    let resolved = resolve_custom_objects(&spec, None).expect("解析失败");
    assert_eq!(resolved, spec);
}

/// 未知名报错
#[test]
fn test_unknown_name_rejected() {
    let spec = json!(["mse", "mystery_loss"]);
    assert!(matches!(
        resolve_custom_objects(&spec, None),
        Err(GraphError::UnknownIdentifier(_))
    ));
}

/// 登记过的自定义名放行
#[test]
fn test_custom_function_name_allowed() {
    let custom = CustomObjects::new().with_function("mystery_loss");
    let spec = json!(["mse", "mystery_loss"]);
    let resolved = resolve_custom_objects(&spec, Some(&custom)).expect("解析失败");
    assert_eq!(resolved, spec);
}

/// null 与数值原样保留
#[test]
fn test_non_string_values_pass_through() {
    let spec = json!({ "loss_weights": [0.5, 1.0], "mode": null });
    let resolved = resolve_custom_objects(&spec, None).expect("解析失败");
    assert_eq!(resolved, spec);
}
