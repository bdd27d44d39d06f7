/*
 * @Author       : 老董
 * @Date         : 2026-03-05
 * @Description  : 层注册表测试：内置/自定义解析与未知类名
 */

use super::common::split_ctor;
use crate::nn::{CustomObjects, GraphError, deserialize_layer};
use serde_json::json;

/// 内置层按类名重建
#[test]
fn test_builtin_layer_deserialize() {
    let record = json!({
        "class_name": "Dense",
        "config": { "name": "fc", "units": 16 },
    });
    let layer = deserialize_layer(&record, None).expect("重建失败");
    assert_eq!(layer.class_name(), "Dense");
    assert_eq!(layer.name(), "fc");
}

/// 未知类名：报错而非静默默认
#[test]
fn test_unknown_class_name_rejected() {
    let record = json!({ "class_name": "Mystery", "config": {} });
    assert!(matches!(
        deserialize_layer(&record, None),
        Err(GraphError::UnknownIdentifier(_))
    ));
}

/// 自定义表在调用时合并，且优先于内置
#[test]
fn test_custom_objects_merge() {
    let custom = CustomObjects::new().with_layer("Split", split_ctor);
    let record = json!({
        "class_name": "Split",
        "config": { "name": "twin", "batch_input_shape": null },
    });
    let layer = deserialize_layer(&record, Some(&custom)).expect("重建失败");
    assert_eq!(layer.class_name(), "Split");
    assert_eq!(layer.name(), "twin");
    // 没有自定义表时同一记录必须失败
    assert!(deserialize_layer(&record, None).is_err());
}

/// 缺字段的记录
#[test]
fn test_malformed_record_rejected() {
    assert!(matches!(
        deserialize_layer(&json!({ "config": {} }), None),
        Err(GraphError::InvalidConfig(_))
    ));
    assert!(matches!(
        deserialize_layer(&json!({ "class_name": "Dense" }), None),
        Err(GraphError::InvalidConfig(_))
    ));
}

/// 嵌套 Sequential 记录经注册表分派（自定义表继续下传）
#[test]
fn test_nested_sequential_record() {
    let record = json!({
        "class_name": "Sequential",
        "config": [
            { "class_name": "Dense", "config": { "name": "d1", "units": 4,
                "batch_input_shape": [null, 2] } },
        ],
    });
    let layer = deserialize_layer(&record, None).expect("重建失败");
    assert_eq!(layer.class_name(), "Sequential");
    assert!(layer.is_model_container());
}
