/*
 * @Author       : 老董
 * @Date         : 2026-03-02
 * @Description  : Sequential 容器测试：add/pop/build、单输出规则、嵌套推断、配置往返
 */

use super::common::{Split, batch_3x4, small_mlp, split_ctor};
use crate::nn::{
    Activation, CustomObjects, Dense, GraphError, InputLayer, Sequential, Shape, TensorSpec,
};
use serde_json::Value;

/// 首层未声明输入形状时拒绝
#[test]
fn test_first_layer_requires_input_shape() {
    let mut model = Sequential::new(None);
    let result = model.add(Box::new(Dense::new(4)));
    assert!(matches!(result, Err(GraphError::InvalidConfig(_))));
    // 失败的 add 不留任何可见状态
    assert_eq!(model.layer_count(), 0);
    assert!(model.outputs().is_empty());
    assert!(model.container_node().is_none());
}

/// 首层带形状：自动合成 `{层名}_input` 占位输入
#[test]
fn test_first_layer_synthesizes_input() {
    let mut model = Sequential::new(None);
    model
        .add(Box::new(Dense::new(8).with_input_shape(&[4])))
        .expect("添加首层失败");
    assert_eq!(model.layer_count(), 1);
    assert_eq!(model.inputs().len(), 1);
    assert_eq!(model.outputs().len(), 1);

    let graph = model.graph();
    let input = model.inputs()[0];
    assert!(graph.tensor_from_input_layer(input).unwrap());
    let spec = graph.tensor_spec(input).unwrap();
    assert_eq!(spec.shape, Shape::with_batch(&[4]));

    // 容器合成节点随 add 更新
    let node = model.container_node().expect("应有顶层合成节点");
    assert_eq!(node.input_tensors, model.inputs());
    assert_eq!(node.output_tensors, model.outputs());
    assert_eq!(node.output_shapes[0], Shape::with_batch(&[8]));
}

/// 显式 InputLayer 作首层
#[test]
fn test_explicit_input_layer_first() {
    let mut model = Sequential::new(None);
    model
        .add(Box::new(InputLayer::new(
            TensorSpec::dense(Shape::with_batch(&[4]), Default::default()),
            Some("entry"),
        )))
        .expect("添加输入层失败");
    model.add(Box::new(Dense::new(2))).expect("添加 Dense 失败");
    assert_eq!(model.layer_count(), 2);
    assert_eq!(
        model.graph().tensor_spec(model.outputs()[0]).unwrap().shape,
        Shape::with_batch(&[2])
    );
}

/// 多输出层在任何位置都被拒绝，且不留状态
#[test]
fn test_multi_output_layer_rejected() {
    // 作为首层
    let mut model = Sequential::new(None);
    let result = model.add(Box::new(Split::new().with_input_shape(&[4])));
    assert!(matches!(result, Err(GraphError::MultiOutputLayer)));
    assert_eq!(model.layer_count(), 0);
    assert!(model.outputs().is_empty());

    // 作为后续层
    let mut model = small_mlp(7);
    let outputs_before = model.outputs().to_vec();
    let result = model.add(Box::new(Split::new()));
    assert!(matches!(result, Err(GraphError::MultiOutputLayer)));
    assert_eq!(model.layer_count(), 2);
    assert_eq!(model.outputs(), outputs_before);
}

/// add 后 pop：可见状态精确还原
#[test]
fn test_add_then_pop_roundtrip() {
    let mut model = small_mlp(3);
    let outputs_before = model.outputs().to_vec();
    let node_outputs_before = model.container_node().unwrap().output_tensors.clone();
    let node_shapes_before = model.container_node().unwrap().output_shapes.clone();

    model.add(Box::new(Dense::new(5))).expect("添加第三层失败");
    assert_ne!(model.outputs(), outputs_before);
    model.pop().expect("弹出失败");

    assert_eq!(model.layer_count(), 2);
    assert_eq!(model.outputs(), outputs_before);
    let node = model.container_node().unwrap();
    assert_eq!(node.output_tensors, node_outputs_before);
    assert_eq!(node.output_shapes, node_shapes_before);
}

/// 弹空后再弹报错；弹空清掉全部图状态
#[test]
fn test_pop_until_empty() {
    let mut model = Sequential::new(None);
    model
        .add(Box::new(Dense::new(8).with_input_shape(&[4])))
        .expect("添加首层失败");
    model.pop().expect("弹出失败");
    assert!(model.is_empty());
    assert!(model.inputs().is_empty());
    assert!(model.outputs().is_empty());
    assert!(model.container_node().is_none());
    assert!(matches!(model.pop(), Err(GraphError::EmptyModel)));
}

/// 空模型无法构建
#[test]
fn test_build_empty_rejected() {
    let mut model = Sequential::new(None);
    assert!(matches!(model.build(), Err(GraphError::InvalidConfig(_))));
}

/// 构建幂等；add 使其失效并在下次依赖构建的操作时重建
#[test]
fn test_build_idempotent_and_lazy_invalidation() {
    let mut model = small_mlp(11);
    assert!(!model.built());
    model.build().expect("构建失败");
    assert!(model.built());
    model.build().expect("重复构建应为 no-op");

    model.add(Box::new(Dense::new(3))).expect("添加失败");
    assert!(!model.built(), "add 之后构建缓存应失效");
    // 依赖构建的操作触发重建
    let y = model.predict(&batch_3x4()).expect("预测失败");
    assert!(model.built());
    assert_eq!(y.shape(), &[3, 3]);
}

/// n 层链：n 个用户层节点 + 合成输入节点，共 n+1 个深度桶；
/// 输出张量沿链精确回溯 L3 -> L2 -> L1 -> 输入
#[test]
fn test_depth_buckets_and_traceback() {
    let mut model = Sequential::new(None);
    model
        .add(Box::new(Dense::new(8).with_input_shape(&[4]).with_name("l1")))
        .expect("添加 l1 失败");
    model
        .add(Box::new(Dense::new(6).with_name("l2")))
        .expect("添加 l2 失败");
    model
        .add(Box::new(Dense::new(2).with_name("l3")))
        .expect("添加 l3 失败");
    model.build().expect("构建失败");

    let inner_model = model.inner_model().expect("构建后应有内部模型");
    assert_eq!(inner_model.nodes_by_depth().len(), 4);
    assert_eq!(inner_model.node_count(), 4);
    for keys in inner_model.nodes_by_depth().values() {
        assert_eq!(keys.len(), 1, "单链模型每个深度恰一个节点");
    }

    // 回溯：输出 -> l3 -> l2 -> l1 -> 占位输入
    let graph = model.graph();
    let inner = graph.inner();
    let mut names = Vec::new();
    let mut tensor = model.outputs()[0];
    loop {
        let origin = inner.tensor(tensor).unwrap().origin;
        names.push(inner.layer_name(origin.layer).unwrap().to_string());
        let node = inner.node(origin.layer, origin.node_index).unwrap();
        match node.input_tensors.first() {
            Some(&prev) => tensor = prev,
            None => break,
        }
    }
    assert_eq!(names, vec!["l3", "l2", "l1", "l1_input"]);
}

/// 嵌套 Sequential 作首层：逐层拆开推断批形状
#[test]
fn test_nested_sequential_shape_inference() {
    let inner = small_mlp(5); // 首层声明了 [None, 4]
    let mut outer = Sequential::new(None);
    outer.add(Box::new(inner)).expect("添加嵌套模型失败");
    outer.add(Box::new(Dense::new(3))).expect("添加外层失败");

    let spec = outer
        .graph()
        .tensor_spec(outer.inputs()[0])
        .expect("读输入规格失败");
    assert_eq!(spec.shape, Shape::with_batch(&[4]));

    let y = outer.predict(&batch_3x4()).expect("嵌套预测失败");
    assert_eq!(y.shape(), &[3, 3]);
}

/// 空的嵌套模型不能作首层
#[test]
fn test_empty_nested_model_rejected() {
    let mut outer = Sequential::new(None);
    let result = outer.add(Box::new(Sequential::new(None)));
    assert!(matches!(result, Err(GraphError::InvalidConfig(_))));
}

/// get_config/from_config 往返：类名与层序一致，权重全新
#[test]
fn test_config_roundtrip() {
    let mut model = Sequential::new(None);
    model
        .add(Box::new(Dense::new(8).with_input_shape(&[4])))
        .expect("添加失败");
    model
        .add(Box::new(Activation::new("relu").expect("激活名应合法")))
        .expect("添加失败");
    model.add(Box::new(Dense::new(2))).expect("添加失败");

    let config = model.get_config();
    let class_names: Vec<&str> = config
        .as_array()
        .unwrap()
        .iter()
        .map(|rec| rec.get("class_name").and_then(Value::as_str).unwrap())
        .collect();
    assert_eq!(class_names, vec!["Dense", "Activation", "Dense"]);

    let mut rebuilt = Sequential::from_config(&config, None).expect("重建失败");
    assert_eq!(rebuilt.layer_count(), 3);
    assert_eq!(rebuilt.get_config(), config);
    let y = rebuilt.predict(&batch_3x4()).expect("重建模型预测失败");
    assert_eq!(y.shape(), &[3, 2]);
}

/// 手改配置塞进多输出层：重建在同样的校验点失败
#[test]
fn test_from_config_rejects_multi_output() {
    let model = small_mlp(9);
    let mut records = model.get_config().as_array().unwrap().clone();
    records.push(serde_json::json!({
        "class_name": "Split",
        "config": { "name": "bad", "batch_input_shape": null },
    }));
    let custom = CustomObjects::new().with_layer("Split", split_ctor);
    let result = Sequential::from_config(&Value::Array(records), Some(&custom));
    assert!(matches!(result, Err(GraphError::MultiOutputLayer)));
}

/// 未编译就训练/评估：一律 NotCompiled
#[test]
fn test_training_requires_compile() {
    let mut model = small_mlp(13);
    let x = batch_3x4();
    let y = ndarray::ArrayD::zeros(ndarray::IxDyn(&[3, 2]));
    assert!(matches!(
        model.fit(&x, &y, 1),
        Err(GraphError::NotCompiled)
    ));
    assert!(matches!(
        model.evaluate(&x, &y),
        Err(GraphError::NotCompiled)
    ));
    assert!(matches!(
        model.train_on_batch(&x, &y),
        Err(GraphError::NotCompiled)
    ));
    // predict 不要求编译
    model.predict(&x).expect("predict 不应要求编译");
}

/// compile 后训练入口可用，优化器记账推进
#[test]
fn test_compile_then_train() {
    use crate::nn::SGD;
    let mut model = small_mlp(17);
    model
        .compile(
            Box::new(SGD::new(0.01)),
            serde_json::json!("mean_squared_error"),
            serde_json::json!(["accuracy"]),
        )
        .expect("编译失败");
    let x = batch_3x4();
    let y = ndarray::ArrayD::zeros(ndarray::IxDyn(&[3, 2]));
    let history = model.fit(&x, &y, 3).expect("训练失败");
    assert_eq!(history.len(), 3);
    let state = model.training_state().expect("编译后应有训练状态");
    assert_eq!(state.optimizer.iterations(), 3);
    let loss = model.evaluate(&x, &y).expect("评估失败");
    assert!(loss.is_finite());
}

/// 带种子的两个同构模型权重一致（确定性初始化）
#[test]
fn test_seeded_init_is_deterministic() {
    use approx::assert_abs_diff_eq;
    let a = small_mlp(42);
    let b = small_mlp(42);
    let wa = a.get_weights();
    let wb = b.get_weights();
    assert_eq!(wa.len(), wb.len());
    for (x, y) in wa.iter().zip(&wb) {
        assert_eq!(x.shape(), y.shape());
        for (&p, &q) in x.iter().zip(y.iter()) {
            assert_abs_diff_eq!(p, q, epsilon = 1e-9);
        }
    }
}

/// get_layer：按序号/名字检索，先强制构建
#[test]
fn test_get_layer() {
    let mut model = small_mlp(23);
    let first = model.get_layer(None, Some(0)).expect("按序号检索失败");
    // 拓扑序首位是合成输入层
    assert!(
        model
            .graph()
            .inner()
            .layer(first)
            .unwrap()
            .layer
            .is_input_layer()
    );
    let by_name = {
        let name = model.graph().layer_name(model.layer_ids()[0]).unwrap();
        model.get_layer(Some(&name), None).expect("按名字检索失败")
    };
    assert_eq!(by_name, model.layer_ids()[0]);
}
