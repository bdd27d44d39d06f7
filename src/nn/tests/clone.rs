/*
 * @Author       : 老董
 * @Date         : 2026-03-03
 * @Description  : 克隆引擎测试：函数式/Sequential 两条路径与全部注入规则
 */

use super::common::{batch_3x4, small_mlp};
use crate::nn::{
    AnyModel, CloneInput, DType, Dense, Graph, GraphError, Model, ModelRef, Shape,
    clone_functional_model, clone_model, clone_sequential_model,
};

/// 搭一个带共享层的函数式模型：x -> shared -> shared -> out
///
/// shared 被调用两次（两个节点），克隆时必须只克隆一次并复用。
fn shared_layer_model() -> Model {
    let graph = Graph::new_with_seed(31);
    let x = graph
        .input(&Shape::with_batch(&[4]), DType::F32, Some("x"))
        .expect("合成输入失败");
    let shared = graph
        .add_layer(Box::new(Dense::new(4).with_name("shared")))
        .expect("登记 shared 失败");
    let out_layer = graph
        .add_layer(Box::new(Dense::new(2).with_name("out")))
        .expect("登记 out 失败");
    let h1 = graph.call_layer(shared, &[x], None).expect("调用失败")[0];
    let h2 = graph.call_layer(shared, &[h1], None).expect("调用失败")[0];
    let y = graph.call_layer(out_layer, &[h2], None).expect("调用失败")[0];
    Model::new(graph, vec![x], vec![y], Some("shared_model")).expect("建模失败")
}

/// 函数式克隆：结构同构、层身份全新、形状一致、权重不同
#[test]
fn test_functional_clone_structure() {
    let source = shared_layer_model();
    let cloned = clone_functional_model(&source, None).expect("克隆失败");

    assert_eq!(cloned.layer_count(), source.layer_count());
    assert_eq!(
        cloned.nodes_by_depth().len(),
        source.nodes_by_depth().len()
    );
    assert_eq!(cloned.node_count(), source.node_count());
    // 不同 arena，层身份必然全新；名字逐一对应
    assert!(!cloned.graph().ptr_eq(source.graph()));
    let src_names: Vec<String> = source
        .layer_ids()
        .iter()
        .map(|&id| source.graph().layer_name(id).unwrap())
        .collect();
    let cloned_names: Vec<String> = cloned
        .layer_ids()
        .iter()
        .map(|&id| cloned.graph().layer_name(id).unwrap())
        .collect();
    assert_eq!(src_names, cloned_names);

    // 共享层只克隆一次：克隆里它照样挂两个节点
    let shared_id = cloned.get_layer(Some("shared"), None).expect("找共享层失败");
    assert_eq!(
        cloned
            .graph()
            .inner()
            .layer(shared_id)
            .unwrap()
            .inbound_nodes
            .len(),
        2
    );

    // 同输入：形状一致、数值不同（全新权重）
    let x = batch_3x4();
    let ys = source.predict(&[x.clone()]).expect("源预测失败");
    let yc = cloned.predict(&[x]).expect("克隆预测失败");
    assert_eq!(ys[0].shape(), yc[0].shape());
    let differs = ys[0]
        .iter()
        .zip(yc[0].iter())
        .any(|(a, b)| (a - b).abs() > 1e-6);
    assert!(differs, "克隆应使用全新初始化的权重");
}

/// 克隆不触碰源模型
#[test]
fn test_clone_leaves_source_untouched() {
    let source = shared_layer_model();
    let weights_before = source.get_weights();
    let nodes_before = source.node_count();
    let _ = clone_functional_model(&source, None).expect("克隆失败");
    let weights_after = source.get_weights();
    assert_eq!(source.node_count(), nodes_before);
    assert_eq!(weights_before.len(), weights_after.len());
    for (a, b) in weights_before.iter().zip(&weights_after) {
        assert_eq!(a, b);
    }
}

/// 函数式克隆 + 替换张量：数量必须对上
#[test]
fn test_functional_clone_replacement_count() {
    let source = shared_layer_model();
    let workspace = Graph::new();
    let result = clone_functional_model(&source, Some((workspace, vec![])));
    assert!(matches!(
        result,
        Err(GraphError::TensorCountMismatch {
            expected: 1,
            got: 0
        })
    ));
}

/// 函数式克隆 + 原始数组注入：自动包装输入层
#[test]
fn test_functional_clone_with_raw_value() {
    let source = shared_layer_model();
    let workspace = Graph::new();
    let cloned = clone_functional_model(
        &source,
        Some((workspace, vec![CloneInput::Value(batch_3x4())])),
    )
    .expect("克隆失败");
    // 包装输入层按约定命名
    let input_layer_name = {
        let inner = cloned.graph().inner();
        let origin = inner.tensor(cloned.inputs()[0]).unwrap().origin;
        inner.layer_name(origin.layer).unwrap().to_string()
    };
    assert!(input_layer_name.starts_with("input_wrapper_for_"));
    let y = cloned.predict(&[batch_3x4()]).expect("预测失败");
    assert_eq!(y[0].shape(), &[3, 2]);
}

/// Sequential 克隆（无注入）：层数一致、配置一致、权重全新
#[test]
fn test_sequential_clone_plain() {
    let source = small_mlp(41);
    let mut cloned = clone_sequential_model(&source, None).expect("克隆失败");
    assert_eq!(cloned.layer_count(), source.layer_count());
    assert_eq!(cloned.get_config(), source.get_config());
    let y = cloned.predict(&batch_3x4()).expect("预测失败");
    assert_eq!(y.shape(), &[3, 2]);

    let differs = source
        .get_weights()
        .iter()
        .zip(cloned.get_weights().iter())
        .any(|(a, b)| a.iter().zip(b.iter()).any(|(p, q)| (p - q).abs() > 1e-6));
    assert!(differs, "克隆应使用全新初始化的权重");
}

/// Sequential 克隆 + 占位输入张量注入：输入层接到栈首
#[test]
fn test_sequential_clone_with_input_tensor() {
    let source = small_mlp(43);
    let workspace = Graph::new();
    let t = workspace
        .input(&Shape::with_batch(&[4]), DType::F32, Some("entry"))
        .expect("合成输入失败");
    let mut cloned =
        clone_sequential_model(&source, Some((workspace, vec![CloneInput::Tensor(t)])))
            .expect("克隆失败");
    // 注入的输入层计入层序列
    assert_eq!(cloned.layer_count(), source.layer_count() + 1);
    assert_eq!(cloned.inputs().len(), 1);
    assert_eq!(cloned.inputs()[0], t);
    let y = cloned.predict(&batch_3x4()).expect("预测失败");
    assert_eq!(y.shape(), &[3, 2]);
}

/// Sequential 克隆注入非输入层来源的张量：拒绝
#[test]
fn test_sequential_clone_rejects_non_input_origin() {
    let source = small_mlp(47);
    let workspace = Graph::new();
    let x = workspace
        .input(&Shape::with_batch(&[4]), DType::F32, None)
        .expect("合成输入失败");
    let dense = workspace
        .add_layer(Box::new(Dense::new(4)))
        .expect("登记层失败");
    let h = workspace.call_layer(dense, &[x], None).expect("调用失败")[0];
    let result =
        clone_sequential_model(&source, Some((workspace, vec![CloneInput::Tensor(h)])));
    assert!(matches!(result, Err(GraphError::UnsupportedOrigin(_))));
}

/// Sequential 克隆注入超过一个张量：拒绝
#[test]
fn test_sequential_clone_rejects_multiple_tensors() {
    let source = small_mlp(53);
    let workspace = Graph::new();
    let t1 = workspace
        .input(&Shape::with_batch(&[4]), DType::F32, None)
        .expect("合成输入失败");
    let t2 = workspace
        .input(&Shape::with_batch(&[4]), DType::F32, None)
        .expect("合成输入失败");
    let result = clone_sequential_model(
        &source,
        Some((workspace, vec![CloneInput::Tensor(t1), CloneInput::Tensor(t2)])),
    );
    assert!(matches!(
        result,
        Err(GraphError::TensorCountMismatch {
            expected: 1,
            got: 2
        })
    ));
}

/// clone_model 按动态种类分派，产物种类与输入一致
#[test]
fn test_clone_model_dispatch() {
    let sequential = small_mlp(59);
    match clone_model(ModelRef::Sequential(&sequential), None).expect("克隆失败") {
        AnyModel::Sequential(_) => {}
        AnyModel::Functional(_) => panic!("Sequential 克隆产物种类不对"),
    }
    let functional = shared_layer_model();
    match clone_model(ModelRef::Functional(&functional), None).expect("克隆失败") {
        AnyModel::Functional(_) => {}
        AnyModel::Sequential(_) => panic!("函数式克隆产物种类不对"),
    }
}
