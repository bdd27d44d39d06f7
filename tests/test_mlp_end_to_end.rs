/*
 * @Author       : 老董
 * @Date         : 2026-03-06
 * @Description  : 端到端：搭 MLP -> 编译 -> 训练记账 -> 存档往返 -> 克隆
 */

use only_keras::nn::{
    AnyModel, CloneInput, Dense, Graph, GraphError, ModelRef, SGD, Sequential, Shape,
    clone_model, load_model, save_model_with_prompt,
};
use serde_json::json;
use std::fs;

fn training_batch() -> (ndarray::ArrayD<f32>, ndarray::ArrayD<f32>) {
    let x = ndarray::Array::from_shape_vec(
        ndarray::IxDyn(&[8, 10]),
        (0..80).map(|i| (i % 7) as f32 * 0.1).collect(),
    )
    .expect("构造输入失败");
    let y = ndarray::ArrayD::zeros(ndarray::IxDyn(&[8, 3]));
    (x, y)
}

fn build_mlp() -> Result<Sequential, GraphError> {
    let mut model = Sequential::new_with_seed(Some("mnist_like_mlp"), 2026);
    model.add(Box::new(
        Dense::new(32)
            .with_activation("relu")?
            .with_input_shape(&[10]),
    ))?;
    model.add(Box::new(Dense::new(16).with_activation("relu")?))?;
    model.add(Box::new(Dense::new(3).with_activation("softmax")?))?;
    Ok(model)
}

#[test]
fn test_mlp_end_to_end() {
    let temp_file = "test_mlp_end_to_end.okar";
    let (x, y) = training_batch();

    // 1. 搭模型并编译
    let mut model = build_mlp().expect("搭建 MLP 失败");
    model
        .compile(
            Box::new(SGD::new(0.01).with_momentum(0.9)),
            json!("categorical_crossentropy"),
            json!(["accuracy"]),
        )
        .expect("编译失败");

    // 2. 预测与训练记账
    let probs = model.predict(&x).expect("预测失败");
    assert_eq!(probs.shape(), &[8, 3]);
    // softmax 输出每行和为 1
    for row in 0..8 {
        let sum: f32 = (0..3)
            .map(|c| probs[[row, c]])
            .sum();
        assert!((sum - 1.0).abs() < 1e-4, "第{row}行概率和为{sum}");
    }
    let history = model.fit(&x, &y, 5).expect("训练失败");
    assert_eq!(history.len(), 5);
    assert_eq!(
        model.training_state().unwrap().optimizer.iterations(),
        5
    );

    // 3. 存档往返：拓扑/权重/优化器状态
    save_model_with_prompt(ModelRef::Sequential(&model), temp_file, true, true, &mut |_| {
        true
    })
    .expect("保存失败");
    let loaded = load_model(temp_file, None, true).expect("加载失败");
    assert!(loaded.is_compiled());
    let loaded_seq = match &loaded {
        AnyModel::Sequential(m) => m,
        AnyModel::Functional(_) => panic!("应加载回 Sequential"),
    };
    for (a, b) in model.get_weights().iter().zip(loaded_seq.get_weights().iter()) {
        assert_eq!(a, b, "权重应按位一致");
    }
    assert_eq!(
        loaded_seq.training_state().unwrap().optimizer.iterations(),
        5
    );

    // 4. 克隆：同结构、全新权重
    let cloned = clone_model(ModelRef::Sequential(&model), None).expect("克隆失败");
    let mut cloned_seq = match cloned {
        AnyModel::Sequential(m) => m,
        AnyModel::Functional(_) => panic!("克隆产物种类不对"),
    };
    assert_eq!(cloned_seq.layer_count(), model.layer_count());
    let cloned_probs = cloned_seq.predict(&x).expect("克隆预测失败");
    assert_eq!(cloned_probs.shape(), probs.shape());
    let differs = probs
        .iter()
        .zip(cloned_probs.iter())
        .any(|(a, b)| (a - b).abs() > 1e-6);
    assert!(differs, "克隆应是全新权重");

    // 5. 克隆注入：把克隆接到工作区里的既有输入上
    let workspace = Graph::new();
    let entry = workspace
        .input(&Shape::with_batch(&[10]), Default::default(), Some("entry"))
        .expect("合成输入失败");
    let injected = clone_model(
        ModelRef::Sequential(&model),
        Some((workspace, vec![CloneInput::Tensor(entry)])),
    )
    .expect("注入克隆失败");
    let mut injected_seq = match injected {
        AnyModel::Sequential(m) => m,
        AnyModel::Functional(_) => panic!("克隆产物种类不对"),
    };
    let yi = injected_seq.predict(&x).expect("注入克隆预测失败");
    assert_eq!(yi.shape(), &[8, 3]);

    fs::remove_file(temp_file).ok();
}
