/*
 * @Author       : 老董
 * @Date         : 2026-02-25
 * @Description  : 存档网关——模型的保存/加载（单文件：拓扑 + 权重 + 训练配置）
 *
 * 存档格式：魔数 + 小端版本号 + bincode 编码的 Archive 记录。
 * Archive 里拓扑与训练配置是 JSON 字符串区，权重按"层名 -> 有序
 * 具名数组"分组。文件句柄的获取都是作用域内的，任何提前返回或
 * 出错路径都会随 RAII 释放。
 *
 * 权重单独导出走 .npz（save_weights/load_weights）。
 */

use super::super::error::GraphError;
use super::super::layer::CustomObjects;
use super::super::types::LayerId;
use super::clone::{AnyModel, ModelRef};
use super::functional::{Model, TrainingState};
use super::sequential::Sequential;
use serde_json::{Value, json};

#[cfg(feature = "archive")]
use super::super::criterion::resolve_custom_objects;
#[cfg(feature = "archive")]
use super::super::optimizer::deserialize_optimizer;
#[cfg(feature = "archive")]
use super::super::types::TensorData;
#[cfg(feature = "archive")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "archive")]
use std::fs::File;
#[cfg(feature = "archive")]
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

// ========== 模型引用的存档侧能力 ==========

impl ModelRef<'_> {
    pub(in crate::nn) fn layer_ids(&self) -> &[LayerId] {
        match self {
            Self::Sequential(m) => m.layer_ids(),
            Self::Functional(m) => m.layer_ids(),
        }
    }

    pub(in crate::nn) fn training_state(&self) -> Option<&TrainingState> {
        match self {
            Self::Sequential(m) => m.training_state(),
            Self::Functional(m) => m.training_state(),
        }
    }

    /// 顶层拓扑记录 `{class_name, config}`
    pub fn config_record(&self) -> Result<Value, GraphError> {
        match self {
            Self::Sequential(m) => Ok(json!({
                "class_name": "Sequential",
                "config": m.get_config(),
            })),
            Self::Functional(m) => Ok(json!({
                "class_name": "Model",
                "config": m.get_config()?,
            })),
        }
    }
}

impl AnyModel {
    pub fn compile_full(
        &mut self,
        optimizer: Box<dyn super::super::optimizer::Optimizer>,
        loss: Value,
        metrics: Value,
        sample_weight_mode: Option<String>,
        loss_weights: Option<Vec<f32>>,
    ) -> Result<(), GraphError> {
        match self {
            Self::Sequential(m) => {
                m.compile_full(optimizer, loss, metrics, sample_weight_mode, loss_weights)
            }
            Self::Functional(m) => {
                m.compile_full(optimizer, loss, metrics, sample_weight_mode, loss_weights)
            }
        }
    }

    pub fn make_train_function(&mut self) -> Result<(), GraphError> {
        match self {
            Self::Sequential(m) => m.make_train_function(),
            Self::Functional(m) => m.make_train_function(),
        }
    }

    pub fn training_state_mut(&mut self) -> Option<&mut TrainingState> {
        match self {
            Self::Sequential(m) => m.training_state_mut(),
            Self::Functional(m) => m.training_state_mut(),
        }
    }

    pub fn is_compiled(&self) -> bool {
        match self {
            Self::Sequential(m) => m.is_compiled(),
            Self::Functional(m) => m.is_compiled(),
        }
    }
}

// ========== 拓扑工厂入口 ==========

/// 从顶层 `{class_name, config}` 记录重建模型
pub fn model_from_config(
    config: &Value,
    custom_objects: Option<&CustomObjects>,
) -> Result<AnyModel, GraphError> {
    if config.is_array() {
        return Err(GraphError::TypeMismatch(
            "model_from_config 需要 {class_name, config} 对象；\
             层记录数组请改用 Sequential::from_config"
                .into(),
        ));
    }
    let class_name = config
        .get("class_name")
        .and_then(Value::as_str)
        .ok_or_else(|| GraphError::InvalidConfig("模型配置缺少 class_name".into()))?;
    let inner_config = config
        .get("config")
        .ok_or_else(|| GraphError::InvalidConfig("模型配置缺少 config".into()))?;
    match class_name {
        "Sequential" => Ok(AnyModel::Sequential(Sequential::from_config(
            inner_config,
            custom_objects,
        )?)),
        "Model" => Ok(AnyModel::Functional(Model::from_config(
            inner_config,
            custom_objects,
        )?)),
        other => Err(GraphError::UnknownIdentifier(format!(
            "未知的模型类名：{other}"
        ))),
    }
}

/// 从 JSON 字符串重建模型
pub fn model_from_json(
    json: &str,
    custom_objects: Option<&CustomObjects>,
) -> Result<AnyModel, GraphError> {
    let config: Value = serde_json::from_str(json)?;
    model_from_config(&config, custom_objects)
}

// ========== 存档结构 ==========

#[cfg(feature = "archive")]
const ARCHIVE_MAGIC: &[u8; 4] = b"OKAR";
#[cfg(feature = "archive")]
const ARCHIVE_VERSION: u32 = 1;

#[cfg(feature = "archive")]
#[derive(Serialize, Deserialize)]
struct WeightEntry {
    name: String,
    shape: Vec<usize>,
    data: Vec<f32>,
}

#[cfg(feature = "archive")]
#[derive(Serialize, Deserialize)]
struct LayerWeights {
    layer_name: String,
    weights: Vec<WeightEntry>,
}

#[cfg(feature = "archive")]
#[derive(Serialize, Deserialize)]
struct Archive {
    format_version: String,
    backend_tag: String,
    /// JSON 字符串：`{class_name, config}`
    model_config: Option<String>,
    model_weights: Vec<LayerWeights>,
    optimizer_weights: Option<Vec<WeightEntry>>,
    /// JSON 字符串：优化器/损失/指标/权重模式
    training_config: Option<String>,
}

#[cfg(feature = "archive")]
impl WeightEntry {
    fn from_tensor(name: &str, tensor: &TensorData) -> Self {
        Self {
            name: name.to_string(),
            shape: tensor.shape().to_vec(),
            data: tensor.iter().copied().collect(),
        }
    }

    fn into_tensor(self) -> Result<(String, TensorData), GraphError> {
        let tensor = ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&self.shape), self.data)
            .map_err(|e| GraphError::InvalidArchive(format!("权重`{}`形状与数据不符：{e}", self.name)))?;
        Ok((self.name, tensor))
    }
}

// ========== 保存 ==========

/// 收集模型各层的具名权重（只含有权重的层，层序即模型层序）
#[cfg(feature = "archive")]
fn collect_layer_weights(model: &ModelRef<'_>) -> Result<Vec<LayerWeights>, GraphError> {
    let inner = model.graph().inner();
    let mut groups = Vec::new();
    for &id in model.layer_ids() {
        let slot = inner.layer(id)?;
        let weights = slot.layer.weights();
        if weights.is_empty() {
            continue;
        }
        groups.push(LayerWeights {
            layer_name: slot.layer.name().to_string(),
            weights: weights
                .iter()
                .map(|(name, tensor)| WeightEntry::from_tensor(name, tensor))
                .collect(),
        });
    }
    Ok(groups)
}

/// 组装训练配置 JSON；loss_weights 里的非有限值无法进 JSON，直接报错
#[cfg(feature = "archive")]
fn encode_training_config(state: &TrainingState) -> Result<String, GraphError> {
    if let Some(loss_weights) = &state.loss_weights {
        for &w in loss_weights {
            if !w.is_finite() {
                return Err(GraphError::NotSerializable(format!(
                    "loss_weights 含非有限值{w}"
                )));
            }
        }
    }
    let config = json!({
        "optimizer_config": {
            "class_name": state.optimizer.class_name(),
            "config": state.optimizer.get_config(),
        },
        "loss": state.loss,
        "metrics": state.metrics,
        "sample_weight_mode": state.sample_weight_mode,
        "loss_weights": state.loss_weights,
    });
    Ok(serde_json::to_string(&config)?)
}

/// 保存模型到单文件存档（覆盖确认走标准输入）
#[cfg(feature = "archive")]
pub fn save_model(
    model: ModelRef<'_>,
    path: impl AsRef<Path>,
    overwrite: bool,
    include_optimizer: bool,
) -> Result<(), GraphError> {
    save_model_with_prompt(model, path, overwrite, include_optimizer, &mut |p: &Path| {
        crate::utils::ask_to_proceed_with_overwrite(p)
    })
}

/// 保存模型，覆盖确认由调用方注入（用户拒绝时静默中止，不算错误）
#[cfg(feature = "archive")]
pub fn save_model_with_prompt(
    model: ModelRef<'_>,
    path: impl AsRef<Path>,
    overwrite: bool,
    include_optimizer: bool,
    confirm: &mut dyn FnMut(&Path) -> bool,
) -> Result<(), GraphError> {
    let path = path.as_ref();
    if !overwrite && path.is_file() && !confirm(path) {
        return Ok(());
    }

    let model_config = serde_json::to_string(&model.config_record()?)?;
    let model_weights = collect_layer_weights(&model)?;

    let mut training_config = None;
    let mut optimizer_weights = None;
    if include_optimizer
        && let Some(state) = model.training_state()
    {
        if state.optimizer.is_external() {
            log::warn!(
                "外部委托优化器无法内省属性与状态，训练配置不会随存档保存；\
                 加载后需要重新 compile"
            );
        } else {
            training_config = Some(encode_training_config(state)?);
            let slots = state.optimizer.weights();
            if !slots.is_empty() {
                optimizer_weights = Some(
                    slots
                        .iter()
                        .map(|(name, tensor)| WeightEntry::from_tensor(name, tensor))
                        .collect(),
                );
            }
        }
    }

    let archive = Archive {
        format_version: env!("CARGO_PKG_VERSION").to_string(),
        backend_tag: "ndarray".to_string(),
        model_config: Some(model_config),
        model_weights,
        optimizer_weights,
        training_config,
    };

    write_archive(path, &archive)
}

#[cfg(feature = "archive")]
fn write_archive(path: &Path, archive: &Archive) -> Result<(), GraphError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(ARCHIVE_MAGIC)?;
    writer.write_all(&ARCHIVE_VERSION.to_le_bytes())?;
    bincode::serialize_into(&mut writer, archive)
        .map_err(|e| GraphError::InvalidArchive(format!("存档编码失败：{e}")))?;
    writer.flush()?;
    Ok(())
}

#[cfg(feature = "archive")]
fn read_archive(path: &Path) -> Result<Archive, GraphError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != ARCHIVE_MAGIC {
        return Err(GraphError::InvalidArchive(
            "这不是 only_keras 格式的存档文件，请确认文件由 save_model 产生".into(),
        ));
    }
    let mut version_bytes = [0u8; 4];
    reader.read_exact(&mut version_bytes)?;
    let version = u32::from_le_bytes(version_bytes);
    if version != ARCHIVE_VERSION {
        return Err(GraphError::InvalidArchive(format!(
            "不支持的存档版本：{version}"
        )));
    }
    bincode::deserialize_from(&mut reader)
        .map_err(|e| GraphError::InvalidArchive(format!("存档解码失败：{e}")))
}

#[cfg(not(feature = "archive"))]
pub fn save_model(
    _model: ModelRef<'_>,
    _path: impl AsRef<Path>,
    _overwrite: bool,
    _include_optimizer: bool,
) -> Result<(), GraphError> {
    Err(GraphError::BackendUnavailable(
        "save_model 需要启用 archive 特性".into(),
    ))
}

// ========== 加载 ==========

/// 按层名把存档权重严格恢复进重建好的模型（形状不匹配直接上抛）
#[cfg(feature = "archive")]
fn restore_layer_weights(model: &AnyModel, groups: Vec<LayerWeights>) -> Result<(), GraphError> {
    let model_ref = model.as_ref();
    let graph = model_ref.graph().clone();
    let layer_ids = model_ref.layer_ids().to_vec();

    let weighted_layers = {
        let inner = graph.inner();
        layer_ids
            .iter()
            .filter(|&&id| {
                inner
                    .layer(id)
                    .map(|slot| !slot.layer.weights().is_empty())
                    .unwrap_or(false)
            })
            .count()
    };
    if weighted_layers != groups.len() {
        return Err(GraphError::InvalidArchive(format!(
            "存档中有{}个带权重的层，而重建模型中有{weighted_layers}个",
            groups.len()
        )));
    }

    let mut inner = graph.inner_mut();
    for group in groups {
        let id = inner.layer_id_by_name(&group.layer_name).ok_or_else(|| {
            GraphError::InvalidArchive(format!(
                "存档中的层`{}`在重建模型中不存在",
                group.layer_name
            ))
        })?;
        let values: Vec<TensorData> = group
            .weights
            .into_iter()
            .map(|entry| entry.into_tensor().map(|(_, tensor)| tensor))
            .collect::<Result<_, _>>()?;
        inner.layer_mut(id)?.layer.set_weights(&values)?;
    }
    Ok(())
}

/// 从存档加载模型
///
/// `compile` 为 false 时直接返回未编译模型。训练配置缺失降级为
/// 警告并返回未编译模型；优化器状态恢复失败降级为警告并换成全新
/// 初始化的优化器——"恢复不了具体训练计划"不等于"根本跑不了"。
#[cfg(feature = "archive")]
pub fn load_model(
    path: impl AsRef<Path>,
    custom_objects: Option<&CustomObjects>,
    compile: bool,
) -> Result<AnyModel, GraphError> {
    let archive = read_archive(path.as_ref())?;

    // 拓扑
    let config_json = archive
        .model_config
        .ok_or_else(|| GraphError::MissingRecord("model_config（模型拓扑）".into()))?;
    let config: Value = serde_json::from_str(&config_json)?;
    let mut model = model_from_config(&config, custom_objects)?;

    // 权重
    restore_layer_weights(&model, archive.model_weights)?;

    if !compile {
        return Ok(model);
    }

    // 训练配置（缺失降级为警告）
    let Some(training_json) = archive.training_config else {
        log::warn!("存档中没有训练配置：模型未编译，请手动 compile");
        return Ok(model);
    };
    let training: Value = serde_json::from_str(&training_json)?;
    let optimizer_record = training.get("optimizer_config").ok_or_else(|| {
        GraphError::InvalidArchive("训练配置缺少 optimizer_config".into())
    })?;
    let optimizer = deserialize_optimizer(optimizer_record, custom_objects)?;
    let loss = resolve_custom_objects(
        training.get("loss").unwrap_or(&Value::Null),
        custom_objects,
    )?;
    let metrics = resolve_custom_objects(
        training.get("metrics").unwrap_or(&Value::Null),
        custom_objects,
    )?;
    let sample_weight_mode = training
        .get("sample_weight_mode")
        .and_then(Value::as_str)
        .map(String::from);
    let loss_weights = training
        .get("loss_weights")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_f64)
                .map(|v| v as f32)
                .collect::<Vec<f32>>()
        });
    model.compile_full(optimizer, loss, metrics, sample_weight_mode, loss_weights)?;

    // 优化器状态（恢复失败降级为警告 + 全新优化器）
    if let Some(entries) = archive.optimizer_weights {
        model.make_train_function()?;
        let values: Vec<(String, TensorData)> = entries
            .into_iter()
            .map(WeightEntry::into_tensor)
            .collect::<Result<_, _>>()?;
        let restore = model
            .training_state_mut()
            .unwrap()
            .optimizer
            .set_weights(&values);
        if let Err(e) = restore {
            log::warn!("恢复优化器状态失败（{e}），模型将使用全新初始化的优化器");
            let fresh = deserialize_optimizer(optimizer_record, custom_objects)?;
            model.training_state_mut().unwrap().optimizer = fresh;
            model.make_train_function()?;
        }
    }
    Ok(model)
}

#[cfg(not(feature = "archive"))]
pub fn load_model(
    _path: impl AsRef<Path>,
    _custom_objects: Option<&CustomObjects>,
    _compile: bool,
) -> Result<AnyModel, GraphError> {
    Err(GraphError::BackendUnavailable(
        "load_model 需要启用 archive 特性".into(),
    ))
}

// ========== 权重单独导出（npz） ==========

/// 只把各层权重写成 .npz（不含拓扑与训练配置）
#[cfg(feature = "archive")]
pub fn save_weights(model: ModelRef<'_>, path: impl AsRef<Path>) -> Result<(), GraphError> {
    let mut npz = ndarray_npy::NpzWriter::new(File::create(path.as_ref())?);
    for group in collect_layer_weights(&model)? {
        for entry in &group.weights {
            let tensor = ndarray::ArrayD::from_shape_vec(
                ndarray::IxDyn(&entry.shape),
                entry.data.clone(),
            )
            .map_err(|e| GraphError::InternalError(format!("权重数组布局异常：{e}")))?;
            npz.add_array(entry.name.as_str(), &tensor)
                .map_err(|e| GraphError::InvalidArchive(format!("npz 写入失败：{e}")))?;
        }
    }
    npz.finish()
        .map_err(|e| GraphError::InvalidArchive(format!("npz 收尾失败：{e}")))?;
    Ok(())
}

/// 从 .npz 恢复各层权重（名称按当前模型的权重名逐一匹配）
#[cfg(feature = "archive")]
pub fn load_weights(model: ModelRef<'_>, path: impl AsRef<Path>) -> Result<(), GraphError> {
    let mut npz = ndarray_npy::NpzReader::new(File::open(path.as_ref())?)
        .map_err(|e| GraphError::InvalidArchive(format!("npz 打开失败：{e}")))?;
    let entry_names: Vec<String> = npz
        .names()
        .map_err(|e| GraphError::InvalidArchive(format!("npz 清单读取失败：{e}")))?;

    let graph = model.graph().clone();
    let layer_ids = model.layer_ids().to_vec();
    for id in layer_ids {
        let expected: Vec<String> = {
            let inner = graph.inner();
            inner
                .layer(id)?
                .layer
                .weights()
                .iter()
                .map(|(name, _)| name.clone())
                .collect()
        };
        if expected.is_empty() {
            continue;
        }
        let mut values = Vec::with_capacity(expected.len());
        for name in &expected {
            let entry = entry_names
                .iter()
                .find(|e| e.as_str() == name || e.trim_end_matches(".npy") == name)
                .ok_or_else(|| {
                    GraphError::InvalidArchive(format!("npz 中缺少权重`{name}`"))
                })?;
            let tensor: TensorData = npz
                .by_name(entry)
                .map_err(|e| GraphError::InvalidArchive(format!("npz 读取`{name}`失败：{e}")))?;
            values.push(tensor);
        }
        graph.inner_mut().layer_mut(id)?.layer.set_weights(&values)?;
    }
    Ok(())
}

#[cfg(not(feature = "archive"))]
pub fn save_weights(_model: ModelRef<'_>, _path: impl AsRef<Path>) -> Result<(), GraphError> {
    Err(GraphError::BackendUnavailable(
        "save_weights 需要启用 archive 特性".into(),
    ))
}

#[cfg(not(feature = "archive"))]
pub fn load_weights(_model: ModelRef<'_>, _path: impl AsRef<Path>) -> Result<(), GraphError> {
    Err(GraphError::BackendUnavailable(
        "load_weights 需要启用 archive 特性".into(),
    ))
}

// ========== 测试辅助：构造降级/缺失场景的存档 ==========

/// 写一个没有拓扑记录的存档（测试 MissingRecord 路径）
#[cfg(all(test, feature = "archive"))]
pub(in crate::nn) fn write_archive_without_topology(path: &Path) -> Result<(), GraphError> {
    let archive = Archive {
        format_version: env!("CARGO_PKG_VERSION").to_string(),
        backend_tag: "ndarray".to_string(),
        model_config: None,
        model_weights: Vec::new(),
        optimizer_weights: None,
        training_config: None,
    };
    write_archive(path, &archive)
}

/// 砍掉存档里的一个优化器状态张量（测试宽松恢复路径）
#[cfg(all(test, feature = "archive"))]
pub(in crate::nn) fn truncate_optimizer_weights(path: &Path) -> Result<(), GraphError> {
    let mut archive = read_archive(path)?;
    if let Some(entries) = &mut archive.optimizer_weights {
        entries.pop();
    }
    write_archive(path, &archive)
}
