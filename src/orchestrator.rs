// 该文件是 Zhanjian （站检） 项目的一部分。
// src/orchestrator.rs - 多模型检测编排
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{sync::Arc, time::Instant};

use serde::{Serialize, Serializer, ser::SerializeMap};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
  artifact::{ArtifactError, ArtifactManager, TempArtifact},
  config::{ConfigError, ServiceConfig, ThresholdConfig},
  detection::{DetectionSet, Winding},
  detector::DetectorError,
  pipeline::{
    NormalizeError, OrientationError, classify, filter_classes, normalize, read_orientation,
    rotate_detections,
  },
  registry::{ModelEntry, ModelRegistry, RegistryError},
};

/// 多模型请求共用的临时文件前缀
pub const MULTIPLE_MODELS_PREFIX: &str = "multiple_models";

#[derive(Error, Debug)]
pub enum OrchestratorError {
  #[error(transparent)]
  Artifact(#[from] ArtifactError),
  #[error(transparent)]
  Registry(#[from] RegistryError),
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("模型 {model} 推理失败: {source}")]
  Detector {
    model: String,
    source: DetectorError,
  },
  #[error("模型 {model} 的输出无效: {source}")]
  Normalize {
    model: String,
    source: NormalizeError,
  },
  #[error(transparent)]
  Orientation(#[from] OrientationError),
}

/// 后处理选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
  pub rotate_boxes: bool,
  pub winding: Winding,
}

impl Default for PipelineOptions {
  fn default() -> Self {
    Self {
      rotate_boxes: true,
      winding: Winding::default(),
    }
  }
}

impl From<&ServiceConfig> for PipelineOptions {
  fn from(config: &ServiceConfig) -> Self {
    Self {
      rotate_boxes: config.rotate_boxes,
      winding: config.winding,
    }
  }
}

/// 上传的图像
#[derive(Debug, Clone)]
pub struct UploadedImage {
  pub file_name: String,
  pub bytes: Vec<u8>,
}

/// 模型名 -> 检测结果，按请求顺序序列化为 JSON 对象
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResults {
  entries: Vec<(String, DetectionSet)>,
}

impl ModelResults {
  pub fn get(&self, model: &str) -> Option<&DetectionSet> {
    self
      .entries
      .iter()
      .find(|(name, _)| name == model)
      .map(|(_, set)| set)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn models(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|(name, _)| name.as_str())
  }
}

impl Serialize for ModelResults {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.entries.len()))?;
    for (name, set) in &self.entries {
      map.serialize_entry(name, set)?;
    }
    map.end()
  }
}

/// 检测编排器：保存上传图像、依次调用检测器、后处理并释放临时文件
pub struct Orchestrator {
  registry: Arc<ModelRegistry>,
  thresholds: Arc<ThresholdConfig>,
  artifacts: ArtifactManager,
  options: PipelineOptions,
}

impl Orchestrator {
  pub fn new(
    registry: Arc<ModelRegistry>,
    thresholds: Arc<ThresholdConfig>,
    artifacts: ArtifactManager,
    options: PipelineOptions,
  ) -> Self {
    Self {
      registry,
      thresholds,
      artifacts,
      options,
    }
  }

  pub fn registry(&self) -> &ModelRegistry {
    &self.registry
  }

  /// 单模型检测，临时文件在后处理结束后立即释放
  pub fn run_single(
    &self,
    request: Uuid,
    image: &UploadedImage,
    model: &str,
  ) -> Result<DetectionSet, OrchestratorError> {
    let entry = self.registry.get(model)?;
    let artifact = self
      .artifacts
      .acquire(&image.bytes, &image.file_name, &entry.key, request)?;

    let result = self.detect(entry, &artifact);
    let released = self.artifacts.release(artifact);
    let set = result?;
    released?;
    Ok(set)
  }

  /// 多模型检测：所有检测器共用一份临时文件，循环结束后释放一次
  ///
  /// 任一模型未注册或推理失败都会使整个请求失败。重复的模型名只执行一次。
  pub fn run(
    &self,
    request: Uuid,
    image: &UploadedImage,
    models: &[String],
  ) -> Result<ModelResults, OrchestratorError> {
    let artifact = self.artifacts.acquire(
      &image.bytes,
      &image.file_name,
      MULTIPLE_MODELS_PREFIX,
      request,
    )?;

    if models.is_empty() {
      info!("请求 {} 未指定模型", request);
    }

    let result = self.fan_out(models, &artifact);
    let released = self.artifacts.release(artifact);
    let results = result?;
    released?;
    Ok(results)
  }

  fn fan_out(
    &self,
    models: &[String],
    artifact: &TempArtifact,
  ) -> Result<ModelResults, OrchestratorError> {
    let mut entries: Vec<&ModelEntry> = Vec::with_capacity(models.len());
    for model in models {
      let entry = self.registry.get(model)?;
      if !entries.iter().any(|e| e.name == entry.name) {
        entries.push(entry);
      }
    }

    let mut results = ModelResults::default();
    for entry in entries {
      let set = self.detect(entry, artifact)?;
      results.entries.push((entry.name.clone(), set));
    }
    Ok(results)
  }

  fn detect(
    &self,
    entry: &ModelEntry,
    artifact: &TempArtifact,
  ) -> Result<DetectionSet, OrchestratorError> {
    let thresholds = self.thresholds.get(&entry.key)?;

    let now = Instant::now();
    let raw = entry.detector.predict(artifact.path()).map_err(|source| {
      error!("模型 {} 推理失败: {}", entry.name, source);
      OrchestratorError::Detector {
        model: entry.name.clone(),
        source,
      }
    })?;
    debug!("模型 {} 推理完成，耗时: {:.2?}", entry.name, now.elapsed());

    let set = normalize(raw, true).map_err(|source| OrchestratorError::Normalize {
      model: entry.name.clone(),
      source,
    })?;
    let mut set = classify(set, thresholds);
    if self.options.rotate_boxes && !set.is_empty() {
      let orientation = read_orientation(artifact.path())?;
      set = rotate_detections(set, &orientation, self.options.winding);
    }
    let set = filter_classes(set, &entry.classes);

    info!(
      "请求 {} 模型 {}: {} 个目标",
      artifact.owner(),
      entry.name,
      set.len()
    );
    Ok(set)
  }
}
