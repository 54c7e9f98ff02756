// 该文件是 Zhanjian （站检） 项目的一部分。
// src/registry.rs - 模型注册表
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

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{info, warn};

use crate::{
  FromUrl,
  config::{ModelTable, ThresholdConfig},
  detector::{Detector, DetectorError, DetectorWrapper},
};

#[derive(Error, Debug)]
pub enum RegistryError {
  #[error("未知模型: {model}，可用模型: {}", .available.join(", "))]
  UnknownModel {
    model: String,
    available: Vec<String>,
  },
  #[error("模型 {model} 的检测器初始化失败: {source}")]
  Detector {
    model: String,
    source: DetectorError,
  },
}

/// 注册表中的一项
pub struct ModelEntry {
  pub name: String,
  /// 阈值键与临时文件前缀
  pub key: String,
  pub classes: Vec<String>,
  pub detector: Box<dyn Detector>,
}

impl std::fmt::Debug for ModelEntry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModelEntry")
      .field("name", &self.name)
      .field("key", &self.key)
      .field("classes", &self.classes)
      .finish_non_exhaustive()
  }
}

/// 公开模型名 -> 检测器，启动时构建后不再修改
#[derive(Debug, Default)]
pub struct ModelRegistry {
  entries: BTreeMap<String, ModelEntry>,
}

impl ModelRegistry {
  pub fn builder() -> ModelRegistryBuilder {
    ModelRegistryBuilder::default()
  }

  /// 由模型表构建，每个检测器通过其 url 创建
  pub fn from_table(table: &ModelTable, use_gpu: bool) -> Result<Self, RegistryError> {
    let mut builder = Self::builder();
    for spec in &table.models {
      let detector = DetectorWrapper::from_url(&spec.detector)
        .map_err(|source| RegistryError::Detector {
          model: spec.name.clone(),
          source,
        })?
        .configure(spec.params.clone(), use_gpu);
      info!("注册模型 {} ({}): {}", spec.name, spec.key, spec.detector);
      builder = builder.model(&spec.name, &spec.key, spec.classes.clone(), detector);
    }
    Ok(builder.build())
  }

  pub fn get(&self, name: &str) -> Result<&ModelEntry, RegistryError> {
    self
      .entries
      .get(name)
      .ok_or_else(|| RegistryError::UnknownModel {
        model: name.to_string(),
        available: self.names().map(str::to_string).collect(),
      })
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.entries.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// 启动时检查每个模型的阈值是否已配置
  pub fn check_thresholds(&self, thresholds: &ThresholdConfig) -> Vec<&str> {
    let missing: Vec<&str> = self
      .entries
      .values()
      .filter(|entry| !thresholds.contains(&entry.key))
      .map(|entry| entry.name.as_str())
      .collect();
    for name in &missing {
      warn!("模型 {} 未配置阈值，请求时将失败", name);
    }
    missing
  }
}

#[derive(Default)]
pub struct ModelRegistryBuilder {
  entries: BTreeMap<String, ModelEntry>,
}

impl ModelRegistryBuilder {
  pub fn model(
    mut self,
    name: &str,
    key: &str,
    classes: Vec<String>,
    detector: impl Detector + 'static,
  ) -> Self {
    self.entries.insert(
      name.to_string(),
      ModelEntry {
        name: name.to_string(),
        key: key.to_string(),
        classes,
        detector: Box::new(detector),
      },
    );
    self
  }

  pub fn build(self) -> ModelRegistry {
    ModelRegistry {
      entries: self.entries,
    }
  }
}
