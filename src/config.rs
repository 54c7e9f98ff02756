// 该文件是 Zhanjian （站检） 项目的一部分。
// src/config.rs - 配置文件与服务配置
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

use std::{
  collections::HashMap,
  net::SocketAddr,
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{artifact::Retention, detection::Winding};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件格式错误 {path}: {source}")]
  Parse {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("模型 {model} 的阈值无效: {reason}")]
  InvalidThreshold { model: String, reason: String },
  #[error("未配置模型 {0} 的阈值")]
  MissingThreshold(String),
  #[error("模型名称重复: {0}")]
  DuplicateModel(String),
  #[error("模型名称无效 {name:?}: {reason}")]
  InvalidModelName { name: String, reason: String },
}

/// 已被固定接口占用的路径名
pub const RESERVED_MODEL_NAMES: [&str; 2] = ["multiple_models", "shutdown_server_for_maintenance"];

/// 模型名会直接成为接口路径 `/<name>`，只允许字母、数字、`_`、`-` 和 `.`
pub fn validate_model_name(name: &str) -> Result<(), ConfigError> {
  let invalid = |reason: &str| ConfigError::InvalidModelName {
    name: name.to_string(),
    reason: reason.to_string(),
  };
  if name.is_empty() {
    return Err(invalid("名称为空"));
  }
  if RESERVED_MODEL_NAMES.contains(&name) {
    return Err(invalid("与内置接口重名"));
  }
  if !name
    .chars()
    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
  {
    return Err(invalid("包含不允许的字符"));
  }
  Ok(())
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
  let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
    path: path.to_path_buf(),
    source,
  })
}

/// 单个模型的置信度阈值，文件中以 `th1`/`th2` 表示
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
  #[serde(rename = "th1")]
  pub low: f64,
  #[serde(rename = "th2")]
  pub high: f64,
}

/// 模型键 -> 阈值，启动时加载后只读
#[derive(Debug, Clone, Default)]
pub struct ThresholdConfig {
  thresholds: HashMap<String, Thresholds>,
}

impl ThresholdConfig {
  pub fn new(thresholds: HashMap<String, Thresholds>) -> Result<Self, ConfigError> {
    for (model, th) in &thresholds {
      let invalid = |reason: &str| ConfigError::InvalidThreshold {
        model: model.clone(),
        reason: reason.to_string(),
      };
      if !(0.0..=1.0).contains(&th.low) || !(0.0..=1.0).contains(&th.high) {
        return Err(invalid("阈值必须位于 [0, 1]"));
      }
      if th.low > th.high {
        return Err(invalid("th1 不能大于 th2"));
      }
    }
    Ok(Self { thresholds })
  }

  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let config = Self::new(load_json(path)?)?;
    info!("已加载 {} 个模型阈值: {}", config.thresholds.len(), path.display());
    Ok(config)
  }

  pub fn get(&self, key: &str) -> Result<&Thresholds, ConfigError> {
    self
      .thresholds
      .get(key)
      .ok_or_else(|| ConfigError::MissingThreshold(key.to_string()))
  }

  pub fn contains(&self, key: &str) -> bool {
    self.thresholds.contains_key(key)
  }
}

/// 访问令牌 -> 身份
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
  tokens: HashMap<String, String>,
}

impl TokenStore {
  pub fn new(tokens: HashMap<String, String>) -> Self {
    Self { tokens }
  }

  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let store = Self::new(load_json(path)?);
    info!("已加载 {} 个访问令牌", store.tokens.len());
    Ok(store)
  }

  pub fn verify(&self, token: &str) -> Option<&str> {
    self.tokens.get(token).map(String::as_str)
  }
}

fn default_img_size() -> u32 {
  608
}

fn default_conf_thres() -> f32 {
  0.3
}

fn default_iou_thres() -> f32 {
  0.6
}

fn default_device() -> String {
  "cpu".to_string()
}

fn default_input_type() -> String {
  "image".to_string()
}

fn default_fourcc() -> String {
  "mp4v".to_string()
}

fn default_sample_rate() -> u32 {
  1
}

/// 转交给检测器的推理参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorParams {
  #[serde(default = "default_img_size")]
  pub img_size: u32,
  #[serde(default = "default_conf_thres")]
  pub conf_thres: f32,
  #[serde(default = "default_iou_thres")]
  pub iou_thres: f32,
  #[serde(default)]
  pub half: bool,
  #[serde(default)]
  pub augment: bool,
  #[serde(default)]
  pub agnostic_nms: bool,
  #[serde(default)]
  pub classes_filter: Option<Vec<u32>>,
  #[serde(default = "default_device")]
  pub device: String,
  #[serde(default = "default_input_type")]
  pub input_type: String,
  #[serde(default = "default_fourcc")]
  pub fourcc: String,
  #[serde(default)]
  pub video: bool,
  /// 视频每秒采样帧数
  #[serde(default = "default_sample_rate")]
  pub video_sample_rate: u32,
}

impl Default for DetectorParams {
  fn default() -> Self {
    Self {
      img_size: default_img_size(),
      conf_thres: default_conf_thres(),
      iou_thres: default_iou_thres(),
      half: false,
      augment: false,
      agnostic_nms: false,
      classes_filter: None,
      device: default_device(),
      input_type: default_input_type(),
      fourcc: default_fourcc(),
      video: false,
      video_sample_rate: default_sample_rate(),
    }
  }
}

/// 模型表中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
  /// 对外公开的模型名，同时也是单模型接口路径
  pub name: String,
  /// 阈值键，同时作为临时文件前缀
  pub key: String,
  /// 只保留这些类别，为空时不过滤
  #[serde(default)]
  pub classes: Vec<String>,
  /// 检测器地址，例如 `command:///opt/yolo/predict?arg=--weights&arg=antenna.pt`
  pub detector: Url,
  #[serde(default)]
  pub params: DetectorParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTable {
  pub models: Vec<ModelSpec>,
}

impl ModelTable {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let table: ModelTable = load_json(path)?;
    let mut seen = std::collections::HashSet::new();
    for spec in &table.models {
      validate_model_name(&spec.name)?;
      if !seen.insert(spec.name.as_str()) {
        return Err(ConfigError::DuplicateModel(spec.name.clone()));
      }
    }
    Ok(table)
  }
}

/// 服务运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeMode {
  /// 单线程开发模式，可通过接口关闭
  Development,
  /// 生产模式，固定数量的工作线程
  Production { workers: usize },
}

impl ServeMode {
  pub fn workers(&self) -> usize {
    match self {
      ServeMode::Development => 1,
      ServeMode::Production { workers } => (*workers).max(1),
    }
  }
}

/// 服务配置，启动时由命令行参数构造
#[derive(Debug, Clone)]
pub struct ServiceConfig {
  pub listen: SocketAddr,
  pub mode: ServeMode,
  pub use_gpu: bool,
  pub temp_dir: PathBuf,
  pub keep_files: bool,
  pub rotate_boxes: bool,
  pub winding: Winding,
}

impl ServiceConfig {
  pub fn retention(&self) -> Retention {
    if self.keep_files {
      Retention::Keep
    } else {
      Retention::Delete
    }
  }
}
