// 该文件是 Zhanjian （站检） 项目的一部分。
// src/detector.rs - 检测器能力接口
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, config::DetectorParams, detection::RawDetections};

/// 检测器：输入图像路径，输出 源路径 -> 原始检测记录
pub trait Detector: Send + Sync {
  fn predict(&self, image: &Path) -> Result<RawDetections, DetectorError>;
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("检测器路径错误: {0}")]
  InvalidPath(String),
  #[error("I/O 错误 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("检测器进程退出异常 ({status}): {stderr}")]
  Failed { status: String, stderr: String },
  #[error("检测器输出无法解析: {0}")]
  InvalidOutput(#[from] serde_json::Error),
}

/// url 路径部分解码为本地路径
pub(crate) fn decoded_path(url: &Url) -> Result<PathBuf, DetectorError> {
  let path = urlencoding::decode(url.path())
    .map_err(|e| DetectorError::InvalidPath(format!("{}: {}", url, e)))?;
  if path.is_empty() || path == "/" {
    return Err(DetectorError::InvalidPath(url.to_string()));
  }
  Ok(PathBuf::from(path.into_owned()))
}

mod command;
mod fixture;

pub use self::command::CommandDetector;
pub use self::fixture::FixtureDetector;

/// 按 URI 方案选择的检测器实现
#[derive(Debug)]
pub enum DetectorWrapper {
  Command(CommandDetector),
  Fixture(FixtureDetector),
}

impl FromUrl for DetectorWrapper {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      CommandDetector::SCHEME => Ok(DetectorWrapper::Command(CommandDetector::from_url(url)?)),
      FixtureDetector::SCHEME => Ok(DetectorWrapper::Fixture(FixtureDetector::from_url(url)?)),
      other => Err(DetectorError::SchemeMismatch(other.to_string())),
    }
  }
}

impl DetectorWrapper {
  /// 推理参数与 GPU 开关只对外部进程检测器生效
  pub fn configure(self, params: DetectorParams, use_gpu: bool) -> Self {
    match self {
      DetectorWrapper::Command(detector) => {
        DetectorWrapper::Command(detector.params(params).use_gpu(use_gpu))
      }
      fixture @ DetectorWrapper::Fixture(_) => fixture,
    }
  }
}

impl Detector for DetectorWrapper {
  fn predict(&self, image: &Path) -> Result<RawDetections, DetectorError> {
    match self {
      DetectorWrapper::Command(detector) => detector.predict(image),
      DetectorWrapper::Fixture(detector) => detector.predict(image),
    }
  }
}
