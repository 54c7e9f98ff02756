// 该文件是 Zhanjian （站检） 项目的一部分。
// src/detector/fixture.rs - 回放检测记录的检测器
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

use std::path::Path;

use tracing::info;
use url::Url;

use super::{Detector, DetectorError, decoded_path};
use crate::{
  FromUrl, FromUrlWithScheme,
  detection::{RawDetection, RawDetections},
};

/// 从 JSON 文件加载一组检测记录，对任何输入图像都返回这组记录
#[derive(Debug, Clone)]
pub struct FixtureDetector {
  detections: Vec<RawDetection>,
}

impl FromUrlWithScheme for FixtureDetector {
  const SCHEME: &'static str = "fixture";
}

impl FromUrl for FixtureDetector {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetectorError::SchemeMismatch(url.scheme().to_string()));
    }

    let path = decoded_path(url)?;
    let content = std::fs::read(&path).map_err(|source| DetectorError::Io {
      path: path.clone(),
      source,
    })?;
    let detections: Vec<RawDetection> = serde_json::from_slice(&content)?;
    info!("加载回放检测记录 {} 条: {}", detections.len(), path.display());

    Ok(FixtureDetector { detections })
  }
}

impl FixtureDetector {
  pub fn new(detections: Vec<RawDetection>) -> Self {
    Self { detections }
  }
}

impl Detector for FixtureDetector {
  fn predict(&self, image: &Path) -> Result<RawDetections, DetectorError> {
    let mut result = RawDetections::new();
    result.insert(image.display().to_string(), self.detections.clone());
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_replay_keyed_by_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dish.json");
    std::fs::write(
      &path,
      r#"[{"class": "dish", "conf": "0.7", "coordinates": [[0,0],[0,9],[9,9],[9,0]]}]"#,
    )
    .unwrap();
    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file:", "fixture:", 1)).unwrap();

    let detector = FixtureDetector::from_url(&url).unwrap();
    let result = detector.predict(Path::new("/tmp/img.png")).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result["/tmp/img.png"][0].class_name, "dish");
  }

  #[test]
  fn test_missing_file() {
    let url = Url::parse("fixture:///definitely/not/here.json").unwrap();
    assert!(matches!(
      FixtureDetector::from_url(&url),
      Err(DetectorError::Io { .. })
    ));
  }
}
