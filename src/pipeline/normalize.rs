// 该文件是 Zhanjian （站检） 项目的一部分。
// src/pipeline/normalize.rs - 检测器输出归一化
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

use thiserror::Error;
use tracing::debug;

use crate::detection::{Detection, DetectionError, DetectionSet, RawDetections};

#[derive(Error, Debug, PartialEq)]
pub enum NormalizeError {
  #[error("检测器返回了 {0} 个源路径，期望最多 1 个")]
  MultipleSources(usize),
  #[error("源 {source_path} 的检测记录无效: {error}")]
  InvalidDetection {
    source_path: String,
    error: DetectionError,
  },
}

/// 将 源路径 -> 检测记录 的映射折叠为单一检测序列
///
/// `take_first` 为真时只接受单一源路径（编排器每次只提交一张图像），
/// 多于一个源路径视为错误；为假时按源路径顺序拼接全部记录。
pub fn normalize(raw: RawDetections, take_first: bool) -> Result<DetectionSet, NormalizeError> {
  if take_first && raw.len() > 1 {
    return Err(NormalizeError::MultipleSources(raw.len()));
  }

  let mut items = Vec::new();
  for (source_path, records) in raw {
    debug!("源 {} 返回 {} 条检测记录", source_path, records.len());
    for record in records {
      let detection = Detection::try_from(record).map_err(|error| {
        NormalizeError::InvalidDetection {
          source_path: source_path.clone(),
          error,
        }
      })?;
      items.push(detection);
    }
  }

  Ok(DetectionSet::from(items))
}
