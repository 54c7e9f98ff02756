// 该文件是 Zhanjian （站检） 项目的一部分。
// src/pipeline/classify.rs - 置信度分级
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

use tracing::debug;

use crate::{
  config::Thresholds,
  detection::{ConfidenceBand, DetectionSet},
};

/// 低于 `low` 为低置信度，其余均为高置信度；`high` 不参与分级
pub fn confidence_band(confidence: f64, thresholds: &Thresholds) -> ConfidenceBand {
  if confidence < thresholds.low {
    ConfidenceBand::Low
  } else {
    ConfidenceBand::High
  }
}

/// 标注置信度区间并丢弃低置信度目标
pub fn classify(set: DetectionSet, thresholds: &Thresholds) -> DetectionSet {
  let total = set.len();
  let kept: DetectionSet = set
    .into_iter()
    .filter_map(|mut detection| {
      let band = confidence_band(detection.confidence, thresholds);
      detection.conf_interval = Some(band);
      (band != ConfidenceBand::Low).then_some(detection)
    })
    .collect();
  debug!("置信度分级: 保留 {}/{}", kept.len(), total);
  kept
}
