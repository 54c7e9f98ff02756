// 该文件是 Zhanjian （站检） 项目的一部分。
// src/pipeline.rs - 检测结果后处理
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

//! 原始检测输出依次经过：归一化 -> 置信度分级 -> 坐标回转 -> 类别过滤。

mod classify;
mod filter;
mod normalize;
mod rotate;

pub use self::classify::{classify, confidence_band};
pub use self::filter::filter_classes;
pub use self::normalize::{NormalizeError, normalize};
pub use self::rotate::{
  EXIF_NORMAL, EXIF_ROTATE_90, EXIF_ROTATE_180, EXIF_ROTATE_270, EXIF_UNSPECIFIED,
  ImageOrientation, OrientationError, read_orientation, rotate_detections, rotate_polygon,
};
