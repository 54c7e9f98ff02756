// 该文件是 Zhanjian （站检） 项目的一部分。
// src/pipeline/rotate.rs - 按 EXIF 方向回转检测框
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

use image::{ImageDecoder, ImageReader, metadata::Orientation};
use thiserror::Error;
use tracing::{debug, warn};

use crate::detection::{BoundingBox, DetectionSet, Polygon, Winding};

/// 无方向标签
pub const EXIF_UNSPECIFIED: u16 = 0;
pub const EXIF_NORMAL: u16 = 1;
pub const EXIF_ROTATE_180: u16 = 3;
pub const EXIF_ROTATE_90: u16 = 6;
pub const EXIF_ROTATE_270: u16 = 8;

#[derive(Error, Debug)]
pub enum OrientationError {
  #[error("无法打开图像 {path}: {source}")]
  Open {
    path: String,
    source: std::io::Error,
  },
  #[error("无法解析图像 {path}: {source}")]
  Decode {
    path: String,
    source: image::ImageError,
  },
}

/// EXIF 方向与摆正后的宽高
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOrientation {
  pub exif: u16,
  pub width: u32,
  pub height: u32,
}

fn exif_code(orientation: Orientation) -> u16 {
  match orientation {
    Orientation::NoTransforms => EXIF_NORMAL,
    Orientation::FlipHorizontal => 2,
    Orientation::Rotate180 => EXIF_ROTATE_180,
    Orientation::FlipVertical => 4,
    Orientation::Rotate90FlipH => 5,
    Orientation::Rotate90 => EXIF_ROTATE_90,
    Orientation::Rotate270FlipH => 7,
    Orientation::Rotate270 => EXIF_ROTATE_270,
  }
}

/// 读取 EXIF 方向（标签 274）和按该方向摆正后的图像尺寸
///
/// 检测器看到的是摆正后的画面，5-8 号方向需交换原始宽高。
pub fn read_orientation(path: &Path) -> Result<ImageOrientation, OrientationError> {
  let shown = path.display().to_string();
  let decode_err = |source| OrientationError::Decode {
    path: shown.clone(),
    source,
  };

  let reader = ImageReader::open(path)
    .map_err(|source| OrientationError::Open {
      path: shown.clone(),
      source,
    })?
    .with_guessed_format()
    .map_err(|source| OrientationError::Open {
      path: shown.clone(),
      source,
    })?;
  let mut decoder = reader.into_decoder().map_err(decode_err)?;
  let (raw_width, raw_height) = decoder.dimensions();
  let exif = exif_code(decoder.orientation().map_err(decode_err)?);
  let (width, height) = if swaps_axes(exif) {
    (raw_height, raw_width)
  } else {
    (raw_width, raw_height)
  };

  debug!(
    "图像 {}: 原始 {}x{}, EXIF 方向 {}",
    shown, raw_width, raw_height, exif
  );
  Ok(ImageOrientation {
    exif,
    width,
    height,
  })
}

fn swaps_axes(exif: u16) -> bool {
  (5..=8).contains(&exif)
}

/// 把检测器坐标系中的多边形映射回原始图像像素空间
///
/// `height`/`width` 为检测器画面（摆正后）的尺寸。只处理 0/1/3/6/8 五种方向，
/// 其余方向码按原样输出包围框。
pub fn rotate_polygon(
  polygon: &Polygon,
  exif: u16,
  height: u32,
  width: u32,
  winding: Winding,
) -> Polygon {
  let b = BoundingBox::enclosing(polygon);
  let (w, h) = (
    i32::try_from(width).unwrap_or(i32::MAX),
    i32::try_from(height).unwrap_or(i32::MAX),
  );

  let rotated = match exif {
    EXIF_UNSPECIFIED | EXIF_NORMAL => b,
    EXIF_ROTATE_90 => BoundingBox {
      x_min: b.y_min,
      x_max: b.y_max,
      y_min: w.saturating_sub(b.x_max),
      y_max: w.saturating_sub(b.x_min),
    },
    EXIF_ROTATE_180 => BoundingBox {
      x_min: w.saturating_sub(b.x_max),
      x_max: w.saturating_sub(b.x_min),
      y_min: h.saturating_sub(b.y_max),
      y_max: h.saturating_sub(b.y_min),
    },
    EXIF_ROTATE_270 => BoundingBox {
      x_min: h.saturating_sub(b.y_max),
      x_max: h.saturating_sub(b.y_min),
      y_min: b.x_min,
      y_max: b.x_max,
    },
    _ => b,
  };

  rotated.corners(winding)
}

/// 对整组检测结果应用回转
pub fn rotate_detections(
  set: DetectionSet,
  orientation: &ImageOrientation,
  winding: Winding,
) -> DetectionSet {
  if !matches!(
    orientation.exif,
    EXIF_UNSPECIFIED | EXIF_NORMAL | EXIF_ROTATE_90 | EXIF_ROTATE_180 | EXIF_ROTATE_270
  ) {
    warn!("不支持的 EXIF 方向 {}，检测框保持原样", orientation.exif);
  }

  set
    .into_iter()
    .map(|mut detection| {
      detection.polygon = rotate_polygon(
        &detection.polygon,
        orientation.exif,
        orientation.height,
        orientation.width,
        winding,
      );
      detection
    })
    .collect()
}
