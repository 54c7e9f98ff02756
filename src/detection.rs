// 该文件是 Zhanjian （站检） 项目的一部分。
// src/detection.rs - 检测结果定义
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

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// 多边形顶点数量
pub const POLYGON_POINTS: usize = 4;

/// 坐标绝对值上限，超出视为检测器输出异常
pub const MAX_COORDINATE: f64 = 1_000_000.0;

/// 像素坐标点，序列化为 `[x, y]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
  pub x: i32,
  pub y: i32,
}

impl Point {
  pub fn new(x: i32, y: i32) -> Self {
    Self { x, y }
  }
}

impl Serialize for Point {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    [self.x, self.y].serialize(serializer)
  }
}

pub type Polygon = [Point; POLYGON_POINTS];

/// 轴对齐包围框 [x_min, y_min, x_max, y_max]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
  pub x_min: i32,
  pub y_min: i32,
  pub x_max: i32,
  pub y_max: i32,
}

impl BoundingBox {
  pub fn enclosing(polygon: &Polygon) -> Self {
    let xs = polygon.iter().map(|p| p.x);
    let ys = polygon.iter().map(|p| p.y);
    Self {
      x_min: xs.clone().min().unwrap_or_default(),
      x_max: xs.max().unwrap_or_default(),
      y_min: ys.clone().min().unwrap_or_default(),
      y_max: ys.max().unwrap_or_default(),
    }
  }

  /// 展开为四个角点
  pub fn corners(&self, winding: Winding) -> Polygon {
    let (x0, y0, x1, y1) = (self.x_min, self.y_min, self.x_max, self.y_max);
    match winding {
      Winding::Clockwise => [
        Point::new(x0, y0),
        Point::new(x1, y0),
        Point::new(x1, y1),
        Point::new(x0, y1),
      ],
      Winding::CounterClockwise => [
        Point::new(x0, y0),
        Point::new(x0, y1),
        Point::new(x1, y1),
        Point::new(x1, y0),
      ],
    }
  }
}

/// 角点的环绕顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Winding {
  Clockwise,
  /// 左上、左下、右下、右上
  #[default]
  CounterClockwise,
}

/// 置信度区间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
  Low,
  High,
}

/// 单个检测目标
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  #[serde(rename = "class")]
  pub class_name: String,
  #[serde(rename = "conf", serialize_with = "as_display")]
  pub confidence: f64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub conf_interval: Option<ConfidenceBand>,
  #[serde(rename = "coordinates")]
  pub polygon: Polygon,
  #[serde(
    skip_serializing_if = "Option::is_none",
    serialize_with = "optional_as_display"
  )]
  pub frame: Option<u64>,
}

fn as_display<S: Serializer, T: std::fmt::Display>(
  value: &T,
  serializer: S,
) -> Result<S::Ok, S::Error> {
  serializer.collect_str(value)
}

fn optional_as_display<S: Serializer, T: std::fmt::Display>(
  value: &Option<T>,
  serializer: S,
) -> Result<S::Ok, S::Error> {
  match value {
    Some(value) => serializer.collect_str(value),
    None => serializer.serialize_none(),
  }
}

/// 单张图像的检测结果，空序列表示未检测到目标
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DetectionSet {
  pub items: Vec<Detection>,
}

impl DetectionSet {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl From<Vec<Detection>> for DetectionSet {
  fn from(items: Vec<Detection>) -> Self {
    Self { items }
  }
}

impl FromIterator<Detection> for DetectionSet {
  fn from_iter<I: IntoIterator<Item = Detection>>(iter: I) -> Self {
    Self {
      items: iter.into_iter().collect(),
    }
  }
}

impl IntoIterator for DetectionSet {
  type Item = Detection;
  type IntoIter = std::vec::IntoIter<Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.into_iter()
  }
}

/// 检测器输出中的数值字段，既可能是字符串也可能是数字
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
  Number(f64),
  Text(String),
}

impl Scalar {
  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Scalar::Number(value) => Some(*value),
      Scalar::Text(text) => text.trim().parse().ok(),
    }
  }
}

impl From<f64> for Scalar {
  fn from(value: f64) -> Self {
    Scalar::Number(value)
  }
}

/// 检测器原生格式的单条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
  #[serde(rename = "class")]
  pub class_name: String,
  pub conf: Scalar,
  #[serde(default)]
  pub coordinates: Vec<[Scalar; 2]>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub frame: Option<Scalar>,
}

/// 检测器原生输出：源路径 -> 检测记录列表
pub type RawDetections = BTreeMap<String, Vec<RawDetection>>;

#[derive(Error, Debug, PartialEq)]
pub enum DetectionError {
  #[error("置信度无效: {0}")]
  InvalidConfidence(String),
  #[error("多边形应包含 {POLYGON_POINTS} 个点，实际为 {0}")]
  PointCount(usize),
  #[error("坐标无效: {0}")]
  InvalidCoordinate(String),
  #[error("帧序号无效: {0}")]
  InvalidFrame(String),
}

fn describe(scalar: &Scalar) -> String {
  match scalar {
    Scalar::Number(value) => value.to_string(),
    Scalar::Text(text) => text.clone(),
  }
}

fn coordinate(scalar: &Scalar) -> Result<i32, DetectionError> {
  scalar
    .as_f64()
    .filter(|v| v.is_finite() && v.abs() <= MAX_COORDINATE)
    .map(|v| v.round() as i32)
    .ok_or_else(|| DetectionError::InvalidCoordinate(describe(scalar)))
}

impl TryFrom<RawDetection> for Detection {
  type Error = DetectionError;

  fn try_from(raw: RawDetection) -> Result<Self, Self::Error> {
    let confidence = raw
      .conf
      .as_f64()
      .filter(|c| (0.0..=1.0).contains(c))
      .ok_or_else(|| DetectionError::InvalidConfidence(describe(&raw.conf)))?;

    if raw.coordinates.len() != POLYGON_POINTS {
      return Err(DetectionError::PointCount(raw.coordinates.len()));
    }
    let mut polygon = [Point::new(0, 0); POLYGON_POINTS];
    for (slot, [x, y]) in polygon.iter_mut().zip(raw.coordinates.iter()) {
      *slot = Point::new(coordinate(x)?, coordinate(y)?);
    }

    let frame = match &raw.frame {
      Some(frame) => Some(
        frame
          .as_f64()
          .filter(|f| *f >= 0.0 && f.fract() == 0.0)
          .map(|f| f as u64)
          .ok_or_else(|| DetectionError::InvalidFrame(describe(frame)))?,
      ),
      None => None,
    };

    Ok(Detection {
      class_name: raw.class_name,
      confidence,
      conf_interval: None,
      polygon,
      frame,
    })
  }
}
