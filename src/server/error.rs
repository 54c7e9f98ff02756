// 该文件是 Zhanjian （站检） 项目的一部分。
// src/server/error.rs - 接口错误与响应
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

use axum::{
  Json,
  http::{StatusCode, header},
  response::{IntoResponse, Response},
};
use axum_extra::extract::multipart::MultipartError;
use serde_json::json;
use thiserror::Error;
use tokio::sync::AcquireError;
use tracing::error;

use crate::{
  orchestrator::OrchestratorError, pipeline::OrientationError, registry::RegistryError,
};

pub const UNAUTHORIZED_BODY: &str = "Unauthorized Access";

#[derive(Error, Debug)]
pub enum ApiError {
  #[error("Unauthorized Access")]
  Unauthorized,
  #[error("请求中缺少 image 字段")]
  MissingImage,
  #[error("无法读取上传内容: {0}")]
  Multipart(#[from] MultipartError),
  #[error(transparent)]
  Orchestrator(#[from] OrchestratorError),
  #[error("检测任务异常退出: {0}")]
  Join(#[from] tokio::task::JoinError),
  #[error("服务正在关闭")]
  Closed(#[from] AcquireError),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
      ApiError::MissingImage => StatusCode::BAD_REQUEST,
      ApiError::Multipart(e) => e.status(),
      ApiError::Orchestrator(e) => orchestrator_status(e),
      ApiError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
      ApiError::Closed(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
  }
}

fn orchestrator_status(err: &OrchestratorError) -> StatusCode {
  match err {
    OrchestratorError::Artifact(e) if e.is_input_error() => StatusCode::BAD_REQUEST,
    OrchestratorError::Registry(RegistryError::UnknownModel { .. }) => StatusCode::NOT_FOUND,
    // 上传内容无法解码为图像
    OrchestratorError::Orientation(OrientationError::Decode { .. }) => StatusCode::BAD_REQUEST,
    _ => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if let ApiError::Unauthorized = self {
      return (
        status,
        [(header::WWW_AUTHENTICATE, "Bearer realm=\"Authentication Required\"")],
        UNAUTHORIZED_BODY,
      )
        .into_response();
    }

    if status.is_server_error() {
      error!("请求失败: {}", self);
    }
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{artifact::ArtifactError, config::ConfigError};

  #[test]
  fn test_status_mapping() {
    assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(ApiError::MissingImage.status(), StatusCode::BAD_REQUEST);

    let unsupported = OrchestratorError::Artifact(ArtifactError::UnsupportedExtension("txt".into()));
    assert_eq!(ApiError::from(unsupported).status(), StatusCode::BAD_REQUEST);

    let unknown = OrchestratorError::Registry(RegistryError::UnknownModel {
      model: "unknown_model".into(),
      available: vec![],
    });
    assert_eq!(ApiError::from(unknown).status(), StatusCode::NOT_FOUND);

    let missing = OrchestratorError::Config(ConfigError::MissingThreshold("grounding".into()));
    assert_eq!(ApiError::from(missing).status(), StatusCode::INTERNAL_SERVER_ERROR);
  }
}
