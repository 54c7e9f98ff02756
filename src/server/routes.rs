// 该文件是 Zhanjian （站检） 项目的一部分。
// src/server/routes.rs - 接口处理函数
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
  Extension, Json,
  extract::{RawQuery, State},
};
use axum_extra::extract::Multipart;
use tracing::info;
use uuid::Uuid;

use super::{AppState, auth::Identity, error::ApiError};
use crate::{
  config::ServeMode,
  detection::DetectionSet,
  orchestrator::{ModelResults, Orchestrator, OrchestratorError, UploadedImage},
};

/// 上传图像所在的表单字段
pub const IMAGE_FIELD: &str = "image";

async fn read_image(mut multipart: Multipart) -> Result<UploadedImage, ApiError> {
  while let Some(field) = multipart.next_field().await? {
    if field.name() != Some(IMAGE_FIELD) {
      continue;
    }
    let file_name = field.file_name().unwrap_or_default().to_string();
    let bytes = field.bytes().await?;
    return Ok(UploadedImage {
      file_name,
      bytes: bytes.to_vec(),
    });
  }
  Err(ApiError::MissingImage)
}

/// 查询串中按顺序出现的 `model` 参数
pub fn requested_models(query: Option<&str>) -> Vec<String> {
  url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
    .filter(|(key, _)| key == "model")
    .map(|(_, value)| value.into_owned())
    .collect()
}

/// 在阻塞线程池中执行检测，并发数受信号量限制
async fn run_blocking<T, F>(state: &AppState, job: F) -> Result<T, ApiError>
where
  T: Send + 'static,
  F: FnOnce(&Orchestrator) -> Result<T, OrchestratorError> + Send + 'static,
{
  let _permit = state.limiter.acquire().await?;
  let orchestrator = state.orchestrator.clone();
  Ok(tokio::task::spawn_blocking(move || job(orchestrator.as_ref())).await??)
}

pub async fn multiple_models(
  State(state): State<AppState>,
  Extension(identity): Extension<Identity>,
  RawQuery(query): RawQuery,
  multipart: Multipart,
) -> Result<Json<ModelResults>, ApiError> {
  let models = requested_models(query.as_deref());
  let image = read_image(multipart).await?;
  let request = Uuid::new_v4();
  info!(
    "请求 {} 来自 {}: 多模型检测 [{}]，文件 {}",
    request,
    identity.0,
    models.join(", "),
    image.file_name
  );

  let results = run_blocking(&state, move |o| o.run(request, &image, &models)).await?;
  Ok(Json(results))
}

pub async fn single_model(
  state: AppState,
  identity: Identity,
  model: String,
  multipart: Multipart,
) -> Result<Json<DetectionSet>, ApiError> {
  let image = read_image(multipart).await?;
  let request = Uuid::new_v4();
  info!(
    "请求 {} 来自 {}: 模型 {}，文件 {}",
    request, identity.0, model, image.file_name
  );

  let set = run_blocking(&state, move |o| o.run_single(request, &image, &model)).await?;
  Ok(Json(set))
}

pub async fn shutdown(
  State(state): State<AppState>,
  Extension(identity): Extension<Identity>,
) -> &'static str {
  info!("{} 请求关闭服务", identity.0);
  match state.mode {
    ServeMode::Development => {
      state.shutdown.notify_one();
      "Server shutting down"
    }
    ServeMode::Production { .. } => "Shutdown method not available in production mode",
  }
}
