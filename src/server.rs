// 该文件是 Zhanjian （站检） 项目的一部分。
// src/server.rs - HTTP 服务
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

mod auth;
mod error;
mod routes;

use std::{net::SocketAddr, sync::Arc};

use axum::{
  Extension, Router,
  extract::{DefaultBodyLimit, State},
  middleware,
  routing::post,
};
use axum_extra::extract::Multipart;
use tokio::sync::{Notify, Semaphore};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use auth::{Identity, bearer_token};
pub use error::ApiError;
pub use routes::{IMAGE_FIELD, requested_models};

use crate::{
  config::{ServeMode, TokenStore, validate_model_name},
  orchestrator::Orchestrator,
};

/// 上传大小上限
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub const MULTIPLE_MODELS_ROUTE: &str = "/multiple_models";
pub const SHUTDOWN_ROUTE: &str = "/shutdown_server_for_maintenance";

/// 各处理函数共享的只读状态
#[derive(Clone)]
pub struct AppState {
  pub orchestrator: Arc<Orchestrator>,
  pub tokens: Arc<TokenStore>,
  pub limiter: Arc<Semaphore>,
  pub mode: ServeMode,
  pub shutdown: Arc<Notify>,
}

impl AppState {
  pub fn new(orchestrator: Orchestrator, tokens: TokenStore, mode: ServeMode) -> Self {
    Self {
      orchestrator: Arc::new(orchestrator),
      tokens: Arc::new(tokens),
      limiter: Arc::new(Semaphore::new(mode.workers())),
      mode,
      shutdown: Arc::new(Notify::new()),
    }
  }
}

/// 为每个已注册模型生成 `/<模型名>` 路由，另加多模型与关闭接口
pub fn router(state: AppState) -> Router {
  let mut router = Router::new()
    .route(MULTIPLE_MODELS_ROUTE, post(routes::multiple_models))
    .route(SHUTDOWN_ROUTE, post(routes::shutdown));

  let names: Vec<String> = state
    .orchestrator
    .registry()
    .names()
    .map(str::to_string)
    .collect();
  for name in names {
    if let Err(e) = validate_model_name(&name) {
      warn!("跳过模型路由: {}", e);
      continue;
    }
    let model = name.clone();
    router = router.route(
      &format!("/{name}"),
      post(
        move |State(state): State<AppState>,
              Extension(identity): Extension<Identity>,
              multipart: Multipart| {
          routes::single_model(state, identity, model.clone(), multipart)
        },
      ),
    );
  }

  router
    .layer(middleware::from_fn_with_state(
      state.clone(),
      auth::require_token,
    ))
    .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// 监听并服务，直到收到关闭通知
pub async fn serve(listen: SocketAddr, state: AppState) -> std::io::Result<()> {
  let shutdown = state.shutdown.clone();
  let app = router(state);

  let listener = tokio::net::TcpListener::bind(listen).await?;
  info!("服务已启动: http://{}", listener.local_addr()?);

  axum::serve(listener, app)
    .with_graceful_shutdown(async move {
      shutdown.notified().await;
      info!("正在关闭服务...");
    })
    .await
}

#[cfg(test)]
mod tests {
  use std::{collections::HashMap, path::Path};

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use serde_json::Value;
  use tower::ServiceExt;

  use super::*;
  use crate::{
    artifact::{ArtifactManager, Retention},
    orchestrator::{
      PipelineOptions,
      tests::{StubDetector, png_upload, raw, thresholds},
    },
    registry::ModelRegistry,
  };

  const TOKEN: &str = "secret-token";
  const BOUNDARY: &str = "zhanjian-boundary";

  fn state(dir: &Path, mode: ServeMode) -> AppState {
    let registry = ModelRegistry::builder()
      .model(
        "antenna_detection",
        "antenna_detection",
        vec![],
        StubDetector::returning(vec![
          raw("antenna", "0.9", [10, 20, 30, 40]),
          raw("antenna", "0.3", [50, 60, 70, 80]),
        ]),
      )
      .model(
        "screwnuts_detection",
        "screw_nuts",
        vec!["double_nut".to_string()],
        StubDetector::returning(vec![
          raw("single_nut", "0.9", [1, 1, 2, 2]),
          raw("double_nut", "0.9", [3, 3, 4, 4]),
        ]),
      )
      .build();
    let orchestrator = Orchestrator::new(
      Arc::new(registry),
      thresholds(),
      ArtifactManager::new(dir, Retention::Delete).unwrap(),
      PipelineOptions::default(),
    );
    let mut tokens = HashMap::new();
    tokens.insert(TOKEN.to_string(), "inspector".to_string());
    AppState::new(orchestrator, TokenStore::new(tokens), mode)
  }

  fn multipart_body(field: &str, file_name: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
      format!(
        "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n"
      )
      .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
  }

  fn upload_request(uri: &str, token: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri).header(
      header::CONTENT_TYPE,
      format!("multipart/form-data; boundary={BOUNDARY}"),
    );
    if let Some(token) = token {
      builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
  }

  fn image_request(uri: &str) -> Request<Body> {
    let image = png_upload();
    upload_request(uri, Some(TOKEN), multipart_body("image", &image.file_name, &image.bytes))
  }

  async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
      .await
      .unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  async fn text_body(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
      .await
      .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
  }

  #[tokio::test]
  async fn test_missing_token_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(state(dir.path(), ServeMode::Development));
    let image = png_upload();

    let response = app
      .clone()
      .oneshot(upload_request(
        "/antenna_detection",
        None,
        multipart_body("image", &image.file_name, &image.bytes),
      ))
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(text_body(response).await, "Unauthorized Access");

    let response = app
      .oneshot(upload_request(
        "/antenna_detection",
        Some("wrong"),
        multipart_body("image", &image.file_name, &image.bytes),
      ))
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn test_single_model_returns_array() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(state(dir.path(), ServeMode::Development));

    let response = app.oneshot(image_request("/antenna_detection")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["class"], "antenna");
    assert_eq!(items[0]["conf"], "0.9");
    assert_eq!(items[0]["conf_interval"], "high");
    assert_eq!(
      items[0]["coordinates"],
      serde_json::json!([[10, 20], [10, 40], [30, 40], [30, 20]])
    );
    assert!(items[0].get("frame").is_none());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
  }

  #[tokio::test]
  async fn test_multiple_models_returns_map() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(state(dir.path(), ServeMode::Production { workers: 2 }));

    let response = app
      .oneshot(image_request(
        "/multiple_models?model=screwnuts_detection&model=antenna_detection",
      ))
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let map = body.as_object().unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map["antenna_detection"].as_array().unwrap().len(), 1);
    let nuts = map["screwnuts_detection"].as_array().unwrap();
    assert_eq!(nuts.len(), 1);
    assert_eq!(nuts[0]["class"], "double_nut");
  }

  #[tokio::test]
  async fn test_unknown_model_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(state(dir.path(), ServeMode::Development));

    let response = app
      .oneshot(image_request(
        "/multiple_models?model=antenna_detection&model=unknown_model",
      ))
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("unknown_model"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
  }

  #[tokio::test]
  async fn test_missing_image_field() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(state(dir.path(), ServeMode::Development));
    let image = png_upload();

    let response = app
      .oneshot(upload_request(
        "/antenna_detection",
        Some(TOKEN),
        multipart_body("picture", &image.file_name, &image.bytes),
      ))
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["error"].is_string());
  }

  #[tokio::test]
  async fn test_unsupported_extension() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(state(dir.path(), ServeMode::Development));

    let response = app
      .oneshot(upload_request(
        "/antenna_detection",
        Some(TOKEN),
        multipart_body("image", "notes.txt", b"hello"),
      ))
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn test_reserved_model_name_is_not_mounted() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::builder()
      .model("multiple_models", "antenna_detection", vec![], StubDetector::returning(vec![]))
      .model("a/b", "antenna_detection", vec![], StubDetector::returning(vec![]))
      .build();
    let orchestrator = Orchestrator::new(
      Arc::new(registry),
      thresholds(),
      ArtifactManager::new(dir.path(), Retention::Delete).unwrap(),
      PipelineOptions::default(),
    );
    let mut tokens = HashMap::new();
    tokens.insert(TOKEN.to_string(), "inspector".to_string());
    let app = router(AppState::new(orchestrator, TokenStore::new(tokens), ServeMode::Development));

    let response = app.oneshot(image_request("/multiple_models")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, serde_json::json!({}));
  }

  #[test]
  fn test_builtin_routes_are_reserved() {
    for route in [MULTIPLE_MODELS_ROUTE, SHUTDOWN_ROUTE] {
      assert!(validate_model_name(route.trim_start_matches('/')).is_err());
    }
  }

  #[tokio::test]
  async fn test_shutdown_in_development() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path(), ServeMode::Development);
    let shutdown = state.shutdown.clone();
    let app = router(state);

    let request = Request::builder()
      .method("POST")
      .uri(SHUTDOWN_ROUTE)
      .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
      .body(Body::empty())
      .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text_body(response).await, "Server shutting down");
    // 通知已保存，等待方立即返回
    shutdown.notified().await;
  }

  #[tokio::test]
  async fn test_shutdown_in_production() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(state(dir.path(), ServeMode::Production { workers: 4 }));

    let request = Request::builder()
      .method("POST")
      .uri(SHUTDOWN_ROUTE)
      .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
      .body(Body::empty())
      .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
      text_body(response).await,
      "Shutdown method not available in production mode"
    );
  }
}
