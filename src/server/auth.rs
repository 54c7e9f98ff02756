// 该文件是 Zhanjian （站检） 项目的一部分。
// src/server/auth.rs - Bearer 令牌认证
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
  extract::{Request, State},
  http::header,
  middleware::Next,
  response::Response,
};
use tracing::warn;

use super::{AppState, error::ApiError};

/// 令牌对应的调用方身份，认证通过后放入请求扩展
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(pub String);

/// 从 `Authorization` 头中取出 Bearer 令牌
pub fn bearer_token(value: &str) -> Option<&str> {
  let (scheme, token) = value.trim().split_once(' ')?;
  let token = token.trim();
  (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

pub async fn require_token(
  State(state): State<AppState>,
  mut request: Request,
  next: Next,
) -> Result<Response, ApiError> {
  let identity = request
    .headers()
    .get(header::AUTHORIZATION)
    .and_then(|value| value.to_str().ok())
    .and_then(bearer_token)
    .and_then(|token| state.tokens.verify(token))
    .map(str::to_string);

  match identity {
    Some(identity) => {
      request.extensions_mut().insert(Identity(identity));
      Ok(next.run(request).await)
    }
    None => {
      warn!("拒绝未认证请求: {}", request.uri().path());
      Err(ApiError::Unauthorized)
    }
  }
}
