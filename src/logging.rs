// 该文件是 Zhanjian （站检） 项目的一部分。
// src/logging.rs - 日志初始化
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

use tracing_appender::{
  non_blocking::WorkerGuard,
  rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_NAME: &str = "zhanjian.log";

const DEFAULT_FILTER: &str = "info,hyper=warn,tower_http=info";

fn env_filter() -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// 初始化日志：控制台输出，指定目录时另按天写入日志文件
///
/// 返回的 guard 需在 main 中保持存活，否则后台写线程会提前退出。
pub fn init_logging(log_dir: Option<&Path>) -> std::io::Result<Option<WorkerGuard>> {
  let console_layer = fmt::layer().with_target(true);

  let Some(log_dir) = log_dir else {
    tracing_subscriber::registry()
      .with(env_filter())
      .with(console_layer)
      .init();
    return Ok(None);
  };

  std::fs::create_dir_all(log_dir)?;
  let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_NAME);
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let file_layer = fmt::layer()
    .with_writer(writer)
    .with_ansi(false)
    .with_thread_ids(true)
    .with_line_number(true);

  tracing_subscriber::registry()
    .with(env_filter())
    .with(console_layer)
    .with(file_layer)
    .init();
  Ok(Some(guard))
}
