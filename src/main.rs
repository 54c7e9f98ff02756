// 该文件是 Zhanjian （站检） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::{sync::Arc, thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use zhanjian::{
  artifact::ArtifactManager,
  config::{ModelTable, ServeMode, ThresholdConfig, TokenStore},
  logging::init_logging,
  orchestrator::{Orchestrator, PipelineOptions},
  registry::ModelRegistry,
  server::{AppState, serve},
};

fn main() -> Result<()> {
  let args = args::Args::parse();
  let _guard = init_logging(args.log_dir.as_deref()).context("无法初始化日志")?;
  let config = args.to_service_config();

  info!("Zhanjian 站检目标检测服务");
  info!("监听地址: {}", config.listen);
  info!("运行模式: {:?}", config.mode);
  info!("临时目录: {}", config.temp_dir.display());

  let tokens = TokenStore::load(&args.tokens)?;
  let thresholds = ThresholdConfig::load(&args.thresholds)?;
  let table = ModelTable::load(&args.models)?;

  if !config.use_gpu {
    info!("未启用 GPU，检测器将以 CPU 运行");
  }
  let registry = ModelRegistry::from_table(&table, config.use_gpu)?;
  registry.check_thresholds(&thresholds);
  info!("已注册 {} 个模型", registry.len());

  let orchestrator = Orchestrator::new(
    Arc::new(registry),
    Arc::new(thresholds),
    ArtifactManager::new(&config.temp_dir, config.retention())?,
    PipelineOptions::from(&config),
  );
  let state = AppState::new(orchestrator, tokens, config.mode);

  let shutdown = state.shutdown.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    shutdown.notify_one();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置中断信号处理")?;

  let runtime = match config.mode {
    ServeMode::Development => tokio::runtime::Builder::new_current_thread(),
    ServeMode::Production { .. } => {
      let mut builder = tokio::runtime::Builder::new_multi_thread();
      builder.worker_threads(config.mode.workers());
      builder
    }
  }
  .enable_all()
  .build()
  .context("无法创建异步运行时")?;

  runtime.block_on(serve(config.listen, state))?;
  info!("服务已关闭");
  Ok(())
}
