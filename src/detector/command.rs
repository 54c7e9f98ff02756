// 该文件是 Zhanjian （站检） 项目的一部分。
// src/detector/command.rs - 外部推理进程检测器
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

use std::{
  io::{ErrorKind, Write},
  path::{Path, PathBuf},
  process::{Command, Stdio},
  time::Instant,
};

use tracing::{debug, error};
use url::Url;

use super::{Detector, DetectorError, decoded_path};
use crate::{FromUrl, FromUrlWithScheme, config::DetectorParams, detection::RawDetections};

/// 调用外部推理程序的检测器
///
/// 进程参数为 url 中的 `arg` 查询项，最后追加图像路径；推理参数以 JSON
/// 写入标准输入，标准输出须为 `{源路径: [检测记录]}`。
#[derive(Debug, Clone)]
pub struct CommandDetector {
  program: PathBuf,
  args: Vec<String>,
  params: DetectorParams,
  use_gpu: bool,
}

impl FromUrlWithScheme for CommandDetector {
  const SCHEME: &'static str = "command";
}

impl FromUrl for CommandDetector {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetectorError::SchemeMismatch(url.scheme().to_string()));
    }

    let args = url
      .query_pairs()
      .filter(|(k, _)| k == "arg")
      .map(|(_, v)| v.into_owned())
      .collect();

    Ok(CommandDetector {
      program: decoded_path(url)?,
      args,
      params: DetectorParams::default(),
      use_gpu: false,
    })
  }
}

impl CommandDetector {
  pub fn params(mut self, params: DetectorParams) -> Self {
    self.params = params;
    self
  }

  pub fn use_gpu(mut self, use_gpu: bool) -> Self {
    self.use_gpu = use_gpu;
    self
  }

  fn effective_params(&self) -> DetectorParams {
    let mut params = self.params.clone();
    if !self.use_gpu {
      params.device = "cpu".to_string();
    }
    params
  }

  fn io_err(&self, source: std::io::Error) -> DetectorError {
    DetectorError::Io {
      path: self.program.clone(),
      source,
    }
  }
}

impl Detector for CommandDetector {
  fn predict(&self, image: &Path) -> Result<RawDetections, DetectorError> {
    let mut command = Command::new(&self.program);
    command
      .args(&self.args)
      .arg(image)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    if !self.use_gpu {
      command.env("CUDA_VISIBLE_DEVICES", "-1");
    }

    debug!("启动检测进程: {} {:?} {}", self.program.display(), self.args, image.display());
    let now = Instant::now();
    let mut child = command.spawn().map_err(|e| self.io_err(e))?;

    let params = serde_json::to_vec(&self.effective_params())?;
    if let Some(mut stdin) = child.stdin.take() {
      // 进程可能不读取参数就退出
      match stdin.write_all(&params) {
        Err(e) if e.kind() != ErrorKind::BrokenPipe => return Err(self.io_err(e)),
        _ => {}
      }
    }

    let output = child.wait_with_output().map_err(|e| self.io_err(e))?;
    debug!("检测进程结束，耗时: {:.2?}", now.elapsed());

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
      error!("检测进程失败 ({}): {}", output.status, stderr);
      return Err(DetectorError::Failed {
        status: output.status.to_string(),
        stderr,
      });
    }

    Ok(serde_json::from_slice(&output.stdout)?)
  }
}
