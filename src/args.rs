// 该文件是 Zhanjian （站检） 项目的一部分。
// src/args.rs - 项目参数配置
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
  net::{IpAddr, Ipv4Addr, SocketAddr},
  path::PathBuf,
};

use clap::Parser;

use zhanjian::{
  config::{ServeMode, ServiceConfig},
  detection::Winding,
};

/// Zhanjian 站检目标检测服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址
  #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED), value_name = "HOST")]
  pub host: IpAddr,

  /// 监听端口
  #[arg(short, long, default_value_t = 8066, value_name = "PORT")]
  pub port: u16,

  /// 生产模式：多线程服务，关闭接口不可用
  #[arg(short = 'w', long)]
  pub prod: bool,

  /// 允许检测器使用 GPU
  #[arg(short = 'g', long)]
  pub use_gpu: bool,

  /// 临时图像目录
  #[arg(short, long, default_value = "temp_images", value_name = "DIR")]
  pub temp_dir: PathBuf,

  /// 请求结束后保留临时图像
  #[arg(short, long)]
  pub keep_files: bool,

  /// 生产模式下的工作线程数
  #[arg(short, long, default_value_t = 4, value_name = "COUNT")]
  pub num_threads: usize,

  /// 访问令牌文件
  #[arg(long, default_value = "cfg/tokens.json", value_name = "FILE")]
  pub tokens: PathBuf,

  /// 置信度阈值文件
  #[arg(long, default_value = "cfg/thresholds.json", value_name = "FILE")]
  pub thresholds: PathBuf,

  /// 模型表文件
  #[arg(long, default_value = "cfg/models.json", value_name = "FILE")]
  pub models: PathBuf,

  /// 日志目录，未指定时只输出到控制台
  #[arg(long, value_name = "DIR")]
  pub log_dir: Option<PathBuf>,

  /// 输出多边形按顺时针排列
  #[arg(long)]
  pub clockwise: bool,

  /// 不按 EXIF 方向回转检测框
  #[arg(long)]
  pub no_rotate_boxes: bool,
}

impl Args {
  pub fn mode(&self) -> ServeMode {
    if self.prod {
      ServeMode::Production {
        workers: self.num_threads,
      }
    } else {
      ServeMode::Development
    }
  }

  pub fn to_service_config(&self) -> ServiceConfig {
    ServiceConfig {
      listen: SocketAddr::new(self.host, self.port),
      mode: self.mode(),
      use_gpu: self.use_gpu,
      temp_dir: self.temp_dir.clone(),
      keep_files: self.keep_files,
      rotate_boxes: !self.no_rotate_boxes,
      winding: if self.clockwise {
        Winding::Clockwise
      } else {
        Winding::CounterClockwise
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Args::parse_from(["zhanjian"]).to_service_config();
    assert_eq!(config.listen.port(), 8066);
    assert_eq!(config.mode, ServeMode::Development);
    assert_eq!(config.temp_dir, PathBuf::from("temp_images"));
    assert!(!config.keep_files);
    assert!(config.rotate_boxes);
    assert_eq!(config.winding, Winding::CounterClockwise);
  }

  #[test]
  fn test_production_flags() {
    let args = Args::parse_from(["zhanjian", "-w", "-n", "8", "-p", "9000", "--clockwise", "-k"]);
    let config = args.to_service_config();
    assert_eq!(config.mode, ServeMode::Production { workers: 8 });
    assert_eq!(config.listen.port(), 9000);
    assert_eq!(config.winding, Winding::Clockwise);
    assert!(config.keep_files);
  }
}
