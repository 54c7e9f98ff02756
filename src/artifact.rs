// 该文件是 Zhanjian （站检） 项目的一部分。
// src/artifact.rs - 请求临时图像文件管理
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
  fs::OpenOptions,
  io::Write,
  path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// 支持的图像扩展名
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "webp", "tif", "tiff"];

const RANDOM_SUFFIX_BOUND: u32 = 10_000_000;

#[derive(Error, Debug)]
pub enum ArtifactError {
  #[error("文件名缺少扩展名: {0:?}")]
  MissingExtension(String),
  #[error("不支持的图像扩展名: {0}")]
  UnsupportedExtension(String),
  #[error("无法创建临时目录 {path}: {source}")]
  CreateDir {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无法写入临时文件 {path}: {source}")]
  Write {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无法删除临时文件 {path}: {source}")]
  Remove {
    path: PathBuf,
    source: std::io::Error,
  },
}

impl ArtifactError {
  /// 是否由请求内容引起
  pub fn is_input_error(&self) -> bool {
    matches!(
      self,
      ArtifactError::MissingExtension(_) | ArtifactError::UnsupportedExtension(_)
    )
  }
}

/// 临时文件保留策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
  #[default]
  Delete,
  Keep,
}

/// 请求独占的临时图像文件
///
/// 在显式 [`TempArtifact::release`] 之前被丢弃时，同样按保留策略清理文件。
#[derive(Debug)]
pub struct TempArtifact {
  path: PathBuf,
  created_at: DateTime<Local>,
  owner: Uuid,
  retention: Retention,
  released: bool,
}

impl TempArtifact {
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn created_at(&self) -> DateTime<Local> {
    self.created_at
  }

  pub fn owner(&self) -> Uuid {
    self.owner
  }

  pub fn retention(&self) -> Retention {
    self.retention
  }

  /// 释放临时文件，保留策略为 `Keep` 时文件留在磁盘上
  pub fn release(mut self) -> Result<(), ArtifactError> {
    self.released = true;
    if self.retention == Retention::Keep {
      debug!("保留临时文件: {}", self.path.display());
      return Ok(());
    }
    std::fs::remove_file(&self.path).map_err(|source| ArtifactError::Remove {
      path: self.path.clone(),
      source,
    })?;
    debug!("已删除临时文件: {}", self.path.display());
    Ok(())
  }
}

impl Drop for TempArtifact {
  fn drop(&mut self) {
    if self.released || self.retention == Retention::Keep {
      return;
    }
    if let Err(e) = std::fs::remove_file(&self.path) {
      warn!("清理临时文件失败 {}: {}", self.path.display(), e);
    }
  }
}

/// 临时文件管理器
#[derive(Debug, Clone)]
pub struct ArtifactManager {
  directory: PathBuf,
  retention: Retention,
}

impl ArtifactManager {
  pub fn new(directory: impl Into<PathBuf>, retention: Retention) -> Result<Self, ArtifactError> {
    let directory = directory.into();
    std::fs::create_dir_all(&directory).map_err(|source| ArtifactError::CreateDir {
      path: directory.clone(),
      source,
    })?;
    Ok(Self {
      directory,
      retention,
    })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// 将上传的图像写入临时目录
  pub fn acquire(
    &self,
    bytes: &[u8],
    file_name: &str,
    prefix: &str,
    owner: Uuid,
  ) -> Result<TempArtifact, ArtifactError> {
    let extension = image_extension(file_name)?;
    let created_at = Local::now();
    let suffix = rand::thread_rng().gen_range(0..RANDOM_SUFFIX_BOUND);
    let name = format!(
      "{}_{}_{}.{}",
      prefix,
      created_at.format("%Y_%m_%d_%H_%M_%S_%6f"),
      suffix,
      extension
    );
    let path = self.directory.join(name);

    let write_err = |source| ArtifactError::Write {
      path: path.clone(),
      source,
    };
    let mut file = OpenOptions::new()
      .write(true)
      .create_new(true)
      .open(&path)
      .map_err(write_err)?;
    let artifact = TempArtifact {
      path: path.clone(),
      created_at,
      owner,
      retention: self.retention,
      released: false,
    };
    file.write_all(bytes).map_err(write_err)?;

    debug!(
      "请求 {} 的图像已保存: {} ({} 字节)",
      owner,
      path.display(),
      bytes.len()
    );
    Ok(artifact)
  }

  /// 按文件自身的保留策略释放
  pub fn release(&self, artifact: TempArtifact) -> Result<(), ArtifactError> {
    artifact.release()
  }
}

/// 取上传文件名最后一段扩展名并转为小写
pub fn image_extension(file_name: &str) -> Result<String, ArtifactError> {
  let extension = match file_name.rsplit_once('.') {
    Some((_, ext)) if !ext.is_empty() => ext.to_lowercase(),
    _ => return Err(ArtifactError::MissingExtension(file_name.to_string())),
  };
  if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
    return Err(ArtifactError::UnsupportedExtension(extension));
  }
  Ok(extension)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn manager(retention: Retention) -> (tempfile::TempDir, ArtifactManager) {
    let dir = tempfile::tempdir().unwrap();
    let manager = ArtifactManager::new(dir.path().join("temp_images"), retention).unwrap();
    (dir, manager)
  }

  #[test]
  fn test_acquire_writes_named_file() {
    let (_dir, manager) = manager(Retention::Delete);
    let owner = Uuid::new_v4();
    let artifact = manager
      .acquire(b"pixels", "Site Photo.JPG", "antenna_detection", owner)
      .unwrap();

    let name = artifact.path().file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("antenna_detection_"));
    assert!(name.ends_with(".jpg"));
    assert_eq!(artifact.owner(), owner);
    assert_eq!(std::fs::read(artifact.path()).unwrap(), b"pixels");
  }

  #[test]
  fn test_names_do_not_collide() {
    let (_dir, manager) = manager(Retention::Delete);
    let a = manager.acquire(b"a", "a.png", "multiple_models", Uuid::new_v4()).unwrap();
    let b = manager.acquire(b"b", "b.png", "multiple_models", Uuid::new_v4()).unwrap();
    assert_ne!(a.path(), b.path());
  }

  #[test]
  fn test_release_removes_file() {
    let (_dir, manager) = manager(Retention::Delete);
    let artifact = manager.acquire(b"x", "x.png", "grounding", Uuid::new_v4()).unwrap();
    let path = artifact.path().to_path_buf();
    manager.release(artifact).unwrap();
    assert!(!path.exists());
  }

  #[test]
  fn test_keep_policy_retains_file() {
    let (_dir, manager) = manager(Retention::Keep);
    let artifact = manager.acquire(b"x", "x.png", "grounding", Uuid::new_v4()).unwrap();
    let path = artifact.path().to_path_buf();
    manager.release(artifact).unwrap();
    assert!(path.exists());
  }

  #[test]
  fn test_drop_without_release_cleans_up() {
    let (_dir, manager) = manager(Retention::Delete);
    let artifact = manager.acquire(b"x", "x.png", "grounding", Uuid::new_v4()).unwrap();
    let path = artifact.path().to_path_buf();
    drop(artifact);
    assert!(!path.exists());
  }

  #[test]
  fn test_extension_errors() {
    assert!(matches!(
      image_extension("noextension"),
      Err(ArtifactError::MissingExtension(_))
    ));
    assert!(matches!(
      image_extension("trailing."),
      Err(ArtifactError::MissingExtension(_))
    ));
    assert!(matches!(
      image_extension("report.pdf"),
      Err(ArtifactError::UnsupportedExtension(ext)) if ext == "pdf"
    ));
    assert_eq!(image_extension("a.b.JpEg").unwrap(), "jpeg");
  }

  #[test]
  fn test_unwritable_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"file").unwrap();
    let err = ArtifactManager::new(blocker.join("temp"), Retention::Delete).unwrap_err();
    assert!(matches!(err, ArtifactError::CreateDir { .. }));
  }
}
