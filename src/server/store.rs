// 该文件是 Shanan （山南西风） 项目的一部分。
// src/server/store.rs - 标注结果存储
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

use std::path::{Component, Path, PathBuf};

use image::{ImageFormat, RgbImage};
use tracing::debug;

/// 挂载在静态目录之外时使用的地址前缀
pub const RESULTS_MOUNT: &str = "/results";

/// 结果目录及其对外地址
///
/// 结果目录位于静态目录内时，地址为 `/static/<相对路径>/<文件名>`；
/// 否则结果目录单独挂载在 `/results`。
#[derive(Debug, Clone)]
pub struct ResultStore {
  dir: PathBuf,
  url_prefix: String,
  separate_mount: bool,
}

impl ResultStore {
  pub fn new(dir: impl AsRef<Path>, static_dir: impl AsRef<Path>) -> Self {
    let dir = dir.as_ref().to_path_buf();
    let relative = normalize(&dir)
      .strip_prefix(normalize(static_dir.as_ref()))
      .ok()
      .map(|rel| {
        rel
          .components()
          .map(|c| c.as_os_str().to_string_lossy().into_owned())
          .collect::<Vec<_>>()
      });

    match relative {
      Some(parts) => {
        let mut url_prefix = String::from("/static");
        for part in parts {
          url_prefix.push('/');
          url_prefix.push_str(&part);
        }
        Self {
          dir,
          url_prefix,
          separate_mount: false,
        }
      }
      None => Self {
        dir,
        url_prefix: RESULTS_MOUNT.to_string(),
        separate_mount: true,
      },
    }
  }

  /// 创建结果目录（已存在时不做任何事）
  pub fn prepare(&self) -> std::io::Result<()> {
    std::fs::create_dir_all(&self.dir)
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn separate_mount(&self) -> bool {
    self.separate_mount
  }

  pub fn url_for(&self, filename: &str) -> String {
    format!("{}/{}", self.url_prefix, filename)
  }

  /// 以 JPEG 格式保存标注图像
  pub fn save(&self, image: &RgbImage, filename: &str) -> Result<PathBuf, image::ImageError> {
    let path = self.dir.join(filename);
    image.save_with_format(&path, ImageFormat::Jpeg)?;
    debug!("标注图像已保存: {}", path.display());
    Ok(path)
  }
}

fn normalize(path: &Path) -> PathBuf {
  let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
  path
    .components()
    .filter(|c| !matches!(c, Component::CurDir))
    .collect()
}
