// 该文件是 Shanan （山南西风） 项目的一部分。
// src/batch.rs - 目录批量检测
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

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use image::ImageReader;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::detection::{BatchDetection, ReportEntry};
use crate::output::Visualizer;
use crate::service::{DetectionService, ServiceError};

pub const DEFAULT_BATCH_CONFIDENCE: f32 = 0.25;
pub const REPORT_FILE: &str = "results.json";
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Clone)]
pub struct BatchOptions {
  pub input: PathBuf,
  pub output: PathBuf,
  pub confidence: f32,
  /// 类别白名单，`None` 表示不过滤
  pub classes: Option<Vec<String>>,
}

#[derive(Error, Debug)]
pub enum BatchError {
  #[error("无法读取输入目录 {0}: {1}")]
  InputDir(PathBuf, #[source] std::io::Error),
  #[error("无法重建输出目录 {0}: {1}")]
  OutputDir(PathBuf, #[source] std::io::Error),
  #[error("输出目录 {output} 与输入目录 {input} 重叠，重建输出目录会删除输入图像")]
  Overlap { input: PathBuf, output: PathBuf },
  #[error("无法写入报告 {0}: {1}")]
  Report(PathBuf, #[source] std::io::Error),
  #[error("报告序列化失败: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("字体加载错误: {0}")]
  Font(#[from] ab_glyph::InvalidFont),
}

// 单张图像的错误，只记录不中断
#[derive(Error, Debug)]
enum ItemError {
  #[error("无法打开图像: {0}")]
  Io(#[from] std::io::Error),
  #[error("无法解码图像: {0}")]
  Read(image::ImageError),
  #[error("{0}")]
  Detect(#[from] ServiceError),
  #[error("无法保存标注图像: {0}")]
  Save(image::ImageError),
}

/// 一次批处理的统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
  /// 发现的图像数量
  pub found: usize,
  /// 保存了标注图像的数量
  pub saved: usize,
  /// 没有保留下任何检测结果的数量
  pub skipped: usize,
  pub failed: usize,
  /// 被 Ctrl-C 中断
  pub interrupted: bool,
  pub report_path: PathBuf,
}

pub struct BatchPipeline<'a> {
  service: &'a DetectionService,
  visualizer: Visualizer,
  options: BatchOptions,
  stop: Option<Arc<AtomicBool>>,
}

impl<'a> BatchPipeline<'a> {
  pub fn new(service: &'a DetectionService, options: BatchOptions) -> Result<Self, BatchError> {
    Ok(Self {
      service,
      visualizer: Visualizer::new()?,
      options,
      stop: None,
    })
  }

  /// 设置停止标志，置位后处理完当前图像即结束并写出报告
  pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop = Some(stop);
    self
  }

  pub fn run(&self) -> Result<BatchSummary, BatchError> {
    let input = &self.options.input;
    let output = &self.options.output;
    info!("输入目录: {}", input.display());
    info!("输出目录: {}", output.display());
    info!("置信度阈值: {}", self.options.confidence);
    match &self.options.classes {
      Some(classes) => info!("类别过滤: {}", classes.join(", ")),
      None => info!("类别过滤: 无"),
    }

    let input_dir = input
      .canonicalize()
      .map_err(|e| BatchError::InputDir(input.clone(), e))?;
    check_overlap(&input_dir, output)?;
    reset_dir(output)?;

    let images = discover_images(&input_dir)?;
    info!("发现 {} 张图像", images.len());

    let now = Instant::now();
    let mut summary = BatchSummary {
      found: images.len(),
      report_path: output.join(REPORT_FILE),
      ..Default::default()
    };
    let mut report = Vec::new();

    for path in &images {
      if self.stop_requested() {
        warn!("收到中断请求，停止处理剩余图像");
        summary.interrupted = true;
        break;
      }

      let name = file_name(path);
      match self.process(path, &name) {
        Ok(Some(detections)) => {
          debug!("{}: 保留 {} 个检测结果", name, detections.len());
          summary.saved += 1;
          report.push(ReportEntry::new(name, detections));
        }
        Ok(None) => {
          debug!("{}: 没有符合条件的检测结果", name);
          summary.skipped += 1;
        }
        Err(e) => {
          error!("{}: {}", name, e);
          summary.failed += 1;
          report.push(ReportEntry::failed(name, e));
        }
      }
    }

    write_report(&summary.report_path, &report)?;
    info!(
      "批处理完成，耗时: {:.2?}。共 {} 张，保存 {} 张，无结果 {} 张，失败 {} 张",
      now.elapsed(),
      summary.found,
      summary.saved,
      summary.skipped,
      summary.failed
    );
    info!("报告已写入: {}", summary.report_path.display());

    Ok(summary)
  }

  fn stop_requested(&self) -> bool {
    self
      .stop
      .as_ref()
      .is_some_and(|stop| stop.load(Ordering::SeqCst))
  }

  fn process(&self, path: &Path, name: &str) -> Result<Option<Vec<BatchDetection>>, ItemError> {
    let image = ImageReader::open(path)?
      .with_guessed_format()?
      .decode()
      .map_err(ItemError::Read)?
      .to_rgb8();

    let detections: Vec<BatchDetection> = self
      .service
      .detect(&image, self.options.confidence)?
      .into_iter()
      .filter(|item| self.allowed(&item.class_name))
      .map(|item| item.to_batch())
      .filter(|detection| {
        let keep = detection.has_area();
        if !keep {
          debug!("{}: 丢弃截断后退化的边界框 {:?}", name, detection.bbox);
        }
        keep
      })
      .collect();

    if detections.is_empty() {
      return Ok(None);
    }

    let mut canvas = image;
    self.visualizer.draw_detections(&mut canvas, &detections);
    canvas
      .save(self.options.output.join(name))
      .map_err(ItemError::Save)?;

    Ok(Some(detections))
  }

  fn allowed(&self, class_name: &str) -> bool {
    match &self.options.classes {
      Some(classes) => classes.iter().any(|c| c == class_name),
      None => true,
    }
  }
}

/// 解析逗号分隔的类别白名单，全部为空时视为不过滤
pub fn parse_classes(value: Option<&str>) -> Option<Vec<String>> {
  let classes: Vec<String> = value?
    .split(',')
    .map(str::trim)
    .filter(|c| !c.is_empty())
    .map(str::to_string)
    .collect();
  (!classes.is_empty()).then_some(classes)
}

pub fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| {
      IMAGE_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
    })
}

// 输出目录每次都会被删除，不允许与输入目录重叠
fn check_overlap(input_dir: &Path, output: &Path) -> Result<(), BatchError> {
  let output_dir = match output.canonicalize() {
    Ok(dir) => dir,
    Err(_) => return Ok(()),
  };
  if input_dir.starts_with(&output_dir) {
    return Err(BatchError::Overlap {
      input: input_dir.to_path_buf(),
      output: output_dir,
    });
  }
  Ok(())
}

fn reset_dir(dir: &Path) -> Result<(), BatchError> {
  if dir.exists() {
    debug!("清空输出目录: {}", dir.display());
    std::fs::remove_dir_all(dir).map_err(|e| BatchError::OutputDir(dir.to_path_buf(), e))?;
  }
  std::fs::create_dir_all(dir).map_err(|e| BatchError::OutputDir(dir.to_path_buf(), e))
}

// 只扫描第一层，按目录列举顺序返回
fn discover_images(dir: &Path) -> Result<Vec<PathBuf>, BatchError> {
  let entries = std::fs::read_dir(dir).map_err(|e| BatchError::InputDir(dir.to_path_buf(), e))?;
  let mut images = Vec::new();
  for entry in entries {
    let entry = entry.map_err(|e| BatchError::InputDir(dir.to_path_buf(), e))?;
    let path = entry.path();
    if path.is_file() && is_image_file(&path) {
      images.push(path);
    }
  }
  Ok(images)
}

fn file_name(path: &Path) -> String {
  path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_default()
}

fn write_report(path: &Path, report: &[ReportEntry]) -> Result<(), BatchError> {
  let file = File::create(path).map_err(|e| BatchError::Report(path.to_path_buf(), e))?;
  let mut writer = BufWriter::new(file);
  let mut serializer = Serializer::with_formatter(&mut writer, PrettyFormatter::with_indent(b"    "));
  report.serialize(&mut serializer)?;
  writer
    .flush()
    .map_err(|e| BatchError::Report(path.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn class_list_is_trimmed() {
    assert_eq!(
      parse_classes(Some(" car, person ,,")),
      Some(vec!["car".to_string(), "person".to_string()])
    );
    assert_eq!(parse_classes(Some(" , ")), None);
    assert_eq!(parse_classes(None), None);
  }

  #[test]
  fn extensions_are_case_insensitive() {
    assert!(is_image_file(Path::new("a/b.JPG")));
    assert!(is_image_file(Path::new("b.jpeg")));
    assert!(is_image_file(Path::new("c.Png")));
    assert!(!is_image_file(Path::new("d.bmp")));
    assert!(!is_image_file(Path::new("jpg")));
  }

  #[test]
  fn report_uses_four_space_indent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(REPORT_FILE);
    let entry = ReportEntry::new(
      "a.jpg",
      vec![BatchDetection {
        class_name: "car".to_string(),
        confidence: 0.82,
        bbox: [10, 20, 199, 150],
      }],
    );
    write_report(&path, &[entry]).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("[\n    {\n        \"image\": \"a.jpg\""));
    assert!(text.contains("\"box\""));
  }

  #[test]
  fn overlap_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("data");
    std::fs::create_dir_all(&input).unwrap();
    let input = input.canonicalize().unwrap();

    assert!(matches!(
      check_overlap(&input, &input),
      Err(BatchError::Overlap { .. })
    ));
    assert!(matches!(
      check_overlap(&input, dir.path()),
      Err(BatchError::Overlap { .. })
    ));
    assert!(check_overlap(&input, &dir.path().join("out")).is_ok());
  }
}
