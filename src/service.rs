// 该文件是 Shanan （山南西风） 项目的一部分。
// src/service.rs - 检测服务
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

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::detection::{Detection, LabeledItem, decimal, round_to};
use crate::model::{DetectItem, DetectResult, ModelError, ModelRuntime};

/// 未配置时的默认置信度阈值
pub const FALLBACK_CONFIDENCE: f32 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
  pub confidence: f32,
  /// 每次检测后是否打印结果表
  pub verbose: bool,
}

impl Default for DetectorOptions {
  fn default() -> Self {
    Self {
      confidence: FALLBACK_CONFIDENCE,
      verbose: true,
    }
  }
}

/// 单次检测的结果，归调用方所有
#[derive(Debug, Clone)]
pub struct DetectionResult {
  pub image: RgbImage,
  pub detections: Vec<Detection>,
}

#[derive(Error, Debug)]
pub enum ServiceError {
  #[error("图像解码失败: {0}")]
  Decode(#[from] image::ImageError),
  #[error("推理失败: {0}")]
  Inference(#[from] ModelError),
  #[error("推理过程崩溃: {0}")]
  Panicked(String),
}

/// 检测服务
///
/// 进程内唯一持有模型运行时，所有推理经过同一把锁串行执行。
pub struct DetectionService {
  runtime: Mutex<Box<dyn ModelRuntime>>,
  options: DetectorOptions,
}

impl DetectionService {
  pub fn new(runtime: Box<dyn ModelRuntime>, options: DetectorOptions) -> Self {
    Self {
      runtime: Mutex::new(runtime),
      options,
    }
  }

  /// 使用默认阈值检测
  pub fn predict(&self, bytes: &[u8]) -> Option<DetectionResult> {
    self.predict_with(bytes, None)
  }

  /// 检测一张编码后的图像，任何失败都折叠为 `None`
  pub fn predict_with(&self, bytes: &[u8], confidence: Option<f32>) -> Option<DetectionResult> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.try_predict(bytes, confidence)))
      .unwrap_or_else(|payload| Err(ServiceError::Panicked(panic_message(payload.as_ref()))));

    match outcome {
      Ok(result) => Some(result),
      Err(ServiceError::Decode(e)) => {
        warn!("无法解码上传的图像: {}", e);
        None
      }
      Err(e) => {
        error!("检测失败: {}", e);
        None
      }
    }
  }

  fn try_predict(
    &self,
    bytes: &[u8],
    confidence: Option<f32>,
  ) -> Result<DetectionResult, ServiceError> {
    let image = decode_image(bytes)?;
    let threshold = confidence.unwrap_or(self.options.confidence);
    debug!(
      "图像尺寸: {}x{}，阈值: {}",
      image.width(),
      image.height(),
      threshold
    );

    let runtime = self.lock_runtime();
    let now = Instant::now();
    let raw = runtime.infer(&image, threshold)?;
    let items = keep_rounded_above(sanitize(&image, raw.items.into_vec(), threshold), threshold);
    info!("推理完成，检测到 {} 个物体，耗时: {:.2?}", items.len(), now.elapsed());

    let kept = DetectResult::from(items);
    let annotated = runtime.plot(&image, &kept);
    let detections: Vec<Detection> = kept
      .items
      .iter()
      .map(|item| label_item(&**runtime, item).to_detection())
      .collect();
    drop(runtime);

    if self.options.verbose {
      log_table(&detections);
    }

    Ok(DetectionResult {
      image: annotated,
      detections,
    })
  }

  /// 批处理使用：对已解码的图像推理，返回带类别名称的原始精度结果
  pub fn detect(&self, image: &RgbImage, confidence: f32) -> Result<Vec<LabeledItem>, ServiceError> {
    let run = || -> Result<Vec<LabeledItem>, ServiceError> {
      let runtime = self.lock_runtime();
      let raw = runtime.infer(image, confidence)?;
      Ok(
        sanitize(image, raw.items.into_vec(), confidence)
          .iter()
          .map(|item| label_item(&**runtime, item))
          .collect(),
      )
    };

    panic::catch_unwind(AssertUnwindSafe(run))
      .unwrap_or_else(|payload| Err(ServiceError::Panicked(panic_message(payload.as_ref()))))
  }

  // 推理过程中崩溃会让锁中毒，运行时本身只读，继续使用
  fn lock_runtime(&self) -> MutexGuard<'_, Box<dyn ModelRuntime>> {
    self.runtime.lock().unwrap_or_else(|poisoned| {
      warn!("推理锁已中毒，继续使用模型运行时");
      poisoned.into_inner()
    })
  }
}

pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, ServiceError> {
  Ok(image::load_from_memory(bytes)?.to_rgb8())
}

fn label_item<R: ModelRuntime + ?Sized>(runtime: &R, item: &DetectItem) -> LabeledItem {
  LabeledItem {
    class_name: runtime.label(item.class_id).to_string(),
    score: item.score,
    bbox: item.bbox,
  }
}

/// 过滤并修正模型输出
///
/// 丢弃非有限值和低于阈值的结果，置信度截断到 1，边界框限制在图像范围内，
/// 取整后退化（x1 >= x2 或 y1 >= y2）的框同样丢弃。
fn sanitize(image: &RgbImage, items: Vec<DetectItem>, threshold: f32) -> Vec<DetectItem> {
  let (w, h) = (image.width() as f32, image.height() as f32);
  items
    .into_iter()
    .filter(|item| item.score.is_finite() && item.bbox.iter().all(|v| v.is_finite()))
    .filter(|item| item.score >= threshold)
    .filter_map(|item| {
      let [x1, y1, x2, y2] = item.bbox;
      let bbox = [
        x1.clamp(0.0, w),
        y1.clamp(0.0, h),
        x2.clamp(0.0, w),
        y2.clamp(0.0, h),
      ];
      let rounded = bbox.map(|v| (v * 100.0).round());
      if rounded[0] >= rounded[2] || rounded[1] >= rounded[3] {
        debug!("丢弃退化边界框: {:?}", item.bbox);
        return None;
      }
      Some(DetectItem {
        class_id: item.class_id,
        score: item.score.min(1.0),
        bbox,
      })
    })
    .collect()
}

// 返回的置信度保留 4 位小数，取整后低于阈值的结果同样丢弃
fn keep_rounded_above(items: Vec<DetectItem>, threshold: f32) -> Vec<DetectItem> {
  let threshold = decimal(threshold);
  items
    .into_iter()
    .filter(|item| round_to(item.score, 4) >= threshold)
    .collect()
}

fn log_table(detections: &[Detection]) {
  info!("{:<16} {:<12} BOX", "CLASS", "CONFIDENCE");
  for detection in detections {
    info!(
      "{:<16} {:<12.4} {:?}",
      detection.class_name, detection.confidence, detection.bbox
    );
  }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(msg) = payload.downcast_ref::<&str>() {
    msg.to_string()
  } else if let Some(msg) = payload.downcast_ref::<String>() {
    msg.clone()
  } else {
    "未知错误".to_string()
  }
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;
  use std::sync::atomic::{AtomicBool, Ordering};

  use image::{ImageFormat, Rgb};

  use super::*;

  struct Fixed {
    items: Vec<DetectItem>,
    explode: AtomicBool,
  }

  impl Fixed {
    fn new(items: Vec<DetectItem>) -> Self {
      Self {
        items,
        explode: AtomicBool::new(false),
      }
    }
  }

  impl ModelRuntime for Fixed {
    fn class_name(&self, class_id: u32) -> Option<&str> {
      ["person", "bicycle", "car"].get(class_id as usize).copied()
    }

    fn infer(&self, _image: &RgbImage, confidence: f32) -> Result<DetectResult, ModelError> {
      if self.explode.swap(false, Ordering::SeqCst) {
        panic!("张量越界");
      }
      Ok(
        self
          .items
          .iter()
          .filter(|item| item.score >= confidence)
          .cloned()
          .collect::<Vec<_>>()
          .into(),
      )
    }

    fn plot(&self, image: &RgbImage, _result: &DetectResult) -> RgbImage {
      let mut canvas = image.clone();
      canvas.put_pixel(0, 0, Rgb([255, 0, 0]));
      canvas
    }
  }

  fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([30, 30, 30]));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
  }

  fn item(class_id: u32, score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      class_id,
      score,
      bbox,
    }
  }

  fn quiet() -> DetectorOptions {
    DetectorOptions {
      confidence: FALLBACK_CONFIDENCE,
      verbose: false,
    }
  }

  #[test]
  fn garbage_bytes_yield_none() {
    let service = DetectionService::new(Box::new(Fixed::new(vec![])), quiet());
    assert!(service.predict(b"definitely not an image").is_none());
    assert!(service.predict(&[]).is_none());
  }

  #[test]
  fn predict_normalizes_and_plots() {
    let runtime = Fixed::new(vec![item(2, 0.8234, [10.4, 20.1, 199.6, 150.9])]);
    let service = DetectionService::new(Box::new(runtime), quiet());

    let result = service.predict(&png(320, 240)).unwrap();
    assert_eq!(result.detections.len(), 1);
    assert_eq!(result.detections[0].class_name, "car");
    assert_eq!(result.detections[0].confidence, 0.8234);
    assert_eq!(result.detections[0].bbox, [10.4, 20.1, 199.6, 150.9]);
    assert_eq!(result.image.get_pixel(0, 0), &Rgb([255, 0, 0]));
    assert_eq!(result.image.dimensions(), (320, 240));
  }

  #[test]
  fn threshold_override_filters() {
    let runtime = Fixed::new(vec![
      item(0, 0.5, [1.0, 1.0, 20.0, 20.0]),
      item(2, 0.95, [5.0, 5.0, 30.0, 30.0]),
    ]);
    let service = DetectionService::new(Box::new(runtime), quiet());

    assert_eq!(service.predict(&png(64, 64)).unwrap().detections.len(), 2);
    let strict = service.predict_with(&png(64, 64), Some(0.9)).unwrap();
    assert_eq!(strict.detections.len(), 1);
    assert!(strict.detections.iter().all(|d| d.confidence >= 0.9));
  }

  #[test]
  fn rounded_confidence_never_falls_below_threshold() {
    let runtime = Fixed::new(vec![
      item(2, 0.12344, [1.0, 1.0, 20.0, 20.0]),
      item(0, 0.1235, [5.0, 5.0, 30.0, 30.0]),
    ]);
    let service = DetectionService::new(
      Box::new(runtime),
      DetectorOptions {
        confidence: 0.12344,
        verbose: false,
      },
    );

    let result = service.predict(&png(64, 64)).unwrap();
    assert_eq!(result.detections.len(), 1);
    assert_eq!(result.detections[0].class_name, "person");
    assert!(result.detections.iter().all(|d| d.confidence >= 0.12344));
  }

  #[test]
  fn score_equal_to_threshold_is_kept() {
    let runtime = Fixed::new(vec![item(2, 0.1234, [1.0, 1.0, 20.0, 20.0])]);
    let service = DetectionService::new(Box::new(runtime), quiet());
    let result = service.predict_with(&png(64, 64), Some(0.1234)).unwrap();
    assert_eq!(result.detections.len(), 1);
    assert_eq!(result.detections[0].confidence, 0.1234);
  }

  #[test]
  fn bmp_upload_is_decoded() {
    let runtime = Fixed::new(vec![item(2, 0.9, [1.0, 1.0, 20.0, 20.0])]);
    let service = DetectionService::new(Box::new(runtime), quiet());

    let image = RgbImage::from_pixel(40, 30, Rgb([10, 20, 30]));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Bmp).unwrap();

    let result = service.predict(&bytes.into_inner()).unwrap();
    assert_eq!(result.image.dimensions(), (40, 30));
    assert_eq!(result.detections.len(), 1);
  }

  #[test]
  fn unknown_class_is_labelled_unknown() {
    let runtime = Fixed::new(vec![item(42, 0.7, [1.0, 1.0, 20.0, 20.0])]);
    let service = DetectionService::new(Box::new(runtime), quiet());
    let result = service.predict(&png(64, 64)).unwrap();
    assert_eq!(result.detections[0].class_name, crate::model::UNKNOWN_LABEL);
  }

  #[test]
  fn sanitize_clamps_and_drops_degenerate() {
    let image = RgbImage::new(100, 50);
    let items = vec![
      item(0, 1.2, [-5.0, -5.0, 150.0, 80.0]),
      item(0, 0.9, [30.0, 10.0, 30.001, 40.0]),
      item(0, f32::NAN, [1.0, 1.0, 2.0, 2.0]),
      item(0, 0.2, [1.0, 1.0, 20.0, 20.0]),
      item(0, 0.8, [120.0, 10.0, 140.0, 40.0]),
    ];

    let kept = sanitize(&image, items, 0.35);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].score, 1.0);
    assert_eq!(kept[0].bbox, [0.0, 0.0, 100.0, 50.0]);
  }

  #[test]
  fn runtime_panic_is_contained() {
    let runtime = Fixed::new(vec![item(2, 0.9, [1.0, 1.0, 20.0, 20.0])]);
    runtime.explode.store(true, Ordering::SeqCst);
    let service = DetectionService::new(Box::new(runtime), quiet());

    assert!(service.predict(&png(32, 32)).is_none());
    // 锁中毒后运行时仍然可用
    let result = service.predict(&png(32, 32)).unwrap();
    assert_eq!(result.detections.len(), 1);
  }

  #[test]
  fn detect_keeps_raw_precision() {
    let runtime = Fixed::new(vec![item(2, 0.8234, [10.4, 20.1, 199.6, 150.9])]);
    let service = DetectionService::new(Box::new(runtime), quiet());
    let items = service.detect(&RgbImage::new(320, 240), 0.25).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].score, 0.8234);
    assert_eq!(items[0].to_batch().bbox, [10, 20, 199, 150]);
  }
}
