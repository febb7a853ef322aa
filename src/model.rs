// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型运行时接口
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

use std::path::PathBuf;

use image::RgbImage;
use thiserror::Error;
use url::Url;

pub const UNKNOWN_LABEL: &str = "unknown";

/// 目标检测运行时
///
/// 推理过程对调用方不透明：输入一张 RGB 图像和置信度阈值，
/// 输出按模型顺序排列的原始检测结果。运行时同时携带类别名称表，
/// 并负责按自己的风格绘制标注图像。
///
/// 运行时不保证可以被并发调用，调用方需要自行串行化。
pub trait ModelRuntime: Send {
  fn class_name(&self, class_id: u32) -> Option<&str>;

  /// 推理，只返回置信度不低于 `confidence` 的结果
  fn infer(&self, image: &RgbImage, confidence: f32) -> Result<DetectResult, ModelError>;

  /// 在图像副本上绘制检测结果
  fn plot(&self, image: &RgbImage, result: &DetectResult) -> RgbImage;

  fn label(&self, class_id: u32) -> &str {
    self.class_name(class_id).unwrap_or(UNKNOWN_LABEL)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图像素坐标
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("字体加载错误: {0}")]
  FontError(#[from] ab_glyph::InvalidFont),
  #[error("推理错误: {0}")]
  InferenceError(String),
  #[error("模型后端 '{0}' 未启用，请启用对应的 feature 重新编译")]
  BackendDisabled(&'static str),
  #[cfg(feature = "model_yolo26")]
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
}

#[cfg(feature = "model_yolo26")]
impl From<rknpu::Error> for ModelError {
  fn from(err: rknpu::Error) -> Self {
    ModelError::RknnError(err)
  }
}

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

pub const YOLO26_SCHEME: &str = "yolo26";

/// 解析模型地址
///
/// 接受 `yolo26:///path/to/model.rknn` 形式的地址；不带方案的相对或绝对路径
/// 视为 YOLO26 模型文件。
pub fn parse_model_location(location: &str) -> Result<Url, ModelError> {
  match Url::parse(location) {
    Ok(url) => Ok(url),
    Err(url::ParseError::RelativeUrlWithoutBase) => {
      let path = std::path::absolute(location)?;
      Url::parse(&format!("{}://{}", YOLO26_SCHEME, path.display()))
        .map_err(|e| ModelError::ModelPathError(format!("{}: {}", location, e)))
    }
    Err(e) => Err(ModelError::ModelPathError(format!("{}: {}", location, e))),
  }
}

/// 模型地址中的文件路径（解码百分号转义）
pub fn model_file(url: &Url) -> PathBuf {
  match urlencoding::decode(url.path()) {
    Ok(path) => PathBuf::from(path.into_owned()),
    Err(_) => PathBuf::from(url.path()),
  }
}

/// 根据模型地址加载运行时
pub fn load_runtime(location: &str) -> Result<Box<dyn ModelRuntime>, ModelError> {
  let url = parse_model_location(location)?;
  match url.scheme() {
    YOLO26_SCHEME => build_yolo26(&url),
    other => Err(ModelError::ModelPathError(format!(
      "不支持的模型方案 '{}'，期望 '{}'",
      other, YOLO26_SCHEME
    ))),
  }
}

#[cfg(feature = "model_yolo26")]
fn build_yolo26(url: &Url) -> Result<Box<dyn ModelRuntime>, ModelError> {
  use crate::FromUrl;

  let model = Yolo26Builder::from_url(url)?.build()?;
  Ok(Box::new(model))
}

#[cfg(not(feature = "model_yolo26"))]
fn build_yolo26(url: &Url) -> Result<Box<dyn ModelRuntime>, ModelError> {
  tracing::error!("无法加载 {}: 未启用 model_yolo26", url);
  Err(ModelError::BackendDisabled("model_yolo26"))
}

#[cfg(feature = "model_yolo26")]
mod yolo26;
#[cfg(feature = "model_yolo26")]
pub use self::yolo26::{Yolo26, Yolo26Builder};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bare_path_resolves_to_yolo26_scheme() {
    let url = parse_model_location("models/yolo26n.rknn").unwrap();
    assert_eq!(url.scheme(), YOLO26_SCHEME);
    assert!(model_file(&url).ends_with("models/yolo26n.rknn"));
    assert!(model_file(&url).is_absolute());
  }

  #[test]
  fn explicit_url_is_kept() {
    let url = parse_model_location("yolo26:///opt/models/yolo26n.rknn").unwrap();
    assert_eq!(url.scheme(), "yolo26");
    assert_eq!(model_file(&url), PathBuf::from("/opt/models/yolo26n.rknn"));
  }

  #[test]
  fn escaped_path_is_decoded() {
    let url = parse_model_location("yolo26:///opt/my%20models/yolo26n.rknn").unwrap();
    assert_eq!(model_file(&url), PathBuf::from("/opt/my models/yolo26n.rknn"));
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let err = load_runtime("onnx:///opt/models/yolo.onnx").err().unwrap();
    assert!(matches!(err, ModelError::ModelPathError(_)));
  }

  #[cfg(not(feature = "model_yolo26"))]
  #[test]
  fn disabled_backend_is_reported() {
    let err = load_runtime("yolo26n.rknn").err().unwrap();
    assert!(matches!(err, ModelError::BackendDisabled("model_yolo26")));
  }

  #[test]
  fn coco_table_resolves_car() {
    assert_eq!(COCO_CLASSES[2], "car");
  }
}
