// 该文件是 Shanan （山南西风） 项目的一部分。
// src/detection.rs - 对外检测结果结构
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

use serde::{Deserialize, Serialize};

/// HTTP 接口返回的单个检测结果
///
/// 置信度保留 4 位小数，边界框保留 2 位小数（浮点数）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  #[serde(rename = "class")]
  pub class_name: String,
  pub confidence: f64,
  pub bbox: [f64; 4],
}

/// 已解析类别名称、尚未取整的检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledItem {
  pub class_name: String,
  pub score: f32,
  pub bbox: [f32; 4],
}

impl LabeledItem {
  pub fn to_detection(&self) -> Detection {
    Detection {
      class_name: self.class_name.clone(),
      confidence: round_to(self.score, 4),
      bbox: self.bbox.map(|v| round_to(v, 2)),
    }
  }

  /// 批处理格式：置信度保留 2 位小数，坐标截断为整数
  pub fn to_batch(&self) -> BatchDetection {
    BatchDetection {
      class_name: self.class_name.clone(),
      confidence: round_to(self.score, 2),
      bbox: self.bbox.map(|v| v as i32),
    }
  }
}

/// 批处理报告中的检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDetection {
  #[serde(rename = "class")]
  pub class_name: String,
  pub confidence: f64,
  #[serde(rename = "box")]
  pub bbox: [i32; 4],
}

impl BatchDetection {
  /// 截断为整数后边界框仍有面积
  pub fn has_area(&self) -> bool {
    let [x1, y1, x2, y2] = self.bbox;
    x1 < x2 && y1 < y2
  }
}

/// 批处理报告条目，每张图像一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
  pub image: String,
  pub detections: Vec<BatchDetection>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl ReportEntry {
  pub fn new(image: impl Into<String>, detections: Vec<BatchDetection>) -> Self {
    Self {
      image: image.into(),
      detections,
      error: None,
    }
  }

  pub fn failed(image: impl Into<String>, error: impl ToString) -> Self {
    Self {
      image: image.into(),
      detections: Vec::new(),
      error: Some(error.to_string()),
    }
  }
}

/// f32 的最短十进制表示转为 f64，例如 0.12344f32 得到 0.12344
pub fn decimal(value: f32) -> f64 {
  format!("{}", value).parse().unwrap_or(value as f64)
}

/// 以十进制方式四舍五入
///
/// 先转为 f64 再取整，避免 f32 的二进制误差带进结果（例如 0.8234f32）。
pub fn round_to(value: f32, decimals: i32) -> f64 {
  let value = decimal(value);
  let factor = 10f64.powi(decimals);
  (value * factor).round() / factor
}
