// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/visualizer.rs - 批处理标注绘制
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

use ab_glyph::{FontRef, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detection::BatchDetection;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;
const LABEL_OFFSET: i32 = 10;

/// 批处理使用的可视化工具
///
/// 统一绿色边框，标签 `"{class} {conf:.2}"` 写在框左上角上方 10 像素处。
pub struct Visualizer {
  font: FontRef<'static>,
  font_scale: PxScale,
}

impl Visualizer {
  pub fn new() -> Result<Self, InvalidFont> {
    Ok(Self {
      font: super::embedded_font()?,
      font_scale: PxScale::from(16.0),
    })
  }

  /// 在图像上绘制所有检测结果
  pub fn draw_detections(&self, image: &mut RgbImage, detections: &[BatchDetection]) {
    for detection in detections {
      self.draw_detection(image, detection);
    }
  }

  fn draw_detection(&self, image: &mut RgbImage, detection: &BatchDetection) {
    let [x1, y1, x2, y2] = detection.bbox;
    let width = x2 - x1;
    let height = y2 - y1;
    if width <= 0 || height <= 0 {
      return;
    }

    // 由外向内逐层描边
    for offset in 0..BOX_THICKNESS {
      let w = width - 2 * offset;
      let h = height - 2 * offset;
      if w <= 0 || h <= 0 {
        break;
      }
      let rect = Rect::at(x1 + offset, y1 + offset).of_size(w as u32, h as u32);
      draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }

    let label = format!("{} {:.2}", detection.class_name, detection.confidence);
    // 文本基线在 y1 - 10，换算成左上角坐标
    let text_y = (y1 - LABEL_OFFSET - self.font_scale.y as i32).max(0);
    draw_text_mut(
      image,
      BOX_COLOR,
      x1.max(0),
      text_y,
      self.font_scale,
      &self.font,
      &label,
    );
  }
}
