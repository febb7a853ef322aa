// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/common/mod.rs - 测试公共工具
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

#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;

use axum::body::Body;
use axum::http::Request;
use image::{ImageFormat, Rgb, RgbImage};

use shanan_detect::model::{DetectItem, DetectResult, ModelError, ModelRuntime};
use shanan_detect::output::Draw;
use shanan_detect::service::{DetectionService, DetectorOptions};

/// 只有汽车的图像宽度
pub const CAR_WIDTH: u32 = 320;
/// 只有行人的图像宽度
pub const PERSON_WIDTH: u32 = 256;
/// 汽车和低置信度行人同时出现的图像宽度
pub const MIXED_WIDTH: u32 = 400;
/// 只有不足一个像素宽的汽车的图像宽度
pub const THIN_WIDTH: u32 = 300;

/// 按图像宽度返回固定结果的运行时
pub struct StubRuntime;

impl StubRuntime {
  fn raw(width: u32) -> Vec<DetectItem> {
    match width {
      CAR_WIDTH => vec![DetectItem {
        class_id: 2,
        score: 0.8234,
        bbox: [10.4, 20.1, 199.6, 150.9],
      }],
      PERSON_WIDTH => vec![DetectItem {
        class_id: 0,
        score: 0.9,
        bbox: [5.0, 5.0, 100.0, 120.0],
      }],
      MIXED_WIDTH => vec![
        DetectItem {
          class_id: 2,
          score: 0.6,
          bbox: [20.0, 30.0, 180.0, 160.0],
        },
        DetectItem {
          class_id: 0,
          score: 0.3,
          bbox: [200.0, 40.0, 260.0, 200.0],
        },
      ],
      THIN_WIDTH => vec![DetectItem {
        class_id: 2,
        score: 0.9,
        bbox: [10.2, 1.0, 10.9, 20.0],
      }],
      _ => Vec::new(),
    }
  }
}

impl ModelRuntime for StubRuntime {
  fn class_name(&self, class_id: u32) -> Option<&str> {
    ["person", "bicycle", "car"].get(class_id as usize).copied()
  }

  fn infer(&self, image: &RgbImage, confidence: f32) -> Result<DetectResult, ModelError> {
    let items: Vec<DetectItem> = Self::raw(image.width())
      .into_iter()
      .filter(|item| item.score >= confidence)
      .collect();
    Ok(items.into())
  }

  fn plot(&self, image: &RgbImage, result: &DetectResult) -> RgbImage {
    match Draw::new() {
      Ok(draw) => draw.render(image, result, self),
      Err(_) => image.clone(),
    }
  }
}

pub fn stub_service(confidence: f32) -> DetectionService {
  DetectionService::new(
    Box::new(StubRuntime),
    DetectorOptions {
      confidence,
      verbose: false,
    },
  )
}

pub fn image(width: u32, height: u32) -> RgbImage {
  RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
}

pub fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
  let mut bytes = Cursor::new(Vec::new());
  image.write_to(&mut bytes, format).unwrap();
  bytes.into_inner()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
  encode(&image(width, height), ImageFormat::Png)
}

pub fn write_image(path: &Path, width: u32, height: u32) {
  image(width, height).save(path).unwrap();
}

const BOUNDARY: &str = "shanan-test-boundary";

/// 构造只含一个文件字段的 multipart 请求
pub fn multipart_request(uri: &str, field: &str, content_type: &str, data: &[u8]) -> Request<Body> {
  let mut body = Vec::new();
  body.extend_from_slice(
    format!(
      "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"upload.png\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .as_bytes(),
  );
  body.extend_from_slice(data);
  body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

  Request::builder()
    .method("POST")
    .uri(uri)
    .header(
      "content-type",
      format!("multipart/form-data; boundary={BOUNDARY}"),
    )
    .body(Body::from(body))
    .unwrap()
}
