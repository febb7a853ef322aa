// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/yolo26.rs - YOLO26 RKNPU 运行时
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
use std::time::Instant;

use image::{
  RgbImage,
  imageops::{self, FilterType},
};
use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{COCO_CLASSES, DetectItem, DetectResult, ModelError, ModelRuntime, model_file},
  output::Draw,
};

const YOLO26_NUM_INPUTS: u32 = 1;
const YOLO26_NUM_OUTPUTS: u32 = 6;
const YOLO26_CLASS_NUM: usize = 80;
const YOLO26_INPUT_W: u32 = 640;
const YOLO26_INPUT_H: u32 = 640;
const YOLO26_HEAD_SIZES: [(usize, usize); 3] = [(80, 80), (40, 40), (20, 20)];
const YOLO26_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];

pub struct Yolo26 {
  context: Context,
  draw: Draw,
}

pub struct Yolo26Builder {
  model_path: PathBuf,
  flags: InitFlags,
}

impl FromUrlWithScheme for Yolo26Builder {
  const SCHEME: &'static str = crate::model::YOLO26_SCHEME;
}

impl FromUrl for Yolo26Builder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(Yolo26Builder {
      model_path: model_file(url),
      flags: InitFlags::default(),
    })
  }
}

impl Yolo26Builder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn build(self) -> Result<Yolo26, ModelError> {
    info!("加载模型文件: {}", self.model_path.display());
    let mode_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      mode_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&mode_data, self.flags)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(ModelError::ModelInvalid(format!("无法查询 SDK 版本: {}", e)));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| ModelError::ModelInvalid(format!("无法获取输入数量: {}", e)))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| ModelError::ModelInvalid(format!("无法获取输出数量: {}", e)))?;

    if num_inputs != YOLO26_NUM_INPUTS || num_outputs != YOLO26_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(ModelError::ModelInvalid(msg));
    }

    let draw = Draw::new()?;
    info!("模型加载完成");
    Ok(Yolo26 { context, draw })
  }
}

/// 根据张量大小匹配回归和分类输出
/// 返回 (reg, cls) 元组，如果大小不匹配则返回 None
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
  head_idx: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
    Some((tensor1, tensor2))
  } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
    debug!("检测头 {}: 输出顺序交换", head_idx);
    Some((tensor2, tensor1))
  } else {
    error!(
      "检测头 {}: 输出大小不匹配 - 张量1: {}, 张量2: {}, 期望回归: {}, 期望分类: {}",
      head_idx,
      tensor1.len(),
      tensor2.len(),
      reg_expected,
      cls_expected
    );
    None
  }
}

/// 解码三个检测头，坐标映射回原图像素空间
fn decode_heads(
  output: &rknpu::Output,
  confidence: f32,
  image_w: f32,
  image_h: f32,
) -> Vec<DetectItem> {
  let input_w = YOLO26_INPUT_W as f32;
  let input_h = YOLO26_INPUT_H as f32;
  let mut items = Vec::new();

  for (head_idx, (&(map_h, map_w), stride)) in
    YOLO26_HEAD_SIZES.iter().zip(YOLO26_STRIDES).enumerate()
  {
    let spatial = map_h * map_w;
    let reg_expected = 4 * spatial;
    let cls_expected = YOLO26_CLASS_NUM * spatial;

    // RKNN 输出顺序不固定，按张量大小区分回归和分类
    let tensor1 = match output.get_f32(head_idx * 2) {
      Ok(data) => data,
      Err(e) => {
        error!("获取第 {} 个输出失败: {}", head_idx * 2, e);
        continue;
      }
    };
    let tensor2 = match output.get_f32(head_idx * 2 + 1) {
      Ok(data) => data,
      Err(e) => {
        error!("获取第 {} 个输出失败: {}", head_idx * 2 + 1, e);
        continue;
      }
    };

    let Some((reg, cls)) =
      match_reg_cls_tensors(tensor1, tensor2, reg_expected, cls_expected, head_idx)
    else {
      continue;
    };

    for h in 0..map_h {
      for w in 0..map_w {
        let idx = h * map_w + w;

        let (score, class_id) = {
          let mut max_logit = f32::MIN;
          let mut cls_idx = 0usize;
          for c in 0..YOLO26_CLASS_NUM {
            let logit = cls[c * spatial + idx];
            if logit > max_logit {
              max_logit = logit;
              cls_idx = c;
            }
          }
          (sigmoid(max_logit), cls_idx as u32)
        };

        if score < confidence {
          continue;
        }

        let grid_x = (w as f32) + 0.5;
        let grid_y = (h as f32) + 0.5;

        let xmin = ((grid_x - reg[idx]) * stride).clamp(0.0, input_w);
        let ymin = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, input_h);
        let xmax = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, input_w);
        let ymax = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, input_h);

        items.push(DetectItem {
          class_id,
          score,
          bbox: [
            xmin / input_w * image_w,
            ymin / input_h * image_h,
            xmax / input_w * image_w,
            ymax / input_h * image_h,
          ],
        });
      }
    }
  }

  items.sort_by(|a, b| b.score.total_cmp(&a.score));
  items
}

impl ModelRuntime for Yolo26 {
  fn class_name(&self, class_id: u32) -> Option<&str> {
    COCO_CLASSES.get(class_id as usize).copied()
  }

  fn infer(&self, image: &RgbImage, confidence: f32) -> Result<DetectResult, ModelError> {
    let (width, height) = image.dimensions();
    let now = Instant::now();

    let resized = imageops::resize(image, YOLO26_INPUT_W, YOLO26_INPUT_H, FilterType::Triangle);
    self.context.set_input(
      0,
      resized.as_raw().as_slice(),
      TensorFormat::NHWC,
      TensorType::UInt8,
    )?;

    debug!("执行模型推理");
    self.context.run()?;
    let output = self.context.get_outputs()?;

    let items = decode_heads(&output, confidence, width as f32, height as f32);
    debug!(
      "检测到 {} 个物体，耗时: {:.2?}",
      items.len(),
      now.elapsed()
    );

    Ok(DetectResult::from(items))
  }

  fn plot(&self, image: &RgbImage, result: &DetectResult) -> RgbImage {
    self.draw.render(image, result, self)
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
