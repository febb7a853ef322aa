// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/detect_image.rs - 单张图像检测
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

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use shanan_detect::{
  config::{DEFAULT_MODEL_PATH, parse_confidence},
  model::load_runtime,
  service::{DetectionService, DetectorOptions, FALLBACK_CONFIDENCE},
};

/// 对单张图像执行检测并保存标注结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址（yolo26:///path/model.rknn 或模型文件路径）
  #[arg(long, env = "MODEL_PATH", default_value = DEFAULT_MODEL_PATH, value_name = "MODEL")]
  pub model: String,
  /// 输入图像
  #[arg(long, value_name = "FILE")]
  pub input: PathBuf,
  /// 标注图像保存路径
  #[arg(long, default_value = "result.jpg", value_name = "FILE")]
  pub output: PathBuf,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(
    long,
    default_value_t = FALLBACK_CONFIDENCE,
    value_parser = parse_confidence,
    value_name = "THRESHOLD"
  )]
  pub conf: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入图像: {}", args.input.display());
  info!("输出路径: {}", args.output.display());

  let runtime = load_runtime(&args.model)?;
  let service = DetectionService::new(
    runtime,
    DetectorOptions {
      confidence: args.conf,
      verbose: true,
    },
  );

  let bytes = std::fs::read(&args.input)
    .with_context(|| format!("无法读取图像 {}", args.input.display()))?;

  info!("开始推理...");
  let now = std::time::Instant::now();
  let Some(result) = service.predict(&bytes) else {
    bail!("无法识别的图像: {}", args.input.display());
  };
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  result
    .image
    .save(&args.output)
    .with_context(|| format!("无法保存标注图像 {}", args.output.display()))?;
  info!(
    "检测到 {} 个物体，标注图像已保存到 {}",
    result.detections.len(),
    args.output.display()
  );

  println!("{}", serde_json::to_string_pretty(&result.detections)?);

  Ok(())
}
