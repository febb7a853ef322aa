// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/batch_detect.rs - 目录批量检测
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
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use shanan_detect::{
  batch::{BatchOptions, BatchPipeline, DEFAULT_BATCH_CONFIDENCE, parse_classes},
  config::{log_file_from_env, log_level_from_env, model_location_from_env, parse_confidence},
  logging,
  model::load_runtime,
  service::{DetectionService, DetectorOptions},
};

/// 批量检测目录中的图像，模型地址由环境变量 MODEL_PATH 指定
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像目录
  #[arg(long, default_value = "custom_dataset", value_name = "DIR")]
  pub input: PathBuf,
  /// 输出目录，每次运行前清空
  #[arg(long, default_value = "static/batch_results", value_name = "DIR")]
  pub output: PathBuf,
  /// 只保留这些类别（逗号分隔），例如 "car,person"
  #[arg(long, value_name = "CLASSES")]
  pub classes: Option<String>,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(
    long,
    default_value_t = DEFAULT_BATCH_CONFIDENCE,
    value_parser = parse_confidence,
    value_name = "THRESHOLD"
  )]
  pub conf: f32,
}

fn main() -> Result<()> {
  dotenv::dotenv().ok();
  logging::init(&log_level_from_env(), Some(log_file_from_env().as_path()))?;

  let args = Args::parse();
  let model = model_location_from_env();
  info!("模型地址: {}", model);

  let runtime = load_runtime(&model).with_context(|| format!("无法加载模型 {}", model))?;
  let service = DetectionService::new(
    runtime,
    DetectorOptions {
      confidence: args.conf,
      verbose: false,
    },
  );

  let stop = Arc::new(AtomicBool::new(false));
  let flag = Arc::clone(&stop);
  ctrlc::set_handler(move || {
    warn!("收到中断信号，处理完当前图像后停止");
    flag.store(true, Ordering::SeqCst);
  })
  .context("无法设置 Ctrl-C 处理函数")?;

  let options = BatchOptions {
    input: args.input,
    output: args.output,
    confidence: args.conf,
    classes: parse_classes(args.classes.as_deref()),
  };
  let summary = BatchPipeline::new(&service, options)?
    .with_stop_flag(stop)
    .run()?;

  if summary.interrupted {
    warn!(
      "批处理被中断，已处理 {} / {} 张图像",
      summary.saved + summary.skipped + summary.failed,
      summary.found
    );
  }

  Ok(())
}
