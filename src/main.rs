// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 检测服务主程序
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

use anyhow::Result;
use clap::Parser;
use tracing::info;

use shanan_detect::{config::ServeConfig, logging, server};

#[tokio::main]
async fn main() -> Result<()> {
  dotenv::dotenv().ok();

  let config = ServeConfig::parse();
  logging::init(&config.log_level, Some(config.log_file.as_path()))?;

  info!("Shanan 检测服务");
  info!("模型地址: {}", config.model);
  info!("默认置信度阈值: {}", config.confidence);
  info!("静态目录: {}", config.static_dir.display());

  server::run(config).await
}
