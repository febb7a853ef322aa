// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 服务配置
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

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::{ArgAction, Parser, builder::BoolishValueParser};

use crate::service::{DetectorOptions, FALLBACK_CONFIDENCE};

/// 随服务一起发布的模型文件
pub const DEFAULT_MODEL_PATH: &str = "yolo26n.rknn";
/// 默认日志文件
pub const DEFAULT_LOG_FILE: &str = "logs/shanan-detect.log";

/// 检测服务配置，命令行参数优先于环境变量
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServeConfig {
  /// 模型地址（yolo26:///path/model.rknn 或模型文件路径）
  #[arg(long, env = "MODEL_PATH", default_value = DEFAULT_MODEL_PATH, value_name = "MODEL")]
  pub model: String,

  /// 标注结果保存目录
  #[arg(long, env = "RESULTS_DIR", default_value = "static/results", value_name = "DIR")]
  pub results_dir: PathBuf,

  /// 静态文件目录，挂载在 /static
  #[arg(long, env = "STATIC_DIR", default_value = "static", value_name = "DIR")]
  pub static_dir: PathBuf,

  /// 日志级别
  #[arg(long, env = "LOG_LEVEL", default_value = "info", value_name = "LEVEL")]
  pub log_level: String,

  /// 日志文件，留空则只输出到终端
  #[arg(long, env = "LOG_FILE", default_value = DEFAULT_LOG_FILE, value_name = "FILE")]
  pub log_file: PathBuf,

  /// 默认置信度阈值 (0.0 - 1.0)
  #[arg(
    long,
    env = "CONFIDENCE",
    default_value_t = FALLBACK_CONFIDENCE,
    value_parser = parse_confidence,
    value_name = "THRESHOLD"
  )]
  pub confidence: f32,

  /// 监听地址
  #[arg(long, env = "HOST", default_value = "0.0.0.0")]
  pub host: IpAddr,

  /// 监听端口
  #[arg(long, env = "PORT", default_value_t = 8001)]
  pub port: u16,

  /// 上传文件大小上限（MB）
  #[arg(long, env = "MAX_UPLOAD_MB", default_value_t = 20, value_name = "MB")]
  pub max_upload_mb: usize,

  /// 每次检测后打印结果表
  #[arg(
    long,
    env = "VERBOSE_DETECTIONS",
    default_value_t = true,
    action = ArgAction::Set,
    value_parser = BoolishValueParser::new()
  )]
  pub verbose: bool,
}

impl ServeConfig {
  pub fn socket_addr(&self) -> SocketAddr {
    SocketAddr::new(self.host, self.port)
  }

  pub fn max_upload_bytes(&self) -> usize {
    self.max_upload_mb.saturating_mul(1024 * 1024)
  }

  pub fn detector_options(&self) -> DetectorOptions {
    DetectorOptions {
      confidence: self.confidence,
      verbose: self.verbose,
    }
  }
}

/// 解析置信度阈值，必须位于 [0, 1]
pub fn parse_confidence(value: &str) -> Result<f32, String> {
  let confidence: f32 = value
    .trim()
    .parse()
    .map_err(|_| format!("'{}' 不是有效的数字", value))?;
  if (0.0..=1.0).contains(&confidence) {
    Ok(confidence)
  } else {
    Err(format!("置信度阈值必须在 0.0 到 1.0 之间，实际为 {}", confidence))
  }
}

/// 从环境变量读取模型地址
pub fn model_location_from_env() -> String {
  std::env::var("MODEL_PATH")
    .ok()
    .filter(|v| !v.trim().is_empty())
    .unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string())
}

/// 从环境变量读取日志级别
pub fn log_level_from_env() -> String {
  std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

/// 从环境变量读取日志文件，未设置时使用默认文件，设置为空则关闭文件日志
pub fn log_file_from_env() -> PathBuf {
  log_file_from(std::env::var("LOG_FILE").ok())
}

fn log_file_from(value: Option<String>) -> PathBuf {
  PathBuf::from(value.unwrap_or_else(|| DEFAULT_LOG_FILE.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_deployment() {
    let config = ServeConfig::try_parse_from(["shanan-detect"]).unwrap();
    // 测试环境可能设置了环境变量，只检查不受其影响的派生值
    assert_eq!(
      config.max_upload_bytes(),
      config.max_upload_mb * 1024 * 1024
    );
    assert_eq!(config.socket_addr().port(), config.port);
  }

  #[test]
  fn flags_override_defaults() {
    let config = ServeConfig::try_parse_from([
      "shanan-detect",
      "--model",
      "yolo26:///opt/yolo26s.rknn",
      "--port",
      "9000",
      "--confidence",
      "0.5",
      "--verbose",
      "false",
      "--host",
      "127.0.0.1",
    ])
    .unwrap();
    assert_eq!(config.model, "yolo26:///opt/yolo26s.rknn");
    assert_eq!(config.socket_addr(), "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
    assert_eq!(
      config.detector_options(),
      DetectorOptions {
        confidence: 0.5,
        verbose: false
      }
    );
  }

  #[test]
  fn out_of_range_confidence_is_rejected() {
    assert!(
      ServeConfig::try_parse_from(["shanan-detect", "--confidence", "1.5"]).is_err()
    );
    assert_eq!(parse_confidence(" 0.25 "), Ok(0.25));
    assert!(parse_confidence("-0.1").is_err());
    assert!(parse_confidence("abc").is_err());
    assert!(parse_confidence("NaN").is_err());
  }

  #[test]
  fn log_file_defaults_like_the_server() {
    assert_eq!(log_file_from(None), PathBuf::from("logs/shanan-detect.log"));
    assert_eq!(
      log_file_from(Some("/var/log/batch.log".to_string())),
      PathBuf::from("/var/log/batch.log")
    );
    assert!(log_file_from(Some(String::new())).as_os_str().is_empty());
  }
}
