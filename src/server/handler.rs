// 该文件是 Shanan （山南西风） 项目的一部分。
// src/server/handler.rs - 检测接口
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

use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, Query, State};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::AppState;
use super::error::ApiError;
use crate::config::parse_confidence;
use crate::detection::Detection;

/// 上传表单中的文件字段名
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Default, Deserialize)]
pub struct DetectParams {
  /// 覆盖本次请求的置信度阈值
  pub conf: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
  pub success: bool,
  pub filename: String,
  pub image_url: String,
  pub detections_count: usize,
  pub detections: Vec<Detection>,
}

/// POST /detect
pub async fn detect(
  State(state): State<AppState>,
  Query(params): Query<DetectParams>,
  mut multipart: Multipart,
) -> Result<Json<DetectResponse>, ApiError> {
  let Some(service) = state.service.clone() else {
    error!("模型未加载，拒绝检测请求");
    return Err(ApiError::ModelUnavailable);
  };

  let confidence = params
    .conf
    .as_deref()
    .map(parse_confidence)
    .transpose()
    .map_err(ApiError::InvalidConfidence)?;

  let mut upload = None;
  while let Some(field) = multipart.next_field().await? {
    if field.name() != Some(FILE_FIELD) {
      continue;
    }

    let content_type = field.content_type().unwrap_or_default().to_string();
    if !content_type.starts_with("image/") {
      warn!("拒绝非图像上传，Content-Type: '{}'", content_type);
      return Err(ApiError::InvalidContentType);
    }

    let file_name = field.file_name().unwrap_or_default().to_string();
    let bytes = field.bytes().await?;
    debug!(
      "收到上传文件 '{}'，类型 {}，大小 {} 字节",
      file_name,
      content_type,
      bytes.len()
    );
    upload = Some(bytes);
    break;
  }
  let bytes = upload.ok_or(ApiError::MissingFile)?;

  let result = tokio::task::spawn_blocking(move || service.predict_with(&bytes, confidence))
    .await
    .map_err(|e| {
      error!("检测任务异常退出: {}", e);
      ApiError::Internal
    })?
    .ok_or(ApiError::InvalidImage)?;

  let filename = format!("{}.jpg", Uuid::new_v4());
  let store = Arc::clone(&state.store);
  let annotated = result.image;
  let target = filename.clone();
  tokio::task::spawn_blocking(move || store.save(&annotated, &target))
    .await
    .map_err(|e| {
      error!("保存任务异常退出: {}", e);
      ApiError::Internal
    })?
    .map_err(|e| {
      error!("无法保存标注图像 {}: {}", filename, e);
      ApiError::Internal
    })?;

  let image_url = state.store.url_for(&filename);
  info!(
    "检测完成: {} 个物体，结果 {}",
    result.detections.len(),
    image_url
  );

  Ok(Json(DetectResponse {
    success: true,
    filename,
    image_url,
    detections_count: result.detections.len(),
    detections: result.detections,
  }))
}
