// 该文件是 Shanan （山南西风） 项目的一部分。
// src/server/error.rs - 接口错误
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

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// `/detect` 的错误响应，响应体为 `{"detail": "..."}`
#[derive(Error, Debug)]
pub enum ApiError {
  #[error("Model not loaded")]
  ModelUnavailable,
  #[error("Invalid file type. Please upload an image.")]
  InvalidContentType,
  #[error("Invalid image file. Please upload a valid image.")]
  InvalidImage,
  #[error("Missing form field 'file'")]
  MissingFile,
  #[error("Invalid confidence threshold: {0}")]
  InvalidConfidence(String),
  #[error("{}", .0.body_text())]
  Upload(#[from] MultipartError),
  // 内部细节只写日志，不返回给调用方
  #[error("Internal server error")]
  Internal,
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::ModelUnavailable | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
      ApiError::InvalidContentType | ApiError::InvalidImage | ApiError::InvalidConfidence(_) => {
        StatusCode::BAD_REQUEST
      }
      ApiError::MissingFile => StatusCode::UNPROCESSABLE_ENTITY,
      ApiError::Upload(e) => e.status(),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let body = Json(json!({ "detail": self.to_string() }));
    (self.status(), body).into_response()
  }
}
