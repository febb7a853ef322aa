// 该文件是 Shanan （山南西风） 项目的一部分。
// src/server.rs - HTTP 服务
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

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServeConfig;
use crate::model::load_runtime;
use crate::service::DetectionService;

pub mod error;
pub mod handler;
pub mod store;

pub use self::error::ApiError;
pub use self::handler::{DetectResponse, FILE_FIELD};
pub use self::store::ResultStore;

/// 所有请求共享的状态
///
/// `service` 为 `None` 表示模型加载失败，服务处于降级状态。
#[derive(Clone)]
pub struct AppState {
  pub service: Option<Arc<DetectionService>>,
  pub store: Arc<ResultStore>,
}

impl AppState {
  pub fn new(service: Option<DetectionService>, store: ResultStore) -> Self {
    Self {
      service: service.map(Arc::new),
      store: Arc::new(store),
    }
  }
}

/// 构建路由
pub fn router(state: AppState, static_dir: &Path, max_upload_bytes: usize) -> Router {
  let mut app = Router::new()
    .route("/detect", post(handler::detect))
    .route_service("/", ServeFile::new(static_dir.join("index.html")))
    .nest_service("/static", ServeDir::new(static_dir));

  if state.store.separate_mount() {
    app = app.nest_service(store::RESULTS_MOUNT, ServeDir::new(state.store.dir()));
  }

  app
    .layer(DefaultBodyLimit::max(max_upload_bytes))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// 加载模型并启动服务，直到收到 Ctrl-C
pub async fn run(config: ServeConfig) -> Result<()> {
  let store = ResultStore::new(&config.results_dir, &config.static_dir);
  store
    .prepare()
    .with_context(|| format!("无法创建结果目录: {}", store.dir().display()))?;
  info!("结果目录: {}", store.dir().display());

  let location = config.model.clone();
  let loaded = tokio::task::spawn_blocking(move || load_runtime(&location)).await?;
  let service = match loaded {
    Ok(runtime) => {
      info!("模型已加载: {}", config.model);
      Some(DetectionService::new(runtime, config.detector_options()))
    }
    Err(e) => {
      error!("模型加载失败，服务以降级模式运行: {}", e);
      None
    }
  };

  let state = AppState::new(service, store);
  let app = router(state, &config.static_dir, config.max_upload_bytes());

  let addr = config.socket_addr();
  let listener = tokio::net::TcpListener::bind(addr)
    .await
    .with_context(|| format!("无法监听 {}", addr))?;
  info!("服务已启动: http://{}", addr);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("服务异常退出")?;

  info!("服务已停止");
  Ok(())
}

async fn shutdown_signal() {
  match tokio::signal::ctrl_c().await {
    Ok(()) => info!("收到 Ctrl-C，正在停止服务"),
    Err(e) => {
      warn!("无法监听 Ctrl-C 信号: {}", e);
      std::future::pending::<()>().await;
    }
  }
}
