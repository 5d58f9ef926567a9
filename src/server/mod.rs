// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! HTTP + WebSocket 服务 (axum)
//!
//! 事件循环只负责收发; 检测和视频处理放到阻塞线程池,
//! 同时运行的任务数由信号量限制, 每个任务有截止时间.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Semaphore;

use crate::error::Error;
use crate::progress::ProgressEvent;
use crate::service::{ErrorBody, LiveBatchSession, TrackingService};

#[derive(Clone)]
pub struct AppState {
    service: Arc<TrackingService>,
    jobs: Arc<Semaphore>,
}

impl AppState {
    pub fn new(service: Arc<TrackingService>) -> Self {
        let permits = service.settings().server.max_concurrent_jobs.max(1);
        Self {
            service,
            jobs: Arc::new(Semaphore::new(permits)),
        }
    }
}

/// 错误响应: `{"error": message}` + 状态码
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "❌ request failed");
        } else {
            tracing::warn!(error = %self.0, "⚠️ bad request");
        }
        (status, Json(ErrorBody::new(self.0.to_string()))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let limit = state.service.settings().server.max_upload_mb * 1024 * 1024;
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/detect", post(detect))
        .route("/process_image", post(process_image))
        .route("/process_video", post(process_video))
        .route("/detect_batch", post(detect_batch))
        .route("/ws", get(ws_progress))
        .route("/ws/track", get(ws_track))
        .route("/ws/batch", get(ws_batch))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

/// 启动服务, 直到 Ctrl-C
pub async fn serve(service: Arc<TrackingService>) -> anyhow::Result<()> {
    let bind = service.settings().server.bind.clone();
    let app = router(AppState::new(service));
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("🚀 服务已启动: http://{}", bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("🛑 收到退出信号");
        })
        .await?;
    Ok(())
}

/// 在阻塞线程池运行任务 (受并发数和截止时间限制)
async fn run_job<T, F>(state: &AppState, timeout: Duration, job: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce(&TrackingService) -> Result<T, Error> + Send + 'static,
{
    let service = state.service.clone();
    run_bounded(&state.jobs, timeout, move || job(service.as_ref())).await
}

/// 许可随任务一起移入阻塞线程, 任务真正结束后才归还.
/// 超时只让调用方返回, 不会让出并发名额.
async fn run_bounded<T, F>(jobs: &Arc<Semaphore>, timeout: Duration, job: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, Error> + Send + 'static,
{
    let permit = jobs
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| Error::Resource("worker pool closed".into()))?;

    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        job()
    });
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "❌ worker task failed");
            Err(Error::Resource("worker task failed".into()))
        }
        Err(_) => Err(Error::Timeout(timeout)),
    }
}

fn job_timeout(state: &AppState) -> Duration {
    state.service.settings().pipeline.job_timeout()
}

fn live_timeout(state: &AppState) -> Duration {
    state.service.settings().server.live_timeout()
}

/// 上传的表单
#[derive(Default)]
struct UploadForm {
    files: Vec<(String, Vec<u8>)>,
    focus_id: Option<u32>,
    skip_frames: u32,
    full_resolution: bool,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, Error> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| Error::decode("form", e))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" | "files" => {
                    let file_name = field.file_name().unwrap_or("upload").to_string();
                    let bytes = field.bytes().await.map_err(|e| Error::decode("form", e))?;
                    form.files.push((file_name, bytes.to_vec()));
                }
                "focus_id" | "skip_frames" | "full_resolution" => {
                    let text = field.text().await.map_err(|e| Error::decode("form", e))?;
                    let text = text.trim();
                    match name.as_str() {
                        "focus_id" if !text.is_empty() => {
                            form.focus_id = Some(text.parse().map_err(|e| Error::decode("focus_id", e))?);
                        }
                        "skip_frames" if !text.is_empty() => {
                            form.skip_frames = text.parse().map_err(|e| Error::decode("skip_frames", e))?;
                        }
                        "full_resolution" => {
                            form.full_resolution = matches!(text, "true" | "True" | "1" | "on");
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        Ok(form)
    }

    fn single_file(&mut self) -> Result<Vec<u8>, Error> {
        self.files
            .pop()
            .map(|(_, bytes)| bytes)
            .ok_or_else(|| Error::decode("form", "missing file field"))
    }
}

async fn detect(State(state): State<AppState>, multipart: Multipart) -> Result<Response, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let bytes = form.single_file()?;
    let focus_id = form.focus_id;
    let resp = run_job(&state, job_timeout(&state), move |svc| svc.detect(&bytes, focus_id)).await?;
    Ok(Json(resp).into_response())
}

async fn process_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let bytes = form.single_file()?;
    let out = run_job(&state, job_timeout(&state), move |svc| svc.process_image(&bytes)).await?;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/jpeg");
    for (name, value) in out.headers() {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(out.jpeg))
        .map_err(|e| ApiError(Error::Resource(e.to_string())))
}

/// 处理方 future 被丢弃 (客户端断开) 时通知工作线程
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

async fn process_video(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let bytes = form.single_file()?;
    let (skip, full) = (form.skip_frames, form.full_resolution);
    tracing::info!(
        "🎬 Processing video ({} bytes, skip_frames={}, full_resolution={})",
        bytes.len(),
        skip,
        full
    );

    let cancel = Arc::new(AtomicBool::new(false));
    // 超时或客户端断开时工作线程在下一帧退出
    let _guard = CancelOnDrop(cancel.clone());
    let out = run_job(&state, job_timeout(&state), move |svc| {
        svc.process_video(&bytes, skip, full, cancel)
    })
    .await?;

    let headers = out.headers();
    let content_type = out.content_type;

    // 分块在阻塞线程读取; 流被丢弃时 ChunkedArtifact 删除文件
    let stream = futures_util::stream::unfold(Some(out.chunks), |slot| async move {
        let mut chunks = slot?;
        let (next, chunks) = tokio::task::spawn_blocking(move || {
            let next = chunks.next();
            (next, chunks)
        })
        .await
        .ok()?;
        next.map(|item| (item, Some(chunks)))
    });

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"processed_video\"",
        );
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError(Error::Resource(e.to_string())))
}

async fn detect_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = UploadForm::read(multipart).await?;
    if form.files.is_empty() {
        return Err(ApiError(Error::decode("form", "missing files field")));
    }
    let files = form.files;
    let resp = run_job(&state, job_timeout(&state), move |svc| svc.detect_batch(&files)).await?;
    Ok(Json(resp).into_response())
}

/// `/ws`: 推送视频处理进度
async fn ws_progress(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| progress_conn(socket, state))
}

async fn progress_conn(socket: WebSocket, state: AppState) {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<ProgressEvent>(64);
    let broadcaster = state.service.progress().clone();
    let id = broadcaster.register(tx);
    tracing::info!(subscriber = id, "🔌 progress client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                if ws_tx.send(Message::Text(event.to_json())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    broadcaster.unregister(id);
    tracing::info!(subscriber = id, "🔌 progress client disconnected");
}

/// `/ws/track`: 二进制帧 → 检测结果
async fn ws_track(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| track_conn(socket, state))
}

async fn track_conn(mut socket: WebSocket, state: AppState) {
    while let Some(Ok(msg)) = socket.recv().await {
        let bytes = match msg {
            Message::Binary(bytes) => bytes,
            Message::Close(_) => break,
            _ => continue,
        };
        let replied = run_job(&state, live_timeout(&state), move |svc| svc.live_track(&bytes)).await;
        let reply = match replied {
            Ok(Some(reply)) => reply,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!(error = %e, "❌ live detection failed");
                break;
            }
        };
        let text = match serde_json::to_string(&reply) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "⚠️ live reply serialization failed");
                continue;
            }
        };
        if socket.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
    let _ = socket.close().await;
}

/// `/ws/batch`: base64 批次, 整个连接共用一个跟踪会话
async fn ws_batch(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| batch_conn(socket, state))
}

async fn batch_conn(mut socket: WebSocket, state: AppState) {
    let mut live = Some(LiveBatchSession::new(state.service.clone()));

    while let Some(Ok(msg)) = socket.recv().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Some(mut session) = live.take() else { break };
        // 超时时会话留在工作线程里, 处理结束后随之释放
        let joined = run_job(&state, live_timeout(&state), move |_| {
            let result = session.handle_text(&text);
            Ok((session, result))
        })
        .await;

        let (session, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(error = %e, "❌ batch worker failed");
                break;
            }
        };
        live = Some(session);

        match result {
            Ok(Some(reply)) => {
                let text = match serde_json::to_string(&reply) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "⚠️ batch reply serialization failed");
                        continue;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) if e.is_client_error() => {
                tracing::warn!(error = %e, "⚠️ invalid batch message ignored");
            }
            Err(e) => {
                tracing::error!(error = %e, "❌ batch processing failed");
                break;
            }
        }
    }
    let _ = socket.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timeout_keeps_slot_until_job_ends() {
        let jobs = Arc::new(Semaphore::new(1));
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);

        let err = run_bounded(&jobs, Duration::from_millis(50), move || {
            let _ = release_rx.recv();
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        // 任务仍在运行, 名额未归还
        assert_eq!(jobs.available_permits(), 0);

        release_tx.send(()).unwrap();
        let permit = tokio::time::timeout(Duration::from_secs(5), jobs.clone().acquire_owned())
            .await
            .unwrap()
            .unwrap();
        drop(permit);
        assert_eq!(jobs.available_permits(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_jobs_never_exceed_permits() {
        let jobs = Arc::new(Semaphore::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let jobs = jobs.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _ = run_bounded(&jobs, Duration::from_millis(5), move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(40));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
