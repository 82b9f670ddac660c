// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use http_body_util::BodyExt;
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::http_utils::{
    log_and_create_http_response, verify_request_content_length, with_cors, Body,
};
use crate::sink::{format_line, FileSink};
use crate::validate::validate_record;

const LOG_ENDPOINT_PATH: &str = "/log";
const HEALTH_ENDPOINT_PATH: &str = "/health";

/// Aggregate counters, shared across concurrent handlers. Process
/// lifetime only; nothing is persisted across restarts.
pub struct CollectorStats {
    logs_received: AtomicU64,
    started_at: Instant,
}

impl CollectorStats {
    fn new() -> Self {
        CollectorStats {
            logs_received: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn logs_received(&self) -> u64 {
        self.logs_received.load(Ordering::Relaxed)
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    fn record(&self, n: u64) {
        self.logs_received.fetch_add(n, Ordering::Relaxed);
    }
}

/// The log ingestion server.
pub struct Collector {
    pub config: Arc<ServerConfig>,
    stats: Arc<CollectorStats>,
}

impl Collector {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Collector {
            config,
            stats: Arc::new(CollectorStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<CollectorStats> {
        Arc::clone(&self.stats)
    }

    /// Binds the listener and serves until the process exits.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let sink = if self.config.enable_file_logging {
            let (sink, _writer) = FileSink::start(self.config.log_file.clone());
            Some(Arc::new(sink))
        } else {
            None
        };

        let endpoint_config = Arc::clone(&self.config);
        let stats = Arc::clone(&self.stats);
        let service = service_fn(move |req| {
            // called for each http request
            let config = Arc::clone(&endpoint_config);
            let stats = Arc::clone(&stats);
            let sink = sink.clone();
            Collector::endpoint_handler(config, req, stats, sink)
        });

        let addr = SocketAddr::from(([127, 0, 0, 1], self.config.port));
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Collector started: listening on {}", listener.local_addr()?);

        Self::serve_tcp(listener, service).await
    }

    async fn serve_tcp<S>(
        listener: tokio::net::TcpListener,
        service: S,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        S: hyper::service::Service<Request<hyper::body::Incoming>, Response = Response<Body>>
            + Clone
            + Send
            + 'static,
        S::Future: Send,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill server on panic - log and continue
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }
    }

    async fn endpoint_handler(
        config: Arc<ServerConfig>,
        req: Request<hyper::body::Incoming>,
        stats: Arc<CollectorStats>,
        sink: Option<Arc<FileSink>>,
    ) -> http::Result<Response<Body>> {
        // CORS preflight is answered for any path
        if req.method() == Method::OPTIONS {
            return with_cors(Response::builder().status(StatusCode::NO_CONTENT))
                .body(Body::default());
        }
        match (req.method(), req.uri().path()) {
            (&Method::POST, LOG_ENDPOINT_PATH) => {
                match Self::log_handler(config, req, stats, sink).await {
                    Ok(res) => Ok(res),
                    Err(err) => log_and_create_http_response(
                        &format!("Error processing log request: {err}"),
                        StatusCode::INTERNAL_SERVER_ERROR,
                    ),
                }
            }
            (&Method::GET, HEALTH_ENDPOINT_PATH) => match Self::health_handler(&stats) {
                Ok(res) => Ok(res),
                Err(err) => log_and_create_http_response(
                    &format!("Health endpoint error: {err}"),
                    StatusCode::INTERNAL_SERVER_ERROR,
                ),
            },
            _ => with_cors(Response::builder().status(StatusCode::NOT_FOUND))
                .body(Body::from("Not found")),
        }
    }

    async fn log_handler(
        config: Arc<ServerConfig>,
        req: Request<hyper::body::Incoming>,
        stats: Arc<CollectorStats>,
        sink: Option<Arc<FileSink>>,
    ) -> Result<Response<Body>, Box<dyn std::error::Error + Send + Sync>> {
        let (parts, body) = req.into_parts();
        if let Some(response) = verify_request_content_length(
            &parts.headers,
            config.max_body_bytes,
            "Error processing log request",
        ) {
            return response.map_err(Into::into);
        }

        // a slow client gets a bounded wait, not a pinned handler
        let body_bytes = match tokio::time::timeout(config.body_read_timeout, body.collect()).await
        {
            Err(_) => {
                return log_and_create_http_response(
                    "Error processing log request: timed out reading body",
                    StatusCode::REQUEST_TIMEOUT,
                )
                .map_err(Into::into);
            }
            Ok(Err(e)) => {
                return log_and_create_http_response(
                    &format!("Error reading log request body: {e}"),
                    StatusCode::BAD_REQUEST,
                )
                .map_err(Into::into);
            }
            Ok(Ok(collected)) => collected.to_bytes(),
        };

        let payload: Value = match serde_json::from_slice(&body_bytes) {
            Ok(payload) => payload,
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Invalid JSON payload: {e}"),
                    StatusCode::BAD_REQUEST,
                )
                .map_err(Into::into);
            }
        };

        let response = if payload.get("messages").map_or(false, Value::is_array) {
            Self::process_batch(&config, &payload, &stats, sink.as_deref()).await
        } else if payload.get("level").is_some() {
            Self::process_single(&config, &payload, &stats, sink.as_deref()).await
        } else {
            log_and_create_http_response(
                "Expected a log record or a batch of messages",
                StatusCode::BAD_REQUEST,
            )
        };
        response.map_err(Into::into)
    }

    async fn process_single(
        config: &ServerConfig,
        payload: &Value,
        stats: &CollectorStats,
        sink: Option<&FileSink>,
    ) -> http::Result<Response<Body>> {
        match validate_record(payload, config.max_log_size) {
            Ok(record) => {
                let line = format_line(&record, None);
                println!("{line}");
                if let Some(sink) = sink {
                    sink.append(line).await;
                }
                stats.record(1);
                log_and_create_http_response("Log received", StatusCode::OK)
            }
            Err(err) => log_and_create_http_response(
                &format!("Invalid log record: {err}"),
                StatusCode::BAD_REQUEST,
            ),
        }
    }

    /// Batch elements are validated independently; invalid entries are
    /// skipped without failing the request.
    async fn process_batch(
        config: &ServerConfig,
        payload: &Value,
        stats: &CollectorStats,
        sink: Option<&FileSink>,
    ) -> http::Result<Response<Body>> {
        let messages = payload
            .get("messages")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let batch_id = payload.get("batchId").and_then(Value::as_str);
        let total = messages.len();
        let mut processed: u64 = 0;

        for raw in messages {
            match validate_record(raw, config.max_log_size) {
                Ok(record) => {
                    let line = format_line(&record, batch_id);
                    println!("{line}");
                    if let Some(sink) = sink {
                        sink.append(line).await;
                    }
                    processed += 1;
                }
                Err(err) => debug!("Skipping invalid batch entry: {err}"),
            }
        }
        stats.record(processed);
        log_and_create_http_response(
            &format!("Batch processed: {processed}/{total} messages"),
            StatusCode::OK,
        )
    }

    fn health_handler(stats: &CollectorStats) -> http::Result<Response<Body>> {
        let response_json = json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "uptime": stats.uptime_ms(),
            "version": env!("CARGO_PKG_VERSION"),
            "logsReceived": stats.logs_received(),
        });
        with_cors(
            Response::builder()
                .status(StatusCode::OK)
                .header(hyper::header::CONTENT_TYPE, "application/json"),
        )
        .body(Body::from(response_json.to_string()))
    }
}
