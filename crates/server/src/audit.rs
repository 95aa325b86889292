//! Audit log.
//!
//! Events go to one sink chosen by `audit.sink`: discarded, written as
//! structured log lines, or buffered and flushed as JSON lines into the
//! storage backend by a background task.

use crate::auth::UserContext;
use axum::extract::{ConnectInfo, FromRequestParts, Request};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use boring_core::config::{AuditConfig, AuditSink};
use boring_storage::{ObjectStore, PutMode};
use bytes::Bytes;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Who made a request, as far as the transport can tell.
#[derive(Clone, Debug, Default)]
pub struct ClientInfo {
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub(crate) fn from_parts(
        headers: &HeaderMap,
        connect: Option<&ConnectInfo<SocketAddr>>,
    ) -> Self {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty());
        let real_ip = || {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
        };
        Self {
            source_ip: forwarded
                .or_else(real_ip)
                .or_else(|| connect.map(|ci| ci.0.ip().to_string())),
            user_agent: headers
                .get(axum::http::header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }

    pub fn from_request(req: &Request) -> Self {
        Self::from_parts(req.headers(), req.extensions().get())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientInfo {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(&parts.headers, parts.extensions.get()))
    }
}

/// A single audit record.
#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// `auth.login`, `registry.module_access` or `registry.provider_access`.
    pub event: &'static str,
    /// `success`/`failure` for logins, `list`/`download`/`view` for access.
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub duration_ms: u64,
}

impl AuditEvent {
    pub fn new(
        event: &'static str,
        action: &'static str,
        client: &ClientInfo,
        started: Instant,
    ) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            event,
            action,
            resource: None,
            user: None,
            source_ip: client.source_ip.clone(),
            user_agent: client.user_agent.clone(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn with_user(mut self, user: Option<UserContext>) -> Self {
        self.user = user;
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

struct StorageSink {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    max_buffered: usize,
    buffer: Mutex<Vec<AuditEvent>>,
    wake: Notify,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl StorageSink {
    fn take(&self) -> Vec<AuditEvent> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }

    async fn flush(&self) {
        let events = self.take();
        if events.is_empty() {
            return;
        }

        let mut body = Vec::new();
        for event in &events {
            match serde_json::to_vec(event) {
                Ok(line) => {
                    body.extend_from_slice(&line);
                    body.push(b'\n');
                }
                Err(e) => tracing::warn!(error = %e, "dropping unserializable audit event"),
            }
        }

        let now = OffsetDateTime::now_utc();
        let key = format!(
            "{}/{:04}/{:02}/{:02}/{}-{}.jsonl",
            self.prefix.trim_matches('/'),
            now.year(),
            u8::from(now.month()),
            now.day(),
            now.unix_timestamp(),
            uuid::Uuid::new_v4()
        );
        let stored = self
            .store
            .put(&key, Bytes::from(body), PutMode::Create)
            .await;
        match stored {
            Ok(()) => tracing::debug!(key = %key, events = events.len(), "audit events flushed"),
            Err(e) => tracing::error!(
                key = %key,
                events = events.len(),
                error = %e,
                "failed to flush audit events"
            ),
        }
    }
}

enum Sink {
    Discard,
    Log,
    Storage(Arc<StorageSink>),
}

/// Cheap-to-clone handle to the configured audit sink.
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<Sink>,
}

impl AuditLog {
    pub fn disabled() -> Self {
        Self {
            sink: Arc::new(Sink::Discard),
        }
    }

    /// Build the sink. The storage sink spawns its flusher, so this must run
    /// inside a Tokio runtime.
    pub fn from_config(config: &AuditConfig, store: Arc<dyn ObjectStore>) -> Self {
        let sink = match config.sink {
            AuditSink::None => Sink::Discard,
            AuditSink::Log => Sink::Log,
            AuditSink::Storage => {
                let sink = Arc::new(StorageSink {
                    store,
                    prefix: config.prefix.clone(),
                    max_buffered: config.max_buffered_events.max(1),
                    buffer: Mutex::new(Vec::new()),
                    wake: Notify::new(),
                    flusher: Mutex::new(None),
                });
                let interval = config.flush_interval();
                let worker = Arc::clone(&sink);
                let handle = tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {}
                            _ = worker.wake.notified() => {}
                        }
                        worker.flush().await;
                    }
                });
                *sink.flusher.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                Sink::Storage(sink)
            }
        };
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn record(&self, event: AuditEvent) {
        match self.sink.as_ref() {
            Sink::Discard => {}
            Sink::Log => match serde_json::to_string(&event) {
                Ok(json) => tracing::info!(target: "audit", event = %json, "audit"),
                Err(e) => tracing::warn!(error = %e, "dropping unserializable audit event"),
            },
            Sink::Storage(sink) => {
                let buffered = {
                    let mut buffer = sink.buffer.lock().unwrap_or_else(PoisonError::into_inner);
                    buffer.push(event);
                    buffer.len()
                };
                if buffered >= sink.max_buffered {
                    sink.wake.notify_one();
                }
            }
        }
    }

    /// Stop the flusher and write out anything still buffered.
    pub async fn close(&self) {
        if let Sink::Storage(sink) = self.sink.as_ref() {
            let handle = sink
                .flusher
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(handle) = handle {
                handle.abort();
                let _ = handle.await;
            }
            sink.flush().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boring_storage::{MemoryBackend, ObjectStoreListExt};
    use std::time::Duration;

    fn client() -> ClientInfo {
        ClientInfo {
            source_ip: Some("10.0.0.1".to_string()),
            user_agent: Some("Terraform/1.9.0".to_string()),
        }
    }

    #[test]
    fn client_info_prefers_forwarded_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.2".parse().unwrap());
        headers.insert("x-real-ip", "198.51.100.1".parse().unwrap());
        let connect = ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 5601)));
        let info = ClientInfo::from_parts(&headers, Some(&connect));
        assert_eq!(info.source_ip.as_deref(), Some("203.0.113.7"));

        headers.remove("x-forwarded-for");
        let info = ClientInfo::from_parts(&headers, Some(&connect));
        assert_eq!(info.source_ip.as_deref(), Some("198.51.100.1"));

        let info = ClientInfo::from_parts(&HeaderMap::new(), Some(&connect));
        assert_eq!(info.source_ip.as_deref(), Some("127.0.0.1"));
    }

    #[tokio::test]
    async fn close_flushes_buffered_events() {
        let store = MemoryBackend::new();
        let config = AuditConfig {
            sink: AuditSink::Storage,
            flush_interval_secs: 3600,
            ..AuditConfig::default()
        };
        let audit = AuditLog::from_config(&config, Arc::new(store.clone()));
        audit.record(
            AuditEvent::new("registry.module_access", "list", &client(), Instant::now())
                .with_resource("acme/tls/aws"),
        );
        audit.close().await;

        let keys = store.list_keys("audit/").await.unwrap();
        assert_eq!(keys.len(), 1);
        let body = store.get(&keys[0]).await.unwrap();
        let line: serde_json::Value = serde_json::from_slice(body.trim_ascii_end()).unwrap();
        assert_eq!(line["event"], "registry.module_access");
        assert_eq!(line["action"], "list");
        assert_eq!(line["source_ip"], "10.0.0.1");
    }

    #[tokio::test]
    async fn size_threshold_triggers_early_flush() {
        let store = MemoryBackend::new();
        let config = AuditConfig {
            sink: AuditSink::Storage,
            flush_interval_secs: 3600,
            max_buffered_events: 2,
            ..AuditConfig::default()
        };
        let audit = AuditLog::from_config(&config, Arc::new(store.clone()));
        for _ in 0..2 {
            audit.record(AuditEvent::new("auth.login", "success", &client(), Instant::now()));
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while store.list_keys("audit/").await.unwrap().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "no flush happened");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        audit.close().await;
    }
}
