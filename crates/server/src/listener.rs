//! Connection settings shared by the plain and TLS listeners.

use axum_server::Server;
use hyper_util::rt::TokioTimer;
use std::time::Duration;

/// Close HTTP/1 connections whose request headers do not arrive within
/// `read_timeout`.
pub fn with_read_timeout<A>(mut server: Server<A>, read_timeout: Duration) -> Server<A> {
    server
        .http_builder()
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(read_timeout);
    server
}
