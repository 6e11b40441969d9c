//! HTTP server lifecycle: bind, serve, shut down on ctrl-c.

use std::io;

use axum::Router;
use tokio::net::TcpListener;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("Server error: {0}")]
    Serve(#[from] io::Error),
}

/// Bind `bind_addr` and serve `app` until ctrl-c.
pub async fn serve(app: Router, bind_addr: &str) -> Result<(), ServerError> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: bind_addr.to_string(),
            source,
        })?;
    serve_listener(listener, app).await
}

/// Serve on an already-bound listener. Split out so tests can bind an
/// ephemeral port and learn it before serving.
pub async fn serve_listener(listener: TcpListener, app: Router) -> Result<(), ServerError> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "Failed to install shutdown handler");
        return;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use axum::routing::get;

    use super::*;

    #[tokio::test]
    async fn bind_failure_names_the_address() {
        let err = serve(Router::new(), "256.0.0.1:0").await.unwrap_err();
        match err {
            ServerError::Bind { addr, .. } => assert_eq!(addr, "256.0.0.1:0"),
            other => panic!("expected bind error, got {other}"),
        }
    }

    #[tokio::test]
    async fn serves_requests_on_a_bound_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = Router::new().route("/ping", get(|| async { "pong" }));

        let server = tokio::spawn(serve_listener(listener, app));

        let body = reqwest::get(format!("http://127.0.0.1:{port}/ping"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "pong");

        server.abort();
    }
}
