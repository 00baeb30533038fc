//! Exposition of metrics in the [`prometheus`] text format.

use prometheus::Encoder as _;

use crate::Error;

#[cfg(feature = "http")]
#[doc(inline)]
pub use self::http::{router, serve};

/// Encodes all the metrics of the provided [`prometheus::Registry`] in the
/// text exposition format.
///
/// # Errors
///
/// If [`prometheus::TextEncoder`] fails to encode the metrics.
pub fn encode(registry: &prometheus::Registry) -> Result<String, Error> {
    let mut buf = Vec::new();
    prometheus::TextEncoder::new().encode(&registry.gather(), &mut buf)?;
    String::from_utf8(buf)
        .map_err(|e| prometheus::Error::Msg(e.to_string()).into())
}

#[cfg(feature = "http")]
mod http {
    //! HTTP endpoint serving the metrics to scrapers.

    use std::{io, net::SocketAddr};

    use axum::{
        extract::State,
        http::{header, StatusCode},
        response::IntoResponse,
        routing::get,
        Router,
    };

    /// Creates a new [`Router`] serving the metrics of the provided
    /// [`prometheus::Registry`] on `GET /metrics`.
    pub fn router(registry: prometheus::Registry) -> Router {
        Router::new().route("/metrics", get(metrics)).with_state(registry)
    }

    /// Serves the [`router()`] on the provided `addr` until the server fails.
    ///
    /// # Errors
    ///
    /// If the `addr` cannot be bound, or the server fails.
    pub async fn serve(
        addr: SocketAddr,
        registry: prometheus::Registry,
    ) -> io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "serving metrics on `/metrics`");
        axum::serve(listener, router(registry)).await
    }

    async fn metrics(
        State(registry): State<prometheus::Registry>,
    ) -> impl IntoResponse {
        scrape(&registry)
    }

    /// Renders a response with the metrics of the provided
    /// [`prometheus::Registry`].
    pub(super) fn scrape(
        registry: &prometheus::Registry,
    ) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
        match super::encode(registry) {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
                body,
            ),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode metrics");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                    format!("failed to encode metrics: {e}"),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_empty_registry() {
        assert_eq!(encode(&prometheus::Registry::new()).unwrap(), "");
    }

    #[test]
    fn encodes_registered_metrics() {
        let registry = prometheus::Registry::new();
        let gauge = prometheus::Gauge::new("up", "Up.").unwrap();
        gauge.set(1.0);
        registry.register(Box::new(gauge)).unwrap();

        assert_eq!(
            encode(&registry).unwrap(),
            "# HELP up Up.\n# TYPE up gauge\nup 1\n",
        );
    }

    #[cfg(feature = "http")]
    #[test]
    fn scrapes_with_text_content_type() {
        use axum::http::{header, StatusCode};

        let registry = prometheus::Registry::new();
        let counter = prometheus::IntCounter::new("hits", "Hits.").unwrap();
        counter.inc();
        registry.register(Box::new(counter)).unwrap();

        let (status, [(name, value)], body) = http::scrape(&registry);

        assert_eq!(status, StatusCode::OK);
        assert_eq!(name, header::CONTENT_TYPE);
        assert_eq!(value, prometheus::TEXT_FORMAT);
        assert!(body.contains("hits 1"), "{body}");
    }
}
