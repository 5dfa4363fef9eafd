//! Request ID propagation and HTTP metrics as a single Tower layer

use axum::{body::Body, http::Request, response::Response};
use metrics::{counter, gauge, histogram};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone, Default)]
pub struct ObservabilityLayer;

impl<S> Layer<S> for ObservabilityLayer {
    type Service = Observability<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Observability { inner }
    }
}

#[derive(Clone)]
pub struct Observability<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for Observability<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let method = request.method().to_string();
        let route = route_label(request.uri().path());
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Take the service that was driven to readiness, leave a fresh clone
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let span = tracing::info_span!("http", request_id = %request_id, method = %method, route = %route);

        gauge!("gatekeeper_http_requests_in_flight").increment(1.0);
        let started = Instant::now();

        Box::pin(
            async move {
                let result = inner.call(request).await;
                gauge!("gatekeeper_http_requests_in_flight").decrement(1.0);

                let mut response = result?;
                let status = response.status().as_u16().to_string();
                counter!(
                    "gatekeeper_http_requests_total",
                    "method" => method.clone(),
                    "route" => route.clone(),
                    "status" => status
                )
                .increment(1);
                histogram!(
                    "gatekeeper_http_request_duration_seconds",
                    "method" => method,
                    "route" => route
                )
                .record(started.elapsed().as_secs_f64());

                if let Ok(value) = request_id.parse() {
                    response.headers_mut().insert(REQUEST_ID_HEADER, value);
                }
                Ok(response)
            }
            .instrument(span),
        )
    }
}

/// Path with id segments collapsed so metric labels stay low-cardinality
fn route_label(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if Uuid::parse_str(segment).is_ok() {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
