//! Request metrics middleware.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::Request;
use axum::response::Response;
use tower::{Layer, Service};

use crate::metrics::{HttpLabels, HttpLabelsWithStatus, HttpMethod, Metrics};

/// Layer recording request counts, latency and in-flight gauge for every
/// route it wraps.
#[derive(Clone)]
pub struct MetricsLayer {
    metrics: Arc<Metrics>,
}

impl MetricsLayer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    metrics: Arc<Metrics>,
}

impl<S> Service<Request> for MetricsService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let metrics = self.metrics.clone();
        let method = HttpMethod::from(req.method());
        let endpoint = req.uri().path().to_string();

        metrics.http_requests_in_flight.inc();
        let start = Instant::now();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let result = fut.await;
            metrics.http_requests_in_flight.dec();
            metrics
                .http_request_duration_seconds
                .get_or_create(&HttpLabels {
                    method: method.clone(),
                    endpoint: endpoint.clone(),
                })
                .observe(start.elapsed().as_secs_f64());

            if let Ok(response) = &result {
                metrics
                    .http_requests_total
                    .get_or_create(&HttpLabelsWithStatus {
                        method,
                        endpoint,
                        status: response.status().as_u16(),
                    })
                    .inc();
            }
            result
        })
    }
}
