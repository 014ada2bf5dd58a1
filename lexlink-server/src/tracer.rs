use axum::{
    body::Body,
    http::{Request, Response},
};
use std::time::Duration;
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{DefaultOnBodyChunk, DefaultOnEos, MakeSpan, TraceLayer};
use tracing::{Span, error, info};

use crate::middleware::request_context::RequestContext;

type TraceLayerType = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    RelayMakeSpan,
    fn(&Request<Body>, &Span) -> (),
    fn(&Response<Body>, Duration, &Span) -> (),
    DefaultOnBodyChunk,
    DefaultOnEos,
    fn(ServerErrorsFailureClass, Duration, &Span) -> (),
>;

/// Span factory for relay traffic. Chat routes carry the conversation id in
/// the path, so `path` plus `request_id` is enough to stitch a stream's
/// lifecycle back together from the logs.
#[derive(Clone, Default)]
pub(crate) struct RelayMakeSpan;

impl<B> MakeSpan<B> for RelayMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .extensions()
            .get::<RequestContext>()
            .map(|ctx| ctx.request_id.clone())
            .unwrap_or_else(|| "n/a".into());

        tracing::info_span!(
            "relay_request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
            status_code = tracing::field::Empty
        )
    }
}

pub(crate) fn on_request_handler(req: &Request<Body>, span: &Span) {
    span.in_scope(|| {
        info!(
            method = %req.method(),
            path = %req.uri().path(),
            version = ?req.version(),
            "started processing request"
        );
    })
}

pub(crate) fn on_response_handler(response: &Response<Body>, latency: Duration, span: &Span) {
    span.record("status_code", response.status().as_u16());
    span.in_scope(|| {
        info!(
            status = %response.status(),
            latency = ?latency,
            "finished processing request"
        );
    })
}

pub(crate) fn on_failure_handler(error: ServerErrorsFailureClass, latency: Duration, span: &Span) {
    span.in_scope(|| {
        error!(
            error = %error,
            latency = ?latency,
            "error processing request"
        );
    })
}

/// Create a trace layer for HTTP request logging
pub fn create_trace_layer() -> TraceLayerType {
    TraceLayer::new_for_http()
        .make_span_with(RelayMakeSpan)
        .on_request(on_request_handler as fn(&Request<Body>, &Span))
        .on_response(on_response_handler as fn(&Response<Body>, Duration, &Span))
        .on_failure(on_failure_handler as fn(ServerErrorsFailureClass, Duration, &Span))
}
