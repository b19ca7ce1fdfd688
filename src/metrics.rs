//! Prometheus metrics for the gateway

use std::time::Duration;

use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Route template used as the `endpoint` label for a request path
///
/// Model names collapse into `{model}` and unknown paths share one label, so
/// the label set stays bounded.
pub fn endpoint_label(path: &str) -> &'static str {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        [""] => "/",
        ["metrics"] => "/metrics",
        ["v1", "health"] => "/v1/health",
        ["v1", "models"] => "/v1/models",
        ["v1", "models", _, "generateContent"] => "/v1/models/{model}/generateContent",
        ["v1", "models", _, "generateContentStream"] => "/v1/models/{model}/generateContentStream",
        ["v1", "models", _, "embedContent"] => "/v1/models/{model}/embedContent",
        _ => "unmatched",
    }
}

/// Gateway metrics
///
/// A disabled instance records nothing and exports nothing.
pub struct Metrics {
    inner: Option<Collectors>,
}

struct Collectors {
    registry: Registry,
    requests_total: IntCounterVec,
    request_latency_seconds: HistogramVec,
    inference_latency_seconds: HistogramVec,
    tokens_per_second: Gauge,
    active_requests: IntGauge,
}

impl Collectors {
    fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("api_requests_total", "Total API requests"),
            &["method", "endpoint", "status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_latency_seconds = HistogramVec::new(
            HistogramOpts::new("api_request_latency_seconds", "API request latency"),
            &["method", "endpoint"],
        )?;
        registry.register(Box::new(request_latency_seconds.clone()))?;

        let inference_latency_seconds = HistogramVec::new(
            HistogramOpts::new("inference_latency_seconds", "Model inference latency")
                .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            &["model", "method"],
        )?;
        registry.register(Box::new(inference_latency_seconds.clone()))?;

        let tokens_per_second =
            Gauge::new("tokens_per_second", "Generation throughput of the last request")?;
        registry.register(Box::new(tokens_per_second.clone()))?;

        let active_requests = IntGauge::new("active_requests", "Generations in flight")?;
        registry.register(Box::new(active_requests.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_latency_seconds,
            inference_latency_seconds,
            tokens_per_second,
            active_requests,
        })
    }
}

impl Metrics {
    pub fn new(enabled: bool) -> Result<Self, prometheus::Error> {
        let inner = if enabled {
            Some(Collectors::new()?)
        } else {
            None
        };
        Ok(Self { inner })
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Record one finished HTTP request
    pub fn observe_request(&self, method: &str, endpoint: &str, status: u16, elapsed: Duration) {
        if let Some(c) = &self.inner {
            let status = status.to_string();
            c.requests_total
                .with_label_values(&[method, endpoint, status.as_str()])
                .inc();
            c.request_latency_seconds
                .with_label_values(&[method, endpoint])
                .observe(elapsed.as_secs_f64());
        }
    }

    /// Record the duration of one model call
    pub fn observe_inference(&self, model: &str, method: &str, elapsed: Duration) {
        if let Some(c) = &self.inner {
            c.inference_latency_seconds
                .with_label_values(&[model, method])
                .observe(elapsed.as_secs_f64());
        }
    }

    pub fn record_throughput(&self, completion_tokens: u32, elapsed: Duration) {
        if let Some(c) = &self.inner {
            let seconds = elapsed.as_secs_f64();
            if seconds > 0.0 {
                c.tokens_per_second.set(f64::from(completion_tokens) / seconds);
            }
        }
    }

    /// Count a generation as in flight until the guard is dropped
    pub fn track_active(&self) -> ActiveGuard {
        let gauge = self.inner.as_ref().map(|c| c.active_requests.clone());
        if let Some(gauge) = &gauge {
            gauge.inc();
        }
        ActiveGuard { gauge }
    }

    /// Prometheus text exposition, `None` when metrics are disabled
    pub fn export(&self) -> Option<Result<String, prometheus::Error>> {
        self.inner.as_ref().map(|c| {
            let mut buffer = Vec::new();
            TextEncoder::new().encode(&c.registry.gather(), &mut buffer)?;
            String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
        })
    }
}

/// Decrements `active_requests` on drop
pub struct ActiveGuard {
    gauge: Option<IntGauge>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Some(gauge) = &self.gauge {
            gauge.dec();
        }
    }
}

/// Content type of the text exposition format
pub const EXPORT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
