use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::HashSet;

pub struct Metrics {
    request_counter: Counter<u64>,
    prediction_duration: Histogram<u64>,
    outcome_counter: Counter<u64>,
    pub registry: Registry,
    // The exporter stops collecting once every provider handle is dropped.
    _provider: SdkMeterProvider,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();

        let meter = provider.meter("action_api");
        global::set_meter_provider(provider.clone());

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        // Clip predictions take from tens of milliseconds to tens of seconds.
        let boundaries = generate_boundaries((50, 250, 1_000, 5_000, 30_000));

        let prediction_duration = meter
            .u64_histogram("prediction_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of prediction requests in milliseconds")
            .build();

        let outcome_counter = meter
            .u64_counter("prediction_outcomes_total")
            .with_description("Prediction results by outcome")
            .build();

        Ok(Metrics {
            request_counter,
            prediction_duration,
            outcome_counter,
            registry,
            _provider: provider,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_prediction_duration(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.prediction_duration.record(duration_ms, &attributes);
    }

    /// `outcome` is `success` or an error kind name.
    pub fn record_outcome(&self, outcome: &str, route: &str) {
        let attributes = vec![
            KeyValue::new("route", route.to_string()),
            KeyValue::new("outcome", outcome.to_string()),
        ];
        self.outcome_counter.add(1, &attributes);
    }
}

fn generate_boundaries(parts: (u64, u64, u64, u64, u64)) -> Vec<f64> {
    let first_step: usize = 50;
    let middle_step: usize = 250;
    let end_step: usize = 1_000;
    let tail_step: usize = 5_000;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    #[test]
    fn test_generate_boundaries() {
        let get = generate_boundaries((50, 250, 1_000, 5_000, 30_000));

        assert_eq!(&get[..5], &[50.0, 100.0, 150.0, 200.0, 250.0]);
        assert_eq!(&get[5..8], &[500.0, 750.0, 1_000.0]);
        assert_eq!(get.last(), Some(&30_000.0));
        assert!(get.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_metrics_are_exported() {
        let metrics = Metrics::new().unwrap();

        metrics.record_request("/api/v1/predict");
        metrics.record_outcome("CorruptMedia", "/api/v1/predict");
        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&metrics.registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains("requests_total"));
        assert!(text.contains("prediction_outcomes_total"));
        assert!(text.contains("outcome=\"CorruptMedia\""));
    }
}
