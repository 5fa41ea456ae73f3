//! Prometheus metrics for worker observability and autoscaling signals.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OutcomeLabel(pub String);

impl prometheus_client::encoding::EncodeLabelSet for OutcomeLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("outcome", self.0.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct WorkerMetrics {
    pub active_dioceses: Gauge,
    pub dioceses_processed: Family<OutcomeLabel, Counter>,
    pub parishes_extracted: Counter,
    pub facts_written: Counter,
    pub fetches: Family<OutcomeLabel, Counter>,
    pub breakers_open: Gauge,
    pub sweep_expired_workers: Counter,
    pub sweep_reclaimed_dioceses: Counter,
    pub registry: Arc<Registry>,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let active_dioceses = Gauge::default();
        registry.register(
            "vitality_worker_active_dioceses",
            "Dioceses currently being processed by this worker",
            active_dioceses.clone(),
        );

        let dioceses_processed = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "vitality_worker_dioceses_processed_total",
            "Diocese extraction cycles finished, by outcome",
            dioceses_processed.clone(),
        );

        let parishes_extracted = Counter::default();
        registry.register(
            "vitality_worker_parishes_extracted_total",
            "Parishes upserted from directory pages",
            parishes_extracted.clone(),
        );

        let facts_written = Counter::default();
        registry.register(
            "vitality_worker_facts_written_total",
            "ParishData rows appended",
            facts_written.clone(),
        );

        let fetches = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "vitality_fetch_requests_total",
            "Outbound fetches, by outcome family",
            fetches.clone(),
        );

        let breakers_open = Gauge::default();
        registry.register(
            "vitality_breakers_open",
            "Circuit breakers currently open",
            breakers_open.clone(),
        );

        let sweep_expired_workers = Counter::default();
        registry.register(
            "vitality_sweep_expired_workers_total",
            "Workers expired by the lead sweep",
            sweep_expired_workers.clone(),
        );

        let sweep_reclaimed_dioceses = Counter::default();
        registry.register(
            "vitality_sweep_reclaimed_dioceses_total",
            "Diocese assignments reclaimed by the lead sweep",
            sweep_reclaimed_dioceses.clone(),
        );

        Self {
            active_dioceses,
            dioceses_processed,
            parishes_extracted,
            facts_written,
            fetches,
            breakers_open,
            sweep_expired_workers,
            sweep_reclaimed_dioceses,
            registry: Arc::new(registry),
        }
    }

    pub fn record_fetch_outcome(&self, outcome: &str) {
        self.fetches
            .get_or_create(&OutcomeLabel(outcome.to_string()))
            .inc();
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).unwrap();
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creates_all_metrics() {
        let metrics = WorkerMetrics::new();
        let output = metrics.encode();

        assert!(output.contains("vitality_worker_active_dioceses"));
        assert!(output.contains("vitality_worker_dioceses_processed_total"));
        assert!(output.contains("vitality_worker_parishes_extracted_total"));
        assert!(output.contains("vitality_worker_facts_written_total"));
        assert!(output.contains("vitality_fetch_requests_total"));
        assert!(output.contains("vitality_breakers_open"));
    }

    #[test]
    fn encode_produces_valid_prometheus_text() {
        let metrics = WorkerMetrics::new();
        let output = metrics.encode();
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE vitality_worker_active_dioceses gauge"));
    }

    #[test]
    fn fetch_outcomes_are_labelled() {
        let metrics = WorkerMetrics::new();
        metrics.record_fetch_outcome("ok");
        metrics.record_fetch_outcome("blocked");
        metrics.record_fetch_outcome("blocked");

        let output = metrics.encode();
        assert!(output.contains("outcome=\"ok\""));
        assert!(output.contains("outcome=\"blocked\""));
    }
}
