use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub parcel_transitions_total: IntCounterVec,
    pub notifications_total: IntCounterVec,
    pub operation_latency_seconds: HistogramVec,
    pub available_drivers: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let parcel_transitions_total = IntCounterVec::new(
            Opts::new("parcel_transitions_total", "Committed parcel status changes by resulting status"),
            &["status"],
        )
        .expect("valid parcel_transitions_total metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Notifications by kind and outcome"),
            &["kind", "outcome"],
        )
        .expect("valid notifications_total metric");

        let operation_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Latency of lifecycle operations in seconds",
            ),
            &["operation"],
        )
        .expect("valid operation_latency_seconds metric");

        let available_drivers =
            IntGauge::new("available_drivers", "Drivers currently able to receive assignments")
                .expect("valid available_drivers metric");

        registry
            .register(Box::new(parcel_transitions_total.clone()))
            .expect("register parcel_transitions_total");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register notifications_total");
        registry
            .register(Box::new(operation_latency_seconds.clone()))
            .expect("register operation_latency_seconds");
        registry
            .register(Box::new(available_drivers.clone()))
            .expect("register available_drivers");

        Self {
            registry,
            parcel_transitions_total,
            notifications_total,
            operation_latency_seconds,
            available_drivers,
        }
    }

    pub fn record_transition(&self, status: &str) {
        self.parcel_transitions_total.with_label_values(&[status]).inc();
    }

    pub fn record_notification(&self, kind: &str, outcome: &str) {
        self.notifications_total.with_label_values(&[kind, outcome]).inc();
    }

    pub fn observe_latency(&self, operation: &str, seconds: f64) {
        self.operation_latency_seconds
            .with_label_values(&[operation])
            .observe(seconds);
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
