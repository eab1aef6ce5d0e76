use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub restaurant_responses_total: IntCounterVec,
    pub arbitration_latency_seconds: HistogramVec,
    pub broadcast_assignments_total: IntCounter,
    pub delivery_transitions_total: IntCounterVec,
    pub geofence_events_total: IntCounterVec,
    pub active_tracking_sessions: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let restaurant_responses_total = IntCounterVec::new(
            Opts::new(
                "restaurant_responses_total",
                "Restaurant responses to assignment offers by outcome",
            ),
            &["outcome"],
        )
        .expect("valid restaurant_responses_total metric");

        let arbitration_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "arbitration_latency_seconds",
                "Latency of accept arbitration in seconds",
            ),
            &["outcome"],
        )
        .expect("valid arbitration_latency_seconds metric");

        let broadcast_assignments_total = IntCounter::new(
            "broadcast_assignments_total",
            "Restaurant assignment offers created by broadcasts",
        )
        .expect("valid broadcast_assignments_total metric");

        let delivery_transitions_total = IntCounterVec::new(
            Opts::new(
                "delivery_transitions_total",
                "Delivery assignment transitions by resulting status",
            ),
            &["status"],
        )
        .expect("valid delivery_transitions_total metric");

        let geofence_events_total = IntCounterVec::new(
            Opts::new("geofence_events_total", "Geofence events by type"),
            &["event_type"],
        )
        .expect("valid geofence_events_total metric");

        let active_tracking_sessions = IntGauge::new(
            "active_tracking_sessions",
            "Currently open courier tracking sessions",
        )
        .expect("valid active_tracking_sessions metric");

        registry
            .register(Box::new(restaurant_responses_total.clone()))
            .expect("register restaurant_responses_total");
        registry
            .register(Box::new(arbitration_latency_seconds.clone()))
            .expect("register arbitration_latency_seconds");
        registry
            .register(Box::new(broadcast_assignments_total.clone()))
            .expect("register broadcast_assignments_total");
        registry
            .register(Box::new(delivery_transitions_total.clone()))
            .expect("register delivery_transitions_total");
        registry
            .register(Box::new(geofence_events_total.clone()))
            .expect("register geofence_events_total");
        registry
            .register(Box::new(active_tracking_sessions.clone()))
            .expect("register active_tracking_sessions");

        Self {
            registry,
            restaurant_responses_total,
            arbitration_latency_seconds,
            broadcast_assignments_total,
            delivery_transitions_total,
            geofence_events_total,
            active_tracking_sessions,
        }
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
