use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub tracking_numbers_allocated_total: IntCounterVec,
    pub allocation_failures_total: IntCounterVec,
    pub low_capacity_warnings_total: IntCounterVec,
    pub tracking_numbers_remaining: IntGaugeVec,
    pub slips_created_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let tracking_numbers_allocated_total = IntCounterVec::new(
            Opts::new(
                "tracking_numbers_allocated_total",
                "Tracking numbers issued by mode",
            ),
            &["mode"],
        )
        .expect("valid tracking_numbers_allocated_total metric");

        let allocation_failures_total = IntCounterVec::new(
            Opts::new(
                "allocation_failures_total",
                "Failed tracking number allocations by reason",
            ),
            &["reason"],
        )
        .expect("valid allocation_failures_total metric");

        let low_capacity_warnings_total = IntCounterVec::new(
            Opts::new(
                "low_capacity_warnings_total",
                "Allocations that left a range at or below the low-water mark",
            ),
            &["mode"],
        )
        .expect("valid low_capacity_warnings_total metric");

        let tracking_numbers_remaining = IntGaugeVec::new(
            Opts::new(
                "tracking_numbers_remaining",
                "Numbers left before the configured end of a range",
            ),
            &["courier_id", "mode"],
        )
        .expect("valid tracking_numbers_remaining metric");

        let slips_created_total = IntCounterVec::new(
            Opts::new("slips_created_total", "Courier slips created by mode"),
            &["mode"],
        )
        .expect("valid slips_created_total metric");

        registry
            .register(Box::new(tracking_numbers_allocated_total.clone()))
            .expect("register tracking_numbers_allocated_total");
        registry
            .register(Box::new(allocation_failures_total.clone()))
            .expect("register allocation_failures_total");
        registry
            .register(Box::new(low_capacity_warnings_total.clone()))
            .expect("register low_capacity_warnings_total");
        registry
            .register(Box::new(tracking_numbers_remaining.clone()))
            .expect("register tracking_numbers_remaining");
        registry
            .register(Box::new(slips_created_total.clone()))
            .expect("register slips_created_total");

        Self {
            registry,
            tracking_numbers_allocated_total,
            allocation_failures_total,
            low_capacity_warnings_total,
            tracking_numbers_remaining,
            slips_created_total,
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
