use crate::api::Error;
use crate::plant::PlantSnapshot;
use prometheus::{Encoder, GaugeVec, IntCounter, TextEncoder};

lazy_static! {
    static ref PLANT_POWER_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("plant_power_kw", "current power production of the plant (in kW)"),
        &["plant"],
    )
    .unwrap();
    static ref PLANT_ENERGY_TODAY_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "plant_energy_today_kwh",
            "total amount of energy generated in current day (in kWh)",
        ),
        &["plant"],
    )
    .unwrap();
    static ref PLANT_ONLINE_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("plant_online", "1 if the last check of the plant succeeded"),
        &["plant"],
    )
    .unwrap();
    static ref PLANT_FAILURES_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "plant_consecutive_failures",
            "failed checks since the last successful one",
        ),
        &["plant"],
    )
    .unwrap();
    static ref MONITORING_CYCLES_COUNTER: IntCounter = register_int_counter!(
        "monitoring_cycles_total",
        "number of completed polling cycles"
    )
    .unwrap();
}

/// Feed the state of plant `key` to the Prometheus registry.
pub fn observe(key: &str, snapshot: &PlantSnapshot) {
    PLANT_POWER_GAUGE
        .with_label_values(&[key])
        .set(snapshot.power);
    PLANT_ENERGY_TODAY_GAUGE
        .with_label_values(&[key])
        .set(snapshot.energy_today);
    PLANT_ONLINE_GAUGE
        .with_label_values(&[key])
        .set(if snapshot.is_online { 1.0 } else { 0.0 });
    PLANT_FAILURES_GAUGE
        .with_label_values(&[key])
        .set(f64::from(snapshot.consecutive_failures));
}

pub fn cycle_finished() {
    MONITORING_CYCLES_COUNTER.inc();
}

/// Read metrics from Prometheus exporter registry.
pub fn read() -> Result<String, Error> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode(&metric_families, &mut buffer)
        .or(Err(Error::InternalError))?;
    String::from_utf8(buffer).or(Err(Error::InternalError))
}
