use super::PlantAdapter;
use crate::api::response::as_f64;
use crate::api::Error;
use crate::clock::Clock;
use crate::model::StationKpi;
use crate::plant::{DataSource, PlantIdentity, Reading};
use crate::session::{NorthboundManager, SessionManager};
use async_trait::async_trait;
use chrono::{DateTime, Local, Timelike};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Plant id that resolves to the first station of the account.
pub const FIRST_AVAILABLE_PLANT: &str = "main";

const DAILY_ENERGY_ALIASES: [&str; 3] = ["day_power", "dailyEnergy", "dayPower"];
const INSTANT_POWER_ALIASES: [&str; 5] = [
    "first_power_station",
    "power_now",
    "activePower",
    "currentPower",
    "real_power",
];
const INVERTER_POWER: &str = "inverter_power";

/// Bell-shaped approximation of the share of peak output produced at an hour of day.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EstimationCurve {
    pub peak_hour: u32,
    pub half_width: f64,
    pub floor: f64,
    pub daylight_start: u32,
    pub daylight_end: u32,
    /* daily energy divided by this approximates peak power without a known capacity */
    pub energy_divisor: f64,
}

impl Default for EstimationCurve {
    fn default() -> Self {
        EstimationCurve {
            peak_hour: 13,
            half_width: 5.0,
            floor: 0.1,
            daylight_start: 8,
            daylight_end: 19,
            energy_divisor: 10.0,
        }
    }
}

impl EstimationCurve {
    /// Share of peak output at `hour`, `None` outside daylight (both bounds inclusive).
    pub fn factor(&self, hour: u32) -> Option<f64> {
        if hour < self.daylight_start || hour > self.daylight_end {
            return None;
        }
        let distance = (f64::from(hour) - f64::from(self.peak_hour)).abs();
        Some((1.0 - distance / self.half_width).max(self.floor))
    }

    /// Installed capacity wins over the daily-energy derivation; zero when neither is known.
    pub fn estimate(&self, hour: u32, capacity_kw: f64, energy_today_kwh: f64) -> f64 {
        match self.factor(hour) {
            None => 0.0,
            Some(factor) if capacity_kw > 0.0 => capacity_kw * factor,
            Some(factor) if energy_today_kwh > 0.0 => {
                energy_today_kwh * factor / self.energy_divisor
            }
            Some(_) => 0.0,
        }
    }
}

fn first_alias(map: &Map<String, Value>, aliases: &[&str]) -> Option<(String, f64)> {
    aliases.iter().find_map(|alias| {
        map.get(*alias)
            .and_then(as_f64)
            .map(|value| (String::from(*alias), value))
    })
}

fn inverter_power(record: &StationKpi) -> f64 {
    record
        .data_item_map
        .get(INVERTER_POWER)
        .and_then(as_f64)
        .unwrap_or(0.0)
}

fn latest<'a>(records: &'a [StationKpi], code: &str) -> Option<&'a StationKpi> {
    records
        .iter()
        .filter(|record| record.code == code)
        .max_by_key(|record| record.collect_time)
}

pub struct NorthboundAdapter {
    sessions: Arc<NorthboundManager>,
    curve: EstimationCurve,
    clock: Arc<dyn Clock>,
    resolved: OnceCell<String>,
    capacity: OnceCell<f64>,
}

impl NorthboundAdapter {
    pub fn new(sessions: Arc<NorthboundManager>, curve: EstimationCurve, clock: Arc<dyn Clock>) -> Self {
        NorthboundAdapter {
            sessions,
            curve,
            clock,
            resolved: OnceCell::new(),
            capacity: OnceCell::new(),
        }
    }

    async fn station_code(&self, plant: &PlantIdentity) -> Result<String, Error> {
        if plant.id != FIRST_AVAILABLE_PLANT {
            return Ok(plant.id.to_owned());
        }

        self.resolved
            .get_or_try_init(|| async {
                let station = self
                    .sessions
                    .stations()
                    .await?
                    .into_iter()
                    .next()
                    .ok_or(Error::DataUnavailable)?;
                log::info!(
                    "{}: using plant '{}' with ID '{}'",
                    plant.name,
                    station.name,
                    station.code
                );
                if self.capacity.set(station.capacity).is_err() {
                    /* only when an earlier capacity lookup memoized it */
                    log::debug!("{}: installed capacity already known", plant.name);
                }
                Ok::<String, Error>(station.code)
            })
            .await
            .cloned()
    }

    /// Installed capacity in kWp, 0 when the station is not listed.
    async fn capacity(&self, code: &str) -> Result<f64, Error> {
        self.capacity
            .get_or_try_init(|| async {
                let stations = self.sessions.stations().await?;
                Ok::<f64, Error>(
                    stations
                        .iter()
                        .find(|station| station.code == code)
                        .map(|station| station.capacity)
                        .unwrap_or(0.0),
                )
            })
            .await
            .copied()
    }

    async fn from_realtime(
        &self,
        name: &str,
        record: &StationKpi,
        now: DateTime<Local>,
    ) -> Result<Reading, Error> {
        let energy_today = first_alias(&record.data_item_map, &DAILY_ENERGY_ALIASES)
            .map(|(_, value)| value)
            .unwrap_or(0.0);

        if let Some((alias, power)) = first_alias(&record.data_item_map, &INSTANT_POWER_ALIASES) {
            log::debug!("{}: instant power read from '{}'", name, alias);
            return Ok(Reading::online(power, energy_today, DataSource::Instant));
        }

        let capacity = match self.capacity(&record.code).await {
            Ok(capacity) => capacity,
            Err(e @ Error::RateExceeded(_)) => return Err(e),
            Err(e) => {
                log::warn!("{}: installed capacity unavailable: {}", name, e);
                0.0
            }
        };
        let power = self.curve.estimate(now.hour(), capacity, energy_today);
        log::info!(
            "{}: no instant power field, estimated {:.2} kW at hour {}",
            name,
            power,
            now.hour()
        );
        Ok(Reading::online(power, energy_today, DataSource::Estimated))
    }

    async fn fetch(&self, plant: &PlantIdentity) -> Result<Reading, Error> {
        let code = self.station_code(plant).await?;
        let codes = [code.to_owned()];
        let now = self.clock.now();

        let realtime = self.sessions.realtime_kpi(&codes).await?;
        if let Some(record) = realtime.iter().find(|record| record.code == code) {
            return self.from_realtime(&plant.name, record, now).await;
        }
        log::warn!("{}: no real-time data, trying hourly data", plant.name);

        match self.sessions.hourly_kpi(&codes, now).await {
            Ok(records) => match latest(&records, &code) {
                Some(record) => {
                    return Ok(Reading::online(inverter_power(record), 0.0, DataSource::Hourly))
                }
                None => log::warn!("{}: no hourly data, trying daily data", plant.name),
            },
            Err(e @ Error::RateExceeded(_)) => return Err(e),
            Err(e) => log::warn!("{}: unable to get hourly data: {}", plant.name, e),
        }

        match self.sessions.daily_kpi(&codes, now).await {
            Ok(records) => match latest(&records, &code) {
                Some(record) => {
                    return Ok(Reading::online(inverter_power(record), 0.0, DataSource::Daily))
                }
                None => log::warn!("{}: no daily data", plant.name),
            },
            Err(e @ Error::RateExceeded(_)) => return Err(e),
            Err(e) => log::warn!("{}: unable to get daily data: {}", plant.name, e),
        }

        Err(Error::DataUnavailable)
    }
}

#[async_trait]
impl PlantAdapter for NorthboundAdapter {
    async fn read(&self, plant: &PlantIdentity) -> Reading {
        match self.fetch(plant).await {
            Ok(reading) => {
                log::info!(
                    "{}: current power = {:.2} kW, daily energy = {:.2} kWh",
                    plant.name,
                    reading.power,
                    reading.energy_today
                );
                reading
            }
            Err(Error::RateExceeded(_)) => {
                log::warn!("{}: API frequency limit exceeded, retrying next cycle", plant.name);
                Reading::offline("API frequency limit exceeded")
            }
            Err(Error::DataUnavailable) => {
                log::warn!("no data available for {} (ID: {})", plant.name, plant.id);
                Reading::offline("data unavailable")
            }
            Err(e) => {
                log::error!("error while updating {}: {}", plant.name, e);
                self.sessions.invalidate().await;
                Reading::offline(format!("error: {}", e))
            }
        }
    }
}
