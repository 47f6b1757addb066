use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Consecutive failed checks after which a plant is reported `Offline` instead of `Error`.
pub const MAX_RETRIES: u32 = 3;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProviderType {
    AuroraVision,
    FusionSolarStandard,
    FusionSolarNorthbound,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderType::AuroraVision => "AuroraVision",
            ProviderType::FusionSolarStandard => "FusionSolar",
            ProviderType::FusionSolarNorthbound => "FusionSolar-Northbound",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlantStatus {
    /// No check has completed yet.
    Uninitialized,
    Online,
    Inactive,
    Error,
    Offline,
}

/// Granularity of the power value a provider actually delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Instant,
    Estimated,
    Hourly,
    Daily,
}

/// Outcome of one telemetry fetch, applied to a plant with [`Plant::update_status`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub power: f64,
    pub energy_today: f64,
    pub is_online: bool,
    pub error_message: Option<String>,
    pub source: Option<DataSource>,
}

impl Reading {
    pub fn online(power: f64, energy_today: f64, source: DataSource) -> Self {
        Reading {
            power,
            energy_today,
            is_online: true,
            error_message: None,
            source: Some(source),
        }
    }

    pub fn offline<S: Into<String>>(message: S) -> Self {
        Reading {
            power: 0.0,
            energy_today: 0.0,
            is_online: false,
            error_message: Some(message.into()),
            source: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlantIdentity {
    pub name: String,
    pub id: String,
    pub provider: ProviderType,
}

#[derive(Debug, Clone)]
pub struct Plant {
    identity: PlantIdentity,
    power: f64,
    energy_today: f64,
    is_online: bool,
    source: Option<DataSource>,
    error_message: Option<String>,
    consecutive_failures: u32,
    last_update: Option<DateTime<Local>>,
    last_successful_check: Option<DateTime<Local>>,
}

/// Serialisable point-in-time copy of a [`Plant`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlantSnapshot {
    pub name: String,
    pub id: String,
    #[serde(rename = "type")]
    pub provider: String,
    pub power: f64,
    pub energy_today: f64,
    pub status: PlantStatus,
    pub is_online: bool,
    pub last_update: String,
    pub last_successful_check: Option<String>,
    pub error_message: Option<String>,
    pub consecutive_failures: u32,
    pub source: Option<DataSource>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl Plant {
    pub fn new<N: Into<String>, I: Into<String>>(name: N, id: I, provider: ProviderType) -> Self {
        Plant {
            identity: PlantIdentity {
                name: name.into(),
                id: id.into(),
                provider,
            },
            power: 0.0,
            energy_today: 0.0,
            is_online: false,
            source: None,
            error_message: None,
            consecutive_failures: 0,
            last_update: None,
            last_successful_check: None,
        }
    }

    pub fn identity(&self) -> &PlantIdentity {
        &self.identity
    }

    pub fn power(&self) -> f64 {
        self.power
    }

    pub fn energy_today(&self) -> f64 {
        self.energy_today
    }

    pub fn is_online(&self) -> bool {
        self.is_online
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn last_successful_check(&self) -> Option<DateTime<Local>> {
        self.last_successful_check
    }

    /// Derived from `(is_online, power, consecutive_failures)`; `Uninitialized` only until
    /// the first update.
    pub fn status(&self) -> PlantStatus {
        if self.last_update.is_none() {
            return PlantStatus::Uninitialized;
        }
        match (self.is_online, self.power > 0.0) {
            (true, true) => PlantStatus::Online,
            (true, false) => PlantStatus::Inactive,
            (false, _) if self.consecutive_failures >= MAX_RETRIES => PlantStatus::Offline,
            (false, _) => PlantStatus::Error,
        }
    }

    /// Apply `reading` observed at `now`. Returns `reading.is_online`.
    pub fn update_status(&mut self, reading: Reading, now: DateTime<Local>) -> bool {
        self.power = reading.power;
        self.energy_today = reading.energy_today;
        self.is_online = reading.is_online;
        self.error_message = reading.error_message;
        self.source = reading.source;
        self.last_update = Some(now);

        if reading.is_online {
            self.consecutive_failures = 0;
            self.last_successful_check = Some(now);
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }

        reading.is_online
    }

    pub fn snapshot(&self) -> PlantSnapshot {
        PlantSnapshot {
            name: self.identity.name.to_owned(),
            id: self.identity.id.to_owned(),
            provider: self.identity.provider.to_string(),
            power: round2(self.power),
            energy_today: round2(self.energy_today),
            status: self.status(),
            is_online: self.is_online,
            last_update: self
                .last_update
                .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
                .unwrap_or_else(|| String::from("never")),
            last_successful_check: self
                .last_successful_check
                .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string()),
            error_message: self.error_message.to_owned(),
            consecutive_failures: self.consecutive_failures,
            source: self.source,
        }
    }
}

/// A plant shared between the polling loop (single writer) and query readers.
///
/// Updates are applied under one write-lock acquisition, so readers never observe a
/// partially updated record.
#[derive(Debug, Clone)]
pub struct SharedPlant(Arc<RwLock<Plant>>);

impl SharedPlant {
    pub fn new(plant: Plant) -> Self {
        SharedPlant(Arc::new(RwLock::new(plant)))
    }

    pub fn identity(&self) -> PlantIdentity {
        self.read(|plant| plant.identity().clone())
    }

    pub fn snapshot(&self) -> PlantSnapshot {
        self.read(Plant::snapshot)
    }

    pub fn read<T, F: FnOnce(&Plant) -> T>(&self, f: F) -> T {
        let plant = self.0.read().unwrap_or_else(PoisonError::into_inner);
        f(&*plant)
    }

    pub fn update_status(&self, reading: Reading, now: DateTime<Local>) -> bool {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .update_status(reading, now)
    }
}
