use super::PlantAdapter;
use crate::api::response::{as_f64, PlantEnergy};
use crate::api::{aurora, Error};
use crate::clock::Clock;
use crate::plant::{DataSource, PlantIdentity, Reading};
use crate::session::{AuroraSessionManager, SessionManager};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

const GENERATION_ENERGY: &str = "GenerationEnergy";
const GENERATION_POWER: &str = "GenerationPower";

pub struct AuroraVisionAdapter {
    sessions: Arc<AuroraSessionManager>,
    clock: Arc<dyn Clock>,
}

impl AuroraVisionAdapter {
    pub fn new(sessions: Arc<AuroraSessionManager>, clock: Arc<dyn Clock>) -> Self {
        AuroraVisionAdapter { sessions, clock }
    }
}

/// Map a `PlantEnergy` summary to a reading. An instant power value whose start label is
/// not from `today` is stale and reported as zero.
pub fn interpret(name: &str, energy: &PlantEnergy, today: NaiveDate) -> Reading {
    let status = energy.status.as_deref().unwrap_or("(none)");
    if status != "SUCCESS" {
        log::warn!("invalid API response for {}: {}", name, status);
        return Reading::offline(format!("invalid API response: {}", status));
    }

    let today = today.format("%Y-%m-%d").to_string();
    let mut current_power = 0.0;
    let mut energy_today = 0.0;

    for field in &energy.fields {
        if field.is(GENERATION_ENERGY) && field.label.as_deref() == Some("today") {
            energy_today = as_f64(&field.value).unwrap_or(0.0);
        }

        if field.is(GENERATION_POWER) && field.kind.as_deref() == Some("instant") {
            match field.start_label.as_deref() {
                Some(label) if label.contains(&today) => {
                    current_power = as_f64(&field.value).unwrap_or(0.0);
                }
                _ => {
                    current_power = 0.0;
                    log::info!(
                        "{}: instant reading is not from today, reporting zero power",
                        name
                    );
                }
            }
        }
    }

    Reading::online(current_power, energy_today, DataSource::Instant)
}

#[async_trait]
impl PlantAdapter for AuroraVisionAdapter {
    async fn read(&self, plant: &PlantIdentity) -> Reading {
        let session = match self.sessions.acquire().await {
            Ok(session) => session,
            Err(e) => return Reading::offline(format!("session unavailable: {}", e)),
        };

        match aurora::plant_energy(&session, self.sessions.api(), &plant.id).await {
            Ok(energy) => interpret(&plant.name, &energy, self.clock.now().date_naive()),
            Err(Error::SessionExpired(status)) => {
                self.sessions.invalidate().await;
                log::warn!(
                    "session expired for {} (HTTP {}), reconnecting next cycle",
                    plant.name,
                    status
                );
                Reading::offline("session expired, will retry next cycle")
            }
            Err(Error::HttpStatus(status)) => {
                log::error!("HTTP error {} for {}", status, plant.name);
                Reading::offline(format!("HTTP error: {}", status))
            }
            Err(e) => {
                log::error!("error while updating {}: {}", plant.name, e);
                Reading::offline(format!("error: {}", e))
            }
        }
    }
}
