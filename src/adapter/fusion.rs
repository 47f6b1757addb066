use super::PlantAdapter;
use crate::model::PowerStatus;
use crate::plant::{DataSource, PlantIdentity, Reading};
use crate::session::{FusionClientManager, SessionManager};
use async_trait::async_trait;
use std::sync::Arc;

pub struct FusionSolarAdapter {
    clients: Arc<FusionClientManager>,
}

impl FusionSolarAdapter {
    pub fn new(clients: Arc<FusionClientManager>) -> Self {
        FusionSolarAdapter { clients }
    }
}

/// Daily energy, falling back to the alternate day total when the primary value is
/// absent or zero.
pub fn energy_today(status: &PowerStatus) -> f64 {
    match status.energy_today_kwh {
        Some(energy) if energy != 0.0 => energy,
        _ => status.total_power_today_kwh.unwrap_or(0.0),
    }
}

#[async_trait]
impl PlantAdapter for FusionSolarAdapter {
    async fn read(&self, plant: &PlantIdentity) -> Reading {
        let portal = match self.clients.acquire().await {
            Ok(portal) => portal,
            Err(e) => return Reading::offline(format!("client unavailable: {}", e)),
        };

        match portal.power_status().await {
            Ok(Some(status)) => {
                let reading = Reading::online(
                    status.current_power_kw,
                    energy_today(&status),
                    DataSource::Instant,
                );
                log::info!(
                    "{}: current power = {} kW, daily energy = {} kWh",
                    plant.name,
                    reading.power,
                    reading.energy_today
                );
                reading
            }
            Ok(None) => {
                log::warn!("no data available for {}", plant.name);
                Reading::offline("data unavailable")
            }
            Err(e) => {
                log::error!("error while updating {}: {}", plant.name, e);
                self.clients.invalidate().await;
                Reading::offline(format!("error: {}", e))
            }
        }
    }
}
