pub mod aurora;
pub mod fusion;
pub mod northbound;

pub use aurora::AuroraVisionAdapter;
pub use fusion::FusionSolarAdapter;
pub use northbound::{EstimationCurve, NorthboundAdapter};

use crate::clock::Clock;
use crate::plant::{PlantIdentity, Reading, SharedPlant};
use async_trait::async_trait;

#[async_trait]
pub trait PlantAdapter: Send + Sync {
    async fn read(&self, plant: &PlantIdentity) -> Reading;
}

/// Fetch telemetry for `plant` and publish it. Returns whether the plant is online.
pub async fn check_connection(
    adapter: &dyn PlantAdapter,
    plant: &SharedPlant,
    clock: &dyn Clock,
) -> bool {
    let identity = plant.identity();
    let reading = adapter.read(&identity).await;
    plant.update_status(reading, clock.now())
}
