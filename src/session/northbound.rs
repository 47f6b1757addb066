use super::{SessionManager, SessionSlot, SESSION_VALIDITY};
use crate::api::{self, Error};
use crate::model::{Api, LoggedInApi, Station, StationKpi};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::time::Duration;

pub struct NorthboundManager {
    api: Api,
    slot: SessionSlot<LoggedInApi>,
}

impl NorthboundManager {
    pub fn new(api: Api) -> Self {
        Self::with_validity(api, SESSION_VALIDITY)
    }

    pub fn with_validity(api: Api, validity: Duration) -> Self {
        NorthboundManager {
            api,
            slot: SessionSlot::new(validity),
        }
    }

    async fn close(api: &LoggedInApi) {
        if let Err(e) = api::logout(api).await {
            log::warn!("error while closing northbound session: {}", e);
        }
    }

    async fn settle<T>(&self, operation: &str, result: Result<T, Error>) -> Result<T, Error> {
        match &result {
            Ok(_) => {}
            Err(Error::RateExceeded(e)) => {
                log::warn!("northbound frequency limit exceeded ({}): {}", operation, e)
            }
            Err(e) => {
                log::error!("northbound request failed ({}): {}", operation, e);
                self.invalidate().await;
            }
        }
        result
    }

    pub async fn stations(&self) -> Result<Vec<Station>, Error> {
        let session = self.acquire().await?;
        let result = api::stations(&session).await;

        if let Ok(stations) = &result {
            log::info!("found {} northbound plants", stations.len());
            for station in stations {
                log::info!(
                    "plant: {} (ID: {}, capacity: {} kWp)",
                    station.name,
                    station.code,
                    station.capacity
                );
            }
        }
        self.settle("station list", result).await
    }

    pub async fn realtime_kpi(&self, codes: &[String]) -> Result<Vec<StationKpi>, Error> {
        let session = self.acquire().await?;
        log::info!("requesting real-time data for plants: {:?}", codes);
        let result = api::station_real_kpi(&session, codes).await;
        self.settle("real-time data", result).await
    }

    pub async fn hourly_kpi(
        &self,
        codes: &[String],
        at: DateTime<Local>,
    ) -> Result<Vec<StationKpi>, Error> {
        let session = self.acquire().await?;
        log::info!("requesting hourly data for plants: {:?}, date: {}", codes, at);
        let result = api::station_hour_kpi(&session, codes, at).await;
        self.settle("hourly data", result).await
    }

    pub async fn daily_kpi(
        &self,
        codes: &[String],
        at: DateTime<Local>,
    ) -> Result<Vec<StationKpi>, Error> {
        let session = self.acquire().await?;
        log::info!("requesting daily data for plants: {:?}, date: {}", codes, at);
        let result = api::station_day_kpi(&session, codes, at).await;
        self.settle("daily data", result).await
    }
}

#[async_trait]
impl SessionManager for NorthboundManager {
    type Handle = LoggedInApi;

    async fn acquire(&self) -> Result<LoggedInApi, Error> {
        self.slot
            .acquire(|expired| async move {
                if let Some(session) = expired {
                    Self::close(&session).await;
                }
                log::info!("opening northbound session...");
                match api::login(&self.api).await {
                    Ok(session) => {
                        log::info!("northbound session opened");
                        Ok(session)
                    }
                    Err(e) => {
                        log::error!("unable to open northbound session: {}", e);
                        Err(e)
                    }
                }
            })
            .await
    }

    async fn invalidate(&self) {
        if let Some(session) = self.slot.invalidate().await {
            Self::close(&session).await;
            log::info!("northbound session invalidated");
        }
    }
}
