use super::{SessionManager, SessionSlot, SESSION_VALIDITY};
use crate::api::{aurora, Error};
use crate::model::{AuroraApi, AuroraSession};
use async_trait::async_trait;
use std::time::Duration;

/// Cookie session shared by every AuroraVision plant of one account.
pub struct AuroraSessionManager {
    api: AuroraApi,
    slot: SessionSlot<AuroraSession>,
}

impl AuroraSessionManager {
    pub fn new(api: AuroraApi) -> Self {
        Self::with_validity(api, SESSION_VALIDITY)
    }

    pub fn with_validity(api: AuroraApi, validity: Duration) -> Self {
        AuroraSessionManager {
            api,
            slot: SessionSlot::new(validity),
        }
    }

    pub fn api(&self) -> &AuroraApi {
        &self.api
    }
}

#[async_trait]
impl SessionManager for AuroraSessionManager {
    type Handle = AuroraSession;

    async fn acquire(&self) -> Result<AuroraSession, Error> {
        self.slot
            .acquire(|_| async {
                log::info!("AuroraVision login attempt...");
                match aurora::login(&self.api).await {
                    Ok(session) => {
                        log::info!("AuroraVision login succeeded");
                        Ok(session)
                    }
                    Err(e) => {
                        log::error!("AuroraVision login failed: {}", e);
                        Err(e)
                    }
                }
            })
            .await
    }

    async fn invalidate(&self) {
        if self.slot.invalidate().await.is_some() {
            log::info!("AuroraVision session invalidated");
        }
    }
}
