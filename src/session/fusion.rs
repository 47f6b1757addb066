use super::{KeepAlive, SessionManager, SessionSlot, SESSION_VALIDITY};
use crate::api::portal::{CaptchaSolver, Portal};
use crate::api::Error;
use crate::model::{CachedSession, PortalAccount};
use async_trait::async_trait;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Durable storage for the portal transport state. Best effort: the cache is never
/// authoritative, and any failure falls back to a fresh login.
pub trait SessionCache: Send + Sync {
    fn load(&self) -> Result<Option<CachedSession>, Error>;

    fn save(&self, session: &CachedSession) -> Result<(), Error>;
}

/// JSON file cache.
pub struct FileSessionCache {
    path: PathBuf,
}

impl FileSessionCache {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FileSessionCache { path: path.into() }
    }
}

impl SessionCache for FileSessionCache {
    fn load(&self) -> Result<Option<CachedSession>, Error> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Cache(format!("{}: {}", self.path.display(), e))),
        };

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| Error::Cache(format!("{}: {}", self.path.display(), e)))
    }

    fn save(&self, session: &CachedSession) -> Result<(), Error> {
        let text = serde_json::to_string_pretty(session)
            .map_err(|e| Error::Cache(format!("{}: {}", self.path.display(), e)))?;
        fs::write(&self.path, text).map_err(|e| Error::Cache(format!("{}: {}", self.path.display(), e)))
    }
}

pub struct FusionClientManager {
    account: PortalAccount,
    cache: Box<dyn SessionCache>,
    solver: Option<Arc<dyn CaptchaSolver>>,
    /* loaded once at construction, consumed by the first login */
    warm_start: Mutex<Option<CachedSession>>,
    slot: SessionSlot<Arc<Portal>>,
}

impl FusionClientManager {
    pub fn new(account: PortalAccount, cache: Box<dyn SessionCache>) -> Self {
        let warm_start = match cache.load() {
            Ok(Some(cached)) if cached.base_url == account.base_url => {
                log::info!("found cached FusionSolar session from {}", cached.saved_at);
                Some(cached)
            }
            Ok(Some(_)) => {
                log::info!("ignoring cached FusionSolar session of another portal");
                None
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("unable to load cached FusionSolar session: {}", e);
                None
            }
        };

        FusionClientManager {
            account,
            cache,
            solver: None,
            warm_start: Mutex::new(warm_start),
            slot: SessionSlot::new(SESSION_VALIDITY),
        }
    }

    pub fn with_captcha_solver(mut self, solver: Arc<dyn CaptchaSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.slot = SessionSlot::new(validity);
        self
    }

    fn persist(&self, portal: &Portal) {
        match self.cache.save(&portal.export()) {
            Ok(()) => log::debug!("FusionSolar session saved"),
            Err(e) => log::warn!("unable to save FusionSolar session: {}", e),
        }
    }

    /// Reuse the cached transport state if the portal still accepts it.
    async fn resume(&self) -> Option<Arc<Portal>> {
        let cached = self
            .warm_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        let portal = match Portal::new(self.account.clone()) {
            Ok(portal) => portal,
            Err(e) => {
                log::warn!("unable to build FusionSolar client: {}", e);
                return None;
            }
        };
        portal.restore(&cached);

        match portal.power_status().await {
            Ok(Some(_)) => {
                log::info!("resumed cached FusionSolar session");
                Some(Arc::new(portal))
            }
            Ok(None) => {
                log::info!("cached FusionSolar session returned no data, logging in");
                None
            }
            Err(e) => {
                log::info!("cached FusionSolar session rejected ({}), logging in", e);
                None
            }
        }
    }

    async fn login(&self) -> Result<Arc<Portal>, Error> {
        if let Some(portal) = self.resume().await {
            return Ok(portal);
        }

        log::info!("initialising FusionSolar client...");
        let portal = Portal::new(self.account.clone())?;
        portal.login(self.solver.as_deref()).await?;

        /* one real status call proves the session works before it is shared */
        if portal.power_status().await?.is_none() {
            return Err(Error::LoginError(String::from(
                "verification call returned no data",
            )));
        }

        log::info!("FusionSolar client initialised");
        self.persist(&portal);
        Ok(Arc::new(portal))
    }

    async fn close(portal: &Portal) {
        if let Err(e) = portal.logout().await {
            log::debug!("error while logging out of FusionSolar: {}", e);
        }
    }
}

#[async_trait]
impl SessionManager for FusionClientManager {
    type Handle = Arc<Portal>;

    async fn acquire(&self) -> Result<Arc<Portal>, Error> {
        self.slot
            .acquire(|expired| async move {
                if let Some(portal) = expired {
                    Self::close(&portal).await;
                }
                self.login().await.map_err(|e| {
                    log::error!("FusionSolar client initialisation failed: {}", e);
                    e
                })
            })
            .await
    }

    async fn invalidate(&self) {
        if let Some(portal) = self.slot.invalidate().await {
            Self::close(&portal).await;
            log::info!("FusionSolar client invalidated");
        }
    }
}

#[async_trait]
impl KeepAlive for FusionClientManager {
    /// `Ok(false)` without a client; the next `acquire` will log in anyway.
    async fn ping_liveness(&self) -> Result<bool, Error> {
        match self.slot.current().await {
            Some(portal) => portal.is_session_active().await,
            None => Ok(false),
        }
    }

    async fn keep_alive(&self) -> Result<(), Error> {
        if let Some(portal) = self.slot.current().await {
            portal.keep_alive().await?;
            self.persist(&portal);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::endpoint;
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn account(server: &MockServer) -> PortalAccount {
        PortalAccount {
            base_url: server.uri(),
            username: String::from("user"),
            password: String::from("secret"),
        }
    }

    async fn mount_portal(server: &MockServer, logins: u64) {
        Mock::given(method("POST"))
            .and(path(endpoint::PORTAL_LOGIN))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "JSESSIONID=fresh; Path=/")
                    .set_body_json(json!({"errorCode": null})),
            )
            .expect(logins)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(endpoint::PORTAL_KEEP_ALIVE))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": 0, "payload": "rnd-1"})),
            )
            .mount(server)
            .await;
    }

    async fn mount_power_status(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path(endpoint::PORTAL_POWER_STATUS))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "data": {"currentPower": 1.5, "dailyEnergy": 7.0}
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn file_cache_round_trip_and_absence() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileSessionCache::new(dir.path().join("session.json"));
        assert_eq!(None, cache.load().unwrap());

        let session = CachedSession {
            base_url: String::from("https://uni005eu5.fusionsolar.huawei.com"),
            cookies: String::from("JSESSIONID=abc"),
            roarand: Some(String::from("rnd")),
            saved_at: Utc::now(),
        };
        cache.save(&session).unwrap();
        assert_eq!(Some(session), cache.load().unwrap());
    }

    #[test]
    fn corrupt_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("session.json");
        fs::write(&file, "{not json").unwrap();

        assert!(matches!(
            FileSessionCache::new(file).load(),
            Err(Error::Cache(_))
        ));
    }

    #[tokio::test]
    async fn login_verifies_and_persists_session() {
        let server = MockServer::start().await;
        mount_portal(&server, 1).await;
        mount_power_status(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("session.json");
        let manager =
            FusionClientManager::new(account(&server), Box::new(FileSessionCache::new(&file)));

        manager.acquire().await.unwrap();
        manager.acquire().await.unwrap();

        let saved = FileSessionCache::new(&file).load().unwrap().unwrap();
        assert!(saved.cookies.contains("JSESSIONID=fresh"));
        assert_eq!(Some("rnd-1"), saved.roarand.as_deref());
    }

    #[tokio::test]
    async fn cached_session_skips_login() {
        let server = MockServer::start().await;
        mount_portal(&server, 0).await;
        Mock::given(method("GET"))
            .and(path(endpoint::PORTAL_POWER_STATUS))
            .and(header("roarand", "cached"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "data": {"currentPower": 1.5}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("session.json");
        FileSessionCache::new(&file)
            .save(&CachedSession {
                base_url: server.uri(),
                cookies: String::from("JSESSIONID=old"),
                roarand: Some(String::from("cached")),
                saved_at: Utc::now(),
            })
            .unwrap();

        let manager =
            FusionClientManager::new(account(&server), Box::new(FileSessionCache::new(&file)));
        manager.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_cache_falls_back_to_login() {
        let server = MockServer::start().await;
        mount_portal(&server, 1).await;
        mount_power_status(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("session.json");
        fs::write(&file, "garbage").unwrap();

        let manager =
            FusionClientManager::new(account(&server), Box::new(FileSessionCache::new(&file)));
        assert!(manager.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn keep_alive_without_client_is_a_no_op() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let manager = FusionClientManager::new(
            account(&server),
            Box::new(FileSessionCache::new(dir.path().join("session.json"))),
        );

        assert!(!manager.ping_liveness().await.unwrap());
        assert!(manager.keep_alive().await.is_ok());
        manager.invalidate().await;
    }

    #[tokio::test]
    async fn keep_alive_refreshes_and_persists_live_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoint::PORTAL_LOGIN))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "JSESSIONID=fresh; Path=/")
                    .set_body_json(json!({"errorCode": null})),
            )
            .expect(1)
            .mount(&server)
            .await;
        /* the login consumes the first token */
        Mock::given(method("GET"))
            .and(path(endpoint::PORTAL_KEEP_ALIVE))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": 0, "payload": "rnd-1"})),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(endpoint::PORTAL_KEEP_ALIVE))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": 0, "payload": "rnd-2"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(endpoint::PORTAL_SESSION_ALIVE))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
            .expect(1)
            .mount(&server)
            .await;
        mount_power_status(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("session.json");
        let manager =
            FusionClientManager::new(account(&server), Box::new(FileSessionCache::new(&file)));
        manager.acquire().await.unwrap();
        let saved = FileSessionCache::new(&file).load().unwrap().unwrap();
        assert_eq!(Some("rnd-1"), saved.roarand.as_deref());

        assert!(manager.ping_liveness().await.unwrap());
        manager.keep_alive().await.unwrap();

        let saved = FileSessionCache::new(&file).load().unwrap().unwrap();
        assert_eq!(Some("rnd-2"), saved.roarand.as_deref());
        assert!(saved.cookies.contains("JSESSIONID=fresh"));
    }
}
