pub mod aurora;
pub mod fusion;
pub mod northbound;

pub use aurora::AuroraSessionManager;
pub use fusion::{FileSessionCache, FusionClientManager, SessionCache};
pub use northbound::NorthboundManager;

use crate::api::Error;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// How long a login is trusted before the next `acquire` logs in again.
pub const SESSION_VALIDITY: Duration = Duration::from_secs(3600);

#[async_trait]
pub trait SessionManager: Send + Sync {
    type Handle: Clone + Send + Sync;

    /// Return the cached handle while it is younger than the validity window, otherwise
    /// log in again.
    async fn acquire(&self) -> Result<Self::Handle, Error>;

    /// Drop the cached handle so the next `acquire` logs in. Safe to call without a handle.
    async fn invalidate(&self);
}

/// Periodic liveness/keep-alive calls, driven by the monitoring loop.
#[async_trait]
pub trait KeepAlive: Send + Sync {
    async fn ping_liveness(&self) -> Result<bool, Error>;

    async fn keep_alive(&self) -> Result<(), Error>;
}

struct Session<H> {
    handle: H,
    logged_in_at: Instant,
}

pub struct SessionSlot<H> {
    validity: Duration,
    state: Mutex<Option<Session<H>>>,
}

impl<H: Clone> SessionSlot<H> {
    pub fn new(validity: Duration) -> Self {
        SessionSlot {
            validity,
            state: Mutex::new(None),
        }
    }

    /// Return the cached handle, or run `login` while holding the slot. `login` receives the
    /// expired handle, if any, so it can be closed first.
    pub async fn acquire<F, Fut>(&self, login: F) -> Result<H, Error>
    where
        F: FnOnce(Option<H>) -> Fut,
        Fut: Future<Output = Result<H, Error>>,
    {
        let mut state = self.state.lock().await;

        let expired = match state.take() {
            Some(session) if session.logged_in_at.elapsed() < self.validity => {
                let handle = session.handle.clone();
                *state = Some(session);
                return Ok(handle);
            }
            Some(session) => {
                log::info!(
                    "session expired after {} seconds, new login required",
                    session.logged_in_at.elapsed().as_secs()
                );
                Some(session.handle)
            }
            None => None,
        };

        let handle = login(expired).await?;
        *state = Some(Session {
            handle: handle.clone(),
            logged_in_at: Instant::now(),
        });
        Ok(handle)
    }

    /// Clear the slot, handing back the handle that was cached.
    pub async fn invalidate(&self) -> Option<H> {
        self.state.lock().await.take().map(|session| session.handle)
    }

    /// Cached handle, if any, regardless of age. Never logs in.
    pub async fn current(&self) -> Option<H> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|session| session.handle.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn counted_login(logins: &AtomicUsize, expired: Option<usize>) -> Result<usize, Error> {
        assert_eq!(None, expired);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(logins.fetch_add(1, Ordering::SeqCst) + 1)
    }

    #[tokio::test]
    async fn concurrent_acquire_logs_in_once() {
        let slot = SessionSlot::new(SESSION_VALIDITY);
        let logins = AtomicUsize::new(0);

        let (a, b) = tokio::join!(
            slot.acquire(|expired| counted_login(&logins, expired)),
            slot.acquire(|expired| counted_login(&logins, expired)),
        );

        assert_eq!(1, logins.load(Ordering::SeqCst));
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[tokio::test]
    async fn expired_handle_is_replaced() {
        let slot = SessionSlot::new(Duration::from_millis(20));
        slot.acquire(|_| async { Ok(1) }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let handle = slot
            .acquire(|expired| async move {
                assert_eq!(Some(1), expired);
                Ok(2)
            })
            .await
            .unwrap();
        assert_eq!(2, handle);
    }

    #[tokio::test]
    async fn invalidate_forces_login() {
        let slot = SessionSlot::new(SESSION_VALIDITY);
        assert_eq!(None, slot.invalidate().await);

        slot.acquire(|_| async { Ok(1) }).await.unwrap();
        assert_eq!(Some(1), slot.invalidate().await);
        assert_eq!(None, slot.current().await);

        let handle = slot.acquire(|_| async { Ok(2) }).await.unwrap();
        assert_eq!(2, handle);
    }

    #[tokio::test]
    async fn failed_login_leaves_slot_empty() {
        let slot: SessionSlot<u8> = SessionSlot::new(SESSION_VALIDITY);
        let result = slot
            .acquire(|_| async { Err(Error::LoginError(String::from("denied"))) })
            .await;

        assert!(matches!(result, Err(Error::LoginError(_))));
        assert_eq!(None, slot.current().await);
    }
}
