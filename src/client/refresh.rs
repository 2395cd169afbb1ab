//! Single-flight session refresh.
//!
//! When many concurrent requests hit an expired access token at once,
//! exactly one refresh call must go out; the rest wait for it and then
//! replay. The state lives on the client instance, never in a global, so
//! separate clients (and tests) cannot interfere with each other.

use std::future::Future;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::ClientError;

type ExpiredHook = Box<dyn Fn() + Send + Sync>;

struct RefreshState {
    /// Bumped on every successful rotation. A waiter that observed an older
    /// epoch knows someone else already refreshed and just replays.
    epoch: u64,
    /// Set when a refresh fails; the session cannot be revived except by a
    /// fresh login.
    dead: bool,
}

pub(super) struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    on_session_expired: Option<ExpiredHook>,
}

impl RefreshCoordinator {
    pub(super) fn new(on_session_expired: Option<ExpiredHook>) -> Self {
        Self {
            state: Mutex::new(RefreshState {
                epoch: 0,
                dead: false,
            }),
            on_session_expired,
        }
    }

    /// The epoch a request should record before being sent.
    pub(super) async fn epoch(&self) -> u64 {
        self.state.lock().await.epoch
    }

    /// Handle a 401 observed by a request sent under `observed_epoch`.
    ///
    /// Returns `Ok(())` when the caller should replay its request. The tokio
    /// mutex queues waiters in FIFO order, which is also the replay order.
    /// Only the first waiter actually drives `refresh_call`; the future is
    /// dropped unpolled for everyone else.
    pub(super) async fn refresh_session<F>(
        &self,
        observed_epoch: u64,
        refresh_call: F,
    ) -> Result<(), ClientError>
    where
        F: Future<Output = Result<(), ClientError>>,
    {
        let mut state = self.state.lock().await;

        if state.dead {
            return Err(ClientError::SessionExpired);
        }
        if state.epoch != observed_epoch {
            // Someone else rotated the session while we waited; our cookie
            // jar already has the new pair.
            debug!("session already refreshed; replaying request");
            return Ok(());
        }

        match refresh_call.await {
            Ok(()) => {
                state.epoch += 1;
                debug!("session refreshed");
                Ok(())
            }
            Err(err) => {
                state.dead = true;
                warn!("session refresh failed: {err}");
                if let Some(hook) = &self.on_session_expired {
                    hook();
                }
                Err(ClientError::SessionExpired)
            }
        }
    }

    /// A fresh login produces a live session again.
    pub(super) async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.dead = false;
        state.epoch += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinSet;

    fn coordinator() -> RefreshCoordinator {
        RefreshCoordinator::new(None)
    }

    #[tokio::test]
    async fn burst_of_waiters_triggers_one_refresh() {
        let coordinator = Arc::new(coordinator());
        let refresh_calls = Arc::new(AtomicUsize::new(0));

        let epoch = coordinator.epoch().await;
        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            let refresh_calls = Arc::clone(&refresh_calls);
            tasks.spawn(async move {
                coordinator
                    .refresh_session(epoch, async {
                        refresh_calls.fetch_add(1, Ordering::SeqCst);
                        // Hold the slot long enough for every task to queue.
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(())
                    })
                    .await
            });
        }

        while let Some(result) = tasks.join_next().await {
            assert!(result.expect("join").is_ok());
        }
        assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.epoch().await, epoch + 1);
    }

    #[tokio::test]
    async fn failed_refresh_kills_the_session_for_everyone() {
        let coordinator = Arc::new(coordinator());
        let refresh_calls = Arc::new(AtomicUsize::new(0));

        let epoch = coordinator.epoch().await;
        let mut tasks = JoinSet::new();
        for _ in 0..5 {
            let coordinator = Arc::clone(&coordinator);
            let refresh_calls = Arc::clone(&refresh_calls);
            tasks.spawn(async move {
                coordinator
                    .refresh_session(epoch, async {
                        refresh_calls.fetch_add(1, Ordering::SeqCst);
                        Err(ClientError::Api {
                            status: 401,
                            message: "Invalid refresh token".to_string(),
                        })
                    })
                    .await
            });
        }

        while let Some(result) = tasks.join_next().await {
            let err = result.expect("join").expect_err("session must die");
            assert!(matches!(err, ClientError::SessionExpired));
        }
        // The loser tasks short-circuit on the dead flag without calling.
        assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_epoch_replays_without_refreshing() {
        let coordinator = coordinator();
        let epoch = coordinator.epoch().await;

        coordinator
            .refresh_session(epoch, async { Ok(()) })
            .await
            .expect("first refresh");

        // Second caller still holds the pre-rotation epoch; its refresh
        // future must never run.
        coordinator
            .refresh_session(epoch, async {
                panic!("refresh must not run for a stale epoch");
            })
            .await
            .expect("replay");
    }

    #[tokio::test]
    async fn expired_hook_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let hook_fired = Arc::clone(&fired);
        let coordinator = RefreshCoordinator::new(Some(Box::new(move || {
            hook_fired.fetch_add(1, Ordering::SeqCst);
        })));

        let epoch = coordinator.epoch().await;
        let result = coordinator
            .refresh_session(epoch, async {
                Err(ClientError::Network("boom".to_string()))
            })
            .await;
        assert!(matches!(result, Err(ClientError::SessionExpired)));

        // Later callers fail fast without re-firing the hook.
        let result = coordinator
            .refresh_session(epoch, async { Ok(()) })
            .await;
        assert!(matches!(result, Err(ClientError::SessionExpired)));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn login_reset_revives_a_dead_session() {
        let coordinator = coordinator();
        let epoch = coordinator.epoch().await;
        let _ = coordinator
            .refresh_session(epoch, async {
                Err(ClientError::Network("down".to_string()))
            })
            .await;

        coordinator.reset().await;

        let epoch = coordinator.epoch().await;
        coordinator
            .refresh_session(epoch, async { Ok(()) })
            .await
            .expect("revived session refreshes again");
    }
}
