//! Reacts to peer connection state changes for one bound connection.

use crate::peer::{LinkState, PeerLink};
use crate::session::Session;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runs until the session's teardown signal fires or the connection closes.
///
/// - `Failed`: tear down now
/// - `Disconnected`: tear down after `grace` unless the connection recovered
///   or was replaced. A later state change restarts the clock, so only the
///   newest grace timer can act.
/// - `Checking`: record succeeded candidate pairs on the session
pub fn spawn_state_listener(
    session: Arc<Session>,
    link: Arc<dyn PeerLink>,
    grace: Duration,
) -> JoinHandle<()> {
    let token = session.signal().token();
    let mut events = link.subscribe();

    tokio::spawn(async move {
        let id = session.id().clone();
        let generation = Arc::new(AtomicU64::new(0));
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => event,
            };

            let state = match event {
                Ok(state) => state,
                Err(RecvError::Lagged(missed)) => {
                    debug!("[{}] missed {} connection state event(s)", id, missed);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            info!("📡 [{}] connection state: {}", id, state);
            let current = generation.fetch_add(1, Ordering::AcqRel) + 1;
            match state {
                LinkState::Failed => {
                    if session.is_bound_to(&link).await {
                        warn!("[{}] connection failed, tearing down", id);
                        session.teardown().await;
                    }
                    break;
                }
                LinkState::Disconnected => {
                    spawn_grace_timer(
                        session.clone(),
                        link.clone(),
                        grace,
                        generation.clone(),
                        current,
                    );
                }
                LinkState::Checking => {
                    let pairs = link.succeeded_pairs().await;
                    session.record_succeeded_pairs(pairs);
                    debug!("[{}] {} succeeded candidate pair(s)", id, pairs);
                }
                LinkState::Closed => break,
                _ => {}
            }
        }
        debug!("[{}] state listener exited", id);
    })
}

/// Acts only if no state change arrived after the one that started it.
fn spawn_grace_timer(
    session: Arc<Session>,
    link: Arc<dyn PeerLink>,
    grace: Duration,
    generation: Arc<AtomicU64>,
    started_at: u64,
) {
    let token = session.signal().token();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(grace) => {}
        }

        if generation.load(Ordering::Acquire) != started_at {
            debug!("[{}] grace timer superseded by a later state change", session.id());
            return;
        }

        if link.state() != LinkState::Disconnected {
            debug!("[{}] connection recovered within grace period", session.id());
            return;
        }
        if !session.is_bound_to(&link).await {
            debug!("[{}] disconnected connection was replaced", session.id());
            return;
        }

        warn!("[{}] still disconnected after {:?}, tearing down", session.id(), grace);
        session.teardown().await;
    });
}
