//! Background logging for a live session. Stops with the teardown signal.

use crate::peer::PeerLink;
use crate::ports::listing::parse_connections;
use crate::ports::PortGraph;
use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const GRAPH_INTERVAL: Duration = Duration::from_secs(5);
pub const STATS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct Monitor {
    graph: Arc<dyn PortGraph>,
    graph_interval: Duration,
    stats_interval: Duration,
}

impl Monitor {
    pub fn new(graph: Arc<dyn PortGraph>) -> Self {
        Self::with_intervals(graph, GRAPH_INTERVAL, STATS_INTERVAL)
    }

    pub fn with_intervals(
        graph: Arc<dyn PortGraph>,
        graph_interval: Duration,
        stats_interval: Duration,
    ) -> Self {
        Self {
            graph,
            graph_interval,
            stats_interval,
        }
    }

    pub fn spawn(&self, session: Arc<Session>, link: Arc<dyn PeerLink>) {
        let token = session.signal().token();
        tokio::spawn(log_routing(
            self.graph.clone(),
            session.clone(),
            token.clone(),
            self.graph_interval,
        ));
        tokio::spawn(log_stats(session, link, token, self.stats_interval));
    }
}

async fn log_routing(
    graph: Arc<dyn PortGraph>,
    session: Arc<Session>,
    token: CancellationToken,
    period: Duration,
) {
    let id = session.id().as_str().to_string();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match graph.list_connections().await {
            Ok(listing) => {
                let connections = parse_connections(&listing);
                let ours: Vec<String> = connections
                    .iter()
                    .filter(|(port, _)| port.contains(&id))
                    .map(|(port, peers)| format!("{} -> [{}]", port, peers.join(", ")))
                    .collect();
                debug!("[{}] routing: {}", id, if ours.is_empty() { "none".to_string() } else { ours.join("; ") });
            }
            Err(e) => debug!("[{}] routing snapshot failed: {:#}", id, e),
        }
    }
    debug!("[{}] routing monitor stopped", id);
}

async fn log_stats(
    session: Arc<Session>,
    link: Arc<dyn PeerLink>,
    token: CancellationToken,
    period: Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick is immediate; stats only mean something later.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let pairs = link.succeeded_pairs().await;
        session.record_succeeded_pairs(pairs);
        info!(
            "📊 [{}] connection {} with {} succeeded pair(s), synth {}",
            session.id(),
            link.state(),
            pairs,
            session.synth().state()
        );
    }
    debug!("[{}] stats monitor stopped", session.id());
}
