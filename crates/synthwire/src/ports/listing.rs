//! Parsers for the port-graph daemon's text listings.
//!
//! `jack_lsp` prints one port per line. `jack_lsp -c` prints each port at
//! column zero followed by its peers, each indented:
//!
//! ```text
//! pipeline:in_abc123_1
//!    SuperCollider:out_1
//! SuperCollider:out_1
//!    pipeline:in_abc123_1
//! ```

use std::collections::{BTreeMap, BTreeSet};

/// Port names from a full listing.
pub fn parse_ports(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter(|line| !line.starts_with(char::is_whitespace))
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Port → peers map from a connection listing.
///
/// Peer lines seen before any port line are ignored.
pub fn parse_connections(listing: &str) -> BTreeMap<String, Vec<String>> {
    let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in listing.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            if let Some(port) = &current {
                graph
                    .entry(port.clone())
                    .or_default()
                    .push(line.trim().to_string());
            }
        } else {
            let port = line.trim_end().to_string();
            graph.entry(port.clone()).or_default();
            current = Some(port);
        }
    }

    graph
}

/// Undirected connections, each reported once regardless of how many
/// sides of the listing mention it. Pairs are ordered `(min, max)`.
pub fn unique_pairs(graph: &BTreeMap<String, Vec<String>>) -> Vec<(String, String)> {
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    for (port, peers) in graph {
        for peer in peers {
            if peer == port {
                continue;
            }
            let pair = if port < peer {
                (port.clone(), peer.clone())
            } else {
                (peer.clone(), port.clone())
            };
            seen.insert(pair);
        }
    }
    seen.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONNECTIONS: &str = "\
system:capture_1
pipeline:in_abc123_1
   SuperCollider:out_1
pipeline:in_abc123_2
   SuperCollider:out_2
SuperCollider:out_1
   pipeline:in_abc123_1
SuperCollider:out_2
   pipeline:in_abc123_2
";

    #[test]
    fn test_parse_ports_skips_peer_lines() {
        let ports = parse_ports(CONNECTIONS);
        assert_eq!(ports.len(), 5);
        assert!(ports.iter().all(|p| !p.starts_with(' ')));
    }

    #[test]
    fn test_parse_connections() {
        let graph = parse_connections(CONNECTIONS);
        assert_eq!(graph.len(), 5);
        assert!(graph["system:capture_1"].is_empty());
        assert_eq!(graph["pipeline:in_abc123_1"], vec!["SuperCollider:out_1"]);
        assert_eq!(graph["SuperCollider:out_2"], vec!["pipeline:in_abc123_2"]);
    }

    #[test]
    fn test_mirrored_entries_collapse_to_one_pair() {
        let graph = parse_connections(CONNECTIONS);
        let pairs = unique_pairs(&graph);
        assert_eq!(pairs.len(), 2);
        assert!(pairs.contains(&(
            "SuperCollider:out_1".to_string(),
            "pipeline:in_abc123_1".to_string()
        )));
    }

    #[test]
    fn test_tab_indented_peers() {
        let graph = parse_connections("a:out\n\tb:in\n");
        assert_eq!(graph["a:out"], vec!["b:in"]);
    }

    #[test]
    fn test_orphan_peer_lines_ignored() {
        let graph = parse_connections("   stray:port\nreal:port\n");
        assert_eq!(graph.len(), 1);
        assert!(graph["real:port"].is_empty());
    }
}
