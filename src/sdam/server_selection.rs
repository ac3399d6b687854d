//! Server selection: narrowing a [`Topology`] snapshot down to the set of servers eligible for
//! one operation, then picking one from the latency window.

use std::{collections::HashMap, time::Duration};

use rand::seq::IndexedRandom;

use super::description::{
    server::{ServerDescription, ServerType},
    topology::{Topology, TopologyType},
};
use crate::{
    error::{Error, Result},
    options::ServerAddress,
    read_preference::{ReadPreference, SelectionCriteria, TagSet},
};

/// Selects a writable server: the cached primary (replica sets), any `Mongos` (sharded), or the
/// lone `Standalone`/pinned address (`Single`/`Direct`).
pub(crate) fn select_writable(topology: &Topology) -> Vec<&ServerDescription> {
    match topology.topology_type {
        TopologyType::Direct | TopologyType::Single => {
            topology.servers.values().filter(|s| s.is_available()).collect()
        }
        TopologyType::Sharded => topology
            .servers
            .values()
            .filter(|s| s.server_type == ServerType::Mongos)
            .collect(),
        TopologyType::ReplicaSetWithPrimary => topology
            .servers
            .values()
            .filter(|s| s.server_type == ServerType::RsPrimary)
            .collect(),
        TopologyType::ReplicaSetNoPrimary | TopologyType::Unknown => Vec::new(),
    }
}

/// Selects candidates for a read, applying `rp`'s mode, then (if set) its max-staleness and
/// tag-set filters. For `Sharded` topologies the read preference is not applied client-side
/// (mongos handles it); only server availability and staleness compatibility are checked.
pub(crate) fn select_readable<'a>(
    topology: &'a Topology,
    rp: &ReadPreference,
    heartbeat_frequency: Duration,
) -> Result<Vec<&'a ServerDescription>> {
    if topology.topology_type == TopologyType::Sharded {
        return Ok(topology
            .servers
            .values()
            .filter(|s| s.server_type == ServerType::Mongos)
            .collect());
    }
    if matches!(topology.topology_type, TopologyType::Single | TopologyType::Direct) {
        return Ok(topology.servers.values().filter(|s| s.is_available()).collect());
    }

    let mut candidates: Vec<&ServerDescription> = match rp {
        ReadPreference::Primary => topology
            .servers
            .values()
            .filter(|s| s.server_type == ServerType::RsPrimary)
            .collect(),
        ReadPreference::PrimaryPreferred { .. } => {
            let primaries: Vec<&ServerDescription> = topology
                .servers
                .values()
                .filter(|s| s.server_type == ServerType::RsPrimary)
                .collect();
            if !primaries.is_empty() {
                primaries
            } else {
                secondaries(topology)
            }
        }
        ReadPreference::Secondary { .. } => secondaries(topology),
        ReadPreference::SecondaryPreferred { .. } => {
            let secondaries = secondaries(topology);
            if !secondaries.is_empty() {
                secondaries
            } else {
                topology
                    .servers
                    .values()
                    .filter(|s| s.server_type == ServerType::RsPrimary)
                    .collect()
            }
        }
        ReadPreference::Nearest { .. } => topology
            .servers
            .values()
            .filter(|s| matches!(s.server_type, ServerType::RsPrimary | ServerType::RsSecondary))
            .collect(),
    };

    if let Some(max_staleness) = rp.max_staleness() {
        validate_max_staleness(topology, max_staleness, heartbeat_frequency)?;
        candidates = filter_by_staleness(topology, candidates, max_staleness, heartbeat_frequency);
    }

    if let Some(tag_sets) = rp.tag_sets() {
        candidates = filter_by_tag_sets(candidates, tag_sets);
    }

    Ok(candidates)
}

fn secondaries(topology: &Topology) -> Vec<&ServerDescription> {
    topology
        .servers
        .values()
        .filter(|s| s.server_type == ServerType::RsSecondary)
        .collect()
}

/// `max_staleness_seconds` requires every data-bearing server's wire version to be at least 5,
/// and the value itself to be at least `max(90, heartbeat_frequency + 10)`.
fn validate_max_staleness(
    topology: &Topology,
    max_staleness: Duration,
    heartbeat_frequency: Duration,
) -> Result<()> {
    let floor = Duration::from_secs(90).max(heartbeat_frequency + Duration::from_secs(10));
    if max_staleness < floor {
        return Err(Error::invalid_argument(format!(
            "maxStalenessSeconds must be at least {} given a heartbeat frequency of {}s",
            floor.as_secs(),
            heartbeat_frequency.as_secs()
        )));
    }
    if topology
        .servers
        .values()
        .any(|s| s.is_available() && s.max_wire_version < 5)
    {
        return Err(Error::invalid_argument(
            "maxStalenessSeconds requires every server to support wire version >= 5",
        ));
    }
    Ok(())
}

/// Implements the §4.4 staleness formula. When a primary is known, staleness is estimated
/// relative to it; otherwise relative to the freshest secondary.
fn filter_by_staleness<'a>(
    topology: &'a Topology,
    candidates: Vec<&'a ServerDescription>,
    max_staleness: Duration,
    heartbeat_frequency: Duration,
) -> Vec<&'a ServerDescription> {
    let heartbeat_secs = heartbeat_frequency.as_secs_f64();
    let primary = topology
        .servers
        .values()
        .find(|s| s.server_type == ServerType::RsPrimary);

    let max_staleness_secs = max_staleness.as_secs_f64();

    if let Some(primary) = primary {
        let (Some(p_last_write), Some(p_last_update)) =
            (secs(primary.last_write_date), secs(Some(primary.last_update_time)))
        else {
            return candidates;
        };
        candidates
            .into_iter()
            .filter(|s| {
                let (Some(s_last_write), Some(s_last_update)) =
                    (secs(s.last_write_date), secs(Some(s.last_update_time)))
                else {
                    return false;
                };
                let staleness =
                    p_last_write + (s_last_update - p_last_update) - s_last_write + heartbeat_secs;
                staleness <= max_staleness_secs
            })
            .collect()
    } else {
        let Some(reference) = candidates
            .iter()
            .filter_map(|s| secs(s.last_write_date))
            .fold(None, |max, v| Some(max.map_or(v, |m: f64| m.max(v))))
        else {
            return candidates;
        };
        candidates
            .into_iter()
            .filter(|s| {
                let Some(s_last_write) = secs(s.last_write_date) else {
                    return false;
                };
                let staleness = reference - s_last_write + heartbeat_secs;
                staleness <= max_staleness_secs
            })
            .collect()
    }
}

fn secs(time: Option<std::time::SystemTime>) -> Option<f64> {
    time.and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
}

/// Iterates tag sets in order; the first set that matches any candidate narrows the candidate
/// list to exactly those matches. An empty tag-set list (or a candidate list run against an
/// empty tag set) matches everything.
fn filter_by_tag_sets<'a>(
    candidates: Vec<&'a ServerDescription>,
    tag_sets: &[TagSet],
) -> Vec<&'a ServerDescription> {
    if tag_sets.is_empty() {
        return candidates;
    }
    for tag_set in tag_sets {
        let matches: Vec<&ServerDescription> = candidates
            .iter()
            .copied()
            .filter(|s| tag_set.iter().all(|(k, v)| s.tags.get(k) == Some(v)))
            .collect();
        if !matches.is_empty() {
            return matches;
        }
    }
    Vec::new()
}

/// Narrows `candidates` to the latency window: the fastest server, plus every other candidate
/// within `local_threshold` of it.
pub(crate) fn latency_window<'a>(
    candidates: Vec<&'a ServerDescription>,
    ewma: &HashMap<ServerAddress, Duration>,
    local_threshold: Duration,
) -> Vec<&'a ServerDescription> {
    let rtt_of = |s: &ServerDescription| -> Duration {
        ewma.get(&s.address)
            .copied()
            .or(s.round_trip_time)
            .unwrap_or(Duration::ZERO)
    };
    let Some(min_rtt) = candidates.iter().map(|s| rtt_of(s)).min() else {
        return candidates;
    };
    candidates
        .into_iter()
        .filter(|s| rtt_of(s) <= min_rtt + local_threshold)
        .collect()
}

/// Picks uniformly at random from the latency window.
pub(crate) fn choose<'a>(window: &[&'a ServerDescription]) -> Option<&'a ServerDescription> {
    window.choose(&mut rand::rng()).copied()
}

/// What an operation needs from selection: a writable server, or a readable one matching some
/// criteria (a read preference, or a pinned address for `getMore`/`killCursors`).
#[derive(Clone, Copy)]
pub(crate) enum OperationIntent<'a> {
    Write,
    Read(&'a SelectionCriteria),
}

/// Runs one full selection attempt (no retry/scan loop — that lives in the topology worker):
/// filters by `intent`, narrows to the latency window, and picks one server.
pub(crate) fn select_one<'a>(
    topology: &'a Topology,
    intent: &OperationIntent<'_>,
    ewma: &HashMap<ServerAddress, Duration>,
    local_threshold: Duration,
    heartbeat_frequency: Duration,
) -> Result<Option<&'a ServerDescription>> {
    let candidates = match intent {
        OperationIntent::Write => select_writable(topology),
        OperationIntent::Read(SelectionCriteria::ReadPreference(rp)) => {
            select_readable(topology, rp, heartbeat_frequency)?
        }
        OperationIntent::Read(SelectionCriteria::PinnedAddress(address)) => {
            return Ok(topology.get(address).filter(|s| s.is_available()));
        }
    };
    let window = latency_window(candidates, ewma, local_threshold);
    Ok(choose(&window))
}

#[cfg(test)]
mod test {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::sdam::description::server::ServerDescription;

    fn make_secondary(addr: &str, set_name: &str) -> ServerDescription {
        let mut desc = ServerDescription::unknown(addr.parse().unwrap());
        desc.server_type = ServerType::RsSecondary;
        desc.set_name = Some(set_name.to_string());
        desc.round_trip_time = Some(Duration::from_millis(5));
        desc
    }

    #[test]
    fn latency_window_includes_servers_within_threshold() {
        let fast = make_secondary("h1:27017", "rs0");
        let mut slow = make_secondary("h2:27017", "rs0");
        slow.round_trip_time = Some(Duration::from_millis(50));

        let candidates = vec![&fast, &slow];
        let ewma = HashMap::new();
        let window = latency_window(candidates, &ewma, Duration::from_millis(15));
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].address, fast.address);
    }

    #[test]
    fn tag_set_filter_falls_through_to_next_matching_set() {
        let mut a = make_secondary("h1:27017", "rs0");
        a.tags = [("dc".to_string(), "east".to_string())].into_iter().collect();
        let b = make_secondary("h2:27017", "rs0");

        let candidates = vec![&a, &b];
        let tag_sets = vec![
            [("dc".to_string(), "west".to_string())].into_iter().collect(),
            TagSet::new(),
        ];
        let result = filter_by_tag_sets(candidates, &tag_sets);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn staleness_formula_matches_worked_example() {
        let mut topology = Topology::new(&["h1:27017".parse().unwrap()], Some("rs0".to_string()), false);
        let mut primary = ServerDescription::unknown("h1:27017".parse().unwrap());
        primary.server_type = ServerType::RsPrimary;
        primary.last_write_date = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1000));
        primary.last_update_time = SystemTime::UNIX_EPOCH + Duration::from_secs(1010);
        topology.servers.insert(primary.address.clone(), primary);

        let mut secondary = ServerDescription::unknown("h2:27017".parse().unwrap());
        secondary.server_type = ServerType::RsSecondary;
        secondary.last_write_date = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(900));
        secondary.last_update_time = SystemTime::UNIX_EPOCH + Duration::from_secs(1005);
        topology.servers.insert(secondary.address.clone(), secondary.clone());

        let candidates = vec![topology.servers.get(&secondary.address).unwrap()];
        let heartbeat = Duration::from_secs(10);

        let eligible_120 =
            filter_by_staleness(&topology, candidates.clone(), Duration::from_secs(120), heartbeat);
        assert_eq!(eligible_120.len(), 1);

        let eligible_90 =
            filter_by_staleness(&topology, candidates, Duration::from_secs(90), heartbeat);
        assert!(eligible_90.is_empty());
    }
}
