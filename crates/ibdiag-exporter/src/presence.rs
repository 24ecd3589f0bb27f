//! Switch presence
//!
//! A switch that drops out of the fabric does not show up in the dump at all,
//! so its absence can only be noticed against the baseline.

use crate::baseline::Baseline;
use crate::link::{cache_key, LinkRecord, SwitchPresence};
use std::collections::HashSet;
use tracing::debug;

/// Port whose baseline entry names a missing switch
const REPRESENTATIVE_PORT: &str = "1";

/// Up/down presence for every switch seen now or remembered by the baseline.
///
/// Switches known only to the baseline are reported down under the name kept
/// at port `1`; without that entry they are skipped rather than reported
/// nameless. Switches seen in `records` are reported up under the first name
/// observed for them. Down entries come first, in guid order, followed by up
/// entries in first-seen order.
pub fn diff_switches(records: &[LinkRecord], baseline: &Baseline) -> Vec<SwitchPresence> {
    let mut seen = HashSet::new();
    let mut current = Vec::new();
    for record in records {
        if seen.insert(record.remote_guid.as_str()) {
            current.push((record.remote_guid.as_str(), record.remote_name.as_str()));
        }
    }

    let mut presence = Vec::new();
    for guid in baseline.all_guids() {
        if seen.contains(guid.as_str()) {
            continue;
        }
        match baseline.get(&cache_key(&guid, REPRESENTATIVE_PORT)) {
            Some(entry) => presence.push(SwitchPresence::down(guid, entry.remote_name)),
            None => debug!(guid = %guid, "Missing switch has no port 1 entry, not reported"),
        }
    }

    presence.extend(
        current
            .into_iter()
            .map(|(guid, name)| SwitchPresence::up(guid, name)),
    );
    presence
}
