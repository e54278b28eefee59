//! Stretch aggregation
//!
//! Folds per-segment measurements into one row per configured road stretch:
//! current travel time, free-flow baseline, and the delay between them, in both
//! seconds and whole minutes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::datex::SegmentMeasurement;
use crate::stretch::StretchDefinition;

/// Aggregated travel times for one road stretch
///
/// Field names match the wire format the widget consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StretchResult {
    /// Display name of the stretch
    #[serde(rename = "stretch")]
    pub name: String,
    /// Current travel time in whole minutes
    pub time_now: i64,
    /// Free-flow travel time in whole minutes
    pub time_normal: i64,
    /// Delay in whole minutes (signed; negative when traffic beats free flow)
    pub delay: i64,
    /// Current travel time in seconds
    pub time_now_seconds: i64,
    /// Free-flow travel time in seconds
    pub time_normal_seconds: i64,
    /// Delay in seconds (signed)
    pub delay_seconds: i64,
}

/// Rounds seconds to whole minutes, nearest with ties toward positive infinity
///
/// `-30` rounds to `0`, `30` rounds to `1`.
fn minutes(seconds: i64) -> i64 {
    (seconds as f64 / 60.0 + 0.5).floor() as i64
}

/// Computes one result row per stretch that has at least one measured segment
///
/// A segment with a missing travel time contributes its own free-flow time
/// instead (the feed drops the live value when a segment is quiet, not when it
/// is congested). Stretches with no matching measurements at all are omitted.
/// Output order follows the definition order.
pub fn aggregate_stretches(
    measurements: &[SegmentMeasurement],
    stretches: &[StretchDefinition],
) -> Vec<StretchResult> {
    let by_id: HashMap<&str, &SegmentMeasurement> = measurements
        .iter()
        .map(|m| (m.segment_id.as_str(), m))
        .collect();

    stretches
        .iter()
        .filter_map(|stretch| {
            let mut time_now_seconds = 0i64;
            let mut time_normal_seconds = 0i64;
            let mut matched = false;

            for id in &stretch.segment_ids {
                let Some(m) = by_id.get(id.as_str()) else {
                    continue;
                };
                matched = true;
                let free_flow = m.free_flow_seconds.unwrap_or(0.0).trunc() as i64;
                let travel = m
                    .travel_time_seconds
                    .map(|t| t.trunc() as i64)
                    .unwrap_or(free_flow);
                time_now_seconds += travel;
                time_normal_seconds += free_flow;
            }

            if !matched {
                return None;
            }

            let delay_seconds = time_now_seconds - time_normal_seconds;
            Some(StretchResult {
                name: stretch.name.clone(),
                time_now: minutes(time_now_seconds),
                time_normal: minutes(time_normal_seconds),
                delay: minutes(delay_seconds),
                time_now_seconds,
                time_normal_seconds,
                delay_seconds,
            })
        })
        .collect()
}
