//! DATEX II travel-time document parser
//!
//! Extracts per-segment travel-time measurements from the road authority's
//! DATEX II snapshot XML. Only the handful of fields the aggregation needs are
//! read; everything else in the (deeply nested, heavily namespaced) document is
//! skipped. Namespace prefixes vary between feed versions, so elements are
//! matched on their local name only.

use std::collections::HashSet;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while parsing a DATEX II document
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document does not contain any physicalQuantity records at all,
    /// meaning the payload container is missing or the document shape changed
    #[error("no physicalQuantity records found in document payload")]
    MissingPayload,

    /// The XML tokenizer failed (truncated or malformed markup)
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),
}

/// Reported trend of a segment's travel time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendType {
    Decreasing,
    Stable,
    Increasing,
    /// Trend values we don't recognize are carried through verbatim
    #[serde(untagged)]
    Other(String),
}

impl TrendType {
    fn from_feed(s: &str) -> Self {
        match s {
            "decreasing" => TrendType::Decreasing,
            "stable" => TrendType::Stable,
            "increasing" => TrendType::Increasing,
            other => TrendType::Other(other.to_string()),
        }
    }
}

/// One segment's measurements from a single snapshot
///
/// Fields absent from the source document stay `None`; the aggregation layer
/// decides what to substitute, not the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeasurement {
    /// Upstream location id of the segment
    pub segment_id: String,
    /// Measured travel time in seconds, if currently available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub travel_time_seconds: Option<f64>,
    /// Free-flow (no delay) travel time in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_flow_seconds: Option<f64>,
    /// Trend of the travel time, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<TrendType>,
}

/// Accumulator for the physicalQuantity record currently being read
#[derive(Default)]
struct PendingRecord {
    segment_id: Option<String>,
    travel_time_seconds: Option<f64>,
    free_flow_seconds: Option<f64>,
    trend: Option<TrendType>,
}

impl PendingRecord {
    fn finish(self) -> Option<SegmentMeasurement> {
        Some(SegmentMeasurement {
            segment_id: self.segment_id?,
            travel_time_seconds: self.travel_time_seconds,
            free_flow_seconds: self.free_flow_seconds,
            trend: self.trend,
        })
    }
}

/// Strips the namespace prefix from a qualified element name
fn local_name(raw: &[u8]) -> &[u8] {
    match raw.iter().rposition(|&b| b == b':') {
        Some(pos) => &raw[pos + 1..],
        None => raw,
    }
}

/// Parses a DATEX II snapshot and returns measurements for the segments of
/// interest, in document order
///
/// Duplicate records for the same segment id are discarded (first occurrence
/// wins), matching how the upstream feed repeats locations across publications.
///
/// # Arguments
/// * `xml` - Raw document text
/// * `interest` - Segment ids referenced by at least one stretch definition
///
/// # Returns
/// * `Ok(Vec<SegmentMeasurement>)` - One entry per distinct interesting segment
/// * `Err(ParseError)` - If the document shape is not a DATEX II snapshot
pub fn extract_measurements(
    xml: &str,
    interest: &HashSet<String>,
) -> Result<Vec<SegmentMeasurement>, ParseError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);

    let mut out = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let mut record_count = 0usize;
    let mut in_quantity = false;
    let mut in_travel_time = false;
    let mut in_free_flow = false;
    // Local name of the most recent start tag, so text events can be routed
    let mut current_tag: Vec<u8> = Vec::new();
    let mut pending = PendingRecord::default();

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = local_name(e.name().as_ref()).to_vec();
                match name.as_slice() {
                    b"physicalQuantity" => {
                        record_count += 1;
                        in_quantity = true;
                        pending = PendingRecord::default();
                    }
                    b"travelTime" if in_quantity => in_travel_time = true,
                    b"freeFlowTravelTime" if in_quantity => in_free_flow = true,
                    b"predefinedLocationReference" if in_quantity => {
                        pending.segment_id = read_id_attribute(&e);
                    }
                    _ => {}
                }
                current_tag = name;
            }
            Event::Empty(e) => {
                // Location references are usually self-closing: <... id="100153"/>
                if in_quantity && local_name(e.name().as_ref()) == b"predefinedLocationReference" {
                    pending.segment_id = read_id_attribute(&e);
                }
            }
            Event::Text(t) => {
                if !in_quantity {
                    continue;
                }
                let text = t.unescape()?;
                let text = text.trim();
                match current_tag.as_slice() {
                    b"duration" if in_travel_time => {
                        pending.travel_time_seconds = text.parse::<f64>().ok();
                    }
                    b"duration" if in_free_flow => {
                        pending.free_flow_seconds = text.parse::<f64>().ok();
                    }
                    b"travelTimeTrendType" => {
                        pending.trend = Some(TrendType::from_feed(text));
                    }
                    _ => {}
                }
            }
            Event::End(e) => match local_name(e.name().as_ref()) {
                b"physicalQuantity" => {
                    in_quantity = false;
                    in_travel_time = false;
                    in_free_flow = false;
                    let record = std::mem::take(&mut pending);
                    if let Some(m) = record.finish() {
                        if interest.contains(&m.segment_id) && seen.insert(m.segment_id.clone()) {
                            out.push(m);
                        }
                    }
                }
                b"travelTime" => in_travel_time = false,
                b"freeFlowTravelTime" => in_free_flow = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if record_count == 0 {
        return Err(ParseError::MissingPayload);
    }

    Ok(out)
}

/// Reads the `id` attribute from a location reference element
fn read_id_attribute(e: &quick_xml::events::BytesStart<'_>) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        if attr.key.as_ref() == b"id" {
            attr.unescape_value()
                .ok()
                .map(|v| v.into_owned())
        } else {
            None
        }
    })
}
