//! Collapse raw trip events into per-station hourly counts

use crate::data::{CountSeries, Event, HourCount, StationId};
use crate::error::Result;
use chrono::{DateTime, NaiveDateTime, Timelike};
use log::{info, warn};
use std::collections::BTreeMap;

/// Naive layouts accepted for trip timestamps, tried in order
const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// An event dropped because its timestamp could not be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub station_id: StationId,
    pub raw: String,
}

/// Outcome of aggregating a batch of events
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub series: CountSeries,
    pub failures: Vec<ParseFailure>,
}

impl Aggregation {
    /// Number of events dropped for unreadable timestamps
    pub fn dropped(&self) -> usize {
        self.failures.len()
    }
}

/// Parse a trip timestamp.
///
/// Offset-carrying RFC 3339 values are converted to UTC; naive values are
/// taken as they are.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }

    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

/// Truncate a timestamp to the start of its hour
pub fn floor_hour(ts: NaiveDateTime) -> Option<NaiveDateTime> {
    ts.with_minute(0)?.with_second(0)?.with_nanosecond(0)
}

/// Groups events by (station, hour) and counts them
#[derive(Debug, Clone, Default)]
pub struct Aggregator;

impl Aggregator {
    pub fn new() -> Self {
        Self
    }

    /// Aggregate events into a count series sorted by station then hour.
    ///
    /// Events whose timestamp cannot be parsed are dropped and reported in
    /// [`Aggregation::failures`]; they never abort the batch.
    pub fn aggregate<'a, I>(&self, events: I) -> Result<Aggregation>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let mut buckets: BTreeMap<StationId, BTreeMap<NaiveDateTime, u32>> = BTreeMap::new();
        let mut failures = Vec::new();
        let mut accepted = 0usize;

        for event in events {
            match parse_timestamp(&event.occurred_at).and_then(floor_hour) {
                Some(hour) => {
                    *buckets
                        .entry(event.station_id.clone())
                        .or_default()
                        .entry(hour)
                        .or_insert(0) += 1;
                    accepted += 1;
                }
                None => failures.push(ParseFailure {
                    station_id: event.station_id.clone(),
                    raw: event.occurred_at.clone(),
                }),
            }
        }

        if !failures.is_empty() {
            warn!(
                "Dropped {} events with unparseable timestamps (first: {:?})",
                failures.len(),
                failures[0].raw
            );
        }

        let stations = buckets
            .into_iter()
            .map(|(station_id, hours)| {
                let counts = hours
                    .into_iter()
                    .map(|(hour_bucket, count)| HourCount { hour_bucket, count })
                    .collect();
                (station_id, counts)
            })
            .collect();
        let series = CountSeries::from_station_counts(stations)?;

        info!(
            "Aggregated {} events into {} hourly counts across {} stations",
            accepted,
            series.len(),
            series.station_count()
        );

        Ok(Aggregation { series, failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn parses_supported_layouts() {
        assert_eq!(parse_timestamp("2024-01-01T00:05"), Some(at(0, 5)));
        assert_eq!(parse_timestamp("2024-01-01 00:05:00"), Some(at(0, 5)));
        assert_eq!(parse_timestamp("2024-01-01 00:05:00.123").map(|t| t.minute()), Some(5));
        assert_eq!(parse_timestamp("2024-01-01T01:05:00+01:00"), Some(at(0, 5)));
        assert_eq!(parse_timestamp("bad-date"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn floors_to_hour() {
        assert_eq!(floor_hour(at(7, 59)), Some(at(7, 0)));
        assert_eq!(floor_hour(at(7, 0)), Some(at(7, 0)));
    }

    #[test]
    fn sorts_by_station_then_hour() {
        let events = vec![
            Event::new("B", "2024-01-01T03:10"),
            Event::new("A", "2024-01-01T05:00"),
            Event::new("A", "2024-01-01T01:30"),
        ];
        let aggregation = Aggregator::new().aggregate(&events).unwrap();

        let stations: Vec<_> = aggregation.series.station_ids();
        assert_eq!(stations, vec!["A".to_string(), "B".to_string()]);
        let hours: Vec<_> = aggregation
            .series
            .station("A")
            .unwrap()
            .iter()
            .map(|c| c.hour_bucket)
            .collect();
        assert_eq!(hours, vec![at(1, 0), at(5, 0)]);
        assert_eq!(aggregation.dropped(), 0);
    }
}
