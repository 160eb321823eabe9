//! Incremental updates of an existing data collection.
//!
//! The planner lists the artifacts already in storage, recovers their split
//! tuples from the file names, builds the reference axis of every tuple the
//! store can serve, and fetches what is missing up to a cutoff. The most
//! recent existing artifact is always fetched again since the store may have
//! published late data for that period after it was written.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::CdsError;
use crate::expand::{SubFilter, expand};
use crate::filter::{Filter, ValueSpec};
use crate::metadata::ProductMetadata;
use crate::naming::parse_split_tuple;
use crate::orchestrator::{DownloadOrchestrator, RunReport, TaskStatus};
use crate::store::Storage;
use crate::transfer::TransferClient;

pub const TEMPORAL_KEYS: &[&str] = &["year", "month", "day", "time"];

static LATENCY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        concat!(
            r"(?i)^\s*(?:(?P<days>[.\d]+)\s*d)?",
            r"\s*(?:(?P<hours>[.\d]+)\s*h)?",
            r"\s*(?:(?P<minutes>[.\d]+)\s*m)?",
            r"\s*(?:(?P<seconds>[.\d]+)\s*s)?\s*$",
        ),
    )
    .expect("latency pattern compiles")
});

/// Parses durations such as `8h`, `2D 8h 5m 2s` or `2m4.3s`. Unit letters are
/// case-insensitive, every field is optional but at least one is required.
pub fn parse_latency(text: &str) -> Result<Duration, CdsError> {
    let invalid = || CdsError::InvalidDuration(text.to_string());
    let captures = LATENCY_RE.captures(text).ok_or_else(invalid)?;

    let mut matched = false;
    let mut seconds = 0f64;
    for (group, factor) in [
        ("days", 86_400f64),
        ("hours", 3_600f64),
        ("minutes", 60f64),
        ("seconds", 1f64),
    ] {
        if let Some(value) = captures.name(group) {
            let value: f64 = value.as_str().parse().map_err(|_| invalid())?;
            seconds += value * factor;
            matched = true;
        }
    }
    if !matched {
        return Err(invalid());
    }
    let millis = (seconds * 1000.0).round();
    if !millis.is_finite() || millis >= i64::MAX as f64 {
        return Err(invalid());
    }
    Duration::try_milliseconds(millis as i64).ok_or_else(invalid)
}

/// Like [`parse_latency`], but a bare integer counts days.
pub fn parse_latency_days(text: &str) -> Result<Duration, CdsError> {
    match text.trim().parse::<i64>() {
        Ok(days) if days >= 0 => {
            Duration::try_days(days).ok_or_else(|| CdsError::InvalidDuration(text.to_string()))
        }
        _ => parse_latency(text),
    }
}

/// Moves `at` back by `latency`. Fails when the result leaves the calendar.
pub fn lag_behind(
    at: NaiveDateTime,
    latency: Duration,
    text: &str,
) -> Result<NaiveDateTime, CdsError> {
    at.checked_sub_signed(latency)
        .ok_or_else(|| CdsError::InvalidDuration(text.to_string()))
}

pub fn parse_until(text: &str) -> Result<NaiveDateTime, CdsError> {
    let text = text.trim();
    if let Ok(at) = chrono::DateTime::parse_from_rfc3339(text) {
        return Ok(at.naive_utc());
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(text, pattern) {
            return Ok(at);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| CdsError::InvalidDate(text.to_string()))
}

/// The value a temporal key takes at `at`, formatted the way the store lists it.
pub fn temporal_token(key: &str, at: NaiveDateTime) -> Option<String> {
    let pattern = match key {
        "year" => "%Y",
        "month" => "%m",
        "day" => "%d",
        "time" => "%H:00",
        _ => return None,
    };
    Some(at.format(pattern).to_string())
}

pub fn is_temporal(key: &str) -> bool {
    TEMPORAL_KEYS.contains(&key)
}

/// The base filter with every temporal key the filter does not pin down
/// filled from the store's published domain.
pub fn with_temporal_domain(filter: &Filter, metadata: &ProductMetadata) -> Filter {
    TEMPORAL_KEYS
        .iter()
        .filter(|key| !filter.contains_key(key))
        .filter_map(|key| {
            metadata
                .dimension(key)
                .map(|values| (*key, ValueSpec::Sequence(values.to_vec())))
        })
        .fold(filter.clone(), |acc, (key, value)| acc.with_value(key, value))
}

/// Every split tuple the store can serve, in artifact-name order.
#[derive(Debug, Clone)]
pub struct ReferenceAxis {
    split_keys: Vec<String>,
    tuples: Vec<Vec<String>>,
    temporal: Vec<usize>,
    periods: Vec<Vec<String>>,
    period_index: HashMap<Vec<String>, usize>,
}

impl ReferenceAxis {
    /// Temporal split keys take the store's published domain, the others the
    /// filter's values. Impossible calendar dates are dropped when year, month
    /// and day are all split keys.
    pub fn build(
        filter: &Filter,
        metadata: &ProductMetadata,
        split_keys: &[String],
    ) -> Result<Self, CdsError> {
        let temporal: Vec<usize> = split_keys
            .iter()
            .enumerate()
            .filter(|(_, key)| is_temporal(key))
            .map(|(position, _)| position)
            .collect();
        if temporal.is_empty() {
            return Err(CdsError::InvalidDimension(
                "update needs at least one temporal split key (year, month, day or time)"
                    .to_string(),
            ));
        }

        let mut domains = Filter::new();
        for key in split_keys {
            let value = match (is_temporal(key), metadata.dimension(key)) {
                (true, Some(values)) => ValueSpec::Sequence(values.to_vec()),
                _ => filter
                    .get(key)
                    .cloned()
                    .ok_or_else(|| CdsError::InvalidDimension(key.clone()))?,
            };
            domains = domains.with_value(key.clone(), value);
        }

        let date_keys = ["year", "month", "day"]
            .map(|key| split_keys.iter().position(|name| name == key));
        let tuples: Vec<Vec<String>> = expand(&domains, split_keys)?
            .map(|sub| sub.split_tuple())
            .filter(|tuple| match date_keys {
                [Some(y), Some(m), Some(d)] => is_calendar_date(&tuple[y], &tuple[m], &tuple[d]),
                _ => true,
            })
            .collect();

        let mut periods = Vec::new();
        let mut period_index = HashMap::new();
        for tuple in &tuples {
            let period = project(tuple, &temporal);
            if !period_index.contains_key(&period) {
                period_index.insert(period.clone(), periods.len());
                periods.push(period);
            }
        }

        Ok(Self {
            split_keys: split_keys.to_vec(),
            tuples,
            temporal,
            periods,
            period_index,
        })
    }

    pub fn split_keys(&self) -> &[String] {
        &self.split_keys
    }

    pub fn tuples(&self) -> &[Vec<String>] {
        &self.tuples
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Position of the tuple's temporal part on the time line, if on the axis.
    pub fn period_of(&self, tuple: &[String]) -> Option<usize> {
        if tuple.len() != self.split_keys.len() {
            return None;
        }
        self.period_index.get(&project(tuple, &self.temporal)).copied()
    }

    /// The temporal tuple for `at` projected on the split keys.
    pub fn cutoff_tuple(&self, at: NaiveDateTime) -> Vec<String> {
        self.temporal
            .iter()
            .filter_map(|&position| temporal_token(&self.split_keys[position], at))
            .collect()
    }

    pub fn cutoff_period(&self, at: NaiveDateTime) -> Result<usize, CdsError> {
        let cutoff = self.cutoff_tuple(at);
        self.period_index
            .get(&cutoff)
            .copied()
            .ok_or_else(|| CdsError::CutoffNotFound {
                cutoff: cutoff.join("-"),
                first: self.periods.first().map(|p| p.join("-")).unwrap_or_default(),
                last: self.periods.last().map(|p| p.join("-")).unwrap_or_default(),
            })
    }
}

fn project(tuple: &[String], positions: &[usize]) -> Vec<String> {
    positions.iter().map(|&position| tuple[position].clone()).collect()
}

fn is_calendar_date(year: &str, month: &str, day: &str) -> bool {
    match (year.parse(), month.parse(), day.parse()) {
        (Ok(year), Ok(month), Ok(day)) => NaiveDate::from_ymd_opt(year, month, day).is_some(),
        _ => true,
    }
}

/// Split tuples of the artifacts already in `storage`, in file-name order.
pub fn existing_tuples(
    storage: &Storage,
    split_keys: &[String],
    format: &str,
) -> Result<Vec<Vec<String>>, CdsError> {
    Ok(storage
        .list_artifacts(format)?
        .iter()
        .filter_map(|name| parse_split_tuple(name, split_keys.len()))
        .collect())
}

/// Tuples to fetch: every axis tuple up to the cutoff period that is not in
/// `existing`, plus the existing tuples of the latest stored period. With
/// `start_from_files`, periods before the earliest stored one are ignored.
pub fn missing_tuples(
    axis: &ReferenceAxis,
    existing: &[Vec<String>],
    cutoff_period: usize,
    start_from_files: bool,
) -> (Vec<Vec<String>>, Vec<Vec<String>>) {
    let stored: Vec<(&Vec<String>, usize)> = existing
        .iter()
        .filter_map(|tuple| axis.period_of(tuple).map(|period| (tuple, period)))
        .collect();
    let latest = stored.iter().map(|(_, period)| *period).max();
    let earliest = stored.iter().map(|(_, period)| *period).min();

    let refreshed: HashSet<&Vec<String>> = stored
        .iter()
        .filter(|(_, period)| Some(*period) == latest)
        .map(|(tuple, _)| *tuple)
        .collect();
    let present: HashSet<&Vec<String>> = existing
        .iter()
        .filter(|tuple| !refreshed.contains(tuple))
        .collect();
    let start = if start_from_files {
        earliest.unwrap_or(0)
    } else {
        0
    };

    let missing = axis
        .tuples()
        .iter()
        .filter(|tuple| {
            axis.period_of(tuple)
                .map(|period| period >= start && period <= cutoff_period)
                .unwrap_or(false)
        })
        .filter(|tuple| !present.contains(tuple))
        .cloned()
        .collect();
    let mut refreshed: Vec<Vec<String>> = refreshed.into_iter().cloned().collect();
    refreshed.sort();
    (missing, refreshed)
}

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub until: NaiveDateTime,
    pub latency: Option<String>,
    pub start_from_files: bool,
}

impl UpdateOptions {
    pub fn cutoff(&self) -> Result<NaiveDateTime, CdsError> {
        match &self.latency {
            Some(latency) => lag_behind(self.until, parse_latency(latency)?, latency),
            None => Ok(self.until),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub cutoff: Vec<String>,
    pub missing: Vec<Vec<String>>,
    pub refreshed: Vec<Vec<String>>,
    pub sub_filters: Vec<SubFilter>,
}

/// Planning phase of an update; everything that can fail does so here,
/// before any download is dispatched.
pub fn plan_update(
    filter: &Filter,
    metadata: &ProductMetadata,
    storage: &Storage,
    split_keys: &[String],
    options: &UpdateOptions,
) -> Result<UpdatePlan, CdsError> {
    let cutoff_at = options.cutoff()?;
    let axis = ReferenceAxis::build(filter, metadata, split_keys)?;
    let cutoff_period = axis.cutoff_period(cutoff_at)?;
    let existing = existing_tuples(storage, split_keys, filter.format())?;
    let (missing, refreshed) =
        missing_tuples(&axis, &existing, cutoff_period, options.start_from_files);

    let base = with_temporal_domain(filter, metadata);
    let sub_filters = missing
        .iter()
        .map(|tuple| SubFilter::from_tuple(&base, split_keys, tuple))
        .collect::<Result<Vec<_>, CdsError>>()?;

    debug!(
        axis = axis.len(),
        existing = existing.len(),
        missing = missing.len(),
        refreshed = ?refreshed,
        "update planned"
    );
    Ok(UpdatePlan {
        cutoff: axis.cutoff_tuple(cutoff_at),
        missing,
        refreshed,
        sub_filters,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct Relocation {
    pub artifact: String,
    pub replaced: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub cutoff: Vec<String>,
    pub missing: Vec<Vec<String>>,
    pub run: RunReport,
    pub relocations: Vec<Relocation>,
}

impl UpdateReport {
    pub fn is_success(&self) -> bool {
        self.run.is_success() && self.relocations.iter().all(|item| item.error.is_none())
    }
}

/// Downloads the planned tuples into a staging directory inside `storage`,
/// then moves each new artifact into place, replacing the refreshed ones.
pub fn apply_update<T: TransferClient + 'static>(
    orchestrator: &DownloadOrchestrator<T>,
    product_id: &str,
    plan: UpdatePlan,
    storage: &Storage,
) -> Result<UpdateReport, CdsError> {
    let staging = storage.staging()?;
    let run = orchestrator.run(product_id, plan.sub_filters, &staging.storage(), true)?;

    let relocations = run
        .outcomes
        .iter()
        .filter(|outcome| outcome.status == TaskStatus::Downloaded)
        .map(|outcome| {
            let source = staging.path().join(&outcome.artifact);
            match storage.relocate(&source, &outcome.artifact) {
                Ok(replaced) => Relocation {
                    artifact: outcome.artifact.clone(),
                    replaced,
                    error: None,
                },
                Err(err) => {
                    warn!(artifact = %outcome.artifact, error = %err, "relocation failed");
                    Relocation {
                        artifact: outcome.artifact.clone(),
                        replaced: false,
                        error: Some(err.to_string()),
                    }
                }
            }
        })
        .collect::<Vec<_>>();

    info!(
        product = product_id,
        downloaded = run.downloaded(),
        failed = run.failed(),
        relocated = relocations.iter().filter(|item| item.error.is_none()).count(),
        "update finished"
    );
    Ok(UpdateReport {
        cutoff: plan.cutoff,
        missing: plan.missing,
        run,
        relocations,
    })
}

pub const LATEST_SPLIT_KEYS: &[&str] = &["variable", "year", "month", "day"];

/// Sub-filters for the single day containing `at`. Without explicit split
/// keys the defaults that the filter actually holds are used.
pub fn plan_latest(
    filter: &Filter,
    metadata: &ProductMetadata,
    split_keys: Option<&[String]>,
    at: NaiveDateTime,
) -> Result<Vec<SubFilter>, CdsError> {
    let pinned = ["year", "month", "day"]
        .into_iter()
        .filter_map(|key| temporal_token(key, at).map(|token| (key, token)))
        .fold(filter.clone(), |acc, (key, token)| {
            acc.with_value(key, ValueSpec::scalar(token))
        });
    let base = with_temporal_domain(&pinned, metadata);

    let split_keys: Vec<String> = match split_keys {
        Some(keys) => keys.to_vec(),
        None => LATEST_SPLIT_KEYS
            .iter()
            .filter(|key| base.contains_key(key))
            .map(|key| key.to_string())
            .collect(),
    };
    debug!(day = %at.date(), split_keys = ?split_keys, "latest planned");
    Ok(expand(&base, &split_keys)?.collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn tuple(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn keys(names: &[&str]) -> Vec<String> {
        tuple(names)
    }

    fn ymd() -> Vec<String> {
        keys(&["year", "month", "day"])
    }

    fn metadata(days: &[&str]) -> ProductMetadata {
        ProductMetadata {
            selection_limit: 1000,
            dimensions: vec![
                ("year".to_string(), tuple(&["1980"])),
                ("month".to_string(), tuple(&["01", "02", "03"])),
                ("day".to_string(), tuple(days)),
                ("time".to_string(), tuple(&["00:00", "12:00"])),
            ],
        }
    }

    fn base_filter() -> Filter {
        serde_json::from_str(
            r#"{"product_type": "reanalysis", "format": "grib",
                "variable": "2m_temperature", "year": "1980", "month": "01", "day": "01"}"#,
        )
        .unwrap()
    }

    fn at(text: &str) -> NaiveDateTime {
        parse_until(text).unwrap()
    }

    #[test]
    fn latency_fields() {
        assert_eq!(parse_latency("8h").unwrap(), Duration::hours(8));
        assert_eq!(
            parse_latency("2D 8h 5m 2s").unwrap(),
            Duration::days(2) + Duration::hours(8) + Duration::minutes(5) + Duration::seconds(2)
        );
        assert_eq!(
            parse_latency("2m4.3s").unwrap(),
            Duration::minutes(2) + Duration::milliseconds(4300)
        );
        assert_eq!(parse_latency("1.5d").unwrap(), Duration::hours(36));
        assert_eq!(parse_latency("5D").unwrap(), parse_latency("5d").unwrap());
    }

    #[test]
    fn latency_needs_a_field() {
        assert_matches!(parse_latency(""), Err(CdsError::InvalidDuration(_)));
        assert_matches!(parse_latency("soon"), Err(CdsError::InvalidDuration(_)));
        assert_matches!(parse_latency("5"), Err(CdsError::InvalidDuration(_)));
        assert_matches!(parse_latency(".h"), Err(CdsError::InvalidDuration(_)));
    }

    #[test]
    fn bare_integer_latency_is_days() {
        assert_eq!(parse_latency_days("5").unwrap(), Duration::days(5));
        assert_eq!(parse_latency_days("6h").unwrap(), Duration::hours(6));
    }

    #[test]
    fn until_accepts_dates_and_timestamps() {
        assert_eq!(at("1980-03-01").format("%Y%m%d%H").to_string(), "1980030100");
        assert_eq!(at("1980-03-01T06:30:00Z").format("%H").to_string(), "06");
        assert_matches!(parse_until("March"), Err(CdsError::InvalidDate(_)));
    }

    #[test]
    fn axis_is_lexicographic_in_split_order() {
        let axis = ReferenceAxis::build(&base_filter(), &metadata(&["01", "02"]), &ymd()).unwrap();
        assert_eq!(axis.len(), 6);
        assert_eq!(axis.tuples()[0], tuple(&["1980", "01", "01"]));
        assert_eq!(axis.tuples()[1], tuple(&["1980", "01", "02"]));
        assert_eq!(axis.tuples()[5], tuple(&["1980", "03", "02"]));
    }

    #[test]
    fn axis_drops_impossible_dates() {
        let axis = ReferenceAxis::build(
            &base_filter(),
            &metadata(&["28", "29", "30", "31"]),
            &ymd(),
        )
        .unwrap();
        assert!(axis.tuples().contains(&tuple(&["1980", "02", "29"])));
        assert!(!axis.tuples().contains(&tuple(&["1980", "02", "30"])));
        assert_eq!(axis.len(), 4 + 2 + 4);
    }

    #[test]
    fn axis_requires_a_temporal_key() {
        let err = ReferenceAxis::build(&base_filter(), &metadata(&["01"]), &keys(&["variable"]))
            .unwrap_err();
        assert_matches!(err, CdsError::InvalidDimension(_));
    }

    #[test]
    fn cutoff_outside_axis_reports_bounds() {
        let axis = ReferenceAxis::build(&base_filter(), &metadata(&["01", "02"]), &ymd()).unwrap();
        let err = axis.cutoff_period(at("1981-01-01")).unwrap_err();
        assert_matches!(
            err,
            CdsError::CutoffNotFound { cutoff, first, last }
                if cutoff == "1981-01-01" && first == "1980-01-01" && last == "1980-03-02"
        );
    }

    #[test]
    fn latest_stored_period_is_fetched_again() {
        let axis = ReferenceAxis::build(&base_filter(), &metadata(&["01", "02"]), &ymd()).unwrap();
        let existing = vec![
            tuple(&["1980", "01", "01"]),
            tuple(&["1980", "01", "02"]),
            tuple(&["1980", "02", "01"]),
            tuple(&["1980", "02", "02"]),
        ];
        let cutoff = axis.cutoff_period(at("1980-03-01")).unwrap();
        let (missing, refreshed) = missing_tuples(&axis, &existing, cutoff, false);
        assert_eq!(
            missing,
            vec![tuple(&["1980", "02", "02"]), tuple(&["1980", "03", "01"])]
        );
        assert_eq!(refreshed, vec![tuple(&["1980", "02", "02"])]);
    }

    #[test]
    fn start_from_files_ignores_earlier_gaps() {
        let days = ["01", "02", "03", "04", "05", "06"];
        let axis = ReferenceAxis::build(&base_filter(), &metadata(&days), &ymd()).unwrap();
        let existing = vec![tuple(&["1980", "01", "05"]), tuple(&["1980", "01", "06"])];
        let cutoff = axis.cutoff_period(at("1980-02-02")).unwrap();

        let (missing, _) = missing_tuples(&axis, &existing, cutoff, true);
        assert_eq!(
            missing,
            vec![
                tuple(&["1980", "01", "06"]),
                tuple(&["1980", "02", "01"]),
                tuple(&["1980", "02", "02"]),
            ]
        );

        let (all, _) = missing_tuples(&axis, &existing, cutoff, false);
        assert_eq!(all.len(), 4 + 3);
        assert_eq!(all[0], tuple(&["1980", "01", "01"]));
    }

    #[test]
    fn empty_storage_fetches_everything_up_to_cutoff() {
        let axis = ReferenceAxis::build(&base_filter(), &metadata(&["01", "02"]), &ymd()).unwrap();
        let cutoff = axis.cutoff_period(at("1980-02-01")).unwrap();
        let (missing, refreshed) = missing_tuples(&axis, &[], cutoff, true);
        assert_eq!(missing.len(), 3);
        assert!(refreshed.is_empty());
    }

    #[test]
    fn non_temporal_split_key_compares_periods() {
        let filter = base_filter().with_value(
            "variable",
            ValueSpec::sequence(["2m_temperature", "total_precipitation"]),
        );
        let split = keys(&["variable", "year", "month", "day"]);
        let axis = ReferenceAxis::build(&filter, &metadata(&["01", "02"]), &split).unwrap();
        assert_eq!(axis.len(), 12);

        let existing = vec![
            tuple(&["2m_temperature", "1980", "01", "01"]),
            tuple(&["2m_temperature", "1980", "01", "02"]),
            tuple(&["total_precipitation", "1980", "01", "01"]),
            tuple(&["total_precipitation", "1980", "01", "02"]),
        ];
        let cutoff = axis.cutoff_period(at("1980-02-01")).unwrap();
        let (missing, refreshed) = missing_tuples(&axis, &existing, cutoff, false);
        assert_eq!(refreshed.len(), 2);
        assert_eq!(
            missing,
            vec![
                tuple(&["2m_temperature", "1980", "01", "02"]),
                tuple(&["2m_temperature", "1980", "02", "01"]),
                tuple(&["total_precipitation", "1980", "01", "02"]),
                tuple(&["total_precipitation", "1980", "02", "01"]),
            ]
        );
    }

    #[test]
    fn unpinned_temporal_keys_take_the_store_domain() {
        let filter = with_temporal_domain(&base_filter(), &metadata(&["01"]));
        assert_eq!(filter.get("time"), Some(&ValueSpec::sequence(["00:00", "12:00"])));
        assert_eq!(filter.get("day"), Some(&ValueSpec::scalar("01")));
    }

    #[test]
    fn latest_pins_the_day_and_splits_by_default_keys() {
        let filter = base_filter().with_value(
            "variable",
            ValueSpec::sequence(["2m_temperature", "total_precipitation"]),
        );
        let subs =
            plan_latest(&filter, &metadata(&["01"]), None, at("2023-07-04T09:00:00")).unwrap();

        assert_eq!(subs.len(), 2);
        assert_eq!(
            subs[0].split_values(),
            vec!["2m_temperature", "2023", "07", "04"]
        );
        assert_eq!(
            subs[1].get("time"),
            Some(&ValueSpec::sequence(["00:00", "12:00"]))
        );
    }

    #[test]
    fn latency_moves_the_cutoff_back() {
        let options = UpdateOptions {
            until: at("1980-03-02"),
            latency: Some("1D".to_string()),
            start_from_files: false,
        };
        assert_eq!(options.cutoff().unwrap(), at("1980-03-01"));

        let broken = UpdateOptions {
            latency: Some("yesterday".to_string()),
            ..options
        };
        assert_matches!(broken.cutoff(), Err(CdsError::InvalidDuration(_)));
    }

    #[test]
    fn latency_beyond_the_calendar_is_rejected() {
        let options = UpdateOptions {
            until: at("1980-03-01"),
            latency: Some("99999999999D".to_string()),
            start_from_files: false,
        };
        assert_matches!(
            options.cutoff(),
            Err(CdsError::InvalidDuration(text)) if text == "99999999999D"
        );

        assert_matches!(
            parse_latency("99999999999999999999D"),
            Err(CdsError::InvalidDuration(_))
        );
        assert_matches!(
            parse_latency_days("9223372036854775807"),
            Err(CdsError::InvalidDuration(_))
        );
        let huge = parse_latency_days("99999999999").unwrap();
        assert_matches!(
            lag_behind(at("2023-07-09"), huge, "99999999999"),
            Err(CdsError::InvalidDuration(_))
        );
    }
}
