use approx::assert_relative_eq;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use demand_forecast::config::FeatureConfig;
use demand_forecast::data::CountSeries;
use demand_forecast::features::{CalendarField, FeatureBuilder, FeatureKind};
use demand_forecast::forecast::{
    FallbackPolicy, FallbackRule, ForecastHorizon, ForecastSynthesizer, HistorySnapshot,
};
use demand_forecast::ForecastError;
use pretty_assertions::assert_eq;
use rstest::rstest;

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn stations(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[rstest]
#[case(1, vec![2])]
#[case(3, vec![2, 4])]
#[case(7, vec![24])]
#[case(28, vec![6, 12, 24])]
fn test_synthesized_columns_match_builder(#[case] lags: usize, #[case] windows: Vec<usize>) {
    let builder = FeatureBuilder::new(&FeatureConfig::new(lags, windows).unwrap()).unwrap();
    let counts: Vec<u32> = (0..60).map(|i| i % 9).collect();
    let series = CountSeries::from_hourly_counts("A", start(), &counts).unwrap();
    let historical = builder.build(&series).unwrap();

    let snapshot = HistorySnapshot::from_series(&series, builder.schema());
    let horizon = ForecastHorizon::new(start() + Duration::hours(60), 5).unwrap();
    let synthesis = ForecastSynthesizer::new(builder.schema().clone())
        .synthesize(&snapshot, &horizon, &stations(&["A", "new"]))
        .unwrap();

    assert_eq!(synthesis.table.columns(), historical.columns());
    assert_eq!(synthesis.table.schema(), historical.schema());
    assert!(synthesis
        .table
        .rows()
        .iter()
        .all(|row| row.values.len() == historical.schema().len()));
}

#[test]
fn test_station_without_history_gets_exact_calendar_and_global_fallbacks() {
    let builder = FeatureBuilder::new(&FeatureConfig::new(3, vec![2]).unwrap()).unwrap();
    let schema = builder.schema().clone();
    let mut series = CountSeries::from_hourly_counts("A", start(), &[2, 4, 6, 8]).unwrap();
    series
        .insert_station("B", demand_forecast::data::consecutive_hours(start(), &[10, 10]))
        .unwrap();
    let snapshot = HistorySnapshot::from_series(&series, &schema);

    // Saturday 2024-01-06 at 13:00
    let saturday = NaiveDate::from_ymd_opt(2024, 1, 6)
        .unwrap()
        .and_hms_opt(13, 0, 0)
        .unwrap();
    let horizon = ForecastHorizon::new(saturday, 3).unwrap();
    let synthesis = ForecastSynthesizer::new(schema.clone())
        .synthesize(&snapshot, &horizon, &stations(&["C"]))
        .unwrap();

    assert_eq!(synthesis.cold_stations, stations(&["C"]));
    assert_eq!(synthesis.table.len(), 3);

    // global counts: 2, 4, 6, 8, 10, 10
    let global: [f64; 6] = [2.0, 4.0, 6.0, 8.0, 10.0, 10.0];
    let global_mean = global.iter().sum::<f64>() / 6.0;
    let global_std = (global
        .iter()
        .map(|c| (c - global_mean).powi(2))
        .sum::<f64>()
        / 5.0)
        .sqrt();
    for (step, row) in synthesis.table.rows().iter().enumerate() {
        assert_eq!(row.station_id, "C");
        assert_eq!(row.count, None);
        assert_eq!(row.get(&schema, "hour_of_day"), Some(13.0 + step as f64));
        assert_eq!(row.get(&schema, "weekday"), Some(5.0));
        assert_eq!(row.get(&schema, "is_weekend"), Some(1.0));
        assert_eq!(row.get(&schema, "month"), Some(1.0));
        for lag in ["lag_1", "lag_2", "lag_3", "rolling_mean_2"] {
            assert_relative_eq!(row.get(&schema, lag).unwrap(), global_mean, epsilon = 1e-12);
        }
        assert_relative_eq!(
            row.get(&schema, "rolling_std_2").unwrap(),
            global_std,
            epsilon = 1e-12
        );
    }
}

#[test]
fn test_no_history_anywhere_falls_back_to_zero() {
    let builder = FeatureBuilder::new(&FeatureConfig::new(2, vec![2]).unwrap()).unwrap();
    let snapshot = HistorySnapshot::from_series(&CountSeries::new(), builder.schema());
    let horizon = ForecastHorizon::new(start(), 2).unwrap();

    let synthesis = ForecastSynthesizer::new(builder.schema().clone())
        .synthesize(&snapshot, &horizon, &stations(&["C"]))
        .unwrap();

    for row in synthesis.table.rows() {
        assert_eq!(&row.values[..4], &[0.0, 0.0, 0.0, 0.0]);
    }
}

#[test]
fn test_first_forecast_hour_matches_the_next_historical_row() {
    let builder = FeatureBuilder::new(&FeatureConfig::new(5, vec![3, 4]).unwrap()).unwrap();
    let counts: Vec<u32> = vec![3, 9, 4, 1, 7, 2, 8, 6, 5, 11, 0, 4];

    // features of the last row, computed from everything before it
    let full = CountSeries::from_hourly_counts("A", start(), &counts).unwrap();
    let historical = builder.build(&full).unwrap();
    let expected = historical.rows().last().unwrap();

    // synthesize that same hour from the history that precedes it
    let history =
        CountSeries::from_hourly_counts("A", start(), &counts[..counts.len() - 1]).unwrap();
    let snapshot = HistorySnapshot::from_series(&history, builder.schema());
    let horizon = ForecastHorizon::new(expected.hour_bucket, 1).unwrap();
    let synthesis = ForecastSynthesizer::new(builder.schema().clone())
        .synthesize(&snapshot, &horizon, &stations(&["A"]))
        .unwrap();

    let row = &synthesis.table.rows()[0];
    assert_eq!(synthesis.imputed_values, 0);
    for (a, b) in row.values.iter().zip(&expected.values) {
        assert_relative_eq!(a, b, epsilon = 1e-12);
    }
}

#[test]
fn test_horizon_inside_observed_history_is_rejected() {
    let builder = FeatureBuilder::new(&FeatureConfig::new(2, vec![2]).unwrap()).unwrap();
    let counts: Vec<u32> = (100..110).collect();
    let series = CountSeries::from_hourly_counts("A", start(), &counts).unwrap();
    let snapshot = HistorySnapshot::from_series(&series, builder.schema());
    let synthesizer = ForecastSynthesizer::new(builder.schema().clone());

    for offset in [5, 9] {
        let horizon = ForecastHorizon::new(start() + Duration::hours(offset), 1).unwrap();
        let result = synthesizer.synthesize(&snapshot, &horizon, &stations(&["A"]));
        assert!(matches!(result, Err(ForecastError::InvalidParameter(_))));
    }

    // a station without history has nothing to overlap
    let horizon = ForecastHorizon::new(start() + Duration::hours(5), 1).unwrap();
    assert!(synthesizer
        .synthesize(&snapshot, &horizon, &stations(&["B"]))
        .is_ok());

    let horizon = ForecastHorizon::new(start() + Duration::hours(10), 1).unwrap();
    let synthesis = synthesizer
        .synthesize(&snapshot, &horizon, &stations(&["A"]))
        .unwrap();
    assert_eq!(
        synthesis.table.rows()[0].get(builder.schema(), "lag_1"),
        Some(109.0)
    );
}

#[test]
fn test_snapshot_from_table_matches_snapshot_from_series() {
    let builder = FeatureBuilder::new(&FeatureConfig::new(4, vec![2, 3]).unwrap()).unwrap();
    let counts: Vec<u32> = vec![6, 2, 8, 3, 9, 1, 7, 5];
    let series = CountSeries::from_hourly_counts("A", start(), &counts).unwrap();
    let table = builder.build(&series).unwrap();

    let from_table = HistorySnapshot::from_table(&table).unwrap();
    let from_series = HistorySnapshot::from_series(&series, builder.schema());

    let a = from_table.station("A").unwrap();
    let b = from_series.station("A").unwrap();
    assert_eq!(a.stats.last_value, 5.0);
    assert_eq!(a, b);
}

#[test]
fn test_snapshot_from_table_keeps_windows_wider_than_the_lags() {
    let builder = FeatureBuilder::new(&FeatureConfig::new(2, vec![6]).unwrap()).unwrap();
    let counts: Vec<u32> = (0..20).map(|h| (h * 7) % 5).collect();
    let series = CountSeries::from_hourly_counts("A", start(), &counts).unwrap();
    let table = builder.build(&series).unwrap();

    let from_table = HistorySnapshot::from_table(&table).unwrap();
    let from_series = HistorySnapshot::from_series(&series, builder.schema());
    assert_eq!(
        from_table.station("A").unwrap().recent,
        from_series.station("A").unwrap().recent
    );

    let horizon = ForecastHorizon::new(start() + Duration::hours(20), 1).unwrap();
    let synthesizer = ForecastSynthesizer::new(builder.schema().clone());
    let a = synthesizer
        .synthesize(&from_table, &horizon, &stations(&["A"]))
        .unwrap();
    let b = synthesizer
        .synthesize(&from_series, &horizon, &stations(&["A"]))
        .unwrap();

    assert_eq!(a.imputed_values, 0);
    assert_eq!(b.imputed_values, 0);
    assert_eq!(a.table.rows()[0].values, b.table.rows()[0].values);
}

#[test]
fn test_synthesis_does_not_touch_the_snapshot() {
    let builder = FeatureBuilder::new(&FeatureConfig::new(2, vec![2]).unwrap()).unwrap();
    let series = CountSeries::from_hourly_counts("A", start(), &[1, 2, 3]).unwrap();
    let snapshot = HistorySnapshot::from_series(&series, builder.schema());
    let before = snapshot.clone();

    let horizon = ForecastHorizon::new(start() + Duration::hours(3), 48).unwrap();
    ForecastSynthesizer::new(builder.schema().clone())
        .synthesize(&snapshot, &horizon, &stations(&["A", "B"]))
        .unwrap();

    assert_eq!(snapshot, before);
}

#[test]
fn test_custom_policy_changes_only_imputed_fields() {
    let builder = FeatureBuilder::new(&FeatureConfig::new(2, vec![2]).unwrap()).unwrap();
    let schema = builder.schema().clone();
    let series = CountSeries::from_hourly_counts("A", start(), &[4, 10]).unwrap();
    let snapshot = HistorySnapshot::from_series(&series, &schema);
    let horizon = ForecastHorizon::new(start() + Duration::hours(2), 2).unwrap();

    let policy = FallbackPolicy {
        lag: FallbackRule::Zero,
        rolling_mean: FallbackRule::LastValue,
        rolling_std: FallbackRule::Zero,
    };
    assert_eq!(
        policy.rule_for(&FeatureKind::Calendar(CalendarField::Month)),
        None
    );
    let synthesis = ForecastSynthesizer::with_policy(schema.clone(), policy)
        .synthesize(&snapshot, &horizon, &stations(&["A"]))
        .unwrap();
    let rows = synthesis.table.rows();

    // step 0 is fully observed
    assert_eq!(rows[0].get(&schema, "lag_1"), Some(10.0));
    assert_eq!(rows[0].get(&schema, "rolling_mean_2"), Some(7.0));
    // step 1: lag_1 and the rolling fields are imputed
    assert_eq!(rows[1].get(&schema, "lag_1"), Some(0.0));
    assert_eq!(rows[1].get(&schema, "lag_2"), Some(10.0));
    assert_eq!(rows[1].get(&schema, "rolling_mean_2"), Some(10.0));
    assert_eq!(rows[1].get(&schema, "rolling_std_2"), Some(0.0));
    assert_eq!(synthesis.imputed_values, 3);
}

#[test]
fn test_empty_station_list_is_rejected() {
    let builder = FeatureBuilder::new(&FeatureConfig::new(2, vec![2]).unwrap()).unwrap();
    let snapshot = HistorySnapshot::from_series(&CountSeries::new(), builder.schema());
    let horizon = ForecastHorizon::new(start(), 1).unwrap();

    let result = ForecastSynthesizer::new(builder.schema().clone()).synthesize(
        &snapshot,
        &horizon,
        &[],
    );
    assert!(matches!(result, Err(ForecastError::DataInsufficient(_))));
}
