use chrono::{Duration, NaiveDate};
use demand_forecast::aggregate::Aggregator;
use demand_forecast::catalog::{Catalog, LocalCatalog};
use demand_forecast::config::PipelineConfig;
use demand_forecast::features::FeatureBuilder;
use demand_forecast::forecast::{ForecastHorizon, ForecastSynthesizer, HistorySnapshot};
use demand_forecast::metrics::MAE;
use demand_forecast::predict::Predictor;
use demand_forecast::training::Trainer;
use demand_forecast::utils::synthetic_trip_events;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    println!("Demand Forecast: Basic Forecasting Example");
    println!("==========================================\n");

    let config = PipelineConfig::default();
    let start = NaiveDate::from_ymd_opt(2024, 5, 6)
        .ok_or("invalid date")?
        .and_hms_opt(0, 0, 0)
        .ok_or("invalid time")?;

    // Two weeks of synthetic trips for three stations
    println!("Generating trips...");
    let events = synthetic_trip_events(&["S001", "S002", "S003"], start, 24 * 14, 3.0, 2024)?;
    let aggregation = Aggregator::new().aggregate(&events)?;
    println!(
        "{} trips -> {} station-hours ({} dropped)\n",
        events.len(),
        aggregation.series.len(),
        aggregation.dropped()
    );

    // Historical features
    let builder = FeatureBuilder::new(&config.features)?;
    let table = builder.build(&aggregation.series)?;
    println!(
        "Feature table: {} rows x {} features\n",
        table.len(),
        builder.schema().len()
    );

    // Train candidates into a throwaway catalog
    let catalog_dir = tempfile::tempdir()?;
    let catalog = LocalCatalog::open(catalog_dir.path())?;
    let report = Trainer::new(config.training.clone())?.train(&table, &catalog)?;
    println!("Runs ({} train / {} test rows):", report.train_rows, report.test_rows);
    for run in &report.runs {
        println!("  {:<24} {}", run.run_name, run.metrics);
    }
    let (best_run, _) = catalog.best(MAE, true)?;
    println!("Best run: {}\n", best_run);

    // Forecast the next day, including a station that has never been seen
    let mut stations = table.stations();
    stations.push("S999".to_string());
    let snapshot = HistorySnapshot::from_series(&aggregation.series, builder.schema());
    let horizon = ForecastHorizon::new(start + Duration::hours(24 * 14), 24)?;
    let synthesis = ForecastSynthesizer::new(builder.schema().clone())
        .synthesize(&snapshot, &horizon, &stations)?;
    println!(
        "Synthesized {} rows ({} imputed values, cold stations: {:?})",
        synthesis.table.len(),
        synthesis.imputed_values,
        synthesis.cold_stations
    );

    let predictions = Predictor::from_catalog(&catalog, MAE)?.predict(&synthesis.table)?;
    println!("\nFirst forecast hours:");
    for row in predictions.rows().iter().take(6) {
        println!(
            "  {} {} -> {:.2}",
            row.station_id, row.hour_bucket, row.predicted_count
        );
    }

    println!("\nForecasting complete!");
    Ok(())
}
