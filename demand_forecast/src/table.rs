//! Persisted tables: the feature table with its schema manifest, and the
//! prediction table handed to consumers

use crate::data::StationId;
use crate::error::{ForecastError, Result};
use crate::features::{FeatureRow, FeatureSchema, FeatureTable};
use crate::utils::{format_hour, parse_hour, stage_file, write_atomically};
use chrono::NaiveDateTime;
use log::info;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

impl FeatureTable {
    /// Convert the table into a polars DataFrame with every column of
    /// [`FeatureTable::columns`]
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let rows = self.rows();
        let station_ids: Vec<&str> = rows.iter().map(|r| r.station_id.as_str()).collect();
        let hours: Vec<String> = rows.iter().map(|r| format_hour(r.hour_bucket)).collect();
        let counts: Vec<Option<i64>> = rows.iter().map(|r| r.count.map(i64::from)).collect();

        let mut columns = vec![
            Series::new("station_id", station_ids),
            Series::new("hour_bucket", hours),
            Series::new("count", counts),
        ];
        for (idx, name) in self.schema().columns().iter().enumerate() {
            let values: Vec<f64> = rows.iter().map(|r| r.values[idx]).collect();
            columns.push(Series::new(name, values));
        }

        Ok(DataFrame::new(columns)?)
    }

    /// Rebuild a table from a DataFrame laid out by [`FeatureTable::to_dataframe`]
    pub fn from_dataframe(df: &DataFrame, schema: FeatureSchema) -> Result<Self> {
        let expected = FeatureTable::new(schema.clone()).columns();
        let actual: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        if actual != expected {
            return Err(ForecastError::Alignment(format!(
                "Feature table columns {:?} do not match the schema manifest {:?}",
                actual, expected
            )));
        }

        let station_ids = df.column("station_id")?.cast(&DataType::Utf8)?;
        let hours = df.column("hour_bucket")?.cast(&DataType::Utf8)?;
        let counts = df.column("count")?.cast(&DataType::Int64)?;
        let features = schema
            .columns()
            .iter()
            .map(|name| Ok(df.column(name)?.cast(&DataType::Float64)?))
            .collect::<Result<Vec<Series>>>()?;

        let station_ids = station_ids.utf8()?;
        let hours = hours.utf8()?;
        let counts = counts.i64()?;
        let features = features
            .iter()
            .map(|series| Ok(series.f64()?))
            .collect::<Result<Vec<_>>>()?;

        let mut table = FeatureTable::new(schema);
        for idx in 0..df.height() {
            let station_id = station_ids
                .get(idx)
                .ok_or_else(|| missing_cell("station_id", idx))?;
            let hour = parse_hour(hours.get(idx).ok_or_else(|| missing_cell("hour_bucket", idx))?)?;
            let count = match counts.get(idx) {
                Some(count) => Some(u32::try_from(count).map_err(|_| {
                    ForecastError::DataError(format!("Row {} has an invalid count {}", idx, count))
                })?),
                None => None,
            };
            let values = features
                .iter()
                .enumerate()
                .map(|(col, values)| {
                    values
                        .get(idx)
                        .ok_or_else(|| missing_cell(&table.schema().columns()[col], idx))
                })
                .collect::<Result<Vec<f64>>>()?;

            table.push(FeatureRow {
                station_id: station_id.to_string(),
                hour_bucket: hour,
                count,
                values,
            })?;
        }

        Ok(table)
    }
}

fn missing_cell(column: &str, row: usize) -> ForecastError {
    ForecastError::DataError(format!("Row {} has no value for column '{}'", row, column))
}

/// Write the feature table as CSV and its schema manifest as JSON
pub fn write_feature_table(
    table: &FeatureTable,
    csv_path: &Path,
    schema_path: &Path,
) -> Result<()> {
    let mut df = table.to_dataframe()?;
    let json = serde_json::to_string_pretty(table.schema())?;

    // both files are complete before either replaces its predecessor
    let csv = stage_file(csv_path, |file| {
        CsvWriter::new(file).has_header(true).finish(&mut df)?;
        Ok(())
    })?;
    let manifest = stage_file(schema_path, |file| {
        file.write_all(json.as_bytes())?;
        Ok(())
    })?;
    manifest.commit()?;
    csv.commit()?;

    info!(
        "Wrote {} feature rows to {}",
        table.len(),
        csv_path.display()
    );
    Ok(())
}

/// Read a feature table, checking it against its schema manifest
pub fn read_feature_table(csv_path: &Path, schema_path: &Path) -> Result<FeatureTable> {
    let schema = read_schema(schema_path)?;

    let mut dtypes = Schema::new();
    dtypes.with_column("station_id".into(), DataType::Utf8);
    dtypes.with_column("hour_bucket".into(), DataType::Utf8);

    let file = File::open(csv_path)?;
    let df = CsvReader::new(file)
        .infer_schema(None)
        .has_header(true)
        .with_dtypes(Some(Arc::new(dtypes)))
        .finish()?;

    let table = FeatureTable::from_dataframe(&df, schema)?;
    info!(
        "Read {} feature rows from {}",
        table.len(),
        csv_path.display()
    );
    Ok(table)
}

/// Persist a schema manifest
pub fn write_schema(schema: &FeatureSchema, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(schema)?;
    write_atomically(path, |file| {
        file.write_all(json.as_bytes())?;
        Ok(())
    })
}

/// Load and validate a schema manifest
pub fn read_schema(path: &Path) -> Result<FeatureSchema> {
    let contents = fs::read_to_string(path)?;
    let schema: FeatureSchema = serde_json::from_str(&contents)?;
    schema.validate()?;
    Ok(schema)
}

/// One predicted count, joinable with the feature table on station and hour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub station_id: StationId,
    #[serde(with = "hour_bucket_format")]
    pub hour_bucket: NaiveDateTime,
    pub predicted_count: f64,
}

/// Predictions in the order of the feature rows they were made for
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionTable {
    rows: Vec<PredictionRow>,
}

impl PredictionTable {
    pub fn new(rows: Vec<PredictionRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[PredictionRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Prediction for a station at an hour, if present
    pub fn get(&self, station_id: &str, hour: NaiveDateTime) -> Option<f64> {
        self.rows
            .iter()
            .find(|row| row.station_id == station_id && row.hour_bucket == hour)
            .map(|row| row.predicted_count)
    }

    /// Write the table as CSV with columns station_id, hour_bucket, predicted_count
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        write_atomically(path, |file| {
            let mut writer = csv::Writer::from_writer(file);
            for row in &self.rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
            Ok(())
        })?;
        info!("Wrote {} predictions to {}", self.len(), path.display());
        Ok(())
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let rows = reader
            .deserialize()
            .collect::<std::result::Result<Vec<PredictionRow>, _>>()?;
        Ok(Self { rows })
    }
}

mod hour_bucket_format {
    use crate::data::HOUR_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(hour: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hour.format(HOUR_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, HOUR_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::data::CountSeries;
    use crate::features::FeatureBuilder;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn hour(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn table() -> FeatureTable {
        let builder = FeatureBuilder::new(&FeatureConfig::new(2, vec![3]).unwrap()).unwrap();
        let mut series =
            CountSeries::from_hourly_counts("007", hour(0), &[3, 1, 4, 1, 5, 9]).unwrap();
        series
            .insert_station("B", crate::data::consecutive_hours(hour(0), &[2, 7, 1, 8]))
            .unwrap();
        builder.build(&series).unwrap()
    }

    #[test]
    fn feature_table_round_trips_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("features").join("ride_features.csv");
        let schema_path = dir.path().join("features").join("feature_schema.json");

        let original = table();
        write_feature_table(&original, &csv_path, &schema_path).unwrap();
        let restored = read_feature_table(&csv_path, &schema_path).unwrap();

        assert_eq!(restored.schema(), original.schema());
        assert_eq!(restored.len(), original.len());
        for (a, b) in restored.rows().iter().zip(original.rows()) {
            assert_eq!(a.station_id, b.station_id);
            assert_eq!(a.hour_bucket, b.hour_bucket);
            assert_eq!(a.count, b.count);
            for (x, y) in a.values.iter().zip(&b.values) {
                assert_relative_eq!(x, y, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn failed_manifest_write_keeps_the_previous_table() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("ride_features.csv");
        let schema_path = dir.path().join("feature_schema.json");
        write_feature_table(&table(), &csv_path, &schema_path).unwrap();
        let before = fs::read_to_string(&csv_path).unwrap();

        // the manifest's parent is a regular file, so it cannot be written
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let smaller = table().tail_per_station(1);
        let result = write_feature_table(&smaller, &csv_path, &blocker.join("schema.json"));

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&csv_path).unwrap(), before);
        assert!(!dir.path().join("ride_features.csv.tmp").exists());
    }

    #[test]
    fn mismatched_manifest_is_an_alignment_error() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("ride_features.csv");
        let schema_path = dir.path().join("feature_schema.json");
        write_feature_table(&table(), &csv_path, &schema_path).unwrap();

        let other = FeatureSchema::new(&FeatureConfig::new(3, vec![3]).unwrap()).unwrap();
        write_schema(&other, &schema_path).unwrap();

        let result = read_feature_table(&csv_path, &schema_path);
        assert!(matches!(result, Err(ForecastError::Alignment(_))));
    }

    #[test]
    fn prediction_csv_has_joinable_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.csv");
        let predictions = PredictionTable::new(vec![
            PredictionRow {
                station_id: "A".to_string(),
                hour_bucket: hour(5),
                predicted_count: 2.5,
            },
            PredictionRow {
                station_id: "B".to_string(),
                hour_bucket: hour(6),
                predicted_count: 0.0,
            },
        ]);
        predictions.write_csv(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents.lines().next(),
            Some("station_id,hour_bucket,predicted_count")
        );
        assert!(contents.contains("A,2024-01-01 05:00:00,2.5"));
        assert_eq!(PredictionTable::read_csv(&path).unwrap(), predictions);
    }
}
