//! CSV and GeoTIFF export of result tables.
//!
//! The CSV is a long table with one row per value:
//!
//! ```text
//! project,zone,layer,period,statistic,value,unit,dataset,status,error_kind,message
//! ```

use crate::batch::{BatchReport, ProjectStatus};
use crate::derived::DerivedRow;
use crate::result::{Outcome, ResultEntry, ResultTable};
use crate::run::ZoneWindow;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use zonestats_algorithms::statistics::ObservationValue;
use zonestats_cloud::LayerCatalog;
use zonestats_core::io::write_geotiff;
use zonestats_core::{Error, Result};

pub const CSV_HEADER: [&str; 11] = [
    "project",
    "zone",
    "layer",
    "period",
    "statistic",
    "value",
    "unit",
    "dataset",
    "status",
    "error_kind",
    "message",
];

fn csv_err(e: csv::Error) -> Error {
    Error::Other(format!("CSV error: {}", e))
}

/// One output row before key columns are prepended
struct Row {
    statistic: String,
    value: String,
    unit: String,
    dataset: String,
    status: &'static str,
    error_kind: String,
    message: String,
}

impl Row {
    fn value(statistic: String, value: f64, unit: &str, dataset: &str) -> Self {
        Row {
            statistic,
            value: value.to_string(),
            unit: unit.to_string(),
            dataset: dataset.to_string(),
            status: "ok",
            error_kind: String::new(),
            message: String::new(),
        }
    }
}

fn rows(entry: &ResultEntry, catalog: &LayerCatalog) -> Vec<Row> {
    let obs = match &entry.outcome {
        Outcome::Computed(obs) => obs,
        Outcome::Missing { kind, message } => {
            return vec![Row {
                statistic: String::new(),
                value: String::new(),
                unit: String::new(),
                dataset: String::new(),
                status: "missing",
                error_kind: kind.to_string(),
                message: message.clone(),
            }];
        }
    };
    let (unit, dataset) = (obs.unit.as_str(), obs.dataset.as_str());

    match &obs.value {
        ObservationValue::Scalar(v) => {
            vec![Row::value(obs.statistic.name().to_string(), *v, unit, dataset)]
        }
        ObservationValue::Histogram(classes) => {
            let spec = catalog.get(&entry.key.layer);
            classes
                .iter()
                .map(|(code, count)| {
                    let statistic = match spec.and_then(|s| s.class_name(*code)) {
                        Some(name) => format!("class:{} {}", code, name),
                        None => format!("class:{}", code),
                    };
                    Row::value(statistic, *count, unit, dataset)
                })
                .collect()
        }
        ObservationValue::Distribution(bins) => bins
            .iter()
            .flat_map(|bin| {
                let range = format!("[{},{})", bin.lower, bin.upper);
                [
                    Row::value(format!("bin:{}", range), bin.cumulative_percent, unit, dataset),
                    Row::value(format!("count:{}", range), bin.count, "pixels", dataset),
                ]
            })
            .collect(),
        ObservationValue::Null => vec![Row {
            statistic: obs.statistic.name().to_string(),
            value: String::new(),
            unit: unit.to_string(),
            dataset: dataset.to_string(),
            status: "empty",
            error_kind: String::new(),
            message: String::new(),
        }],
    }
}

/// Write result tables as one long CSV.
pub fn write_csv<'a, W, I>(writer: W, tables: I, catalog: &LayerCatalog) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a ResultTable>,
{
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(CSV_HEADER).map_err(csv_err)?;
    for table in tables {
        for entry in table.entries() {
            let k = &entry.key;
            for row in rows(entry, catalog) {
                csv.write_record([
                    k.project.as_str(),
                    k.zone.as_str(),
                    k.layer.as_str(),
                    k.period.as_str(),
                    row.statistic.as_str(),
                    row.value.as_str(),
                    row.unit.as_str(),
                    row.dataset.as_str(),
                    row.status,
                    row.error_kind.as_str(),
                    row.message.as_str(),
                ])
                .map_err(csv_err)?;
            }
        }
    }
    csv.flush()?;
    Ok(())
}

/// Write result tables to a CSV file.
pub fn export_csv<'a, I>(path: impl AsRef<Path>, tables: I, catalog: &LayerCatalog) -> Result<()>
where
    I: IntoIterator<Item = &'a ResultTable>,
{
    let file = std::fs::File::create(path.as_ref())?;
    write_csv(std::io::BufWriter::new(file), tables, catalog)?;
    debug!(path = %path.as_ref().display(), "wrote CSV");
    Ok(())
}

/// Batch summary: one row per project.
pub fn export_batch_summary(path: impl AsRef<Path>, report: &BatchReport) -> Result<()> {
    let mut csv = csv::Writer::from_path(path.as_ref()).map_err(csv_err)?;
    csv.write_record(["project", "source", "status", "computed", "missing", "error_kind", "message"])
        .map_err(csv_err)?;
    for project in &report.projects {
        let source = project.source.display().to_string();
        let record = match &project.status {
            ProjectStatus::Complete(run) => [
                project.project.clone(),
                source,
                "complete".to_string(),
                run.table.observations().count().to_string(),
                run.table.missing().count().to_string(),
                String::new(),
                String::new(),
            ],
            ProjectStatus::Failed { kind, message } => [
                project.project.clone(),
                source,
                "failed".to_string(),
                String::new(),
                String::new(),
                kind.to_string(),
                message.clone(),
            ],
        };
        csv.write_record(&record).map_err(csv_err)?;
    }
    csv.flush()?;
    Ok(())
}

fn file_safe(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

pub const DERIVED_HEADER: [&str; 9] = ["project", "zone", "layer", "period", "metric", "class", "label", "value", "unit"];

/// Write derived figures as CSV.
pub fn write_derived_csv<W: Write>(writer: W, rows: &[DerivedRow]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(DERIVED_HEADER).map_err(csv_err)?;
    for row in rows {
        let class = row.class.map(|c| c.to_string()).unwrap_or_default();
        let value = row.value.to_string();
        csv.write_record([
            row.project.as_str(),
            row.zone.as_str(),
            row.layer.as_str(),
            row.period.as_str(),
            row.metric,
            class.as_str(),
            row.label.as_str(),
            value.as_str(),
            row.unit,
        ])
        .map_err(csv_err)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn export_derived(path: impl AsRef<Path>, rows: &[DerivedRow]) -> Result<()> {
    let file = std::fs::File::create(path.as_ref())?;
    write_derived_csv(std::io::BufWriter::new(file), rows)?;
    debug!(path = %path.as_ref().display(), rows = rows.len(), "wrote derived figures");
    Ok(())
}

/// Write each zone window as `{project}_{zone}_{layer}_{period}.tif`.
pub fn export_windows(dir: impl AsRef<Path>, windows: &[ZoneWindow]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir.as_ref())?;
    let mut written = Vec::with_capacity(windows.len());
    for window in windows {
        let k = &window.key;
        let name = format!(
            "{}_{}_{}_{}.tif",
            file_safe(&k.project),
            file_safe(&k.zone),
            file_safe(&k.layer),
            file_safe(&k.period)
        );
        let path = dir.as_ref().join(name);
        write_geotiff(&window.raster, &path)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{Observation, ResultKey, ResultTableBuilder};
    use std::collections::BTreeMap;
    use zonestats_algorithms::statistics::{DistributionBin, ReductionKind};

    fn observation(value: ObservationValue, statistic: ReductionKind) -> Observation {
        Observation {
            value,
            statistic,
            valid_weight: 4.0,
            covered_ha: 1.0,
            dataset: "ds".into(),
            unit: "ha".into(),
        }
    }

    fn export(table: &ResultTable) -> Vec<Vec<String>> {
        let mut buf = Vec::new();
        write_csv(&mut buf, [table], &LayerCatalog::builtin()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        assert_eq!(reader.headers().unwrap().iter().collect::<Vec<_>>(), CSV_HEADER);
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_csv_layout() {
        let keys = [
            ResultKey::new("p", "PA", "GFW_tree_loss", "2015"),
            ResultKey::new("p", "PA", "ESA_WorldCover", "2015"),
            ResultKey::new("p", "AA", "GFW_tree_loss", "2015"),
            ResultKey::new("p", "PA", "NDVI", "2015-JJA"),
        ];
        let builder = ResultTableBuilder::new(keys.clone());
        builder
            .computed(keys[0].clone(), observation(ObservationValue::Scalar(12.5), ReductionKind::Sum))
            .unwrap();
        let classes: BTreeMap<i64, f64> = [(10, 3.0), (255, 1.0)].into_iter().collect();
        builder
            .computed(
                keys[1].clone(),
                observation(ObservationValue::Histogram(classes), ReductionKind::Histogram),
            )
            .unwrap();
        builder
            .computed(keys[2].clone(), observation(ObservationValue::Null, ReductionKind::Sum))
            .unwrap();
        builder
            .missing(
                keys[3].clone(),
                &Error::LayerNotFound {
                    layer: "NDVI".into(),
                    period: "2015-JJA".into(),
                },
            )
            .unwrap();
        let rows = export(&builder.finalize().unwrap());

        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0][4..9], ["sum", "12.5", "ha", "ds", "ok"]);
        assert_eq!(rows[1][4], "class:10 Tree Cover");
        assert_eq!(rows[2][4], "class:255");
        assert_eq!(rows[3][5], "");
        assert_eq!(rows[3][8], "empty");
        assert_eq!(rows[4][3], "2015-JJA");
        assert_eq!(rows[4][8], "missing");
        assert_eq!(rows[4][9], "LayerNotFoundError");
    }

    #[test]
    fn test_distribution_rows() {
        let key = ResultKey::new("p", "PA", "ESA_CCI_AGB", "2018");
        let builder = ResultTableBuilder::new([key.clone()]);
        let bins = vec![
            DistributionBin { lower: 0.0, upper: 10.0, count: 1.0, percent: 25.0, cumulative_percent: 25.0 },
            DistributionBin { lower: 10.0, upper: 20.0, count: 3.0, percent: 75.0, cumulative_percent: 100.0 },
        ];
        let kind = ReductionKind::CumulativeDistribution { min: 0.0, max: 20.0, bins: 2 };
        builder
            .computed(key, observation(ObservationValue::Distribution(bins), kind))
            .unwrap();
        let rows = export(&builder.finalize().unwrap());

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0][4], "bin:[0,10)");
        assert_eq!(rows[0][5], "25");
        assert_eq!(rows[1][4], "count:[0,10)");
        assert_eq!(rows[3][5], "3");
    }

    #[test]
    fn test_derived_csv_layout() {
        let rows = vec![DerivedRow {
            project: "p".into(),
            zone: "PA".into(),
            layer: "GFW_loss_year".into(),
            period: "2012".into(),
            metric: "annual_loss",
            class: Some(12),
            label: String::new(),
            value: 9.0,
            unit: "ha",
        }];
        let mut buf = Vec::new();
        write_derived_csv(&mut buf, &rows).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("project,zone,layer,period,metric,class,label,value,unit"));
        assert_eq!(lines.next(), Some("p,PA,GFW_loss_year,2012,annual_loss,12,,9,ha"));
    }

    #[test]
    fn test_window_file_names() {
        use zonestats_core::{GeoTransform, Raster, CRS};
        let dir = tempfile::tempdir().unwrap();
        let window = ZoneWindow {
            key: ResultKey::new("ACR 1", "AA", "ESA_CCI_AGB", "2018-01-01/2018-06-30"),
            raster: Raster::filled(2, 2, 1.0)
                .with_georef(GeoTransform::new(20.0, 1.0, 0.1, -0.1), CRS::wgs84()),
        };
        let written = export_windows(dir.path(), &[window]).unwrap();
        assert_eq!(
            written[0].file_name().unwrap().to_string_lossy(),
            "ACR_1_AA_ESA_CCI_AGB_2018-01-01_2018-06-30.tif"
        );
        assert!(written[0].is_file());
    }
}
