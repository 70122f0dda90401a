use crate::config::MigrationConfig;
use crate::types::{Direction, MigrationCounts};
use anyhow::{Context, Result, anyhow};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::fs::File;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("no migration data for region '{0}'")]
    UnknownRegion(String),
}

pub trait MigrationSource: Send + Sync {
    fn migration_count(&self, region_code: &str, direction: Direction) -> Result<u32, MigrationError>;

    fn counts(&self, region_code: &str) -> Result<MigrationCounts, MigrationError> {
        Ok(MigrationCounts {
            positive: self.migration_count(region_code, Direction::Positive)?,
            negative: self.migration_count(region_code, Direction::Negative)?,
        })
    }
}

/// Answers the same counts for every region.
#[derive(Debug, Clone, Copy)]
pub struct StubMigrationSource {
    counts: MigrationCounts,
}

impl StubMigrationSource {
    pub fn new(positive: u32, negative: u32) -> Self {
        Self { counts: MigrationCounts { positive, negative } }
    }
}

impl Default for StubMigrationSource {
    fn default() -> Self {
        Self::new(100, 50)
    }
}

impl MigrationSource for StubMigrationSource {
    fn migration_count(&self, _region_code: &str, direction: Direction) -> Result<u32, MigrationError> {
        Ok(match direction {
            Direction::Positive => self.counts.positive,
            Direction::Negative => self.counts.negative,
        })
    }
}

/// Per-region counts read from a CSV table.
#[derive(Debug, Clone, Default)]
pub struct TableMigrationSource {
    counts: HashMap<String, MigrationCounts>,
}

impl TableMigrationSource {
    pub fn from_path(path: &Path, code_column: &str, positive_column: &str, negative_column: &str) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open migration CSV: {:?}", path))?;
        let source = Self::from_reader(file, code_column, positive_column, negative_column)
            .with_context(|| format!("Failed to load migration CSV: {:?}", path))?;
        info!("Loaded migration counts for {} regions", source.len());
        Ok(source)
    }

    pub fn from_reader<R: Read>(reader: R, code_column: &str, positive_column: &str, negative_column: &str) -> Result<Self> {
        let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = rdr.headers()?.clone();

        let column = |name: &str| {
            headers.iter().position(|h| h == name)
                .ok_or_else(|| anyhow!("Column '{}' not found in migration CSV", name))
        };
        let code_idx = column(code_column)?;
        let positive_idx = column(positive_column)?;
        let negative_idx = column(negative_column)?;

        let mut counts = HashMap::new();

        for (row, result) in rdr.records().enumerate() {
            let record = result?;
            let code = record.get(code_idx).unwrap_or("");
            if code.is_empty() { continue; }

            let parse = |idx: usize, name: &str| -> Result<u32> {
                let raw = record.get(idx).unwrap_or("");
                raw.parse::<u32>().with_context(|| format!("Invalid {} value '{}' on row {}", name, raw, row + 1))
            };

            counts.insert(code.to_string(), MigrationCounts {
                positive: parse(positive_idx, positive_column)?,
                negative: parse(negative_idx, negative_column)?,
            });
        }

        Ok(Self { counts })
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl MigrationSource for TableMigrationSource {
    fn migration_count(&self, region_code: &str, direction: Direction) -> Result<u32, MigrationError> {
        self.counts(region_code).map(|c| match direction {
            Direction::Positive => c.positive,
            Direction::Negative => c.negative,
        })
    }

    fn counts(&self, region_code: &str) -> Result<MigrationCounts, MigrationError> {
        self.counts.get(region_code)
            .copied()
            .ok_or_else(|| MigrationError::UnknownRegion(region_code.to_string()))
    }
}

pub fn source_from_config(config: &MigrationConfig) -> Result<Arc<dyn MigrationSource>> {
    let source: Arc<dyn MigrationSource> = match config {
        MigrationConfig::Stub { positive, negative } => {
            info!("Using stub migration counts ({} in / {} out)", positive, negative);
            Arc::new(StubMigrationSource::new(*positive, *negative))
        }
        MigrationConfig::Table { path, code_column, positive_column, negative_column } => {
            Arc::new(TableMigrationSource::from_path(path, code_column, positive_column, negative_column)?)
        }
    };
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
kunta,nimi,tulomuutto,lahtomuutto
091,Helsinki,12000,9000
049, Espoo ,5000,5100
,Tyhjä,1,1
";

    fn table() -> TableMigrationSource {
        TableMigrationSource::from_reader(CSV.as_bytes(), "kunta", "tulomuutto", "lahtomuutto").unwrap()
    }

    #[test]
    fn test_stub_ignores_region() {
        let source = StubMigrationSource::default();
        assert_eq!(source.migration_count("091", Direction::Positive), Ok(100));
        assert_eq!(source.migration_count("does-not-exist", Direction::Negative), Ok(50));
        assert_eq!(source.counts("049"), Ok(MigrationCounts { positive: 100, negative: 50 }));
    }

    #[test]
    fn test_table_lookup() {
        let source = table();
        assert_eq!(source.len(), 2);
        assert_eq!(source.counts("091"), Ok(MigrationCounts { positive: 12000, negative: 9000 }));
        assert_eq!(source.migration_count("049", Direction::Negative), Ok(5100));
    }

    #[test]
    fn test_table_unknown_region() {
        assert_eq!(
            table().migration_count("999", Direction::Positive),
            Err(MigrationError::UnknownRegion("999".to_string()))
        );
    }

    #[test]
    fn test_table_missing_column() {
        let err = TableMigrationSource::from_reader(CSV.as_bytes(), "kunta", "in", "lahtomuutto").unwrap_err();
        assert!(err.to_string().contains("'in'"));
    }

    #[test]
    fn test_table_invalid_count() {
        let csv = "kunta,in,out\n091,lots,3\n";
        assert!(TableMigrationSource::from_reader(csv.as_bytes(), "kunta", "in", "out").is_err());
    }

    #[test]
    fn test_source_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migration.csv");
        std::fs::write(&path, CSV).unwrap();

        let source = source_from_config(&MigrationConfig::Table {
            path,
            code_column: "kunta".to_string(),
            positive_column: "tulomuutto".to_string(),
            negative_column: "lahtomuutto".to_string(),
        }).unwrap();
        assert_eq!(source.migration_count("091", Direction::Positive), Ok(12000));

        let stub = source_from_config(&MigrationConfig::Stub { positive: 1, negative: 2 }).unwrap();
        assert_eq!(stub.counts("x"), Ok(MigrationCounts { positive: 1, negative: 2 }));
    }
}
