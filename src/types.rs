use geo::MultiPolygon;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct Region {
    pub code: String, // kuntaTunnus
    pub name: String, // nimi
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MigrationCounts {
    pub positive: u32,
    pub negative: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Positive,
    Negative,
}
