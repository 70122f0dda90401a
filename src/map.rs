use crate::color::{self, DisplayColor};
use crate::config::{AppConfig, StyleConfig, ViewConfig};
use crate::data;
use crate::migration::MigrationSource;
use crate::types::{MigrationCounts, Region};
use anyhow::Result;
use geo::algorithm::bounding_rect::BoundingRect;
use geo::Rect;
use geojson::{Feature, FeatureCollection, JsonObject};
use serde::Serialize;
use tracing::{info, warn};

/// Per-feature style object understood by the map canvas.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureStyle {
    pub weight: f64,
    pub fill_color: String,
    pub fill_opacity: f64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tooltip {
    pub text: String,
    pub permanent: bool,
    pub direction: &'static str,
}

impl Tooltip {
    pub fn for_region(region: &Region) -> Self {
        Self {
            text: region.name.clone(),
            permanent: false,
            direction: "top",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedRegion {
    pub region: Region,
    pub counts: Option<MigrationCounts>,
    pub color: Option<DisplayColor>,
    pub style: FeatureStyle,
    pub tooltip: Tooltip,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl From<Rect<f64>> for Bounds {
    fn from(rect: Rect<f64>) -> Self {
        Self {
            min_lon: rect.min().x,
            min_lat: rect.min().y,
            max_lon: rect.max().x,
            max_lat: rect.max().y,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedMap {
    pub view: ViewConfig,
    pub regions: Vec<RenderedRegion>,
    pub bounds: Option<Bounds>,
}

/// Loads the region geometry and styles every region from the injected
/// migration source. Called once by the host.
pub async fn initialize(config: &AppConfig, source: &dyn MigrationSource) -> Result<RenderedMap> {
    let regions = data::load_regions(&config.input).await?;
    Ok(render_regions(config, regions, source))
}

pub fn render_regions(config: &AppConfig, regions: Vec<Region>, source: &dyn MigrationSource) -> RenderedMap {
    info!("Coloring {} regions...", regions.len());

    let bounds = regions_bounds(&regions);
    let rendered: Vec<RenderedRegion> = regions.into_iter()
        .map(|region| render_region(&config.style, region, source))
        .collect();

    let missing = rendered.iter().filter(|r| r.counts.is_none()).count();
    if missing > 0 {
        warn!("{} regions have no migration data and use the fallback color", missing);
    }

    RenderedMap {
        view: config.view.clone(),
        regions: rendered,
        bounds,
    }
}

fn render_region(style: &StyleConfig, region: Region, source: &dyn MigrationSource) -> RenderedRegion {
    let counts = match source.counts(&region.code) {
        Ok(counts) => Some(counts),
        Err(e) => {
            warn!("{}", e);
            None
        }
    };
    let color = counts.map(color::color_for);

    let style = FeatureStyle {
        weight: style.weight,
        fill_color: color.map(|c| c.to_string()).unwrap_or_else(|| style.fallback_fill_color.clone()),
        fill_opacity: style.fill_opacity,
        color: style.outline_color.clone(),
    };

    RenderedRegion {
        tooltip: Tooltip::for_region(&region),
        region,
        counts,
        color,
        style,
    }
}

fn regions_bounds(regions: &[Region]) -> Option<Bounds> {
    regions.iter()
        .filter_map(|r| r.geometry.bounding_rect())
        .reduce(|a, b| {
            Rect::new(
                geo::Coord { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
                geo::Coord { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
            )
        })
        .map(Bounds::from)
}

impl RenderedMap {
    pub fn find(&self, code: &str) -> Option<&RenderedRegion> {
        self.regions.iter().find(|r| r.region.code == code)
    }

    /// Styled FeatureCollection, one feature per region.
    pub fn to_geojson(&self) -> Result<FeatureCollection> {
        let features = self.regions.iter()
            .map(|r| r.to_feature())
            .collect::<Result<Vec<_>>>()?;

        Ok(FeatureCollection {
            bbox: self.bounds.map(|b| vec![b.min_lon, b.min_lat, b.max_lon, b.max_lat]),
            features,
            foreign_members: None,
        })
    }
}

impl RenderedRegion {
    fn to_feature(&self) -> Result<Feature> {
        let mut properties = JsonObject::new();
        properties.insert("kuntaTunnus".to_string(), self.region.code.clone().into());
        properties.insert("nimi".to_string(), self.region.name.clone().into());
        properties.insert("style".to_string(), serde_json::to_value(&self.style)?);
        properties.insert("tooltip".to_string(), serde_json::to_value(&self.tooltip)?);
        properties.insert("migration".to_string(), serde_json::to_value(self.counts)?);

        Ok(Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&self.region.geometry))),
            id: Some(geojson::feature::Id::String(self.region.code.clone())),
            properties: Some(properties),
            foreign_members: None,
        })
    }
}
