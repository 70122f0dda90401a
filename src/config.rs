use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{Context, Result, anyhow};

pub const DEFAULT_GEOJSON_URL: &str = "https://geo.stat.fi/geoserver/wfs?service=WFS&version=2.0.0&request=GetFeature&typeName=tilastointialueet:kunta4500k&outputFormat=json&srsName=EPSG:4326";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub style: StyleConfig,
    #[serde(default)]
    pub view: ViewConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InputConfig {
    pub geojson_url: String,
    pub geometry_file: Option<PathBuf>, // Takes precedence over the URL
    pub code_property: String,
    pub name_property: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            geojson_url: DEFAULT_GEOJSON_URL.to_string(),
            geometry_file: None,
            code_property: "kuntaTunnus".to_string(),
            name_property: "nimi".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MigrationConfig {
    Stub {
        #[serde(default = "default_stub_positive")]
        positive: u32,
        #[serde(default = "default_stub_negative")]
        negative: u32,
    },
    Table {
        path: PathBuf,
        code_column: String,
        positive_column: String,
        negative_column: String,
    },
}

fn default_stub_positive() -> u32 { 100 }
fn default_stub_negative() -> u32 { 50 }

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig::Stub {
            positive: default_stub_positive(),
            negative: default_stub_negative(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StyleConfig {
    pub weight: f64,
    pub fill_opacity: f64,
    pub outline_color: String,
    pub fallback_fill_color: String, // Used when a region has no migration data
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            weight: 2.0,
            fill_opacity: 0.7,
            outline_color: "black".to_string(),
            fallback_fill_color: "#808080".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ViewConfig {
    pub center: [f64; 2], // [lat, lon]
    pub zoom: u8,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self { center: [65.0, 25.0], zoom: 5 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub geojson: PathBuf,
    pub tile_dir: PathBuf,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            geojson: PathBuf::from("output/regions.geojson"),
            tile_dir: PathBuf::from("output/tiles"),
            min_zoom: 5,
            max_zoom: 8,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000, static_dir: PathBuf::from(".") }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Tiles are painted with this color too, so it has to be plain hex.
        if crate::color::hex_to_rgba(&self.style.fallback_fill_color, 1.0).is_none() {
            return Err(anyhow!(
                "style.fallback_fill_color must be a #rrggbb color, got '{}'",
                self.style.fallback_fill_color
            ));
        }
        Ok(())
    }
}
