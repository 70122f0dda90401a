use crate::config::InputConfig;
use crate::types::Region;
use anyhow::{Context, Result, anyhow};
use geo::MultiPolygon;
use geojson::GeoJson;
use shapefile::Reader;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{info, warn};

pub async fn load_regions(input: &InputConfig) -> Result<Vec<Region>> {
    let regions = match &input.geometry_file {
        Some(path) => load_geometry_file(path, input)?,
        None => {
            let geojson = fetch_geojson(&input.geojson_url).await?;
            regions_from_geojson(geojson, input)?
        }
    };

    info!("Loaded geometry for {} regions", regions.len());
    Ok(regions)
}

pub async fn fetch_geojson(url: &str) -> Result<GeoJson> {
    info!("Fetching GeoJSON from {}", url);
    let resp = reqwest::get(url).await
        .with_context(|| format!("Failed to fetch GeoJSON from {}", url))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(anyhow!("GeoJSON request to {} failed with status {}", url, status));
    }

    let body = resp.text().await.context("Failed to read GeoJSON response body")?;
    body.parse::<GeoJson>().context("Failed to parse GeoJSON")
}

fn load_geometry_file(path: &Path, input: &InputConfig) -> Result<Vec<Region>> {
    let extension = path.extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Input geometry file has no extension"))?;

    match extension.as_str() {
        "shp" => load_shapefile(path, input),
        "json" | "geojson" => {
            info!("Loading GeoJSON from {:?}...", path);
            let file = File::open(path)
                .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
            // Loads the whole document into memory.
            let geojson = GeoJson::from_reader(BufReader::new(file)).context("Failed to parse GeoJSON")?;
            regions_from_geojson(geojson, input)
        }
        _ => Err(anyhow!("Unsupported geometry format: {}", extension)),
    }
}

pub fn regions_from_geojson(geojson: GeoJson, input: &InputConfig) -> Result<Vec<Region>> {
    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let mut regions = Vec::new();

    for feature in collection.features {
        let props = feature.properties.as_ref();

        let code = match props.and_then(|p| p.get(&input.code_property)) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                warn!("Skipping feature without '{}' property", input.code_property);
                continue;
            }
        };

        let name = match props.and_then(|p| p.get(&input.name_property)) {
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => code.clone(),
        };

        let geometry = match feature.geometry {
            Some(geom) => {
                let valid_geo: geo::Geometry<f64> = geom.value.try_into()
                    .map_err(|e| anyhow!("Failed to convert geometry of region {}: {:?}", code, e))?;

                match valid_geo {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => {
                        warn!("Skipping region {} with non-areal geometry", code);
                        continue;
                    }
                }
            }
            None => {
                warn!("Skipping region {} without geometry", code);
                continue;
            }
        };

        regions.push(Region { code, name, geometry });
    }

    Ok(regions)
}

fn load_shapefile(path: &Path, input: &InputConfig) -> Result<Vec<Region>> {
    info!("Loading shapefile from {:?}...", path);
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut regions = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let code = match record.get(&input.code_property) {
            Some(value) => match field_to_string(value) {
                Some(code) => code,
                None => continue, // Null code
            },
            None => return Err(anyhow!("Column '{}' not found in Shapefile", input.code_property)),
        };

        let name = record.get(&input.name_property)
            .and_then(field_to_string)
            .unwrap_or_else(|| code.clone());

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?,
            shapefile::Shape::PolygonM(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?,
            _ => continue,
        };

        regions.push(Region { code, name, geometry });
    }

    Ok(regions)
}

fn field_to_string(value: &shapefile::dbase::FieldValue) -> Option<String> {
    use shapefile::dbase::FieldValue;

    match value {
        FieldValue::Character(s) => s.as_ref().map(|s| s.trim().to_string()),
        FieldValue::Numeric(n) => n.map(|n| n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};

    const FEATURES: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "kuntaTunnus": "091", "nimi": "Helsinki" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[24.8, 60.1], [25.2, 60.1], [25.2, 60.3], [24.8, 60.3], [24.8, 60.1]]]
                }
            },
            {
                "type": "Feature",
                "properties": { "kuntaTunnus": 837, "nimi": "Tampere" },
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [
                        [[[23.5, 61.4], [24.0, 61.4], [24.0, 61.7], [23.5, 61.7], [23.5, 61.4]]],
                        [[[24.1, 61.4], [24.2, 61.4], [24.2, 61.5], [24.1, 61.4]]]
                    ]
                }
            },
            {
                "type": "Feature",
                "properties": { "nimi": "No code" },
                "geometry": { "type": "Point", "coordinates": [25.0, 65.0] }
            },
            {
                "type": "Feature",
                "properties": { "kuntaTunnus": "999", "nimi": "Pointland" },
                "geometry": { "type": "Point", "coordinates": [25.0, 65.0] }
            },
            {
                "type": "Feature",
                "properties": { "kuntaTunnus": "998" },
                "geometry": null
            }
        ]
    }"#;

    fn parse(input: &InputConfig) -> Vec<Region> {
        regions_from_geojson(FEATURES.parse().unwrap(), input).unwrap()
    }

    #[test]
    fn test_regions_from_geojson() {
        let regions = parse(&InputConfig::default());
        assert_eq!(regions.len(), 2);

        assert_eq!(regions[0].code, "091");
        assert_eq!(regions[0].name, "Helsinki");
        assert_eq!(regions[0].geometry.0.len(), 1);

        assert_eq!(regions[1].code, "837");
        assert_eq!(regions[1].name, "Tampere");
        assert_eq!(regions[1].geometry.0.len(), 2);
    }

    #[test]
    fn test_custom_property_names() {
        let input = InputConfig {
            code_property: "nimi".to_string(),
            name_property: "missing".to_string(),
            ..InputConfig::default()
        };
        let regions = parse(&input);
        // Name falls back to the code when the name property is absent.
        assert_eq!(regions[0].code, "Helsinki");
        assert_eq!(regions[0].name, "Helsinki");
    }

    #[test]
    fn test_rejects_non_collection() {
        let geojson: GeoJson = r#"{ "type": "Point", "coordinates": [25.0, 65.0] }"#.parse().unwrap();
        assert!(regions_from_geojson(geojson, &InputConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_load_regions_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kunnat.geojson");
        std::fs::write(&path, FEATURES).unwrap();

        let input = InputConfig { geometry_file: Some(path), ..InputConfig::default() };
        let regions = load_regions(&input).await.unwrap();
        assert_eq!(regions.len(), 2);

        let input = InputConfig { geometry_file: Some(dir.path().join("kunnat.kml")), ..InputConfig::default() };
        assert!(load_regions(&input).await.is_err());
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_fetch_regions_over_http() {
        let base = serve(Router::new().route("/wfs", get(|| async { FEATURES }))).await;
        let input = InputConfig { geojson_url: format!("{}/wfs", base), ..InputConfig::default() };

        let regions = load_regions(&input).await.unwrap();
        assert_eq!(regions.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let base = serve(Router::new().route("/wfs", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))).await;
        let err = fetch_geojson(&format!("{}/wfs", base)).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_fetch_malformed_body() {
        let base = serve(Router::new().route("/wfs", get(|| async { "<html>maintenance</html>" }))).await;
        assert!(fetch_geojson(&format!("{}/wfs", base)).await.is_err());
    }
}
