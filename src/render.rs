use crate::color::hex_to_rgba;
use crate::config::AppConfig;
use crate::map::{Bounds, RenderedMap};
use anyhow::{Context, Result, anyhow};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::{MultiPolygon, Point};
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{error, info};

// Constants for Web Mercator
const TILE_SIZE: u32 = 256;
const MAX_LATITUDE: f64 = 85.051_128_78;

struct FillArea<'a> {
    geometry: &'a MultiPolygon<f64>,
    color: Rgba<u8>,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for FillArea<'_> {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Writes `{tile_dir}/{z}/{x}/{y}.png` for every tile that covers at least
/// one region. Returns the number of tiles written.
pub fn generate_tiles(config: &AppConfig, map: &RenderedMap) -> Result<usize> {
    let bounds = match map.bounds {
        Some(b) => b,
        None => {
            info!("No regions to render");
            return Ok(0);
        }
    };

    info!("Generating tiles from min_zoom {} to max_zoom {}...", config.output.min_zoom, config.output.max_zoom);

    let opacity = config.style.fill_opacity;
    let fallback = hex_to_rgba(&config.style.fallback_fill_color, opacity)
        .ok_or_else(|| anyhow!("Fallback fill color '{}' is not a #rrggbb color", config.style.fallback_fill_color))?;

    let areas: Vec<FillArea> = map.regions.iter().filter_map(|r| {
        let rect = r.region.geometry.bounding_rect()?;
        let color = match r.color {
            Some(c) => c.to_rgba(opacity),
            None => fallback,
        };
        Some(FillArea {
            geometry: &r.region.geometry,
            color,
            aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
        })
    }).collect();
    let tree = RTree::bulk_load(areas);

    let written = AtomicUsize::new(0);

    (config.output.min_zoom..=config.output.max_zoom).into_par_iter().try_for_each(|z| {
        let count = render_zoom_level(&config.output.tile_dir, z, &bounds, &tree)?;
        written.fetch_add(count, Ordering::Relaxed);
        Ok::<(), anyhow::Error>(())
    })?;

    let written = written.into_inner();
    info!("Wrote {} tiles", written);
    Ok(written)
}

fn render_zoom_level(tile_dir: &Path, zoom: u8, bounds: &Bounds, tree: &RTree<FillArea>) -> Result<usize> {
    let (min_x, min_y, _, _) = lat_lon_to_tile_pixel(bounds.max_lat, bounds.min_lon, zoom);
    let (max_x, max_y, _, _) = lat_lon_to_tile_pixel(bounds.min_lat, bounds.max_lon, zoom);

    let tiles: Vec<(u32, u32)> = (min_x..=max_x)
        .flat_map(|x| (min_y..=max_y).map(move |y| (x, y)))
        .collect();

    let z_dir = tile_dir.join(zoom.to_string());
    fs::create_dir_all(&z_dir).context("Failed to create zoom directory")?;

    let written = tiles.par_iter().filter(|&&(x, y)| {
        let img = match render_tile(zoom, x, y, tree) {
            Some(img) => img,
            None => return false,
        };

        let x_dir = z_dir.join(x.to_string());
        if let Err(e) = fs::create_dir_all(&x_dir) {
            error!("Failed to create tile directory {:?}: {:?}", x_dir, e);
            return false;
        }
        let path = x_dir.join(format!("{}.png", y));

        match img.save(&path) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save tile {:?}: {:?}", path, e);
                false
            }
        }
    }).count();

    Ok(written)
}

/// Paints every pixel whose center lies inside a region. `None` when the
/// tile stays empty.
fn render_tile(zoom: u8, x: u32, y: u32, tree: &RTree<FillArea>) -> Option<RgbaImage> {
    let (north, west) = tile_pixel_to_lat_lon(zoom, x, y, 0.0, 0.0);
    let (south, east) = tile_pixel_to_lat_lon(zoom, x, y, TILE_SIZE as f64, TILE_SIZE as f64);
    let tile_aabb = AABB::from_corners([west, south], [east, north]);

    let candidates: Vec<&FillArea> = tree.locate_in_envelope_intersecting(&tile_aabb).collect();
    if candidates.is_empty() {
        return None;
    }

    let mut img: RgbaImage = ImageBuffer::new(TILE_SIZE, TILE_SIZE);
    let mut painted = false;

    for py in 0..TILE_SIZE {
        for px in 0..TILE_SIZE {
            let (lat, lon) = tile_pixel_to_lat_lon(zoom, x, y, px as f64 + 0.5, py as f64 + 0.5);
            let pt = Point::new(lon, lat);

            let hit = candidates.iter().find(|area| {
                let env = area.aabb;
                lon >= env.lower()[0] && lon <= env.upper()[0]
                    && lat >= env.lower()[1] && lat <= env.upper()[1]
                    && area.geometry.contains(&pt)
            });

            if let Some(area) = hit {
                img.put_pixel(px, py, area.color);
                painted = true;
            }
        }
    }

    painted.then_some(img)
}

// Coordinate conversions
fn lat_lon_to_tile_pixel(lat: f64, lon: f64, zoom: u8) -> (u32, u32, u32, u32) {
    let n = 2.0_f64.powi(zoom as i32);
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x_t = ((lon + 180.0) / 360.0 * n).clamp(0.0, n - 1e-9);
    let lat_rad = lat.to_radians();
    let y_t = ((1.0 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / PI) / 2.0 * n).clamp(0.0, n - 1e-9);

    let tx = x_t as u32;
    let ty = y_t as u32;

    let px = ((x_t - tx as f64) * TILE_SIZE as f64) as u32;
    let py = ((y_t - ty as f64) * TILE_SIZE as f64) as u32;

    (tx, ty, px, py)
}

fn tile_pixel_to_lat_lon(zoom: u8, tx: u32, ty: u32, px: f64, py: f64) -> (f64, f64) {
    let n = 2.0_f64.powi(zoom as i32);
    let x_t = tx as f64 + px / TILE_SIZE as f64;
    let y_t = ty as f64 + py / TILE_SIZE as f64;

    let lon = x_t / n * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y_t / n)).sinh().atan().to_degrees();
    (lat, lon)
}
