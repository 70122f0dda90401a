use crate::config::{AppConfig, ViewConfig};
use crate::map::{Bounds, RenderedMap};
use crate::migration::MigrationSource;
use crate::popup::{self, RequestToken, RequestTokens};
use crate::types::MigrationCounts;
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::Point;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

// Wrapper for RTree indexing
pub struct RegionIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for RegionIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

pub struct AppState {
    pub map: RenderedMap,
    pub tree: RTree<RegionIndex>,
    pub geojson: serde_json::Value,
    pub source: Arc<dyn MigrationSource>,
    pub tokens: Arc<RequestTokens>,
}

impl AppState {
    pub fn new(map: RenderedMap, source: Arc<dyn MigrationSource>, tokens: Arc<RequestTokens>) -> Result<Self> {
        info!("Building spatial index for API...");
        let tree_items: Vec<RegionIndex> = map.regions.iter().enumerate().filter_map(|(i, r)| {
            let rect = r.region.geometry.bounding_rect()?;
            Some(RegionIndex {
                index: i,
                aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
            })
        }).collect();
        let tree = RTree::bulk_load(tree_items);

        let geojson = serde_json::to_value(map.to_geojson()?)?;

        Ok(Self { map, tree, geojson, source, tokens })
    }
}

#[derive(Deserialize)]
pub struct QueryParams {
    lat: f64,
    lon: f64,
}

#[derive(Serialize)]
pub struct QueryResponse {
    code: String,
    name: String,
    migration: Option<MigrationCounts>,
    fill_color: String,
}

#[derive(Serialize)]
pub struct PopupResponse {
    token: RequestToken,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    superseded: bool,
}

pub fn router(config: &AppConfig, state: Arc<AppState>) -> Router {
    let tile_service = ServeDir::new(&config.output.tile_dir);

    Router::new()
        .route("/api/regions", get(regions_handler))
        .route("/api/regions/:code/popup", get(popup_handler))
        .route("/api/bounds", get(bounds_handler))
        .route("/api/view", get(view_handler))
        .route("/api/query", get(query_handler))
        .nest_service("/tiles", tile_service)
        .fallback_service(ServeDir::new(&config.server.static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig, map: RenderedMap, source: Arc<dyn MigrationSource>) -> Result<()> {
    let state = Arc::new(AppState::new(map, source, Arc::new(RequestTokens::new()))?);
    info!("Spatial index built for {} regions.", state.tree.size());

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    info!("Starting server on http://{}", addr);

    let app = router(&config, state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn regions_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.geojson.clone())
}

async fn bounds_handler(State(state): State<Arc<AppState>>) -> Json<Option<Bounds>> {
    Json(state.map.bounds)
}

#[derive(Serialize)]
struct ViewResponse {
    center: [f64; 2],
    zoom: u8,
}

async fn view_handler(State(state): State<Arc<AppState>>) -> Json<ViewResponse> {
    let ViewConfig { center, zoom } = state.map.view.clone();
    Json(ViewResponse { center, zoom })
}

async fn popup_handler(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<PopupResponse>, StatusCode> {
    let rendered = state.map.find(&code).ok_or(StatusCode::NOT_FOUND)?;
    let token = state.tokens.issue(&code);

    // Counts are fetched fresh on every click.
    let source = Arc::clone(&state.source);
    let lookup = code.clone();
    let counts = tokio::task::spawn_blocking(move || source.counts(&lookup))
        .await
        .map_err(|e| {
            error!("Migration lookup for {} panicked: {:?}", code, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            warn!("{}", e);
            StatusCode::NOT_FOUND
        })?;

    if !state.tokens.is_current(&token) {
        return Ok(Json(PopupResponse { token, content: None, superseded: true }));
    }

    Ok(Json(PopupResponse {
        content: Some(popup::popup_content(&rendered.region, counts)),
        token,
        superseded: false,
    }))
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Json<Option<QueryResponse>> {
    let point = Point::new(params.lon, params.lat);
    let envelope = AABB::from_point([params.lon, params.lat]);

    // Query RTree
    let candidates = state.tree.locate_in_envelope_intersecting(&envelope);

    for candidate in candidates {
        if let Some(r) = state.map.regions.get(candidate.index) {
            if r.region.geometry.contains(&point) {
                return Json(Some(QueryResponse {
                    code: r.region.code.clone(),
                    name: r.region.name.clone(),
                    migration: r.counts,
                    fill_color: r.style.fill_color.clone(),
                }));
            }
        }
    }

    Json(None)
}
