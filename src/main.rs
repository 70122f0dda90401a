pub mod types;
pub mod config;
pub mod color;
pub mod data;
pub mod migration;
pub mod map;
pub mod popup;
pub mod render;
pub mod server;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Color the municipalities and write the styled GeoJSON and map tiles
    Generate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Serve the colored map
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print the fill color for a pair of migration counts
    Color {
        positive: u32,
        negative: u32,
    },
}

async fn initialize_or_log(
    app_config: &config::AppConfig,
    source: &dyn migration::MigrationSource,
) -> anyhow::Result<map::RenderedMap> {
    map::initialize(app_config, source).await.inspect_err(|e| {
        error!("Error fetching data: {:#}", e);
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Generate { config } => {
            info!("Generating map with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;
            let source = migration::source_from_config(&app_config.migration)?;

            // 1. Load regions and color them
            let rendered = initialize_or_log(&app_config, source.as_ref()).await?;

            // 2. Write styled GeoJSON
            let out = &app_config.output.geojson;
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
            }
            let collection = rendered.to_geojson()?;
            fs::write(out, serde_json::to_string(&collection)?)
                .with_context(|| format!("Failed to write GeoJSON: {:?}", out))?;
            info!("Wrote {} styled regions to {:?}", collection.features.len(), out);

            // 3. Render tiles
            render::generate_tiles(&app_config, &rendered)?;

            info!("Generation complete!");
        }
        Commands::Serve { config } => {
            info!("Serving map with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;
            let source = migration::source_from_config(&app_config.migration)?;

            let rendered = initialize_or_log(&app_config, source.as_ref()).await?;

            server::start_server(app_config, rendered, source).await?;
        }
        Commands::Color { positive, negative } => {
            println!("{}", color::compute_color(*positive, *negative));
        }
    }

    Ok(())
}
