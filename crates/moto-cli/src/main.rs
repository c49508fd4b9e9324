use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use moto_client::{FsStorage, ReqwestFetcher, TelegramClient, VendorPageParser};
use moto_core::conversation::{parse_price, validate_arrival_date};
use moto_core::models::{ListingFilter, ListingStatus, OperatorId};
use moto_core::retry::RetryingFetcher;
use moto_core::traits::AttributeExtractor;
use moto_core::{
    BotRunner, IngestBot, IngestConfig, ListingAssembler, ListingExtractor, ListingService,
    MediaAcquirer,
};
use moto_db::{Database, DatabaseConfig, ListingRepository};

type VendorFetcher = RetryingFetcher<ReqwestFetcher>;
type VendorExtractor = ListingExtractor<VendorFetcher, VendorPageParser>;
type Assembler = ListingAssembler<VendorExtractor, FsStorage, VendorFetcher, ListingRepository>;

/// Listings imported from the command line are attributed to this operator.
const CLI_OPERATOR: OperatorId = OperatorId(0);

#[derive(Parser)]
#[command(name = "moto", version, about = "Motorcycle catalog ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the operator bot until interrupted
    Bot {
        /// Telegram Bot API token
        #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
        token: String,

        #[command(flatten)]
        storage: StorageArgs,
    },

    /// Extract attributes from a vendor page and print them as JSON
    Parse {
        /// Vendor page URL
        url: String,
    },

    /// Create a draft listing from a vendor page
    Import {
        /// Vendor page URL
        url: String,

        /// Asking price; the draft stays unpublished without it
        #[arg(long, value_parser = parse_price)]
        price: Option<Decimal>,

        /// Arrival date; publishes the listing (requires --price)
        #[arg(long, requires = "price")]
        arrival_date: Option<String>,

        #[command(flatten)]
        storage: StorageArgs,
    },

    /// List catalog entries
    List {
        /// Only listings in this status (draft, available, reserved, sold)
        #[arg(short, long)]
        status: Option<ListingStatus>,

        /// Case-insensitive title substring
        #[arg(short, long)]
        title: Option<String>,

        /// Print JSON instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Change the status of a published listing
    Status {
        id: Uuid,
        status: ListingStatus,
    },

    /// Delete a listing and its photos
    Delete { id: Uuid },
}

#[derive(Args)]
struct StorageArgs {
    /// Directory photos are written to
    #[arg(long, env = "MOTO_STORAGE_DIR")]
    storage_dir: PathBuf,

    /// Public URL the storage directory is served under
    #[arg(long, env = "MOTO_PUBLIC_BASE_URL")]
    public_base_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("moto=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = IngestConfig::from_env().context("Invalid ingest configuration")?;

    match cli.command {
        Commands::Bot { token, storage } => cmd_bot(config, &token, &storage).await?,
        Commands::Parse { url } => cmd_parse(&config, &url).await?,
        Commands::Import {
            url,
            price,
            arrival_date,
            storage,
        } => cmd_import(&config, &url, price, arrival_date.as_deref(), &storage).await?,
        Commands::List {
            status,
            title,
            json,
        } => {
            let service = ListingService::new(connect_db().await?);
            cmd_list(&service, status, title, json).await?;
        }
        Commands::Status { id, status } => {
            let service = ListingService::new(connect_db().await?);
            let listing = service.change_status(id, status).await?;
            println!("{} is now {}", listing.id, listing.status);
        }
        Commands::Delete { id } => {
            let service = ListingService::new(connect_db().await?);
            service.delete(id).await?;
            println!("Deleted {id}");
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using the `DATABASE_*` variables and migrate.
async fn connect_db() -> Result<ListingRepository> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db.listing_repo())
}

fn vendor_fetcher(config: &IngestConfig) -> Result<VendorFetcher> {
    let fetcher = ReqwestFetcher::with_timeouts(config.fetch_timeout, config.image_timeout)
        .context("Failed to create HTTP client")?;
    Ok(RetryingFetcher::new(fetcher, config.retry))
}

fn vendor_extractor(config: &IngestConfig, fetcher: VendorFetcher) -> VendorExtractor {
    ListingExtractor::new(fetcher, VendorPageParser::new(config.vendor_origin.as_str()))
}

async fn build_assembler(config: &IngestConfig, storage: &StorageArgs) -> Result<Assembler> {
    let fetcher = vendor_fetcher(config)?;
    let storage = FsStorage::new(storage.storage_dir.clone(), &storage.public_base_url);
    let repo = connect_db().await?;

    Ok(ListingAssembler::new(
        vendor_extractor(config, fetcher.clone()),
        MediaAcquirer::new(storage, fetcher),
        repo,
        config.currency.as_str(),
    ))
}

async fn cmd_bot(config: IngestConfig, token: &str, storage: &StorageArgs) -> Result<()> {
    if config.admin_ids.is_empty() {
        tracing::warn!("MOTO_ADMIN_IDS is empty; nobody will be able to add listings");
    }

    let assembler = build_assembler(&config, storage).await?;
    let telegram = TelegramClient::new(token)?;
    let bot = IngestBot::new(assembler, telegram.clone(), Arc::new(config));
    let runner = BotRunner::new(bot, telegram);

    let cancel_token = CancellationToken::new();
    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for CTRL+C"),
        }
        shutdown.cancel();
    });

    runner.run(cancel_token).await?;
    Ok(())
}

async fn cmd_parse(config: &IngestConfig, url: &str) -> Result<()> {
    let extractor = vendor_extractor(config, vendor_fetcher(config)?);
    let raw = extractor.extract(url).await?;

    tracing::info!(
        title = %raw.title(),
        images = raw.images.len(),
        "Page parsed"
    );
    println!("{}", serde_json::to_string_pretty(&raw)?);
    Ok(())
}

async fn cmd_import(
    config: &IngestConfig,
    url: &str,
    price: Option<Decimal>,
    arrival_date: Option<&str>,
    storage: &StorageArgs,
) -> Result<()> {
    // Reject a bad arrival date before anything is fetched or stored.
    let arrival_date = arrival_date
        .map(|text| validate_arrival_date(text, config.max_arrival_date_len))
        .transpose()?;

    let assembler = build_assembler(config, storage).await?;
    let mut listing = assembler.create_from_url(CLI_OPERATOR, url).await?;
    let service = assembler.listings();

    if let Some(price) = price {
        listing = service.set_price(listing.id, price).await?;
    }
    if let Some(date) = arrival_date {
        listing = service.publish(listing.id, date).await?;
    }

    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

async fn cmd_list(
    service: &ListingService<ListingRepository>,
    status: Option<ListingStatus>,
    title: Option<String>,
    json: bool,
) -> Result<()> {
    let filter = ListingFilter {
        status,
        title,
        ..Default::default()
    };
    let listings = service.list(filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }
    if listings.is_empty() {
        println!("No listings found");
        return Ok(());
    }

    for listing in &listings {
        println!(
            "{}  {:<9}  {:>12} {}  {} ({} photos)",
            listing.id,
            listing.status.as_str(),
            listing.price,
            listing.currency,
            if listing.title.is_empty() { "<untitled>" } else { listing.title.as_str() },
            listing.photos.len(),
        );
    }
    println!("\nTotal: {} listings", listings.len());
    Ok(())
}
