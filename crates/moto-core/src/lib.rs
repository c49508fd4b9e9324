pub mod assemble;
pub mod bot;
pub mod config;
pub mod conversation;
pub mod error;
pub mod extract;
pub mod listing;
pub mod media;
pub mod models;
pub mod retry;
pub mod runner;
pub mod testutil;
pub mod traits;

pub use assemble::ListingAssembler;
pub use bot::IngestBot;
pub use config::IngestConfig;
pub use conversation::{ConversationMachine, InputError, PendingField, Turn};
pub use error::{AppError, Stage};
pub use extract::ListingExtractor;
pub use listing::ListingService;
pub use media::MediaAcquirer;
pub use models::{Listing, ListingStatus, RawExtraction};
pub use runner::BotRunner;
pub use traits::{AttributeExtractor, Fetcher, ListingStore, ObjectStorage, PageParser};
