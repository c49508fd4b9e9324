pub mod fetcher;
pub mod parser;
pub mod storage;
pub mod telegram;

pub use fetcher::ReqwestFetcher;
pub use parser::VendorPageParser;
pub use storage::FsStorage;
pub use telegram::TelegramClient;
