//! Page rendering, raw page archive and posting persistence for vagas.

pub mod archive;
pub mod fixture;
pub mod postings;
pub mod render;

pub use archive::{ArchivedPage, PageArchive};
pub use fixture::FixturePageRenderer;
pub use postings::{MemoryPostingStore, PersistenceError, PgPostingStore, PostingStore, UpsertReport};
pub use render::{FetchError, FetchOptions, HttpClientConfig, HttpPageRenderer, PageRenderer, RetryPolicy};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
