pub mod citations;
pub mod clock;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod ipc;
pub mod models;
pub mod position;
pub mod providers;
pub mod ranking;
pub mod sentiment;
pub mod sources;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::SightlineConfig;
pub use entities::{find_mentions, EntityMatcher, MentionSpan};
pub use error::SightlineError;
pub use ipc::{SightlineRequest, SightlineResponse};
pub use providers::{
    ProviderAdapter, ProviderError, ProviderOutput, ProviderRegistry, ToolMode,
};
pub use sentiment::{score_sentiment, Lexicon, SentimentScorer};
pub use store::{MemoryStore, PgStore, RunCommit, RunQuery, Store};
