//! Core engine modules - caches, retrieval, playback, workers
//!
//! These modules drive preview playback and frame retrieval, independent of
//! any UI.

pub mod cache_man;
pub mod cancel;
pub mod frame_cache;
pub mod player;
pub mod retriever;
pub mod ticker;
pub mod workers;

pub use cache_man::CacheManager;
pub use cancel::CancelToken;
pub use frame_cache::{BoundedCache, CacheStats};
pub use player::{PlayDirection, Player};
pub use retriever::{Callback, FrameRetriever, ImageResult, RequestId, RetrieverSettings, ThumbKey};
pub use ticker::Ticker;
pub use workers::Workers;
