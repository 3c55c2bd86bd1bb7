//! Feed retrieval and decoding.
//!
//! - [`fetcher`] - one bounded HTTP GET per feed, no retries
//! - [`parser`] - RSS 2.0 channel/item extraction with `quick-xml`
//! - [`normalize`] - per-item date and title filters producing storable posts
//!
//! Each stage is independent of storage; the polling engine in
//! [`crate::sync`] strings them together.

mod fetcher;
mod normalize;
mod parser;

pub use fetcher::{FetchError, FetchFeed, HttpFetcher};
pub use normalize::{normalize_item, parse_pub_date, SkipReason, MIN_TITLE_CHARS};
pub use parser::{parse_channel, ChannelDoc, ParseError, RawItem};
