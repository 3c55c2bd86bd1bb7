//! Input validation shared by the CLI.
//!
//! - **Durations**: `agg` intervals such as `1m30s`
//! - **Feed URLs**: scheme and host checks before a feed is registered

mod duration;
mod url_validator;

pub use duration::{parse_duration, DurationError};
pub use url_validator::{validate_feed_url, UrlValidationError};
