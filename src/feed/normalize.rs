use chrono::{DateTime, Utc};
use thiserror::Error;

use super::parser::RawItem;
use crate::storage::NewPost;

/// Shortest trimmed title accepted as a real entry.
pub const MIN_TITLE_CHARS: usize = 3;

/// `pubDate` layout after the weekday prefix, e.g. `02 Jan 2006 15:04:05 -0700`.
const PUB_DATE_FORMAT: &str = "%d %b %Y %H:%M:%S %z";

/// Length of the `"Mon, "` prefix dropped before parsing.
const WEEKDAY_PREFIX_LEN: usize = 5;

/// Why a single item was left out. None of these stop sibling items.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("can't parse publish date {pub_date:?} of {title:?}")]
    DateParse { title: String, pub_date: String },

    #[error("title {0:?} is shorter than {MIN_TITLE_CHARS} characters")]
    TitleTooShort(String),
}

/// Turn one raw item into a storable post.
///
/// The date filter runs first, then the title filter. Title and description
/// have HTML entities decoded; the title is also trimmed.
pub fn normalize_item(raw: &RawItem, feed_id: i64) -> Result<NewPost, SkipReason> {
    let title = html_escape::decode_html_entities(raw.title.trim())
        .trim()
        .to_string();

    let published_at = parse_pub_date(&raw.pub_date).ok_or_else(|| SkipReason::DateParse {
        title: title.clone(),
        pub_date: raw.pub_date.clone(),
    })?;

    if title.chars().count() < MIN_TITLE_CHARS {
        return Err(SkipReason::TitleTooShort(title));
    }

    Ok(NewPost {
        title,
        url: raw.link.trim().to_string(),
        description: html_escape::decode_html_entities(&raw.description).into_owned(),
        published_at,
        feed_id,
    })
}

/// Parse an RSS `pubDate`.
///
/// The usual `"Mon, 02 Jan 2006 15:04:05 -0700"` shape is read by dropping the
/// five-character weekday prefix and parsing the fixed layout. Anything else
/// falls back to RFC 2822, which also covers a missing weekday, two-digit
/// years and named zones such as `GMT`.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    let fixed = raw
        .get(WEEKDAY_PREFIX_LEN..)
        .and_then(|rest| DateTime::parse_from_str(rest, PUB_DATE_FORMAT).ok());

    fixed
        .or_else(|| DateTime::parse_from_rfc2822(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw(title: &str, pub_date: &str) -> RawItem {
        RawItem {
            title: title.to_string(),
            link: " https://example.com/post ".to_string(),
            description: "Fish &amp; chips &lt;3".to_string(),
            pub_date: pub_date.to_string(),
        }
    }

    fn utc(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_normalize_valid_item() {
        let post = normalize_item(&raw("Launch Update", "Mon, 02 Jan 2006 15:04:05 -0700"), 7)
            .unwrap();

        assert_eq!(
            post,
            NewPost {
                title: "Launch Update".to_string(),
                url: "https://example.com/post".to_string(),
                description: "Fish & chips <3".to_string(),
                published_at: utc("2006-01-02T22:04:05Z"),
                feed_id: 7,
            }
        );
    }

    #[test]
    fn test_title_entities_decoded_and_trimmed() {
        let post = normalize_item(&raw("  Q&amp;A time ", "Tue, 10 Jun 2003 04:00:00 +0000"), 1)
            .unwrap();
        assert_eq!(post.title, "Q&A time");
    }

    #[test]
    fn test_short_title_skipped() {
        let result = normalize_item(&raw("Hi", "Tue, 10 Jun 2003 04:00:00 +0000"), 1);
        assert_eq!(result, Err(SkipReason::TitleTooShort("Hi".to_string())));
    }

    #[test]
    fn test_title_length_counts_trimmed_chars() {
        let pub_date = "Tue, 10 Jun 2003 04:00:00 +0000";
        assert!(normalize_item(&raw("  ab  ", pub_date), 1).is_err());
        assert!(normalize_item(&raw("abc", pub_date), 1).is_ok());
        // Multi-byte characters count once each
        assert!(normalize_item(&raw("日本語", pub_date), 1).is_ok());
    }

    #[test]
    fn test_bad_date_skipped_before_title_check() {
        let result = normalize_item(&raw("Hi", "not a date"), 1);
        assert!(matches!(result, Err(SkipReason::DateParse { .. })));
    }

    #[test]
    fn test_parse_pub_date_fixed_layout() {
        assert_eq!(
            parse_pub_date("Mon, 02 Jan 2006 15:04:05 -0700"),
            Some(utc("2006-01-02T22:04:05Z"))
        );
    }

    #[test]
    fn test_parse_pub_date_rfc2822_fallbacks() {
        assert_eq!(
            parse_pub_date("Mon, 02 Jan 2006 15:04:05 GMT"),
            Some(utc("2006-01-02T15:04:05Z"))
        );
        assert_eq!(
            parse_pub_date("02 Jan 2006 15:04:05 +0000"),
            Some(utc("2006-01-02T15:04:05Z"))
        );
    }

    #[test]
    fn test_parse_pub_date_rejects_garbage() {
        assert_eq!(parse_pub_date(""), None);
        assert_eq!(parse_pub_date("Mon,"), None);
        assert_eq!(parse_pub_date("yesterday afternoon"), None);
        assert_eq!(parse_pub_date("2006-01-02T15:04:05Z"), None);
    }

    #[test]
    fn test_parse_pub_date_short_input_does_not_panic() {
        assert_eq!(parse_pub_date("日本"), None);
    }
}
