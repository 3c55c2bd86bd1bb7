use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Maximum element nesting accepted in a feed document.
const MAX_XML_DEPTH: usize = 64;

/// Errors that make a feed document unusable as a whole.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not well-formed XML.
    #[error("XML parse error: {0}")]
    Xml(String),

    /// Well-formed XML, but not an RSS document.
    #[error("Document has no <channel> element")]
    MissingChannel,

    /// Element nesting exceeds the safety limit.
    #[error("XML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),
}

/// One `<item>` exactly as it appeared in the document.
///
/// Nothing is validated here; the normalizer decides what to keep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: String,
}

/// A decoded RSS channel with its items in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelDoc {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<RawItem>,
}

#[derive(Clone, Copy)]
enum ChannelField {
    Title,
    Link,
    Description,
}

#[derive(Clone, Copy)]
enum ItemField {
    Title,
    Link,
    Description,
    PubDate,
}

/// Where the text currently being read belongs.
#[derive(Clone, Copy)]
enum Target {
    Channel(ChannelField),
    Item(ItemField),
}

/// Decode an RSS 2.0 document.
///
/// Only unprefixed `title`, `link`, `description` and `pubDate` children of
/// `<channel>` and `<item>` are read, so namespaced siblings such as
/// `<atom:link>` or `<dc:date>` never clobber them. All character data inside
/// a field, including text and CDATA around nested markup, is concatenated and
/// the result trimmed. A self-closing `<item/>` yields an empty item. Channel title and description additionally get HTML entities
/// decoded; item fields are left raw for the normalizer.
///
/// # Errors
///
/// Any XML syntax error (including mismatched end tags) or a document without
/// a `<channel>` element is rejected outright; no partial channel is returned.
pub fn parse_channel(bytes: &[u8]) -> Result<ChannelDoc, ParseError> {
    // quick-xml 0.37 only resolves the five predefined XML entities and never
    // expands DOCTYPE declarations.
    let mut reader = Reader::from_reader(bytes);

    let mut channel: Option<ChannelDoc> = None;
    let mut current_item: Option<RawItem> = None;
    let mut target: Option<Target> = None;
    // Stack depth of the field element `target` points into
    let mut target_depth = 0;
    let mut item_depth = 0;
    // Element names from the root down to the current element
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                let parent = stack.last().map(Vec::as_slice);

                match (parent, name.as_slice()) {
                    (_, b"channel") if channel.is_none() => {
                        channel = Some(ChannelDoc::default());
                    }
                    (Some(b"channel"), b"item") if channel.is_some() => {
                        current_item = Some(RawItem::default());
                        item_depth = stack.len() + 1;
                    }
                    (Some(b"item"), field) if current_item.is_some() => {
                        target = item_field(field).map(Target::Item);
                    }
                    (Some(b"channel"), field) if channel.is_some() => {
                        target = channel_field(field).map(Target::Channel);
                    }
                    _ => {}
                }

                stack.push(name);
                if target.is_some() && target_depth == 0 {
                    target_depth = stack.len();
                }
                if stack.len() > MAX_XML_DEPTH {
                    return Err(ParseError::MaxDepthExceeded(MAX_XML_DEPTH));
                }
            }
            Ok(Event::Empty(e)) => {
                // `<item/>` still counts as an item; the normalizer skips it
                let parent = stack.last().map(Vec::as_slice);
                match (parent, e.name().as_ref()) {
                    (_, b"channel") if channel.is_none() => {
                        channel = Some(ChannelDoc::default());
                    }
                    (Some(b"channel"), b"item") => {
                        if let Some(doc) = channel.as_mut() {
                            doc.items.push(RawItem::default());
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() == target_depth {
                    target = None;
                    target_depth = 0;
                }
                if current_item.is_some() && stack.len() == item_depth {
                    if let (Some(item), Some(doc)) = (current_item.take(), channel.as_mut()) {
                        doc.items.push(item);
                    }
                }
                stack.pop();
            }
            Ok(Event::Text(e)) => {
                if let Some(t) = target {
                    let text = e.unescape().map_err(|e| ParseError::Xml(e.to_string()))?;
                    append(&mut channel, &mut current_item, t, &text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(t) = target {
                    let text = reader
                        .decoder()
                        .decode(&e)
                        .map_err(|e| ParseError::Xml(e.to_string()))?;
                    append(&mut channel, &mut current_item, t, &text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::Xml(format!(
                    "{} (at byte {})",
                    e,
                    reader.error_position()
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(ParseError::Xml("unexpected end of document".to_string()));
    }

    let mut doc = channel.ok_or(ParseError::MissingChannel)?;
    doc.title = html_escape::decode_html_entities(doc.title.trim()).into_owned();
    doc.link = doc.link.trim().to_string();
    doc.description = html_escape::decode_html_entities(doc.description.trim()).into_owned();
    for item in &mut doc.items {
        for field in [
            &mut item.title,
            &mut item.link,
            &mut item.description,
            &mut item.pub_date,
        ] {
            *field = field.trim().to_string();
        }
    }
    Ok(doc)
}

fn channel_field(name: &[u8]) -> Option<ChannelField> {
    match name {
        b"title" => Some(ChannelField::Title),
        b"link" => Some(ChannelField::Link),
        b"description" => Some(ChannelField::Description),
        _ => None,
    }
}

fn item_field(name: &[u8]) -> Option<ItemField> {
    match name {
        b"title" => Some(ItemField::Title),
        b"link" => Some(ItemField::Link),
        b"description" => Some(ItemField::Description),
        b"pubDate" => Some(ItemField::PubDate),
        _ => None,
    }
}

fn append(
    channel: &mut Option<ChannelDoc>,
    item: &mut Option<RawItem>,
    target: Target,
    text: &str,
) {
    let slot = match (target, item.as_mut(), channel.as_mut()) {
        (Target::Item(field), Some(item), _) => match field {
            ItemField::Title => &mut item.title,
            ItemField::Link => &mut item.link,
            ItemField::Description => &mut item.description,
            ItemField::PubDate => &mut item.pub_date,
        },
        (Target::Channel(field), _, Some(doc)) => match field {
            ChannelField::Title => &mut doc.title,
            ChannelField::Link => &mut doc.link,
            ChannelField::Description => &mut doc.description,
        },
        _ => return,
    };
    slot.push_str(text);
}
