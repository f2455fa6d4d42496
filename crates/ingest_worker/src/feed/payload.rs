use common::domain::{FetchError, FetchResult, RawEvent, RawItem};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Top-level shapes the feed has been observed to return
#[derive(Deserialize)]
#[serde(untagged)]
enum FeedPayload {
    Wrapped { events: Vec<Value> },
    Bare(Vec<Value>),
}

/// Decode a feed response body into a uniform list of envelopes.
///
/// Only the page shape can fail the whole body. Entries and items are decoded
/// one at a time, and one that does not decode is kept as an undecodable
/// record so the normalizer can reject it without dropping its siblings.
pub fn parse_feed_payload(body: &[u8]) -> FetchResult<Vec<RawEvent>> {
    let payload: FeedPayload =
        serde_json::from_slice(body).map_err(|e| FetchError::MalformedBody(e.to_string()))?;

    let entries = match payload {
        FeedPayload::Wrapped { events } => events,
        FeedPayload::Bare(entries) => entries,
    };

    Ok(entries.into_iter().map(decode_entry).collect())
}

/// An entry carrying an `items` key is an envelope, anything else a single flat item
fn decode_entry(entry: Value) -> RawEvent {
    match entry {
        Value::Object(mut fields) => match fields.remove("items") {
            Some(items) => decode_envelope(&fields, items),
            None => match serde_json::from_value::<RawItem>(Value::Object(fields)) {
                Ok(item) => RawEvent::single(item),
                Err(e) => RawEvent::undecodable(e.to_string()),
            },
        },
        other => RawEvent::undecodable(format!("feed entry is not an object: {other}")),
    }
}

fn decode_envelope(fields: &Map<String, Value>, items: Value) -> RawEvent {
    let mut event = RawEvent {
        event_type: fields
            .get("event_type")
            .and_then(Value::as_str)
            .map(str::to_string),
        ..Default::default()
    };

    let Value::Array(items) = items else {
        event
            .undecodable
            .push(format!("envelope items is not a list: {items}"));
        return event;
    };

    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<RawItem>(item) {
            Ok(item) => event.items.push(item),
            Err(e) => event.undecodable.push(format!("item {index}: {e}")),
        }
    }

    event
}
