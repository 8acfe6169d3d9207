use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::depth::u64_from_str_or_num;
use crate::types::{parse_levels, DepthGranularity, PriceLevel};

/// Stream envelope: `{"stream":"depth.SOL_USDC","data":{...}}`.
///
/// Subscription acks and errors arrive without `stream`/`data`.
#[derive(Debug, Deserialize)]
pub struct StreamEnvelope {
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Raw depth event payload.
///
/// Field names match the Backpack API:
///   e = event type (`"depth"`)
///   E = event time (microseconds)
///   s = symbol
///   a = ask changes, `[price, quantity]` strings
///   b = bid changes, `[price, quantity]` strings
///   U = first update id in this event
///   u = last update id in this event
///   T = engine time (microseconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthEvent {
    pub e: String,
    #[serde(rename = "E", default)]
    pub event_time: u64,
    pub s: String,
    #[serde(default)]
    pub a: Vec<[String; 2]>,
    #[serde(default)]
    pub b: Vec<[String; 2]>,
    #[serde(rename = "U", deserialize_with = "u64_from_str_or_num")]
    pub first_update_id: u64,
    #[serde(rename = "u", deserialize_with = "u64_from_str_or_num")]
    pub last_update_id: u64,
    #[serde(rename = "T", default)]
    pub engine_time: u64,
}

/// Parsed incremental diff. A quantity of exactly `0.0` removes the level.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthUpdate {
    pub symbol: String,
    pub first_update_id: u64,
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub event_time: u64,
    pub engine_time: u64,
}

impl TryFrom<DepthEvent> for DepthUpdate {
    type Error = crate::error::BackpackError;

    fn try_from(ev: DepthEvent) -> Result<Self> {
        Ok(Self {
            bids: parse_levels(&ev.b)?,
            asks: parse_levels(&ev.a)?,
            symbol: ev.s,
            first_update_id: ev.first_update_id,
            last_update_id: ev.last_update_id,
            event_time: ev.event_time,
            engine_time: ev.engine_time,
        })
    }
}

/// Outbound `SUBSCRIBE` request.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub method: &'static str,
    pub params: Vec<String>,
}

impl SubscribeRequest {
    pub fn depth(symbol: &str, granularity: DepthGranularity) -> Self {
        Self {
            method: "SUBSCRIBE",
            params: vec![granularity.stream_name(symbol)],
        }
    }
}

/// Parse one inbound text frame.
///
/// Returns `Ok(None)` for anything that is not a depth event for `symbol`
/// (acks, other streams, other symbols).
///
/// # Errors
///
/// Returns an error if the frame is not JSON, or if a depth event is
/// missing fields or carries unparseable numbers.
pub fn parse_depth_message(text: &str, symbol: &str) -> Result<Option<DepthUpdate>> {
    let envelope: StreamEnvelope = serde_json::from_str(text)?;
    let (Some(_stream), Some(data)) = (envelope.stream, envelope.data) else {
        return Ok(None);
    };

    if data.get("e").and_then(|e| e.as_str()) != Some("depth") {
        return Ok(None);
    }

    let event: DepthEvent = serde_json::from_value(data)?;
    if event.s != symbol {
        return Ok(None);
    }

    DepthUpdate::try_from(event).map(Some)
}
