//! Frame decoding for exchange market-data streams.
//!
//! Frames are JSON objects discriminated by `e` (or `eventType`):
//! - `kline`: candle updates for one interval
//! - `24hrTicker`: rolling 24h statistics
//! - `trade`: individual trades
//! - `depthUpdate`: incremental order-book deltas
//!
//! Combined-stream envelopes (`{"stream": .., "data": ..}`) are unwrapped and
//! subscription acknowledgements (`{"result": null, "id": ..}`) are ignored.
//! All prices and quantities arrive as decimal strings and are parsed exactly.

use crate::error::{WsError, WsResult};
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use tickstream_core::{
    Candle, DepthDelta, Interval, KlineEvent, MarketEvent, Price, PriceLevel, Size, Symbol,
    TickerEvent, TradeEvent,
};

/// Decode a text frame.
///
/// Returns `Ok(None)` for control frames that carry no market data, and
/// `Err(WsError::Protocol)` for malformed or unrecognized frames.
pub fn decode(text: &str) -> WsResult<Option<MarketEvent>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| WsError::Protocol(format!("invalid JSON: {e}")))?;

    let mut value = match value {
        Value::Object(map) => map,
        other => {
            return Err(WsError::Protocol(format!(
                "expected object frame, got {}",
                type_name(&other)
            )))
        }
    };

    // Combined-stream envelope
    if value.contains_key("stream") {
        if let Some(Value::Object(inner)) = value.remove("data") {
            value = inner;
        }
    }

    let event_type = match value.get("e").or_else(|| value.get("eventType")) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            return Err(WsError::Protocol(format!(
                "event type must be a string, got {}",
                type_name(other)
            )))
        }
        None if value.contains_key("result") && value.contains_key("id") => return Ok(None),
        None => return Err(WsError::Protocol("missing event type".to_string())),
    };

    let value = Value::Object(value);
    let event = match event_type.as_str() {
        "kline" => MarketEvent::Kline(parse::<RawKlineEvent>(value, "kline")?.into_event()?),
        "24hrTicker" | "ticker" => {
            MarketEvent::Ticker(parse::<RawTickerEvent>(value, "ticker")?.into_event()?)
        }
        "trade" => MarketEvent::Trade(parse::<RawTradeEvent>(value, "trade")?.into_event()?),
        "depthUpdate" => {
            MarketEvent::Depth(parse::<RawDepthEvent>(value, "depthUpdate")?.into_event()?)
        }
        other => {
            return Err(WsError::Protocol(format!(
                "unrecognized event type: {other}"
            )))
        }
    };

    Ok(Some(event))
}

fn parse<T: for<'de> Deserialize<'de>>(value: Value, kind: &str) -> WsResult<T> {
    serde_json::from_value(value).map_err(|e| WsError::Protocol(format!("malformed {kind}: {e}")))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn decimal_field<T: FromStr<Err = rust_decimal::Error>>(field: &str, raw: &str) -> WsResult<T> {
    raw.parse()
        .map_err(|e| WsError::Protocol(format!("invalid decimal in {field}: {raw:?} ({e})")))
}

fn symbol_field(raw: &str) -> WsResult<Symbol> {
    Symbol::new(raw).map_err(|e| WsError::Protocol(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct RawKlineEvent {
    #[serde(rename = "E", alias = "eventTime", default)]
    event_time: i64,
    #[serde(rename = "s", alias = "symbol")]
    symbol: String,
    #[serde(rename = "k", alias = "kline")]
    kline: RawKline,
}

#[derive(Debug, Deserialize)]
struct RawKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x", default)]
    is_closed: bool,
}

impl RawKlineEvent {
    fn into_event(self) -> WsResult<KlineEvent> {
        let k = self.kline;
        let interval = Interval::from_str(&k.interval)
            .map_err(|e| WsError::Protocol(e.to_string()))?;
        let candle = Candle::new(
            Candle::time_from_millis(k.open_time),
            decimal_field::<Price>("k.o", &k.open)?,
            decimal_field::<Price>("k.h", &k.high)?,
            decimal_field::<Price>("k.l", &k.low)?,
            decimal_field::<Price>("k.c", &k.close)?,
            decimal_field::<Size>("k.v", &k.volume)?,
        );

        Ok(KlineEvent {
            symbol: symbol_field(&self.symbol)?,
            interval,
            candle,
            is_closed: k.is_closed,
            event_time: self.event_time,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawTickerEvent {
    #[serde(rename = "E", alias = "eventTime", default)]
    event_time: i64,
    #[serde(rename = "s", alias = "symbol")]
    symbol: String,
    #[serde(rename = "c")]
    last: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "q", default)]
    quote_volume: Option<String>,
    #[serde(rename = "p", default)]
    price_change: Option<String>,
    #[serde(rename = "P", default)]
    price_change_percent: Option<String>,
}

impl RawTickerEvent {
    fn into_event(self) -> WsResult<TickerEvent> {
        let optional = |field: &str, raw: Option<String>| match raw {
            Some(raw) => decimal_field(field, &raw),
            None => Ok(rust_decimal::Decimal::ZERO),
        };

        Ok(TickerEvent {
            symbol: symbol_field(&self.symbol)?,
            last: decimal_field("c", &self.last)?,
            open: decimal_field("o", &self.open)?,
            high: decimal_field("h", &self.high)?,
            low: decimal_field("l", &self.low)?,
            volume: decimal_field("v", &self.volume)?,
            quote_volume: optional("q", self.quote_volume)?,
            price_change: optional("p", self.price_change)?,
            price_change_percent: optional("P", self.price_change_percent)?,
            event_time: self.event_time,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawTradeEvent {
    #[serde(rename = "E", alias = "eventTime", default)]
    event_time: i64,
    #[serde(rename = "s", alias = "symbol")]
    symbol: String,
    #[serde(rename = "t")]
    trade_id: u64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "m", default)]
    is_buyer_maker: bool,
}

impl RawTradeEvent {
    fn into_event(self) -> WsResult<TradeEvent> {
        Ok(TradeEvent {
            symbol: symbol_field(&self.symbol)?,
            trade_id: self.trade_id,
            price: decimal_field("p", &self.price)?,
            quantity: decimal_field("q", &self.quantity)?,
            trade_time: self.trade_time,
            is_buyer_maker: self.is_buyer_maker,
            event_time: self.event_time,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawDepthEvent {
    #[serde(rename = "E", alias = "eventTime", default)]
    event_time: i64,
    #[serde(rename = "s", alias = "symbol")]
    symbol: String,
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(rename = "b", default)]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a", default)]
    asks: Vec<[String; 2]>,
}

impl RawDepthEvent {
    fn into_event(self) -> WsResult<DepthDelta> {
        Ok(DepthDelta {
            symbol: symbol_field(&self.symbol)?,
            first_update_id: self.first_update_id,
            final_update_id: self.final_update_id,
            bids: levels("b", &self.bids)?,
            asks: levels("a", &self.asks)?,
            event_time: self.event_time,
        })
    }
}

fn levels(field: &str, raw: &[[String; 2]]) -> WsResult<Vec<PriceLevel>> {
    raw.iter()
        .map(|[price, quantity]| -> WsResult<PriceLevel> {
            Ok(PriceLevel {
                price: decimal_field(field, price)?,
                quantity: decimal_field(field, quantity)?,
            })
        })
        .collect()
}
