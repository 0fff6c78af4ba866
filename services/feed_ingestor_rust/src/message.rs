//! Binance futures combined-stream frames.
//!
//! Market data arrives wrapped as
//! `{"stream":"btcusdt@markPrice","data":{"e":"markPriceUpdate","s":"BTCUSDT","p":"50000.00",...}}`.
//! Replies to our own SUBSCRIBE requests come back as `{"result":null,"id":1}`.

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

const MARK_PRICE_EVENT: &str = "markPriceUpdate";
const QUOTE_ASSETS: &[&str] = &["USDT", "USDC", "BUSD", "USD"];

#[derive(Debug, Clone, PartialEq)]
pub struct MarkPrice {
    /// Exchange symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    pub price: f64,
    pub event_time: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedFrame {
    MarkPrice(MarkPrice),
    /// Reply to a SUBSCRIBE request.
    SubscriptionAck { id: u64 },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unrecognised frame")]
    Unrecognised,
    #[error("unexpected event type {0:?}")]
    UnexpectedEvent(String),
    #[error("invalid mark price {0:?}")]
    InvalidPrice(String),
    #[error("upstream error {code}: {msg}")]
    Upstream { code: i64, msg: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFrame {
    Stream {
        #[allow(dead_code)]
        stream: String,
        data: Value,
    },
    Error {
        error: UpstreamError,
    },
    Reply {
        #[allow(dead_code)]
        result: Option<Value>,
        id: u64,
    },
}

#[derive(Deserialize)]
struct UpstreamError {
    code: i64,
    msg: String,
}

#[derive(Deserialize)]
struct MarkPriceData {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "E", default)]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    mark_price: String,
}

pub fn parse_frame(text: &str) -> Result<FeedFrame, FrameError> {
    match serde_json::from_str::<RawFrame>(text)? {
        RawFrame::Stream { data, .. } => {
            let data: MarkPriceData = serde_json::from_value(data)?;
            if data.event_type != MARK_PRICE_EVENT {
                return Err(FrameError::UnexpectedEvent(data.event_type));
            }
            let price: f64 = data
                .mark_price
                .parse()
                .map_err(|_| FrameError::InvalidPrice(data.mark_price.clone()))?;
            if !price.is_finite() || price <= 0.0 {
                return Err(FrameError::InvalidPrice(data.mark_price));
            }
            Ok(FeedFrame::MarkPrice(MarkPrice {
                symbol: data.symbol,
                price,
                event_time: data.event_time,
            }))
        }
        RawFrame::Reply { id, .. } => Ok(FeedFrame::SubscriptionAck { id }),
        RawFrame::Error { error } => Err(FrameError::Upstream {
            code: error.code,
            msg: error.msg,
        }),
    }
}

/// `BTCUSDT` -> `BTC`. Symbols without a known quote suffix pass through.
pub fn base_asset(exchange_symbol: &str) -> String {
    let upper = exchange_symbol.to_uppercase();
    for quote in QUOTE_ASSETS {
        if let Some(base) = upper.strip_suffix(quote) {
            if !base.is_empty() {
                return base.to_string();
            }
        }
    }
    upper
}

/// SUBSCRIBE request for the mark-price stream of each symbol.
pub fn subscribe_request(symbols: &[String], id: u64) -> String {
    let params: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@markPrice", s.to_lowercase()))
        .collect();
    json!({ "method": "SUBSCRIBE", "params": params, "id": id }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARK_PRICE_FRAME: &str = r#"{"stream":"btcusdt@markPrice","data":{"e":"markPriceUpdate","E":1700000000000,"s":"BTCUSDT","p":"50000.00","i":"49990.1","P":"50010.0","r":"0.0001","T":1700000800000}}"#;

    #[test]
    fn test_parse_mark_price() {
        let frame = parse_frame(MARK_PRICE_FRAME).unwrap();
        assert_eq!(
            frame,
            FeedFrame::MarkPrice(MarkPrice {
                symbol: "BTCUSDT".to_string(),
                price: 50000.0,
                event_time: 1700000000000,
            })
        );
    }

    #[test]
    fn test_parse_subscription_ack() {
        assert_eq!(
            parse_frame(r#"{"result":null,"id":7}"#).unwrap(),
            FeedFrame::SubscriptionAck { id: 7 }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_frame("not json"), Err(FrameError::Json(_))));
        assert!(parse_frame(r#"{"foo":1}"#).is_err());
        assert!(matches!(
            parse_frame(r#"{"error":{"code":2,"msg":"Invalid request"},"id":1}"#),
            Err(FrameError::Upstream { code: 2, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_prices() {
        let bad = MARK_PRICE_FRAME.replace("\"50000.00\"", "\"abc\"");
        assert!(matches!(parse_frame(&bad), Err(FrameError::InvalidPrice(_))));
        let negative = MARK_PRICE_FRAME.replace("\"50000.00\"", "\"-1\"");
        assert!(matches!(parse_frame(&negative), Err(FrameError::InvalidPrice(_))));
    }

    #[test]
    fn test_parse_rejects_other_events() {
        let other = MARK_PRICE_FRAME.replace("markPriceUpdate", "aggTrade");
        assert!(matches!(parse_frame(&other), Err(FrameError::UnexpectedEvent(_))));
    }

    #[test]
    fn test_base_asset() {
        assert_eq!(base_asset("BTCUSDT"), "BTC");
        assert_eq!(base_asset("ethusdc"), "ETH");
        assert_eq!(base_asset("USDT"), "USDT");
        assert_eq!(base_asset("XYZ"), "XYZ");
    }

    #[test]
    fn test_subscribe_request() {
        let req = subscribe_request(&["btcusdt".to_string(), "ETHUSDT".to_string()], 3);
        let value: Value = serde_json::from_str(&req).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"method":"SUBSCRIBE","params":["btcusdt@markPrice","ethusdt@markPrice"],"id":3})
        );
    }
}
