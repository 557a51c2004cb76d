//! Binance WebSocket bookTicker feed implementation

use super::{BookQuote, QuoteFeed};
use crate::ws::{WsClient, WsConfig, WsMessage};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;

/// Binance WebSocket base URL
const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443";

/// Binance bookTicker payload
#[derive(Debug, Deserialize)]
struct BookTickerMessage {
    /// Symbol
    #[serde(rename = "s")]
    symbol: String,
    /// Best bid price
    #[serde(rename = "b")]
    bid_price: String,
    /// Best bid quantity
    #[serde(rename = "B")]
    bid_qty: String,
    /// Best ask price
    #[serde(rename = "a")]
    ask_price: String,
    /// Best ask quantity
    #[serde(rename = "A")]
    ask_qty: String,
}

/// Combined streams wrap the payload in an envelope; single streams don't
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BookTickerFrame {
    Combined { data: BookTickerMessage },
    Bare(BookTickerMessage),
}

/// Binance combined-stream feed for `<symbol>@bookTicker` streams
pub struct BinanceFeed {
    symbols: Vec<String>,
}

impl BinanceFeed {
    /// Create a new feed for the given symbols
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols
                .into_iter()
                .map(|s| s.into().to_lowercase())
                .collect(),
        }
    }

    /// Build the combined-stream URL for all subscribed symbols
    fn build_ws_url(&self) -> String {
        let streams: Vec<String> = self
            .symbols
            .iter()
            .map(|s| format!("{s}@bookTicker"))
            .collect();
        format!("{}/stream?streams={}", BINANCE_WS_URL, streams.join("/"))
    }

    /// Parse a bookTicker frame into a BookQuote
    fn parse_message(msg: &str) -> Option<BookQuote> {
        let frame: BookTickerFrame = serde_json::from_str(msg).ok()?;
        let ticker = match frame {
            BookTickerFrame::Combined { data } => data,
            BookTickerFrame::Bare(data) => data,
        };

        Some(BookQuote {
            symbol: ticker.symbol,
            bid_price: Decimal::from_str(&ticker.bid_price).ok()?,
            bid_qty: Decimal::from_str(&ticker.bid_qty).ok()?,
            ask_price: Decimal::from_str(&ticker.ask_price).ok()?,
            ask_qty: Decimal::from_str(&ticker.ask_qty).ok()?,
            timestamp: Utc::now(),
        })
    }

    /// Run the message processing loop
    async fn run_message_loop(
        mut ws_rx: mpsc::Receiver<WsMessage>,
        quote_tx: mpsc::Sender<BookQuote>,
    ) {
        while let Some(msg) = ws_rx.recv().await {
            match msg {
                WsMessage::Text(text) => {
                    if let Some(quote) = Self::parse_message(&text) {
                        if quote_tx.send(quote).await.is_err() {
                            tracing::debug!("Quote receiver dropped, stopping feed");
                            break;
                        }
                    }
                }
                WsMessage::Connected => {
                    tracing::info!("Binance feed connected");
                }
                WsMessage::Disconnected => {
                    tracing::warn!("Binance feed disconnected");
                    break;
                }
                WsMessage::Reconnecting { attempt } => {
                    tracing::warn!(attempt, "Binance feed reconnecting...");
                }
            }
        }
    }
}

#[async_trait]
impl QuoteFeed for BinanceFeed {
    async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<BookQuote>> {
        let (quote_tx, quote_rx) = mpsc::channel(1024);
        let url = self.build_ws_url();

        tracing::info!(streams = self.symbols.len(), "Subscribing to Binance feed");

        let config = WsConfig::new(url)
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(60))
            .ping_interval(Duration::from_secs(30));

        let client = WsClient::new(config);
        let ws_rx = client.connect();

        tokio::spawn(async move {
            Self::run_message_loop(ws_rx, quote_tx).await;
        });

        Ok(quote_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_binance_feed_lowercases_symbols() {
        let feed = BinanceFeed::new(["ETHUSDT", "btcusdt"]);
        assert_eq!(feed.symbols, vec!["ethusdt", "btcusdt"]);
    }

    #[test]
    fn test_build_ws_url() {
        let feed = BinanceFeed::new(["ethusdt", "btcusdt"]);
        assert_eq!(
            feed.build_ws_url(),
            "wss://stream.binance.com:9443/stream?streams=ethusdt@bookTicker/btcusdt@bookTicker"
        );
    }

    #[test]
    fn test_parse_combined_frame() {
        let msg = r#"{
            "stream": "ethusdt@bookTicker",
            "data": {
                "u": 400900217,
                "s": "ETHUSDT",
                "b": "2500.10",
                "B": "31.21",
                "a": "2500.11",
                "A": "40.66"
            }
        }"#;

        let quote = BinanceFeed::parse_message(msg).unwrap();
        assert_eq!(quote.symbol, "ETHUSDT");
        assert_eq!(quote.bid_price, dec!(2500.10));
        assert_eq!(quote.bid_qty, dec!(31.21));
        assert_eq!(quote.ask_price, dec!(2500.11));
        assert_eq!(quote.ask_qty, dec!(40.66));
    }

    #[test]
    fn test_parse_bare_frame() {
        let msg = r#"{
            "u": 400900217,
            "s": "BTCUSDT",
            "b": "95000.00",
            "B": "10",
            "a": "95000.10",
            "A": "5"
        }"#;

        let quote = BinanceFeed::parse_message(msg).unwrap();
        assert_eq!(quote.symbol, "BTCUSDT");
        assert_eq!(quote.bid_qty, dec!(10));
        assert_eq!(quote.ask_qty, dec!(5));
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(BinanceFeed::parse_message("not valid json").is_none());
    }

    #[test]
    fn test_parse_invalid_price() {
        let msg = r#"{
            "s": "BTCUSDT",
            "b": "not_a_number",
            "B": "10",
            "a": "95000.10",
            "A": "5"
        }"#;

        assert!(BinanceFeed::parse_message(msg).is_none());
    }

    #[tokio::test]
    async fn test_message_loop_handles_text() {
        let (ws_tx, ws_rx) = mpsc::channel(10);
        let (quote_tx, mut quote_rx) = mpsc::channel(10);

        let handle = tokio::spawn(async move {
            BinanceFeed::run_message_loop(ws_rx, quote_tx).await;
        });

        let msg = r#"{"s":"ETHUSDT","b":"2500.10","B":"31.21","a":"2500.11","A":"40.66"}"#;
        ws_tx.send(WsMessage::Text(msg.to_string())).await.unwrap();

        let quote = quote_rx.recv().await.unwrap();
        assert_eq!(quote.symbol, "ETHUSDT");
        assert_eq!(quote.bid_price, dec!(2500.10));

        ws_tx.send(WsMessage::Disconnected).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_message_loop_ignores_invalid() {
        let (ws_tx, ws_rx) = mpsc::channel(10);
        let (quote_tx, mut quote_rx) = mpsc::channel(10);

        let handle = tokio::spawn(async move {
            BinanceFeed::run_message_loop(ws_rx, quote_tx).await;
        });

        ws_tx
            .send(WsMessage::Text("invalid json".to_string()))
            .await
            .unwrap();

        let msg = r#"{"s":"ETHUSDT","b":"100.00","B":"1","a":"100.10","A":"2"}"#;
        ws_tx.send(WsMessage::Text(msg.to_string())).await.unwrap();

        // Should only receive the valid quote
        let quote = quote_rx.recv().await.unwrap();
        assert_eq!(quote.bid_price, dec!(100.00));

        ws_tx.send(WsMessage::Disconnected).await.unwrap();
        handle.await.unwrap();
    }
}
