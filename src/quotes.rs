use crate::catalog::normalize_ticker;
use crate::config::{QUOTE_CURRENCY, Settings};
use crate::error::QuoteError;
use async_trait::async_trait;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// A single spot quote as reported by the price service.
#[derive(Clone, Debug, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
}

/// Valid quotes of one response, in the order the service listed them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuoteBatch {
    pub quotes: Vec<Quote>,
}

impl QuoteBatch {
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Collapses duplicates; the last quote seen for a symbol wins.
    pub fn by_symbol(&self) -> HashMap<String, f64> {
        let mut out = HashMap::new();
        for quote in &self.quotes {
            out.insert(quote.symbol.clone(), quote.price);
        }
        out
    }
}

#[async_trait]
pub trait PriceQuoteSource: Send + Sync + 'static {
    /// One batched request for every symbol.
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<QuoteBatch, QuoteError>;
}

#[derive(Clone, Debug)]
pub struct CryptoCompareClient {
    http: reqwest::Client,
    base_url: String,
}

impl CryptoCompareClient {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: settings.cryptocompare_base_url.clone(),
        })
    }

    pub fn pricemulti_url(&self, symbols: &[String]) -> String {
        let fsyms = symbols
            .iter()
            .map(|s| normalize_ticker(s))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{}/pricemulti?fsyms={}&tsyms={}",
            self.base_url, fsyms, QUOTE_CURRENCY
        )
    }
}

#[async_trait]
impl PriceQuoteSource for CryptoCompareClient {
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<QuoteBatch, QuoteError> {
        let url = self.pricemulti_url(symbols);
        debug!("Fetching prices: {}", url);

        let body = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(QuoteError::from_reqwest)?
            .text()
            .await
            .map_err(QuoteError::from_reqwest)?;

        parse_price_payload(&body)
    }
}

/// Top-level object entries, document order preserved.
struct RawPricePayload(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for RawPricePayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PayloadVisitor;

        impl<'de> Visitor<'de> for PayloadVisitor {
            type Value = RawPricePayload;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object keyed by symbol")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, Value>()? {
                    entries.push((key, value));
                }
                Ok(RawPricePayload(entries))
            }
        }

        deserializer.deserialize_map(PayloadVisitor)
    }
}

/// Parses a `pricemulti` body.
///
/// `{"Response":"Error","Message":"..."}` is the service's in-band error and maps to
/// [`QuoteError::Api`]. Entries without a positive finite USD price are skipped.
pub fn parse_price_payload(body: &str) -> Result<QuoteBatch, QuoteError> {
    let RawPricePayload(entries) =
        serde_json::from_str(body).map_err(|e| QuoteError::Decode(e.to_string()))?;

    let reported_error = entries
        .iter()
        .any(|(key, value)| key == "Response" && value.as_str() == Some("Error"));
    if reported_error {
        let message = entries
            .iter()
            .rev()
            .find(|(key, _)| key == "Message")
            .and_then(|(_, value)| value.as_str())
            .filter(|m| !m.trim().is_empty())
            .unwrap_or("Unknown price service error")
            .to_string();
        return Err(QuoteError::Api(message));
    }

    let quotes = entries
        .into_iter()
        .filter_map(|(symbol, value)| {
            let price = value.get(QUOTE_CURRENCY)?.as_f64()?;
            if !price.is_finite() || price <= 0.0 {
                return None;
            }
            Some(Quote {
                symbol: normalize_ticker(&symbol),
                price,
            })
        })
        .collect();

    Ok(QuoteBatch { quotes })
}
