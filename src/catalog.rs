use crate::config::{CATALOG_PAGE_SIZE, Settings};
use crate::error::{DetailsError, ListingError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Reference data for one tradable coin. Read-only outside the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub image: String,
}

impl Instrument {
    pub fn new(id: &str, symbol: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
            image: String::new(),
        }
    }

    /// Upper-case symbol, the key used by the price buffers.
    pub fn ticker(&self) -> String {
        normalize_ticker(&self.symbol)
    }
}

pub fn normalize_ticker(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// One row of the market listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub instrument: Instrument,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_7d: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoinImages {
    #[serde(default)]
    pub small: String,
    #[serde(default)]
    pub large: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrencyPrices {
    pub usd: Option<f64>,
    pub eur: Option<f64>,
    pub ils: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UsdAmount {
    pub usd: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    #[serde(default)]
    pub current_price: CurrencyPrices,
    #[serde(default)]
    pub market_cap: UsdAmount,
    #[serde(default)]
    pub total_volume: UsdAmount,
    #[serde(default)]
    pub price_change_percentage_30d_in_currency: UsdAmount,
    #[serde(default)]
    pub price_change_percentage_60d_in_currency: UsdAmount,
    #[serde(default)]
    pub price_change_percentage_200d_in_currency: UsdAmount,
}

/// Extended per-coin metrics, fetched on demand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoinDetails {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub image: CoinImages,
    #[serde(default)]
    pub market_data: Option<MarketData>,
}

#[async_trait]
pub trait DetailsSource: Send + Sync {
    async fn fetch_details(&self, coin_id: &str) -> Result<CoinDetails, DetailsError>;
}

#[derive(Clone, Debug)]
pub struct CoinGeckoClient {
    http: reqwest::Client,
    base_url: String,
}

impl CoinGeckoClient {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: settings.coingecko_base_url.clone(),
        })
    }

    pub fn markets_url(&self) -> String {
        format!(
            "{}/coins/markets?vs_currency=usd&per_page={}&page=1",
            self.base_url, CATALOG_PAGE_SIZE
        )
    }

    pub fn details_url(&self, coin_id: &str) -> String {
        format!("{}/coins/{}?market_data=true", self.base_url, coin_id)
    }

    pub async fn fetch_markets(&self) -> Result<Vec<CatalogEntry>, ListingError> {
        let url = self.markets_url();
        info!("Fetching coin listing from {}", url);

        let entries = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(ListingError::from_reqwest)?
            .json::<Vec<CatalogEntry>>()
            .await
            .map_err(ListingError::from_reqwest)?;

        info!("Coin listing loaded: {} entries", entries.len());
        Ok(entries)
    }
}

#[async_trait]
impl DetailsSource for CoinGeckoClient {
    async fn fetch_details(&self, coin_id: &str) -> Result<CoinDetails, DetailsError> {
        let url = self.details_url(coin_id);
        let details = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(DetailsError::from_reqwest)?
            .json::<CoinDetails>()
            .await
            .map_err(|e| {
                warn!("Coin details for {} could not be decoded: {}", coin_id, e);
                DetailsError::from_reqwest(e)
            })?;
        Ok(details)
    }
}

/// Case-insensitive substring search over name and symbol.
pub fn filter_entries<'a>(entries: &'a [CatalogEntry], term: &str) -> Vec<&'a CatalogEntry> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return entries.iter().collect();
    }
    entries
        .iter()
        .filter(|entry| {
            entry.instrument.name.to_lowercase().contains(&term)
                || entry.instrument.symbol.to_lowercase().contains(&term)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, symbol: &str, name: &str) -> CatalogEntry {
        CatalogEntry {
            instrument: Instrument::new(id, symbol, name),
            current_price: None,
            market_cap: None,
            total_volume: None,
            price_change_percentage_24h: None,
            price_change_percentage_7d: None,
        }
    }

    #[test]
    fn test_ticker_is_upper_case() {
        let btc = Instrument::new("bitcoin", " btc ", "Bitcoin");
        assert_eq!(btc.ticker(), "BTC");
    }

    #[test]
    fn test_filter_matches_name_or_symbol() {
        let entries = vec![
            entry("bitcoin", "btc", "Bitcoin"),
            entry("ethereum", "eth", "Ethereum"),
            entry("tether", "usdt", "Tether"),
        ];

        assert_eq!(filter_entries(&entries, "").len(), 3);

        let hits = filter_entries(&entries, "ETH");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].instrument.id, "ethereum");
        assert_eq!(hits[1].instrument.id, "tether");

        let hits = filter_entries(&entries, "usd");
        assert_eq!(hits.len(), 1);
        assert!(filter_entries(&entries, "doge").is_empty());
    }

    #[test]
    fn test_markets_payload_decodes_with_missing_stats() {
        let payload = r#"[
            {"id":"bitcoin","symbol":"btc","name":"Bitcoin","image":"https://img/btc.png",
             "current_price":50000.5,"market_cap":1.0e12,"total_volume":3.0e10,
             "price_change_percentage_24h":-1.25},
            {"id":"ethereum","symbol":"eth","name":"Ethereum","image":"https://img/eth.png",
             "current_price":null}
        ]"#;
        let entries: Vec<CatalogEntry> = serde_json::from_str(payload).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].instrument.ticker(), "BTC");
        assert_eq!(entries[0].current_price, Some(50000.5));
        assert_eq!(entries[0].price_change_percentage_7d, None);
        assert_eq!(entries[1].current_price, None);
    }

    #[test]
    fn test_details_payload_decodes() {
        let payload = r#"{
            "id":"bitcoin","symbol":"btc","name":"Bitcoin",
            "image":{"small":"s.png","large":"l.png"},
            "market_data":{
                "current_price":{"usd":50000.0,"eur":46000.0,"ils":185000.0},
                "market_cap":{"usd":9.8e11},
                "total_volume":{"usd":2.1e10},
                "price_change_percentage_30d_in_currency":{"usd":4.2}
            }
        }"#;
        let details: CoinDetails = serde_json::from_str(payload).unwrap();
        let market = details.market_data.unwrap();
        assert_eq!(market.current_price.ils, Some(185000.0));
        assert_eq!(market.price_change_percentage_30d_in_currency.usd, Some(4.2));
        assert_eq!(market.price_change_percentage_200d_in_currency.usd, None);
    }

    #[test]
    fn test_urls() {
        let mut settings = Settings::from_env();
        settings.coingecko_base_url = "http://localhost:9000".to_string();
        let client = CoinGeckoClient::new(&settings).unwrap();
        assert_eq!(
            client.markets_url(),
            "http://localhost:9000/coins/markets?vs_currency=usd&per_page=100&page=1"
        );
        assert_eq!(
            client.details_url("bitcoin"),
            "http://localhost:9000/coins/bitcoin?market_data=true"
        );
    }
}
