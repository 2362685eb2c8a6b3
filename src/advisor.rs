use crate::catalog::{CoinDetails, DetailsSource};
use crate::error::{DetailsError, RecommendationError};
use crate::recommend::{Recommendation, RecommendationSource};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Debug, Default, PartialEq)]
pub enum CardState {
    #[default]
    Idle,
    Loading,
    Ready(Recommendation),
    Failed(String),
}

/// Per-coin recommendation cards. A failure on one card never touches another.
#[derive(Debug, Default)]
pub struct AdvisorBook {
    cards: HashMap<String, CardState>,
}

impl AdvisorBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, coin_id: &str) -> &CardState {
        static IDLE: CardState = CardState::Idle;
        self.cards.get(coin_id).unwrap_or(&IDLE)
    }

    /// Marks the card as loading. Returns `false` if a request is already in flight.
    pub fn request(&mut self, coin_id: &str) -> bool {
        if matches!(self.cards.get(coin_id), Some(CardState::Loading)) {
            return false;
        }
        self.cards.insert(coin_id.to_string(), CardState::Loading);
        true
    }

    pub fn resolve(&mut self, coin_id: &str, result: Result<Recommendation, RecommendationError>) {
        let state = match result {
            Ok(rec) => CardState::Ready(rec),
            Err(e) => {
                warn!("Recommendation for {} failed: {}", coin_id, e);
                CardState::Failed(e.to_string())
            }
        };
        self.cards.insert(coin_id.to_string(), state);
    }

    /// Keeps only cards for coins still selected.
    pub fn retain(&mut self, coin_ids: &[&str]) {
        self.cards.retain(|id, _| coin_ids.contains(&id.as_str()));
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum InfoState {
    #[default]
    Idle,
    Loading,
    Ready(CoinDetails),
    Failed(String),
}

/// Per-coin details panels. Loaded details stay until the app exits.
#[derive(Debug, Default)]
pub struct DetailsBook {
    entries: HashMap<String, InfoState>,
}

impl DetailsBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, coin_id: &str) -> &InfoState {
        static IDLE: InfoState = InfoState::Idle;
        self.entries.get(coin_id).unwrap_or(&IDLE)
    }

    /// Marks the coin as loading. Returns `false` when the details are already
    /// loaded or a fetch is in flight.
    pub fn request(&mut self, coin_id: &str) -> bool {
        if matches!(
            self.entries.get(coin_id),
            Some(InfoState::Loading | InfoState::Ready(_))
        ) {
            return false;
        }
        self.entries.insert(coin_id.to_string(), InfoState::Loading);
        true
    }

    pub fn resolve(&mut self, coin_id: &str, result: Result<CoinDetails, DetailsError>) {
        let state = match result {
            Ok(details) => InfoState::Ready(details),
            Err(e) => {
                warn!("Details for {} failed: {}", coin_id, e);
                InfoState::Failed(e.to_string())
            }
        };
        self.entries.insert(coin_id.to_string(), state);
    }
}

/// Fetches details (cached per coin) and asks for a recommendation.
pub struct Advisor<D, R> {
    details: Arc<D>,
    recommender: Arc<R>,
    cache: tokio::sync::Mutex<HashMap<String, CoinDetails>>,
}

impl<D: DetailsSource, R: RecommendationSource> Advisor<D, R> {
    pub fn new(details: Arc<D>, recommender: Arc<R>) -> Self {
        Self {
            details,
            recommender,
            cache: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub async fn details(&self, coin_id: &str) -> Result<CoinDetails, DetailsError> {
        if let Some(hit) = self.cache.lock().await.get(coin_id) {
            return Ok(hit.clone());
        }
        let fetched = self.details.fetch_details(coin_id).await?;
        self.cache
            .lock()
            .await
            .insert(coin_id.to_string(), fetched.clone());
        Ok(fetched)
    }

    pub async fn recommend(&self, coin_id: &str) -> Result<Recommendation, RecommendationError> {
        let details = self.details(coin_id).await?;
        let rec = self.recommender.recommend(&details).await?;
        info!(
            "Recommendation for {}: {}",
            coin_id,
            if rec.decision { "buy" } else { "hold off" }
        );
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDetails {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DetailsSource for CountingDetails {
        async fn fetch_details(&self, coin_id: &str) -> Result<CoinDetails, DetailsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if coin_id == "missing" {
                return Err(DetailsError::Status { status: 404 });
            }
            Ok(CoinDetails {
                id: coin_id.to_string(),
                symbol: coin_id[..3].to_string(),
                name: coin_id.to_string(),
                image: Default::default(),
                market_data: None,
            })
        }
    }

    struct FixedRecommender;

    #[async_trait]
    impl RecommendationSource for FixedRecommender {
        async fn recommend(&self, details: &CoinDetails) -> Result<Recommendation, RecommendationError> {
            Ok(Recommendation {
                coin_id: details.id.clone(),
                decision: details.id == "bitcoin",
                rationale: format!("{} looks fine", details.name),
            })
        }
    }

    fn advisor() -> (Advisor<CountingDetails, FixedRecommender>, Arc<CountingDetails>) {
        let details = Arc::new(CountingDetails { calls: AtomicUsize::new(0) });
        (Advisor::new(details.clone(), Arc::new(FixedRecommender)), details)
    }

    #[tokio::test]
    async fn test_recommend_caches_details() {
        let (advisor, details) = advisor();
        let first = advisor.recommend("bitcoin").await.unwrap();
        let second = advisor.recommend("bitcoin").await.unwrap();
        assert!(first.decision);
        assert_eq!(first, second);
        assert_eq!(details.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_details_failure_is_wrapped() {
        let (advisor, _) = advisor();
        let err = advisor.recommend("missing").await.unwrap_err();
        assert!(matches!(err, RecommendationError::Details(DetailsError::Status { status: 404 })));
    }

    #[tokio::test]
    async fn test_details_are_shared_with_recommendations() {
        let (advisor, details) = advisor();
        let fetched = advisor.details("ethereum").await.unwrap();
        assert_eq!(fetched.id, "ethereum");
        advisor.recommend("ethereum").await.unwrap();
        assert_eq!(details.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_details_book_loads_once_and_retries_failures() {
        let mut book = DetailsBook::new();
        assert_eq!(book.state("bitcoin"), &InfoState::Idle);
        assert!(book.request("bitcoin"));
        assert!(!book.request("bitcoin"));

        book.resolve("bitcoin", Err(DetailsError::Status { status: 429 }));
        assert!(matches!(book.state("bitcoin"), InfoState::Failed(_)));
        assert!(book.request("bitcoin"));

        let details = CoinDetails {
            id: "bitcoin".to_string(),
            symbol: "btc".to_string(),
            name: "Bitcoin".to_string(),
            image: Default::default(),
            market_data: None,
        };
        book.resolve("bitcoin", Ok(details.clone()));
        assert_eq!(book.state("bitcoin"), &InfoState::Ready(details));
        assert!(!book.request("bitcoin"));
        assert_eq!(book.state("ethereum"), &InfoState::Idle);
    }

    #[test]
    fn test_book_scopes_failures_per_card() {
        let mut book = AdvisorBook::new();
        assert_eq!(book.state("bitcoin"), &CardState::Idle);

        assert!(book.request("bitcoin"));
        assert!(!book.request("bitcoin"));
        assert!(book.request("ethereum"));

        book.resolve("ethereum", Err(RecommendationError::RateLimited));
        book.resolve(
            "bitcoin",
            Ok(Recommendation {
                coin_id: "bitcoin".to_string(),
                decision: true,
                rationale: "ok".to_string(),
            }),
        );

        assert!(matches!(book.state("bitcoin"), CardState::Ready(r) if r.decision));
        assert_eq!(
            book.state("ethereum"),
            &CardState::Failed("Too many requests. Please try again later.".to_string())
        );

        assert!(book.request("ethereum"));
        book.retain(&["bitcoin"]);
        assert_eq!(book.state("ethereum"), &CardState::Idle);
    }
}
