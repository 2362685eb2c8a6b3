use crate::catalog::Instrument;
use crate::config::{SELECTION_CAPACITY, SELECTION_STORAGE_KEY};
use crate::error::{SelectionError, StorageError};
use crate::storage::KeyValueStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Raised instead of mutating when a full selection receives a new coin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapacityConflict {
    pub attempted: Instrument,
    pub current: Vec<Instrument>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToggleOutcome {
    Added,
    Removed,
    CapacityConflict(CapacityConflict),
}

/// The user's bounded, persisted working set of coins.
pub struct SelectionSet {
    instruments: Vec<Instrument>,
    store: Arc<dyn KeyValueStore>,
}

impl SelectionSet {
    /// Restores the last persisted selection. Missing or corrupt data yields an empty set.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let instruments = match store.get(SELECTION_STORAGE_KEY) {
            Some(raw) => match serde_json::from_str::<Vec<Instrument>>(&raw) {
                Ok(list) => sanitize(list),
                Err(e) => {
                    warn!("Stored selection is unreadable ({}), starting empty", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        info!("Selection restored with {} coins", instruments.len());
        Self { instruments, store }
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.instruments.len() >= SELECTION_CAPACITY
    }

    pub fn contains(&self, id: &str) -> bool {
        self.instruments.iter().any(|i| i.id == id)
    }

    /// Distinct upper-case tickers in selection order.
    pub fn tickers(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.instruments
            .iter()
            .map(Instrument::ticker)
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }

    pub fn toggle(&mut self, instrument: &Instrument) -> ToggleOutcome {
        if let Some(index) = self.position(&instrument.id) {
            self.instruments.remove(index);
            self.persist();
            return ToggleOutcome::Removed;
        }
        if self.is_full() {
            return ToggleOutcome::CapacityConflict(CapacityConflict {
                attempted: instrument.clone(),
                current: self.instruments.clone(),
            });
        }
        self.instruments.push(instrument.clone());
        self.persist();
        ToggleOutcome::Added
    }

    /// Swaps one selected coin for a new one in a single step.
    pub fn resolve_replacement(
        &mut self,
        remove_id: &str,
        add: &Instrument,
    ) -> Result<(), SelectionError> {
        let index = self
            .position(remove_id)
            .ok_or_else(|| SelectionError::NotSelected(remove_id.to_string()))?;
        if self.contains(&add.id) {
            return Err(SelectionError::AlreadySelected(add.id.clone()));
        }
        self.instruments.remove(index);
        self.instruments.push(add.clone());
        self.persist();
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.instruments.len();
        self.instruments.retain(|i| i.id != id);
        let removed = self.instruments.len() != before;
        self.persist();
        removed
    }

    pub fn clear(&mut self) {
        self.instruments.clear();
        self.persist();
    }

    pub fn replace_all(&mut self, list: Vec<Instrument>) -> Result<(), SelectionError> {
        let list = dedup_by_id(list);
        if list.len() > SELECTION_CAPACITY {
            return Err(SelectionError::OverCapacity {
                capacity: SELECTION_CAPACITY,
                requested: list.len(),
            });
        }
        self.instruments = list;
        self.persist();
        Ok(())
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.instruments.iter().position(|i| i.id == id)
    }

    fn persist(&self) {
        let result = serde_json::to_string(&self.instruments)
            .map_err(StorageError::from)
            .and_then(|json| self.store.set(SELECTION_STORAGE_KEY, &json));
        if let Err(e) = result {
            warn!("Failed to persist selection: {}", e);
        }
    }
}

fn dedup_by_id(list: Vec<Instrument>) -> Vec<Instrument> {
    let mut seen = HashSet::new();
    list.into_iter().filter(|i| seen.insert(i.id.clone())).collect()
}

fn sanitize(list: Vec<Instrument>) -> Vec<Instrument> {
    let mut list = dedup_by_id(list);
    if list.len() > SELECTION_CAPACITY {
        warn!(
            "Stored selection has {} coins, keeping the first {}",
            list.len(),
            SELECTION_CAPACITY
        );
        list.truncate(SELECTION_CAPACITY);
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn coin(n: usize) -> Instrument {
        Instrument::new(&format!("coin-{}", n), &format!("c{}", n), &format!("Coin {}", n))
    }

    fn empty_set() -> (SelectionSet, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (SelectionSet::load(store.clone()), store)
    }

    fn stored(store: &MemoryStore) -> Vec<Instrument> {
        serde_json::from_str(&store.get(SELECTION_STORAGE_KEY).unwrap()).unwrap()
    }

    #[test]
    fn test_toggle_adds_then_removes_and_persists() {
        let (mut set, store) = empty_set();
        assert_eq!(set.toggle(&coin(1)), ToggleOutcome::Added);
        assert_eq!(stored(&store), vec![coin(1)]);

        assert_eq!(set.toggle(&coin(1)), ToggleOutcome::Removed);
        assert!(set.is_empty());
        assert!(stored(&store).is_empty());
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let (mut set, _) = empty_set();
        for round in 0..3 {
            for n in 0..12 {
                set.toggle(&coin((n * 7 + round) % 9));
                assert!(set.len() <= SELECTION_CAPACITY);
            }
        }
    }

    #[test]
    fn test_sixth_coin_raises_conflict_without_mutation() {
        let (mut set, store) = empty_set();
        for n in 0..5 {
            set.toggle(&coin(n));
        }
        let before = set.instruments().to_vec();

        match set.toggle(&coin(5)) {
            ToggleOutcome::CapacityConflict(conflict) => {
                assert_eq!(conflict.attempted, coin(5));
                assert_eq!(conflict.current, before);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(set.instruments(), before.as_slice());
        assert_eq!(stored(&store), before);
    }

    #[test]
    fn test_resolve_replacement_swaps_and_keeps_size() {
        let (mut set, store) = empty_set();
        for n in 0..5 {
            set.toggle(&coin(n));
        }
        set.resolve_replacement("coin-2", &coin(9)).unwrap();
        assert_eq!(set.len(), 5);
        assert!(!set.contains("coin-2"));
        assert!(set.contains("coin-9"));
        assert_eq!(stored(&store).len(), 5);
    }

    #[test]
    fn test_resolve_replacement_rejects_bad_input() {
        let (mut set, _) = empty_set();
        set.toggle(&coin(1));
        set.toggle(&coin(2));
        assert_eq!(
            set.resolve_replacement("coin-7", &coin(3)),
            Err(SelectionError::NotSelected("coin-7".to_string()))
        );
        assert_eq!(
            set.resolve_replacement("coin-1", &coin(2)),
            Err(SelectionError::AlreadySelected("coin-2".to_string()))
        );
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_remove_clear_replace_all() {
        let (mut set, store) = empty_set();
        set.replace_all(vec![coin(1), coin(2), coin(1), coin(3)]).unwrap();
        assert_eq!(set.instruments(), &[coin(1), coin(2), coin(3)]);

        assert!(set.remove("coin-2"));
        assert!(!set.remove("coin-2"));
        assert_eq!(stored(&store), vec![coin(1), coin(3)]);

        let too_many = (0..6).map(coin).collect();
        assert_eq!(
            set.replace_all(too_many),
            Err(SelectionError::OverCapacity { capacity: 5, requested: 6 })
        );
        assert_eq!(set.len(), 2);

        set.clear();
        assert!(stored(&store).is_empty());
    }

    #[test]
    fn test_load_restores_and_tolerates_corruption() {
        let json = serde_json::to_string(&vec![coin(1), coin(2)]).unwrap();
        let set = SelectionSet::load(Arc::new(MemoryStore::with_entry(SELECTION_STORAGE_KEY, &json)));
        assert_eq!(set.instruments(), &[coin(1), coin(2)]);

        let set = SelectionSet::load(Arc::new(MemoryStore::with_entry(SELECTION_STORAGE_KEY, "{not json")));
        assert!(set.is_empty());

        let oversized = serde_json::to_string(&(0..8).map(coin).collect::<Vec<_>>()).unwrap();
        let set = SelectionSet::load(Arc::new(MemoryStore::with_entry(SELECTION_STORAGE_KEY, &oversized)));
        assert_eq!(set.len(), SELECTION_CAPACITY);
    }

    #[test]
    fn test_tickers_are_distinct_and_upper_case() {
        let (mut set, _) = empty_set();
        set.toggle(&Instrument::new("bitcoin", "btc", "Bitcoin"));
        set.toggle(&Instrument::new("bitcoin-wrapped", "BTC", "Bitcoin (wrapped)"));
        set.toggle(&Instrument::new("ethereum", "eth", "Ethereum"));
        assert_eq!(set.tickers(), vec!["BTC".to_string(), "ETH".to_string()]);
    }
}
