use crate::advisor::{Advisor, AdvisorBook, DetailsBook};
use crate::catalog::{CatalogEntry, CoinDetails, CoinGeckoClient, Instrument, filter_entries};
use crate::chart::ChartTable;
use crate::config::Settings;
use crate::error::{DetailsError, ListingError, RecommendationError};
use crate::quotes::CryptoCompareClient;
use crate::recommend::{OpenAiClient, Recommendation};
use crate::selection::{CapacityConflict, SelectionSet, ToggleOutcome};
use crate::session::TrackingSession;
use crate::storage::KeyValueStore;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Catalog,
    Tracking,
    Advisor,
}

impl View {
    pub fn title(self) -> &'static str {
        match self {
            View::Catalog => "Coins",
            View::Tracking => "Live Prices",
            View::Advisor => "Recommendations",
        }
    }

    fn next(self) -> Self {
        match self {
            View::Catalog => View::Tracking,
            View::Tracking => View::Advisor,
            View::Advisor => View::Catalog,
        }
    }
}

pub enum Listing {
    Loading,
    Ready(Vec<CatalogEntry>),
    Failed(String),
}

/// Open while the user picks which selected coin to drop for the new one.
pub struct ConflictDialog {
    pub conflict: CapacityConflict,
    pub cursor: usize,
}

pub enum AppMessage {
    Catalog(Result<Vec<CatalogEntry>, ListingError>),
    Recommendation {
        coin_id: String,
        result: Result<Recommendation, RecommendationError>,
    },
    Details {
        coin_id: String,
        result: Result<CoinDetails, DetailsError>,
    },
}

/// The coin whose "more info" panel is open over the listing.
pub struct InfoPanel {
    pub coin_id: String,
    pub name: String,
}

pub struct App {
    pub should_quit: bool,
    pub view: View,
    pub listing: Listing,
    pub search: String,
    pub searching: bool,
    pub cursor: usize,
    pub selection: SelectionSet,
    pub session: TrackingSession<CryptoCompareClient>,
    pub conflict: Option<ConflictDialog>,
    pub book: AdvisorBook,
    pub details: DetailsBook,
    pub info: Option<InfoPanel>,
    pub status: Option<String>,
    catalog: Arc<CoinGeckoClient>,
    advisor: Arc<Advisor<CoinGeckoClient, OpenAiClient>>,
    tx: UnboundedSender<AppMessage>,
    rx: UnboundedReceiver<AppMessage>,
}

impl App {
    pub fn new(settings: &Settings, store: Arc<dyn KeyValueStore>) -> anyhow::Result<Self> {
        let catalog = Arc::new(CoinGeckoClient::new(settings)?);
        let quotes = Arc::new(CryptoCompareClient::new(settings)?);
        let recommender = Arc::new(OpenAiClient::new(settings)?);
        let (tx, rx) = unbounded_channel();

        Ok(Self {
            should_quit: false,
            view: View::Catalog,
            listing: Listing::Loading,
            search: String::new(),
            searching: false,
            cursor: 0,
            selection: SelectionSet::load(store),
            session: TrackingSession::new(quotes, settings.poll_interval),
            conflict: None,
            book: AdvisorBook::new(),
            details: DetailsBook::new(),
            info: None,
            status: None,
            advisor: Arc::new(Advisor::new(catalog.clone(), recommender)),
            catalog,
            tx,
            rx,
        })
    }

    pub async fn run(&mut self, terminal: &mut crate::tui::Tui) -> anyhow::Result<()> {
        self.reload_catalog();

        while !self.should_quit {
            terminal.draw(|f| crate::ui::render(f, self))?;

            tokio::select! {
                // A session update only changes what the next frame shows.
                Some(_) = self.session.next_update() => {}
                Some(message) = self.rx.recv() => self.handle_message(message),
                _ = tokio::time::sleep(Duration::from_millis(16)) => {
                    while event::poll(Duration::ZERO)? {
                        if let Event::Key(key) = event::read()? {
                            self.handle_key(key);
                        }
                    }
                }
            }
        }

        self.session.teardown();
        Ok(())
    }

    pub fn reload_catalog(&mut self) {
        self.listing = Listing::Loading;
        let client = self.catalog.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = client.fetch_markets().await;
            let _ = tx.send(AppMessage::Catalog(result));
        });
    }

    pub fn handle_message(&mut self, message: AppMessage) {
        match message {
            AppMessage::Catalog(Ok(entries)) => {
                self.listing = Listing::Ready(entries);
                self.clamp_cursor();
            }
            AppMessage::Catalog(Err(e)) => {
                warn!("Coin listing failed: {}", e);
                self.listing = Listing::Failed(e.to_string());
            }
            AppMessage::Recommendation { coin_id, result } => {
                if self.selection.contains(&coin_id) {
                    self.book.resolve(&coin_id, result);
                }
            }
            AppMessage::Details { coin_id, result } => self.details.resolve(&coin_id, result),
        }
    }

    pub fn visible_entries(&self) -> Vec<&CatalogEntry> {
        match &self.listing {
            Listing::Ready(entries) => filter_entries(entries, &self.search),
            _ => Vec::new(),
        }
    }

    pub fn chart_table(&self) -> ChartTable {
        ChartTable::build(self.selection.instruments(), &self.session.snapshot())
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        if self.conflict.is_some() {
            self.handle_conflict_key(key.code);
            return;
        }
        if self.searching {
            self.handle_search_key(key.code);
            return;
        }
        if self.info.is_some() {
            if matches!(key.code, KeyCode::Esc | KeyCode::Char('i') | KeyCode::Char('q')) {
                self.info = None;
            }
            return;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Tab => self.switch_view(self.view.next()),
            KeyCode::Char('1') => self.switch_view(View::Catalog),
            KeyCode::Char('2') => self.switch_view(View::Tracking),
            KeyCode::Char('3') => self.switch_view(View::Advisor),
            KeyCode::Up | KeyCode::Char('k') => self.cursor = self.cursor.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => {
                self.cursor += 1;
                self.clamp_cursor();
            }
            code => match self.view {
                View::Catalog => self.handle_catalog_key(code),
                View::Tracking => self.handle_tracking_key(code),
                View::Advisor => self.handle_advisor_key(code),
            },
        }
    }

    fn handle_catalog_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('/') => self.searching = true,
            KeyCode::Char(' ') | KeyCode::Enter => self.toggle_highlighted(),
            KeyCode::Char('r') => self.reload_catalog(),
            KeyCode::Char('i') => self.open_info(),
            _ => {}
        }
    }

    fn handle_tracking_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('x') | KeyCode::Delete => {
                if let Some(id) = self.highlighted_selected().map(|i| i.id.clone()) {
                    self.selection.remove(&id);
                    self.on_selection_changed();
                }
            }
            KeyCode::Char('c') => {
                self.selection.clear();
                self.on_selection_changed();
            }
            _ => {}
        }
    }

    fn handle_advisor_key(&mut self, code: KeyCode) {
        if matches!(code, KeyCode::Enter | KeyCode::Char(' ')) {
            self.request_recommendation();
        }
    }

    fn handle_search_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char(c) => self.search.push(c),
            KeyCode::Backspace => {
                self.search.pop();
            }
            KeyCode::Enter => self.searching = false,
            KeyCode::Esc => {
                self.search.clear();
                self.searching = false;
            }
            _ => return,
        }
        self.cursor = 0;
    }

    fn handle_conflict_key(&mut self, code: KeyCode) {
        let Some(dialog) = self.conflict.as_mut() else {
            return;
        };
        match code {
            KeyCode::Up | KeyCode::Char('k') => dialog.cursor = dialog.cursor.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => {
                dialog.cursor = (dialog.cursor + 1).min(dialog.conflict.current.len().saturating_sub(1));
            }
            KeyCode::Enter => self.resolve_conflict(),
            KeyCode::Esc | KeyCode::Char('q') => self.conflict = None,
            _ => {}
        }
    }

    pub fn switch_view(&mut self, view: View) {
        if view == self.view {
            return;
        }
        if self.view == View::Tracking {
            self.session.teardown();
        }
        self.view = view;
        self.cursor = 0;
        self.searching = false;
        if view == View::Tracking {
            self.session.set_selection(&self.selection.tickers());
        }
    }

    fn toggle_highlighted(&mut self) {
        let Some(instrument) = self.visible_entries().get(self.cursor).map(|e| e.instrument.clone()) else {
            return;
        };
        match self.selection.toggle(&instrument) {
            ToggleOutcome::Added => {
                self.status = Some(format!("Added {}", instrument.name));
                self.on_selection_changed();
            }
            ToggleOutcome::Removed => {
                self.status = Some(format!("Removed {}", instrument.name));
                self.on_selection_changed();
            }
            ToggleOutcome::CapacityConflict(conflict) => {
                info!("Selection full, asking which coin to replace with {}", instrument.id);
                self.conflict = Some(ConflictDialog { conflict, cursor: 0 });
            }
        }
    }

    fn resolve_conflict(&mut self) {
        let Some(dialog) = self.conflict.take() else {
            return;
        };
        let Some(remove) = dialog.conflict.current.get(dialog.cursor) else {
            return;
        };
        match self.selection.resolve_replacement(&remove.id, &dialog.conflict.attempted) {
            Ok(()) => {
                self.status = Some(format!(
                    "Replaced {} with {}",
                    remove.name, dialog.conflict.attempted.name
                ));
                self.on_selection_changed();
            }
            Err(e) => self.status = Some(e.to_string()),
        }
    }

    fn on_selection_changed(&mut self) {
        let ids: Vec<&str> = self.selection.instruments().iter().map(|i| i.id.as_str()).collect();
        self.book.retain(&ids);
        if self.view == View::Tracking {
            self.session.set_selection(&self.selection.tickers());
        }
        self.clamp_cursor();
    }

    pub fn highlighted_selected(&self) -> Option<&Instrument> {
        self.selection.instruments().get(self.cursor)
    }

    fn request_recommendation(&mut self) {
        let Some(coin_id) = self.highlighted_selected().map(|i| i.id.clone()) else {
            return;
        };
        if !self.book.request(&coin_id) {
            return;
        }
        let advisor = self.advisor.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = advisor.recommend(&coin_id).await;
            let _ = tx.send(AppMessage::Recommendation { coin_id, result });
        });
    }

    fn open_info(&mut self) {
        let Some(instrument) = self.visible_entries().get(self.cursor).map(|e| e.instrument.clone()) else {
            return;
        };
        self.info = Some(InfoPanel {
            coin_id: instrument.id.clone(),
            name: instrument.name,
        });
        if !self.details.request(&instrument.id) {
            return;
        }
        let advisor = self.advisor.clone();
        let tx = self.tx.clone();
        let coin_id = instrument.id;
        tokio::spawn(async move {
            let result = advisor.details(&coin_id).await;
            let _ = tx.send(AppMessage::Details { coin_id, result });
        });
    }

    fn clamp_cursor(&mut self) {
        let len = match self.view {
            View::Catalog => self.visible_entries().len(),
            View::Tracking | View::Advisor => self.selection.len(),
        };
        self.cursor = self.cursor.min(len.saturating_sub(1));
    }
}
