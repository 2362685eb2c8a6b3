use crate::advisor::{CardState, InfoState};
use crate::app::{App, ConflictDialog, InfoPanel, Listing, View};
use crate::chart::ChartTable;
use crate::config::SELECTION_CAPACITY;
use crate::tracker::Phase;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        Axis, Block, Borders, Cell, Chart, Clear, Dataset, GraphType, List, ListItem, ListState,
        Paragraph, Row, Table, TableState, Wrap,
    },
};

const SERIES_COLORS: [Color; 5] = [
    Color::Cyan,
    Color::Yellow,
    Color::Magenta,
    Color::Green,
    Color::LightRed,
];

pub fn render(f: &mut Frame, app: &App) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.area());

    render_header(f, app, layout[0]);

    match app.view {
        View::Catalog => render_catalog(f, app, layout[1]),
        View::Tracking => render_tracking(f, app, layout[1]),
        View::Advisor => render_advisor(f, app, layout[1]),
    }

    render_footer(f, app, layout[2]);

    if let Some(panel) = &app.info {
        let area = f.area();
        render_info(f, app, panel, area);
    }

    if let Some(dialog) = &app.conflict {
        let area = f.area();
        render_conflict(f, dialog, area);
    }
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let mut spans = vec![
        Span::styled(" CoinPulse ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
    ];
    for (i, view) in [View::Catalog, View::Tracking, View::Advisor].into_iter().enumerate() {
        spans.push(Span::raw(" | "));
        let style = if view == app.view {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        };
        spans.push(Span::styled(format!("{} {}", i + 1, view.title()), style));
    }
    spans.push(Span::raw(" | "));
    spans.push(Span::styled(
        format!("Selected {}/{}", app.selection.len(), SELECTION_CAPACITY),
        Style::default().fg(Color::White),
    ));

    let header = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(header, area);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let hint = if app.conflict.is_some() {
        "Up/Down: choose coin to drop | Enter: replace | Esc: cancel"
    } else if app.info.is_some() {
        "Esc / i: close"
    } else if app.searching {
        "Type to filter | Enter: done | Esc: clear"
    } else {
        match app.view {
            View::Catalog => "Space: select | i: info | /: search | r: reload | Tab: next view | q: quit",
            View::Tracking => "x: remove | c: clear all | Tab: next view | q: quit",
            View::Advisor => "Enter: get recommendation | Tab: next view | q: quit",
        }
    };

    let mut spans = vec![
        Span::styled(" Controls: ", Style::default().fg(Color::Gray)),
        Span::styled(hint, Style::default().fg(Color::White)),
    ];
    if let Some(status) = &app.status {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(status.as_str(), Style::default().fg(Color::Green)));
    }

    let footer = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, area);
}

fn render_message(f: &mut Frame, msg: &str, color: Color, area: Rect) {
    let text = Paragraph::new(msg)
        .style(Style::default().fg(color))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(text, area);
}

fn render_catalog(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    let search_style = if app.searching {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::Gray)
    };
    let search = Paragraph::new(app.search.as_str())
        .style(search_style)
        .block(Block::default().borders(Borders::ALL).title(" Search "));
    f.render_widget(search, chunks[0]);

    let entries = match &app.listing {
        Listing::Loading => return render_message(f, "Loading coins...", Color::Gray, chunks[1]),
        Listing::Failed(e) => {
            let msg = format!("{}\n\nPress r to retry.", e);
            return render_message(f, &msg, Color::Red, chunks[1]);
        }
        Listing::Ready(_) => app.visible_entries(),
    };
    if entries.is_empty() {
        return render_message(f, "No coins match the search.", Color::Gray, chunks[1]);
    }

    let rows = entries.iter().map(|entry| {
        let selected = app.selection.contains(&entry.instrument.id);
        let change = entry.price_change_percentage_24h;
        let change_color = match change {
            Some(c) if c >= 0.0 => Color::Green,
            Some(_) => Color::Red,
            None => Color::Gray,
        };
        Row::new(vec![
            Cell::from(if selected { "[x]" } else { "[ ]" }),
            Cell::from(entry.instrument.ticker()),
            Cell::from(entry.instrument.name.clone()),
            Cell::from(entry.current_price.map_or("-".to_string(), format_price)),
            Cell::from(change.map_or("-".to_string(), |c| format!("{:+.2}%", c)))
                .style(Style::default().fg(change_color)),
        ])
        .style(if selected {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default()
        })
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(4),
            Constraint::Length(8),
            Constraint::Min(16),
            Constraint::Length(14),
            Constraint::Length(9),
        ],
    )
    .header(
        Row::new(vec!["", "Symbol", "Name", "Price", "24h"])
            .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD)),
    )
    .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Coins ({}) ", entries.len())),
    );

    let mut state = TableState::default().with_selected(Some(app.cursor));
    f.render_stateful_widget(table, chunks[1], &mut state);
}

fn render_tracking(f: &mut Frame, app: &App, area: Rect) {
    if app.selection.is_empty() {
        return render_message(
            f,
            "No coins selected. Pick up to 5 coins in the Coins view.",
            Color::Gray,
            area,
        );
    }

    let error_height = if app.session.last_error().is_some() { 3 } else { 0 };
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(error_height)])
        .split(area);
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(72), Constraint::Percentage(28)])
        .split(rows[0]);

    let table = app.chart_table();
    render_price_chart(f, app, &table, columns[0]);
    render_latest(f, app, columns[1]);

    if let Some(err) = app.session.last_error() {
        let error = Paragraph::new(format!("{} (will retry)", err))
            .style(Style::default().fg(Color::Red))
            .block(Block::default().borders(Borders::ALL).title(" Price Error "));
        f.render_widget(error, rows[1]);
    }
}

/// Each series is plotted as percent change from its first sample so coins of
/// very different prices share one axis.
fn render_price_chart(f: &mut Frame, app: &App, table: &ChartTable, area: Rect) {
    if table.is_empty() {
        let msg = match app.session.phase() {
            Phase::Polling => "Waiting for prices...",
            Phase::Idle => "Polling is stopped.",
        };
        return render_message(f, msg, Color::Gray, area);
    }

    let series: Vec<Vec<(f64, f64)>> = (0..table.columns.len())
        .map(|idx| {
            let points = table.column_points(idx);
            let base = points.first().map(|p| p.1).unwrap_or(1.0);
            points
                .into_iter()
                .map(|(x, price)| (x, (price / base - 1.0) * 100.0))
                .collect()
        })
        .collect();

    let (y_min, y_max) = series
        .iter()
        .flatten()
        .fold((f64::MAX, f64::MIN), |(lo, hi), (_, y)| (lo.min(*y), hi.max(*y)));
    let pad = ((y_max - y_min) * 0.1).max(0.05);
    let (y_min, y_max) = (y_min - pad, y_max + pad);
    let x_max = table.span_secs().max(1.0);

    let datasets = table
        .columns
        .iter()
        .zip(series.iter())
        .enumerate()
        .map(|(i, (column, points))| {
            Dataset::default()
                .name(column.key.as_str())
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(SERIES_COLORS[i % SERIES_COLORS.len()]))
                .data(points)
        })
        .collect::<Vec<_>>();

    let first_label = table.rows.first().map(|r| r.time_label()).unwrap_or_default();
    let last_label = table.rows.last().map(|r| r.time_label()).unwrap_or_default();

    let mut title = format!(" Last {} samples (% change) ", table.rows.len());
    if table.columns.len() == 1 {
        if let Some((lo, hi)) = table.price_bounds() {
            title = format!("{}| {} - {} ", title, format_price(lo), format_price(hi));
        }
    }

    let chart = Chart::new(datasets)
        .block(Block::default().title(title).borders(Borders::ALL))
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, x_max])
                .labels(vec![Span::raw(first_label), Span::raw(last_label)]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([y_min, y_max])
                .labels(vec![
                    Span::raw(format!("{:+.2}%", y_min)),
                    Span::raw(format!("{:+.2}%", (y_min + y_max) / 2.0)),
                    Span::raw(format!("{:+.2}%", y_max)),
                ]),
        );

    f.render_widget(chart, area);
}

fn render_latest(f: &mut Frame, app: &App, area: Rect) {
    let snapshot = app.session.snapshot();
    let items: Vec<ListItem> = app
        .selection
        .instruments()
        .iter()
        .enumerate()
        .map(|(i, instrument)| {
            let ticker = instrument.ticker();
            let price = snapshot
                .latest(&ticker)
                .map_or("--".to_string(), format_price);
            let mut spans = vec![
                Span::styled(
                    format!("{:<6}", ticker),
                    Style::default()
                        .fg(SERIES_COLORS[i % SERIES_COLORS.len()])
                        .add_modifier(Modifier::BOLD),
                ),
                Span::raw(price),
            ];
            if let Some(change) = snapshot.window_change_pct(&ticker) {
                let color = if change >= 0.0 { Color::Green } else { Color::Red };
                spans.push(Span::styled(format!(" {:+.3}%", change), Style::default().fg(color)));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items)
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .block(Block::default().borders(Borders::ALL).title(" Latest (USD) "));
    let mut state = ListState::default().with_selected(Some(app.cursor));
    f.render_stateful_widget(list, area, &mut state);
}

fn render_advisor(f: &mut Frame, app: &App, area: Rect) {
    if app.selection.is_empty() {
        return render_message(
            f,
            "No coins selected. Recommendations are available for selected coins.",
            Color::Gray,
            area,
        );
    }

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(area);

    let items: Vec<ListItem> = app
        .selection
        .instruments()
        .iter()
        .map(|instrument| {
            let (badge, color) = match app.book.state(&instrument.id) {
                CardState::Idle => ("     ", Color::Gray),
                CardState::Loading => (" ... ", Color::Yellow),
                CardState::Ready(rec) if rec.decision => (" BUY ", Color::Green),
                CardState::Ready(_) => (" NO  ", Color::Red),
                CardState::Failed(_) => (" ERR ", Color::Red),
            };
            ListItem::new(Line::from(vec![
                Span::styled(badge, Style::default().fg(color).add_modifier(Modifier::BOLD)),
                Span::raw(format!(" {} ({})", instrument.name, instrument.ticker())),
            ]))
        })
        .collect();

    let list = List::new(items)
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .block(Block::default().borders(Borders::ALL).title(" Selected Coins "));
    let mut state = ListState::default().with_selected(Some(app.cursor));
    f.render_stateful_widget(list, columns[0], &mut state);

    let Some(instrument) = app.highlighted_selected() else {
        return;
    };
    let (body, color) = match app.book.state(&instrument.id) {
        CardState::Idle => ("Press Enter to ask for a recommendation.".to_string(), Color::Gray),
        CardState::Loading => ("Analyzing market data...".to_string(), Color::Yellow),
        CardState::Ready(rec) => {
            let verdict = if rec.decision { "Recommended to buy" } else { "Not recommended to buy" };
            (format!("{}\n\n{}", verdict, rec.rationale), Color::White)
        }
        CardState::Failed(e) => (e.clone(), Color::Red),
    };
    let card = Paragraph::new(body)
        .style(Style::default().fg(color))
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" {} ", instrument.name)),
        );
    f.render_widget(card, columns[1]);
}

fn render_conflict(f: &mut Frame, dialog: &ConflictDialog, area: Rect) {
    let height = dialog.conflict.current.len() as u16 + 4;
    let popup = centered(area, 50, height);

    let items: Vec<ListItem> = dialog
        .conflict
        .current
        .iter()
        .map(|i| ListItem::new(format!(" {} ({})", i.name, i.ticker())))
        .collect();
    let list = List::new(items)
        .highlight_style(Style::default().fg(Color::Black).bg(Color::Yellow))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow))
                .title(format!(
                    " Selection full: replace which coin with {}? ",
                    dialog.conflict.attempted.name
                )),
        );
    let mut state = ListState::default().with_selected(Some(dialog.cursor));

    f.render_widget(Clear, popup);
    f.render_stateful_widget(list, popup, &mut state);
}

/// Current price in the three currencies the details endpoint reports.
fn render_info(f: &mut Frame, app: &App, panel: &InfoPanel, area: Rect) {
    let popup = centered(area, 40, 7);
    let lines: Vec<Line> = match app.details.state(&panel.coin_id) {
        InfoState::Idle | InfoState::Loading => vec![Line::from(Span::styled(
            "Loading...",
            Style::default().fg(Color::Gray),
        ))],
        InfoState::Failed(e) => vec![Line::from(Span::styled(
            e.clone(),
            Style::default().fg(Color::Red),
        ))],
        InfoState::Ready(details) => {
            let prices = details
                .market_data
                .as_ref()
                .map(|m| m.current_price.clone())
                .unwrap_or_default();
            [("USD", "$", prices.usd), ("EUR", "€", prices.eur), ("ILS", "₪", prices.ils)]
                .into_iter()
                .map(|(code, sign, value)| {
                    Line::from(vec![
                        Span::styled(format!(" {:<5}", code), Style::default().fg(Color::Gray)),
                        Span::raw(value.map_or("--".to_string(), |v| format_amount(sign, v))),
                    ])
                })
                .collect()
        }
    };

    let info = Paragraph::new(lines).wrap(Wrap { trim: true }).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(format!(" {} ", panel.name)),
    );
    f.render_widget(Clear, popup);
    f.render_widget(info, popup);
}

fn centered(area: Rect, width_pct: u16, height: u16) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Fill(1),
            Constraint::Length(height),
            Constraint::Fill(1),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - width_pct) / 2),
            Constraint::Percentage(width_pct),
            Constraint::Percentage((100 - width_pct) / 2),
        ])
        .split(vertical[1])[1]
}

fn format_price(price: f64) -> String {
    format_amount("$", price)
}

fn format_amount(sign: &str, amount: f64) -> String {
    if amount >= 1.0 {
        format!("{}{:.2}", sign, amount)
    } else {
        format!("{}{:.6}", sign, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_price_keeps_small_coins_readable() {
        assert_eq!(format_price(50000.0), "$50000.00");
        assert_eq!(format_price(0.000123), "$0.000123");
        assert_eq!(format_amount("€", 46000.5), "€46000.50");
    }

    #[test]
    fn test_centered_popup_fits() {
        let area = Rect::new(0, 0, 100, 40);
        let popup = centered(area, 50, 9);
        assert_eq!(popup.height, 9);
        assert_eq!(popup.width, 50);
        assert_eq!(popup.x, 25);
    }
}
