//! Parking display - live dashboard for the parking controller
//!
//! Subscribes to the controller's MQTT topics and displays:
//! - Slot grid (available/occupied, local time of the last change)
//! - Session history, with deletion of the selected record
//! - The most recent event as a toast
//!
//! Keys: Up/Down select a history row, `d` deletes it, `q` quits.

use chrono::{DateTime, Local};
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use parking_controller::domain::types::StoredRecord;
use parking_controller::infra::Config;
use parking_controller::io::mqtt::{mqtt_options, DeleteRequest};
use parking_controller::io::mqtt_egress::{EventPayload, HistoryPayload, SlotTime, StatePayload};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use rumqttc::{AsyncClient, Event as MqttEvent, Packet, QoS};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// How long an event stays on screen
const TOAST_TTL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "parking-display", version, about = "Live parking dashboard")]
struct Args {
    /// Controller config; broker address and topic names are read from it
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[derive(Debug)]
struct Toast {
    msg: String,
    received: Instant,
}

/// Dashboard state shared between MQTT handler and UI
#[derive(Debug, Default)]
struct DashboardState {
    slots: Vec<(u8, Option<bool>, SlotTime)>,
    history: Vec<StoredRecord>,
    selected: Option<usize>,
    toast: Option<Toast>,
    connected: bool,
    last_message: Option<Instant>,
}

impl DashboardState {
    fn update_state(&mut self, payload: StatePayload) {
        let mut slots: Vec<_> = payload
            .info
            .into_iter()
            .filter_map(|(key, slot)| {
                let id = key.strip_prefix("slot_")?.parse().ok()?;
                Some((id, slot.vacant, slot.time))
            })
            .collect();
        slots.sort_by_key(|(id, _, _)| *id);
        self.slots = slots;
        self.last_message = Some(Instant::now());
    }

    fn update_history(&mut self, payload: HistoryPayload) {
        // Keep the selection on the same record when rows shift
        let selected_id = self.selected_record().map(|r| r.id);
        self.history = payload.history;
        self.selected = match selected_id {
            Some(id) => self
                .history
                .iter()
                .position(|r| r.id == id)
                .or_else(|| (!self.history.is_empty()).then_some(0)),
            None if !self.history.is_empty() => Some(0),
            None => None,
        };
        self.last_message = Some(Instant::now());
    }

    fn show_event(&mut self, event: EventPayload) {
        self.toast = Some(Toast { msg: event.msg, received: Instant::now() });
        self.last_message = Some(Instant::now());
    }

    fn select_next(&mut self) {
        if self.history.is_empty() {
            return;
        }
        self.selected = Some(match self.selected {
            Some(i) => (i + 1).min(self.history.len() - 1),
            None => 0,
        });
    }

    fn select_previous(&mut self) {
        if let Some(i) = self.selected {
            self.selected = Some(i.saturating_sub(1));
        }
    }

    fn selected_record(&self) -> Option<&StoredRecord> {
        self.selected.and_then(|i| self.history.get(i))
    }
}

type SharedState = Arc<Mutex<DashboardState>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    let client_id = format!("parking-display-{}", std::process::id());
    let (client, eventloop) = AsyncClient::new(mqtt_options(&config, &client_id), 100);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let state = Arc::new(Mutex::new(DashboardState::default()));

    let mqtt_state = state.clone();
    let mqtt_client = client.clone();
    let mqtt_config = config.clone();
    let mqtt_handle = tokio::spawn(async move {
        run_mqtt_subscriber(&mqtt_config, mqtt_client, eventloop, mqtt_state).await;
    });

    let result = run_ui(&mut terminal, state, client, config.delete_topic()).await;

    mqtt_handle.abort();
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_mqtt_subscriber(
    config: &Config,
    client: AsyncClient,
    mut eventloop: rumqttc::EventLoop,
    state: SharedState,
) {
    loop {
        match eventloop.poll().await {
            Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                for topic in [config.state_topic(), config.history_topic(), config.events_topic()] {
                    let _ = client.subscribe(topic, QoS::AtMostOnce).await;
                }
                state.lock().await.connected = true;
            }
            Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                let topic = publish.topic.as_str();
                let mut s = state.lock().await;

                if topic == config.state_topic() {
                    if let Ok(payload) = serde_json::from_slice::<StatePayload>(&publish.payload) {
                        s.update_state(payload);
                    }
                } else if topic == config.history_topic() {
                    if let Ok(payload) = serde_json::from_slice::<HistoryPayload>(&publish.payload) {
                        s.update_history(payload);
                    }
                } else if topic == config.events_topic() {
                    if let Ok(payload) = serde_json::from_slice::<EventPayload>(&publish.payload) {
                        s.show_event(payload);
                    }
                }
            }
            Ok(_) => {}
            Err(_) => {
                state.lock().await.connected = false;
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn run_ui(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: SharedState,
    client: AsyncClient,
    delete_topic: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let tick_rate = Duration::from_secs(1);
    let mut last_tick = Instant::now();

    loop {
        let s = state.lock().await;
        terminal.draw(|f| draw_ui(f, &s))?;
        drop(s);

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let mut s = state.lock().await;
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Down | KeyCode::Char('j') => s.select_next(),
                        KeyCode::Up | KeyCode::Char('k') => s.select_previous(),
                        KeyCode::Char('d') | KeyCode::Delete => {
                            if let Some(record) = s.selected_record() {
                                let request = DeleteRequest { delete: record.id };
                                let body = serde_json::to_vec(&request)?;
                                client.publish(delete_topic, QoS::AtLeastOnce, false, body).await?;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }
    }
}

fn local_time(epoch: u64) -> String {
    i64::try_from(epoch)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

fn draw_ui(f: &mut Frame, state: &DashboardState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),                                  // Header
            Constraint::Length(state.slots.len().max(1) as u16 + 3), // Slots
            Constraint::Min(0),                                     // History
            Constraint::Length(3),                                  // Toast
        ])
        .split(f.area());

    draw_header(f, chunks[0], state);
    draw_slots(f, chunks[1], state);
    draw_history(f, chunks[2], state);
    draw_toast(f, chunks[3], state);
}

fn draw_header(f: &mut Frame, area: Rect, state: &DashboardState) {
    let status_color = if state.connected { Color::Green } else { Color::Red };
    let status_text = if state.connected { "CONNECTED" } else { "DISCONNECTED" };

    let last_msg = state
        .last_message
        .map(|t| format!("{}s ago", t.elapsed().as_secs()))
        .unwrap_or_else(|| "never".to_string());
    let free = state.slots.iter().filter(|(_, vacant, _)| *vacant == Some(true)).count();

    let header = Paragraph::new(Line::from(vec![
        Span::styled("Parking ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw("| "),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw(" | Last: "),
        Span::raw(last_msg),
        Span::raw(" | Free: "),
        Span::styled(
            format!("{}/{}", free, state.slots.len()),
            Style::default().fg(Color::Yellow),
        ),
        Span::raw(" | 'd' delete, 'q' quit"),
    ]))
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(header, area);
}

fn draw_slots(f: &mut Frame, area: Rect, state: &DashboardState) {
    let rows: Vec<Row> = state
        .slots
        .iter()
        .map(|(id, vacant, time)| {
            let (label, color) = match vacant {
                Some(true) => ("Available", Color::Green),
                Some(false) => ("Occupied", Color::Red),
                None => ("Unknown", Color::DarkGray),
            };
            let since = match time {
                SlotTime::At(t) => local_time(*t),
                SlotTime::NotAvailable(s) => s.clone(),
            };
            Row::new(vec![
                Cell::from(format!("Slot {id}")),
                Cell::from(Span::styled(label, Style::default().fg(color))),
                Cell::from(since),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(8),  // Slot
            Constraint::Length(10), // Status
            Constraint::Min(19),    // Since
        ],
    )
    .header(
        Row::new(vec!["Slot", "Status", "Since"])
            .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
    )
    .block(
        Block::default()
            .title(" Slots ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Blue)),
    );

    f.render_widget(table, area);
}

fn draw_history(f: &mut Frame, area: Rect, state: &DashboardState) {
    let rows: Vec<Row> = state
        .history
        .iter()
        .map(|stored| {
            let r = &stored.record;
            let charge_style = if r.flagged {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default()
            };
            Row::new(vec![
                Cell::from(stored.id.to_string()),
                Cell::from(r.slot_id.to_string()),
                Cell::from(local_time(r.entry_time)),
                Cell::from(local_time(r.exit_time)),
                Cell::from(Span::styled(format!("Rs. {}", r.charge), charge_style)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(6),  // Id
            Constraint::Length(5),  // Slot
            Constraint::Length(20), // Entry
            Constraint::Length(20), // Exit
            Constraint::Min(10),    // Charge
        ],
    )
    .header(
        Row::new(vec!["Id", "Slot", "Entry", "Exit", "Charge"])
            .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
    )
    .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED))
    .block(
        Block::default()
            .title(format!(" History ({}) ", state.history.len()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)),
    );

    let mut table_state = TableState::default().with_selected(state.selected);
    f.render_stateful_widget(table, area, &mut table_state);
}

fn draw_toast(f: &mut Frame, area: Rect, state: &DashboardState) {
    let text = match &state.toast {
        Some(toast) if toast.received.elapsed() < TOAST_TTL => {
            Span::styled(toast.msg.clone(), Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
        }
        _ => Span::styled("-", Style::default().fg(Color::DarkGray)),
    };

    let toast = Paragraph::new(Line::from(text)).block(
        Block::default()
            .title(" Latest event ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)),
    );

    f.render_widget(toast, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_controller::domain::types::{HistoryRecord, RecordId, SlotId};

    fn stored(id: u64) -> StoredRecord {
        StoredRecord {
            id: RecordId(id),
            record: HistoryRecord {
                session_id: format!("s{id}"),
                slot_id: SlotId(1),
                entry_time: 0,
                exit_time: 10,
                charge: 10,
                flagged: false,
            },
        }
    }

    #[test]
    fn test_slots_sorted_numerically() {
        let payload: StatePayload = serde_json::from_str(
            r#"{"info":{"slot_10":{"vacant":true,"time":"N/A"},"slot_2":{"vacant":false,"time":5}}}"#,
        )
        .unwrap();
        let mut state = DashboardState::default();
        state.update_state(payload);
        let ids: Vec<u8> = state.slots.iter().map(|(id, _, _)| *id).collect();
        assert_eq!(ids, vec![2, 10]);
    }

    #[test]
    fn test_selection_follows_record_across_updates() {
        let mut state = DashboardState::default();
        state.update_history(HistoryPayload { history: vec![stored(3), stored(2), stored(1)] });
        assert_eq!(state.selected, Some(0));
        state.select_next();
        assert_eq!(state.selected_record().map(|r| r.id), Some(RecordId(2)));

        // A new session is prepended
        state.update_history(HistoryPayload {
            history: vec![stored(4), stored(3), stored(2), stored(1)],
        });
        assert_eq!(state.selected_record().map(|r| r.id), Some(RecordId(2)));

        // The selected record is deleted
        state.update_history(HistoryPayload { history: vec![stored(4), stored(3), stored(1)] });
        assert_eq!(state.selected, Some(0));

        state.update_history(HistoryPayload { history: vec![] });
        assert_eq!(state.selected, None);
        state.select_next();
        assert_eq!(state.selected, None);
    }
}
