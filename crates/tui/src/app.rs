use std::{cmp, io, thread, time::Duration};

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use resync_core::{Snapshot, SortDescriptor};
use tokio::{spawn, sync::mpsc};
use tracing::{error, info};

use crate::cities::{City, CityService, NewCity};

const TICK_RATE: Duration = Duration::from_millis(250);
const MAX_NAME_LEN: usize = 48;

/// Named sort orders cycled with `s`.
fn sort_presets() -> Vec<(&'static str, Vec<SortDescriptor>)> {
    vec![
        (
            "population ↓",
            vec![
                SortDescriptor::descending("population"),
                SortDescriptor::ascending("name"),
            ],
        ),
        ("population ↑", vec![SortDescriptor::ascending("population")]),
        ("name", vec![SortDescriptor::ascending("name")]),
        (
            "founded",
            vec![
                SortDescriptor::ascending("founded"),
                SortDescriptor::ascending("name"),
            ],
        ),
    ]
}

/// Preset index, title label and descriptors for the configured sort.
///
/// An order matching no preset is shown as its descriptors until the user
/// cycles to a preset.
fn initial_sort(configured: Vec<SortDescriptor>) -> (Option<usize>, String, Vec<SortDescriptor>) {
    let presets = sort_presets();
    if configured.is_empty() {
        let (label, descriptors) = presets[0].clone();
        return (Some(0), label.to_string(), descriptors);
    }
    match presets
        .iter()
        .position(|(_, descriptors)| *descriptors == configured)
    {
        Some(index) => (Some(index), presets[index].0.to_string(), configured),
        None => (None, describe_sort(&configured), configured),
    }
}

fn describe_sort(descriptors: &[SortDescriptor]) -> String {
    descriptors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

enum AppEvent {
    Input(Event),
    Tick,
    Finished(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptKind {
    Add,
    Rename(u64),
}

struct NamePrompt {
    kind: PromptKind,
    input: String,
}

impl NamePrompt {
    fn title(&self) -> &'static str {
        match self.kind {
            PromptKind::Add => "Add city",
            PromptKind::Rename(_) => "Rename city",
        }
    }
}

/// Terminal screen showing the cached cities of one region.
pub struct CitiesApp {
    service: CityService,
    region: u64,
    cities: Snapshot<City>,
    cursor: usize,
    sort_index: Option<usize>,
    sort_label: String,
    status: String,
    pending: usize,
    prompt: Option<NamePrompt>,
    event_tx: Option<mpsc::Sender<AppEvent>>,
    should_quit: bool,
}

impl CitiesApp {
    pub fn new(service: CityService, region: u64, sort: Vec<SortDescriptor>) -> Self {
        let (sort_index, sort_label, sort) = initial_sort(sort);
        service.set_sort(sort);
        Self {
            service,
            region,
            cities: Snapshot::default(),
            cursor: 0,
            sort_index,
            sort_label,
            status: String::from("Press r to load cities"),
            pending: 0,
            prompt: None,
            event_tx: None,
            should_quit: false,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let (subscription, mut snapshots) = self.service.watch();

        let mut stdout = io::stdout();
        enable_raw_mode().context("failed to enter raw mode")?;
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).context("failed to create terminal")?;
        terminal.hide_cursor()?;
        terminal.clear()?;

        let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(128);
        spawn_input_thread(event_tx.clone());
        self.event_tx = Some(event_tx);
        self.reload();

        loop {
            terminal.draw(|frame| self.draw(frame))?;
            if self.should_quit {
                break;
            }

            tokio::select! {
                maybe_event = event_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }
                Some(snapshot) = snapshots.recv() => self.apply_snapshot(snapshot),
            }
        }

        self.service.unwatch(subscription);
        restore_terminal(&mut terminal)?;
        self.event_tx = None;
        Ok(())
    }

    fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Input(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                if self.prompt.is_some() {
                    self.handle_prompt_key(key);
                } else {
                    self.handle_key(key);
                }
            }
            AppEvent::Input(_) | AppEvent::Tick => {}
            AppEvent::Finished(message) => {
                self.pending = self.pending.saturating_sub(1);
                self.status = message;
            }
        }
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot<City>) {
        let selected = self.selected().map(|city| city.id);
        self.cities = snapshot;
        // Follow the selected city when a re-sort moves it.
        if let Some(index) = selected.and_then(|id| self.cities.iter().position(|c| c.id == id)) {
            self.cursor = index;
        }
        self.cursor = self.cursor.min(self.cities.len().saturating_sub(1));
    }

    fn selected(&self) -> Option<&City> {
        self.cities.get(self.cursor)
    }

    fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true
            }
            KeyCode::Up | KeyCode::Char('k') => self.cursor = self.cursor.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => {
                if self.cursor + 1 < self.cities.len() {
                    self.cursor += 1;
                }
            }
            KeyCode::Home => self.cursor = 0,
            KeyCode::End => self.cursor = self.cities.len().saturating_sub(1),
            KeyCode::Char('r') => self.reload(),
            KeyCode::Char('s') => self.cycle_sort(),
            KeyCode::Char('c') => {
                self.service.forget_all();
                self.status = "Cache cleared".to_string();
            }
            KeyCode::Char('a') => {
                self.prompt = Some(NamePrompt {
                    kind: PromptKind::Add,
                    input: String::new(),
                })
            }
            KeyCode::Char('e') => {
                if let Some(city) = self.selected() {
                    self.prompt = Some(NamePrompt {
                        kind: PromptKind::Rename(city.id),
                        input: city.name.clone(),
                    });
                }
            }
            KeyCode::Char('u') => {
                if let Some(city) = self.selected().cloned() {
                    let service = self.service.clone();
                    let region = self.region;
                    self.run_operation(format!("Refreshing {}", city.name), async move {
                        service
                            .refresh_city(region, city.id)
                            .await
                            .map(|fresh| format!("Refreshed {}", fresh.name))
                    });
                }
            }
            KeyCode::Char('d') | KeyCode::Delete => {
                if let Some(city) = self.selected().cloned() {
                    let service = self.service.clone();
                    let region = self.region;
                    self.run_operation(format!("Deleting {}", city.name), async move {
                        service
                            .remove_city(region, city.id)
                            .await
                            .map(|_| format!("Deleted {}", city.name))
                    });
                }
            }
            _ => {}
        }
    }

    fn handle_prompt_key(&mut self, key: KeyEvent) {
        let Some(prompt) = self.prompt.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Esc => self.prompt = None,
            KeyCode::Backspace => {
                prompt.input.pop();
            }
            KeyCode::Char(ch) if prompt.input.chars().count() < MAX_NAME_LEN => {
                prompt.input.push(ch);
            }
            KeyCode::Enter => {
                if let Some(prompt) = self.prompt.take() {
                    self.submit_prompt(prompt);
                }
            }
            _ => {}
        }
    }

    fn submit_prompt(&mut self, prompt: NamePrompt) {
        let name = prompt.input.trim().to_string();
        if name.is_empty() {
            self.status = "Name must not be empty".to_string();
            return;
        }
        let service = self.service.clone();
        let region = self.region;
        match prompt.kind {
            PromptKind::Add => {
                let city = NewCity {
                    name: name.clone(),
                    population: 0,
                    founded: None,
                };
                self.run_operation(format!("Adding {name}"), async move {
                    service
                        .add_city(region, &city)
                        .await
                        .map(|created| format!("Added {} (#{})", created.name, created.id))
                });
            }
            PromptKind::Rename(id) => {
                self.run_operation(format!("Renaming to {name}"), async move {
                    service
                        .rename_city(region, id, &name)
                        .await
                        .map(|renamed| format!("Renamed to {}", renamed.name))
                });
            }
        }
    }

    fn reload(&mut self) {
        let service = self.service.clone();
        let region = self.region;
        self.run_operation(format!("Loading region {region}"), async move {
            service
                .load_cities(region)
                .await
                .map(|cities| format!("Loaded {} cities", cities.len()))
        });
    }

    fn cycle_sort(&mut self) {
        let presets = sort_presets();
        let index = self.sort_index.map_or(0, |index| (index + 1) % presets.len());
        let (label, descriptors) = presets[index].clone();
        self.sort_index = Some(index);
        self.sort_label = label.to_string();
        self.service.set_sort(descriptors);
        info!(sort = label, "sort order changed");
        // The cache only re-sorts on its next write.
        self.reload();
    }

    fn run_operation<F>(&mut self, label: String, operation: F)
    where
        F: std::future::Future<Output = resync_core::CrudResult<String>> + Send + 'static,
    {
        let Some(sender) = self.event_tx.clone() else {
            return;
        };
        self.pending += 1;
        self.status = format!("{label}…");
        spawn(async move {
            let message = match operation.await {
                Ok(message) => message,
                Err(err) => {
                    error!("{label} failed: {err}");
                    format!("{label} failed: {err}")
                }
            };
            let _ = sender.send(AppEvent::Finished(message)).await;
        });
    }

    fn draw(&mut self, frame: &mut Frame) {
        let size = frame.size();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(5), Constraint::Length(4)])
            .split(size);

        self.render_city_list(frame, chunks[0]);
        self.render_status(frame, chunks[1]);
        if let Some(prompt) = &self.prompt {
            render_prompt(frame, prompt);
        }
    }

    fn render_city_list(&self, frame: &mut Frame, area: Rect) {
        let mut list_state = ListState::default();
        if !self.cities.is_empty() {
            list_state.select(Some(self.cursor));
        }
        let items: Vec<ListItem> = self
            .cities
            .iter()
            .map(|city| {
                let mut line = vec![
                    Span::styled(
                        format!("{:<24}", city.name),
                        Style::default().add_modifier(Modifier::BOLD),
                    ),
                    Span::raw(format!("{:>12}", format_population(city.population))),
                ];
                if let Some(founded) = &city.founded {
                    line.push(Span::styled(
                        format!("  founded {founded}"),
                        Style::default().fg(Color::DarkGray),
                    ));
                }
                ListItem::new(Line::from(line))
            })
            .collect();

        let title = format!(
            "Region {} · {} cities · sort: {}",
            self.region,
            self.cities.len(),
            self.sort_label
        );
        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(
                Style::default()
                    .bg(Color::DarkGray)
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");
        frame.render_stateful_widget(list, area, &mut list_state);
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        let busy = if self.pending > 0 {
            format!("  ({} in flight)", self.pending)
        } else {
            String::new()
        };
        let help = Line::from(vec![
            Span::styled("r", Style::default().fg(Color::Cyan)),
            Span::raw(" reload  "),
            Span::styled("s", Style::default().fg(Color::Cyan)),
            Span::raw(" sort  "),
            Span::styled("a", Style::default().fg(Color::Cyan)),
            Span::raw(" add  "),
            Span::styled("e", Style::default().fg(Color::Cyan)),
            Span::raw(" rename  "),
            Span::styled("u", Style::default().fg(Color::Cyan)),
            Span::raw(" refresh  "),
            Span::styled("d", Style::default().fg(Color::Cyan)),
            Span::raw(" delete  "),
            Span::styled("c", Style::default().fg(Color::Cyan)),
            Span::raw(" clear  "),
            Span::styled("q", Style::default().fg(Color::Cyan)),
            Span::raw(" quit"),
        ]);
        let paragraph = Paragraph::new(vec![Line::from(format!("{}{busy}", self.status)), help])
            .block(Block::default().borders(Borders::ALL).title("Status"))
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }
}

fn render_prompt(frame: &mut Frame, prompt: &NamePrompt) {
    let frame_area = frame.size();
    let width = cmp::max(cmp::min(60_u16, frame_area.width.saturating_sub(4)), 24_u16);
    let area = centered_rect(width, 5, frame_area);
    frame.render_widget(Clear, area);

    let input_line = Line::from(vec![
        Span::styled("> ", Style::default().fg(Color::Cyan)),
        Span::raw(prompt.input.clone()),
    ]);
    let helper = Line::from(vec![
        Span::styled("Enter", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(" save  "),
        Span::styled("Esc", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(" cancel"),
    ]);
    let paragraph = Paragraph::new(vec![input_line, Line::from(""), helper])
        .block(Block::default().borders(Borders::ALL).title(prompt.title()));
    frame.render_widget(paragraph, area);

    let cursor_x = (area.x + 3 + prompt.input.chars().count() as u16)
        .min(area.x + area.width.saturating_sub(2));
    frame.set_cursor(cursor_x, area.y + 1);
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor()?;
    Ok(())
}

fn spawn_input_thread(sender: mpsc::Sender<AppEvent>) {
    thread::spawn(move || loop {
        match event::poll(TICK_RATE) {
            Ok(true) => match event::read() {
                Ok(evt) => {
                    if sender.blocking_send(AppEvent::Input(evt)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
            Ok(false) => {
                if sender.blocking_send(AppEvent::Tick).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    });
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn format_population(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }
    grouped
}
