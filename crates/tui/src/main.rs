//! vodkeeper dashboard
//!
//! Terminal view of the daemon's jobs and the retention schedule.
//! Polls `/status` and `/job/list` on the daemon's HTTP API, by default at
//! http://127.0.0.1:3626. Pass another base URL as the first argument or in
//! `VTOP_URL`.

use chrono::{DateTime, NaiveDateTime, Utc};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, Wrap},
    Frame, Terminal,
};
use serde::{de::DeserializeOwned, Deserialize};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    io::{self, Stdout},
    time::{Duration, Instant},
};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3626";
const POLL_INTERVAL_MS: u64 = 1000;
const MAX_EVENT_LOG_ENTRIES: usize = 100;

// ============================================================================
// Data Models (the subset of the daemon's JSON the dashboard reads)
// ============================================================================

/// Response envelope used by every endpoint
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Envelope<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    pub title: String,
    pub user: String,
    #[serde(default)]
    pub enc_codec: Option<String>,
    #[serde(default)]
    pub enc_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub enc_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_seconds: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub stage: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PendingView {
    pub name: String,
    pub deadline: NaiveDateTime,
    pub hours_left: f64,
    #[serde(default)]
    pub warned_threshold: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RetentionView {
    #[serde(default)]
    pub pending: Vec<PendingView>,
    #[serde(default)]
    pub blacklisted: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StatusView {
    pub total_jobs: usize,
    #[serde(default)]
    pub jobs_by_stage: BTreeMap<String, usize>,
    #[serde(default)]
    pub running: Vec<JobView>,
    #[serde(default)]
    pub retention: Option<RetentionView>,
}

/// Encode time of a job as H:MM:SS.
fn encode_time(job: &JobView) -> Option<String> {
    let (start, end) = (job.enc_start?, job.enc_end?);
    let secs = (end - start).num_seconds().max(0);
    Some(format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60))
}

// ============================================================================
// App State
// ============================================================================

pub struct App {
    pub base_url: String,
    pub status: Option<StatusView>,
    pub jobs: Vec<JobView>,
    /// Stage changes and connection events, oldest first
    pub event_log: VecDeque<String>,
    /// Last seen stage per job id
    stages: HashMap<String, String>,
    pub connected: bool,
    client: reqwest::Client,
}

impl App {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            status: None,
            jobs: Vec::new(),
            event_log: VecDeque::with_capacity(MAX_EVENT_LOG_ENTRIES),
            stages: HashMap::new(),
            connected: false,
            client: reqwest::Client::new(),
        }
    }

    pub fn log_event(&mut self, event: String) {
        if self.event_log.len() >= MAX_EVENT_LOG_ENTRIES {
            self.event_log.pop_front();
        }
        self.event_log.push_back(event);
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, String> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| format!("JSON parse error: {}", e))?;
        match (envelope.data, envelope.error) {
            (Some(data), _) => Ok(data),
            (None, Some(error)) => Err(error),
            (None, None) => Err(format!("{} returned no data", path)),
        }
    }

    /// Poll both endpoints and record what changed.
    pub async fn refresh(&mut self) {
        let fetched = match self.get::<StatusView>("/status").await {
            Ok(status) => self.get::<Vec<JobView>>("/job/list").await.map(|jobs| (status, jobs)),
            Err(e) => Err(e),
        };
        match fetched {
            Ok((status, jobs)) => {
                if !self.connected {
                    self.log_event(format!("Connected to {}", self.base_url));
                }
                self.connected = true;
                self.apply(status, jobs);
            }
            Err(e) => {
                if self.connected {
                    self.log_event(format!("Connection lost: {}", e));
                }
                self.connected = false;
            }
        }
    }

    /// Take a new poll result, logging every stage change.
    pub fn apply(&mut self, status: StatusView, jobs: Vec<JobView>) {
        for event in stage_changes(&self.stages, &jobs) {
            self.log_event(event);
        }
        self.stages = jobs
            .iter()
            .map(|job| (job.id.clone(), job.stage.clone()))
            .collect();
        self.status = Some(status);
        self.jobs = jobs;
    }
}

/// Log lines for jobs that are new or whose stage moved since `seen`.
fn stage_changes(seen: &HashMap<String, String>, jobs: &[JobView]) -> Vec<String> {
    jobs.iter()
        .filter_map(|job| match seen.get(&job.id) {
            None => Some(format!("{}: {}", job.title, job.stage)),
            Some(prev) if *prev != job.stage => {
                Some(format!("{}: {} -> {}", job.title, prev, job.stage))
            }
            Some(_) => None,
        })
        .collect()
}

// ============================================================================
// Terminal Setup/Teardown
// ============================================================================

fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    Terminal::new(CrosstermBackend::new(stdout))
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

// ============================================================================
// Widget Rendering
// ============================================================================

fn header(cells: &[&'static str]) -> Row<'static> {
    Row::new(
        cells
            .iter()
            .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))),
    )
    .height(1)
    .bottom_margin(1)
}

fn stage_color(stage: &str) -> Color {
    match stage {
        "failed" | "delete_failed" => Color::Red,
        "ignored" => Color::DarkGray,
        "encoding" | "trimming" | "deleting" => Color::Cyan,
        "deleted" => Color::Green,
        _ => Color::White,
    }
}

fn render_jobs_table(f: &mut Frame, area: Rect, app: &App) {
    let rows: Vec<Row> = app
        .jobs
        .iter()
        .rev()
        .map(|job| {
            let trim = job
                .start_seconds
                .map(|s| format!("{}s", s))
                .unwrap_or_else(|| "-".to_string());
            Row::new(vec![
                Cell::from(job.title.clone()),
                Cell::from(job.user.clone()),
                Cell::from(job.enc_codec.clone().unwrap_or_else(|| "-".to_string())),
                Cell::from(job.stage.clone()).style(Style::default().fg(stage_color(&job.stage))),
                Cell::from(trim),
                Cell::from(encode_time(job).unwrap_or_else(|| "-".to_string())),
                Cell::from(job.error.clone().unwrap_or_default()),
            ])
        })
        .collect();

    let widths = [
        Constraint::Percentage(28),
        Constraint::Length(14),
        Constraint::Length(6),
        Constraint::Length(13),
        Constraint::Length(7),
        Constraint::Length(9),
        Constraint::Min(10),
    ];
    let title = if app.connected { " Jobs " } else { " Jobs (Disconnected) " };
    let table = Table::new(rows, widths)
        .header(header(&["Title", "User", "Codec", "Stage", "Trim", "Encode", "Error"]))
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(table, area);
}

fn render_retention_table(f: &mut Frame, area: Rect, app: &App) {
    let retention = app.status.as_ref().and_then(|s| s.retention.as_ref());
    let Some(retention) = retention else {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Retention (cleaner disabled) ");
        f.render_widget(block, area);
        return;
    };

    let rows: Vec<Row> = retention
        .pending
        .iter()
        .map(|p| {
            let style = if p.hours_left <= 12.0 {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };
            Row::new(vec![
                Cell::from(p.name.clone()),
                Cell::from(p.deadline.format("%Y-%m-%d %H:%M").to_string()),
                Cell::from(format!("{:.1}", p.hours_left)).style(style),
                Cell::from(
                    p.warned_threshold
                        .map(|t| format!("{}h", t))
                        .unwrap_or_else(|| "-".to_string()),
                ),
            ])
        })
        .collect();

    let widths = [
        Constraint::Min(20),
        Constraint::Length(20),
        Constraint::Length(8),
        Constraint::Length(7),
    ];
    let title = format!(
        " Retention ({} pending, {} blacklisted) ",
        retention.pending.len(),
        retention.blacklisted
    );
    let table = Table::new(rows, widths)
        .header(header(&["Recording", "Deadline", "Hours", "Warned"]))
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(table, area);
}

fn render_event_log(f: &mut Frame, area: Rect, app: &App) {
    let events: Vec<Line> = app
        .event_log
        .iter()
        .rev()
        .take((area.height as usize).saturating_sub(2))
        .map(|e| Line::from(e.as_str()))
        .collect();

    let paragraph = Paragraph::new(events)
        .block(Block::default().borders(Borders::ALL).title(" Event Log "))
        .wrap(Wrap { trim: true });
    f.render_widget(paragraph, area);
}

fn status_line(app: &App) -> String {
    match &app.status {
        Some(status) if app.connected => {
            let count = |stage: &str| status.jobs_by_stage.get(stage).copied().unwrap_or(0);
            format!(
                " {} | Jobs: {} | Running: {} | Deleted: {} | Failed: {} | Ignored: {} | Press 'q' to quit ",
                app.base_url,
                status.total_jobs,
                status.running.len(),
                count("deleted"),
                count("failed") + count("delete_failed"),
                count("ignored"),
            )
        }
        _ => format!(" Connecting to {}... | Press 'q' to quit ", app.base_url),
    }
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let paragraph = Paragraph::new(status_line(app))
        .style(Style::default().fg(Color::White).bg(Color::DarkGray));
    f.render_widget(paragraph, area);
}

// ============================================================================
// Main UI Layout
// ============================================================================

fn ui(f: &mut Frame, app: &App) {
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(f.area());

    let content_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(main_chunks[0]);

    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(content_chunks[0]);

    render_jobs_table(f, left_chunks[0], app);
    render_event_log(f, left_chunks[1], app);
    render_retention_table(f, content_chunks[1], app);
    render_status_bar(f, main_chunks[1], app);
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("VTOP_URL").ok())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    let mut terminal = setup_terminal()?;
    let mut app = App::new(base_url);
    app.log_event("Dashboard started".to_string());

    let result = run_app(&mut terminal, &mut app).await;
    restore_terminal(&mut terminal)?;
    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
) -> io::Result<()> {
    let poll_interval = Duration::from_millis(POLL_INTERVAL_MS);
    let mut last_fetch: Option<Instant> = None;

    loop {
        if last_fetch.map_or(true, |at| at.elapsed() >= poll_interval) {
            app.refresh().await;
            last_fetch = Some(Instant::now());
        }

        terminal.draw(|f| ui(f, app))?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => return Ok(()),
                        _ => {}
                    }
                }
            }
        }
    }
}
