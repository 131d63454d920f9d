//! Real-time heart-rate heatmap for Bluetooth heart-rate sensors.
//!
//! Usage:
//!   cargo run --bin tui               # scan for real sensors
//!   cargo run --bin tui -- --simulate # built-in simulated sensors (no hardware needed)
//!
//! Keys (main view)
//! ----------------
//!   Tab      open device picker
//!   s        start a fresh scan
//!   x        stop scanning
//!   w        compose a text command for the connected device
//!   d        disconnect current device
//!   q / Esc  quit
//!
//! Keys (device picker overlay)
//! ----------------------------
//!   ↑ / ↓   navigate list
//!   Enter    connect to highlighted device
//!   s        rescan while picker is open
//!   Esc      close picker
//!
//! Keys (command prompt)
//! ---------------------
//!   Enter    send
//!   Esc      cancel

use std::f64::consts::PI;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Layout, Margin, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
    Frame, Terminal,
};
use tokio::sync::mpsc;

use pulse_rs::adapter::BleAdapter;
use pulse_rs::btle::BtleplugAdapter;
use pulse_rs::client::{ClientConfig, HeartRateClient};
use pulse_rs::error::PulseError;
use pulse_rs::mock::MockAdapter;
use pulse_rs::protocol::{HEATMAP_COLUMNS, HEATMAP_ROWS};
use pulse_rs::types::{AdapterState, ClientEvent, ConnectionState, DiscoveredDevice, Snapshot};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Heatmap values are mapped onto the colour ramp over this range.
const HEAT_MIN: f64 = 0.0;
const HEAT_MAX: f64 = 200.0;

/// Plasma-like colour ramp, dark purple (low) to yellow (high).
const PLASMA: [(u8, u8, u8); 5] = [
    (13, 8, 135),
    (126, 3, 168),
    (204, 71, 120),
    (248, 149, 64),
    (240, 249, 33),
];

/// Braille spinner frames, advanced every 100 ms.
const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Sensors advertised by `--simulate`.
const SIM_DEVICES: [(&str, &str, i16); 3] = [
    ("SIM-00:11:22:33:44:01", "Polar H10 A1B2C3", -58),
    ("SIM-00:11:22:33:44:02", "Wahoo TICKR", -71),
    ("SIM-00:11:22:33:44:03", "", -83),
];

// ── App state (owned by the main loop) ────────────────────────────────────────

struct App {
    /// Latest client view: devices, connection, heatmap and log.
    snapshot: Snapshot,
    simulated: bool,
    last_hr: Option<u16>,
    /// Last error reported by the client or a rejected request.
    last_error: Option<String>,

    // ── Device picker
    show_picker: bool,
    picker_cursor: usize,

    /// `Some` while the command prompt is open.
    input: Option<String>,
}

impl App {
    fn new(simulated: bool) -> Self {
        Self {
            snapshot: Snapshot::default(),
            simulated,
            last_hr: None,
            last_error: None,
            show_picker: true,
            picker_cursor: 0,
            input: None,
        }
    }

    fn on_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Sample(sample) => self.last_hr = Some(sample.heart_rate),
            ClientEvent::ConnectionState(ConnectionState::Streaming) => {
                self.last_error = None;
                self.show_picker = false;
            }
            ClientEvent::ConnectionState(ConnectionState::Disconnected) => self.last_hr = None,
            ClientEvent::Error(e) => self.last_error = Some(e.to_string()),
            _ => {}
        }
    }

    fn connected_id(&self) -> Option<&str> {
        self.snapshot
            .connection
            .as_ref()
            .map(|(device, _)| device.id.as_str())
    }

    fn selected(&self) -> Option<&DiscoveredDevice> {
        self.snapshot.devices.get(self.picker_cursor)
    }

    fn clamp_cursor(&mut self) {
        let max = self.snapshot.devices.len().saturating_sub(1);
        self.picker_cursor = self.picker_cursor.min(max);
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Shorten a BLE identifier for compact display.
/// UUID  → last 8 hex chars, e.g. "90ABCDEF"
/// MAC   → last 8 chars, e.g.  "DD:EE:FF"
fn short_id(id: &str) -> String {
    let trimmed = id.trim_matches(|c: char| c == '{' || c == '}');
    if trimmed.len() > 8 {
        trimmed[trimmed.len() - 8..].to_uppercase()
    } else {
        trimmed.to_uppercase()
    }
}

/// Build the display string shown in the picker list and the header.
fn device_entry(d: &DiscoveredDevice) -> String {
    let rssi = d
        .rssi
        .map(|r| format!("{r} dBm"))
        .unwrap_or_else(|| "N/A".into());
    format!("{}  [{}]  {rssi}", d.label(), short_id(&d.id))
}

/// Colour for a heatmap value on the plasma ramp.
fn heat_color(value: i32) -> Color {
    let t = ((value as f64 - HEAT_MIN) / (HEAT_MAX - HEAT_MIN)).clamp(0.0, 1.0);
    let scaled = t * (PLASMA.len() - 1) as f64;
    let i = (scaled.floor() as usize).min(PLASMA.len() - 2);
    let f = scaled - i as f64;
    let (a, b) = (PLASMA[i], PLASMA[i + 1]);
    let lerp = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * f).round() as u8;
    Color::Rgb(lerp(a.0, b.0), lerp(a.1, b.1), lerp(a.2, b.2))
}

/// Run a client request in the background, reporting a failure on `errors`.
fn fire<F>(errors: &mpsc::UnboundedSender<String>, what: &'static str, request: F)
where
    F: Future<Output = Result<(), PulseError>> + Send + 'static,
{
    let errors = errors.clone();
    tokio::spawn(async move {
        if let Err(e) = request.await {
            let _ = errors.send(format!("{what}: {e}"));
        }
    });
}

// ── Simulator ─────────────────────────────────────────────────────────────────

/// Heart rate of the simulated sensor at time `t` (seconds): a slow breathing
/// swing around 72 bpm with an occasional exertion burst.
fn sim_heart_rate(t: f64) -> u16 {
    let base = 72.0 + 6.0 * (2.0 * PI * t / 12.0).sin();
    let burst = 40.0 * ((2.0 * PI * t / 90.0).sin().max(0.0)).powi(4);
    (base + burst).round() as u16
}

/// Drive `adapter` like real hardware would.
///
/// While a scan runs, every simulated sensor advertises twice a second with
/// a jittering RSSI. Every subscribed sensor notifies once a second; every
/// tenth notification uses the 16-bit value format.
fn spawn_simulator(adapter: MockAdapter) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(500));
        let mut tick = 0u64;
        loop {
            ticker.tick().await;
            tick += 1;
            let t = tick as f64 * 0.5;

            if adapter.is_scanning() {
                for (n, (id, name, rssi)) in SIM_DEVICES.iter().enumerate() {
                    let jitter = ((t * 3.1 + n as f64).sin() * 4.0) as i16;
                    adapter.advertise(DiscoveredDevice {
                        id: (*id).to_string(),
                        name: (!name.is_empty()).then(|| (*name).to_string()),
                        rssi: Some(rssi + jitter),
                    });
                }
            }

            if tick % 2 == 0 {
                let hr = sim_heart_rate(t);
                let payload = if (tick / 2) % 10 == 0 {
                    let [lo, hi] = hr.to_le_bytes();
                    vec![0x01, lo, hi]
                } else {
                    vec![0x00, hr.min(255) as u8]
                };
                for id in adapter.streaming_devices() {
                    adapter.notify(&id, &payload);
                }
            }
        }
    });
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// Header / body (heatmap + log) / footer, with the picker overlaid on top.
fn draw(frame: &mut Frame, app: &App) {
    let area = frame.area();
    let root = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(0),
        Constraint::Length(4),
    ])
    .split(area);

    draw_header(frame, root[0], app);

    let [heat_area, log_area] =
        Layout::horizontal([Constraint::Percentage(55), Constraint::Percentage(45)])
            .areas(root[1]);
    draw_heatmap(frame, heat_area, app);
    draw_log(frame, log_area, app);

    draw_footer(frame, root[2], app);

    if app.show_picker {
        draw_device_picker(frame, area, app);
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

fn spinner_str() -> &'static str {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    SPINNER[(ms / 100) as usize % SPINNER.len()]
}

/// Status bar: title, connection status, current heart rate, device count.
///
/// The status colour reflects the connection: green = streaming,
/// yellow = scanning or connecting, red = adapter unavailable or last error.
fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let snap = &app.snapshot;
    let (label, color) = match (&snap.connection, snap.adapter_state) {
        (_, state @ (AdapterState::PoweredOff | AdapterState::Unauthorized)) => {
            (format!("✖ Bluetooth {state}"), Color::Red)
        }
        (Some((device, ConnectionState::Streaming)), _) => (
            format!("● {}  [{}]", device.label(), short_id(&device.id)),
            Color::Green,
        ),
        (Some((device, state)), _) => (
            format!("{} {} {}…", spinner_str(), capitalize(&state.to_string()), device.label()),
            Color::Yellow,
        ),
        (None, AdapterState::Unknown) => {
            (format!("{} Waiting for Bluetooth…", spinner_str()), Color::Yellow)
        }
        (None, _) if snap.scanning => (format!("{} Scanning…", spinner_str()), Color::Yellow),
        (None, _) => match &app.last_error {
            Some(e) => (format!("○ Idle ({e})"), Color::Red),
            None => ("○ Idle".to_owned(), Color::White),
        },
    };

    let hr = app
        .last_hr
        .map(|hr| format!("♥ {hr} bpm"))
        .unwrap_or_else(|| "♥ --- bpm".into());
    let found = format!("{} device(s)", snap.devices.len());

    let mut spans = vec![
        Span::styled(
            " HEART RATE Monitor ",
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        sep(),
        Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        sep(),
        Span::styled(
            hr,
            Style::default()
                .fg(Color::LightRed)
                .add_modifier(Modifier::BOLD),
        ),
        sep(),
        Span::styled(found, Style::default().fg(Color::DarkGray)),
    ];
    if app.simulated {
        spans.push(sep());
        spans.push(Span::styled("◆ Simulated", Style::default().fg(Color::Cyan)));
    }
    spans.push(Span::raw(" "));

    frame.render_widget(
        Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[inline]
fn sep<'a>() -> Span<'a> {
    Span::styled(" │ ", Style::default().fg(Color::DarkGray))
}

// ── Heatmap ───────────────────────────────────────────────────────────────────

/// Five rows of five cells, oldest sample at the top. Empty rows are drawn
/// as dim placeholders so the grid keeps its shape.
fn draw_heatmap(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .title(Span::styled(
            format!(" Heatmap  ({:.0}–{:.0}) ", HEAT_MIN, HEAT_MAX),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::vertical([Constraint::Ratio(1, HEATMAP_ROWS as u32); HEATMAP_ROWS])
        .split(inner);
    for (r, row_area) in rows.iter().enumerate() {
        let cells =
            Layout::horizontal([Constraint::Ratio(1, HEATMAP_COLUMNS as u32); HEATMAP_COLUMNS])
                .split(*row_area);
        let values = app.snapshot.heatmap.get(r);
        for (c, cell_area) in cells.iter().enumerate() {
            let cell = match values {
                Some(row) => {
                    let v = row[c];
                    let fg = if v > 120 { Color::Black } else { Color::White };
                    Paragraph::new(v.to_string())
                        .style(Style::default().fg(fg).bg(heat_color(v)))
                }
                None => Paragraph::new("·").style(Style::default().fg(Color::DarkGray)),
            };
            // Leave a one-column gutter between cells.
            let padded = cell_area.inner(Margin {
                horizontal: 1,
                vertical: 0,
            });
            frame.render_widget(cell.alignment(Alignment::Center), padded);
        }
    }
}

// ── Log ───────────────────────────────────────────────────────────────────────

fn draw_log(frame: &mut Frame, area: Rect, app: &App) {
    let items: Vec<ListItem> = app
        .snapshot
        .log
        .iter()
        .map(|line| {
            let color = if line.contains("Error") || line.contains("error") {
                Color::Red
            } else if line.starts_with("Received HR") {
                Color::Gray
            } else {
                Color::White
            };
            ListItem::new(Span::styled(line.clone(), Style::default().fg(color)))
        })
        .collect();

    frame.render_widget(
        List::new(items).block(
            Block::default()
                .title(Span::styled(
                    " Log (newest first) ",
                    Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL),
        ),
        area,
    );
}

// ── Footer ────────────────────────────────────────────────────────────────────

/// Line 1: key reference. Line 2: the command prompt while composing, a
/// permission hint when Bluetooth is unavailable, otherwise the last error.
fn draw_footer(frame: &mut Frame, area: Rect, app: &App) {
    let keys = Line::from(vec![
        Span::raw(" "),
        key("[Tab]"),
        Span::raw("Devices  "),
        key("[s]"),
        Span::raw("Scan  "),
        key("[x]"),
        Span::raw("Stop scan  "),
        key("[w]"),
        Span::raw("Write  "),
        key("[d]"),
        Span::raw("Disconnect  "),
        key("[q]"),
        Span::raw("Quit"),
    ]);

    let second_line = match (&app.input, app.snapshot.adapter_state) {
        (Some(text), _) => Line::from(vec![
            Span::styled(" Send ▸ ", Style::default().fg(Color::Yellow)),
            Span::raw(text.clone()),
            Span::styled("█", Style::default().fg(Color::Yellow)),
        ]),
        (None, AdapterState::PoweredOff | AdapterState::Unauthorized) => {
            let hint = if cfg!(target_os = "macos") {
                " Bluetooth unavailable. On macOS grant access: System Settings → Privacy & Security → Bluetooth."
            } else {
                " Bluetooth unavailable. Make sure the adapter is powered on."
            };
            Line::from(Span::styled(hint, Style::default().fg(Color::Yellow)))
        }
        (None, _) => match &app.last_error {
            Some(e) => Line::from(Span::styled(format!(" {e}"), Style::default().fg(Color::Red))),
            None => Line::from(Span::styled(
                " Select a sensor with [Tab] to start streaming",
                Style::default().fg(Color::DarkGray),
            )),
        },
    };

    frame.render_widget(
        Paragraph::new(vec![keys, second_line]).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

#[inline]
fn key(s: &str) -> Span<'_> {
    Span::styled(
        s,
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    )
}

// ── Device picker overlay ─────────────────────────────────────────────────────

/// Centered modal listing every device found by the current or last scan.
///
/// The connected device is highlighted in green with a `← connected` suffix.
/// While a scan is running a spinner appears in the title bar.
fn draw_device_picker(frame: &mut Frame, area: Rect, app: &App) {
    let devices = &app.snapshot.devices;
    let n = devices.len().max(1);
    let inner_h = n as u16 + 4;
    let box_h = inner_h + 2;
    let box_w = (area.width * 60 / 100).max(52).min(area.width);
    let x = area.x + (area.width.saturating_sub(box_w)) / 2;
    let y = area.y + (area.height.saturating_sub(box_h)) / 2;
    let popup = Rect::new(x, y, box_w, box_h.min(area.height));

    frame.render_widget(Clear, popup);

    let title = if app.snapshot.scanning {
        format!(" {} Scanning…  ({} found) ", spinner_str(), devices.len())
    } else {
        format!(" Select Device  ({} found) ", devices.len())
    };

    frame.render_widget(
        Block::default()
            .title(Span::styled(
                title,
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
        popup,
    );

    let inner = popup.inner(Margin {
        horizontal: 1,
        vertical: 1,
    });

    let hint_h = 2u16;
    let [list_area, _, hint_area] = Layout::vertical([
        Constraint::Length(inner.height.saturating_sub(hint_h + 1)),
        Constraint::Length(1),
        Constraint::Length(hint_h),
    ])
    .areas(inner);

    let connected = app.connected_id();
    let items: Vec<ListItem> = if devices.is_empty() {
        vec![ListItem::new(Span::styled(
            "  No devices found. Press [s] to scan",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        devices
            .iter()
            .map(|d| {
                let (bullet, color, suffix) = if connected == Some(d.id.as_str()) {
                    ("● ", Color::Green, "  ← connected")
                } else {
                    ("  ", Color::White, "")
                };
                ListItem::new(Span::styled(
                    format!("{bullet}{}{suffix}", device_entry(d)),
                    Style::default().fg(color),
                ))
            })
            .collect()
    };

    let mut list_state = ListState::default();
    if !devices.is_empty() {
        list_state.select(Some(app.picker_cursor));
    }

    frame.render_stateful_widget(
        List::new(items)
            .highlight_style(
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::White)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ "),
        list_area,
        &mut list_state,
    );

    frame.render_widget(
        Paragraph::new(vec![
            Line::from(vec![
                key(" [↑↓]"),
                Span::raw(" Navigate  "),
                key("[↵]"),
                Span::raw(" Connect  "),
                key("[s]"),
                Span::raw(" Rescan  "),
                key("[Esc]"),
                Span::raw(" Close"),
            ]),
            Line::from(Span::styled(
                " Devices appear as they are discovered",
                Style::default().fg(Color::DarkGray),
            )),
        ]),
        hint_area,
    );
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    use std::io::IsTerminal as _;
    if !io::stdout().is_terminal() {
        eprintln!("Error: pulse-rs tui requires a real terminal (TTY).");
        eprintln!("Run it directly in a terminal emulator, not piped or redirected.");
        std::process::exit(1);
    }

    // ── Logging ─────────────────────────────────────────────────────────────
    // Write logs to a file so they never interfere with the TUI display.
    // Set RUST_LOG=debug for verbose BLE diagnostics, e.g.:
    //   RUST_LOG=debug cargo run --bin tui
    // Logs are written to pulse-tui.log in the current directory.
    {
        use std::fs::File;
        if let Ok(file) = File::create("pulse-tui.log") {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .target(env_logger::Target::Pipe(Box::new(file)))
                .init();
        }
    }

    let simulate = std::env::args().any(|a| a == "--simulate");

    // ── Client ────────────────────────────────────────────────────────────────
    let adapter: Arc<dyn BleAdapter> = if simulate {
        let mock = MockAdapter::new();
        spawn_simulator(mock.clone());
        Arc::new(mock)
    } else {
        Arc::new(BtleplugAdapter::new().await?)
    };
    let (client, mut events) = HeartRateClient::start(adapter, ClientConfig::default()).await?;
    let client = Arc::new(client);
    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel::<String>();

    let mut app = App::new(simulate);
    {
        let c = Arc::clone(&client);
        fire(&errors_tx, "Scan", async move { c.start_scan().await });
    }

    // ── Terminal setup ────────────────────────────────────────────────────────
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    let tick = Duration::from_millis(33); // ~30 FPS

    // ── Main loop ─────────────────────────────────────────────────────────────
    'main: loop {
        // ── 1. Pull client state ─────────────────────────────────────────────
        while let Ok(event) = events.try_recv() {
            app.on_event(event);
        }
        while let Ok(err) = errors_rx.try_recv() {
            app.last_error = Some(err);
        }
        app.snapshot = client.snapshot();
        app.clamp_cursor();

        // ── 2. Render ────────────────────────────────────────────────────────
        terminal.draw(|f| draw(f, &app))?;

        // ── 3. Handle keyboard ───────────────────────────────────────────────
        if !event::poll(tick)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };

        // In raw mode Ctrl+C arrives as a key event, not SIGINT.
        let ctrl_c =
            key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c');
        if ctrl_c {
            break 'main;
        }

        // ── Command prompt keys ──────────────────────────────────────────────
        if let Some(text) = app.input.as_mut() {
            match key.code {
                KeyCode::Esc => app.input = None,
                KeyCode::Enter => {
                    if let Some(text) = app.input.take().filter(|t| !t.is_empty()) {
                        let c = Arc::clone(&client);
                        fire(&errors_tx, "Send", async move { c.send_command(&text).await });
                    }
                }
                KeyCode::Backspace => {
                    text.pop();
                }
                KeyCode::Char(ch) => text.push(ch),
                _ => {}
            }
            continue;
        }

        if key.code == KeyCode::Char('q') {
            break 'main;
        }

        // ── Picker overlay keys ──────────────────────────────────────────────
        if app.show_picker {
            match key.code {
                KeyCode::Esc => app.show_picker = false,
                KeyCode::Char('s') => {
                    let c = Arc::clone(&client);
                    fire(&errors_tx, "Scan", async move { c.start_scan().await });
                }
                KeyCode::Up => app.picker_cursor = app.picker_cursor.saturating_sub(1),
                KeyCode::Down => {
                    app.picker_cursor += 1;
                    app.clamp_cursor();
                }
                KeyCode::Enter => {
                    if let Some(device) = app.selected() {
                        let id = device.id.clone();
                        let c = Arc::clone(&client);
                        app.last_error = None;
                        fire(&errors_tx, "Connect", async move { c.connect(&id).await });
                    }
                }
                _ => {}
            }
            continue;
        }

        // ── Normal-view keys ─────────────────────────────────────────────────
        match key.code {
            KeyCode::Esc => break 'main,
            KeyCode::Tab => {
                app.show_picker = true;
                if let Some(i) = app
                    .connected_id()
                    .and_then(|id| app.snapshot.devices.iter().position(|d| d.id == id))
                {
                    app.picker_cursor = i;
                }
            }
            KeyCode::Char('s') => {
                let c = Arc::clone(&client);
                fire(&errors_tx, "Scan", async move { c.start_scan().await });
            }
            KeyCode::Char('x') => {
                let c = Arc::clone(&client);
                fire(&errors_tx, "Stop scan", async move { c.stop_scan().await });
            }
            KeyCode::Char('w') => app.input = Some(String::new()),
            KeyCode::Char('d') => {
                let c = Arc::clone(&client);
                fire(&errors_tx, "Disconnect", async move { c.disconnect().await });
            }
            _ => {}
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    // Background requests may still hold a handle; give them a moment.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let mut client = client;
    loop {
        match Arc::try_unwrap(client) {
            Ok(c) => {
                c.shutdown().await;
                break;
            }
            Err(shared) if tokio::time::Instant::now() < deadline => {
                client = shared;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(_) => break,
        }
    }
    Ok(())
}
