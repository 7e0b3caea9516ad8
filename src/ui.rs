//! Terminal User Interface for nvmon.
//!
//! This module provides a real-time dashboard using `ratatui` that displays:
//!
//! - Header with device name and power limits
//! - Gauge row for utilization, VRAM, temperature, and power draw
//! - History charts for utilization and temperature
//! - Compute process table
//! - Status bar
//!
//! # Controls
//!
//! - `q` or `Esc`: Quit
//! - `r`: Manual refresh (cancels the in-flight poll cycle)
//! - `e` / `j`: Export history as CSV / JSON
//! - `a`: Toggle alerts
//! - `+` / `-`: Adjust the poll interval by 500 ms

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::Span,
    widgets::{
        Axis, Block, BorderType, Borders, Chart, Dataset, Gauge, GraphType, Paragraph, Row,
        Table,
    },
    Frame, Terminal,
};

use crate::app::{App, TickOutcome};
use crate::parser;
use crate::power::PowerLimits;
use crate::thresholds::Severity;

/// How long the adjust-interval keys shift the poll cadence per press.
const INTERVAL_STEP_MS: i64 = 500;

/// Run the TUI event loop until the user quits or the running flag drops.
pub fn run(mut app: App, running: Arc<AtomicBool>) -> std::io::Result<()> {
    enable_raw_mode()?;
    if let Err(e) = std::io::stdout().execute(EnterAlternateScreen) {
        let _ = disable_raw_mode();
        return Err(e);
    }

    let result = run_tui_loop(&mut app, &running);

    // Always clean up terminal state
    let _ = disable_raw_mode();
    let _ = std::io::stdout().execute(LeaveAlternateScreen);

    app.shutdown();
    result
}

/// Inner TUI loop - separated to ensure cleanup happens on any exit path.
fn run_tui_loop(app: &mut App, running: &Arc<AtomicBool>) -> std::io::Result<()> {
    let backend = CrosstermBackend::new(std::io::stdout());
    let mut terminal = Terminal::new(backend)?;

    // Limits are static for the lifetime of the dashboard; resolve once.
    let limits = app.power_limits();

    let (_, mut next_delay) = app.tick();
    let mut last_tick = Instant::now();

    while running.load(Ordering::Relaxed) {
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::Relaxed);
                        }
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            running.store(false, Ordering::Relaxed);
                        }
                        KeyCode::Char('r') => {
                            app.manual_refresh();
                            last_tick = Instant::now();
                            next_delay = Duration::from_millis(100);
                        }
                        KeyCode::Char('e') => app.export_csv(),
                        KeyCode::Char('j') => app.export_json(),
                        KeyCode::Char('a') => app.toggle_alerts(),
                        KeyCode::Char('+') | KeyCode::Char('=') => {
                            app.adjust_interval(INTERVAL_STEP_MS);
                        }
                        KeyCode::Char('-') => {
                            app.adjust_interval(-INTERVAL_STEP_MS);
                        }
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= next_delay {
            let (_, delay) = app.tick();
            next_delay = delay;
            last_tick = Instant::now();
        }

        terminal.draw(|f| draw_ui(f, app, &limits))?;
    }

    Ok(())
}

/// Main UI drawing function.
fn draw_ui(f: &mut Frame, app: &App, limits: &PowerLimits) {
    let size = f.area();

    let has_error = app.view.error.is_some();
    let constraints = if has_error {
        vec![
            Constraint::Length(3), // Header
            Constraint::Length(3), // Error banner
            Constraint::Length(3), // Gauges
            Constraint::Length(1), // Fan/clock line
            Constraint::Min(10),   // Charts
            Constraint::Length(8), // Processes
            Constraint::Length(3), // Status bar
        ]
    } else {
        vec![
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Min(10),
            Constraint::Length(8),
            Constraint::Length(3),
        ]
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(size);

    let mut idx = 0;
    draw_header(f, app, limits, chunks[idx]);
    idx += 1;

    if let Some(ref error) = app.view.error {
        draw_error_banner(f, error, chunks[idx]);
        idx += 1;
    }

    draw_gauges(f, app, chunks[idx]);
    idx += 1;
    draw_clock_line(f, app, chunks[idx]);
    idx += 1;
    draw_charts(f, app, chunks[idx]);
    idx += 1;
    draw_processes(f, app, chunks[idx]);
    idx += 1;
    draw_status_bar(f, app, chunks[idx]);
}

/// Header with device name, power limits, and sample count.
fn draw_header(f: &mut Frame, app: &App, limits: &PowerLimits, area: Rect) {
    let text = format!(
        " {} | {} | {} samples retained | [r]efresh [e]xport-csv [j]son [a]lerts [+/-] interval [q]uit",
        app.device_name,
        power_limit_text(limits),
        app.history.len()
    );
    let header = Paragraph::new(text)
        .style(
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .title("nvmon"),
        );
    f.render_widget(header, area);
}

/// Persistent error banner (tool missing or driver failures).
fn draw_error_banner(f: &mut Frame, error: &str, area: Rect) {
    let banner = Paragraph::new(error.to_string())
        .style(Style::default().fg(Color::White).bg(Color::Red))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .title("Error")
                .border_style(Style::default().fg(Color::Red)),
        );
    f.render_widget(banner, area);
}

/// The four metric gauges.
fn draw_gauges(f: &mut Frame, app: &App, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Ratio(1, 4),
            Constraint::Ratio(1, 4),
            Constraint::Ratio(1, 4),
            Constraint::Ratio(1, 4),
        ])
        .split(area);

    let Some(ref snap) = app.view.snapshot else {
        let waiting = Paragraph::new("Waiting for data...").block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .title("Metrics"),
        );
        f.render_widget(waiting, area);
        return;
    };
    let bands = &app.bands;

    draw_gauge(
        f,
        cols[0],
        "Utilization",
        format!("{:.1}%", snap.utilization),
        snap.utilization / 100.0,
        bands.percent_severity(snap.utilization),
    );

    let (mem_text, mem_pct) = parser::format_memory(snap.mem_used_mb, snap.mem_total_mb);
    draw_gauge(
        f,
        cols[1],
        "Memory",
        mem_text,
        mem_pct / 100.0,
        bands.percent_severity(mem_pct),
    );

    draw_gauge(
        f,
        cols[2],
        "Temperature",
        format!("{}°C", snap.temperature_c),
        snap.temperature_c as f64 / 100.0,
        bands.temp_severity(snap.temperature_c),
    );

    draw_gauge(
        f,
        cols[3],
        "Power",
        format!("{:.1} W / {:.1} W", snap.power_draw_w, snap.power_limit_w),
        snap.power_percent() / 100.0,
        bands.power_severity(snap.power_draw_w, snap.power_limit_w),
    );
}

/// One labeled gauge with severity coloring.
fn draw_gauge(f: &mut Frame, area: Rect, title: &str, label: String, ratio: f64, sev: Severity) {
    let gauge = Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .title(title),
        )
        .gauge_style(Style::default().fg(severity_color(sev)))
        .ratio(ratio.clamp(0.0, 1.0))
        .label(label);
    f.render_widget(gauge, area);
}

/// Single line with fan speed and clock frequencies.
fn draw_clock_line(f: &mut Frame, app: &App, area: Rect) {
    let text = match app.view.snapshot {
        Some(ref snap) => {
            let fan = match snap.fan_pct {
                Some(pct) => format!("{:.0}%", pct),
                None => "N/A".to_string(),
            };
            format!(
                " Fan: {} | GPU Clock: {:.0} MHz | Mem Clock: {:.0} MHz",
                fan, snap.clock_core_mhz, snap.clock_mem_mhz
            )
        }
        None => " Fan: -- | GPU Clock: -- | Mem Clock: --".to_string(),
    };
    f.render_widget(
        Paragraph::new(text).style(Style::default().fg(Color::Gray)),
        area,
    );
}

/// Two history charts: utilization and temperature.
fn draw_charts(f: &mut Frame, app: &App, area: Rect) {
    if app.history.is_empty() {
        let loading = Paragraph::new("Waiting for data...").block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .title("History"),
        );
        f.render_widget(loading, area);
        return;
    }

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 2), Constraint::Ratio(1, 2)])
        .split(area);

    let util: Vec<f64> = app.history.utilization().iter().copied().collect();
    let util_sev = app
        .view
        .snapshot
        .as_ref()
        .map(|s| app.bands.percent_severity(s.utilization))
        .unwrap_or_default();
    draw_series_chart(f, cols[0], "Utilization %", &util, util_sev, 100.0);

    let temp: Vec<f64> = app.history.temperature().iter().map(|&t| t as f64).collect();
    let temp_sev = app
        .view
        .snapshot
        .as_ref()
        .map(|s| app.bands.temp_severity(s.temperature_c))
        .unwrap_or_default();
    draw_series_chart(f, cols[1], "Temperature °C", &temp, temp_sev, 100.0);
}

/// Draw a single line chart over the retained history.
fn draw_series_chart(
    f: &mut Frame,
    area: Rect,
    title: &str,
    series: &[f64],
    severity: Severity,
    y_max: f64,
) {
    let data: Vec<(f64, f64)> = series
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64, v))
        .collect();

    let color = severity_color(severity);
    let border = match severity {
        Severity::Normal => Color::White,
        other => severity_color(other),
    };

    let datasets = vec![Dataset::default()
        .name(title)
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(&data)];

    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .title(Span::styled(title, Style::default().fg(border)))
                .border_style(Style::default().fg(border)),
        )
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, data.len().max(2) as f64]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .labels(vec![Span::raw("0"), Span::raw(format!("{:.0}", y_max))])
                .bounds([0.0, y_max]),
        );

    f.render_widget(chart, area);
}

/// The compute process table.
fn draw_processes(f: &mut Frame, app: &App, area: Rect) {
    let rows: Vec<Row> = app
        .view
        .processes
        .iter()
        .map(|p| Row::new(vec![p.pid.clone(), p.name.clone(), p.memory.clone()]))
        .collect();

    let count = rows.len();
    let table = Table::new(
        rows,
        [
            Constraint::Length(10),
            Constraint::Min(30),
            Constraint::Length(14),
        ],
    )
    .header(
        Row::new(vec!["PID", "Process", "VRAM"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .title(format!("Processes ({})", count)),
    );

    f.render_widget(table, area);
}

/// Bottom status bar.
fn draw_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let status = Paragraph::new(app.view.status.clone())
        .style(Style::default().fg(Color::White).bg(Color::DarkGray))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .title("Status"),
        );
    f.render_widget(status, area);
}

/// Format the power limit facts for the header, degrading when the driver
/// reported only some of them.
fn power_limit_text(limits: &PowerLimits) -> String {
    match (limits.current_w, limits.min_w, limits.max_w) {
        (Some(cur), Some(min), Some(max)) => {
            format!("Power limit {:.0} W ({:.0}-{:.0} W)", cur, min, max)
        }
        (Some(cur), _, _) => format!("Power limit {:.0} W", cur),
        _ => "Power limit unknown".to_string(),
    }
}

/// Map a severity band to its display color.
fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Normal => Color::Green,
        Severity::Warning => Color::Yellow,
        Severity::Critical => Color::Red,
    }
}

/// Run in headless mode (no TUI, one status line per sample).
pub fn run_headless(mut app: App, running: Arc<AtomicBool>) -> std::io::Result<()> {
    println!("nvmon - NVIDIA GPU Monitor");
    println!("==========================");
    println!("GPU: {}", app.device_name);
    println!("Interval: {} ms", app.settings.poll_interval_ms);
    println!("Press Ctrl+C to stop.\n");

    let mut last_error: Option<String> = None;

    while running.load(Ordering::Relaxed) {
        let (outcome, delay) = app.tick();

        match outcome {
            TickOutcome::Fresh => {
                last_error = None;
                if let Some(ref snap) = app.view.snapshot {
                    let (mem_text, _) =
                        parser::format_memory(snap.mem_used_mb, snap.mem_total_mb);
                    println!(
                        "[{}] Util: {:5.1}% | Mem: {} | Temp: {:3}°C | Power: {:6.1}/{:.1} W | Procs: {}",
                        chrono::Local::now().format("%H:%M:%S"),
                        snap.utilization,
                        mem_text,
                        snap.temperature_c,
                        snap.power_draw_w,
                        snap.power_limit_w,
                        app.view.processes.len()
                    );
                }
            }
            TickOutcome::Errored => {
                // Only report an error once until it changes; the sampler
                // keeps polling either way.
                if app.view.error != last_error {
                    if let Some(ref error) = app.view.error {
                        eprintln!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), error);
                    }
                    last_error = app.view.error.clone();
                }
            }
            TickOutcome::Waiting | TickOutcome::Unchanged => {}
        }

        // Sleep in short slices so Ctrl+C is honored promptly.
        let mut slept = Duration::ZERO;
        while slept < delay && running.load(Ordering::Relaxed) {
            let slice = Duration::from_millis(100).min(delay - slept);
            std::thread::sleep(slice);
            slept += slice;
        }
    }

    app.shutdown();
    println!("\nStopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_shows_full_limit_range_when_known() {
        let text = power_limit_text(&PowerLimits {
            current_w: Some(220.0),
            min_w: Some(100.0),
            max_w: Some(300.0),
        });
        assert_eq!(text, "Power limit 220 W (100-300 W)");
    }

    #[test]
    fn header_degrades_when_bounds_are_missing() {
        let current_only = PowerLimits {
            current_w: Some(220.0),
            ..Default::default()
        };
        assert_eq!(power_limit_text(&current_only), "Power limit 220 W");
        assert_eq!(
            power_limit_text(&PowerLimits::default()),
            "Power limit unknown"
        );
    }
}
