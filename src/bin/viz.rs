/// ndrsim live visualizer. Attach to a running simulation at any time.
///
/// Run in a separate terminal:
///   cargo run --bin viz
/// and start the simulator with `--live`.
///
/// Polls /tmp/ndrsim_live.json every 200ms and renders a live TUI dashboard:
///
///     ┌ header: kernel / placement / status / cycle ───────────────┐
///     │ CU heatmap (one cell per CU)   │ Stats: work-groups, pools │
///     │ q/esc: quit  …footer…                                      │
///
/// Press q or Esc to quit. The simulation keeps running unaffected.
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ndrsim::metrics::{read_metrics, LiveMetrics};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
    Frame, Terminal,
};
use std::{io, time::Duration};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        let metrics = read_metrics();
        terminal.draw(|f| render(f, metrics.as_ref()))?;

        // Non-blocking: poll for 200ms, then redraw regardless
        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                    break;
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Top-level layout
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, metrics: Option<&LiveMetrics>) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // heatmap + stats
            Constraint::Length(1), // footer
        ])
        .split(f.area());

    render_header(f, rows[0], metrics);

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(rows[1]);

    render_heatmap(f, cols[0], metrics);
    render_stats(f, cols[1], metrics);
    render_footer(f, rows[2]);
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

fn render_header(f: &mut Frame, area: Rect, metrics: Option<&LiveMetrics>) {
    let block = Block::default()
        .title(Span::styled(
            " ndrsim live monitor ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let (name, placement, status, cycle) = metrics
        .map(|m| (m.kernel_name.as_str(), m.placement.as_str(), m.status.as_str(), m.cycle))
        .unwrap_or(("-", "-", "idle", 0));

    let status_color = match status {
        "running" => Color::Green,
        "complete" => Color::Cyan,
        "suspended" => Color::Yellow,
        _ => Color::DarkGray,
    };

    let spans = vec![
        Span::styled("  kernel: ", Style::default().fg(Color::DarkGray)),
        Span::styled(name, Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        Span::styled("   placement: ", Style::default().fg(Color::DarkGray)),
        Span::styled(placement, Style::default().fg(Color::Cyan)),
        Span::styled("   status: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            status.to_uppercase(),
            Style::default().fg(status_color).add_modifier(Modifier::BOLD),
        ),
        Span::styled("   cycle: ", Style::default().fg(Color::DarkGray)),
        Span::raw(cycle.to_string()),
    ];

    f.render_widget(Paragraph::new(Line::from(spans)), inner);
}

// ---------------------------------------------------------------------------
// Compute-unit heatmap
// ---------------------------------------------------------------------------

fn render_heatmap(f: &mut Frame, area: Rect, metrics: Option<&LiveMetrics>) {
    let block = Block::default().title(" Compute Units ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let (assigned, in_flight) = metrics
        .map(|m| (m.cu_work_group.clone(), m.cu_slots_in_flight.clone()))
        .unwrap_or_else(|| (vec![None; 20], Vec::new()));

    // Each CU = 2 chars + 1 space
    let cus_per_row = ((inner.width as usize).saturating_sub(1) / 3).max(1);

    let legend = Line::from(vec![
        Span::styled("██", Style::default().fg(Color::Green)),
        Span::raw(" busy, pipeline full   "),
        Span::styled("▓▓", Style::default().fg(Color::Green)),
        Span::raw(" busy   "),
        Span::styled("░░", Style::default().fg(Color::DarkGray)),
        Span::raw(" idle"),
    ]);

    let mut lines: Vec<Line> = vec![legend, Line::raw("")];

    for (row_idx, row) in assigned.chunks(cus_per_row).enumerate() {
        let spans: Vec<Span> = row
            .iter()
            .enumerate()
            .flat_map(|(i, wg)| {
                let slots = in_flight.get(row_idx * cus_per_row + i).copied().unwrap_or(0);
                let (symbol, color) = match wg {
                    Some(_) if slots >= 4 => ("██", Color::Green),
                    Some(_) => ("▓▓", Color::Green),
                    None => ("░░", Color::DarkGray),
                };
                vec![Span::styled(symbol, Style::default().fg(color)), Span::raw(" ")]
            })
            .collect();
        lines.push(Line::from(spans));
    }

    let busy = assigned.iter().filter(|wg| wg.is_some()).count();
    lines.push(Line::raw(""));
    lines.push(Line::from(vec![Span::styled(
        format!("  {}/{} CUs busy", busy, assigned.len()),
        Style::default().fg(Color::DarkGray),
    )]));

    f.render_widget(Paragraph::new(lines), inner);
}

// ---------------------------------------------------------------------------
// Stats panel
// ---------------------------------------------------------------------------

fn render_stats(f: &mut Frame, area: Rect, metrics: Option<&LiveMetrics>) {
    let block = Block::default().title(" Stats ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // work-group gauge
            Constraint::Length(1), // spacer
            Constraint::Min(0),    // text stats
        ])
        .split(inner);

    let Some(m) = metrics else {
        let msg = Paragraph::new(vec![
            Line::raw(""),
            Line::from(Span::styled(
                "  No simulation running.",
                Style::default().fg(Color::DarkGray),
            )),
            Line::from(Span::styled(
                "  Start ndrsim --live to see live data.",
                Style::default().fg(Color::DarkGray),
            )),
        ]);
        f.render_widget(msg, inner);
        return;
    };

    let pct = (m.progress() * 100.0).clamp(0.0, 100.0) as u16;
    let gauge = Gauge::default()
        .block(Block::default().title("Work-groups"))
        .gauge_style(Style::default().fg(Color::Blue))
        .percent(pct)
        .label(format!("{} / {}", m.work_groups_done, m.work_groups_total));
    f.render_widget(gauge, rows[0]);

    let stat = |label: &'static str, value: String| {
        Line::from(vec![
            Span::styled(label, Style::default().fg(Color::DarkGray)),
            Span::raw(value),
        ])
    };
    let text = vec![
        stat("Pending:      ", m.work_groups_pending.to_string()),
        stat("Busy CUs:     ", m.busy_compute_units.to_string()),
        stat("Idle CUs:     ", m.idle_compute_units.to_string()),
        stat("Instructions: ", m.instructions_retired.to_string()),
        Line::raw(""),
        stat("Global: ", format!("({},{},{})", m.global[0], m.global[1], m.global[2])),
        stat("Local:  ", format!("({},{},{})", m.local[0], m.local[1], m.local[2])),
    ];
    f.render_widget(Paragraph::new(text), rows[2]);
}

// ---------------------------------------------------------------------------
// Footer
// ---------------------------------------------------------------------------

fn render_footer(f: &mut Frame, area: Rect) {
    let text = Paragraph::new(Span::styled(
        "  q / esc: quit    auto-refreshes every 200ms    reads /tmp/ndrsim_live.json",
        Style::default().fg(Color::DarkGray),
    ));
    f.render_widget(text, area);
}
