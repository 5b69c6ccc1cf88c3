use std::io::{IsTerminal, Write, stdout};

use anyhow::Result;
use crossterm::style::{Color, Print, Stylize};
use crossterm::{queue, terminal};

use crate::aggregate::{DailyStat, coding_streak, stat_for};
use crate::session::CurrentSession;
use crate::util::{format_hours, now_local, progress_bar, truncate};

const DEFAULT_WIDTH: u16 = 80;
const FULL_BANNER: &str = "LOCK-IN  //  coding activity";
const MINIMAL_BANNER: &str = "LOCK-IN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiLayoutMode {
    Full,
    Compact,
}

pub struct DashboardData<'a> {
    pub today: &'a str,
    pub stats: &'a [DailyStat],
    pub current: Option<&'a CurrentSession>,
    pub days: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyledLine {
    pub text: String,
    pub color: Option<Color>,
    pub bold: bool,
}

impl StyledLine {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            color: None,
            bold: false,
        }
    }

    fn rule(title: &str, width: usize) -> Self {
        Self {
            text: hr(title, width),
            color: Some(Color::DarkCyan),
            bold: true,
        }
    }

    fn colored(text: impl Into<String>, color: Color) -> Self {
        Self {
            text: text.into(),
            color: Some(color),
            bold: false,
        }
    }
}

/// Prints the dashboard once to stdout, sized to the terminal when there is
/// one.
pub fn draw(data: &DashboardData<'_>) -> Result<()> {
    let width = if stdout().is_terminal() {
        terminal::size().map(|(w, _)| w).unwrap_or(DEFAULT_WIDTH)
    } else {
        DEFAULT_WIDTH
    };

    let mut out = stdout().lock();
    for line in render(data, width as usize) {
        let text = truncate(&line.text, width as usize);
        let mut styled = text.stylize();
        if let Some(color) = line.color {
            styled = styled.with(color);
        }
        if line.bold {
            styled = styled.bold();
        }
        queue!(out, Print(styled), Print("\n"))?;
    }
    out.flush()?;
    Ok(())
}

pub fn render(data: &DashboardData<'_>, width: usize) -> Vec<StyledLine> {
    let layout = select_layout_mode(width);
    let mut lines = Vec::new();

    let banner = match layout {
        UiLayoutMode::Full => FULL_BANNER,
        UiLayoutMode::Compact => MINIMAL_BANNER,
    };
    lines.push(StyledLine {
        text: center_line(banner, width),
        color: Some(Color::Cyan),
        bold: true,
    });
    lines.push(StyledLine::plain(""));

    render_today_section(&mut lines, width, layout, data);
    lines.push(StyledLine::plain(""));
    render_current_section(&mut lines, width, data);
    lines.push(StyledLine::plain(""));
    render_daily_section(&mut lines, width, layout, data);

    lines
}

fn render_today_section(
    lines: &mut Vec<StyledLine>,
    width: usize,
    layout: UiLayoutMode,
    data: &DashboardData<'_>,
) {
    lines.push(StyledLine::rule("Today", width));

    let today = stat_for(data.stats, data.today);
    let hours = today.map(|stat| stat.total_hours).unwrap_or(0.0);
    lines.push(StyledLine::plain(kv_line("Coding time", &format_hours(hours))));

    let streak = coding_streak(data.stats, data.today);
    let unit = if streak == 1 { "day" } else { "days" };
    lines.push(StyledLine::plain(kv_line("Streak", &format!("{streak} {unit}"))));

    if let Some(stat) = today {
        lines.push(StyledLine::plain(kv_line(
            "Files",
            &stat.files_edited.len().to_string(),
        )));
        if !stat.languages_used.is_empty() {
            lines.push(StyledLine::plain(kv_line(
                "Languages",
                &join_set(stat.languages_used.iter(), width.saturating_sub(14)),
            )));
        }
    }

    if matches!(layout, UiLayoutMode::Full) {
        lines.push(StyledLine::plain(kv_line("Now", &now_local())));
    }
}

fn render_current_section(lines: &mut Vec<StyledLine>, width: usize, data: &DashboardData<'_>) {
    lines.push(StyledLine::rule("Current Session", width));

    let Some(current) = data.current else {
        lines.push(StyledLine::plain("No open session."));
        return;
    };

    lines.push(StyledLine::plain(kv_line(
        "File",
        &truncate(&current.file_path, width.saturating_sub(14)),
    )));
    lines.push(StyledLine::plain(kv_line("Language", &current.language)));
    lines.push(StyledLine::colored(
        kv_line("Elapsed", &format_hours(current.elapsed_hours)),
        Color::Green,
    ));
}

fn render_daily_section(
    lines: &mut Vec<StyledLine>,
    width: usize,
    layout: UiLayoutMode,
    data: &DashboardData<'_>,
) {
    lines.push(StyledLine::rule("Daily", width));

    if data.stats.is_empty() {
        lines.push(StyledLine::plain("No sessions recorded yet."));
        return;
    }

    let shown = &data.stats[..data.stats.len().min(data.days.max(1))];
    let max_hours = shown
        .iter()
        .map(|stat| stat.total_hours)
        .fold(0.0_f64, f64::max);
    let bar_width = hours_bar_width(width);

    for stat in shown {
        let percent = if max_hours > 0.0 {
            stat.total_hours / max_hours * 100.0
        } else {
            0.0
        };
        let mut text = format!(
            "{} {:>13} [{}]",
            stat.date,
            format_hours(stat.total_hours),
            progress_bar(percent, bar_width)
        );
        if matches!(layout, UiLayoutMode::Full) {
            let files = stat.files_edited.len();
            let noun = if files == 1 { "file" } else { "files" };
            let budget = width.saturating_sub(text.len() + files.to_string().len() + 12);
            text.push_str(&format!(
                " {files} {noun} | {}",
                join_set(stat.languages_used.iter(), budget)
            ));
        }
        lines.push(StyledLine::colored(text, hours_color(stat.total_hours)));
    }

    if data.stats.len() > shown.len() {
        lines.push(StyledLine::plain(format!(
            "... {} earlier day(s)",
            data.stats.len() - shown.len()
        )));
    }
}

fn join_set<'a>(items: impl Iterator<Item = &'a String>, max_len: usize) -> String {
    let joined = items.map(String::as_str).collect::<Vec<_>>().join(", ");
    truncate(&joined, max_len.max(4))
}

fn kv_line(label: &str, value: &str) -> String {
    format!("{label:<11}: {value}")
}

fn hours_bar_width(width: usize) -> usize {
    if width >= 120 {
        30
    } else if width >= 92 {
        20
    } else if width >= 72 {
        14
    } else {
        8
    }
}

fn hours_color(hours: f64) -> Color {
    if hours >= 4.0 {
        Color::Green
    } else if hours >= 1.0 {
        Color::Yellow
    } else {
        Color::Red
    }
}

fn hr(title: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }

    let core = format!(" {title} ");
    if core.len() >= width {
        return truncate(title, width);
    }

    let side = (width - core.len()) / 2;
    let right = width - core.len() - side;
    format!("{}{}{}", "-".repeat(side), core, "-".repeat(right))
}

fn select_layout_mode(width: usize) -> UiLayoutMode {
    if width >= 76 {
        UiLayoutMode::Full
    } else {
        UiLayoutMode::Compact
    }
}

fn center_line(text: &str, width: usize) -> String {
    let clipped = truncate(text, width);
    let left_pad = width.saturating_sub(clipped.len()) / 2;
    format!("{}{}", " ".repeat(left_pad), clipped)
}
