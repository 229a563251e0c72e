use ratatui::style::{Color, Modifier, Style};

pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(142, 192, 124))
    .add_modifier(Modifier::BOLD);
pub const SELECTED_STYLE: Style = Style::new()
    .bg(Color::Rgb(131, 165, 152))
    .fg(Color::Black)
    .add_modifier(Modifier::BOLD);
pub const MUTED_STYLE: Style = Style::new().fg(Color::Rgb(148, 163, 184));
pub const EDITING_STYLE: Style = Style::new()
    .fg(Color::Rgb(250, 189, 47))
    .add_modifier(Modifier::BOLD);
pub const SUCCESS_STYLE: Style = Style::new().fg(Color::Rgb(34, 197, 94));
pub const ERROR_STYLE: Style = Style::new()
    .fg(Color::Rgb(239, 68, 68))
    .add_modifier(Modifier::BOLD);

pub const COLLECTOR_COLOR: Color = Color::Rgb(56, 189, 248);
pub const USERSPACE_COLOR: Color = Color::Rgb(211, 134, 155);

pub fn border_style(focused: bool) -> Style {
    if focused {
        Style::new().fg(Color::Rgb(250, 189, 47))
    } else {
        Style::new().fg(Color::Rgb(71, 85, 105))
    }
}

pub fn zebra_row_style(index: usize) -> Style {
    let bg = if index % 2 == 0 {
        Color::Rgb(18, 20, 26)
    } else {
        Color::Rgb(24, 27, 34)
    };
    Style::new().bg(bg)
}

pub fn poll_badge(running: bool) -> (&'static str, Style) {
    if running {
        ("● polling", SUCCESS_STYLE)
    } else {
        ("○ stopped", MUTED_STYLE)
    }
}
