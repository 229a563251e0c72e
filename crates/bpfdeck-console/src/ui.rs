use crate::state::{App, Focus, FormField, InputMode};
use crate::theme;
use bpfdeck_client::{NotificationLevel, OperationState};
use bpfdeck_core::{LoadedProgram, StreamKind};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        Axis, Block, Borders, Cell, Chart, Clear, Dataset, GraphType, List, ListItem, ListState,
        Paragraph, Row, Table, TableState, Wrap,
    },
    Frame,
};

pub fn render(f: &mut Frame, app: &App) {
    let area = f.size();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(area);

    render_header(f, app, rows[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(34), Constraint::Percentage(66)])
        .split(rows[1]);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(6), Constraint::Length(10)])
        .split(columns[0]);
    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(columns[1]);

    render_programs(f, app, left[0]);
    render_form(f, app, left[1]);
    render_loaded(f, app, right[0]);

    let streams = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(right[1]);
    for (stream, area) in StreamKind::ALL.into_iter().zip(streams.iter()) {
        render_stream(f, app, stream, *area);
    }

    render_footer(f, app, rows[2]);
    render_toasts(f, app, area);
    if app.show_help {
        render_help(f, area);
    }
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let operation_style = match app.operation {
        OperationState::Failed(_) => theme::ERROR_STYLE,
        OperationState::Succeeded(_) => theme::SUCCESS_STYLE,
        OperationState::InFlight(_) => theme::EDITING_STYLE,
        OperationState::Idle => theme::MUTED_STYLE,
    };
    let userspace = if app.userspace_running {
        Span::styled("userspace running", theme::SUCCESS_STYLE)
    } else {
        Span::styled("userspace idle", theme::MUTED_STYLE)
    };
    let line = Line::from(vec![
        Span::styled(" bpfdeck ", theme::HEADER_STYLE),
        Span::styled(app.config.server.as_str(), theme::MUTED_STYLE),
        Span::raw("  op: "),
        Span::styled(app.operation.label(), operation_style),
        Span::raw("  "),
        userspace,
    ]);
    f.render_widget(Paragraph::new(line), area);
}

fn block(title: String, focused: bool) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(theme::border_style(focused))
}

fn render_programs(f: &mut Frame, app: &App, area: Rect) {
    let programs = app.filtered_programs();
    let title = if app.input_mode == InputMode::Filter {
        format!("Programs /{}_", app.filter)
    } else if app.filter.is_empty() {
        format!("Programs ({})", programs.len())
    } else {
        format!("Programs /{} ({})", app.filter, programs.len())
    };
    let items: Vec<ListItem> = programs
        .iter()
        .map(|name| {
            let marker = if *name == app.form.program { "▸ " } else { "  " };
            ListItem::new(format!("{marker}{name}"))
        })
        .collect();
    let list = List::new(items)
        .block(block(title, app.focus == Focus::Programs))
        .highlight_style(theme::SELECTED_STYLE);
    let mut state = ListState::default().with_selected(if programs.is_empty() {
        None
    } else {
        Some(app.program_selected)
    });
    f.render_stateful_widget(list, area, &mut state);
}

fn render_form(f: &mut Frame, app: &App, area: Rect) {
    let focused = app.focus == Focus::Form;
    let lines: Vec<Line> = FormField::ALL
        .iter()
        .map(|field| {
            let value = match field {
                FormField::Action => format!("◂ {} ▸", app.form.action()),
                FormField::UserspaceProgram => match app.selected_userspace_program() {
                    Some(program) => format!("◂ {program} ▸"),
                    None => "(none)".to_string(),
                },
                other => app.form.text(*other).unwrap_or_default().to_string(),
            };
            let current = focused && app.form.field() == *field;
            let value_style = if current && app.input_mode == InputMode::Editing {
                theme::EDITING_STYLE
            } else if current {
                theme::SELECTED_STYLE
            } else {
                Style::default()
            };
            let cursor = if current && app.input_mode == InputMode::Editing {
                "_"
            } else {
                ""
            };
            Line::from(vec![
                Span::styled(format!("{:<12}", field.label()), theme::MUTED_STYLE),
                Span::styled(format!("{value}{cursor}"), value_style),
            ])
        })
        .collect();
    let paragraph = Paragraph::new(lines).block(block("Action".to_string(), focused));
    f.render_widget(paragraph, area);
}

fn render_loaded(f: &mut Frame, app: &App, area: Rect) {
    let focused = app.focus == Focus::Loaded;
    let split = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);

    let header = Row::new(["ID", "Name", "Type", "Pinned"].map(Cell::from))
        .style(theme::HEADER_STYLE);
    let rows: Vec<Row> = app
        .inventory
        .loaded
        .iter()
        .enumerate()
        .map(|(idx, program)| {
            Row::new(vec![
                Cell::from(program.id.to_string()),
                Cell::from(program.name.clone()),
                Cell::from(program.prog_type.clone()),
                Cell::from(program.pinned_label().to_string()),
            ])
            .style(theme::zebra_row_style(idx))
        })
        .collect();
    let table = Table::new(
        rows,
        [
            Constraint::Length(6),
            Constraint::Percentage(30),
            Constraint::Length(14),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(block(
        format!("Loaded ({})", app.inventory.loaded.len()),
        focused,
    ))
    .highlight_style(theme::SELECTED_STYLE);
    let mut state = TableState::default().with_selected(if app.inventory.loaded.is_empty() {
        None
    } else {
        Some(app.loaded_selected)
    });
    f.render_stateful_widget(table, split[0], &mut state);

    let details = match app.selected_loaded() {
        Some(program) => detail_lines(program),
        None => vec![Line::from(Span::styled(
            "No loaded programs",
            theme::MUTED_STYLE,
        ))],
    };
    let paragraph = Paragraph::new(details)
        .block(block("Details".to_string(), false))
        .wrap(Wrap { trim: true });
    f.render_widget(paragraph, split[1]);
}

fn detail_lines(program: &LoadedProgram) -> Vec<Line<'static>> {
    let loaded_at = program
        .loaded_at_utc()
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| program.loaded_at.to_string());
    let mut fields = vec![
        ("Name", program.name.clone()),
        ("Type", program.prog_type.clone()),
        ("Tag", program.tag.clone()),
        ("GPL", yes_no(program.gpl_compatible)),
        ("Loaded", loaded_at),
        ("UID", program.uid.to_string()),
        ("Xlated", format!("{} B", program.bytes_xlated)),
        ("JITed", format!("{} ({} B)", yes_no(program.jited), program.bytes_jited)),
        ("Memlock", format!("{} B", program.bytes_memlock)),
        ("Maps", program.map_ids_label()),
        ("Pinned", program.pinned_label().to_string()),
    ];
    if let Some(btf_id) = program.btf_id {
        fields.push(("BTF", btf_id.to_string()));
    }
    if program.orphaned {
        fields.push(("Orphaned", "yes".to_string()));
    }
    fields
        .into_iter()
        .map(|(label, value)| {
            Line::from(vec![
                Span::styled(format!("{label:<9}"), theme::MUTED_STYLE),
                Span::raw(value),
            ])
        })
        .collect()
}

fn yes_no(flag: bool) -> String {
    let text = if flag { "yes" } else { "no" };
    text.to_string()
}

fn render_stream(f: &mut Frame, app: &App, stream: StreamKind, area: Rect) {
    let sync = app.synchronizer(stream);
    let focused = match stream {
        StreamKind::Collector => app.focus == Focus::Collector,
        StreamKind::Userspace => app.focus == Focus::Userspace,
    };
    let (badge, badge_style) = theme::poll_badge(sync.is_running());

    let area = if app.show_charts {
        let split = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(area);
        render_chart(f, app, stream, split[1]);
        split[0]
    } else {
        area
    };

    let mut title = vec![
        Span::raw(format!("{} ({}) ", stream.title(), sync.history().len())),
        Span::styled(badge, badge_style),
    ];
    if let Some(err) = app.poll_error(stream) {
        title.push(Span::styled(format!(" {err}"), theme::ERROR_STYLE));
    }
    let inner_height = area.height.saturating_sub(2) as usize;
    let lines = sync.rendered_lines();
    let visible: Vec<Line> = if stream.newest_first() {
        lines.iter().take(inner_height).map(|l| Line::raw(*l)).collect()
    } else {
        let skip = lines.len().saturating_sub(inner_height);
        lines.iter().skip(skip).map(|l| Line::raw(*l)).collect()
    };
    let paragraph = Paragraph::new(visible).block(
        Block::default()
            .borders(Borders::ALL)
            .title(Line::from(title))
            .border_style(theme::border_style(focused)),
    );
    f.render_widget(paragraph, area);
}

fn render_chart(f: &mut Frame, app: &App, stream: StreamKind, area: Rect) {
    let visualizer = app.synchronizer(stream).visualizer();
    let series = visualizer.series();
    let points = visualizer.plot_points();
    let color = match stream {
        StreamKind::Collector => theme::COLLECTOR_COLOR,
        StreamKind::Userspace => theme::USERSPACE_COLOR,
    };
    let datasets = vec![Dataset::default()
        .name("lines")
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(&points)];

    let max_x = series.window().saturating_sub(1).max(1) as f64;
    let max_y = (series.max_value().max(1) as f64 * 1.1).ceil();
    let labels = series.labels();
    let x_labels = vec![
        Span::raw(labels.first().copied().unwrap_or("").to_string()),
        Span::raw(labels.last().copied().unwrap_or("").to_string()),
    ];
    let y_labels = vec![
        Span::raw("0"),
        Span::raw(format!("{}", max_y as u64)),
    ];

    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(Span::styled(
                    format!(" {} ", visualizer.title()),
                    Style::default().fg(color).add_modifier(Modifier::BOLD),
                ))
                .border_style(theme::border_style(false)),
        )
        .x_axis(Axis::default().bounds([0.0, max_x]).labels(x_labels))
        .y_axis(Axis::default().bounds([0.0, max_y]).labels(y_labels));
    f.render_widget(chart, area);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let hint = match app.input_mode {
        InputMode::Filter => "type to filter · Enter/Esc done",
        InputMode::Editing => "type to edit · Enter/Esc done",
        InputMode::Normal => {
            "Tab focus · ^L load ^A attach ^D detach ^U unload · c collector · o output · v charts · s/x userspace · d dump · r refresh · ? help · q quit"
        }
    };
    f.render_widget(
        Paragraph::new(Span::styled(hint, theme::MUTED_STYLE)),
        area,
    );
}

fn render_toasts(f: &mut Frame, app: &App, area: Rect) {
    let toasts: Vec<_> = app.toasts.visible().collect();
    if toasts.is_empty() {
        return;
    }
    let width = area.width.min(60);
    let height = (toasts.len() as u16 + 2).min(area.height);
    let rect = Rect {
        x: area.x + area.width.saturating_sub(width + 1),
        y: area.y + area.height.saturating_sub(height + 1),
        width,
        height,
    };
    let lines: Vec<Line> = toasts
        .iter()
        .map(|toast| {
            let style = match toast.level {
                NotificationLevel::Success => theme::SUCCESS_STYLE,
                NotificationLevel::Error => theme::ERROR_STYLE,
            };
            Line::from(Span::styled(toast.message.clone(), style))
        })
        .collect();
    f.render_widget(Clear, rect);
    f.render_widget(
        Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Notifications"))
            .wrap(Wrap { trim: true }),
        rect,
    );
}

fn render_help(f: &mut Frame, area: Rect) {
    let width = area.width.min(56);
    let height = area.height.min(20);
    let rect = Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height,
    };
    let bindings = [
        ("Tab / S-Tab", "Switch panel"),
        ("j / k", "Move selection"),
        ("Enter", "Pick / edit / submit"),
        ("h / l", "Cycle action or userspace program"),
        ("/", "Filter programs"),
        ("Ctrl-L", "Load program"),
        ("Ctrl-A", "Attach program"),
        ("Ctrl-D", "Detach program"),
        ("Ctrl-U", "Unload program"),
        ("c", "Start/stop collector polling"),
        ("o", "Start/stop userspace polling"),
        ("v", "Show/hide charts"),
        ("s / x", "Start/stop userspace program"),
        ("d", "Dump focused stream"),
        ("r", "Refresh"),
        ("q", "Quit"),
    ];
    let lines: Vec<Line> = bindings
        .iter()
        .map(|(keys, text)| {
            Line::from(vec![
                Span::styled(format!("{keys:<12}"), theme::HEADER_STYLE),
                Span::raw(*text),
            ])
        })
        .collect();
    f.render_widget(Clear, rect);
    f.render_widget(
        Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Help")
                .border_style(theme::border_style(true)),
        ),
        rect,
    );
}
