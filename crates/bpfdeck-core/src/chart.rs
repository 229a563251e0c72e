use chrono::{DateTime, Local};
use std::collections::VecDeque;

pub const DEFAULT_CHART_WINDOW: usize = 15;
pub const MAX_CHART_WINDOW: usize = 1000;

/// Fixed-capacity FIFO of `(label, value)` samples.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    window: usize,
    points: VecDeque<(String, u64)>,
}

impl ChartSeries {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.clamp(1, MAX_CHART_WINDOW),
            points: VecDeque::new(),
        }
    }

    pub fn push(&mut self, label: impl Into<String>, value: u64) {
        self.points.push_back((label.into(), value));
        while self.points.len() > self.window {
            self.points.pop_front();
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = (&str, u64)> {
        self.points.iter().map(|(label, value)| (label.as_str(), *value))
    }

    pub fn labels(&self) -> Vec<&str> {
        self.points.iter().map(|(label, _)| label.as_str()).collect()
    }

    pub fn values(&self) -> Vec<u64> {
        self.points.iter().map(|(_, value)| *value).collect()
    }

    pub fn max_value(&self) -> u64 {
        self.points.iter().map(|(_, value)| *value).max().unwrap_or(0)
    }

    pub fn last(&self) -> Option<(&str, u64)> {
        self.points.back().map(|(label, value)| (label.as_str(), *value))
    }
}

/// Rolling count-over-time view of one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Visualizer {
    title: String,
    series: ChartSeries,
}

impl Visualizer {
    pub fn new(title: impl Into<String>, window: usize) -> Self {
        Self {
            title: title.into(),
            series: ChartSeries::new(window),
        }
    }

    pub fn update(&mut self, count: usize) {
        self.update_at(count, Local::now());
    }

    pub fn update_at(&mut self, count: usize, at: DateTime<Local>) {
        self.series
            .push(at.format("%H:%M:%S").to_string(), count as u64);
    }

    /// First sample for a chart opened over an existing history.
    pub fn seed(&mut self, count: usize) {
        if self.series.is_empty() && count > 0 {
            self.update(count);
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn series(&self) -> &ChartSeries {
        &self.series
    }

    /// `(x, y)` points for plotting, x being the sample position in the window.
    pub fn plot_points(&self) -> Vec<(f64, f64)> {
        self.series
            .points()
            .enumerate()
            .map(|(idx, (_, value))| (idx as f64, value as f64))
            .collect()
    }
}
