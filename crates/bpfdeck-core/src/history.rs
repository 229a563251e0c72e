use std::collections::HashSet;

/// Append-only line history with a membership index.
///
/// Lines are identified by exact text, so a line the source legitimately
/// repeats is kept once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamHistory {
    entries: Vec<String>,
    seen: HashSet<String>,
}

impl StreamHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds from a persisted sequence, keeping its order as-is.
    pub fn from_entries(entries: Vec<String>) -> Self {
        let seen = entries.iter().cloned().collect();
        Self { entries, seen }
    }

    /// Appends the unseen lines of `batch` in batch order and returns how many were added.
    pub fn merge_batch<I, S>(&mut self, batch: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.entries.len();
        for line in batch {
            let line = line.as_ref();
            if self.seen.contains(line) {
                continue;
            }
            self.seen.insert(line.to_string());
            self.entries.push(line.to_string());
        }
        self.entries.len() - before
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, line: &str) -> bool {
        self.seen.contains(line)
    }

    pub fn newest_first(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().rev().map(String::as_str)
    }
}

/// `history` followed by the lines of `batch` not already present.
pub fn merge(history: &[String], batch: &[String]) -> Vec<String> {
    let mut merged = StreamHistory::from_entries(history.to_vec());
    merged.merge_batch(batch);
    merged.entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn merge_keeps_history_order_then_new_batch_lines() {
        let history = lines(&["boot", "attach eth0"]);
        let batch = lines(&["attach eth0", "drop icmp", "boot", "pass tcp"]);
        assert_eq!(
            merge(&history, &batch),
            lines(&["boot", "attach eth0", "drop icmp", "pass tcp"])
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let history = lines(&["a", "b"]);
        let batch = lines(&["c", "a", "d"]);
        let once = merge(&history, &batch);
        assert_eq!(merge(&once, &batch), once);
    }

    #[test]
    fn merge_collapses_duplicates_inside_one_batch() {
        let merged = merge(&[], &lines(&["same", "same", "other", "same"]));
        assert_eq!(merged, lines(&["same", "other"]));
    }

    #[test]
    fn merged_history_holds_every_input_line_once() {
        let history = lines(&["x1", "x2", "x3"]);
        let batch = lines(&["x3", "y1", "x1", "y2", "y1"]);
        let merged = merge(&history, &batch);
        for line in history.iter().chain(batch.iter()) {
            assert_eq!(merged.iter().filter(|m| *m == line).count(), 1, "{line}");
        }
    }

    #[test]
    fn merge_batch_reports_added_count() {
        let mut history = StreamHistory::from_entries(lines(&["a"]));
        assert_eq!(history.merge_batch(["a", "b"]), 1);
        assert_eq!(history.merge_batch(Vec::<String>::new()), 0);
        assert!(history.contains("b"));
        assert_eq!(history.newest_first().collect::<Vec<_>>(), vec!["b", "a"]);
    }
}
