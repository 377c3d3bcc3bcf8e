//! Class index to label mapping.
//!
//! Label files hold one entry per line, either `"<id> <label words>"` or a bare
//! label whose id is its 0-based line number (blank lines still count).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

const BACKGROUND_LABELS: [&str; 2] = ["background", "???"];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelMap {
    labels: HashMap<u32, String>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let mut labels = HashMap::new();
        for (line_index, line) in text.lines().enumerate() {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.is_empty() {
                continue;
            }
            match columns[0].parse::<u32>() {
                Ok(id) if columns.len() > 1 => {
                    labels.insert(id, columns[1..].join(" "));
                }
                _ => {
                    labels.insert(line_index as u32, line.trim().to_string());
                }
            }
        }
        Self { labels }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read label file {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    /// Label for `index`, falling back to the index itself.
    pub fn label(&self, index: u32) -> String {
        self.labels
            .get(&index)
            .cloned()
            .unwrap_or_else(|| index.to_string())
    }

    /// True for "background" / "none of the above" classes.
    pub fn is_background(&self, index: u32) -> bool {
        self.labels.get(&index).map_or(false, |label| {
            BACKGROUND_LABELS
                .iter()
                .any(|bg| label.eq_ignore_ascii_case(bg))
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbered_and_bare_lines() {
        let labels = LabelMap::parse("0 background\n1 person\n3 traffic light\n\nzebra\n");
        assert_eq!(labels.label(1), "person");
        assert_eq!(labels.label(3), "traffic light");
        assert_eq!(labels.label(4), "zebra");
        assert_eq!(labels.label(77), "77");
        assert!(labels.is_background(0));
        assert!(!labels.is_background(1));
    }

    #[test]
    fn bare_numeric_line_is_a_label() {
        let labels = LabelMap::parse("???\n42\n");
        assert!(labels.is_background(0));
        assert_eq!(labels.label(1), "42");
    }
}
