//! Markdown table rendering for enriched lists
//!
//! Provides star ordering, cell escaping, and the per-category tables.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Deserialize;

use crate::parser::{ParsedCategory, ParsedItem, ParsedList};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableColumn {
    Stars,
    Name,
    Description,
    LastCommit,
}

impl TableColumn {
    fn heading(self) -> &'static str {
        match self {
            TableColumn::Stars => "Stars",
            TableColumn::Name => "Name",
            TableColumn::Description => "Description",
            TableColumn::LastCommit => "Last Commit",
        }
    }

    fn align(self) -> &'static str {
        match self {
            TableColumn::Stars => "---:",
            _ => "---",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    StarsDesc,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    pub columns: Vec<TableColumn>,
    #[serde(default)]
    pub sort: SortOrder,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            columns: vec![TableColumn::Stars, TableColumn::Name, TableColumn::Description],
            sort: SortOrder::StarsDesc,
        }
    }
}

/// Most stars first; unknown stars after zero; ties by name
pub fn sort_items(items: &mut [ParsedItem], order: SortOrder) {
    match order {
        SortOrder::StarsDesc => items.sort_by(compare_by_stars),
    }
}

fn compare_by_stars(a: &ParsedItem, b: &ParsedItem) -> Ordering {
    let left = a.stars.map(i128::from).unwrap_or(-1);
    let right = b.stars.map(i128::from).unwrap_or(-1);
    right
        .cmp(&left)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

/// Escape a value for use inside a table cell
pub fn escape_table_cell(value: &str) -> String {
    value
        .replace('|', "\\|")
        .replace("\r\n", "<br>")
        .replace('\n', "<br>")
        .trim()
        .to_string()
}

/// `2024-01-31T12:00:00Z` -> `2024-01-31`
fn format_commit_date(value: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| value.chars().take(10).collect())
}

/// GitHub-style heading anchor
fn anchor_for(title: &str) -> String {
    title
        .trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('-'),
            c if c.is_alphanumeric() || c == '-' || c == '_' => Some(c),
            _ => None,
        })
        .collect()
}

/// Render the whole list as markdown
pub fn render_list(list: &ParsedList, table: &TableConfig) -> String {
    let mut chunks: Vec<String> = Vec::new();

    match &list.header {
        Some(header) => {
            let header = header.trim();
            if !header.is_empty() {
                chunks.push(header.to_string());
                chunks.push(String::new());
            }
        }
        None => {
            if let Some(title) = &list.title {
                chunks.push(format!("# {}", title));
                chunks.push(String::new());
            }
        }
    }

    let visible: Vec<&ParsedCategory> = list
        .categories
        .iter()
        .filter(|c| !c.items.is_empty())
        .collect();

    if list.toc && !visible.is_empty() {
        chunks.push(render_toc(&visible));
        chunks.push(String::new());
    }

    for category in visible {
        chunks.push(render_category(category, table));
        chunks.push(String::new());
    }

    format!("{}\n", chunks.join("\n").trim())
}

fn render_toc(categories: &[&ParsedCategory]) -> String {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut lines = vec!["## Contents".to_string(), String::new()];

    for category in categories {
        let base = anchor_for(&category.title);
        let count = seen.entry(base.clone()).or_insert(0);
        let anchor = if *count == 0 {
            base
        } else {
            format!("{}-{}", base, count)
        };
        *count += 1;
        lines.push(format!("- [{}](#{})", category.title, anchor));
    }

    lines.join("\n")
}

fn render_category(category: &ParsedCategory, table: &TableConfig) -> String {
    let headings: Vec<&str> = table.columns.iter().map(|c| c.heading()).collect();
    let aligns: Vec<&str> = table.columns.iter().map(|c| c.align()).collect();

    let mut lines = vec![
        format!("## {}", category.title),
        String::new(),
        format!("| {} |", headings.join(" | ")),
        format!("| {} |", aligns.join(" | ")),
    ];

    for item in &category.items {
        let cells: Vec<String> = table.columns.iter().map(|c| render_cell(item, *c)).collect();
        lines.push(format!("| {} |", cells.join(" | ")));
    }

    lines.join("\n")
}

fn render_cell(item: &ParsedItem, column: TableColumn) -> String {
    match column {
        TableColumn::Stars => item
            .stars
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string()),
        TableColumn::Name => format!("[{}]({})", escape_table_cell(&item.name), item.url),
        TableColumn::Description => escape_table_cell(&item.description),
        TableColumn::LastCommit => item
            .last_commit_at
            .as_deref()
            .map(format_commit_date)
            .unwrap_or_else(|| "-".to_string()),
    }
}
