// mailsentry/src/eval/dataset.rs
//
// Labeled evaluation corpus.
//
// CSV with header `text,label,phishing_type`:
//   text           "Subject: <subject>\n\n<body>"
//   label          1 = phishing (positive), 0 = legitimate
//   phishing_type  free-form category, optional
//
// Rows whose label is not 0/1 (or that do not deserialize at all) are skipped
// with a warning; the rest of the file is still used.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::item::Item;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledItem {
    pub item: Item,
    pub label: bool,
    pub phishing_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Row {
    text: String,
    label: String,
    #[serde(default)]
    phishing_type: Option<String>,
}

fn parse_label(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" => Some(true),
        "0" | "0.0" | "false" => Some(false),
        _ => None,
    }
}

/// Split `Subject: ...\n\n<body>` into an item. Text without the prefix is
/// all body.
pub fn item_from_text(text: &str) -> Item {
    let normalized = text.replace("\r\n", "\n");
    let Some(rest) = normalized.trim_start().strip_prefix("Subject:") else {
        return Item::new("", "", normalized.clone(), "");
    };
    let (subject, body) = match rest.split_once("\n\n") {
        Some((s, b)) => (s, b),
        None => rest.split_once('\n').unwrap_or((rest, "")),
    };
    Item::new(subject.trim(), "", body.trim(), "")
}

pub fn parse<R: Read>(reader: R) -> Result<Vec<LabeledItem>> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let mut out = Vec::new();
    let mut skipped = 0usize;

    for (i, row) in rdr.deserialize::<Row>().enumerate() {
        // header is line 1
        let line = i + 2;
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                warn!(line, error = %e, "skipping malformed row");
                skipped += 1;
                continue;
            }
        };
        let Some(label) = parse_label(&row.label) else {
            warn!(line, label = %row.label, "skipping row with unparseable label");
            skipped += 1;
            continue;
        };
        out.push(LabeledItem {
            item: item_from_text(&row.text),
            label,
            phishing_type: row.phishing_type.filter(|t| !t.trim().is_empty()),
        });
    }

    if skipped > 0 {
        info!(kept = out.len(), skipped, "dataset rows skipped");
    }
    Ok(out)
}

pub fn load(path: &Path) -> Result<Vec<LabeledItem>> {
    let file = std::fs::File::open(path).with_context(|| format!("opening dataset {}", path.display()))?;
    let items = parse(file)?;
    info!("Loaded {} labeled items from {}", items.len(), path.display());
    Ok(items)
}
