//! Tolerant CSV tokenizer shared by every sheet the desk reads.
//!
//! Published sheets occasionally carry cells with embedded line breaks, so
//! physical lines are stitched back together whenever a line leaves a quoted
//! section open. The tokenizer never fails: malformed input degrades to the
//! best row it can produce.

use tracing::debug;

pub type RawRow = Vec<String>;

pub fn parse(text: &str) -> Vec<RawRow> {
    let mut rows = Vec::new();
    if text.trim().is_empty() {
        return rows;
    }

    let mut current = String::new();
    let mut in_quotes = false;

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() && !in_quotes {
            continue;
        }

        let odd_quotes = line.matches('"').count() % 2 != 0;

        if in_quotes {
            current.push('\n');
            current.push_str(line);
            if odd_quotes {
                in_quotes = false;
            }
        } else {
            current.clear();
            current.push_str(line);
            if odd_quotes {
                in_quotes = true;
                continue;
            }
        }

        if !in_quotes && !current.trim().is_empty() {
            push_row(&mut rows, &current);
            current.clear();
        }
    }

    if !current.trim().is_empty() {
        debug!(
            target: "tokenizer",
            length = current.len(),
            "input ended inside a quoted section; keeping partial row"
        );
        push_row(&mut rows, &current);
    }

    rows
}

/// Splits one logical line into trimmed fields.
pub fn parse_line(line: &str) -> RawRow {
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                row.push(field.trim().to_string());
                field.clear();
            }
            other => field.push(other),
        }
    }
    row.push(field.trim().to_string());

    row
}

fn push_row(rows: &mut Vec<RawRow>, line: &str) {
    let row = parse_line(line);
    if !row.is_empty() {
        rows.push(row);
    }
}
