//! Metadata codec
//!
//! Reads and patches the two structures embedded in a markdown document:
//! - metadata fields, one `- **Label**: value` line each, under a `Metadata` heading
//! - pipe tables that follow a section heading
//!
//! Every function here is a textual patch: only the targeted line changes and
//! the rest of the document is returned byte-for-byte, line endings included.

use std::ops::Range;

use crate::error::{GraphError, Result};
use crate::models::METADATA_HEADING;

/// One data row of a pipe table, cells trimmed and unescaped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub cells: Vec<String>,
}

impl TableRow {
    /// First column, the row key
    pub fn key(&self) -> &str {
        self.cell(0).unwrap_or_default()
    }

    pub fn cell(&self, index: usize) -> Option<&str> {
        self.cells.get(index).map(String::as_str)
    }
}

/// A line of the document: its content without line ending, the ending, and
/// the byte offset where it starts.
struct Line<'a> {
    content: &'a str,
    ending: &'a str,
    start: usize,
    /// Heading level and title, if this line is a heading outside a code fence
    heading: Option<(usize, &'a str)>,
    in_fence: bool,
}

impl Line<'_> {
    fn full_range(&self) -> Range<usize> {
        self.start..self.start + self.content.len() + self.ending.len()
    }

    fn end_of_line(&self) -> usize {
        self.start + self.content.len() + self.ending.len()
    }

    fn is_table_line(&self) -> bool {
        !self.in_fence && self.content.trim_start().starts_with('|')
    }
}

fn split_lines(text: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut in_fence = false;

    for piece in text.split_inclusive('\n') {
        let without_lf = piece.strip_suffix('\n').unwrap_or(piece);
        let content = without_lf.strip_suffix('\r').unwrap_or(without_lf);
        let ending = &piece[content.len()..];

        let trimmed = content.trim_start();
        let is_fence = trimmed.starts_with("```") || trimmed.starts_with("~~~");
        let heading = if in_fence || is_fence { None } else { parse_heading(content) };

        lines.push(Line {
            content,
            ending,
            start,
            heading,
            in_fence: in_fence || is_fence,
        });

        if is_fence {
            in_fence = !in_fence;
        }
        start += piece.len();
    }

    lines
}

fn parse_heading(content: &str) -> Option<(usize, &str)> {
    let trimmed = content.trim_start();
    let level = trimmed.bytes().take_while(|b| *b == b'#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    Some((level, rest.trim()))
}

/// Newline style used for lines this module inserts
fn newline_of(text: &str) -> &'static str {
    if text.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

/// Body line range of the section under `title`: up to the next heading of
/// equal-or-higher level, or the end of the document.
fn find_section(lines: &[Line<'_>], title: &str) -> Option<(usize, Range<usize>)> {
    let title = title.trim();
    let (heading_idx, level) = lines.iter().enumerate().find_map(|(i, line)| {
        line.heading
            .filter(|(_, t)| *t == title)
            .map(|(level, _)| (i, level))
    })?;

    let end = lines[heading_idx + 1..]
        .iter()
        .position(|line| matches!(line.heading, Some((l, _)) if l <= level))
        .map(|offset| heading_idx + 1 + offset)
        .unwrap_or(lines.len());

    Some((heading_idx, heading_idx + 1..end))
}

// ============================================================================
// Fields
// ============================================================================

/// Byte offsets, relative to the line content, of a `Label: value` line
struct FieldLine<'a> {
    label: &'a str,
    /// Just past the colon (and closing `**` when the colon is inside the bold)
    after_colon: usize,
    value: Range<usize>,
}

fn parse_field_line(content: &str) -> Option<FieldLine<'_>> {
    let mut pos = content.len() - content.trim_start().len();
    let rest = &content[pos..];
    if rest.starts_with("- ") || rest.starts_with("* ") || rest.starts_with("+ ") {
        pos += 1;
        pos += content[pos..].len() - content[pos..].trim_start().len();
    }
    let rest = &content[pos..];
    if rest.is_empty() || rest.starts_with('|') || rest.starts_with('#') {
        return None;
    }

    let (label, after_colon) = if let Some(inner) = rest.strip_prefix("**") {
        let close = inner.find("**")?;
        let bold = &inner[..close];
        let after_bold = pos + 2 + close + 2;
        if let Some(label) = bold.trim_end().strip_suffix(':') {
            (label.trim(), after_bold)
        } else {
            let tail = &content[after_bold..];
            let tail_trimmed = tail.trim_start();
            if !tail_trimmed.starts_with(':') {
                return None;
            }
            (bold.trim(), after_bold + (tail.len() - tail_trimmed.len()) + 1)
        }
    } else {
        let colon = rest.find(':')?;
        let label = rest[..colon].trim();
        if label.contains('*') || label.contains('`') || rest[colon + 1..].starts_with("//") {
            return None;
        }
        (label, pos + colon + 1)
    };

    if label.is_empty() {
        return None;
    }

    let value_part = &content[after_colon..];
    let value_start = after_colon + (value_part.len() - value_part.trim_start().len());
    let value_end = content.trim_end().len().max(value_start);

    Some(FieldLine {
        label,
        after_colon,
        value: value_start..value_end,
    })
}

/// Index and parsed form of the first line carrying `label`. Lookup is confined
/// to the Metadata section when the document has one.
fn find_field<'a>(lines: &'a [Line<'a>], label: &str) -> Option<(usize, FieldLine<'a>)> {
    let label = label.trim();
    let range = find_section(lines, METADATA_HEADING)
        .map(|(_, body)| body)
        .unwrap_or(0..lines.len());

    range.into_iter().find_map(|i| {
        let line = &lines[i];
        if line.in_fence || line.heading.is_some() || line.is_table_line() {
            return None;
        }
        parse_field_line(line.content)
            .filter(|field| field.label == label)
            .map(|field| (i, field))
    })
}

/// Value of the metadata field `label`, trimmed
pub fn extract_field(text: &str, label: &str) -> Option<String> {
    let lines = split_lines(text);
    let (i, field) = find_field(&lines, label)?;
    Some(lines[i].content[field.value].trim().to_string())
}

/// Sets the metadata field `label` to `value`.
///
/// An existing line is patched in place; otherwise a new `- **Label**: value`
/// line goes after the last field of the Metadata section.
pub fn upsert_field(text: &str, label: &str, value: &str) -> Result<String> {
    let value = single_line(value);
    let lines = split_lines(text);
    let newline = newline_of(text);

    if let Some((i, field)) = find_field(&lines, label) {
        let line = &lines[i];
        let mut patched = text.to_string();
        if field.value.is_empty() {
            let range = line.start + field.after_colon..line.start + line.content.len();
            patched.replace_range(range, &format!(" {}", value));
        } else {
            let range = line.start + field.value.start..line.start + field.value.end;
            patched.replace_range(range, &value);
        }
        return Ok(patched);
    }

    let (heading_idx, body) = find_section(&lines, METADATA_HEADING).ok_or_else(|| {
        GraphError::ParseFailure(format!("no {} section to hold field '{}'", METADATA_HEADING, label))
    })?;
    // New fields join the first run of field lines under the heading
    let is_field = |i: usize| {
        let line = &lines[i];
        !line.in_fence && !line.is_table_line() && parse_field_line(line.content).is_some()
    };
    let anchor = match body.clone().find(|&i| is_field(i)) {
        Some(first) => (first..body.end)
            .take_while(|&i| is_field(i))
            .last()
            .unwrap_or(first),
        None => heading_idx,
    };

    Ok(insert_after(
        text,
        &lines[anchor],
        &format!("- **{}**: {}", label.trim(), value),
        newline,
    ))
}

// ============================================================================
// Tables
// ============================================================================

struct TableSpan {
    header: usize,
    rows: Range<usize>,
}

fn is_separator(content: &str) -> bool {
    let trimmed = content.trim();
    trimmed.starts_with('|')
        && trimmed.contains('-')
        && trimmed.chars().all(|c| matches!(c, '|' | '-' | ':' | ' ' | '\t'))
}

fn find_table(lines: &[Line<'_>], heading: &str) -> Result<TableSpan> {
    let (_, body) = find_section(lines, heading)
        .ok_or_else(|| GraphError::ParseFailure(format!("no '{}' section", heading)))?;

    let header = body
        .clone()
        .find(|&i| lines[i].is_table_line())
        .ok_or_else(|| GraphError::ParseFailure(format!("no table under '{}'", heading)))?;

    let separator = header + 1;
    if separator >= body.end || !is_separator(lines[separator].content) {
        return Err(GraphError::ParseFailure(format!(
            "table under '{}' has no header separator",
            heading
        )));
    }

    let end = (separator + 1..body.end)
        .find(|&i| !lines[i].is_table_line())
        .unwrap_or(body.end);

    Ok(TableSpan {
        header,
        rows: separator + 1..end,
    })
}

fn split_cells(content: &str) -> Vec<String> {
    let trimmed = content.trim();
    let trimmed = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = trimmed.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => {
                cells.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        cells.push(current.trim().to_string());
    }

    cells
}

fn parse_row(content: &str) -> Option<TableRow> {
    let cells = split_cells(content);
    // Template placeholder rows like `| | |` carry no data
    if cells.iter().all(String::is_empty) {
        return None;
    }
    Some(TableRow { cells })
}

/// Renders a row with `|` escaped and newlines collapsed in every cell
pub fn render_row(key: &str, values: &[String]) -> String {
    let cells: Vec<String> = std::iter::once(key.to_string())
        .chain(values.iter().cloned())
        .map(|cell| single_line(&cell).replace('|', "\\|"))
        .collect();
    format!("| {} |", cells.join(" | "))
}

/// Data rows of the table under `heading`, in document order
pub fn extract_table(text: &str, heading: &str) -> Result<Vec<TableRow>> {
    let lines = split_lines(text);
    let span = find_table(&lines, heading)?;
    Ok(span
        .rows
        .filter_map(|i| parse_row(lines[i].content))
        .collect())
}

/// Column titles of the table under `heading`
pub fn extract_table_header(text: &str, heading: &str) -> Result<Vec<String>> {
    let lines = split_lines(text);
    let span = find_table(&lines, heading)?;
    Ok(split_cells(lines[span.header].content))
}

/// Replaces the first row keyed `key` in place, or appends a new row after the
/// last data row (right after the separator when the table is empty).
pub fn upsert_table_row(text: &str, heading: &str, key: &str, values: &[String]) -> Result<String> {
    let lines = split_lines(text);
    let span = find_table(&lines, heading)?;
    let row = render_row(key.trim(), values);

    let existing = span.rows.clone().find(|&i| {
        parse_row(lines[i].content).is_some_and(|r| r.key() == key.trim())
    });

    if let Some(i) = existing {
        let line = &lines[i];
        let mut patched = text.to_string();
        patched.replace_range(line.start..line.start + line.content.len(), &row);
        return Ok(patched);
    }

    let anchor = if span.rows.is_empty() {
        span.header + 1
    } else {
        span.rows.end - 1
    };
    Ok(insert_after(text, &lines[anchor], &row, newline_of(text)))
}

/// Removes every row keyed `key`. Returns the text unchanged when there is none.
pub fn remove_table_row(text: &str, heading: &str, key: &str) -> Result<String> {
    remove_rows_where(text, heading, key, false)
}

/// Keeps the first row keyed `key` and removes any later duplicates
pub fn dedupe_table_rows(text: &str, heading: &str, key: &str) -> Result<String> {
    remove_rows_where(text, heading, key, true)
}

fn remove_rows_where(text: &str, heading: &str, key: &str, keep_first: bool) -> Result<String> {
    let lines = split_lines(text);
    let span = find_table(&lines, heading)?;
    let key = key.trim();

    let mut matching: Vec<usize> = span
        .rows
        .filter(|&i| parse_row(lines[i].content).is_some_and(|r| r.key() == key))
        .collect();
    if keep_first && !matching.is_empty() {
        matching.remove(0);
    }

    let mut patched = text.to_string();
    for &i in matching.iter().rev() {
        patched.replace_range(lines[i].full_range(), "");
    }
    Ok(patched)
}

fn insert_after(text: &str, anchor: &Line<'_>, new_line: &str, newline: &str) -> String {
    let mut patched = text.to_string();
    let at = anchor.end_of_line();
    if anchor.ending.is_empty() {
        patched.insert_str(at, &format!("{}{}", newline, new_line));
    } else {
        patched.insert_str(at, &format!("{}{}", new_line, newline));
    }
    patched
}

fn single_line(value: &str) -> String {
    value
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Payments\n\n## Metadata\n- **Name**: Payments\n- **ID**: CAP-100001\n- **Status**:  In Draft  \n\nSome prose: with a colon.\n\n## Enablers\n| Enabler ID | Name | Status |\n|------------|------|--------|\n| ENB-000001 | One | Draft |\n| ENB-000002 | Two | Draft |\n\n## Dependencies\n\n### Internal Upstream Dependency\n| Capability ID | Description |\n|---------------|-------------|\n\n### Internal Downstream Impact\n| Capability ID | Description |\n|---------------|-------------|\n| CAP-100002 | feeds data |\n";

    fn v(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extract_field_is_exact_on_labels() {
        let text = "## Metadata\n- **ID**: ENB-000001\n- **Capability ID**: CAP-100001\n";
        assert_eq!(extract_field(text, "ID").as_deref(), Some("ENB-000001"));
        assert_eq!(extract_field(text, "Capability ID").as_deref(), Some("CAP-100001"));
        assert_eq!(extract_field(text, "Capability"), None);
    }

    #[test]
    fn test_extract_field_tolerates_whitespace_and_styles() {
        assert_eq!(extract_field(DOC, "Status").as_deref(), Some("In Draft"));
        assert_eq!(extract_field("**Owner:** Ada\n", "Owner").as_deref(), Some("Ada"));
        assert_eq!(extract_field("Priority:   High\n", "Priority").as_deref(), Some("High"));
    }

    #[test]
    fn test_extract_field_ignores_code_fences_and_urls() {
        let text = "```\nName: hidden\n```\nhttps://example.com\n";
        assert_eq!(extract_field(text, "Name"), None);
        assert_eq!(extract_field(text, "https"), None);
    }

    #[test]
    fn test_upsert_field_round_trip_changes_one_line() {
        let patched = upsert_field(DOC, "Status", "Implemented").unwrap();
        assert_eq!(extract_field(&patched, "Status").as_deref(), Some("Implemented"));

        let before: Vec<&str> = DOC.lines().collect();
        let after: Vec<&str> = patched.lines().collect();
        assert_eq!(before.len(), after.len());
        let changed: Vec<usize> = (0..before.len()).filter(|&i| before[i] != after[i]).collect();
        assert_eq!(changed.len(), 1);
        assert_eq!(after[changed[0]], "- **Status**:  Implemented  ");
    }

    #[test]
    fn test_upsert_field_appends_missing_field_to_metadata() {
        let patched = upsert_field(DOC, "Priority", "High").unwrap();
        assert!(patched.contains("- **Status**:  In Draft  \n- **Priority**: High\n"));
        assert_eq!(extract_field(&patched, "Priority").as_deref(), Some("High"));
    }

    #[test]
    fn test_upsert_field_fills_empty_value() {
        let text = "## Metadata\n- **Owner**:\n";
        let patched = upsert_field(text, "Owner", "Ada").unwrap();
        assert_eq!(patched, "## Metadata\n- **Owner**: Ada\n");
    }

    #[test]
    fn test_upsert_field_without_metadata_section_fails() {
        let result = upsert_field("# Title\n", "Name", "x");
        assert!(matches!(result, Err(GraphError::ParseFailure(_))));
    }

    #[test]
    fn test_extract_table_stops_at_next_heading() {
        let rows = extract_table(DOC, "Enablers").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].cells, v(&["ENB-000002", "Two", "Draft"]));

        assert!(extract_table(DOC, "Internal Upstream Dependency").unwrap().is_empty());
        assert!(matches!(
            extract_table(DOC, "Missing"),
            Err(GraphError::ParseFailure(_))
        ));
        assert_eq!(
            extract_table_header(DOC, "Enablers").unwrap(),
            v(&["Enabler ID", "Name", "Status"])
        );
    }

    #[test]
    fn test_upsert_table_row_replaces_in_place() {
        let patched = upsert_table_row(DOC, "Enablers", "ENB-000001", &v(&["Uno", "Done"])).unwrap();
        let rows = extract_table(&patched, "Enablers").unwrap();
        assert_eq!(rows[0].cells, v(&["ENB-000001", "Uno", "Done"]));
        assert_eq!(rows[1].key(), "ENB-000002");
        assert_eq!(patched.len(), DOC.len() - "One | Draft".len() + "Uno | Done".len());
    }

    #[test]
    fn test_upsert_table_row_appends_after_last_row() {
        let patched = upsert_table_row(DOC, "Enablers", "ENB-000003", &v(&["Three", "Draft"])).unwrap();
        assert!(patched.contains("| ENB-000002 | Two | Draft |\n| ENB-000003 | Three | Draft |\n\n## Dependencies"));
    }

    #[test]
    fn test_upsert_table_row_into_empty_table() {
        let patched =
            upsert_table_row(DOC, "Internal Upstream Dependency", "CAP-100003", &v(&["auth"])).unwrap();
        assert!(patched.contains("|---------------|-------------|\n| CAP-100003 | auth |\n\n### Internal Downstream Impact"));
    }

    #[test]
    fn test_upsert_table_row_is_idempotent() {
        let once = upsert_table_row(DOC, "Enablers", "ENB-000003", &v(&["Three", "Draft"])).unwrap();
        let twice = upsert_table_row(&once, "Enablers", "ENB-000003", &v(&["Three", "Draft"])).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_upsert_table_row_at_end_without_trailing_newline() {
        let text = "## T\n| A | B |\n|---|---|\n| x | 1 |";
        let patched = upsert_table_row(text, "T", "y", &v(&["2"])).unwrap();
        assert_eq!(patched, "## T\n| A | B |\n|---|---|\n| x | 1 |\n| y | 2 |");
    }

    #[test]
    fn test_crlf_documents_keep_their_line_endings() {
        let text = "## T\r\n| A | B |\r\n|---|---|\r\n\r\nafter\r\n";
        let patched = upsert_table_row(text, "T", "x", &v(&["1"])).unwrap();
        assert_eq!(patched, "## T\r\n| A | B |\r\n|---|---|\r\n| x | 1 |\r\n\r\nafter\r\n");
    }

    #[test]
    fn test_cells_escape_pipes_and_newlines() {
        let patched = upsert_table_row(DOC, "Enablers", "ENB-000009", &v(&["a|b", "line\nbreak"])).unwrap();
        let rows = extract_table(&patched, "Enablers").unwrap();
        assert_eq!(rows[2].cells, v(&["ENB-000009", "a|b", "line break"]));
    }

    #[test]
    fn test_remove_and_dedupe_rows() {
        let removed = remove_table_row(DOC, "Internal Downstream Impact", "CAP-100002").unwrap();
        assert!(extract_table(&removed, "Internal Downstream Impact").unwrap().is_empty());
        assert!(removed.ends_with("|---------------|-------------|\n"));

        let unchanged = remove_table_row(DOC, "Enablers", "ENB-999999").unwrap();
        assert_eq!(unchanged, DOC);

        let doubled = DOC.replace(
            "| ENB-000002 | Two | Draft |\n",
            "| ENB-000002 | Two | Draft |\n| ENB-000001 | Again | Draft |\n",
        );
        let deduped = dedupe_table_rows(&doubled, "Enablers", "ENB-000001").unwrap();
        assert_eq!(deduped, DOC);
    }

    #[test]
    fn test_headings_in_code_fences_do_not_end_sections() {
        let text = "## T\n| A |\n|---|\n| x |\n```\n## T\n```\n";
        assert_eq!(extract_table(text, "T").unwrap().len(), 1);
    }
}
