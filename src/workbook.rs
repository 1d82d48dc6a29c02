//! Spreadsheet readers.
//!
//! Turns a workbook on disk into named sheets of string cells, ready for
//! [`ingest_grid`](crate::ingest::ingest_grid). OOXML workbooks
//! (`.xlsx`, `.xlsm`) are read directly from the ZIP container with
//! quick-xml; legacy BIFF workbooks (`.xls`) go through calamine.
//!
//! Cells keep their column position: a row `A1=x, C1=y` reads as
//! `["x", "", "y"]`. Trailing empty cells are not materialized, so rows
//! may be ragged. Rows with no non-empty cell are dropped.

use anyhow::{anyhow, bail, Context, Result};
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 100 * 1024 * 1024;

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

/// One worksheet: its display name and its non-empty rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

/// Read every sheet of the workbook at `path`, in workbook order.
pub fn read_workbook(path: &Path) -> Result<Vec<Sheet>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let mut sheets = match ext.as_str() {
        "xlsx" | "xlsm" => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to open excel file: {}", path.display()))?;
            read_xlsx(&bytes)?
        }
        "xls" => read_xls(path)?,
        _ => bail!("unsupported file format: .{}", ext),
    };
    for (i, sheet) in sheets.iter_mut().enumerate() {
        if sheet.name.trim().is_empty() {
            sheet.name = format!("Sheet{}", i + 1);
        }
    }
    Ok(sheets)
}

// ═══════════════════════════════════════════════════════════════════════
// OOXML
// ═══════════════════════════════════════════════════════════════════════

pub fn read_xlsx(bytes: &[u8]) -> Result<Vec<Sheet>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).context("failed to open excel file")?;
    let shared = if archive.by_name("xl/sharedStrings.xml").is_ok() {
        let xml = read_entry(&mut archive, "xl/sharedStrings.xml")?;
        parse_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let mut sheets = Vec::new();
    for (name, entry) in sheet_entries(&mut archive)? {
        let xml = read_entry(&mut archive, &entry)?;
        let rows = parse_sheet(&xml, &shared)?;
        sheets.push(Sheet { name, rows });
    }
    Ok(sheets)
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .with_context(|| format!("workbook entry missing: {}", name))?;
    let mut out = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        bail!("workbook entry {} exceeds size limit ({} bytes)", name, MAX_XML_ENTRY_BYTES);
    }
    Ok(out)
}

fn attr(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// `(sheet name, zip entry)` pairs in workbook order.
///
/// Names come from `xl/workbook.xml` resolved through its relationships.
/// Without a workbook part, worksheet files are listed by number.
fn sheet_entries(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>> {
    if archive.by_name("xl/workbook.xml").is_err() {
        let mut files: Vec<String> = archive
            .file_names()
            .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
            .map(|s| s.to_string())
            .collect();
        files.sort_by_key(|name| {
            name.trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        });
        return Ok(files
            .into_iter()
            .enumerate()
            .map(|(i, f)| (format!("Sheet{}", i + 1), f))
            .collect());
    }

    let rels = if archive.by_name("xl/_rels/workbook.xml.rels").is_ok() {
        parse_relationships(&read_entry(archive, "xl/_rels/workbook.xml.rels")?)?
    } else {
        HashMap::new()
    };
    let workbook = read_entry(archive, "xl/workbook.xml")?;

    let mut reader = quick_xml::Reader::from_reader(workbook.as_slice());
    let mut buf = Vec::new();
    let mut entries = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let name = attr(&e, b"name").unwrap_or_default();
                let position = entries.len() + 1;
                let target = attr(&e, b"id")
                    .and_then(|rid| rels.get(&rid).cloned())
                    .unwrap_or_else(|| format!("worksheets/sheet{}.xml", position));
                entries.push((name, resolve_target(&target)));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow!("failed to parse workbook.xml: {}", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(entries)
}

fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rels = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                    rels.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow!("failed to parse workbook relationships: {}", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" => in_t = !in_phonetic,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(current.take().unwrap_or_default()),
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow!("failed to parse shared strings: {}", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Zero-based column index of a cell reference such as `"AB12"`.
pub fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: Vec<u8> = cell_ref
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .map(|b| b.to_ascii_uppercase())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let n = letters
        .iter()
        .fold(0usize, |acc, b| acc * 26 + usize::from(b - b'A' + 1));
    Some(n - 1)
}

#[derive(Default)]
struct CellState {
    col: usize,
    kind: String,
    value: String,
    capture: bool,
}

fn cell_text(state: &CellState, shared: &[String]) -> String {
    match state.kind.as_str() {
        "s" => state
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i).cloned())
            .unwrap_or_default(),
        "b" => match state.value.trim() {
            "1" => "TRUE".to_string(),
            "0" => "FALSE".to_string(),
            other => other.to_string(),
        },
        _ => state.value.clone(),
    }
}

fn parse_sheet(xml: &[u8], shared: &[String]) -> Result<Vec<Vec<String>>> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell: Option<CellState> = None;
    let mut next_col = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row.clear();
                    next_col = 0;
                }
                b"c" => {
                    let col = attr(&e, b"r")
                        .and_then(|r| column_index(&r))
                        .unwrap_or(next_col);
                    cell = Some(CellState {
                        col,
                        kind: attr(&e, b"t").unwrap_or_default(),
                        ..Default::default()
                    });
                }
                b"v" | b"t" => {
                    if let Some(c) = cell.as_mut() {
                        c.capture = true;
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"c" => {
                next_col = attr(&e, b"r")
                    .and_then(|r| column_index(&r))
                    .unwrap_or(next_col)
                    + 1;
            }
            Ok(Event::Text(te)) => {
                if let Some(c) = cell.as_mut().filter(|c| c.capture) {
                    c.value.push_str(&te.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => {
                    if let Some(c) = cell.as_mut() {
                        c.capture = false;
                    }
                }
                b"c" => {
                    if let Some(c) = cell.take() {
                        let text = cell_text(&c, shared);
                        if !text.is_empty() {
                            if row.len() <= c.col {
                                row.resize(c.col + 1, String::new());
                            }
                            row[c.col] = text;
                        }
                        next_col = c.col + 1;
                    }
                }
                b"row" => {
                    if row.iter().any(|v| !v.trim().is_empty()) {
                        rows.push(std::mem::take(&mut row));
                    }
                    row.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow!("failed to parse worksheet: {}", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

// ═══════════════════════════════════════════════════════════════════════
// BIFF
// ═══════════════════════════════════════════════════════════════════════

fn read_xls(path: &Path) -> Result<Vec<Sheet>> {
    use calamine::{open_workbook, Data, Reader, Xls};

    let mut workbook: Xls<_> = open_workbook(path)
        .map_err(|e| anyhow!("failed to open excel file: {}", e))?;
    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| anyhow!("failed to read sheet {}: {}", name, e))?;
        let offset = range.start().map(|(_, col)| col as usize).unwrap_or(0);
        let rows = range
            .rows()
            .map(|cells| {
                let mut row = vec![String::new(); offset];
                row.extend(cells.iter().map(|c| match c {
                    Data::Empty => String::new(),
                    other => other.to_string(),
                }));
                while row.last().is_some_and(|v| v.is_empty()) {
                    row.pop();
                }
                row
            })
            .filter(|row| row.iter().any(|v| !v.trim().is_empty()))
            .collect();
        sheets.push(Sheet { name, rows });
    }
    Ok(sheets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters_map_to_indices() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("C7"), Some(2));
        assert_eq!(column_index("AA3"), Some(26));
        assert_eq!(column_index("12"), None);
    }

    #[test]
    fn shared_strings_concatenate_runs() {
        let xml = br#"<sst><si><t>plain</t></si><si><r><t>ri</t></r><r><t>ch</t></r></si><si><t/></si><si><t>last</t></si></sst>"#;
        assert_eq!(
            parse_shared_strings(xml).unwrap(),
            vec!["plain", "rich", "", "last"]
        );
    }

    #[test]
    fn sheet_cells_keep_their_columns() {
        let shared = vec!["Name".to_string(), "Qty".to_string()];
        let xml = br#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c><c r="C1" t="s"><v>1</v></c></row>
            <row r="2"><c r="A2"/></row>
            <row r="3"><c r="A3" t="inlineStr"><is><t>bolt</t></is></c><c r="C3"><v>4</v></c><c r="D3" t="b"><v>1</v></c></row>
        </sheetData></worksheet>"#;
        let rows = parse_sheet(xml, &shared).unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["Name".to_string(), String::new(), "Qty".to_string()],
                vec!["bolt".into(), String::new(), "4".into(), "TRUE".into()],
            ]
        );
    }

    #[test]
    fn targets_resolve_under_xl() {
        assert_eq!(resolve_target("worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
        assert_eq!(resolve_target("/xl/worksheets/s.xml"), "xl/worksheets/s.xml");
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        let err = read_workbook(Path::new("report.ods")).unwrap_err();
        assert!(err.to_string().contains("unsupported file format"));
    }
}
