//! Multi-format text extraction.
//!
//! Turns a source file of a declared [`DocumentType`] into plain UTF-8 text.
//! Binary formats (PDF, DOCX, XLSX) are decoded in memory; the file size is
//! checked against [`ExtractLimits::max_file_bytes`] before anything is read.
//!
//! | Type | Reader | Output |
//! |------|--------|--------|
//! | plain-text, source-code | strict UTF-8 | as is (BOM removed) |
//! | markup | `scraper` | visible text, one line per block |
//! | structured-data | `serde_json`, then `serde_yaml` | indented `key: value` lines |
//! | tabular | `csv`, or the OOXML sheet reader | `Headers: ...` then `Row N: ...` |
//! | portable-document | `pdf-extract` | page text |
//! | word-processing | `zip` + `quick-xml` | one line per paragraph |

use std::io::Read;
use std::path::Path;

use docvec_core::models::DocumentType;
use docvec_core::{Error, Result};
use scraper::{ElementRef, Html, Node};

use crate::config::ExtractionConfig;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Elements whose text never reaches the output.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];
/// Elements rendered on their own line.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "table",
    "section", "article", "header", "footer", "nav", "aside", "main", "blockquote", "pre",
    "hr", "dt", "dd", "figcaption", "title",
];

/// Resource limits applied during extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractLimits {
    pub max_file_bytes: u64,
    pub max_table_rows: usize,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        (&ExtractionConfig::default()).into()
    }
}

impl From<&ExtractionConfig> for ExtractLimits {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            max_file_bytes: config.max_file_bytes,
            max_table_rows: config.max_table_rows,
        }
    }
}

fn extraction_err(e: impl std::fmt::Display) -> Error {
    Error::Extraction(e.to_string())
}

/// Extract text from the file at `path`, declared as `declared_type`.
///
/// Fails with [`Error::UnsupportedType`] for an unknown declared type and
/// with [`Error::Extraction`] for oversized, unreadable or corrupt input.
pub fn extract_file(path: &Path, declared_type: &str, limits: &ExtractLimits) -> Result<String> {
    let doc_type: DocumentType = declared_type.parse()?;

    let meta = std::fs::metadata(path)
        .map_err(|e| Error::Extraction(format!("cannot stat {}: {}", path.display(), e)))?;
    if meta.len() > limits.max_file_bytes {
        return Err(Error::Extraction(format!(
            "{} is {} bytes, exceeding the {} byte limit",
            path.display(),
            meta.len(),
            limits.max_file_bytes
        )));
    }

    let bytes = std::fs::read(path)
        .map_err(|e| Error::Extraction(format!("cannot read {}: {}", path.display(), e)))?;
    extract_bytes(&bytes, doc_type, limits)
}

/// Extract text from in-memory content of a known type.
pub fn extract_bytes(bytes: &[u8], doc_type: DocumentType, limits: &ExtractLimits) -> Result<String> {
    if bytes.len() as u64 > limits.max_file_bytes {
        return Err(Error::Extraction(format!(
            "content is {} bytes, exceeding the {} byte limit",
            bytes.len(),
            limits.max_file_bytes
        )));
    }
    match doc_type {
        DocumentType::PlainText | DocumentType::SourceCode => decode_utf8(bytes),
        DocumentType::Markup => extract_html(&decode_utf8(bytes)?),
        DocumentType::StructuredData => extract_structured(bytes),
        DocumentType::Tabular if bytes.starts_with(ZIP_MAGIC) => {
            extract_xlsx(bytes, limits.max_table_rows)
        }
        DocumentType::Tabular => extract_csv(bytes, limits.max_table_rows),
        DocumentType::PortableDocument => extract_pdf(bytes),
        DocumentType::WordProcessing => extract_docx(bytes),
    }
}

fn decode_utf8(bytes: &[u8]) -> Result<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::Extraction(format!("invalid UTF-8: {}", e)))
}

/// Collapse whitespace runs inside each line and squeeze blank-line runs to
/// a single blank line.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_blank = false;
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        pending_blank = false;
        out.push_str(&collapsed);
    }
    out
}

// ---------------------------------------------------------------------------
// Markup
// ---------------------------------------------------------------------------

fn extract_html(html: &str) -> Result<String> {
    let document = Html::parse_document(html);
    let mut raw = String::new();
    collect_visible_text(document.root_element(), &mut raw);

    let lines: Vec<String> = raw
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect();
    Ok(lines.join("\n"))
}

fn collect_visible_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if HIDDEN_ELEMENTS.contains(&name) {
                    continue;
                }
                let block = BLOCK_ELEMENTS.contains(&name);
                if block {
                    out.push('\n');
                }
                if let Some(child_ref) = ElementRef::wrap(child) {
                    collect_visible_text(child_ref, out);
                }
                if block {
                    out.push('\n');
                } else if matches!(name, "td" | "th") {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Structured data
// ---------------------------------------------------------------------------

fn extract_structured(bytes: &[u8]) -> Result<String> {
    let text = decode_utf8(bytes)?;
    let value: serde_json::Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(json_err) => {
            let yaml: serde_yaml::Value = serde_yaml::from_str(&text).map_err(|yaml_err| {
                Error::Extraction(format!(
                    "neither JSON ({}) nor YAML ({})",
                    json_err, yaml_err
                ))
            })?;
            serde_json::to_value(yaml).map_err(extraction_err)?
        }
    };

    let mut out = String::new();
    linearize(&value, 0, &mut out);
    Ok(out.trim_end().to_string())
}

fn scalar(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(m) if m.is_empty() => Some("{}".to_string()),
        serde_json::Value::Array(a) if a.is_empty() => Some("[]".to_string()),
        serde_json::Value::Object(_) | serde_json::Value::Array(_) => None,
        other => Some(other.to_string()),
    }
}

fn linearize(value: &serde_json::Value, depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    let entry = |label: String, child: &serde_json::Value, out: &mut String| match scalar(child) {
        Some(s) => out.push_str(&format!("{}{}: {}\n", pad, label, s)),
        None => {
            out.push_str(&format!("{}{}:\n", pad, label));
            linearize(child, depth + 1, out);
        }
    };
    match value {
        serde_json::Value::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                entry(k.clone(), v, out);
            }
        }
        serde_json::Value::Array(items) if !items.is_empty() => {
            for (i, v) in items.iter().enumerate() {
                entry(format!("[{}]", i), v, out);
            }
        }
        other => {
            if let Some(s) = scalar(other) {
                out.push_str(&format!("{}{}\n", pad, s));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tabular
// ---------------------------------------------------------------------------

/// Render rows as `Headers: ...` followed by numbered `Row N: ...` lines.
fn render_table<I>(rows: I, max_rows: usize) -> String
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut rows = rows.into_iter();
    let mut out = String::new();
    if let Some(header) = rows.next() {
        out.push_str(&format!("Headers: {}", header.join(" | ")));
    }
    let mut omitted = 0usize;
    for (i, row) in rows.enumerate() {
        if i >= max_rows {
            omitted += 1;
            continue;
        }
        out.push_str(&format!("\nRow {}: {}", i + 1, row.join(" | ")));
    }
    if omitted > 0 {
        tracing::debug!(omitted, max_rows, "table truncated");
    }
    out
}

fn extract_csv(bytes: &[u8], max_rows: usize) -> Result<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let first_line = bytes.split(|b| *b == b'\n').next().unwrap_or_default();
    let delimiter = if first_line.contains(&b'\t') { b'\t' } else { b',' };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::Extraction(format!("invalid CSV: {}", e)))?;
        rows.push(record.iter().map(|f| f.trim().to_string()).collect::<Vec<_>>());
        // header plus the rendered rows; the rest is only counted
        if rows.len() > max_rows + 1 {
            break;
        }
    }
    Ok(render_table(rows, max_rows))
}

// ---------------------------------------------------------------------------
// PDF
// ---------------------------------------------------------------------------

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| Error::Extraction(format!("PDF extraction failed: {}", e)))
}

// ---------------------------------------------------------------------------
// OOXML (DOCX, XLSX)
// ---------------------------------------------------------------------------

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn ooxml_err(e: impl std::fmt::Display) -> Error {
    Error::Extraction(format!("OOXML extraction failed: {}", e))
}

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_err)
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str, max_bytes: u64) -> Result<Vec<u8>> {
    let entry = archive.by_name(name).map_err(ooxml_err)?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(ooxml_err)?;
    if out.len() as u64 >= max_bytes {
        return Err(ooxml_err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = open_archive(bytes)?;
    if archive.index_for_name("word/document.xml").is_none() {
        return Err(ooxml_err("word/document.xml not found"));
    }
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    extract_docx_paragraphs(&doc_xml)
}

/// Collect `w:t` runs, one output line per `w:p` paragraph.
fn extract_docx_paragraphs(xml: &[u8]) -> Result<String> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let is_text = e.local_name().as_ref() == b"t";
                if is_text {
                    if let Ok(Event::Text(te)) = reader.read_event_into(&mut buf) {
                        current.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"p" {
                    paragraphs.push(std::mem::take(&mut current));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs.join("\n").trim().to_string())
}

fn extract_xlsx(bytes: &[u8], max_rows: usize) -> Result<String> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet_names = list_worksheet_names(&archive);
    let multi = sheet_names.len() > 1;

    let mut sections = Vec::new();
    for (idx, name) in sheet_names.into_iter().take(XLSX_MAX_SHEETS).enumerate() {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let rows = extract_xlsx_rows(&sheet_xml, &shared_strings, max_rows + 1)?;
        let table = render_table(rows, max_rows);
        if multi {
            sections.push(format!("Sheet {}\n{}", idx + 1, table));
        } else {
            sections.push(table);
        }
    }
    Ok(sections.join("\n\n"))
}

/// Shared strings table; workbooks with only inline strings have none.
fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>> {
    use quick_xml::events::Event;

    if archive.index_for_name("xl/sharedStrings.xml").is_none() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let local = e.local_name().as_ref().to_vec();
                if local == b"si" {
                    current = Some(String::new());
                } else if local == b"t" {
                    if let Ok(Event::Text(te)) = reader.read_event_into(&mut buf) {
                        if let Some(s) = current.as_mut() {
                            s.push_str(te.unescape().unwrap_or_default().as_ref());
                        }
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    strings.push(current.take().unwrap_or_default());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn list_worksheet_names(archive: &Archive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    Shared,
    Inline,
    Raw,
}

/// Cell text by row, reading at most `row_limit` rows.
fn extract_xlsx_rows(
    xml: &[u8],
    shared_strings: &[String],
    row_limit: usize,
) -> Result<Vec<Vec<String>>> {
    use quick_xml::events::Event;

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut kind = CellKind::Raw;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        if rows.len() >= row_limit {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref().to_vec().as_slice() {
                b"row" => row.clear(),
                b"c" => {
                    kind = CellKind::Raw;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            kind = match attr.value.as_ref() {
                                b"s" => CellKind::Shared,
                                b"inlineStr" => CellKind::Inline,
                                _ => CellKind::Raw,
                            };
                        }
                    }
                }
                b"v" | b"t" => {
                    if let Ok(Event::Text(te)) = reader.read_event_into(&mut buf) {
                        let raw = te.unescape().unwrap_or_default();
                        let value = raw.trim();
                        let text = match kind {
                            CellKind::Shared => value
                                .parse::<usize>()
                                .ok()
                                .and_then(|i| shared_strings.get(i).cloned())
                                .unwrap_or_default(),
                            CellKind::Inline | CellKind::Raw => value.to_string(),
                        };
                        row.push(text);
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"row" && !row.is_empty() {
                    rows.push(std::mem::take(&mut row));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}
