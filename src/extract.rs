//! Format-specific text extraction for course documents.
//!
//! Ingestion supplies raw bytes plus a file extension; this module returns
//! plain UTF-8 text. Extractors never panic; a failure is returned to the
//! ingestion layer, which falls through to the next loader for the
//! extension or records the file as failed.

use std::io::Read;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum sheets to process in an xlsx workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;

#[derive(Debug)]
pub enum ExtractError {
    UnsupportedExtension(String),
    Pdf(String),
    Ooxml(String),
    Markup(String),
    Encoding(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedExtension(ext) => {
                write!(f, "unsupported extension: {}", ext)
            }
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Ooxml(e) => write!(f, "OOXML extraction failed: {}", e),
            ExtractError::Markup(e) => write!(f, "markup extraction failed: {}", e),
            ExtractError::Encoding(e) => write!(f, "text decoding failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// A named extraction function. Ingestion tries the loaders for an
/// extension in order until one yields non-empty text.
pub type Loader = (&'static str, fn(&[u8]) -> Result<String, ExtractError>);

/// Ordered loaders for a file extension (lowercase, without the dot), or
/// `None` when the extension is unsupported and the file is skipped.
pub fn loaders_for_extension(ext: &str) -> Option<Vec<Loader>> {
    let loaders: Vec<Loader> = match ext {
        "txt" | "md" | "rtf" | "log" | "cfg" | "conf" | "ini" | "yaml" | "yml" | "toml"
        | "csv" | "json" => {
            vec![("text", extract_plain_text)]
        }
        "pdf" => vec![("pdf", extract_pdf)],
        "docx" | "doc" => vec![("docx", extract_docx)],
        "pptx" | "ppt" => vec![("pptx", extract_pptx)],
        "xlsx" | "xls" => vec![("xlsx", extract_xlsx)],
        // HTML often survives a lossy parse even when malformed; keep the
        // plain-text loader as a second chance.
        "html" | "htm" | "xml" => vec![("markup", extract_markup), ("text", extract_plain_text)],
        "epub" => vec![("epub", extract_epub)],
        _ => return None,
    };
    Some(loaders)
}

fn extract_plain_text(bytes: &[u8]) -> Result<String, ExtractError> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Ok(s.to_string()),
        // Lossy decode keeps partially-valid files usable for retrieval.
        Err(_) => Ok(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    extract_t_elements(&xml)
}

/// Collect the text of every `<t>` element (WordprocessingML `w:t`,
/// DrawingML `a:t`) separated by spaces.
fn extract_t_elements(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        if !out.is_empty() {
                            out.push(' ');
                        }
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    let mut out = String::new();
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = extract_t_elements(&xml)?;
        if !out.is_empty() && !text.is_empty() {
            out.push('\n');
        }
        out.push_str(&text);
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let mut sheet_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    sheet_names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    let mut out = String::new();
    for (idx, name) in sheet_names.into_iter().take(XLSX_MAX_SHEETS).enumerate() {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let cell_texts = extract_xlsx_sheet_cells(&sheet_xml, &shared_strings)?;
        if idx > 0 && !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&cell_texts);
    }
    Ok(out)
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, ExtractError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                } else if in_si && e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        strings.push(te.unescape().unwrap_or_default().into_owned());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn extract_xlsx_sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_v = false;
    let mut cell_is_shared_str = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"c" {
                    cell_is_shared_str = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                } else if e.local_name().as_ref() == b"v" {
                    in_v = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_v => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if !s.is_empty() {
                    if cell_is_shared_str {
                        if let Ok(i) = s.parse::<usize>() {
                            if i < shared_strings.len() {
                                cells.push(shared_strings[i].clone());
                                cell_count += 1;
                            }
                        }
                    } else {
                        cells.push(s.to_string());
                        cell_count += 1;
                    }
                }
                in_v = false;
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"v" {
                    in_v = false;
                } else if e.local_name().as_ref() == b"c" {
                    cell_is_shared_str = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

/// Strip tags from HTML/XML, keeping text nodes. Script and style bodies
/// are dropped.
fn extract_markup(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    // Malformed HTML is the norm, not the exception.
    reader.config_mut().check_end_names = false;
    let mut buf = Vec::new();
    let mut skip_depth = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if matches!(name.as_ref(), b"script" | b"style") {
                    skip_depth += 1;
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = e.local_name();
                if matches!(name.as_ref(), b"script" | b"style") {
                    skip_depth = skip_depth.saturating_sub(1);
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if skip_depth == 0 => {
                let text = te.unescape().unwrap_or_default();
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(trimmed);
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Markup(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// EPUB is a ZIP of XHTML content documents; pull text from each in
/// archive order.
fn extract_epub(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let content_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.ends_with(".xhtml") || n.ends_with(".html") || n.ends_with(".htm"))
        .map(|s| s.to_string())
        .collect();
    let mut out = String::new();
    for name in content_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        if let Ok(text) = extract_markup(&xml) {
            if !out.is_empty() && !text.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&text);
        }
    }
    Ok(out)
}
