//! Content parsing: declared mime type → text or row records.
//!
//! The supported set is closed. Unknown mime types are a
//! [`Validation`](crate::errors::PipelineError::Validation) error; the
//! processor skips the item instead of guessing at a best-effort parse.
//!
//! Tabular formats (CSV, XLSX) become one record per data row, rendered as
//! `"header: value"` lines so each row reads as a self-contained fact for
//! embedding. XLSX cells are pulled straight from the OOXML ZIP with
//! `quick-xml`; no spreadsheet library is involved.

use std::io::Read;

use crate::errors::PipelineError;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_CSV: &str = "text/csv";
pub const MIME_XLSX: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_ROWS_PER_SHEET: usize = 100_000;
/// Cap on decompressed bytes per ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Parsed document body, shaped by how it should be chunked.
#[derive(Debug, Clone)]
pub enum ParsedContent {
    /// Free-form text, chunked with the sliding window.
    Prose(String),
    /// One string per table row, packed whole into chunks.
    Records(Vec<String>),
}

/// The retrieval partition a mime type's content belongs to.
///
/// Spreadsheet data is business data; everything else is documentation.
pub fn context_type_for(mime_type: &str) -> &'static str {
    match mime_type {
        MIME_CSV | MIME_XLSX => "business",
        _ => "docs",
    }
}

/// Parse raw bytes according to the declared mime type.
pub fn parse_document(bytes: &[u8], mime_type: &str) -> Result<ParsedContent, PipelineError> {
    match mime_type {
        MIME_TEXT | MIME_MARKDOWN => {
            let text = String::from_utf8(bytes.to_vec())
                .map_err(|e| PipelineError::Validation(format!("invalid UTF-8: {e}")))?;
            Ok(ParsedContent::Prose(text))
        }
        MIME_CSV => {
            let text = String::from_utf8(bytes.to_vec())
                .map_err(|e| PipelineError::Validation(format!("invalid UTF-8: {e}")))?;
            Ok(ParsedContent::Records(csv_records(&text)?))
        }
        MIME_XLSX => Ok(ParsedContent::Records(xlsx_records(bytes)?)),
        other => Err(PipelineError::Validation(format!(
            "unsupported mime type: {other}"
        ))),
    }
}

// ============ CSV ============

/// Render each CSV data row as `"header: value"` lines, one record per row.
fn csv_records(text: &str) -> Result<Vec<String>, PipelineError> {
    let rows = parse_csv(text)?;
    let mut iter = rows.into_iter();
    let header = match iter.next() {
        Some(h) => h,
        None => return Ok(Vec::new()),
    };

    let mut records = Vec::new();
    for row in iter {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        records.push(rows_to_record(&header, &row));
    }
    Ok(records)
}

fn rows_to_record(header: &[String], row: &[String]) -> String {
    header
        .iter()
        .zip(row.iter().chain(std::iter::repeat(&String::new())))
        .map(|(col, val)| format!("{}: {}", col.trim(), val.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Minimal RFC 4180 parser: quoted fields, doubled-quote escapes, embedded
/// commas and newlines. Anything structurally broken (unterminated quote)
/// is a validation error.
fn parse_csv(text: &str) -> Result<Vec<Vec<String>>, PipelineError> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => {
                row.push(std::mem::take(&mut field));
            }
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(PipelineError::Validation(
            "unterminated quoted CSV field".to_string(),
        ));
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

// ============ XLSX ============

/// Extract row records from an xlsx workbook. The first row of each sheet
/// is treated as the header for that sheet.
fn xlsx_records(bytes: &[u8]) -> Result<Vec<String>, PipelineError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| PipelineError::Validation(format!("not a valid xlsx archive: {e}")))?;

    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet_names = list_worksheet_names(&archive);

    let mut records = Vec::new();
    for name in sheet_names.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let rows = sheet_rows(&xml, &shared_strings)?;
        let mut iter = rows.into_iter();
        let header = match iter.next() {
            Some(h) => h,
            None => continue,
        };
        for row in iter {
            if row.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            records.push(rows_to_record(&header, &row));
        }
    }
    Ok(records)
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, PipelineError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| PipelineError::Validation(format!("xlsx entry {name}: {e}")))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| PipelineError::Validation(format!("xlsx entry {name}: {e}")))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(PipelineError::Validation(format!(
            "xlsx entry {name} exceeds size limit"
        )));
    }
    Ok(out)
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, PipelineError> {
    // A workbook without shared strings is legal (all inline/numeric cells).
    if archive.by_name("xl/sharedStrings.xml").is_err() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml")?;

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => {
                    if let (Some(cur), Ok(quick_xml::events::Event::Text(te))) =
                        (current.as_mut(), reader.read_event_into(&mut buf))
                    {
                        cur.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    strings.push(current.take().unwrap_or_default());
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(PipelineError::Validation(format!("sharedStrings: {e}"))),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn list_worksheet_names(archive: &zip::ZipArchive<std::io::Cursor<&[u8]>>) -> Vec<String> {
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

/// Column index encoded in a cell reference like `B2` (A=0, Z=25, AA=26).
/// `None` when the reference has no letter prefix.
fn column_index(cell_ref: &str) -> Option<usize> {
    let mut idx: usize = 0;
    let mut letters = 0;
    for c in cell_ref.chars() {
        if !c.is_ascii_alphabetic() {
            break;
        }
        idx = idx * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
        letters += 1;
    }
    if letters == 0 {
        None
    } else {
        Some(idx - 1)
    }
}

/// Walk one worksheet's XML, collecting cell values row by row. Shared
/// string cells (`t="s"`) are resolved through the table; other cells keep
/// their literal `<v>` text. Empty cells may be omitted entirely, so each
/// cell is placed at the column its `r` reference names, with gaps filled
/// by empty strings; cells without an `r` attribute land positionally.
fn sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<Vec<String>>, PipelineError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut current_row: Vec<String> = Vec::new();
    let mut in_row = false;
    let mut in_v = false;
    let mut cell_is_shared = false;
    let mut cell_col: Option<usize> = None;

    loop {
        if rows.len() >= XLSX_MAX_ROWS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    in_row = true;
                    current_row.clear();
                }
                b"c" if in_row => {
                    cell_is_shared = false;
                    cell_col = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"t" => cell_is_shared = attr.value.as_ref() == b"s",
                            b"r" => {
                                cell_col = std::str::from_utf8(attr.value.as_ref())
                                    .ok()
                                    .and_then(column_index)
                            }
                            _ => {}
                        }
                    }
                }
                b"v" if in_row => in_v = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_v => {
                let raw = te.unescape().unwrap_or_default();
                let value = if cell_is_shared {
                    raw.trim()
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared_strings.get(i))
                        .cloned()
                        .unwrap_or_default()
                } else {
                    raw.trim().to_string()
                };
                let col = cell_col.take().unwrap_or(current_row.len());
                while current_row.len() < col {
                    current_row.push(String::new());
                }
                if col < current_row.len() {
                    current_row[col] = value;
                } else {
                    current_row.push(value);
                }
                in_v = false;
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"row" => {
                    in_row = false;
                    rows.push(std::mem::take(&mut current_row));
                }
                b"v" => in_v = false,
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(PipelineError::Validation(format!("worksheet: {e}"))),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_mime_is_validation_error() {
        let err = parse_document(b"...", "application/pdf").unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn plain_text_passes_through() {
        match parse_document(b"hello world", MIME_TEXT).unwrap() {
            ParsedContent::Prose(text) => assert_eq!(text, "hello world"),
            other => panic!("expected prose, got {other:?}"),
        }
    }

    #[test]
    fn invalid_utf8_is_validation_error() {
        let err = parse_document(&[0xff, 0xfe, 0x00], MIME_TEXT).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn csv_rows_become_header_value_records() {
        let csv = "region,revenue\nEMEA,120\nAPAC,85\n";
        match parse_document(csv.as_bytes(), MIME_CSV).unwrap() {
            ParsedContent::Records(records) => {
                assert_eq!(records.len(), 2);
                assert_eq!(records[0], "region: EMEA\nrevenue: 120");
                assert_eq!(records[1], "region: APAC\nrevenue: 85");
            }
            other => panic!("expected records, got {other:?}"),
        }
    }

    #[test]
    fn csv_quoted_fields_keep_commas_and_newlines() {
        let csv = "note,owner\n\"line one,\nline two\",\"O'Brien, Pat\"\n";
        let rows = parse_csv(csv).unwrap();
        assert_eq!(rows[1][0], "line one,\nline two");
        assert_eq!(rows[1][1], "O'Brien, Pat");
    }

    #[test]
    fn csv_doubled_quotes_unescape() {
        let rows = parse_csv("a\n\"she said \"\"hi\"\"\"\n").unwrap();
        assert_eq!(rows[1][0], "she said \"hi\"");
    }

    #[test]
    fn csv_unterminated_quote_rejected() {
        assert!(parse_csv("a,b\n\"broken,row\n").is_err());
    }

    #[test]
    fn csv_blank_rows_skipped() {
        let csv = "a,b\n1,2\n,\n3,4\n";
        match parse_document(csv.as_bytes(), MIME_CSV).unwrap() {
            ParsedContent::Records(records) => assert_eq!(records.len(), 2),
            other => panic!("expected records, got {other:?}"),
        }
    }

    #[test]
    fn spreadsheet_mimes_map_to_business_context() {
        assert_eq!(context_type_for(MIME_CSV), "business");
        assert_eq!(context_type_for(MIME_XLSX), "business");
        assert_eq!(context_type_for(MIME_MARKDOWN), "docs");
    }

    #[test]
    fn garbage_xlsx_is_validation_error() {
        let err = parse_document(b"not a zip", MIME_XLSX).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn column_references_decode() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("C2"), Some(2));
        assert_eq!(column_index("Z9"), Some(25));
        assert_eq!(column_index("AA10"), Some(26));
        assert_eq!(column_index("AB1"), Some(27));
        assert_eq!(column_index("123"), None);
    }

    #[test]
    fn xlsx_omitted_cells_align_to_their_columns() {
        // Row 2 omits A2 entirely; B2/C2 must still land under their
        // headers instead of shifting left.
        let sheet = concat!(
            "<worksheet><sheetData>",
            "<row r=\"1\">",
            "<c r=\"A1\" t=\"s\"><v>0</v></c>",
            "<c r=\"B1\" t=\"s\"><v>1</v></c>",
            "<c r=\"C1\" t=\"s\"><v>2</v></c>",
            "</row>",
            "<row r=\"2\">",
            "<c r=\"B2\" t=\"s\"><v>3</v></c>",
            "<c r=\"C2\"><v>7</v></c>",
            "</row>",
            "</sheetData></worksheet>"
        );
        let shared = "<sst><si><t>product</t></si><si><t>region</t></si>\
                      <si><t>units</t></si><si><t>EMEA</t></si></sst>";
        let bytes = build_xlsx_archive(shared, sheet);

        match parse_document(&bytes, MIME_XLSX).unwrap() {
            ParsedContent::Records(records) => {
                assert_eq!(records, vec!["product: \nregion: EMEA\nunits: 7"]);
            }
            other => panic!("expected records, got {other:?}"),
        }
    }

    #[test]
    fn xlsx_rows_resolve_shared_strings() {
        let bytes = build_test_xlsx(
            &["product", "units"],
            &[&["widget", "4"], &["gadget", "7"]],
        );
        match parse_document(&bytes, MIME_XLSX).unwrap() {
            ParsedContent::Records(records) => {
                assert_eq!(records.len(), 2);
                assert_eq!(records[0], "product: widget\nunits: 4");
                assert_eq!(records[1], "product: gadget\nunits: 7");
            }
            other => panic!("expected records, got {other:?}"),
        }
    }

    /// Build a minimal single-sheet xlsx: header + rows, strings in the
    /// shared table, numerics inline.
    fn build_test_xlsx(header: &[&str], rows: &[&[&str]]) -> Vec<u8> {
        let mut strings: Vec<String> = Vec::new();
        let mut intern = |s: &str| -> usize {
            if let Some(pos) = strings.iter().position(|x| x == s) {
                pos
            } else {
                strings.push(s.to_string());
                strings.len() - 1
            }
        };

        let mut sheet_rows = String::new();
        let mut all_rows: Vec<Vec<&str>> = vec![header.to_vec()];
        all_rows.extend(rows.iter().map(|r| r.to_vec()));
        for row in &all_rows {
            sheet_rows.push_str("<row>");
            for cell in row {
                if cell.parse::<f64>().is_ok() {
                    sheet_rows.push_str(&format!("<c><v>{cell}</v></c>"));
                } else {
                    let idx = intern(cell);
                    sheet_rows.push_str(&format!("<c t=\"s\"><v>{idx}</v></c>"));
                }
            }
            sheet_rows.push_str("</row>");
        }

        let shared: String = strings
            .iter()
            .map(|s| format!("<si><t>{s}</t></si>"))
            .collect();

        build_xlsx_archive(
            &format!("<sst>{shared}</sst>"),
            &format!("<worksheet><sheetData>{sheet_rows}</sheetData></worksheet>"),
        )
    }

    fn build_xlsx_archive(shared_xml: &str, sheet_xml: &str) -> Vec<u8> {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let cursor = std::io::Cursor::new(Vec::new());
        let mut writer = zip::ZipWriter::new(cursor);
        let options = SimpleFileOptions::default();
        writer
            .start_file("xl/sharedStrings.xml", options)
            .unwrap();
        writer.write_all(shared_xml.as_bytes()).unwrap();
        writer
            .start_file("xl/worksheets/sheet1.xml", options)
            .unwrap();
        writer.write_all(sheet_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }
}
