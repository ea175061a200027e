//! Batch spreadsheet reading and row validation
//!
//! Reads the fixed five-column layout (chapter number, title, content,
//! premium, published) from the sheet named "Chapters", falling back to
//! the workbook's first sheet. Row 1 is always treated as the header.
//! Validation is all-or-nothing: any malformed row fails the whole read
//! with the complete error list so authors can fix the sheet in one go.

use std::io::Cursor;

use calamine::{Data, Reader as _, Xlsx};

use crate::db::RowError;

use super::types::{BatchRow, ImportError, MAX_BATCH_ROWS};

const PREFERRED_SHEET: &str = "chapters";

/// Parse and validate a batch workbook into ordered chapter rows
pub fn read_batch_sheet(data: &[u8]) -> Result<Vec<BatchRow>, ImportError> {
    let mut workbook = Xlsx::new(Cursor::new(data)).map_err(|e| {
        ImportError::UnsupportedFormat(format!("not an XLSX workbook: {}", e))
    })?;

    let names = workbook.sheet_names().to_vec();
    let Some(sheet_name) = pick_sheet(&names) else {
        return Err(ImportError::EmptyBatch);
    };

    let range = workbook.worksheet_range(&sheet_name).map_err(|e| {
        ImportError::ParseFailure(format!("failed to read sheet \"{}\": {}", sheet_name, e))
    })?;

    let (Some(start), Some(end)) = (range.start(), range.end()) else {
        return Err(ImportError::EmptyBatch);
    };

    let mut rows: Vec<BatchRow> = Vec::new();
    let mut errors: Vec<RowError> = Vec::new();

    for r in start.0..=end.0 {
        // Row 1 is the header regardless of its content
        if r == 0 {
            continue;
        }

        let cells = [
            range.get_value((r, 0)),
            range.get_value((r, 1)),
            range.get_value((r, 2)),
            range.get_value((r, 3)),
            range.get_value((r, 4)),
        ];
        if cells.iter().all(|c| is_blank(*c)) {
            continue;
        }

        let sheet_row = (r + 1) as i64;
        let mut problems: Vec<String> = Vec::new();

        let number = match parse_number(cells[0]) {
            Ok(n) => Some(n),
            Err(msg) => {
                problems.push(msg);
                None
            }
        };
        let title = match required_text(cells[1], "Title") {
            Ok(t) => Some(t),
            Err(msg) => {
                problems.push(msg);
                None
            }
        };
        let content = match required_text(cells[2], "Content") {
            Ok(c) => Some(c),
            Err(msg) => {
                problems.push(msg);
                None
            }
        };
        let is_premium = parse_flag(cells[3]);
        let is_published = parse_flag(cells[4]);

        match (number, title, content) {
            (Some(chapter_number), Some(title), Some(content)) => rows.push(BatchRow {
                row: sheet_row,
                chapter_number,
                title,
                content,
                is_premium,
                is_published,
            }),
            _ => errors.extend(
                problems
                    .into_iter()
                    .map(|msg| RowError::for_row(sheet_row, msg)),
            ),
        }
    }

    if !errors.is_empty() {
        return Err(ImportError::ValidationFailure(errors));
    }
    if rows.is_empty() {
        return Err(ImportError::EmptyBatch);
    }
    if rows.len() > MAX_BATCH_ROWS {
        return Err(ImportError::BatchTooLarge {
            rows: rows.len(),
            max: MAX_BATCH_ROWS,
        });
    }

    Ok(rows)
}

fn pick_sheet(names: &[String]) -> Option<String> {
    names
        .iter()
        .find(|n| n.eq_ignore_ascii_case(PREFERRED_SHEET))
        .or_else(|| names.first())
        .cloned()
}

fn is_blank(cell: Option<&Data>) -> bool {
    match cell {
        None | Some(Data::Empty) => true,
        Some(Data::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

fn parse_number(cell: Option<&Data>) -> Result<f64, String> {
    let value = match cell {
        None | Some(Data::Empty) => return Err("Chapter number is required".to_string()),
        Some(Data::Float(f)) => *f,
        Some(Data::Int(i)) => *i as f64,
        Some(Data::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err("Chapter number is required".to_string());
            }
            trimmed
                .parse::<f64>()
                .map_err(|_| format!("Chapter number \"{}\" is not a number", trimmed))?
        }
        Some(other) => return Err(format!("Chapter number \"{}\" is not a number", other)),
    };

    if !value.is_finite() || value <= 0.0 {
        return Err("Chapter number must be greater than zero".to_string());
    }
    Ok(value)
}

fn required_text(cell: Option<&Data>, field: &str) -> Result<String, String> {
    let text = match cell {
        Some(Data::String(s)) => s.trim().to_string(),
        Some(Data::Float(f)) => super::text::format_number(*f),
        Some(Data::Int(i)) => i.to_string(),
        _ => String::new(),
    };
    if text.is_empty() {
        return Err(format!("{} is required", field));
    }
    Ok(text)
}

/// TRUE (any case) means true; anything else, including blank, means false
fn parse_flag(cell: Option<&Data>) -> bool {
    match cell {
        Some(Data::Bool(b)) => *b,
        Some(Data::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}
