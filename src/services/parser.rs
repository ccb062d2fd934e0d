//! CSV batch source parsing.
//!
//! Expected layout (header row required):
//!
//! ```text
//! S. No.,Product Name,Input Image Urls
//! 1,SKU1,"https://a.example/1.jpg,https://a.example/2.jpg"
//! ```

use crate::models::batch::BatchItem;

const NAME_COLUMN: usize = 1;
const REFS_COLUMN: usize = 2;

/// Parse a CSV batch source into items, preserving row order.
///
/// A source with a header and no data rows is a valid, empty batch.
pub fn parse_batch(source: &str) -> Result<Vec<BatchItem>, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source.as_bytes());

    let mut items = Vec::new();

    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());

        // Skip blank trailing lines some spreadsheet exports emit.
        if record.iter().all(str::is_empty) {
            continue;
        }

        let name = record
            .get(NAME_COLUMN)
            .filter(|n| !n.is_empty())
            .ok_or(ParseError::MissingField {
                line,
                field: "product name",
            })?;

        let refs = record.get(REFS_COLUMN).ok_or(ParseError::MissingField {
            line,
            field: "image urls",
        })?;

        items.push(BatchItem::new(
            name,
            refs.split(',').map(str::trim).filter(|r| !r.is_empty()),
        ));
    }

    tracing::debug!(items = items.len(), "Parsed batch source");
    Ok(items)
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Line {line}: missing {field}")]
    MissingField { line: u64, field: &'static str },
}
