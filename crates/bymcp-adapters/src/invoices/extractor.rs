//! Invoice field extraction from document text.
//!
//! Header fields come from regular expressions over the full text.  Line
//! items come from text tables: a header line whose cells name known columns,
//! followed by rows whose cells are separated by tabs or runs of spaces.

use std::sync::LazyLock;

use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

const SEP: &str = r"\s*[:\-=]?\s*";
const AMT: &str = r"(\d{1,3}(?:\.\d{3})*,\d{2})";
const DATE: &str = r"(\d{1,2}[./]\d{1,2}[./]\d{2,4})";

/// One line item of an invoice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoicePosition {
    pub position: Option<i64>,
    #[serde(rename = "beschreibung")]
    pub description: Option<String>,
    #[serde(rename = "menge")]
    pub quantity: Option<String>,
    #[serde(rename = "einheit")]
    pub unit: Option<String>,
    #[serde(rename = "einzelpreis")]
    pub unit_price: Option<String>,
    #[serde(rename = "mwst_satz")]
    pub vat_rate: Option<String>,
    #[serde(rename = "gesamtpreis")]
    pub total: Option<String>,
}

impl InvoicePosition {
    fn set(&mut self, field: PositionField, value: &str) {
        let value = Some(value.to_string());
        match field {
            PositionField::Position => self.position = value.and_then(|v| v.parse().ok()),
            PositionField::Description => self.description = value,
            PositionField::Quantity => self.quantity = value,
            PositionField::Unit => self.unit = value,
            PositionField::UnitPrice => self.unit_price = value,
            PositionField::VatRate => self.vat_rate = value,
            PositionField::Total => self.total = value,
        }
    }
}

/// Header data of an invoice plus its line items.
///
/// Serialized with the German keys of the pending-invoice state file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceData {
    #[serde(rename = "rechnungsnummer")]
    pub invoice_number: Option<String>,
    /// `YYYY-MM-DD` when the date could be parsed.
    #[serde(rename = "rechnungsdatum")]
    pub invoice_date: Option<String>,
    #[serde(rename = "lieferant")]
    pub supplier: Option<String>,
    #[serde(rename = "lieferant_ust_id_nr")]
    pub supplier_vat_id: Option<String>,
    #[serde(rename = "nettobetrag")]
    pub net_amount: Option<String>,
    #[serde(rename = "mwst_betrag")]
    pub vat_amount: Option<String>,
    #[serde(rename = "bruttobetrag")]
    pub gross_amount: Option<String>,
    #[serde(rename = "zahlungsziel")]
    pub due_date: Option<String>,
    #[serde(rename = "bestellnummer")]
    pub order_number: Option<String>,
    #[serde(rename = "positionen")]
    pub positions: Vec<InvoicePosition>,
    pub source_filename: Option<String>,
    pub extracted_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderField {
    InvoiceNumber,
    InvoiceDate,
    SupplierVatId,
    NetAmount,
    VatAmount,
    GrossAmount,
    DueDate,
    OrderNumber,
}

impl HeaderField {
    fn key(self) -> &'static str {
        match self {
            Self::InvoiceNumber => "rechnungsnummer",
            Self::InvoiceDate => "rechnungsdatum",
            Self::SupplierVatId => "lieferant_ust_id_nr",
            Self::NetAmount => "nettobetrag",
            Self::VatAmount => "mwst_betrag",
            Self::GrossAmount => "bruttobetrag",
            Self::DueDate => "zahlungsziel",
            Self::OrderNumber => "bestellnummer",
        }
    }

    fn is_date(self) -> bool {
        matches!(self, Self::InvoiceDate | Self::DueDate)
    }

    fn slot(self, data: &mut InvoiceData) -> &mut Option<String> {
        match self {
            Self::InvoiceNumber => &mut data.invoice_number,
            Self::InvoiceDate => &mut data.invoice_date,
            Self::SupplierVatId => &mut data.supplier_vat_id,
            Self::NetAmount => &mut data.net_amount,
            Self::VatAmount => &mut data.vat_amount,
            Self::GrossAmount => &mut data.gross_amount,
            Self::DueDate => &mut data.due_date,
            Self::OrderNumber => &mut data.order_number,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PositionField {
    Position,
    Description,
    Quantity,
    Unit,
    UnitPrice,
    VatRate,
    Total,
}

const POSITION_ALIASES: [(PositionField, &[&str]); 7] = [
    (PositionField::Position, &["pos", "position", "nr", "#"]),
    (
        PositionField::Description,
        &["beschreibung", "bezeichnung", "artikel", "leistung", "text"],
    ),
    (PositionField::Quantity, &["menge", "anz", "anzahl", "qty"]),
    (PositionField::Unit, &["einheit", "einh", "unit"]),
    (
        PositionField::UnitPrice,
        &["einzelpreis", "ep", "stückpreis", "stuckpreis"],
    ),
    (PositionField::VatRate, &["mwst", "ust", "steuer", "tax"]),
    (PositionField::Total, &["gesamtpreis", "gesamt", "summe", "total"]),
];

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid invoice pattern {pattern}: {e}"))
}

static HEADER_PATTERNS: LazyLock<Vec<(HeaderField, Regex)>> = LazyLock::new(|| {
    vec![
        (
            HeaderField::InvoiceNumber,
            compile(&format!(r"(?i)rechnungs(?:nummer|nr\.?|no\.?){SEP}([A-Z0-9\-/]+)")),
        ),
        (
            HeaderField::InvoiceDate,
            compile(&format!(r"(?i)rechnungs(?:datum|date){SEP}{DATE}")),
        ),
        (
            HeaderField::SupplierVatId,
            compile(&format!(r"(?i)ust\.?[-\s]?id\.?[-\s]?nr\.?{SEP}(DE\d{{9}})")),
        ),
        (
            HeaderField::NetAmount,
            compile(&format!(r"(?i)netto(?:betrag|summe)?{SEP}{AMT}")),
        ),
        (
            HeaderField::VatAmount,
            compile(&format!(r"(?i)(?:mwst|ust|mehrwertsteuer)\.?\s*\d*\s*%?{SEP}{AMT}")),
        ),
        (
            HeaderField::GrossAmount,
            compile(&format!(
                r"(?i)(?:brutto|gesamtbetrag|zu\s+zahlen|rechnungsbetrag){SEP}{AMT}"
            )),
        ),
        (
            HeaderField::DueDate,
            compile(&format!(r"(?i)(?:zahlungsziel|faellig|fällig|bis\s+zum){SEP}{DATE}")),
        ),
        (
            HeaderField::OrderNumber,
            compile(&format!(
                r"(?i)(?:bestell(?:nr|nummer)|auftrag(?:snr|snummer)?){SEP}([A-Z0-9\-/]+)"
            )),
        ),
    ]
});

static NOT_SUPPLIER: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)^(?:rechnung|invoice|seite|page|\d)"));

static CELL_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| compile(r"\t+|\s{2,}"));

/// Extract invoice header fields and line items from document text.
///
/// Returns the data and the warnings a human should review.
pub fn extract_invoice_from_text(
    text: &str,
    source_filename: Option<&str>,
) -> (InvoiceData, Vec<String>) {
    let mut warnings = Vec::new();
    let mut data = InvoiceData {
        source_filename: source_filename.map(str::to_string),
        extracted_at: Utc::now().to_rfc3339(),
        ..Default::default()
    };

    for (field, pattern) in HEADER_PATTERNS.iter() {
        match pattern.captures(text).and_then(|c| c.get(1)) {
            Some(m) => {
                let raw = m.as_str().trim();
                let value = if field.is_date() {
                    normalize_date(raw)
                } else {
                    raw.to_string()
                };
                *field.slot(&mut data) = Some(value);
            }
            None => warnings.push(format!("field '{}' not found.", field.key())),
        }
    }

    data.supplier = guess_supplier(text);
    match &data.supplier {
        Some(supplier) => warnings.push(format!(
            "supplier (heuristic, please check): '{supplier}'"
        )),
        None => warnings.push("supplier could not be determined automatically.".into()),
    }

    data.positions = extract_positions(text);
    if data.positions.is_empty() {
        warnings.push("no position table detected, manual review recommended.".into());
    }

    info!(
        source = source_filename.unwrap_or("-"),
        positions = data.positions.len(),
        warnings = warnings.len(),
        "invoice extracted"
    );
    (data, warnings)
}

/// Normalize `d.m.Y`, `d.m.y`, `d/m/Y` or `d/m/y` to `YYYY-MM-DD`.
///
/// Anything else is returned unchanged.
pub fn normalize_date(raw: &str) -> String {
    let raw = raw.trim();
    let separator = if raw.contains('/') { '/' } else { '.' };
    let year_len = raw.rsplit(separator).next().map_or(0, str::len);
    let year_format = match year_len {
        4 => "%Y",
        2 => "%y",
        _ => return raw.to_string(),
    };
    let format = format!("%d{separator}%m{separator}{year_format}");
    NaiveDate::parse_from_str(raw, &format)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// The first substantial line that is not a title, page marker or number.
pub fn guess_supplier(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| line.chars().count() > 3 && !NOT_SUPPLIER.is_match(line))
        .map(str::to_string)
}

fn split_cells(line: &str) -> Vec<&str> {
    CELL_SEPARATOR
        .split(line.trim())
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .collect()
}

fn position_field(cell: &str) -> Option<PositionField> {
    let cell = cell.trim().to_lowercase();
    POSITION_ALIASES
        .iter()
        .find(|(_, aliases)| aliases.contains(&cell.as_str()))
        .map(|(field, _)| *field)
}

/// Column mapping of a table header line, if the line is one.
fn table_header(cells: &[&str]) -> Option<Vec<Option<PositionField>>> {
    if cells.len() < 2 {
        return None;
    }
    let columns: Vec<Option<PositionField>> = cells.iter().map(|c| position_field(c)).collect();
    let is_items_table = columns
        .iter()
        .any(|c| matches!(c, Some(PositionField::Description | PositionField::Total)));
    is_items_table.then_some(columns)
}

/// Line items from every text table in `text`.
pub fn extract_positions(text: &str) -> Vec<InvoicePosition> {
    let mut positions = Vec::new();
    let mut columns: Option<Vec<Option<PositionField>>> = None;

    for line in text.lines() {
        let cells = split_cells(line);
        if let Some(header) = &columns {
            if cells.len() >= 2 {
                let mut position = InvoicePosition::default();
                let mut filled = false;
                for (cell, field) in cells.iter().zip(header.iter()) {
                    if let Some(field) = field {
                        position.set(*field, cell);
                        filled = true;
                    }
                }
                if filled {
                    positions.push(position);
                }
                continue;
            }
            columns = None;
        }
        columns = table_header(&cells);
    }
    positions
}
