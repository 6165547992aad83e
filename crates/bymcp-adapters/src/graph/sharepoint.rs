//! SharePoint lists through Graph: column discovery, item creation and the
//! mapping of invoice fields onto list columns.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::info;
use url::Url;

use super::GraphClient;
use crate::error::{AdapterError, Result};
use crate::invoices::{InvoiceData, InvoicePosition};

const INVOICE_FIELD_ALIASES: [(&str, &[&str]); 9] = [
    ("rechnungsnummer", &["Rechnungsnummer", "Invoice Number", "Title"]),
    ("rechnungsdatum", &["Rechnungsdatum", "Invoice Date", "Datum"]),
    ("lieferant", &["Lieferant", "Supplier", "Title", "Vendor"]),
    ("lieferant_ust_id_nr", &["USt-IdNr", "Lieferant USt-IdNr", "VAT ID"]),
    ("nettobetrag", &["Nettobetrag", "Net Amount", "Netto"]),
    ("mwst_betrag", &["MwSt Betrag", "VAT Amount", "MwSt"]),
    ("bruttobetrag", &["Bruttobetrag", "Gross Amount", "Gesamtbetrag"]),
    ("zahlungsziel", &["Zahlungsziel", "Due Date", "Fälligkeitsdatum"]),
    ("bestellnummer", &["Bestellnummer", "Order Number", "PO Number"]),
];

const POSITION_FIELD_ALIASES: [(&str, &[&str]); 7] = [
    ("position", &["Position", "Pos", "Nr", "Title"]),
    ("beschreibung", &["Beschreibung", "Bezeichnung", "Artikel", "Title"]),
    ("menge", &["Menge", "Quantity", "Anzahl"]),
    ("einheit", &["Einheit", "Unit"]),
    ("einzelpreis", &["Einzelpreis", "Unit Price", "EP"]),
    ("mwst_satz", &["MwSt Satz", "VAT Rate", "Steuersatz"]),
    ("gesamtpreis", &["Gesamtpreis", "Total", "Summe"]),
];

/// A writable list column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub internal_name: String,
    /// Whether the column references another list.
    pub lookup: bool,
}

/// Writable columns of a list keyed by lower-cased display name, in the
/// order Graph returned them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListColumns {
    entries: Vec<(String, Column)>,
}

impl ListColumns {
    /// Add a column; a later column with the same display name replaces the
    /// earlier one in place.
    pub fn insert(&mut self, display_name: &str, column: Column) {
        let key = display_name.to_lowercase();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = column,
            None => self.entries.push((key, column)),
        }
    }

    pub fn get(&self, display_name: &str) -> Option<&Column> {
        let key = display_name.to_lowercase();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, c)| c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.entries.iter().map(|(k, c)| (k.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn from_json(body: &Value) -> Self {
        let mut columns = Self::default();
        for col in body["value"].as_array().map(Vec::as_slice).unwrap_or_default() {
            if col["hidden"].as_bool().unwrap_or(false) || col["readOnly"].as_bool().unwrap_or(false)
            {
                continue;
            }
            let display = col["displayName"].as_str().unwrap_or_default();
            let internal = col["name"].as_str().unwrap_or(display);
            columns.insert(
                display,
                Column {
                    internal_name: internal.to_string(),
                    lookup: col.get("lookup").is_some_and(|l| !l.is_null()),
                },
            );
        }
        columns
    }
}

/// Client for the lists of one SharePoint site.
pub struct SharePointClient {
    graph: Arc<GraphClient>,
    site_url: String,
    site_id: OnceCell<String>,
}

impl SharePointClient {
    pub fn new(graph: Arc<GraphClient>, site_url: impl Into<String>) -> Self {
        Self {
            graph,
            site_url: site_url.into(),
            site_id: OnceCell::new(),
        }
    }

    /// The Graph site path `{host}:{path}` for the configured site URL.
    pub fn site_path(&self) -> Result<String> {
        let url = Url::parse(self.site_url.trim()).map_err(|e| {
            AdapterError::ConfigError(format!("invalid SHAREPOINT_SITE_URL '{}': {e}", self.site_url))
        })?;
        let host = url.host_str().ok_or_else(|| {
            AdapterError::ConfigError(format!("SHAREPOINT_SITE_URL '{}' has no host", self.site_url))
        })?;
        Ok(format!("{host}:{}", url.path().trim_end_matches('/')))
    }

    async fn site_id(&self) -> Result<String> {
        self.site_id
            .get_or_try_init(|| async {
                let body = self
                    .graph
                    .get_json(&format!("/sites/{}", self.site_path()?), &[])
                    .await?;
                let id = body["id"].as_str().map(str::to_string).ok_or_else(|| {
                    AdapterError::Internal("SharePoint site response has no id".into())
                })?;
                info!(site = %self.site_url, site_id = %id, "SharePoint site resolved");
                Ok::<_, AdapterError>(id)
            })
            .await
            .cloned()
    }

    /// Writable columns of `list`.
    pub async fn list_columns(&self, list: &str) -> Result<ListColumns> {
        let site_id = self.site_id().await?;
        let body = self
            .graph
            .get_json(&format!("/sites/{site_id}/lists/{list}/columns"), &[])
            .await?;
        let columns = ListColumns::from_json(&body);
        info!(list, columns = columns.len(), "SharePoint columns discovered");
        Ok(columns)
    }

    /// Create an item and return its numeric id (0 if Graph returned none).
    pub async fn create_item(&self, list: &str, fields: Map<String, Value>) -> Result<i64> {
        let site_id = self.site_id().await?;
        let body = self
            .graph
            .post_json(
                &format!("/sites/{site_id}/lists/{list}/items"),
                &serde_json::json!({ "fields": fields }),
            )
            .await?;
        let id = item_id(&body);
        info!(list, item_id = id, "SharePoint item created");
        Ok(id)
    }
}

fn item_id(body: &Value) -> i64 {
    let raw = match &body["id"] {
        Value::Null => &body["fields"]["id"],
        id => id,
    };
    match raw {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Find the column for `aliases`, skipping columns already filled.
fn find_column<'a>(
    aliases: &[&str],
    columns: &'a ListColumns,
    taken: &Map<String, Value>,
) -> Option<&'a str> {
    aliases
        .iter()
        .filter_map(|alias| columns.get(alias))
        .map(|c| c.internal_name.as_str())
        .find(|internal| !taken.contains_key(*internal))
}

fn map_fields(
    values: Vec<(&str, Option<Value>)>,
    aliases: &[(&str, &[&str])],
    columns: &ListColumns,
) -> (Map<String, Value>, Vec<String>) {
    let mut fields = Map::new();
    let mut warnings = Vec::new();
    for (key, value) in values {
        let Some(value) = value else { continue };
        let field_aliases = aliases
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, a)| *a)
            .unwrap_or_default();
        match find_column(field_aliases, columns, &fields) {
            Some(internal) => {
                fields.insert(internal.to_string(), value);
            }
            None => warnings.push(format!("no SharePoint column for '{key}', skipped")),
        }
    }
    (fields, warnings)
}

fn text(value: &Option<String>) -> Option<Value> {
    value.as_ref().map(|v| Value::String(v.clone()))
}

/// Map invoice header fields to the internal column names of `columns`.
pub fn map_invoice_fields(
    invoice: &InvoiceData,
    columns: &ListColumns,
) -> (Map<String, Value>, Vec<String>) {
    let values = vec![
        ("rechnungsnummer", text(&invoice.invoice_number)),
        ("rechnungsdatum", text(&invoice.invoice_date)),
        ("lieferant", text(&invoice.supplier)),
        ("lieferant_ust_id_nr", text(&invoice.supplier_vat_id)),
        ("nettobetrag", text(&invoice.net_amount)),
        ("mwst_betrag", text(&invoice.vat_amount)),
        ("bruttobetrag", text(&invoice.gross_amount)),
        ("zahlungsziel", text(&invoice.due_date)),
        ("bestellnummer", text(&invoice.order_number)),
    ];
    map_fields(values, &INVOICE_FIELD_ALIASES, columns)
}

/// Map a line item to the position list, linking it to the header item
/// through the lookup column.
pub fn map_position_fields(
    position: &InvoicePosition,
    columns: &ListColumns,
    lookup: Option<&str>,
    header_id: i64,
) -> (Map<String, Value>, Vec<String>) {
    let values = vec![
        ("position", position.position.map(Value::from)),
        ("beschreibung", text(&position.description)),
        ("menge", text(&position.quantity)),
        ("einheit", text(&position.unit)),
        ("einzelpreis", text(&position.unit_price)),
        ("mwst_satz", text(&position.vat_rate)),
        ("gesamtpreis", text(&position.total)),
    ];
    let (mut fields, warnings) = map_fields(values, &POSITION_FIELD_ALIASES, columns);
    if let Some(lookup) = lookup {
        fields.insert(format!("{lookup}LookupId"), Value::from(header_id));
    }
    (fields, warnings)
}

/// Internal name of the first lookup column.
pub fn find_lookup_column(columns: &ListColumns) -> Option<String> {
    columns
        .iter()
        .find(|(_, c)| c.lookup)
        .map(|(_, c)| c.internal_name.clone())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn columns(entries: &[(&str, &str, bool)]) -> ListColumns {
        let mut columns = ListColumns::default();
        for (display, internal, lookup) in entries {
            columns.insert(
                display,
                Column {
                    internal_name: internal.to_string(),
                    lookup: *lookup,
                },
            );
        }
        columns
    }

    #[test]
    fn parses_writable_columns() {
        let body = json!({"value": [
            {"displayName": "Title", "name": "Title"},
            {"displayName": "Created", "name": "Created", "readOnly": true},
            {"displayName": "ContentType", "name": "ContentType", "hidden": true},
            {"displayName": "Rechnung", "name": "Rechnung0", "lookup": {"listId": "x"}},
        ]});
        let columns = ListColumns::from_json(&body);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns.get("title").unwrap().internal_name, "Title");
        assert_eq!(find_lookup_column(&columns).as_deref(), Some("Rechnung0"));
    }

    #[test]
    fn maps_invoice_header() {
        let cols = columns(&[
            ("Title", "Title", false),
            ("Lieferant", "Lieferant", false),
            ("Bruttobetrag", "Brutto_x0020_betrag", false),
        ]);
        let invoice = InvoiceData {
            invoice_number: Some("RE-1".into()),
            supplier: Some("ACME".into()),
            gross_amount: Some("119,00".into()),
            net_amount: Some("100,00".into()),
            ..Default::default()
        };
        let (fields, warnings) = map_invoice_fields(&invoice, &cols);
        assert_eq!(fields["Title"], "RE-1");
        assert_eq!(fields["Lieferant"], "ACME");
        assert_eq!(fields["Brutto_x0020_betrag"], "119,00");
        assert_eq!(warnings, vec!["no SharePoint column for 'nettobetrag', skipped"]);
    }

    #[test]
    fn title_is_not_overwritten_by_a_later_alias() {
        let cols = columns(&[("Title", "Title", false)]);
        let invoice = InvoiceData {
            invoice_number: Some("RE-1".into()),
            supplier: Some("ACME".into()),
            ..Default::default()
        };
        let (fields, warnings) = map_invoice_fields(&invoice, &cols);
        assert_eq!(fields["Title"], "RE-1");
        assert_eq!(warnings, vec!["no SharePoint column for 'lieferant', skipped"]);
    }

    #[test]
    fn maps_position_with_lookup() {
        let cols = columns(&[
            ("Pos", "Pos", false),
            ("Bezeichnung", "Title", false),
            ("Summe", "Summe", false),
        ]);
        let position = InvoicePosition {
            position: Some(2),
            description: Some("Toner".into()),
            total: Some("55,00".into()),
            unit: Some("Stk".into()),
            ..Default::default()
        };
        let (fields, warnings) = map_position_fields(&position, &cols, Some("Rechnung0"), 17);
        assert_eq!(fields["Pos"], 2);
        assert_eq!(fields["Title"], "Toner");
        assert_eq!(fields["Summe"], "55,00");
        assert_eq!(fields["Rechnung0LookupId"], 17);
        assert_eq!(warnings, vec!["no SharePoint column for 'einheit', skipped"]);
    }

    #[test]
    fn item_ids() {
        assert_eq!(item_id(&json!({"id": "42"})), 42);
        assert_eq!(item_id(&json!({"fields": {"id": 7}})), 7);
        assert_eq!(item_id(&json!({"id": "abc"})), 0);
        assert_eq!(item_id(&json!({})), 0);
    }
}
