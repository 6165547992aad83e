//! Employee roster CSV (`name`, `iban`, `zielordner`).

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::iban::validate_iban;

const REQUIRED_COLUMNS: [&str; 3] = ["iban", "name", "zielordner"];
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// One employee from the roster, plus what payslip matching found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Employee {
    pub name: String,
    /// Normalized IBAN.
    pub iban: String,
    pub iban_masked: String,
    /// Where the employee's payslip is saved.
    pub target_dir: PathBuf,
    /// Zero-based payslip page, once matched.
    pub page_index: Option<usize>,
    pub amount_cents: i64,
    pub pdf_saved: bool,
}

/// Valid employees and per-row errors.
#[derive(Debug, Clone, Default)]
pub struct RosterParse {
    pub employees: Vec<Employee>,
    pub errors: Vec<String>,
}

/// Read and validate a roster file.
///
/// Target directories are created as a side effect.
pub fn parse_roster(path: &Path) -> RosterParse {
    let mut result = RosterParse::default();
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            result.errors.push(format!("CSV file not found: {}", path.display()));
            return result;
        }
        Err(e) => {
            result
                .errors
                .push(format!("CSV file could not be read: {}: {e}", path.display()));
            return result;
        }
    };
    let text = decode(&raw);
    let delimiter = sniff_delimiter(&text);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(e) => {
            result.errors.push(format!("CSV header could not be read: {e}"));
            return result;
        }
    };
    let column = |wanted: &str| {
        headers
            .iter()
            .position(|h| h.trim().to_lowercase() == wanted)
    };
    let (Some(name_col), Some(iban_col), Some(dir_col)) =
        (column("name"), column("iban"), column("zielordner"))
    else {
        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| column(*c).is_none())
            .collect();
        result.errors.push(format!(
            "CSV is missing columns: {}. Expected: {}.",
            missing.join(", "),
            REQUIRED_COLUMNS.join(", ")
        ));
        return result;
    };

    for (i, record) in reader.records().enumerate() {
        let row = i + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                result.errors.push(format!("Row {row}: {e}"));
                continue;
            }
        };
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let field = |idx: usize| record.get(idx).unwrap_or_default().trim();

        let name = field(name_col);
        if name.is_empty() {
            result.errors.push(format!("Row {row}: no name given"));
            continue;
        }

        let check = validate_iban(field(iban_col));
        if !check.valid {
            result
                .errors
                .push(format!("Row {row} ({name}): invalid IBAN: {}", check.error));
            continue;
        }

        let raw_dir = field(dir_col);
        if raw_dir.is_empty() {
            result
                .errors
                .push(format!("Row {row} ({name}): no target directory given"));
            continue;
        }

        let target_dir = expand_home(raw_dir);
        if let Err(e) = std::fs::create_dir_all(&target_dir) {
            result.errors.push(format!(
                "Row {row} ({name}): could not create target directory: {e}"
            ));
            continue;
        }
        let target_dir = std::path::absolute(&target_dir).unwrap_or(target_dir);

        debug!(employee = %name, dir = %target_dir.display(), "employee loaded");
        result.employees.push(Employee {
            name: name.to_string(),
            iban: check.normalized,
            iban_masked: check.masked,
            target_dir,
            page_index: None,
            amount_cents: 0,
            pdf_saved: false,
        });
    }

    if result.employees.is_empty() && result.errors.is_empty() {
        result.errors.push("CSV contains no valid entries.".into());
    }
    result
}

/// UTF-8 (BOM stripped), falling back to Latin-1.
fn decode(raw: &[u8]) -> String {
    let raw = raw.strip_prefix(UTF8_BOM).unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(text) => text.to_string(),
        Err(_) => raw.iter().map(|&b| char::from(b)).collect(),
    }
}

/// The most frequent of `;`, `,` and tab in the header line.
fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    let mut best = (b',', 0);
    for candidate in [b';', b',', b'\t'] {
        let count = header.bytes().filter(|b| *b == candidate).count();
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}

fn expand_home(raw: &str) -> PathBuf {
    let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"));
    match (raw, home) {
        ("~", Some(home)) => PathBuf::from(home),
        (_, Some(home)) if raw.starts_with("~/") => PathBuf::from(home).join(&raw[2..]),
        _ => PathBuf::from(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn parses_semicolon_roster_with_bom() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out/max");
        let content = format!(
            "\u{FEFF}Name;IBAN;Zielordner\nMax Mustermann;DE89 3704 0044 0532 0130 00;{}\n;;\n",
            target.display()
        );
        let path = write(dir.path(), "roster.csv", content.as_bytes());

        let parsed = parse_roster(&path);
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        assert_eq!(parsed.employees.len(), 1);
        let max = &parsed.employees[0];
        assert_eq!(max.name, "Max Mustermann");
        assert_eq!(max.iban, "DE89370400440532013000");
        assert_eq!(max.iban_masked, "DE89**************3000");
        assert!(target.is_dir());
        assert_eq!(max.page_index, None);
    }

    #[test]
    fn reports_row_errors() {
        let dir = tempfile::tempdir().unwrap();
        let ok_dir = dir.path().join("ok");
        let content = format!(
            "name,iban,zielordner\n,DE89370400440532013000,{ok}\nErika Muster,DE00123,{ok}\nJan Jansen,DE89370400440532013000,\nAnna Berg,DE89370400440532013000,{ok}\n",
            ok = ok_dir.display()
        );
        let path = write(dir.path(), "roster.csv", content.as_bytes());

        let parsed = parse_roster(&path);
        assert_eq!(parsed.employees.len(), 1);
        assert_eq!(parsed.employees[0].name, "Anna Berg");
        assert_eq!(parsed.errors.len(), 3);
        assert_eq!(parsed.errors[0], "Row 2: no name given");
        assert!(parsed.errors[1].starts_with("Row 3 (Erika Muster): invalid IBAN: "));
        assert_eq!(parsed.errors[2], "Row 4 (Jan Jansen): no target directory given");
    }

    #[test]
    fn missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "roster.csv", b"Name,Konto\nMax,DE89\n");
        let parsed = parse_roster(&path);
        assert_eq!(
            parsed.errors,
            vec!["CSV is missing columns: iban, zielordner. Expected: iban, name, zielordner."]
        );
    }

    #[test]
    fn missing_file_and_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let parsed = parse_roster(&dir.path().join("nope.csv"));
        assert!(parsed.errors[0].starts_with("CSV file not found: "));

        let path = write(dir.path(), "empty.csv", b"name,iban,zielordner\n");
        assert_eq!(parse_roster(&path).errors, vec!["CSV contains no valid entries."]);
    }

    #[test]
    fn latin1_names() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("j");
        let mut content = b"name\tiban\tzielordner\nJ\xFCrgen M\xFCller\tDE89370400440532013000\t".to_vec();
        content.extend_from_slice(target.display().to_string().as_bytes());
        let path = write(dir.path(), "roster.csv", &content);

        let parsed = parse_roster(&path);
        assert_eq!(parsed.employees[0].name, "Jürgen Müller");
    }

    #[test]
    fn sniffs_delimiters() {
        assert_eq!(sniff_delimiter("name;iban;zielordner"), b';');
        assert_eq!(sniff_delimiter("name\tiban\tzielordner"), b'\t');
        assert_eq!(sniff_delimiter("name"), b',');
    }
}
