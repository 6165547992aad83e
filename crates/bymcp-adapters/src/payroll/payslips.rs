//! Payslip PDF splitting: match each page to an employee, read the payout
//! amount and save the page into the employee's folder.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use super::roster::Employee;
use crate::money::parse_german_amount;
use crate::pdf::{PageSource, PdfFile};

/// Minimum name score for a page to count as an employee's payslip.
const MIN_SCORE: f64 = 0.4;

const SEP: &str = r"\s*[:\-=]?\s*";
const EUR: &str = r"(?:(?:EUR|€)\s*)?";
const AMT: &str = r"(\d{1,3}(?:\.\d{3})*,\d{2})";

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid amount pattern {pattern}: {e}"))
}

/// `Auszahlungsbetrag` as a table header with the value on the next line.
static PAYOUT_HEADER: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)auszahlungsbetrag\s*\n([^\n]*)"));

static AMOUNT_AT_START: LazyLock<Regex> = LazyLock::new(|| compile(&format!("^{AMT}")));

static LABELLED_AMOUNTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let mut patterns: Vec<Regex> = [
        "auszahlungsbetrag",
        "nettolohn",
        "nettogehalt",
        "netto",
        r"überweisung\w*",
        "zahlbetrag",
        "betrag",
    ]
    .iter()
    .map(|label| compile(&format!("(?i){label}{SEP}{EUR}{AMT}")))
    .collect();
    patterns.push(compile(&format!(r"{AMT}\s*(?:EUR|€)")));
    patterns
});

/// What splitting a payslip PDF produced.
#[derive(Debug, Clone, Default)]
pub struct PayslipRun {
    pub saved_files: Vec<PathBuf>,
    /// One-based numbers of pages no employee matched.
    pub unmatched_pages: Vec<usize>,
    pub errors: Vec<String>,
}

/// Open `pdf_path` and split it across `employees`.
pub fn process_payslips(
    pdf_path: &Path,
    employees: &mut [Employee],
    period: &str,
    skip_save: &HashSet<String>,
) -> PayslipRun {
    match PdfFile::open(pdf_path) {
        Ok(pdf) => match_payslips(&pdf, employees, period, skip_save),
        Err(e) => PayslipRun {
            errors: vec![format!("PDF could not be opened: {e}")],
            ..Default::default()
        },
    }
}

/// Assign every page to its best-matching employee and save it.
///
/// Employees in `skip_save` are matched (page and amount are set) but their
/// page is not written.
pub fn match_payslips(
    source: &dyn PageSource,
    employees: &mut [Employee],
    period: &str,
    skip_save: &HashSet<String>,
) -> PayslipRun {
    let mut run = PayslipRun::default();

    for index in 0..source.page_count() {
        let page = index + 1;
        let text = source.page_text(index);
        let amount = extract_amount(&text);

        let mut best: Option<(usize, f64)> = None;
        for (i, employee) in employees.iter().enumerate() {
            let score = name_score(&text, &employee.name);
            if score > best.map_or(0.0, |(_, s)| s) {
                best = Some((i, score));
            }
        }

        let Some((i, score)) = best.filter(|(_, score)| *score >= MIN_SCORE) else {
            warn!(page, score = best.map_or(0.0, |(_, s)| s), "no employee matches page");
            run.unmatched_pages.push(page);
            continue;
        };

        let employee = &mut employees[i];
        employee.page_index = Some(index);
        employee.amount_cents = amount;
        info!(page, employee = %employee.name, score, amount_cents = amount, "page matched");

        if skip_save.contains(&employee.name) {
            info!(employee = %employee.name, "saving payslip skipped");
            continue;
        }

        let output = employee
            .target_dir
            .join(format!("{}.pdf", payslip_file_stem(&employee.name, period)));
        match source.write_page(index, &output) {
            Ok(()) => {
                info!(path = %output.display(), "payslip saved");
                employee.pdf_saved = true;
                run.saved_files.push(output);
            }
            Err(e) => run.errors.push(format!("Page {page} ({}): {e}", employee.name)),
        }
    }
    run
}

/// The payout amount on a payslip page, in cents; 0 when none is found.
pub fn extract_amount(text: &str) -> i64 {
    if let Some(cents) = PAYOUT_HEADER
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|line| last_amount(line.as_str()))
        .find(|cents| *cents > 0)
    {
        return cents;
    }
    LABELLED_AMOUNTS
        .iter()
        .filter_map(|pattern| pattern.captures(text))
        .filter_map(|caps| caps.get(1).and_then(|m| parse_german_amount(m.as_str())))
        .find(|cents| *cents > 0)
        .unwrap_or(0)
}

/// The last amount in `line` that does not continue a longer number.
fn last_amount(line: &str) -> Option<i64> {
    let bytes = line.as_bytes();
    (0..bytes.len())
        .rev()
        .filter(|&i| {
            bytes[i].is_ascii_digit() && (i == 0 || !(bytes[i - 1].is_ascii_digit() || bytes[i - 1] == b'.'))
        })
        .find_map(|i| {
            AMOUNT_AT_START
                .captures(&line[i..])
                .and_then(|c| c.get(1))
                .and_then(|m| parse_german_amount(m.as_str()))
        })
}

/// How well `name` matches a page: full name 1.0, all parts 0.7, last
/// name 0.4, first name 0.2.
pub fn name_score(text: &str, name: &str) -> f64 {
    let text = text.to_lowercase();
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return 0.0;
    }
    if text.contains(&name) {
        return 1.0;
    }
    let parts: Vec<&str> = name.split_whitespace().collect();
    let (Some(first), Some(last)) = (parts.first(), parts.last()) else {
        return 0.0;
    };
    if parts.len() < 2 {
        return if text.contains(first) { 1.0 } else { 0.0 };
    }
    if parts.iter().all(|part| text.contains(part)) {
        0.7
    } else if text.contains(last) {
        0.4
    } else if text.contains(first) {
        0.2
    } else {
        0.0
    }
}

/// `YYYYMM_` plus the first letter of the first name and the first two of
/// the last name, e.g. `202602_MRI` for Michael Richter.
pub fn payslip_file_stem(name: &str, period: &str) -> String {
    let parts: Vec<&str> = name.split_whitespace().collect();
    let first = parts.first().copied().unwrap_or_default();
    let last = if parts.len() > 1 {
        parts.last().copied().unwrap_or_default()
    } else {
        first
    };
    let initials: String = first.chars().take(1).chain(last.chars().take(2)).collect();
    format!("{}_{}", period.replace('-', ""), initials.to_uppercase())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::error::Result;

    struct FakePages {
        pages: Vec<String>,
        written: RefCell<Vec<(usize, PathBuf)>>,
    }

    impl FakePages {
        fn new(pages: &[&str]) -> Self {
            Self {
                pages: pages.iter().map(|p| p.to_string()).collect(),
                written: RefCell::new(Vec::new()),
            }
        }
    }

    impl PageSource for FakePages {
        fn page_count(&self) -> usize {
            self.pages.len()
        }

        fn page_text(&self, index: usize) -> String {
            self.pages[index].clone()
        }

        fn write_page(&self, index: usize, path: &Path) -> Result<()> {
            self.written.borrow_mut().push((index, path.to_path_buf()));
            Ok(())
        }
    }

    fn employee(name: &str, dir: &str) -> Employee {
        Employee {
            name: name.into(),
            iban: "DE89370400440532013000".into(),
            iban_masked: "DE89**************3000".into(),
            target_dir: PathBuf::from(dir),
            page_index: None,
            amount_cents: 0,
            pdf_saved: false,
        }
    }

    #[test]
    fn amount_patterns() {
        assert_eq!(extract_amount("Auszahlungsbetrag: 2.345,67 EUR"), 234_567);
        assert_eq!(extract_amount("Nettogehalt = EUR 1.999,00"), 199_900);
        assert_eq!(extract_amount("Überweisungsbetrag 850,10"), 85_010);
        assert_eq!(extract_amount("Summe 12,00 €"), 1_200);
        assert_eq!(extract_amount("kein Betrag"), 0);
    }

    #[test]
    fn payout_header_takes_last_amount_on_next_line() {
        let text = "Brutto   Steuern   Auszahlungsbetrag\n4.100,00   1.020,50   3.079,50\n";
        assert_eq!(extract_amount("Auszahlungsbetrag\n4.100,00   1.020,50   3.079,50"), 307_950);
        assert_eq!(extract_amount(text), 307_950);
    }

    #[test]
    fn later_payout_header_is_used_when_first_has_no_amount() {
        let text = "Auszahlungsbetrag\nsiehe Tabelle\n\
                    Lohnart   Brutto   Auszahlungsbetrag\n\
                    Gehalt   2.000,00   1.650,00\n\
                    Netto: 1.000,00\n";
        assert_eq!(extract_amount(text), 165_000);
    }

    #[test]
    fn zero_amount_falls_through() {
        assert_eq!(extract_amount("Auszahlungsbetrag\n0,00\nNetto: 1.500,00"), 150_000);
    }

    #[test]
    fn name_scores() {
        assert_eq!(name_score("Herr Max Mustermann", "Max Mustermann"), 1.0);
        assert_eq!(name_score("Mustermann, Max", "Max Mustermann"), 0.7);
        assert_eq!(name_score("Frau Erika Mustermann", "Max Mustermann"), 0.4);
        assert_eq!(name_score("Max Schmidt", "Max Mustermann"), 0.2);
        assert_eq!(name_score("Nobody", "Max Mustermann"), 0.0);
        assert_eq!(name_score("Cher, Sängerin", "Cher"), 1.0);
    }

    #[test]
    fn file_stems() {
        assert_eq!(payslip_file_stem("Michael Richter", "2026-02"), "202602_MRI");
        assert_eq!(payslip_file_stem("Anna Maria Berg", "2026-11"), "202611_ABE");
        assert_eq!(payslip_file_stem("Cher", "2026-01"), "202601_CCH");
    }

    #[test]
    fn assigns_pages_and_saves() {
        let pages = FakePages::new(&[
            "Lohnabrechnung Max Mustermann\nAuszahlungsbetrag: 2.500,00",
            "Deckblatt",
            "Lohnabrechnung Erika Musterfrau\nNetto: 1.800,00",
        ]);
        let mut employees = vec![
            employee("Max Mustermann", "/payslips/max"),
            employee("Erika Musterfrau", "/payslips/erika"),
        ];
        let skip: HashSet<String> = ["Erika Musterfrau".to_string()].into();

        let run = match_payslips(&pages, &mut employees, "2026-02", &skip);

        assert_eq!(run.unmatched_pages, vec![2]);
        assert_eq!(run.saved_files, vec![PathBuf::from("/payslips/max/202602_MMU.pdf")]);
        assert!(run.errors.is_empty());
        assert_eq!(employees[0].page_index, Some(0));
        assert_eq!(employees[0].amount_cents, 250_000);
        assert!(employees[0].pdf_saved);
        assert_eq!(employees[1].page_index, Some(2));
        assert_eq!(employees[1].amount_cents, 180_000);
        assert!(!employees[1].pdf_saved);
        assert_eq!(pages.written.borrow().len(), 1);
    }

    #[test]
    fn first_employee_wins_ties() {
        let pages = FakePages::new(&["Schmidt"]);
        let mut employees = vec![
            employee("Anna Schmidt", "/a"),
            employee("Paul Schmidt", "/p"),
        ];
        let run = match_payslips(&pages, &mut employees, "2026-02", &HashSet::new());
        assert!(run.unmatched_pages.is_empty());
        assert_eq!(employees[0].page_index, Some(0));
        assert_eq!(employees[1].page_index, None);
    }

    #[test]
    fn unreadable_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"garbage").unwrap();
        let run = process_payslips(&path, &mut [], "2026-02", &HashSet::new());
        assert_eq!(run.errors.len(), 1);
        assert!(run.errors[0].starts_with("PDF could not be opened: "));
    }
}
