//! PDF access built on `lopdf`.
//!
//! Only two things are needed from a PDF: the text of a page, and the page
//! itself as a standalone document.  [`PageSource`] abstracts exactly that so
//! payslip matching can be tested without real PDFs.

use std::path::Path;

use lopdf::Document;
use tracing::warn;

use crate::error::{AdapterError, Result};

/// Page-level access to a multi-page document.
pub trait PageSource {
    /// Number of pages.
    fn page_count(&self) -> usize;

    /// Text of the zero-based page `index`; empty when nothing can be
    /// extracted.
    fn page_text(&self, index: usize) -> String;

    /// Write page `index` as a single-page PDF to `path`.
    fn write_page(&self, index: usize, path: &Path) -> Result<()>;
}

/// A loaded PDF document.
pub struct PdfFile {
    doc: Document,
}

impl PdfFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let doc = Document::load(path.as_ref())?;
        Ok(Self { doc })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(bytes)?;
        Ok(Self { doc })
    }

    /// Text of all pages, joined by newlines.
    pub fn full_text(&self) -> String {
        (0..self.page_count())
            .map(|i| self.page_text(i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn page_numbers(&self) -> Vec<u32> {
        self.doc.get_pages().keys().copied().collect()
    }
}

impl PageSource for PdfFile {
    fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    fn page_text(&self, index: usize) -> String {
        let Some(number) = self.page_numbers().get(index).copied() else {
            return String::new();
        };
        match self.doc.extract_text(&[number]) {
            Ok(text) => text,
            Err(e) => {
                warn!(page = index + 1, error = %e, "text extraction failed");
                String::new()
            }
        }
    }

    fn write_page(&self, index: usize, path: &Path) -> Result<()> {
        let numbers = self.page_numbers();
        let keep = numbers.get(index).copied().ok_or_else(|| {
            AdapterError::Pdf(format!(
                "page {} does not exist ({} pages)",
                index + 1,
                numbers.len()
            ))
        })?;
        let others: Vec<u32> = numbers.into_iter().filter(|n| *n != keep).collect();

        let mut single = self.doc.clone();
        single.delete_pages(&others);
        single.prune_objects();
        single.save(path)?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::pdf_with_pages;
    use super::*;

    #[test]
    fn counts_pages() {
        let pdf = PdfFile::from_bytes(&pdf_with_pages(&["one", "two", "three"])).unwrap();
        assert_eq!(pdf.page_count(), 3);
    }

    #[test]
    fn writes_single_page() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = PdfFile::from_bytes(&pdf_with_pages(&["one", "two", "three"])).unwrap();
        let target = dir.path().join("page2.pdf");

        pdf.write_page(1, &target).unwrap();

        let written = PdfFile::open(&target).unwrap();
        assert_eq!(written.page_count(), 1);
    }

    #[test]
    fn missing_page_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = PdfFile::from_bytes(&pdf_with_pages(&["one"])).unwrap();
        let err = pdf.write_page(4, &dir.path().join("x.pdf")).unwrap_err();
        assert!(err.to_string().contains("page 5 does not exist"));
        assert_eq!(pdf.page_text(4), "");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(PdfFile::from_bytes(b"not a pdf").is_err());
    }
}
