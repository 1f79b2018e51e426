//! Word (`.docx`) documents.
//!
//! A `.docx` file is a zip package whose main part, `word/document.xml`,
//! holds the body as a sequence of `w:p` (paragraph) and `w:tbl` (table)
//! elements. Only body-level paragraphs are narrated; tables, text boxes and
//! other embedded content are skipped.
//!
//! # Examples
//!
//! ```rust,no_run
//! use narrate_rs::document::{load_paragraphs, DocxBuilder};
//! use std::path::Path;
//!
//! let paragraphs = load_paragraphs(Path::new("chapter.docx"))?;
//!
//! let mut report = DocxBuilder::new();
//! report.heading("Paragraphs", 0);
//! for text in &paragraphs {
//!     report.paragraph(text);
//! }
//! report.save(Path::new("copy.docx"))?;
//! # Ok::<(), narrate_rs::Error>(())
//! ```

pub mod reader;
pub mod writer;

pub use reader::{load_paragraphs, paragraphs_from_texts, read_paragraphs};
pub use writer::DocxBuilder;

/// WordprocessingML main namespace.
pub(crate) const WORDML_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

/// Path of the main document part inside the package.
pub(crate) const DOCUMENT_PART: &str = "word/document.xml";
