use std::borrow::Cow;
use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use zip::write::SimpleFileOptions;

use super::{DOCUMENT_PART, WORDML_NS};
use crate::Error;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

#[derive(Debug, Clone, PartialEq)]
enum Block {
    Heading { text: String, level: u8 },
    Paragraph(String),
}

/// Builds a minimal `.docx` document out of headings and plain paragraphs.
///
/// Heading level 0 maps to the `Title` style, levels 1-9 to `Heading1`..`Heading9`.
#[derive(Debug, Clone, Default)]
pub struct DocxBuilder {
    blocks: Vec<Block>,
}

impl DocxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heading(&mut self, text: impl Into<String>, level: u8) -> &mut Self {
        self.blocks.push(Block::Heading {
            text: text.into(),
            level: level.min(9),
        });
        self
    }

    pub fn paragraph(&mut self, text: impl Into<String>) -> &mut Self {
        self.blocks.push(Block::Paragraph(text.into()));
        self
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let file = File::create(path)?;
        self.write_to(file)?;
        log::debug!("Wrote {} blocks to {}", self.blocks.len(), path.display());
        Ok(())
    }

    /// Write the package to any seekable sink.
    pub fn write_to<W: Write + Seek>(&self, sink: W) -> Result<W, Error> {
        let options = SimpleFileOptions::default();
        let mut zip = zip::ZipWriter::new(sink);

        zip.start_file("[Content_Types].xml", options)?;
        zip.write_all(CONTENT_TYPES.as_bytes())?;
        zip.start_file("_rels/.rels", options)?;
        zip.write_all(PACKAGE_RELS.as_bytes())?;
        zip.start_file(DOCUMENT_PART, options)?;
        zip.write_all(&self.document_xml()?)?;

        Ok(zip.finish()?)
    }

    fn document_xml(&self) -> Result<Vec<u8>, Error> {
        let mut xml = Writer::new(Vec::new());
        xml.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
        xml.write_event(Event::Start(
            BytesStart::new("w:document").with_attributes([("xmlns:w", WORDML_NS)]),
        ))?;
        xml.write_event(Event::Start(BytesStart::new("w:body")))?;

        for block in &self.blocks {
            match block {
                Block::Heading { text, level } => {
                    let style = match level {
                        0 => "Title".to_string(),
                        n => format!("Heading{n}"),
                    };
                    write_paragraph(&mut xml, Some(&style), text)?;
                }
                Block::Paragraph(text) => write_paragraph(&mut xml, None, text)?,
            }
        }

        xml.write_event(Event::Empty(BytesStart::new("w:sectPr")))?;
        xml.write_event(Event::End(BytesEnd::new("w:body")))?;
        xml.write_event(Event::End(BytesEnd::new("w:document")))?;
        Ok(xml.into_inner())
    }
}

/// Drop characters outside the XML 1.0 `Char` production.
///
/// Engine messages often carry ANSI colour codes and other C0 controls,
/// which escaping cannot represent. `\r` is dropped too since lines are
/// split on `\n` only.
fn xml_safe(text: &str) -> Cow<'_, str> {
    let allowed = |ch: char| match ch {
        '\t' | '\n' => true,
        '\u{FFFE}' | '\u{FFFF}' => false,
        ch => ch >= '\u{20}',
    };
    if text.chars().all(allowed) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|&ch| allowed(ch)).collect())
    }
}

/// One `w:p`; line breaks in `text` become `w:br`.
fn write_paragraph(xml: &mut Writer<Vec<u8>>, style: Option<&str>, text: &str) -> Result<(), Error> {
    let text = xml_safe(text);
    xml.write_event(Event::Start(BytesStart::new("w:p")))?;
    if let Some(style) = style {
        xml.write_event(Event::Start(BytesStart::new("w:pPr")))?;
        xml.write_event(Event::Empty(
            BytesStart::new("w:pStyle").with_attributes([("w:val", style)]),
        ))?;
        xml.write_event(Event::End(BytesEnd::new("w:pPr")))?;
    }

    xml.write_event(Event::Start(BytesStart::new("w:r")))?;
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            xml.write_event(Event::Empty(BytesStart::new("w:br")))?;
        }
        if line.is_empty() {
            continue;
        }
        let mut t = BytesStart::new("w:t");
        if line.trim() != line {
            t.push_attribute(("xml:space", "preserve"));
        }
        xml.write_event(Event::Start(t))?;
        xml.write_event(Event::Text(BytesText::new(line)))?;
        xml.write_event(Event::End(BytesEnd::new("w:t")))?;
    }
    xml.write_event(Event::End(BytesEnd::new("w:r")))?;

    xml.write_event(Event::End(BytesEnd::new("w:p")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::read_paragraphs;
    use std::io::{Cursor, Read};

    #[test]
    fn written_report_reads_back() {
        let mut doc = DocxBuilder::new();
        doc.heading("Paragraphs with errors", 0)
            .heading("Paragraph 3", 1)
            .paragraph("Fish & chips <cheap>")
            .paragraph("Error: line one\nline two");

        let mut cursor = doc.write_to(Cursor::new(Vec::new())).unwrap();
        cursor.set_position(0);
        let paragraphs = read_paragraphs(cursor).unwrap();
        assert_eq!(
            paragraphs,
            vec![
                "Paragraphs with errors",
                "Paragraph 3",
                "Fish & chips <cheap>",
                "Error: line one\nline two",
            ]
        );
    }

    #[test]
    fn control_characters_are_dropped_from_text() {
        let mut doc = DocxBuilder::new();
        doc.paragraph("Error: \u{1b}[31mCUDA out of memory\u{1b}[0m\r\n\u{7}done\tok\u{FFFE}");

        let cursor = doc.write_to(Cursor::new(Vec::new())).unwrap();
        let mut zip = zip::ZipArchive::new(cursor).unwrap();
        let mut xml = String::new();
        zip.by_name(DOCUMENT_PART)
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        assert!(!xml.contains('\u{1b}'));
        assert!(!xml.contains('\u{7}'));
        assert!(!xml.contains('\r'));
        assert!(!xml.contains('\u{FFFE}'));

        let mut cursor = doc.write_to(Cursor::new(Vec::new())).unwrap();
        cursor.set_position(0);
        assert_eq!(
            read_paragraphs(cursor).unwrap(),
            vec!["Error: [31mCUDA out of memory[0m\ndone\tok"]
        );
    }

    #[test]
    fn package_has_required_parts_and_styles() {
        let mut doc = DocxBuilder::new();
        doc.heading("Title", 0).heading("Section", 1);
        let cursor = doc.write_to(Cursor::new(Vec::new())).unwrap();

        let mut zip = zip::ZipArchive::new(cursor).unwrap();
        for part in ["[Content_Types].xml", "_rels/.rels", DOCUMENT_PART] {
            assert!(zip.by_name(part).is_ok(), "missing {part}");
        }
        let mut xml = String::new();
        zip.by_name(DOCUMENT_PART)
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        assert!(xml.contains(r#"<w:pStyle w:val="Title"/>"#));
        assert!(xml.contains(r#"<w:pStyle w:val="Heading1"/>"#));
    }
}
