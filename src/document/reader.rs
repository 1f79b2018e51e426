use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::DOCUMENT_PART;
use crate::Error;

/// Elements whose paragraphs belong to embedded content, not the body text.
const EMBEDDED: &[&[u8]] = &[b"txbxContent", b"AlternateContent", b"pict", b"drawing", b"object"];

/// Load the narratable paragraphs of a `.docx` file.
///
/// Paragraphs come back in document order, trimmed, with empty ones removed.
pub fn load_paragraphs(path: &Path) -> Result<Vec<String>, Error> {
    let file = File::open(path)?;
    let paragraphs = read_paragraphs(file).map_err(|e| match e {
        Error::Zip(zip::result::ZipError::FileNotFound) => Error::Document {
            path: path.to_path_buf(),
            reason: format!("missing {DOCUMENT_PART}; not a Word document"),
        },
        Error::Zip(zip) => Error::Document {
            path: path.to_path_buf(),
            reason: format!("not a zip package: {zip}"),
        },
        other => other,
    })?;
    log::info!(
        "Loaded {} paragraphs from {}",
        paragraphs.len(),
        path.display()
    );
    Ok(paragraphs)
}

/// Read the narratable paragraphs from a `.docx` package.
pub fn read_paragraphs<R: Read + Seek>(reader: R) -> Result<Vec<String>, Error> {
    let mut zip = zip::ZipArchive::new(reader)?;
    let mut xml = String::new();
    zip.by_name(DOCUMENT_PART)?.read_to_string(&mut xml)?;
    let raw = body_paragraphs(&xml)?;
    Ok(paragraphs_from_texts(raw))
}

/// Keep the paragraphs that are non-empty after trimming, trimmed, in order.
pub fn paragraphs_from_texts<I, S>(texts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    texts
        .into_iter()
        .filter_map(|text| {
            let trimmed = text.as_ref().trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect()
}

/// Extract the raw text of every `w:body/w:p`, including empty ones.
///
/// Run text is concatenated; `w:tab` becomes `\t`, `w:br` and `w:cr` become `\n`.
fn body_paragraphs(xml: &str) -> Result<Vec<String>, Error> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"p" && parent_is(&stack, b"body") {
                    current = Some(String::new());
                }
                stack.push(name);
            }
            Event::End(_) => {
                if let Some(name) = stack.pop() {
                    if name == b"p" && parent_is(&stack, b"body") {
                        if let Some(text) = current.take() {
                            paragraphs.push(text);
                        }
                    }
                }
            }
            Event::Empty(e) => {
                let name = e.local_name();
                if name.as_ref() == b"p" && parent_is(&stack, b"body") {
                    paragraphs.push(String::new());
                    continue;
                }
                if let Some(text) = current.as_mut() {
                    if parent_is(&stack, b"r") && !inside_embedded(&stack) {
                        match name.as_ref() {
                            b"tab" => text.push('\t'),
                            b"br" | b"cr" => text.push('\n'),
                            _ => {}
                        }
                    }
                }
            }
            Event::Text(t) => {
                if let Some(text) = current.as_mut() {
                    if parent_is(&stack, b"t") && !inside_embedded(&stack) {
                        text.push_str(&t.unescape()?);
                    }
                }
            }
            Event::CData(t) => {
                if let Some(text) = current.as_mut() {
                    if parent_is(&stack, b"t") && !inside_embedded(&stack) {
                        text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs)
}

fn parent_is(stack: &[Vec<u8>], name: &[u8]) -> bool {
    stack.last().is_some_and(|top| top.as_slice() == name)
}

fn inside_embedded(stack: &[Vec<u8>]) -> bool {
    stack
        .iter()
        .any(|name| EMBEDDED.contains(&name.as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn docx_with_body(body: &str) -> Cursor<Vec<u8>> {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="{}"><w:body>{body}<w:sectPr/></w:body></w:document>"#,
            super::super::WORDML_NS
        );
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(DOCUMENT_PART, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        let mut cursor = zip.finish().unwrap();
        cursor.set_position(0);
        cursor
    }

    fn para(text: &str) -> String {
        format!(r#"<w:p><w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#)
    }

    #[test]
    fn drops_blank_paragraphs_in_order() {
        let body = [para("Hello."), para(""), para("  "), para("World.")].concat();
        let paragraphs = read_paragraphs(docx_with_body(&body)).unwrap();
        assert_eq!(paragraphs, vec!["Hello.", "World."]);
    }

    #[test]
    fn filters_in_memory_texts_the_same_way() {
        assert_eq!(
            paragraphs_from_texts(["Hello.", "", "  ", "World."]),
            vec!["Hello.", "World."]
        );
    }

    #[test]
    fn joins_runs_tabs_and_breaks() {
        let body = r#"<w:p><w:pPr><w:tabs><w:tab w:val="left" w:pos="720"/></w:tabs></w:pPr>
            <w:r><w:t>Olá</w:t></w:r><w:r><w:tab/><w:t xml:space="preserve"> mundo &amp; </w:t></w:r>
            <w:r><w:br/><w:t>fim</w:t></w:r></w:p>"#;
        let paragraphs = read_paragraphs(docx_with_body(body)).unwrap();
        assert_eq!(paragraphs, vec!["Olá\t mundo & \nfim"]);
    }

    #[test]
    fn skips_tables_and_text_boxes() {
        let body = format!(
            r#"{}<w:tbl><w:tr><w:tc>{}</w:tc></w:tr></w:tbl>
            <w:p><w:r><w:t>Body</w:t></w:r><w:r><w:drawing><wps:txbx><w:txbxContent>{}</w:txbxContent></wps:txbx></w:drawing></w:r></w:p>"#,
            para("Before"),
            para("In table"),
            para("In text box"),
        );
        let paragraphs = read_paragraphs(docx_with_body(&body)).unwrap();
        assert_eq!(paragraphs, vec!["Before", "Body"]);
    }

    #[test]
    fn rejects_non_docx_zip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.docx");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("hello.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"hi").unwrap();
        zip.finish().unwrap();

        assert!(matches!(load_paragraphs(&path), Err(Error::Document { .. })));
    }

    #[test]
    fn rejects_plain_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.docx");
        std::fs::write(&path, "not a zip").unwrap();
        assert!(matches!(load_paragraphs(&path), Err(Error::Document { .. })));
    }
}
