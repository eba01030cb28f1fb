// src/backup/xml.rs

//! Minimal XML document builder for the backup document set.
//!
//! The target format's documents are flat element trees with text leaves;
//! this wrapper keeps the writer call sites short and guarantees every
//! document starts with the XML declaration.

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

const DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// In-memory XML document under construction
pub struct XmlDoc {
    writer: Writer<Vec<u8>>,
}

impl XmlDoc {
    pub fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    /// Open an element, optionally with attributes.
    pub fn start(&mut self, name: &str, attrs: &[(&str, &str)]) {
        let mut elem = BytesStart::new(name);
        for (key, value) in attrs {
            elem.push_attribute((*key, *value));
        }
        // Writing to a Vec cannot fail.
        let _ = self.writer.write_event(Event::Start(elem));
    }

    pub fn end(&mut self, name: &str) {
        let _ = self.writer.write_event(Event::End(BytesEnd::new(name)));
    }

    /// `<name>text</name>`
    pub fn leaf(&mut self, name: &str, text: &str) {
        self.start(name, &[]);
        let _ = self.writer.write_event(Event::Text(BytesText::new(text)));
        self.end(name);
    }

    /// `<name/>`
    pub fn empty(&mut self, name: &str) {
        let _ = self
            .writer
            .write_event(Event::Empty(BytesStart::new(name)));
    }

    /// Declaration plus the accumulated document bytes
    pub fn finish(self) -> Vec<u8> {
        let mut bytes = DECLARATION.as_bytes().to_vec();
        bytes.extend(self.writer.into_inner());
        bytes
    }
}

/// A document that is just one empty root element.
pub fn empty_document(root: &str) -> Vec<u8> {
    let mut doc = XmlDoc::new();
    doc.empty(root);
    doc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_and_attributes() {
        let mut doc = XmlDoc::new();
        doc.start("section", &[("id", "3")]);
        doc.leaf("name", "Week 1");
        doc.empty("sequence");
        doc.end("section");

        let text = String::from_utf8(doc.finish()).unwrap();
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n"));
        assert!(text.contains("<section id=\"3\">"));
        assert!(text.contains("<name>Week 1</name>"));
        assert!(text.contains("<sequence/>"));
        assert!(text.ends_with("</section>"));
    }

    #[test]
    fn test_text_is_escaped() {
        let mut doc = XmlDoc::new();
        doc.start("root", &[]);
        doc.leaf("title", "Fish & Chips <large>");
        doc.end("root");

        let text = String::from_utf8(doc.finish()).unwrap();
        assert!(text.contains("Fish &amp; Chips &lt;large&gt;"));
    }

    #[test]
    fn test_empty_document() {
        let text = String::from_utf8(empty_document("inforef")).unwrap();
        assert_eq!(text, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<inforef/>");
    }
}
