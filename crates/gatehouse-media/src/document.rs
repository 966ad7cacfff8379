//! PDF structure inspection and single-page extraction.
//!
//! The page count always comes from the parsed page tree, never from the
//! uploader. A single-page document is produced by cloning the source,
//! deleting every other page, then pruning unreachable objects.

use lopdf::Document;

use crate::{Error, Result};

/// A parsed PDF ready for splitting.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    doc: Document,
    pages: u32,
}

impl PdfDocument {
    /// Parse a PDF from memory.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDocument`] if the bytes do not parse, the document is
    /// encrypted, or it has no pages.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(bytes).map_err(|e| Error::invalid_document(e.to_string()))?;

        if doc.is_encrypted() {
            return Err(Error::invalid_document("encrypted documents are not supported"));
        }

        let pages = u32::try_from(doc.get_pages().len())
            .map_err(|_| Error::invalid_document("too many pages"))?;
        if pages == 0 {
            return Err(Error::invalid_document("document has no pages"));
        }

        Ok(Self { doc, pages })
    }

    /// Number of pages in the page tree.
    pub fn page_count(&self) -> u32 {
        self.pages
    }

    /// Serialize a standalone PDF containing only `page` (1-indexed).
    pub fn extract_page(&self, page: u32) -> Result<Vec<u8>> {
        if page == 0 || page > self.pages {
            return Err(Error::PageOutOfRange {
                page,
                total: self.pages,
            });
        }

        let mut single = self.doc.clone();
        // One call: every delete_pages walks the whole page tree.
        let others: Vec<u32> = (1..=self.pages).filter(|&n| n != page).collect();
        single.delete_pages(&others);
        single.prune_objects();
        single.compress();

        let mut buffer = Vec::new();
        single
            .save_to(&mut buffer)
            .map_err(|e| Error::invalid_document(format!("save failed: {e}")))?;
        Ok(buffer)
    }

    /// Extract every page in order, calling `sink` with (page, bytes).
    pub fn split_each<F>(&self, mut sink: F) -> Result<()>
    where
        F: FnMut(u32, Vec<u8>) -> Result<()>,
    {
        for page in 1..=self.pages {
            let bytes = self.extract_page(page)?;
            sink(page, bytes)?;
        }
        Ok(())
    }
}

/// Synthetic PDFs for tests.
#[cfg(any(test, feature = "test-util"))]
pub mod sample {
    use lopdf::content::{Content, Operation};
    use lopdf::{Dictionary, Document, Object, Stream, StringFormat};

    /// Build a PDF with `num_pages` Letter-size pages labelled "Page n".
    pub fn sample_pdf(num_pages: u32) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"Type1".to_vec())),
            ("BaseFont", Object::Name(b"Helvetica".to_vec())),
        ]));
        let resources_id = doc.add_object(Dictionary::from_iter(vec![(
            "Font",
            Object::Dictionary(Dictionary::from_iter(vec![("F1", Object::Reference(font_id))])),
        )]));

        let mut page_ids = Vec::new();
        for i in 0..num_pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(24)]),
                    Operation::new("Td", vec![Object::Integer(100), Object::Integer(700)]),
                    Operation::new(
                        "Tj",
                        vec![Object::String(
                            format!("Page {}", i + 1).into_bytes(),
                            StringFormat::Literal,
                        )],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let encoded = content.encode().unwrap_or_default();
            let content_id = doc.add_object(Stream::new(Dictionary::new(), encoded));

            let page = Dictionary::from_iter(vec![
                ("Type", Object::Name(b"Page".to_vec())),
                ("Parent", Object::Reference(pages_id)),
                (
                    "MediaBox",
                    Object::Array(vec![
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(612),
                        Object::Integer(792),
                    ]),
                ),
                ("Resources", Object::Reference(resources_id)),
                ("Contents", Object::Reference(content_id)),
            ]);
            page_ids.push(doc.add_object(page));
        }

        let pages = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(i64::from(num_pages))),
            (
                "Kids",
                Object::Array(page_ids.iter().map(|id| Object::Reference(*id)).collect()),
            ),
        ]);
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buffer = Vec::new();
        // Writing to a Vec cannot fail.
        let _ = doc.save_to(&mut buffer);
        buffer
    }
}
