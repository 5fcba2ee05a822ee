//! Fixed-layout EPUB generation for pre-rendered comic pages.
//!
//! Pages arrive already transformed to device dimensions, so each one maps
//! onto a single XHTML document with a matching viewport. The package carries
//! the fixed-layout metadata comic readers key off (original-resolution,
//! zero-gutter/zero-margin, right-to-left page progression).

use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use epub_builder::{EpubBuilder, EpubContent, EpubVersion, MetadataOpf, ZipLibrary};
use lazy_static::lazy_static;
use log::info;
use regex::Regex;

use crate::error::{Error, Result};
use crate::types::{PackageMetadata, ProcessedPage};

const PAGE_TEMPLATE: &str = include_str!("../../templates/Page.xhtml");

lazy_static! {
    /// Placeholder token that survived substitution, meaning the template and
    /// the renderer disagree about the placeholder set.
    static ref LEFTOVER_PLACEHOLDER: Regex = Regex::new(r"%[a-z]+%").unwrap();
}

/// Substitutes the page template's placeholders, failing loudly when the
/// template carries one the renderer does not know.
fn render_page_xhtml(title: &str, src: &str, width: u32, height: u32) -> Result<String> {
    let xhtml = PAGE_TEMPLATE
        .replace("%title%", title)
        .replace("%src%", src)
        .replace("%width%", &width.to_string())
        .replace("%height%", &height.to_string());

    if let Some(m) = LEFTOVER_PLACEHOLDER.find(&xhtml) {
        return Err(Error::Other(format!(
            "Page template has unknown placeholder: {}",
            m.as_str()
        )));
    }
    Ok(xhtml)
}

/// Builder for one fixed-layout EPUB package.
pub struct FixedLayoutEpub {
    epub: EpubBuilder<ZipLibrary>,
    output_path: PathBuf,
    filename_base: String,
    page_width: u32,
    page_height: u32,
    page_count: usize,
}

impl FixedLayoutEpub {
    pub fn new(
        output_dir: &Path,
        filename_base: &str,
        page_width: u32,
        page_height: u32,
    ) -> Result<Self> {
        let mut epub = EpubBuilder::new(ZipLibrary::new()?)?;
        epub.epub_version(EpubVersion::V30);
        epub.stylesheet(include_bytes!("../../templates/FixedLayout.css").as_slice())?;

        if !output_dir.exists() {
            std::fs::create_dir_all(output_dir)?;
        }

        Ok(Self {
            epub,
            output_path: output_dir.to_path_buf(),
            filename_base: filename_base.to_string(),
            page_width,
            page_height,
            page_count: 0,
        })
    }

    /// Writes the package metadata and the fixed-layout properties.
    pub fn set_metadata(&mut self, title: &str, metadata: &PackageMetadata) -> Result<&mut Self> {
        self.epub.metadata("title", title)?;
        if let Some(author) = &metadata.author {
            self.epub.metadata("author", author)?;
        }
        if let Some(description) = &metadata.description {
            self.epub.metadata("description", description)?;
        }
        for tag in &metadata.tags {
            self.epub.metadata("subject", tag)?;
        }
        self.epub.add_language("en");

        // Fixed-layout comic properties, matching what dedicated comic
        // readers and Kindle ingestion expect.
        for (name, content) in [
            ("fixed-layout", "true".to_string()),
            ("book-type", "comic".to_string()),
            ("zero-gutter", "true".to_string()),
            ("zero-margin", "true".to_string()),
            (
                "original-resolution",
                format!("{}x{}", self.page_width, self.page_height),
            ),
            ("primary-writing-mode", "horizontal-rl".to_string()),
        ] {
            self.epub.add_metadata_opf(Box::new(MetadataOpf {
                name: name.to_string(),
                content,
            }));
        }

        if let Some(series) = &metadata.series {
            self.epub.add_metadata_opf(Box::new(MetadataOpf {
                name: "calibre:series".to_string(),
                content: series.clone(),
            }));
            self.epub.add_metadata_opf(Box::new(MetadataOpf {
                name: "calibre:series_index".to_string(),
                content: metadata.series_index.to_string(),
            }));
        }

        Ok(self)
    }

    /// Installs the cover image from already-encoded JPEG bytes.
    pub fn set_cover(&mut self, cover_bytes: &[u8]) -> Result<&mut Self> {
        self.epub
            .add_cover_image("images/cover.jpg", Cursor::new(cover_bytes), "image/jpeg")?;
        Ok(self)
    }

    /// Appends one transformed page as an image resource plus its XHTML
    /// wrapper. Pages must be added in reading order.
    pub fn add_page(&mut self, page: &ProcessedPage) -> Result<&mut Self> {
        self.page_count += 1;
        let page_number = self.page_count;

        let image_name = format!("images/page_{:03}.jpg", page_number);
        let page_title = format!("Page {}", page_number);
        let xhtml = render_page_xhtml(&page_title, &image_name, self.page_width, self.page_height)?;

        self.epub.add_resource(
            &image_name,
            Cursor::new(page.encoded_bytes.as_slice()),
            "image/jpeg",
        )?;
        self.epub.add_content(
            EpubContent::new(
                format!("page_{:03}.xhtml", page_number),
                xhtml.as_bytes(),
            )
            .title(&page_title),
        )?;

        Ok(self)
    }

    /// Finalizes the package and writes it to the output directory.
    pub fn save(self) -> Result<PathBuf> {
        let output_file = self
            .output_path
            .join(format!("{}.epub", self.filename_base));
        let file = File::create(&output_file)?;
        self.epub.generate(file)?;
        info!(
            "Wrote EPUB {} ({} pages)",
            output_file.display(),
            self.page_count
        );
        Ok(output_file)
    }
}
