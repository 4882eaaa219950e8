use std::path::Path;

use anyhow::Context as _;
use pdf_writer::{Content, Filter, Finish, Name, Pdf, Rect, Ref};

use crate::layout::{Canvas, RectMm, mm_to_pt};

const IMAGE_NAME: Name<'static> = Name(b"Im0");

/// One image drawn on its own canvas page.
#[derive(Debug, Clone)]
pub struct Placement {
    /// Baseline RGB JPEG, embedded as a DCT-encoded image.
    pub jpeg: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
    /// Destination on the page, millimetres from the top-left corner.
    pub rect: RectMm,
}

/// Geometry of a placed page, kept for reporting and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedPage {
    pub width_px: u32,
    pub height_px: u32,
    pub rect: RectMm,
}

/// Incrementally assembled PDF: every page has a black background and one
/// image. Pages appear in the order they are added.
pub struct DocumentBuilder {
    pdf: Pdf,
    next_ref: i32,
    catalog_ref: Ref,
    page_tree_ref: Ref,
    page_refs: Vec<Ref>,
    page_width_pt: f32,
    page_height_pt: f32,
    placed: Vec<PlacedPage>,
}

impl DocumentBuilder {
    pub fn new(canvas: &Canvas) -> Self {
        let mut builder = Self {
            pdf: Pdf::new(),
            next_ref: 1,
            catalog_ref: Ref::new(1),
            page_tree_ref: Ref::new(1),
            page_refs: Vec::new(),
            page_width_pt: mm_to_pt(canvas.width_mm) as f32,
            page_height_pt: mm_to_pt(canvas.height_mm) as f32,
            placed: Vec::new(),
        };
        builder.catalog_ref = builder.alloc_ref();
        builder.page_tree_ref = builder.alloc_ref();
        builder
    }

    fn alloc_ref(&mut self) -> Ref {
        let r = Ref::new(self.next_ref);
        self.next_ref += 1;
        r
    }

    pub fn page_count(&self) -> usize {
        self.page_refs.len()
    }

    pub fn placements(&self) -> Vec<PlacedPage> {
        self.placed.clone()
    }

    pub fn add_page(&mut self, placement: Placement) {
        let page_ref = self.alloc_ref();
        let content_ref = self.alloc_ref();
        let image_ref = self.alloc_ref();

        let (page_w, page_h) = (self.page_width_pt, self.page_height_pt);
        let mut page = self.pdf.page(page_ref);
        page.media_box(Rect::new(0.0, 0.0, page_w, page_h));
        page.parent(self.page_tree_ref);
        page.contents(content_ref);
        let mut resources = page.resources();
        resources.x_objects().pair(IMAGE_NAME, image_ref);
        resources.finish();
        page.finish();

        // PDF space has its origin bottom-left.
        let x = mm_to_pt(placement.rect.x) as f32;
        let w = mm_to_pt(placement.rect.width) as f32;
        let h = mm_to_pt(placement.rect.height) as f32;
        let y = page_h - mm_to_pt(placement.rect.y) as f32 - h;

        let mut content = Content::new();
        content.set_fill_rgb(0.0, 0.0, 0.0);
        content.rect(0.0, 0.0, page_w, page_h);
        content.fill_nonzero();
        content.save_state();
        content.transform([w, 0.0, 0.0, h, x, y]);
        content.x_object(IMAGE_NAME);
        content.restore_state();
        self.pdf.stream(content_ref, &content.finish());

        let mut image = self.pdf.image_xobject(image_ref, &placement.jpeg);
        image.filter(Filter::DctDecode);
        image.width(placement.width_px as i32);
        image.height(placement.height_px as i32);
        image.color_space().device_rgb();
        image.bits_per_component(8);
        image.finish();

        self.page_refs.push(page_ref);
        self.placed.push(PlacedPage {
            width_px: placement.width_px,
            height_px: placement.height_px,
            rect: placement.rect,
        });
    }

    pub fn finish(mut self) -> Vec<u8> {
        let count = self.page_refs.len() as i32;
        self.pdf.catalog(self.catalog_ref).pages(self.page_tree_ref);
        self.pdf
            .pages(self.page_tree_ref)
            .kids(self.page_refs.iter().copied())
            .count(count);
        self.pdf.finish()
    }

    /// Serializes to `path` through a sibling `.part` file so a failed write
    /// never leaves a truncated document behind.
    pub fn write_to(self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output dir: {}", parent.display()))?;
        }

        let bytes = self.finish();
        let mut part = path.as_os_str().to_owned();
        part.push(".part");
        let part = std::path::PathBuf::from(part);
        let result = std::fs::write(&part, &bytes)
            .with_context(|| format!("write document: {}", part.display()))
            .and_then(|()| {
                std::fs::rename(&part, path)
                    .with_context(|| format!("move document into place: {}", path.display()))
            });
        if result.is_err() {
            let _ = std::fs::remove_file(&part);
        }
        result
    }
}
