//! PDF rendering for consultation reports.
//!
//! Reports use the DejaVu Sans family bundled under `fonts/` unless
//! `PDF_FONT_DIR` points at another TTF family, expected as
//! `<family>-Regular.ttf`, `-Bold.ttf`, `-Italic.ttf` and `-BoldItalic.ttf`.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use consult_flow::ReportDocument;
use genpdf::elements::{Break, Paragraph};
use genpdf::fonts::{FontData, FontFamily};
use genpdf::render::Area;
use genpdf::style::{Color, Style, StyledString};
use genpdf::{Alignment, Document, Element as _, Margins, Mm, PageDecorator, Position};
use tracing::info;

use crate::config::{DEFAULT_FONT_FAMILY, PdfConfig};

pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Font sizes for PDF output (in points).
const TITLE_SIZE: u8 = 18;
const SECTION_SIZE: u8 = 13;
const BODY_SIZE: u8 = 11;
const FOOTER_SIZE: u8 = 8;

/// Page margins in mm.
const MARGIN_MM: f64 = 15.0;

/// Space reserved at the bottom of each page for the footer, in mm.
const FOOTER_HEIGHT_MM: f64 = 8.0;

const BUNDLED_REGULAR: &[u8] = include_bytes!("../fonts/DejaVuSans-Regular.ttf");
const BUNDLED_BOLD: &[u8] = include_bytes!("../fonts/DejaVuSans-Bold.ttf");
const BUNDLED_ITALIC: &[u8] = include_bytes!("../fonts/DejaVuSans-Italic.ttf");
const BUNDLED_BOLD_ITALIC: &[u8] = include_bytes!("../fonts/DejaVuSans-BoldItalic.ttf");

/// Font family used for every report, loaded once at startup
#[derive(Clone)]
pub struct ReportFonts {
    name: String,
    family: FontFamily<FontData>,
}

impl ReportFonts {
    /// Fonts named by the config, falling back to the bundled family
    pub fn load(config: &PdfConfig) -> Result<Self> {
        let Some(font_dir) = &config.font_dir else {
            return Self::bundled();
        };
        let name = config
            .font_family
            .clone()
            .unwrap_or_else(|| DEFAULT_FONT_FAMILY.to_string());

        let family = genpdf::fonts::from_files(font_dir, &name, None).with_context(|| {
            format!(
                "Failed to load font family {} from {}",
                name,
                font_dir.display()
            )
        })?;

        info!(font_family = %name, font_dir = %font_dir.display(), "Loaded report fonts");
        Ok(Self { name, family })
    }

    pub fn bundled() -> Result<Self> {
        let load = |bytes: &[u8], style: &str| {
            FontData::new(bytes.to_vec(), None)
                .with_context(|| format!("Failed to parse bundled {} font", style))
        };

        Ok(Self {
            name: DEFAULT_FONT_FAMILY.to_string(),
            family: FontFamily {
                regular: load(BUNDLED_REGULAR, "regular")?,
                bold: load(BUNDLED_BOLD, "bold")?,
                italic: load(BUNDLED_ITALIC, "italic")?,
                bold_italic: load(BUNDLED_BOLD_ITALIC, "bold italic")?,
            },
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Margins plus the report title on top and the footer at the bottom of every page
struct ReportPageDecorator {
    title: String,
    footer: String,
}

impl PageDecorator for ReportPageDecorator {
    fn decorate_page<'a>(
        &mut self,
        context: &genpdf::Context,
        mut area: Area<'a>,
        style: Style,
    ) -> Result<Area<'a>, genpdf::error::Error> {
        area.add_margins(Margins::trbl(MARGIN_MM, MARGIN_MM, MARGIN_MM, MARGIN_MM));

        let body_height = area.size().height - Mm::from(FOOTER_HEIGHT_MM);
        let mut footer_area = area.clone();
        footer_area.add_offset(Position::new(0, body_height));
        Paragraph::new(StyledString::new(
            self.footer.clone(),
            Style::new().italic().with_font_size(FOOTER_SIZE),
        ))
        .aligned(Alignment::Center)
        .render(context, footer_area, style)?;
        area.set_height(body_height);

        let header = Paragraph::new(StyledString::new(
            self.title.clone(),
            Style::new().bold().with_font_size(TITLE_SIZE),
        ))
        .aligned(Alignment::Center)
        .render(context, area.clone(), style)?;
        area.add_offset(Position::new(0, header.size.height));

        Ok(area)
    }
}

/// Render the report off the async runtime
pub async fn render_pdf(fonts: Arc<ReportFonts>, document: &ReportDocument) -> Result<Vec<u8>> {
    let document = document.clone();
    tokio::task::spawn_blocking(move || render_pdf_blocking(&fonts, &document))
        .await
        .map_err(|e| anyhow!("PDF rendering task failed: {}", e))?
}

pub fn render_pdf_blocking(fonts: &ReportFonts, report: &ReportDocument) -> Result<Vec<u8>> {
    info!(
        font_family = %fonts.name,
        summary_lines = report.summary.len(),
        transcript_lines = report.transcript.len(),
        "Generating PDF report"
    );

    let mut doc = Document::new(fonts.family.clone());
    doc.set_title(report.title.clone());
    doc.set_page_decorator(ReportPageDecorator {
        title: report.title.clone(),
        footer: report.footer.clone(),
    });

    let body = Style::new().with_font_size(BODY_SIZE);
    let section = Style::new().bold().with_font_size(SECTION_SIZE);

    doc.push(Break::new(1.0));
    if let Some(patient) = &report.patient {
        doc.push(Paragraph::new(StyledString::new(
            format!("Patient: {}", patient),
            body,
        )));
        doc.push(Break::new(0.5));
    }

    for line in &report.summary {
        doc.push(Paragraph::new(StyledString::new(line.clone(), body)));
    }

    doc.push(Break::new(1.0));
    doc.push(Paragraph::new(StyledString::new("Image findings", section)));
    doc.push(Paragraph::new(StyledString::new(
        report.vision_summary.clone(),
        body,
    )));

    doc.push(Break::new(1.0));
    doc.push(Paragraph::new(StyledString::new(
        "Consultation transcript",
        section,
    )));
    for line in &report.transcript {
        doc.push(Paragraph::new(StyledString::new(line.clone(), body)));
    }

    doc.push(Break::new(1.0));
    doc.push(Paragraph::new(StyledString::new(
        report.disclaimer.clone(),
        Style::new()
            .bold()
            .with_font_size(BODY_SIZE)
            .with_color(Color::Rgb(200, 0, 0)),
    )));

    let mut bytes = Vec::new();
    doc.render(&mut bytes)
        .context("Failed to render PDF report")?;

    info!(size = bytes.len(), "PDF report rendered");
    Ok(bytes)
}
