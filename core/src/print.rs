use std::io::BufWriter;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use printpdf::{BuiltinFont, Mm, PdfDocument};
use serde::Serialize;

use crate::models::format_quantity;
use crate::shopping::ShoppingGroup;

pub const CHECKBOX: &str = "☐";
// Builtin PDF fonts have no ballot box glyph.
const PDF_CHECKBOX: &str = "[ ]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintableRow {
    pub index: usize,
    pub name: String,
    pub amount: String,
    pub checkbox: String,
}

/// Rows for every unpurchased group, numbered from 1.
#[must_use]
pub fn printable_rows(groups: &[ShoppingGroup]) -> Vec<PrintableRow> {
    groups
        .iter()
        .filter(|g| !g.is_purchased)
        .enumerate()
        .map(|(i, g)| PrintableRow {
            index: i + 1,
            name: g.ingredient_name.clone(),
            amount: format!("{} {}", format_quantity(g.quantity), g.unit),
            checkbox: CHECKBOX.to_string(),
        })
        .collect()
}

#[must_use]
pub fn render_text(rows: &[PrintableRow], date: NaiveDate) -> String {
    let mut out = format!("Shopping list ({})\n\n", date.format("%Y-%m-%d"));
    if rows.is_empty() {
        out.push_str("Nothing to buy.\n");
        return out;
    }
    let width = rows.iter().map(|r| r.name.chars().count()).max().unwrap_or(0);
    for row in rows {
        out.push_str(&format!(
            "{} {:>2}. {:<width$}  {}\n",
            row.checkbox, row.index, row.name, row.amount
        ));
    }
    out
}

/// Text as the builtin Helvetica can draw it.
///
/// Builtin PDF fonts only cover WinAnsi (Latin-1), so anything else, such as
/// Cyrillic or CJK names, prints as `?`. The text checklist has no such limit.
#[must_use]
pub fn pdf_text(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            ' '..='~' | '\u{a0}'..='\u{ff}' => c,
            _ => '?',
        })
        .collect()
}

/// A4 PDF of the list. Long lists continue on new pages.
///
/// Names outside Latin-1 are replaced, see [`pdf_text`].
pub fn render_pdf(rows: &[PrintableRow], date: NaiveDate) -> Result<Vec<u8>> {
    let title = "Shopping list";
    let (doc, page1, layer1) = PdfDocument::new(title, Mm(210.0), Mm(297.0), "Layer 1");
    let mut layer = doc.get_page(page1).get_layer(layer1);

    let font = doc.add_builtin_font(BuiltinFont::Helvetica)?;
    let font_bold = doc.add_builtin_font(BuiltinFont::HelveticaBold)?;

    let margin_left = Mm(20.0);
    let margin_top = Mm(280.0);
    let margin_bottom = Mm(20.0);
    let line_height = Mm(7.0);
    let mut y = margin_top;

    layer.use_text(title, 18.0, margin_left, y, &font_bold);
    y = y - Mm(8.0);
    layer.use_text(date.format("%Y-%m-%d").to_string(), 10.0, margin_left, y, &font);
    y = y - Mm(12.0);

    if rows.is_empty() {
        layer.use_text("Nothing to buy.", 11.0, margin_left, y, &font);
    }

    for row in rows {
        if y < margin_bottom {
            let (page, page_layer) = doc.add_page(Mm(210.0), Mm(297.0), "Layer 1");
            layer = doc.get_page(page).get_layer(page_layer);
            y = margin_top;
        }
        layer.use_text(PDF_CHECKBOX, 11.0, margin_left, y, &font);
        layer.use_text(format!("{}.", row.index), 11.0, Mm(30.0), y, &font);
        layer.use_text(pdf_text(&row.name), 11.0, Mm(40.0), y, &font);
        layer.use_text(pdf_text(&row.amount), 11.0, Mm(140.0), y, &font);
        y = y - line_height;
    }

    let mut writer = BufWriter::new(Vec::new());
    doc.save(&mut writer).context("Failed to render PDF")?;
    writer
        .into_inner()
        .map_err(|e| e.into_error())
        .context("Failed to flush PDF")
}
