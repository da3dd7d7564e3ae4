//! Single-page document export.
//!
//! The client rasterizes the on-screen report to an image; we wrap it in a one-page PDF whose
//! width is A4 and whose height follows the image aspect ratio. The image is decoded and
//! re-encoded as baseline RGB JPEG so the page can embed it with `/DCTDecode`.

use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use serde::Serialize;

use crate::error::ExamError;

/// A4 width in PDF points.
const PAGE_WIDTH_PT: f64 = 595.28;
const JPEG_QUALITY: u8 = 90;

/// Document export availability for one session.
#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExportGate {
  /// No report rendered yet.
  #[default]
  Unavailable,
  Ready,
  /// An export is running; another one is refused until it finishes.
  Exporting,
}

impl ExportGate {
  pub fn begin(&mut self) -> Result<(), ExamError> {
    match self {
      ExportGate::Ready => {
        *self = ExportGate::Exporting;
        Ok(())
      }
      ExportGate::Exporting => Err(ExamError::Conflict("An export is already in progress.".into())),
      ExportGate::Unavailable => Err(ExamError::Conflict("The report is not ready for export yet.".into())),
    }
  }

  /// Back to ready, unless the session was reset in the meantime.
  pub fn finish(&mut self) {
    if *self == ExportGate::Exporting {
      *self = ExportGate::Ready;
    }
  }
}

/// Build a one-page PDF around the uploaded image (JPEG or PNG).
pub fn single_page_pdf(bytes: &[u8]) -> Result<Vec<u8>, ExamError> {
  let decoded =
    image::load_from_memory(bytes).map_err(|e| ExamError::Export(format!("not a usable image ({e})")))?;
  let (width, height) = decoded.dimensions();
  if width == 0 || height == 0 {
    return Err(ExamError::Export("not a usable image (zero dimensions)".into()));
  }
  let mut jpeg = Vec::new();
  DynamicImage::ImageRgb8(decoded.to_rgb8())
    .write_to(&mut Cursor::new(&mut jpeg), ImageOutputFormat::Jpeg(JPEG_QUALITY))
    .map_err(|e| ExamError::Export(format!("failed to encode page image ({e})")))?;

  let page_w = PAGE_WIDTH_PT;
  let page_h = page_w * f64::from(height) / f64::from(width);

  let mut out: Vec<u8> = Vec::with_capacity(jpeg.len() + 1024);
  let mut offsets: Vec<usize> = Vec::new();
  out.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");

  let mut object = |out: &mut Vec<u8>, body: &[u8]| {
    offsets.push(out.len());
    let n = offsets.len();
    out.extend_from_slice(format!("{n} 0 obj\n").as_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(b"\nendobj\n");
  };

  object(&mut out, b"<< /Type /Catalog /Pages 2 0 R >>");
  object(&mut out, b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
  object(
    &mut out,
    format!(
      "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {page_w:.2} {page_h:.2}] \
       /Resources << /XObject << /Im0 4 0 R >> >> /Contents 5 0 R >>"
    )
    .as_bytes(),
  );

  let mut xobject = format!(
    "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB \
     /BitsPerComponent 8 /Filter /DCTDecode /Length {} >>\nstream\n",
    width,
    height,
    jpeg.len()
  )
  .into_bytes();
  xobject.extend_from_slice(&jpeg);
  xobject.extend_from_slice(b"\nendstream");
  object(&mut out, &xobject);

  let content = format!("q {page_w:.2} 0 0 {page_h:.2} 0 0 cm /Im0 Do Q");
  object(
    &mut out,
    format!("<< /Length {} >>\nstream\n{content}\nendstream", content.len()).as_bytes(),
  );

  let xref_at = out.len();
  out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", offsets.len() + 1).as_bytes());
  for off in &offsets {
    out.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
  }
  out.extend_from_slice(
    format!("trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n", offsets.len() + 1).as_bytes(),
  );
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::sample_image;

  #[test]
  fn rejects_bytes_that_are_not_an_image() {
    assert!(matches!(single_page_pdf(b"\x89PNG\r\n"), Err(ExamError::Export(_))));
    assert!(matches!(single_page_pdf(&[0xFF, 0xD8, 0xFF, 0xD9]), Err(ExamError::Export(_))));
  }

  #[test]
  fn pdf_has_one_page_scaled_to_aspect_ratio() {
    let pdf = single_page_pdf(&sample_image(100, 200, ImageOutputFormat::Jpeg(80)).unwrap()).unwrap();
    let text = String::from_utf8_lossy(&pdf);
    assert!(text.starts_with("%PDF-1.4"));
    assert!(text.contains("/Count 1"));
    assert!(text.contains("/MediaBox [0 0 595.28 1190.56]"));
    assert!(text.contains("/Width 100 /Height 200 /ColorSpace /DeviceRGB"));
    assert!(text.contains("/Filter /DCTDecode"));
    assert!(text.trim_end().ends_with("%%EOF"));
  }

  #[test]
  fn png_uploads_are_reencoded_as_jpeg() {
    let pdf = single_page_pdf(&sample_image(40, 30, ImageOutputFormat::Png).unwrap()).unwrap();
    let text = String::from_utf8_lossy(&pdf);
    assert!(text.contains("/Width 40 /Height 30"));
    assert!(text.contains("/Filter /DCTDecode"));
    // JPEG start-of-image marker inside the stream.
    let stream_at = pdf.windows(7).position(|w| w == b"stream\n").unwrap();
    assert_eq!(&pdf[stream_at + 7..stream_at + 9], &[0xFF, 0xD8]);
  }

  #[test]
  fn gate_refuses_concurrent_and_early_exports() {
    let mut gate = ExportGate::default();
    assert!(gate.begin().is_err());
    gate = ExportGate::Ready;
    gate.begin().unwrap();
    assert_eq!(gate, ExportGate::Exporting);
    assert!(gate.begin().is_err());
    gate.finish();
    assert_eq!(gate, ExportGate::Ready);
  }
}
