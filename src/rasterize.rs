//! PDF page rasterization and text extraction, via Poppler's CLI tools.
//!
//! Pages are rasterized with `pdftocairo -png` into a scratch directory,
//! then re-encoded as JPEG to keep per-page payloads small enough for
//! vision input. Page counting uses `pdfinfo`, heading text `pdftotext`.
//! Page indices are zero-based everywhere in this crate; the CLI tools
//! take one-based, inclusive ranges.

use std::{
    collections::BTreeMap,
    io::Cursor,
    path::{Path, PathBuf},
    process::Output,
    sync::LazyLock,
};

use image::ImageFormat;
use regex::Regex;
use tokio::process::Command;

use crate::prelude::*;

/// Poppler tools report some recoverable conditions on stderr with an
/// "error" prefix and still exit 0. Broken xref tables get reconstructed,
/// so they only rate a warning.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// Check a finished command for failure, including "exit 0 but printed
/// errors" failures when `check_stderr` is set.
fn check_for_command_failure(
    command_name: &str,
    output: &Output,
    check_stderr: bool,
) -> Result<()> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if output.status.success() {
        if check_stderr && stderr.lines().any(is_error_line) {
            return Err(anyhow!("{command_name} printed error output:\n{stderr}"));
        }
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{command_name} failed with exit code {exit_code} and error output:\n{stderr}"
        ))
    } else {
        Err(anyhow!(
            "{command_name} failed with error output:\n{stderr}"
        ))
    }
}

/// Write the uploaded bytes into a scratch directory, checking first that
/// they really look like a PDF.
async fn write_pdf_to_scratch(pdf_bytes: &[u8]) -> Result<(tempfile::TempDir, PathBuf), PipelineError> {
    let mime_type = infer::get(pdf_bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or("application/octet-stream");
    if mime_type != "application/pdf" {
        return Err(PipelineError::DocumentFormat(format!(
            "expected application/pdf, detected {mime_type}"
        )));
    }
    let tmpdir = tempfile::TempDir::with_prefix("pages")
        .context("failed to create scratch directory")?;
    let pdf_path = tmpdir.path().join("document.pdf");
    tokio::fs::write(&pdf_path, pdf_bytes)
        .await
        .with_context(|| format!("failed to write {:?}", pdf_path.display()))?;
    Ok((tmpdir, pdf_path))
}

/// Count the pages of a PDF already on disk.
async fn pdf_page_count(path: &Path) -> Result<usize, PipelineError> {
    let output = Command::new("pdfinfo")
        .arg(path)
        .output()
        .await
        .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
    // pdfinfo failing is our signal that the bytes are not a readable PDF.
    if let Err(err) = check_for_command_failure("pdfinfo", &output, false) {
        return Err(PipelineError::DocumentFormat(err.to_string()));
    }

    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    let mut properties = BTreeMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key.to_string(), value.to_string());
    }
    let page_count = properties
        .get("Pages")
        .ok_or_else(|| {
            PipelineError::DocumentFormat(
                "no page count in pdfinfo output".to_string(),
            )
        })?
        .parse::<usize>()
        .context("failed to parse page count from pdfinfo output")?;
    Ok(page_count)
}

/// Re-encode one rasterized PNG page as JPEG.
fn png_to_jpeg(png_bytes: &[u8]) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory_with_format(png_bytes, ImageFormat::Png)
        .context("failed to decode rasterized page")?;
    // JPEG has no alpha channel.
    let decoded = image::DynamicImage::ImageRgb8(decoded.to_rgb8());
    let mut jpeg_bytes = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut jpeg_bytes), ImageFormat::Jpeg)
        .context("failed to encode page as JPEG")?;
    Ok(jpeg_bytes)
}

/// Rasterizes uploaded PDFs into per-page JPEG images.
#[derive(Debug, Clone)]
pub struct PageRasterizer {
    dpi: u32,
}

impl PageRasterizer {
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }

    /// The total number of pages in the document.
    pub async fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, PipelineError> {
        let (_tmpdir, pdf_path) = write_pdf_to_scratch(pdf_bytes).await?;
        pdf_page_count(&pdf_path).await
    }

    /// Rasterize pages `[0, min(max_pages, total))`, returning
    /// `(page_index, jpeg_bytes)` pairs in page order. All-or-nothing: any
    /// page failing fails the whole call.
    #[instrument(skip_all, fields(max_pages))]
    pub async fn rasterize(
        &self,
        pdf_bytes: &[u8],
        max_pages: usize,
    ) -> Result<Vec<(usize, Vec<u8>)>, PipelineError> {
        let (tmpdir, pdf_path) = write_pdf_to_scratch(pdf_bytes).await?;
        let total_pages = pdf_page_count(&pdf_path).await?;
        let page_count = total_pages.min(max_pages);
        if total_pages > max_pages {
            warn!(total_pages, max_pages, "rasterizing a truncated page range");
        }
        if page_count == 0 {
            return Ok(Vec::new());
        }
        let pages = self
            .rasterize_range(&pdf_path, tmpdir.path(), 1, page_count)
            .await?;
        Ok(pages.into_iter().enumerate().collect())
    }

    /// Rasterize a single zero-based page.
    pub async fn rasterize_page(
        &self,
        pdf_bytes: &[u8],
        page: usize,
    ) -> Result<Vec<u8>, PipelineError> {
        let (tmpdir, pdf_path) = write_pdf_to_scratch(pdf_bytes).await?;
        let total = pdf_page_count(&pdf_path).await?;
        if page >= total {
            return Err(PipelineError::InvalidPage { page, total });
        }
        let mut pages = self
            .rasterize_range(&pdf_path, tmpdir.path(), page + 1, page + 1)
            .await?;
        pages
            .pop()
            .ok_or_else(|| anyhow!("pdftocairo produced no output for page {page}").into())
    }

    /// The first `max_chars` characters of the document's text, from
    /// `pdftotext`, truncated on a character boundary.
    #[instrument(skip_all, fields(max_chars))]
    pub async fn heading_text(
        &self,
        pdf_bytes: &[u8],
        max_chars: usize,
    ) -> Result<String, PipelineError> {
        let (_tmpdir, pdf_path) = write_pdf_to_scratch(pdf_bytes).await?;
        let output = Command::new("pdftotext")
            .arg(&pdf_path)
            .arg("-") // stdout
            .output()
            .await
            .context("failed to run pdftotext")?;
        check_for_command_failure("pdftotext", &output, true)?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.chars().take(max_chars).collect())
    }

    /// Run `pdftocairo` over an inclusive one-based page range and return
    /// the JPEG-encoded pages in order.
    async fn rasterize_range(
        &self,
        pdf_path: &Path,
        scratch: &Path,
        first: usize,
        last: usize,
    ) -> Result<Vec<Vec<u8>>, PipelineError> {
        let out_prefix = scratch.join("page");
        let output = Command::new("pdftocairo")
            .arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-f")
            .arg(first.to_string())
            .arg("-l")
            .arg(last.to_string())
            .arg(pdf_path)
            .arg(&out_prefix)
            .output()
            .await
            .context("failed to run pdftocairo")?;
        check_for_command_failure("pdftocairo", &output, true)?;

        // pdftocairo names outputs page-1.png, page-2.png, ... with enough
        // zero padding to sort lexically.
        let mut page_paths = Vec::new();
        let mut entries = tokio::fs::read_dir(scratch)
            .await
            .context("failed to read scratch directory")?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("failed to read scratch directory entry")?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "png") {
                page_paths.push(path);
            }
        }
        page_paths.sort();

        let expected = last - first + 1;
        if page_paths.len() != expected {
            return Err(anyhow!(
                "pdftocairo produced {} pages, expected {expected}",
                page_paths.len()
            )
            .into());
        }

        let mut pages = Vec::with_capacity(page_paths.len());
        for path in page_paths {
            let png_bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {:?}", path.display()))?;
            pages.push(png_to_jpeg(&png_bytes)?);
        }
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_error_line_works() {
        assert!(is_error_line("error: something went wrong"));
        assert!(is_error_line("ERROR: something went wrong"));
        assert!(!is_error_line("Warning: something is odd"));
        assert!(!is_error_line(
            "Internal Error: xref num 1234 not found but needed, document has changes, reconstruct aborted"
        ));
    }

    #[tokio::test]
    async fn non_pdf_bytes_are_a_document_format_error() {
        let rasterizer = PageRasterizer::new(150);
        let err = rasterizer.page_count(b"this is not a PDF").await.unwrap_err();
        assert!(matches!(err, PipelineError::DocumentFormat(_)));
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn rasterize_respects_max_pages() -> anyhow::Result<()> {
        let pdf_bytes = tokio::fs::read("tests/fixtures/two_pages.pdf").await?;
        let rasterizer = PageRasterizer::new(150);
        assert_eq!(rasterizer.page_count(&pdf_bytes).await?, 2);

        let pages = rasterizer.rasterize(&pdf_bytes, 1).await?;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].0, 0);
        // JPEG magic bytes.
        assert_eq!(&pages[0].1[0..2], &[0xFF, 0xD8]);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn rasterize_page_rejects_out_of_range_pages() -> anyhow::Result<()> {
        let pdf_bytes = tokio::fs::read("tests/fixtures/two_pages.pdf").await?;
        let rasterizer = PageRasterizer::new(150);
        let err = rasterizer.rasterize_page(&pdf_bytes, 2).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidPage { page: 2, total: 2 }
        ));
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn heading_text_truncates_on_char_boundaries() -> anyhow::Result<()> {
        let pdf_bytes = tokio::fs::read("tests/fixtures/two_pages.pdf").await?;
        let rasterizer = PageRasterizer::new(150);
        let text = rasterizer.heading_text(&pdf_bytes, 5).await?;
        assert_eq!(text.chars().count(), 5);
        Ok(())
    }
}
