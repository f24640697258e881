//! Turns downloaded report pages into text with an external OCR binary.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::Local;
use tokio::{process::Command, task::spawn_blocking};
use walkdir::WalkDir;

use crate::{info_time, warn_time, Error, Result};

pub const PAGE_PREFIX: &str = "page_";
pub const REPORT_FILE: &str = "report.txt";
const IMAGE_EXTS: [&str; 5] = ["png", "jpg", "jpeg", "tif", "tiff"];

/// Image path in, recognised text out.
///
/// `Error::OcrUnavailable` means the engine cannot run at all; any other error concerns only
/// the given image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn image_to_text(&self, image: &Path, lang: Option<&str>) -> Result<String>;
}

/// Runs `tesseract <image> [-l <lang>] stdout`.
#[derive(Debug, Clone)]
pub struct Tesseract {
    binary: String,
}

impl Tesseract {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    fn args(image: &Path, lang: Option<&str>) -> Vec<String> {
        let mut args = vec![image.display().to_string()];
        if let Some(lang) = lang {
            args.extend(["-l".to_string(), lang.to_string()]);
        }
        args.push("stdout".to_string());
        args
    }
}

impl Default for Tesseract {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

#[async_trait]
impl OcrEngine for Tesseract {
    async fn image_to_text(&self, image: &Path, lang: Option<&str>) -> Result<String> {
        let output = match Command::new(&self.binary).args(Self::args(image, lang)).output().await {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::OcrUnavailable(format!(
                    "{} not found in PATH; please install tesseract-ocr",
                    self.binary
                )))
            }
            Err(e) => return Err(e.into()),
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            let stderr = if stderr.is_empty() { output.status.to_string() } else { stderr };
            return Err(Error::OcrFailed { image: image.to_path_buf(), stderr });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn is_image(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Page images of a project directory, sorted by file name as plain strings,
/// so `page_10` comes before `page_2`.
pub async fn find_pages(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with(PAGE_PREFIX) && is_image(&name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names.into_iter().map(|name| dir.join(name)).collect())
}

/// OCRs every page of `dir` into one text file, each page under its own banner.
///
/// A page the engine fails on is written inline as an error marker. Returns the number of pages.
pub async fn ocr_dir(
    engine: &dyn OcrEngine,
    dir: &Path,
    out_path: &Path,
    header: Option<&str>,
    lang: Option<&str>,
) -> Result<usize> {
    let start_time = Local::now();
    let pages = find_pages(dir).await?;
    if pages.is_empty() {
        return Err(Error::NoPages(dir.to_path_buf()));
    }

    let mut combined = String::new();
    if let Some(header) = header {
        combined.push_str(header);
    }
    for page in &pages {
        let name = page.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        combined.push_str(&format!("\n\n----- PAGE: {name} -----\n\n"));
        match engine.image_to_text(page, lang).await {
            Ok(text) => combined.push_str(&text),
            Err(e @ Error::OcrUnavailable(_)) => return Err(e),
            Err(Error::OcrFailed { stderr, .. }) => {
                combined.push_str(&format!("[TESSERACT_ERROR on {}]: {stderr}\n", page.display()));
            }
            Err(e) => {
                combined.push_str(&format!("[TESSERACT_ERROR on {}]: {e}\n", page.display()));
            }
        }
    }

    tokio::fs::write(out_path, combined).await?;
    info_time!(start_time, "OCR {} pages into {}", pages.len(), out_path.display());
    Ok(pages.len())
}

fn has_page_images(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.filter_map(|entry| entry.ok()).any(|entry| {
        let name = entry.file_name().to_string_lossy().to_lowercase();
        name.starts_with(PAGE_PREFIX) && is_image(&name)
    })
}

/// Directories under `root` holding page images: immediate children, or the whole tree
/// (root included) when `recursive`.
///
/// The directory walk is blocking, so it runs on the blocking thread pool.
pub async fn find_project_dirs(root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let root = root.to_path_buf();
    spawn_blocking(move || scan_project_dirs(&root, recursive)).await?
}

fn scan_project_dirs(root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = if recursive {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .map(|entry| entry.into_path())
            .filter(|path| has_page_images(path))
            .collect()
    } else {
        fs::read_dir(root)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir() && has_page_images(path))
            .collect()
    };
    dirs.sort();
    Ok(dirs)
}

pub(crate) async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|meta| meta.is_dir())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OcrBatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// OCRs every project directory under `root` into its `report.txt`.
///
/// Directories that already have a report are skipped unless `force`. A missing OCR binary
/// aborts the run; other failures are counted and the run moves on.
pub async fn ocr_batch(
    engine: &dyn OcrEngine,
    root: &Path,
    recursive: bool,
    force: bool,
    lang: Option<&str>,
) -> Result<OcrBatchSummary> {
    if !is_dir(root).await {
        return Err(Error::MissingDir(root.to_path_buf()));
    }
    let projects = find_project_dirs(root, recursive).await?;
    info_time!("Found {} project(s) to consider under {}", projects.len(), root.display());

    let mut summary = OcrBatchSummary::default();
    for dir in projects {
        let out_path = dir.join(REPORT_FILE);
        if !force && tokio::fs::try_exists(&out_path).await? {
            info_time!("Skipping (exists): {}", dir.display());
            summary.skipped += 1;
            continue;
        }
        match ocr_dir(engine, &dir, &out_path, None, lang).await {
            Ok(_) => summary.processed += 1,
            Err(e @ Error::OcrUnavailable(_)) => return Err(e),
            Err(e) => {
                warn_time!("OCR failed for {}: {e}", dir.display());
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}
