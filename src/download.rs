use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::fs;

use crate::{client::PortalClient, info_time, warn_time, Result};

pub const DEFAULT_MAX_PAGES: u32 = 50;

/// Downloads the report pages of `project_id` into `out_dir` as `page_NNN.<ext>`.
///
/// Pages are resolved one at a time starting from 1. The sequence ends at the first page
/// that does not resolve, the first 404, or the first page that still fails after all
/// retries. Pages already on disk are listed but not fetched again unless `force` is set.
/// Errors while resolving a page URL are returned to the caller.
pub async fn download_report(
    client: &PortalClient,
    project_id: &str,
    out_dir: &Path,
    max_pages: u32,
    force: bool,
) -> Result<Vec<PathBuf>> {
    let start_time = Local::now();
    fs::create_dir_all(out_dir).await?;
    let mut downloaded = Vec::new();

    for index in 1..=max_pages {
        let Some(url) = client.report_page_url(project_id, index).await? else {
            break;
        };

        if !force {
            if let Some(existing) = existing_page(out_dir, index).await? {
                downloaded.push(existing);
                continue;
            }
        }

        let label = format!("{project_id} page {index}");
        let fetched = client
            .retry()
            .run_while(&label, || client.fetch_image(project_id, &url), |e| !e.is_not_found())
            .await;
        let res = match fetched {
            Ok(res) => res,
            Err(e) if e.is_not_found() => {
                info_time!("{label}: not found, no more pages");
                break;
            }
            Err(e) => {
                warn_time!("{label}: giving up ({e}), skipping the remaining pages");
                break;
            }
        };

        let ext = image_extension(res.content_type.as_deref());
        let path = out_dir.join(page_file_name(index, ext));
        fs::write(&path, &res.body).await?;
        downloaded.push(path);
    }

    info_time!(start_time, "{project_id}: {} pages", downloaded.len());
    Ok(downloaded)
}

/// `png` when the content type says so, `jpg` otherwise.
pub fn image_extension(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some(ct) if ct.to_ascii_lowercase().contains("png") => "png",
        _ => "jpg",
    }
}

pub fn page_file_name(index: u32, ext: &str) -> String {
    format!("page_{index:03}.{ext}")
}

async fn existing_page(out_dir: &Path, index: u32) -> Result<Option<PathBuf>> {
    for ext in ["jpg", "png"] {
        let path = out_dir.join(page_file_name(index, ext));
        if fs::try_exists(&path).await? {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use serde_json::json;

    use super::*;
    use crate::{
        client::tests::client_with,
        request::{
            fake::{ok_image, ok_json, status, FakeTransport},
            Body, PortalRequest, PortalResponse,
        },
        Error,
    };

    const LOOKUP: &str = "completeProjectReport";

    fn page_index(req: &PortalRequest) -> u32 {
        let Body::Form(form) = &req.body else { panic!("expected form body") };
        form.iter().find(|(k, _)| k == "index").unwrap().1.parse().unwrap()
    }

    /// Resolves pages `1..=pages`, answering image requests with `image`.
    fn server(
        pages: u32,
        image: impl Fn(&PortalRequest) -> Result<PortalResponse> + Send + Sync + 'static,
    ) -> Arc<FakeTransport> {
        Arc::new(FakeTransport::new(move |req| {
            if req.url.contains(LOOKUP) {
                let index = page_index(req);
                if index <= pages {
                    ok_json(json!({"code": 200, "data": {"url": format!("/img/{index}.png")}}))
                } else {
                    ok_json(json!({"code": 200, "data": {}}))
                }
            } else {
                image(req)
            }
        }))
    }

    #[test]
    fn extension_from_content_type() {
        assert_eq!(image_extension(Some("image/png")), "png");
        assert_eq!(image_extension(Some("image/PNG")), "png");
        assert_eq!(image_extension(Some("image/jpeg")), "jpg");
        assert_eq!(image_extension(None), "jpg");
        assert_eq!(page_file_name(7, "png"), "page_007.png");
        assert_eq!(page_file_name(123, "jpg"), "page_123.jpg");
    }

    #[tokio::test]
    async fn one_page_then_force_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("P123");
        let body = Arc::new(std::sync::Mutex::new(b"PNGDATA".to_vec()));
        let served = body.clone();
        let fake = server(1, move |_| ok_image("image/png", &served.lock().unwrap()));
        let client = client_with(fake.clone());

        let files = download_report(&client, "P123", &out, 5, false).await.unwrap();
        let expected = out.join("page_001.png");
        assert_eq!(files, vec![expected.clone()]);
        assert_eq!(std::fs::read(&expected).unwrap(), b"PNGDATA");
        assert_eq!(fake.count("/img/"), 1);

        *body.lock().unwrap() = b"NEWDATA".to_vec();
        let files = download_report(&client, "P123", &out, 5, false).await.unwrap();
        assert_eq!(files, vec![expected.clone()]);
        assert_eq!(std::fs::read(&expected).unwrap(), b"PNGDATA");
        assert_eq!(fake.count("/img/"), 1);

        let files = download_report(&client, "P123", &out, 5, true).await.unwrap();
        assert_eq!(files, vec![expected.clone()]);
        assert_eq!(std::fs::read(&expected).unwrap(), b"NEWDATA");
        assert_eq!(fake.count("/img/"), 2);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let attempts = AtomicU32::new(0);
        let fake = server(1, move |_| {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::Transport("connection reset".into()))
            } else {
                ok_image("image/jpeg", b"JPGDATA")
            }
        });
        let client = client_with(fake.clone());
        let files = download_report(&client, "P456", dir.path(), 3, true).await.unwrap();
        assert_eq!(files, vec![dir.path().join("page_001.jpg")]);
        assert_eq!(fake.count("/img/"), 2);
    }

    #[tokio::test]
    async fn not_found_stops_without_retrying() {
        let dir = tempfile::tempdir().unwrap();
        let fake = server(3, |_| status(404));
        let client = client_with(fake.clone());
        let files = download_report(&client, "P1", dir.path(), 10, false).await.unwrap();
        assert!(files.is_empty());
        assert_eq!(fake.count("/img/"), 1);
        assert_eq!(fake.count(LOOKUP), 1);
    }

    #[tokio::test]
    async fn exhausted_page_halts_the_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let fake = server(3, |req| {
            if req.url.ends_with("/2.png") {
                status(503)
            } else {
                ok_image("image/png", b"X")
            }
        });
        let client = client_with(fake.clone());
        let files = download_report(&client, "P1", dir.path(), 10, false).await.unwrap();
        assert_eq!(files, vec![dir.path().join("page_001.png")]);
        // One fetch for page 1, three attempts for page 2, page 3 never resolved.
        assert_eq!(fake.count("/img/"), 4);
        assert_eq!(fake.count(LOOKUP), 2);
    }

    #[tokio::test]
    async fn max_pages_bounds_the_walk() {
        let dir = tempfile::tempdir().unwrap();
        let fake = server(10, |_| ok_image("image/png", b"X"));
        let client = client_with(fake.clone());
        let files = download_report(&client, "P1", dir.path(), 3, false).await.unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(fake.count(LOOKUP), 3);
    }

    #[tokio::test]
    async fn lookup_failure_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeTransport::new(|_| status(500)));
        let client = client_with(fake);
        let err = download_report(&client, "P1", dir.path(), 3, false).await.unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 500, .. }));
    }
}
