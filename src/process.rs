use std::{
    collections::HashSet,
    path::{Component, Path, PathBuf},
};

use chrono::Local;
use serde::Serialize;
use serde_json::json;
use tokio::{
    fs::{self, File},
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
};

use crate::{
    client::PortalClient,
    download::{download_report, DEFAULT_MAX_PAGES},
    info_time,
    models::{ProjectRow, SearchFilters, SearchQuery},
    paginate::PageWalker,
    warn_time, Result,
};

pub const RESULTS_FILE: &str = "search_results.jsonl";

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub keyword: String,
    pub filters: SearchFilters,
    pub out_dir: PathBuf,
    pub page_size: u32,
    pub force: bool,
    /// Defaults to `<out_dir>/search_results.jsonl`.
    pub jsonl_path: Option<PathBuf>,
    pub max_pages: u32,
}

impl BatchOptions {
    pub fn new(keyword: impl Into<String>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            keyword: keyword.into(),
            filters: SearchFilters::default(),
            out_dir: out_dir.into(),
            page_size: 10,
            force: false,
            jsonl_path: None,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn jsonl_path(&self) -> PathBuf {
        self.jsonl_path
            .clone()
            .unwrap_or_else(|| self.out_dir.join(RESULTS_FILE))
    }
}

/// Runs the whole batch: every search row goes to the results file, then every project in it
/// gets its own directory with `info.json`, page images and `files.json` or `errors.json`.
///
/// A failing search page aborts the batch. A failing project never does; its failure is
/// written into its directory and its id is still returned.
pub async fn process_batch(client: &PortalClient, opts: &BatchOptions) -> Result<Vec<String>> {
    let start_time = Local::now();
    fs::create_dir_all(&opts.out_dir).await?;
    let jsonl_path = opts.jsonl_path();

    let rows = write_search_results(client, opts, &jsonl_path).await?;
    info_time!(start_time, "Wrote {rows} rows to {}", jsonl_path.display());

    let processed = process_projects(client, opts, &jsonl_path).await?;
    info_time!(start_time, "Finished batch: {} projects", processed.len());
    Ok(processed)
}

/// Drains the search into a fresh results file, one `{"project_id", "raw"}` object per line.
async fn write_search_results(
    client: &PortalClient,
    opts: &BatchOptions,
    jsonl_path: &Path,
) -> Result<usize> {
    let query = SearchQuery::new(&opts.keyword, 0, opts.page_size).with_filters(opts.filters.clone());
    let mut walker = PageWalker::new(client, query);
    let mut file = BufWriter::new(File::create(jsonl_path).await?);
    let mut count = 0;

    while let Some(rows) = walker.next_page().await? {
        for raw in rows {
            let row = ProjectRow::from_raw(raw);
            if row.project_id.is_none() {
                warn_time!("Row {count} has no project id");
            }
            let mut line = serde_json::to_vec(&row)?;
            line.push(b'\n');
            file.write_all(&line).await?;
            count += 1;
        }
    }
    file.flush().await?;
    Ok(count)
}

async fn process_projects(
    client: &PortalClient,
    opts: &BatchOptions,
    jsonl_path: &Path,
) -> Result<Vec<String>> {
    let mut lines = BufReader::new(File::open(jsonl_path).await?).lines();
    let mut seen = HashSet::new();
    let mut processed = Vec::new();

    while let Some(line) = lines.next_line().await? {
        let Ok(row) = serde_json::from_str::<ProjectRow>(&line) else {
            continue;
        };
        let Some(project_id) = row.project_id else {
            continue;
        };
        if !is_plain_dir_name(&project_id) {
            warn_time!("Skipping project id {project_id:?}: not a plain directory name");
            continue;
        }
        if !seen.insert(project_id.clone()) {
            continue;
        }

        let project_dir = opts.out_dir.join(&project_id);
        if let Err(e) = process_project(client, &project_id, &project_dir, opts).await {
            warn_time!("{project_id}: {e}");
        }
        processed.push(project_id);
    }
    Ok(processed)
}

async fn process_project(
    client: &PortalClient,
    project_id: &str,
    project_dir: &Path,
    opts: &BatchOptions,
) -> Result<()> {
    let start_time = Local::now();
    fs::create_dir_all(project_dir).await?;

    let label = format!("{project_id} info");
    let info = match client.retry().run(&label, || client.project_info(project_id)).await {
        Ok(info) => info,
        Err(e) => {
            warn_time!("{label}: giving up ({e})");
            json!({ "error": format!("failed to fetch info: {e}") })
        }
    };
    write_json(&project_dir.join("info.json"), &info).await?;

    match download_report(client, project_id, project_dir, opts.max_pages, opts.force).await {
        Ok(files) => {
            let files: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
            write_json(&project_dir.join("files.json"), &files).await?;
        }
        Err(e) => {
            warn_time!("{project_id}: download failed ({e})");
            let errors = json!({ "download_error": e.to_string() });
            write_json(&project_dir.join("errors.json"), &errors).await?;
        }
    }
    info_time!(start_time, "Processed project {project_id}");
    Ok(())
}

/// Ids come from the server and become directory names under `out_dir`, so they must be a
/// single normal path component.
fn is_plain_dir_name(project_id: &str) -> bool {
    let mut components = Path::new(project_id).components();
    matches!((components.next(), components.next()), (Some(Component::Normal(_)), None))
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};

    use super::*;
    use crate::{
        client::tests::client_with,
        request::{
            fake::{ok_image, ok_json, status, FakeTransport},
            PortalRequest, PortalResponse,
        },
    };

    /// Search returns `rows` on page 0; info fails for `P2`; every project has one report page.
    fn portal(rows: Value) -> Arc<FakeTransport> {
        Arc::new(FakeTransport::new(move |req: &PortalRequest| -> crate::Result<PortalResponse> {
            let url = req.url.as_str();
            if url.contains("completionQueryResultsData") {
                let total = rows.as_array().map_or(0, Vec::len);
                ok_json(json!({"data": {"resultsData": rows, "itotalRecords": total}}))
            } else if url.ends_with("conclusionProjectInfo/P2") {
                status(500)
            } else if url.contains("conclusionProjectInfo/") {
                ok_json(json!({"data": {"projectName": "name"}}))
            } else if url.contains("completeProjectReport") {
                let crate::request::Body::Form(form) = &req.body else { panic!("form") };
                if form.iter().any(|(k, v)| k == "index" && v == "1") {
                    ok_json(json!({"code": 200, "data": {"url": "/img/1.png"}}))
                } else {
                    ok_json(json!({"code": 404}))
                }
            } else {
                ok_image("image/png", b"PNG")
            }
        }))
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn batch_writes_results_and_project_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let fake = portal(json!([["P1", "a"], [null, "b"], ["P2", "c"], ["P1", "dup"]]));
        let client = client_with(fake.clone());
        let opts = BatchOptions::new("kw", dir.path());

        let processed = process_batch(&client, &opts).await.unwrap();
        assert_eq!(processed, vec!["P1".to_string(), "P2".to_string()]);

        let results = std::fs::read_to_string(dir.path().join(RESULTS_FILE)).unwrap();
        let lines: Vec<Value> = results.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], json!({"project_id": "P1", "raw": ["P1", "a"]}));
        assert_eq!(lines[1]["project_id"], Value::Null);

        let p1 = dir.path().join("P1");
        assert_eq!(read_json(&p1.join("info.json"))["data"]["projectName"], "name");
        let files = read_json(&p1.join("files.json"));
        assert_eq!(files, json!([p1.join("page_001.png").display().to_string()]));
        assert!(p1.join("page_001.png").exists());

        // The duplicate row for P1 is not processed a second time.
        assert_eq!(fake.count("conclusionProjectInfo/P1"), 1);
    }

    #[tokio::test]
    async fn failed_info_leaves_placeholder_and_keeps_going() {
        let dir = tempfile::tempdir().unwrap();
        let fake = portal(json!([["P2"], ["P3"]]));
        let client = client_with(fake.clone());

        let processed = process_batch(&client, &BatchOptions::new("", dir.path())).await.unwrap();
        assert_eq!(processed, vec!["P2".to_string(), "P3".to_string()]);

        let info = read_json(&dir.path().join("P2").join("info.json"));
        let msg = info["error"].as_str().unwrap();
        assert!(msg.starts_with("failed to fetch info:"), "{msg}");
        assert_eq!(fake.count("conclusionProjectInfo/P2"), 3);
        // The report is still downloaded.
        assert!(dir.path().join("P2").join("files.json").exists());
    }

    #[tokio::test]
    async fn download_error_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeTransport::new(|req: &PortalRequest| {
            if req.url.contains("completionQueryResultsData") {
                ok_json(json!({"data": {"resultsData": [["P7"]], "itotalRecords": 1}}))
            } else if req.url.contains("completeProjectReport") {
                status(502)
            } else {
                ok_json(json!({"data": {}}))
            }
        }));
        let client = client_with(fake);

        let processed = process_batch(&client, &BatchOptions::new("", dir.path())).await.unwrap();
        assert_eq!(processed, vec!["P7".to_string()]);
        let project = dir.path().join("P7");
        assert!(!project.join("files.json").exists());
        let errors = read_json(&project.join("errors.json"));
        assert!(errors["download_error"].as_str().unwrap().contains("502"));
    }

    #[tokio::test]
    async fn search_failure_aborts_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_with(Arc::new(FakeTransport::new(|_| status(503))));
        assert!(process_batch(&client, &BatchOptions::new("", dir.path())).await.is_err());
    }

    #[tokio::test]
    async fn custom_results_path_is_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let jsonl = dir.path().join("rows.jsonl");
        std::fs::write(&jsonl, "stale line\n").unwrap();
        let client = client_with(portal(json!([["P1"]])));
        let opts = BatchOptions { jsonl_path: Some(jsonl.clone()), ..BatchOptions::new("", dir.path()) };

        process_batch(&client, &opts).await.unwrap();
        let content = std::fs::read_to_string(&jsonl).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(!dir.path().join(RESULTS_FILE).exists());
    }

    #[test]
    fn project_ids_must_be_plain_names() {
        assert!(is_plain_dir_name("P1"));
        assert!(is_plain_dir_name("52072146"));
        assert!(!is_plain_dir_name("../escaped"));
        assert!(!is_plain_dir_name(".."));
        assert!(!is_plain_dir_name("."));
        assert!(!is_plain_dir_name("/abs/path"));
        assert!(!is_plain_dir_name("a/b"));
    }

    #[tokio::test]
    async fn traversal_ids_stay_inside_out_dir() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("batch");
        let fake = portal(json!([["../escaped"], ["nested/id"], ["P1"]]));
        let client = client_with(fake.clone());

        let processed = process_batch(&client, &BatchOptions::new("", &out)).await.unwrap();
        assert_eq!(processed, vec!["P1".to_string()]);
        assert!(!root.path().join("escaped").exists());
        assert!(!out.join("nested").exists());
        assert!(out.join("P1").join("info.json").exists());
        assert_eq!(fake.count("conclusionProjectInfo/"), 1);

        // The raw rows are still recorded verbatim.
        let results = std::fs::read_to_string(out.join(RESULTS_FILE)).unwrap();
        assert_eq!(results.lines().count(), 3);
    }

    #[tokio::test]
    async fn unparseable_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let jsonl = dir.path().join("rows.jsonl");
        std::fs::write(&jsonl, "{broken\n{\"project_id\":\"P1\",\"raw\":[\"P1\"]}\n").unwrap();
        let client = client_with(portal(json!([])));
        let opts = BatchOptions::new("", dir.path());

        let processed = process_projects(&client, &opts, &jsonl).await.unwrap();
        assert_eq!(processed, vec!["P1".to_string()]);
    }
}
