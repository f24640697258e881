use std::path::PathBuf;

use chrono::Local;
use clap::{Args, CommandFactory, Parser, Subcommand};

use crate::{
    client::PortalClient,
    config::Config,
    download::{download_report, DEFAULT_MAX_PAGES},
    info_time,
    models::{SearchFilters, SearchQuery},
    ocr::{is_dir, ocr_batch, ocr_dir, Tesseract, REPORT_FILE},
    process::{process_batch, BatchOptions},
    Error, Result,
};

#[derive(Parser)]
#[command(name = "nsfc-report")]
#[command(version)]
#[command(about = "Search NSFC final project reports, download their pages and OCR them", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one search request and print the decoded response
    Search {
        #[arg(short, long, default_value = "")]
        keyword: String,
        /// Zero based page number
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        size: u32,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Print the metadata of one project
    Info { project_id: String },
    /// Download the report pages of one project
    Download {
        project_id: String,
        /// Defaults to ./data/reports/<project_id>
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
        max_pages: u32,
        /// Redownload existing files
        #[arg(long)]
        force: bool,
    },
    /// Search every page, then fetch info and report pages for every project found
    Batch {
        #[arg(short, long, default_value = "")]
        keyword: String,
        /// Defaults to ./data/batch
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        page_size: u32,
        /// Redownload reports
        #[arg(long)]
        force: bool,
        /// Path to write search results jsonl
        #[arg(long)]
        jsonl: Option<PathBuf>,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// OCR the page images of one project directory into a single text file
    Ocr {
        project_dir: PathBuf,
        /// Defaults to <project_dir>/report.txt
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Text to prepend to the output
        #[arg(short = 'H', long)]
        header: Option<String>,
        /// Tesseract language code, e.g. chi_sim
        #[arg(short, long)]
        lang: Option<String>,
    },
    /// OCR every project directory under a root
    OcrBatch {
        root: PathBuf,
        #[arg(long)]
        recursive: bool,
        /// Re-run OCR even if report.txt exists
        #[arg(long)]
        force: bool,
        #[arg(short, long)]
        lang: Option<String>,
    },
}

#[derive(Args, Debug, Default)]
pub struct FilterArgs {
    #[arg(long)]
    pub conclusion_year: Option<String>,
    #[arg(long)]
    pub ratify_year: Option<String>,
    #[arg(long)]
    pub project_type: Option<String>,
    #[arg(long)]
    pub code: Option<String>,
    #[arg(long)]
    pub depend_unit: Option<String>,
    /// Ordering field, "enddate" when unset
    #[arg(long)]
    pub order: Option<String>,
    /// "asc" or "desc", "desc" when unset
    #[arg(long)]
    pub ordering: Option<String>,
}

impl From<FilterArgs> for SearchFilters {
    fn from(args: FilterArgs) -> Self {
        SearchFilters {
            conclusion_year: args.conclusion_year,
            ratify_year: args.ratify_year,
            project_type: args.project_type,
            code: args.code,
            depend_unit: args.depend_unit,
            order: args.order,
            ordering: args.ordering,
            ..SearchFilters::default()
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };
    let config = Config::load()?;
    let start_time = Local::now();

    match command {
        Commands::Search { keyword, page, size, filters } => {
            let client = PortalClient::new(&config)?;
            let query = SearchQuery::new(keyword, page, size).with_filters(filters.into());
            let res = client.search(&query).await?;
            println!("{}", serde_json::to_string_pretty(&res)?);
        }
        Commands::Info { project_id } => {
            let client = PortalClient::new(&config)?;
            let res = client.project_info(&project_id).await?;
            println!("{}", serde_json::to_string_pretty(&res)?);
        }
        Commands::Download { project_id, out, max_pages, force } => {
            let client = PortalClient::new(&config)?;
            let out = out.unwrap_or_else(|| PathBuf::from("data").join("reports").join(&project_id));
            let files = download_report(&client, &project_id, &out, max_pages, force).await?;
            for file in files {
                println!("{}", file.display());
            }
        }
        Commands::Batch { keyword, out, page_size, force, jsonl, filters } => {
            let client = PortalClient::new(&config)?;
            let out = out.unwrap_or_else(|| PathBuf::from("data").join("batch"));
            let opts = BatchOptions {
                filters: filters.into(),
                page_size,
                force,
                jsonl_path: jsonl,
                ..BatchOptions::new(keyword, out)
            };
            for project_id in process_batch(&client, &opts).await? {
                println!("{project_id}");
            }
        }
        Commands::Ocr { project_dir, out, header, lang } => {
            if !is_dir(&project_dir).await {
                return Err(Error::MissingDir(project_dir));
            }
            let engine = Tesseract::new(&config.settings.tesseract);
            let out = out.unwrap_or_else(|| project_dir.join(REPORT_FILE));
            ocr_dir(&engine, &project_dir, &out, header.as_deref(), lang.as_deref()).await?;
            println!("Wrote combined OCR text to {}", out.display());
        }
        Commands::OcrBatch { root, recursive, force, lang } => {
            let engine = Tesseract::new(&config.settings.tesseract);
            let summary = ocr_batch(&engine, &root, recursive, force, lang.as_deref()).await?;
            println!(
                "Done. processed={}, skipped={}, failed={}",
                summary.processed, summary.skipped, summary.failed
            );
        }
    }

    info_time!(start_time, "Full program time:");
    Ok(())
}
