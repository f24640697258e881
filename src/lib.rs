//! NSFC FINAL REPORT SCRAPER
//! Searches the NSFC grant portal, decrypts its responses, downloads the page images of
//! project final reports and OCRs them into text.

pub mod cipher;
pub mod cli;
pub mod client;
pub mod config;
pub mod download;
mod error;
mod macros;
pub mod models;
pub mod ocr;
pub mod paginate;
pub mod process;
pub mod request;
pub mod retry;

pub use client::PortalClient;
pub use error::{Error, Result};
