//! Conjunction Screening CLI support
//!
//! Catalog loading for the `conjunction-screen` binary. Catalogs are either
//! JSON element sets or plain TLE text (two-line or three-line groups).

use thiserror::Error;

pub mod loader;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unrecognized catalog layout: {0}")]
    UnknownLayout(String),
    #[error("No element sets found in catalog")]
    EmptyCatalog,
}

pub type Result<T> = std::result::Result<T, LoaderError>;
