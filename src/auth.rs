use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

/// Resolve the Google OAuth access token for the Sheets and Drive APIs.
///
/// Order: `GOOGLE_ACCESS_TOKEN` env var, then the token file under the app
/// data directory. Token refresh is handled outside this tool (gcloud or a
/// companion script writes the file); here we only read it.
pub fn google_access_token() -> Result<String> {
    if let Ok(token) = env::var("GOOGLE_ACCESS_TOKEN") {
        let token = token.trim().to_string();
        if !token.is_empty() {
            return Ok(token);
        }
    }

    let path = token_path();
    let raw = fs::read_to_string(&path).with_context(|| {
        format!(
            "No Google access token. Set GOOGLE_ACCESS_TOKEN or write one to {}",
            path.display()
        )
    })?;
    let token = raw.trim().to_string();
    if token.is_empty() {
        return Err(anyhow!("Token file {} is empty", path.display()));
    }
    Ok(token)
}

pub fn token_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "sheetcrm") {
        proj_dirs.data_dir().join("google_token")
    } else {
        PathBuf::from("google_token")
    }
}

/// Default path for the `--local` JSON workbook file.
pub fn local_store_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "sheetcrm") {
        proj_dirs.data_dir().join("workbooks.json")
    } else {
        PathBuf::from("workbooks.json")
    }
}
