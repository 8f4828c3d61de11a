use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Errors surfaced by a table backend. The repository treats the first two as
/// recoverable "no result" conditions; `RateLimited` carries a suggested wait.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("workbook '{0}' not found")]
    WorkbookNotFound(String),
    #[error("worksheet '{0}' not found")]
    TableNotFound(String),
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    #[error("remote error: {0}")]
    Remote(String),
}

impl StoreError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, StoreError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Remote(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbookInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "modifiedTime", default)]
    pub modified_time: String,
}

/// Resolved workbook reference. Cheap to clone; carries no connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookHandle {
    pub id: String,
    pub title: String,
}

/// Generic remote "workbook of named tables" access, independent of CRM
/// semantics. Two implementations: `SheetsStore` (Google Sheets) and
/// `local::LocalStore` (in-memory / JSON file), selected by explicit
/// configuration. Row indexes are 1-based and count the header row. The store
/// never auto-creates tables; `create_table` is invoked by the repository when
/// a write hits `TableNotFound`.
pub trait TableBackend {
    fn list_workbooks(&self) -> Result<Vec<WorkbookInfo>, StoreError>;

    /// Resolve a workbook by exact name, URL, or opaque id.
    fn open(&self, reference: &str) -> Result<WorkbookHandle, StoreError>;

    /// Create a new, empty workbook with the given title.
    fn create_workbook(&self, title: &str) -> Result<WorkbookHandle, StoreError>;

    fn read_all(&self, wb: &WorkbookHandle, table: &str) -> Result<Vec<Vec<String>>, StoreError>;

    fn append_row(&self, wb: &WorkbookHandle, table: &str, row: &[String])
    -> Result<(), StoreError>;

    fn append_rows(
        &self,
        wb: &WorkbookHandle,
        table: &str,
        rows: &[Vec<String>],
    ) -> Result<(), StoreError>;

    /// Full-row overwrite. Cell-level updates are unsafe under the positional
    /// codec, so this is the only write-in-place primitive.
    fn update_row(
        &self,
        wb: &WorkbookHandle,
        table: &str,
        row_index: usize,
        row: &[String],
    ) -> Result<(), StoreError>;

    fn delete_row(&self, wb: &WorkbookHandle, table: &str, row_index: usize)
    -> Result<(), StoreError>;

    /// Bulk wipe for load utilities, not steady-state CRUD.
    fn clear_range(&self, wb: &WorkbookHandle, table: &str, range: &str)
    -> Result<(), StoreError>;

    /// Create `table` with the given header row. No-op if already present.
    fn create_table(
        &self,
        wb: &WorkbookHandle,
        table: &str,
        headers: &[String],
    ) -> Result<(), StoreError>;
}

// --- Google Sheets backend ---

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_FILES_API: &str = "https://www.googleapis.com/drive/v3/files";
const LIST_PAGE_SIZE: u32 = 50;

#[derive(Debug, Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<WorkbookInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
    properties: Option<SpreadsheetProps>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetProps {
    title: String,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProps,
}

#[derive(Debug, Deserialize)]
struct SheetProps {
    #[serde(rename = "sheetId")]
    sheet_id: i64,
    title: String,
}

/// Google Sheets v4 + Drive v3 over blocking HTTP. Every remote call goes
/// through the retry policy; opens are memoized per process.
pub struct SheetsStore {
    client: reqwest::blocking::Client,
    token: String,
    policy: RetryPolicy,
    open_cache: RefCell<HashMap<String, WorkbookHandle>>,
    // (workbook id, table title) -> numeric sheet id, needed for row deletes
    sheet_ids: RefCell<HashMap<(String, String), i64>>,
}

impl SheetsStore {
    pub fn new(token: String) -> SheetsStore {
        SheetsStore {
            client: reqwest::blocking::Client::new(),
            token,
            policy: RetryPolicy::default(),
            open_cache: RefCell::new(HashMap::new()),
            sheet_ids: RefCell::new(HashMap::new()),
        }
    }

    fn get(&self, url: &str, query: &[(&str, String)]) -> reqwest::blocking::RequestBuilder {
        self.client.get(url).bearer_auth(&self.token).query(query)
    }

    /// Map an HTTP failure onto the store taxonomy. 429/503 are the quota
    /// signals; a 400 "Unable to parse range" is how the values API reports a
    /// missing worksheet.
    fn classify(
        resp: reqwest::blocking::Response,
        not_found: impl FnOnce() -> StoreError,
    ) -> Result<reqwest::blocking::Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().unwrap_or_default();
        match status.as_u16() {
            429 | 503 => Err(StoreError::RateLimited {
                retry_after: Duration::from_secs(60),
            }),
            404 => Err(not_found()),
            400 if body.contains("Unable to parse range") => Err(not_found()),
            _ => Err(StoreError::Remote(format!("HTTP {status}: {body}"))),
        }
    }

    fn spreadsheet_meta(&self, id: &str) -> Result<SpreadsheetMeta, StoreError> {
        let workbook = id.to_string();
        self.policy.run(|| {
            let resp = self
                .get(
                    &format!("{SHEETS_API}/{workbook}"),
                    &[("fields", "properties(title),sheets(properties(sheetId,title))".to_string())],
                )
                .send()?;
            let resp = Self::classify(resp, || StoreError::WorkbookNotFound(workbook.clone()))?;
            resp.json::<SpreadsheetMeta>().map_err(StoreError::from)
        })
    }

    fn sheet_id(&self, wb: &WorkbookHandle, table: &str) -> Result<i64, StoreError> {
        let key = (wb.id.clone(), table.to_string());
        if let Some(id) = self.sheet_ids.borrow().get(&key) {
            return Ok(*id);
        }
        let meta = self.spreadsheet_meta(&wb.id)?;
        let mut cache = self.sheet_ids.borrow_mut();
        for sheet in &meta.sheets {
            cache.insert((wb.id.clone(), sheet.properties.title.clone()), sheet.properties.sheet_id);
        }
        cache
            .get(&key)
            .copied()
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    fn find_by_name(&self, name: &str) -> Result<Option<WorkbookInfo>, StoreError> {
        let escaped = name.replace('\'', "\\'");
        let query = format!(
            "name = '{escaped}' and mimeType='application/vnd.google-apps.spreadsheet' and trashed=false"
        );
        let list: DriveFileList = self.policy.run(|| {
            let resp = self
                .get(
                    DRIVE_FILES_API,
                    &[
                        ("q", query.clone()),
                        ("pageSize", "1".to_string()),
                        ("fields", "files(id, name, modifiedTime)".to_string()),
                    ],
                )
                .send()?;
            let resp = Self::classify(resp, || StoreError::WorkbookNotFound(name.to_string()))?;
            resp.json().map_err(StoreError::from)
        })?;
        Ok(list.files.into_iter().next())
    }

    fn batch_update(
        &self,
        wb: &WorkbookHandle,
        body: serde_json::Value,
        not_found: impl Fn() -> StoreError,
    ) -> Result<reqwest::blocking::Response, StoreError> {
        self.policy.run(|| {
            let resp = self
                .client
                .post(format!("{SHEETS_API}/{}:batchUpdate", wb.id))
                .bearer_auth(&self.token)
                .json(&body)
                .send()?;
            Self::classify(resp, &not_found)
        })
    }
}

impl TableBackend for SheetsStore {
    fn list_workbooks(&self) -> Result<Vec<WorkbookInfo>, StoreError> {
        let list: DriveFileList = self.policy.run(|| {
            let resp = self
                .get(
                    DRIVE_FILES_API,
                    &[
                        (
                            "q",
                            "mimeType='application/vnd.google-apps.spreadsheet' and trashed=false"
                                .to_string(),
                        ),
                        ("orderBy", "modifiedTime desc".to_string()),
                        ("pageSize", LIST_PAGE_SIZE.to_string()),
                        ("fields", "files(id, name, modifiedTime)".to_string()),
                    ],
                )
                .send()?;
            let resp = Self::classify(resp, || StoreError::Remote("drive list failed".into()))?;
            resp.json().map_err(StoreError::from)
        })?;
        Ok(list.files)
    }

    fn open(&self, reference: &str) -> Result<WorkbookHandle, StoreError> {
        if let Some(handle) = self.open_cache.borrow().get(reference) {
            return Ok(handle.clone());
        }

        let handle = if reference.contains("docs.google.com") {
            // URL form: .../spreadsheets/d/<id>/...
            let id = reference
                .split("/d/")
                .nth(1)
                .and_then(|rest| rest.split('/').next())
                .ok_or_else(|| StoreError::WorkbookNotFound(reference.to_string()))?;
            let meta = self.spreadsheet_meta(id)?;
            WorkbookHandle {
                id: id.to_string(),
                title: meta.properties.map(|p| p.title).unwrap_or_default(),
            }
        } else if let Some(info) = self.find_by_name(reference)? {
            WorkbookHandle { id: info.id, title: info.name }
        } else {
            // Not a known name; maybe it is an opaque id
            match self.spreadsheet_meta(reference) {
                Ok(meta) => WorkbookHandle {
                    id: reference.to_string(),
                    title: meta.properties.map(|p| p.title).unwrap_or_default(),
                },
                Err(StoreError::WorkbookNotFound(_)) => {
                    return Err(StoreError::WorkbookNotFound(reference.to_string()));
                }
                Err(e) => return Err(e),
            }
        };

        self.open_cache
            .borrow_mut()
            .insert(reference.to_string(), handle.clone());
        Ok(handle)
    }

    fn create_workbook(&self, title: &str) -> Result<WorkbookHandle, StoreError> {
        let body = serde_json::json!({ "properties": { "title": title } });
        let meta: serde_json::Value = self.policy.run(|| {
            let resp = self
                .client
                .post(SHEETS_API)
                .bearer_auth(&self.token)
                .json(&body)
                .send()?;
            let resp = Self::classify(resp, || StoreError::Remote("create failed".into()))?;
            resp.json().map_err(StoreError::from)
        })?;
        let id = meta
            .get("spreadsheetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StoreError::Remote("create returned no spreadsheetId".into()))?
            .to_string();
        let handle = WorkbookHandle { id, title: title.to_string() };
        self.open_cache
            .borrow_mut()
            .insert(title.to_string(), handle.clone());
        Ok(handle)
    }

    fn read_all(&self, wb: &WorkbookHandle, table: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let range: ValueRange = self.policy.run(|| {
            let resp = self
                .get(&format!("{SHEETS_API}/{}/values/{table}", wb.id), &[])
                .send()?;
            let resp = Self::classify(resp, || StoreError::TableNotFound(table.to_string()))?;
            resp.json().map_err(StoreError::from)
        })?;
        Ok(range.values)
    }

    fn append_row(
        &self,
        wb: &WorkbookHandle,
        table: &str,
        row: &[String],
    ) -> Result<(), StoreError> {
        self.append_rows(wb, table, &[row.to_vec()])
    }

    fn append_rows(
        &self,
        wb: &WorkbookHandle,
        table: &str,
        rows: &[Vec<String>],
    ) -> Result<(), StoreError> {
        // The values API ignores appends to a missing sheet range with a 400;
        // probe the sheet id first so the caller sees TableNotFound.
        self.sheet_id(wb, table)?;
        let body = ValueRange { values: rows.to_vec() };
        self.policy.run(|| {
            let resp = self
                .client
                .post(format!("{SHEETS_API}/{}/values/{table}:append", wb.id))
                .bearer_auth(&self.token)
                .query(&[("valueInputOption", "RAW")])
                .json(&body)
                .send()?;
            Self::classify(resp, || StoreError::TableNotFound(table.to_string()))?;
            Ok(())
        })
    }

    fn update_row(
        &self,
        wb: &WorkbookHandle,
        table: &str,
        row_index: usize,
        row: &[String],
    ) -> Result<(), StoreError> {
        let body = ValueRange { values: vec![row.to_vec()] };
        self.policy.run(|| {
            let resp = self
                .client
                .put(format!("{SHEETS_API}/{}/values/{table}!A{row_index}", wb.id))
                .bearer_auth(&self.token)
                .query(&[("valueInputOption", "RAW")])
                .json(&body)
                .send()?;
            Self::classify(resp, || StoreError::TableNotFound(table.to_string()))?;
            Ok(())
        })
    }

    fn delete_row(
        &self,
        wb: &WorkbookHandle,
        table: &str,
        row_index: usize,
    ) -> Result<(), StoreError> {
        let sheet_id = self.sheet_id(wb, table)?;
        let body = serde_json::json!({
            "requests": [{
                "deleteDimension": {
                    "range": {
                        "sheetId": sheet_id,
                        "dimension": "ROWS",
                        "startIndex": row_index - 1,
                        "endIndex": row_index,
                    }
                }
            }]
        });
        self.batch_update(wb, body, || StoreError::TableNotFound(table.to_string()))?;
        Ok(())
    }

    fn clear_range(&self, wb: &WorkbookHandle, table: &str, range: &str) -> Result<(), StoreError> {
        self.policy.run(|| {
            let resp = self
                .client
                .post(format!("{SHEETS_API}/{}/values/{table}!{range}:clear", wb.id))
                .bearer_auth(&self.token)
                .send()?;
            Self::classify(resp, || StoreError::TableNotFound(table.to_string()))?;
            Ok(())
        })
    }

    fn create_table(
        &self,
        wb: &WorkbookHandle,
        table: &str,
        headers: &[String],
    ) -> Result<(), StoreError> {
        if self.sheet_id(wb, table).is_ok() {
            return Ok(());
        }
        let body = serde_json::json!({
            "requests": [{ "addSheet": { "properties": { "title": table } } }]
        });
        self.batch_update(wb, body, || StoreError::WorkbookNotFound(wb.id.clone()))?;
        // sheet id cache is now stale for this workbook
        self.sheet_ids
            .borrow_mut()
            .retain(|(id, _), _| id != &wb.id);
        self.append_rows(wb, table, &[headers.to_vec()])
    }
}
