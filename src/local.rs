use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::store::{StoreError, TableBackend, WorkbookHandle, WorkbookInfo};

type Workbooks = BTreeMap<String, BTreeMap<String, Vec<Vec<String>>>>;

/// Offline table backend: workbooks live in memory, optionally persisted to a
/// JSON file after every write. Doubles as the test double for the repository
/// and as `--local` mode for working without Google credentials.
pub struct LocalStore {
    path: Option<PathBuf>,
    workbooks: RefCell<Workbooks>,
}

impl LocalStore {
    pub fn new() -> LocalStore {
        LocalStore {
            path: None,
            workbooks: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn with_path(path: PathBuf) -> LocalStore {
        let workbooks = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                log::warn!("could not parse {}: {e}; starting empty", path.display());
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        LocalStore {
            path: Some(path),
            workbooks: RefCell::new(workbooks),
        }
    }

    fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else { return Ok(()) };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Remote(e.to_string()))?;
        }
        let raw = serde_json::to_string_pretty(&*self.workbooks.borrow())
            .map_err(|e| StoreError::Remote(e.to_string()))?;
        fs::write(path, raw).map_err(|e| StoreError::Remote(e.to_string()))
    }

    fn with_table<T>(
        &self,
        wb: &WorkbookHandle,
        table: &str,
        f: impl FnOnce(&mut Vec<Vec<String>>) -> T,
    ) -> Result<T, StoreError> {
        let mut books = self.workbooks.borrow_mut();
        let tables = books
            .get_mut(&wb.title)
            .ok_or_else(|| StoreError::WorkbookNotFound(wb.title.clone()))?;
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        Ok(f(rows))
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBackend for LocalStore {
    fn list_workbooks(&self) -> Result<Vec<WorkbookInfo>, StoreError> {
        Ok(self
            .workbooks
            .borrow()
            .keys()
            .map(|name| WorkbookInfo {
                id: name.clone(),
                name: name.clone(),
                modified_time: String::new(),
            })
            .collect())
    }

    fn open(&self, reference: &str) -> Result<WorkbookHandle, StoreError> {
        if self.workbooks.borrow().contains_key(reference) {
            Ok(WorkbookHandle {
                id: reference.to_string(),
                title: reference.to_string(),
            })
        } else {
            Err(StoreError::WorkbookNotFound(reference.to_string()))
        }
    }

    fn create_workbook(&self, title: &str) -> Result<WorkbookHandle, StoreError> {
        self.workbooks
            .borrow_mut()
            .entry(title.to_string())
            .or_default();
        self.save()?;
        Ok(WorkbookHandle {
            id: title.to_string(),
            title: title.to_string(),
        })
    }

    fn read_all(&self, wb: &WorkbookHandle, table: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let books = self.workbooks.borrow();
        let tables = books
            .get(&wb.title)
            .ok_or_else(|| StoreError::WorkbookNotFound(wb.title.clone()))?;
        tables
            .get(table)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    fn append_row(
        &self,
        wb: &WorkbookHandle,
        table: &str,
        row: &[String],
    ) -> Result<(), StoreError> {
        self.with_table(wb, table, |rows| rows.push(row.to_vec()))?;
        self.save()
    }

    fn append_rows(
        &self,
        wb: &WorkbookHandle,
        table: &str,
        new_rows: &[Vec<String>],
    ) -> Result<(), StoreError> {
        self.with_table(wb, table, |rows| rows.extend_from_slice(new_rows))?;
        self.save()
    }

    fn update_row(
        &self,
        wb: &WorkbookHandle,
        table: &str,
        row_index: usize,
        row: &[String],
    ) -> Result<(), StoreError> {
        self.with_table(wb, table, |rows| {
            let idx = row_index - 1;
            while rows.len() <= idx {
                rows.push(Vec::new());
            }
            rows[idx] = row.to_vec();
        })?;
        self.save()
    }

    fn delete_row(
        &self,
        wb: &WorkbookHandle,
        table: &str,
        row_index: usize,
    ) -> Result<(), StoreError> {
        self.with_table(wb, table, |rows| {
            let idx = row_index - 1;
            if idx < rows.len() {
                rows.remove(idx);
            }
        })?;
        self.save()
    }

    fn clear_range(&self, wb: &WorkbookHandle, table: &str, _range: &str) -> Result<(), StoreError> {
        // Range parsing is not worth emulating; local callers only ever wipe
        // whole tables.
        self.with_table(wb, table, |rows| rows.clear())?;
        self.save()
    }

    fn create_table(
        &self,
        wb: &WorkbookHandle,
        table: &str,
        headers: &[String],
    ) -> Result<(), StoreError> {
        {
            let mut books = self.workbooks.borrow_mut();
            let tables = books
                .get_mut(&wb.title)
                .ok_or_else(|| StoreError::WorkbookNotFound(wb.title.clone()))?;
            if tables.contains_key(table) {
                return Ok(());
            }
            tables.insert(table.to_string(), vec![headers.to_vec()]);
        }
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_open_unknown_workbook_is_not_found() {
        let store = LocalStore::new();
        assert!(matches!(
            store.open("nope"),
            Err(StoreError::WorkbookNotFound(_))
        ));
    }

    #[test]
    fn test_create_then_read_round_trip() {
        let store = LocalStore::new();
        let wb = store.create_workbook("Sales Pipeline 2026").unwrap();
        store.create_table(&wb, "Leads", &row(&["id", "name"])).unwrap();
        store.append_row(&wb, "Leads", &row(&["l1", "Acme"])).unwrap();
        store.append_row(&wb, "Leads", &row(&["l2", "Globex"])).unwrap();

        let rows = store.read_all(&wb, "Leads").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], row(&["id", "name"]));
        assert_eq!(rows[2], row(&["l2", "Globex"]));

        // reopen by name works once created
        assert_eq!(store.open("Sales Pipeline 2026").unwrap(), wb);
    }

    #[test]
    fn test_missing_table_is_table_not_found() {
        let store = LocalStore::new();
        let wb = store.create_workbook("Empty").unwrap();
        assert!(matches!(
            store.read_all(&wb, "Leads"),
            Err(StoreError::TableNotFound(_))
        ));
        assert!(matches!(
            store.append_row(&wb, "Leads", &row(&["x"])),
            Err(StoreError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_update_and_delete_are_one_based() {
        let store = LocalStore::new();
        let wb = store.create_workbook("WB").unwrap();
        store.create_table(&wb, "T", &row(&["h"])).unwrap();
        store.append_rows(&wb, "T", &[row(&["a"]), row(&["b"])]).unwrap();

        store.update_row(&wb, "T", 2, &row(&["A"])).unwrap();
        let rows = store.read_all(&wb, "T").unwrap();
        assert_eq!(rows[1], row(&["A"]));
        assert_eq!(rows[2], row(&["b"]));

        store.delete_row(&wb, "T", 2).unwrap();
        let rows = store.read_all(&wb, "T").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], row(&["b"]));
    }

    #[test]
    fn test_create_table_is_idempotent() {
        let store = LocalStore::new();
        let wb = store.create_workbook("WB").unwrap();
        store.create_table(&wb, "T", &row(&["h"])).unwrap();
        store.append_row(&wb, "T", &row(&["a"])).unwrap();
        store.create_table(&wb, "T", &row(&["h"])).unwrap();
        // existing data untouched
        assert_eq!(store.read_all(&wb, "T").unwrap().len(), 2);
    }
}
