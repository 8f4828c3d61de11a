use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::models::{
    Activity, LEAD_LEGACY_COLUMNS, Lead, LeadStatus, Opportunity, PipelineStage, migrate_lead_row,
};
use crate::store::{StoreError, TableBackend, WorkbookHandle};

pub const DEFAULT_WORKBOOK: &str = "Sales Pipeline 2026";
pub const LEADS_TABLE: &str = "Leads";
pub const OPPS_TABLE: &str = "Opportunities";
pub const ACTIVITIES_TABLE: &str = "Activities";

/// Short read-cache window: bounds staleness while soaking up request bursts
/// without a remote round trip each time.
const CACHE_TTL: Duration = Duration::from_secs(30);

struct CachedTable {
    rows: Vec<Vec<String>>,
    fetched_at: Instant,
}

/// ID-indexed CRUD over the three CRM tables, layered on a `TableBackend`.
///
/// The remote workbook is the system of record; this struct exclusively owns
/// the in-process raw-row cache. Every successful write is patched into the
/// cache ("optimistic patch") so a read immediately after a write observes it
/// without waiting out the TTL. The cache is only touched after the remote
/// write succeeds.
///
/// Lookups are linear scans by design: tables hold hundreds of rows, not
/// millions, and no index is maintained beyond the cached list. Two processes
/// updating the same record race last-writer-wins; there is no version check.
pub struct Crm {
    store: Box<dyn TableBackend>,
    workbook: WorkbookHandle,
    cache: HashMap<&'static str, CachedTable>,
    ttl: Duration,
}

impl Crm {
    pub fn new(store: Box<dyn TableBackend>, workbook: WorkbookHandle) -> Crm {
        Crm {
            store,
            workbook,
            cache: HashMap::new(),
            ttl: CACHE_TTL,
        }
    }

    /// Open (or create) the named workbook and wrap it.
    pub fn open(store: Box<dyn TableBackend>, reference: &str) -> Result<Crm, StoreError> {
        let workbook = store.open(reference)?;
        Ok(Crm::new(store, workbook))
    }

    pub fn workbook(&self) -> &WorkbookHandle {
        &self.workbook
    }

    /// Create the three CRM tables with header rows. Idempotent per table.
    pub fn provision(&mut self) -> Result<(), StoreError> {
        self.store
            .create_table(&self.workbook, LEADS_TABLE, &Lead::headers())?;
        self.store
            .create_table(&self.workbook, OPPS_TABLE, &Opportunity::headers())?;
        self.store
            .create_table(&self.workbook, ACTIVITIES_TABLE, &Activity::headers())?;
        Ok(())
    }

    // --- Cache plumbing ---

    /// Raw rows for a table, header included. Served from cache inside the TTL
    /// window; a missing table degrades to an empty result so a brand-new
    /// workbook reads as "no records".
    fn table_rows(&mut self, table: &'static str) -> Result<Vec<Vec<String>>, StoreError> {
        if let Some(cached) = self.cache.get(table) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.rows.clone());
            }
        }
        match self.store.read_all(&self.workbook, table) {
            Ok(rows) => {
                log::debug!("refreshed {table} cache ({} rows)", rows.len());
                self.cache.insert(
                    table,
                    CachedTable {
                        rows: rows.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(rows)
            }
            Err(StoreError::TableNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn patch_append(&mut self, table: &'static str, row: Vec<String>) {
        if let Some(cached) = self.cache.get_mut(table) {
            cached.rows.push(row);
            cached.fetched_at = Instant::now();
        }
    }

    fn patch_update(&mut self, table: &'static str, idx: usize, row: Vec<String>) {
        if let Some(cached) = self.cache.get_mut(table) {
            if idx < cached.rows.len() {
                cached.rows[idx] = row;
            }
            cached.fetched_at = Instant::now();
        }
    }

    fn patch_delete(&mut self, table: &'static str, idx: usize) {
        if let Some(cached) = self.cache.get_mut(table) {
            if idx < cached.rows.len() {
                cached.rows.remove(idx);
            }
            cached.fetched_at = Instant::now();
        }
    }

    fn invalidate(&mut self, table: &'static str) {
        self.cache.remove(table);
    }

    /// Append one encoded row; if the table is missing, provision it with the
    /// given header and retry the append exactly once.
    fn append_with_provision(
        &mut self,
        table: &'static str,
        headers: Vec<String>,
        row: &[String],
    ) -> Result<(), StoreError> {
        match self.store.append_row(&self.workbook, table, row) {
            Err(StoreError::TableNotFound(_)) => {
                log::debug!("{table} missing, provisioning");
                self.store.create_table(&self.workbook, table, &headers)?;
                self.store.append_row(&self.workbook, table, row)
            }
            other => other,
        }
    }

    /// Scan the cached raw rows (not decoded records, to avoid re-encoding
    /// drift) for the row whose leading id cell matches. Returns the vec index
    /// (header at 0), so the 1-based sheet row is index + 1.
    fn find_row(rows: &[Vec<String>], id: &str) -> Option<usize> {
        rows.iter()
            .enumerate()
            .skip(1)
            .find(|(_, row)| row.first().map(String::as_str) == Some(id))
            .map(|(i, _)| i)
    }

    /// Decode every data row, skipping blank/separator rows (empty id cell).
    fn decode_table<T>(rows: &[Vec<String>], decode: impl Fn(&[String]) -> T) -> Vec<T> {
        rows.iter()
            .skip(1)
            .filter(|row| row.first().map(|c| !c.trim().is_empty()).unwrap_or(false))
            .map(|row| decode(row))
            .collect()
    }

    // --- Leads ---

    pub fn add_lead(&mut self, mut lead: Lead) -> Result<Lead, StoreError> {
        let now = Utc::now();
        lead.created_at = now;
        lead.updated_at = now;
        let row = lead.to_row();
        self.append_with_provision(LEADS_TABLE, Lead::headers(), &row)?;
        self.patch_append(LEADS_TABLE, row);
        Ok(lead)
    }

    pub fn leads(&mut self) -> Result<Vec<Lead>, StoreError> {
        let rows = self.table_rows(LEADS_TABLE)?;
        Ok(Self::decode_table(&rows, Lead::from_row))
    }

    pub fn lead(&mut self, lead_id: &str) -> Result<Option<Lead>, StoreError> {
        Ok(self.leads()?.into_iter().find(|l| l.lead_id == lead_id))
    }

    /// Full-row overwrite by id. `Ok(false)` means the id was not found,
    /// which is a defined result, not an error.
    pub fn update_lead(&mut self, lead: &mut Lead) -> Result<bool, StoreError> {
        let rows = self.table_rows(LEADS_TABLE)?;
        let Some(idx) = Self::find_row(&rows, &lead.lead_id) else {
            return Ok(false);
        };
        lead.updated_at = Utc::now();
        let row = lead.to_row();
        self.store
            .update_row(&self.workbook, LEADS_TABLE, idx + 1, &row)?;
        self.patch_update(LEADS_TABLE, idx, row);
        Ok(true)
    }

    pub fn delete_lead(&mut self, lead_id: &str) -> Result<bool, StoreError> {
        let rows = self.table_rows(LEADS_TABLE)?;
        let Some(idx) = Self::find_row(&rows, lead_id) else {
            return Ok(false);
        };
        self.store
            .delete_row(&self.workbook, LEADS_TABLE, idx + 1)?;
        self.patch_delete(LEADS_TABLE, idx);
        Ok(true)
    }

    // --- Opportunities ---

    pub fn add_opportunity(&mut self, mut opp: Opportunity) -> Result<Opportunity, StoreError> {
        let now = Utc::now();
        opp.created_at = now;
        opp.updated_at = now;
        let row = opp.to_row();
        self.append_with_provision(OPPS_TABLE, Opportunity::headers(), &row)?;
        self.patch_append(OPPS_TABLE, row);
        Ok(opp)
    }

    pub fn opportunities(&mut self) -> Result<Vec<Opportunity>, StoreError> {
        let rows = self.table_rows(OPPS_TABLE)?;
        Ok(Self::decode_table(&rows, Opportunity::from_row))
    }

    pub fn opportunity(&mut self, opp_id: &str) -> Result<Option<Opportunity>, StoreError> {
        Ok(self
            .opportunities()?
            .into_iter()
            .find(|o| o.opp_id == opp_id))
    }

    pub fn opportunities_for_lead(&mut self, lead_id: &str) -> Result<Vec<Opportunity>, StoreError> {
        Ok(self
            .opportunities()?
            .into_iter()
            .filter(|o| o.lead_id == lead_id)
            .collect())
    }

    pub fn update_opportunity(&mut self, opp: &mut Opportunity) -> Result<bool, StoreError> {
        let rows = self.table_rows(OPPS_TABLE)?;
        let Some(idx) = Self::find_row(&rows, &opp.opp_id) else {
            return Ok(false);
        };
        // closed_at fires exactly once per transition into a terminal stage,
        // whichever update path the caller took.
        let prior = Opportunity::from_row(&rows[idx]);
        if opp.stage.is_terminal() && !prior.stage.is_terminal() {
            opp.closed_at = Some(Utc::now());
        }
        opp.updated_at = Utc::now();
        let row = opp.to_row();
        self.store
            .update_row(&self.workbook, OPPS_TABLE, idx + 1, &row)?;
        self.patch_update(OPPS_TABLE, idx, row);
        Ok(true)
    }

    pub fn move_opportunity_stage(
        &mut self,
        opp_id: &str,
        new_stage: PipelineStage,
    ) -> Result<bool, StoreError> {
        let Some(mut opp) = self.opportunity(opp_id)? else {
            return Ok(false);
        };
        opp.stage = new_stage;
        self.update_opportunity(&mut opp)
    }

    pub fn delete_opportunity(&mut self, opp_id: &str) -> Result<bool, StoreError> {
        let rows = self.table_rows(OPPS_TABLE)?;
        let Some(idx) = Self::find_row(&rows, opp_id) else {
            return Ok(false);
        };
        self.store.delete_row(&self.workbook, OPPS_TABLE, idx + 1)?;
        self.patch_delete(OPPS_TABLE, idx);
        Ok(true)
    }

    // --- Activities ---

    pub fn log_activity(&mut self, activity: Activity) -> Result<Activity, StoreError> {
        let row = activity.to_row();
        self.append_with_provision(ACTIVITIES_TABLE, Activity::headers(), &row)?;
        self.patch_append(ACTIVITIES_TABLE, row);
        Ok(activity)
    }

    pub fn activities(
        &mut self,
        lead_id: Option<&str>,
        opp_id: Option<&str>,
    ) -> Result<Vec<Activity>, StoreError> {
        let rows = self.table_rows(ACTIVITIES_TABLE)?;
        let mut activities = Self::decode_table(&rows, Activity::from_row);
        if let Some(id) = lead_id {
            activities.retain(|a| a.lead_id == id);
        }
        if let Some(id) = opp_id {
            activities.retain(|a| a.opp_id.as_deref() == Some(id));
        }
        Ok(activities)
    }

    // --- Bulk import (seed/load utilities) ---

    pub fn import_leads(&mut self, leads: &[Lead]) -> Result<(), StoreError> {
        let rows: Vec<Vec<String>> = leads.iter().map(Lead::to_row).collect();
        self.bulk_append(LEADS_TABLE, Lead::headers(), &rows)
    }

    pub fn import_opportunities(&mut self, opps: &[Opportunity]) -> Result<(), StoreError> {
        let rows: Vec<Vec<String>> = opps.iter().map(Opportunity::to_row).collect();
        self.bulk_append(OPPS_TABLE, Opportunity::headers(), &rows)
    }

    pub fn import_activities(&mut self, activities: &[Activity]) -> Result<(), StoreError> {
        let rows: Vec<Vec<String>> = activities.iter().map(Activity::to_row).collect();
        self.bulk_append(ACTIVITIES_TABLE, Activity::headers(), &rows)
    }

    fn bulk_append(
        &mut self,
        table: &'static str,
        headers: Vec<String>,
        rows: &[Vec<String>],
    ) -> Result<(), StoreError> {
        match self.store.append_rows(&self.workbook, table, rows) {
            Err(StoreError::TableNotFound(_)) => {
                self.store.create_table(&self.workbook, table, &headers)?;
                self.store.append_rows(&self.workbook, table, rows)?;
            }
            other => other?,
        }
        self.invalidate(table);
        Ok(())
    }

    // --- Schema migration ---

    /// One-time in-place upgrade of a legacy 13-column Leads table to the
    /// current 19-column layout. Returns the number of rows rewritten; 0 when
    /// the table is already current.
    pub fn migrate_leads_table(&mut self) -> Result<usize, StoreError> {
        let rows = match self.store.read_all(&self.workbook, LEADS_TABLE) {
            Ok(rows) => rows,
            Err(StoreError::TableNotFound(_)) => return Ok(0),
            Err(e) => return Err(e),
        };
        let legacy_header = rows
            .first()
            .map(|h| h.len() == LEAD_LEGACY_COLUMNS)
            .unwrap_or(false);
        if !legacy_header {
            return Ok(0);
        }

        self.store
            .update_row(&self.workbook, LEADS_TABLE, 1, &Lead::headers())?;
        let mut migrated = 0;
        for (i, row) in rows.iter().enumerate().skip(1) {
            if row.len() != LEAD_LEGACY_COLUMNS {
                continue;
            }
            let shifted = migrate_lead_row(row);
            self.store
                .update_row(&self.workbook, LEADS_TABLE, i + 1, &shifted)?;
            migrated += 1;
        }
        self.invalidate(LEADS_TABLE);
        log::info!("migrated {migrated} legacy lead rows");
        Ok(migrated)
    }

    // --- Pipeline summary ---

    /// Derived aggregate view; pure function of both tables, recomputed on
    /// every call.
    pub fn pipeline_summary(&mut self) -> Result<PipelineSummary, StoreError> {
        let opps = self.opportunities()?;
        let leads = self.leads()?;

        let pipeline_by_stage = PipelineStage::ALL
            .iter()
            .map(|&stage| {
                let stage_opps: Vec<&Opportunity> =
                    opps.iter().filter(|o| o.stage == stage).collect();
                StageSummary {
                    stage,
                    count: stage_opps.len(),
                    total_value: stage_opps.iter().map(|o| o.value).sum(),
                    expected_value: stage_opps.iter().map(|o| o.expected_value()).sum(),
                }
            })
            .collect();

        let leads_by_status = LeadStatus::ALL
            .iter()
            .map(|&status| StatusSummary {
                status,
                count: leads.iter().filter(|l| l.status == status).count(),
            })
            .collect();

        Ok(PipelineSummary {
            total_leads: leads.len(),
            total_opportunities: opps.len(),
            total_pipeline_value: opps
                .iter()
                .filter(|o| o.stage != PipelineStage::ClosedLost)
                .map(|o| o.value)
                .sum(),
            total_expected_value: opps.iter().map(|o| o.expected_value()).sum(),
            closed_won_value: opps
                .iter()
                .filter(|o| o.stage == PipelineStage::ClosedWon)
                .map(|o| o.value)
                .sum(),
            cash_in_bank: opps
                .iter()
                .filter(|o| o.stage == PipelineStage::CashInBank)
                .map(|o| o.value)
                .sum(),
            pipeline_by_stage,
            leads_by_status,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub stage: PipelineStage,
    pub count: usize,
    pub total_value: f64,
    pub expected_value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub status: LeadStatus,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub total_leads: usize,
    pub total_opportunities: usize,
    pub total_pipeline_value: f64,
    pub total_expected_value: f64,
    pub closed_won_value: f64,
    pub cash_in_bank: f64,
    pub pipeline_by_stage: Vec<StageSummary>,
    pub leads_by_status: Vec<StatusSummary>,
}

#[cfg(test)]
impl PipelineSummary {
    fn stage(&self, stage: PipelineStage) -> &StageSummary {
        self.pipeline_by_stage
            .iter()
            .find(|s| s.stage == stage)
            .expect("every stage is present")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalStore;
    use crate::store::WorkbookInfo;
    use std::cell::Cell;
    use std::rc::Rc;

    /// LocalStore wrapper that counts remote reads, to prove cache behavior.
    struct CountingStore {
        inner: LocalStore,
        reads: Rc<Cell<usize>>,
    }

    impl TableBackend for CountingStore {
        fn list_workbooks(&self) -> Result<Vec<WorkbookInfo>, StoreError> {
            self.inner.list_workbooks()
        }
        fn open(&self, reference: &str) -> Result<WorkbookHandle, StoreError> {
            self.inner.open(reference)
        }
        fn create_workbook(&self, title: &str) -> Result<WorkbookHandle, StoreError> {
            self.inner.create_workbook(title)
        }
        fn read_all(
            &self,
            wb: &WorkbookHandle,
            table: &str,
        ) -> Result<Vec<Vec<String>>, StoreError> {
            self.reads.set(self.reads.get() + 1);
            self.inner.read_all(wb, table)
        }
        fn append_row(
            &self,
            wb: &WorkbookHandle,
            table: &str,
            row: &[String],
        ) -> Result<(), StoreError> {
            self.inner.append_row(wb, table, row)
        }
        fn append_rows(
            &self,
            wb: &WorkbookHandle,
            table: &str,
            rows: &[Vec<String>],
        ) -> Result<(), StoreError> {
            self.inner.append_rows(wb, table, rows)
        }
        fn update_row(
            &self,
            wb: &WorkbookHandle,
            table: &str,
            row_index: usize,
            row: &[String],
        ) -> Result<(), StoreError> {
            self.inner.update_row(wb, table, row_index, row)
        }
        fn delete_row(
            &self,
            wb: &WorkbookHandle,
            table: &str,
            row_index: usize,
        ) -> Result<(), StoreError> {
            self.inner.delete_row(wb, table, row_index)
        }
        fn clear_range(
            &self,
            wb: &WorkbookHandle,
            table: &str,
            range: &str,
        ) -> Result<(), StoreError> {
            self.inner.clear_range(wb, table, range)
        }
        fn create_table(
            &self,
            wb: &WorkbookHandle,
            table: &str,
            headers: &[String],
        ) -> Result<(), StoreError> {
            self.inner.create_table(wb, table, headers)
        }
    }

    fn provisioned_crm() -> Crm {
        let store = LocalStore::new();
        let wb = store.create_workbook(DEFAULT_WORKBOOK).unwrap();
        let mut crm = Crm::new(Box::new(store), wb);
        crm.provision().unwrap();
        crm
    }

    fn counting_crm() -> (Crm, Rc<Cell<usize>>) {
        let reads = Rc::new(Cell::new(0));
        let store = CountingStore {
            inner: LocalStore::new(),
            reads: Rc::clone(&reads),
        };
        let wb = store.create_workbook(DEFAULT_WORKBOOK).unwrap();
        let mut crm = Crm::new(Box::new(store), wb);
        crm.provision().unwrap();
        (crm, reads)
    }

    #[test]
    fn test_add_then_get_within_ttl() {
        let mut crm = provisioned_crm();
        let lead = crm.add_lead(Lead::new("Acme", "Jane")).unwrap();
        let fetched = crm.lead(&lead.lead_id).unwrap().unwrap();
        assert_eq!(fetched, lead);
        assert_eq!(fetched.created_at, fetched.updated_at);
    }

    #[test]
    fn test_update_visible_without_remote_reread() {
        let (mut crm, reads) = counting_crm();
        let lead = crm.add_lead(Lead::new("Acme", "Jane")).unwrap();

        // warm the cache
        let mut fetched = crm.lead(&lead.lead_id).unwrap().unwrap();
        let reads_after_warm = reads.get();

        fetched.status = LeadStatus::Qualified;
        fetched.notes = Some("Ready for proposal".to_string());
        assert!(crm.update_lead(&mut fetched).unwrap());

        let again = crm.lead(&lead.lead_id).unwrap().unwrap();
        assert_eq!(again.status, LeadStatus::Qualified);
        assert_eq!(again.notes.as_deref(), Some("Ready for proposal"));
        assert!(again.updated_at >= again.created_at);
        // the post-update read was served from the patched cache
        assert_eq!(reads.get(), reads_after_warm);
    }

    #[test]
    fn test_stale_cache_refetches_after_ttl() {
        let (mut crm, reads) = counting_crm();
        crm.ttl = Duration::ZERO;
        crm.leads().unwrap();
        crm.leads().unwrap();
        assert_eq!(reads.get(), 2);
    }

    #[test]
    fn test_update_missing_id_returns_false() {
        let mut crm = provisioned_crm();
        let mut lead = Lead::new("Ghost", "Nobody");
        assert!(!crm.update_lead(&mut lead).unwrap());
        let mut opp = Opportunity::new("none", "Ghost deal");
        assert!(!crm.update_opportunity(&mut opp).unwrap());
    }

    #[test]
    fn test_delete_missing_id_returns_false() {
        let mut crm = provisioned_crm();
        assert!(!crm.delete_lead("zzzzzzzz").unwrap());
        assert!(!crm.delete_opportunity("zzzzzzzz").unwrap());
    }

    #[test]
    fn test_delete_removes_from_cache_and_store() {
        let mut crm = provisioned_crm();
        let a = crm.add_lead(Lead::new("A", "a")).unwrap();
        let b = crm.add_lead(Lead::new("B", "b")).unwrap();
        assert!(crm.delete_lead(&a.lead_id).unwrap());
        let remaining = crm.leads().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].lead_id, b.lead_id);
        assert!(crm.lead(&a.lead_id).unwrap().is_none());
    }

    #[test]
    fn test_blank_rows_are_skipped() {
        let mut crm = provisioned_crm();
        crm.add_lead(Lead::new("Acme", "Jane")).unwrap();
        let wb = crm.workbook.clone();
        crm.store
            .append_row(&wb, LEADS_TABLE, &[String::new()])
            .unwrap();
        crm.add_lead(Lead::new("Globex", "Hank")).unwrap();
        crm.invalidate(LEADS_TABLE);
        assert_eq!(crm.leads().unwrap().len(), 2);
    }

    #[test]
    fn test_read_missing_table_degrades_to_empty() {
        let store = LocalStore::new();
        let wb = store.create_workbook("Fresh").unwrap();
        let mut crm = Crm::new(Box::new(store), wb);
        assert!(crm.leads().unwrap().is_empty());
        assert!(crm.opportunities().unwrap().is_empty());
        assert!(crm.activities(None, None).unwrap().is_empty());
    }

    #[test]
    fn test_write_missing_table_provisions_then_appends() {
        let store = LocalStore::new();
        let wb = store.create_workbook("Fresh").unwrap();
        let mut crm = Crm::new(Box::new(store), wb);
        let lead = crm.add_lead(Lead::new("Acme", "Jane")).unwrap();
        let leads = crm.leads().unwrap();
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].lead_id, lead.lead_id);

        // header row landed first
        let rows = crm.store.read_all(&crm.workbook, LEADS_TABLE).unwrap();
        assert_eq!(rows[0], Lead::headers());
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_stage_transition_stamps_closed_at_once() {
        let mut crm = provisioned_crm();
        crm.add_lead(Lead::new("Acme", "Jane")).unwrap();
        let mut opp = Opportunity::new("lead0001", "Big deal");
        opp.value = 1000.0;
        let opp = crm.add_opportunity(opp).unwrap();
        let created_at = opp.created_at;

        assert!(crm
            .move_opportunity_stage(&opp.opp_id, PipelineStage::Discovery)
            .unwrap());
        assert!(crm.opportunity(&opp.opp_id).unwrap().unwrap().closed_at.is_none());

        assert!(crm
            .move_opportunity_stage(&opp.opp_id, PipelineStage::ClosedWon)
            .unwrap());
        let closed = crm.opportunity(&opp.opp_id).unwrap().unwrap();
        let stamp = closed.closed_at.expect("closed_at set");
        assert!(stamp >= created_at);

        // moving onward to another stage keeps the original stamp
        assert!(crm
            .move_opportunity_stage(&opp.opp_id, PipelineStage::Delivery)
            .unwrap());
        let delivered = crm.opportunity(&opp.opp_id).unwrap().unwrap();
        assert_eq!(delivered.closed_at, Some(stamp));
    }

    #[test]
    fn test_stage_transition_missing_opp_returns_false() {
        let mut crm = provisioned_crm();
        assert!(!crm
            .move_opportunity_stage("missing1", PipelineStage::ClosedWon)
            .unwrap());
    }

    #[test]
    fn test_activities_filtering() {
        let mut crm = provisioned_crm();
        let mut a1 = Activity::new("lead0001", "Call with Jane");
        a1.opp_id = Some("opp00001".to_string());
        crm.log_activity(a1).unwrap();
        crm.log_activity(Activity::new("lead0001", "Sent brochure")).unwrap();
        crm.log_activity(Activity::new("lead0002", "Intro email")).unwrap();

        assert_eq!(crm.activities(None, None).unwrap().len(), 3);
        assert_eq!(crm.activities(Some("lead0001"), None).unwrap().len(), 2);
        assert_eq!(
            crm.activities(Some("lead0001"), Some("opp00001")).unwrap().len(),
            1
        );
        assert_eq!(crm.activities(Some("lead0003"), None).unwrap().len(), 0);
    }

    #[test]
    fn test_pipeline_summary_sums() {
        let mut crm = provisioned_crm();
        let mut lead = Lead::new("Acme", "Jane");
        lead.status = LeadStatus::Qualified;
        crm.add_lead(lead).unwrap();
        crm.add_lead(Lead::new("Globex", "Hank")).unwrap();

        let deals = [
            (PipelineStage::Prospecting, 1000.0, 10),
            (PipelineStage::Prospecting, 2000.0, 20),
            (PipelineStage::ClosedWon, 5000.0, 100),
            (PipelineStage::ClosedLost, 700.0, 0),
            (PipelineStage::CashInBank, 3000.0, 100),
        ];
        for (stage, value, prob) in deals {
            let mut opp = Opportunity::new("lead0001", "Deal");
            opp.stage = stage;
            opp.value = value;
            opp.probability = prob;
            crm.add_opportunity(opp).unwrap();
        }

        let summary = crm.pipeline_summary().unwrap();
        assert_eq!(summary.total_leads, 2);
        assert_eq!(summary.total_opportunities, 5);

        let prospecting = summary.stage(PipelineStage::Prospecting);
        assert_eq!(prospecting.count, 2);
        assert_eq!(prospecting.total_value, 3000.0);
        assert_eq!(prospecting.expected_value, 100.0 + 400.0);

        assert_eq!(summary.stage(PipelineStage::Discovery).count, 0);
        // Closed Lost value excluded from the pipeline total
        assert_eq!(summary.total_pipeline_value, 1000.0 + 2000.0 + 5000.0 + 3000.0);
        assert_eq!(summary.closed_won_value, 5000.0);
        assert_eq!(summary.cash_in_bank, 3000.0);
        assert_eq!(
            summary.total_expected_value,
            100.0 + 400.0 + 5000.0 + 0.0 + 3000.0
        );

        let qualified = summary
            .leads_by_status
            .iter()
            .find(|s| s.status == LeadStatus::Qualified)
            .unwrap();
        assert_eq!(qualified.count, 1);
    }

    #[test]
    fn test_migrate_leads_table_rewrites_legacy_rows() {
        let store = LocalStore::new();
        let wb = store.create_workbook(DEFAULT_WORKBOOK).unwrap();

        // build a legacy 13-column table by hand
        let full = Lead::headers();
        let mut legacy_header = full[..10].to_vec();
        legacy_header.extend_from_slice(&full[16..]);
        assert_eq!(legacy_header.len(), LEAD_LEGACY_COLUMNS);
        store.create_table(&wb, LEADS_TABLE, &legacy_header).unwrap();

        let lead = Lead::new("Oldco", "Maria");
        let current = lead.to_row();
        let mut legacy_row = current[..10].to_vec();
        legacy_row.extend_from_slice(&current[16..]);
        store.append_row(&wb, LEADS_TABLE, &legacy_row).unwrap();

        let mut crm = Crm::new(Box::new(store), wb);
        assert_eq!(crm.migrate_leads_table().unwrap(), 1);
        // second run is a no-op
        assert_eq!(crm.migrate_leads_table().unwrap(), 0);

        let rows = crm.store.read_all(&crm.workbook, LEADS_TABLE).unwrap();
        assert_eq!(rows[0], Lead::headers());
        assert_eq!(rows[1].len(), current.len());
        let decoded = crm.lead(&lead.lead_id).unwrap().unwrap();
        assert_eq!(decoded.company_name, "Oldco");
        assert_eq!(decoded.owner, lead.owner);
        assert_eq!(decoded.website, None);
    }

    #[test]
    fn test_bulk_import_provisions_and_invalidates() {
        let store = LocalStore::new();
        let wb = store.create_workbook("Fresh").unwrap();
        let mut crm = Crm::new(Box::new(store), wb);
        let leads = vec![Lead::new("A", "a"), Lead::new("B", "b")];
        crm.import_leads(&leads).unwrap();
        assert_eq!(crm.leads().unwrap().len(), 2);
    }
}
