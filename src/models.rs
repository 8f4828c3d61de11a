use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Short opaque id, 8 hex chars. Collision odds are negligible at CRM scale,
/// so there is no retry-on-collision.
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

// --- Enums ---
//
// Every enum stores its canonical label in the sheet. Decoding is safe: an
// unknown or empty label falls back to the documented default instead of
// failing, so legacy rows never abort a table read.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Unqualified,
    Lost,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 5] = [
        LeadStatus::New,
        LeadStatus::Contacted,
        LeadStatus::Qualified,
        LeadStatus::Unqualified,
        LeadStatus::Lost,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            LeadStatus::New => "New",
            LeadStatus::Contacted => "Contacted",
            LeadStatus::Qualified => "Qualified",
            LeadStatus::Unqualified => "Unqualified",
            LeadStatus::Lost => "Lost",
        }
    }

    pub fn from_label(s: &str) -> Option<LeadStatus> {
        Self::ALL.iter().copied().find(|v| v.label() == s.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadSource {
    Website,
    Referral,
    #[serde(rename = "Cold Outreach")]
    ColdOutreach,
    Event,
    LinkedIn,
    Other,
}

impl LeadSource {
    pub const ALL: [LeadSource; 6] = [
        LeadSource::Website,
        LeadSource::Referral,
        LeadSource::ColdOutreach,
        LeadSource::Event,
        LeadSource::LinkedIn,
        LeadSource::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            LeadSource::Website => "Website",
            LeadSource::Referral => "Referral",
            LeadSource::ColdOutreach => "Cold Outreach",
            LeadSource::Event => "Event",
            LeadSource::LinkedIn => "LinkedIn",
            LeadSource::Other => "Other",
        }
    }

    pub fn from_label(s: &str) -> Option<LeadSource> {
        Self::ALL.iter().copied().find(|v| v.label() == s.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompanySize {
    #[serde(rename = "1-10")]
    Tiny,
    #[serde(rename = "11-50")]
    Small,
    #[serde(rename = "51-200")]
    Medium,
    #[serde(rename = "201-500")]
    Large,
    #[serde(rename = "500+")]
    Enterprise,
}

impl CompanySize {
    pub const ALL: [CompanySize; 5] = [
        CompanySize::Tiny,
        CompanySize::Small,
        CompanySize::Medium,
        CompanySize::Large,
        CompanySize::Enterprise,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CompanySize::Tiny => "1-10",
            CompanySize::Small => "11-50",
            CompanySize::Medium => "51-200",
            CompanySize::Large => "201-500",
            CompanySize::Enterprise => "500+",
        }
    }

    pub fn from_label(s: &str) -> Option<CompanySize> {
        Self::ALL.iter().copied().find(|v| v.label() == s.trim())
    }
}

/// Sales pipeline stages, from first contact to cash in bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Prospecting,
    Discovery,
    Proposal,
    Negotiation,
    #[serde(rename = "Closed Won")]
    ClosedWon,
    #[serde(rename = "Closed Lost")]
    ClosedLost,
    Delivery,
    Invoicing,
    Invoiced,
    #[serde(rename = "Cash in Bank")]
    CashInBank,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 10] = [
        PipelineStage::Prospecting,
        PipelineStage::Discovery,
        PipelineStage::Proposal,
        PipelineStage::Negotiation,
        PipelineStage::ClosedWon,
        PipelineStage::ClosedLost,
        PipelineStage::Delivery,
        PipelineStage::Invoicing,
        PipelineStage::Invoiced,
        PipelineStage::CashInBank,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PipelineStage::Prospecting => "Prospecting",
            PipelineStage::Discovery => "Discovery",
            PipelineStage::Proposal => "Proposal",
            PipelineStage::Negotiation => "Negotiation",
            PipelineStage::ClosedWon => "Closed Won",
            PipelineStage::ClosedLost => "Closed Lost",
            PipelineStage::Delivery => "Delivery",
            PipelineStage::Invoicing => "Invoicing",
            PipelineStage::Invoiced => "Invoiced",
            PipelineStage::CashInBank => "Cash in Bank",
        }
    }

    pub fn from_label(s: &str) -> Option<PipelineStage> {
        Self::ALL.iter().copied().find(|v| v.label() == s.trim())
    }

    /// Stages that end the active sales process. Moving into one of these
    /// stamps `closed_at` on the opportunity.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStage::ClosedWon | PipelineStage::ClosedLost | PipelineStage::CashInBank
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityType {
    Call,
    Email,
    Meeting,
    Note,
    Task,
}

impl ActivityType {
    pub const ALL: [ActivityType; 5] = [
        ActivityType::Call,
        ActivityType::Email,
        ActivityType::Meeting,
        ActivityType::Note,
        ActivityType::Task,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ActivityType::Call => "Call",
            ActivityType::Email => "Email",
            ActivityType::Meeting => "Meeting",
            ActivityType::Note => "Note",
            ActivityType::Task => "Task",
        }
    }

    pub fn from_label(s: &str) -> Option<ActivityType> {
        Self::ALL.iter().copied().find(|v| v.label() == s.trim())
    }
}

/// Lifecycle of the background enrichment job for a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrichmentStatus {
    New,
    Enriching,
    Completed,
    Failed,
}

impl EnrichmentStatus {
    pub const ALL: [EnrichmentStatus; 4] = [
        EnrichmentStatus::New,
        EnrichmentStatus::Enriching,
        EnrichmentStatus::Completed,
        EnrichmentStatus::Failed,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            EnrichmentStatus::New => "New",
            EnrichmentStatus::Enriching => "Enriching",
            EnrichmentStatus::Completed => "Completed",
            EnrichmentStatus::Failed => "Failed",
        }
    }

    pub fn from_label(s: &str) -> Option<EnrichmentStatus> {
        Self::ALL.iter().copied().find(|v| v.label() == s.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeatLevel {
    Cold,
    Warm,
    Hot,
}

impl HeatLevel {
    pub const ALL: [HeatLevel; 3] = [HeatLevel::Cold, HeatLevel::Warm, HeatLevel::Hot];

    pub fn label(&self) -> &'static str {
        match self {
            HeatLevel::Cold => "Cold",
            HeatLevel::Warm => "Warm",
            HeatLevel::Hot => "Hot",
        }
    }

    pub fn from_label(s: &str) -> Option<HeatLevel> {
        Self::ALL.iter().copied().find(|v| v.label() == s.trim())
    }
}

// --- Cell decode helpers ---
//
// Sheets hand back loosely typed strings. Every helper degrades instead of
// failing: bad numbers become 0, bad dates become None, and the caller picks
// "now" for required timestamps.

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

fn opt_cell(row: &[String], idx: usize) -> Option<String> {
    let v = cell(row, idx).trim();
    if v.is_empty() { None } else { Some(v.to_string()) }
}

/// Parse a currency-ish cell: strips `$` and thousands separators.
pub fn parse_money(s: &str) -> f64 {
    let clean: String = s.chars().filter(|c| *c != ',' && *c != '$').collect();
    clean.trim().parse::<f64>().unwrap_or(0.0)
}

pub fn parse_int(s: &str) -> i64 {
    // Sheets sometimes stores "50.0" for integer cells
    parse_money(s) as i64
}

pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let trimmed = s.trim();
    if trimmed.len() < 10 {
        return None;
    }
    NaiveDate::parse_from_str(&trimmed[..10], "%Y-%m-%d").ok()
}

fn encode_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// --- Lead ---

/// Lead schema v2: 19 columns. The legacy v1 layout had 13 columns; the six
/// enrichment columns (website..heat_level) were inserted at index 10, pushing
/// created_at/updated_at/owner right. `migrate_lead_row` performs that shift.
pub const LEAD_COLUMNS: usize = 19;
pub const LEAD_LEGACY_COLUMNS: usize = 13;
const LEAD_SHIFT_AT: usize = 10;
const LEAD_SHIFT_WIDTH: usize = 6;

/// Shift a legacy 13-column lead row into the current 19-column layout.
/// Only fires on an exact legacy column count; anything else passes through.
pub fn migrate_lead_row(row: &[String]) -> Vec<String> {
    if row.len() != LEAD_LEGACY_COLUMNS {
        return row.to_vec();
    }
    let mut out = row[..LEAD_SHIFT_AT].to_vec();
    out.extend(std::iter::repeat_n(String::new(), LEAD_SHIFT_WIDTH));
    out.extend_from_slice(&row[LEAD_SHIFT_AT..]);
    out
}

/// A sales lead - typically a company plus its primary contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub lead_id: String,
    pub company_name: String,
    pub contact_name: String,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub status: LeadStatus,
    pub source: LeadSource,
    pub industry: Option<String>,
    pub company_size: Option<CompanySize>,
    pub notes: Option<String>,
    pub website: Option<String>,
    pub linkedin_url: Option<String>,
    pub logo_url: Option<String>,
    pub enrichment_status: EnrichmentStatus,
    pub score: i64,
    pub heat_level: Option<HeatLevel>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner: Option<String>,
}

impl Lead {
    pub fn new(company_name: &str, contact_name: &str) -> Lead {
        let now = Utc::now();
        Lead {
            lead_id: generate_id(),
            company_name: company_name.to_string(),
            contact_name: contact_name.to_string(),
            contact_email: None,
            contact_phone: None,
            status: LeadStatus::New,
            source: LeadSource::Other,
            industry: None,
            company_size: None,
            notes: None,
            website: None,
            linkedin_url: None,
            logo_url: None,
            enrichment_status: EnrichmentStatus::New,
            score: 0,
            heat_level: None,
            created_at: now,
            updated_at: now,
            owner: None,
        }
    }

    pub fn headers() -> Vec<String> {
        [
            "lead_id",
            "company_name",
            "contact_name",
            "contact_email",
            "contact_phone",
            "status",
            "source",
            "industry",
            "company_size",
            "notes",
            "website",
            "linkedin_url",
            "logo_url",
            "enrichment_status",
            "score",
            "heat_level",
            "created_at",
            "updated_at",
            "owner",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.lead_id.clone(),
            self.company_name.clone(),
            self.contact_name.clone(),
            self.contact_email.clone().unwrap_or_default(),
            self.contact_phone.clone().unwrap_or_default(),
            self.status.label().to_string(),
            self.source.label().to_string(),
            self.industry.clone().unwrap_or_default(),
            self.company_size.map(|s| s.label().to_string()).unwrap_or_default(),
            self.notes.clone().unwrap_or_default(),
            self.website.clone().unwrap_or_default(),
            self.linkedin_url.clone().unwrap_or_default(),
            self.logo_url.clone().unwrap_or_default(),
            self.enrichment_status.label().to_string(),
            self.score.to_string(),
            self.heat_level.map(|h| h.label().to_string()).unwrap_or_default(),
            encode_datetime(&self.created_at),
            encode_datetime(&self.updated_at),
            self.owner.clone().unwrap_or_default(),
        ]
    }

    pub fn from_row(row: &[String]) -> Lead {
        let migrated = migrate_lead_row(row);
        match Self::decode(&migrated) {
            Some(lead) => lead,
            None => {
                // Best-effort minimal record so one corrupt row never aborts a
                // full-table read. Callers can spot the sentinel company name.
                log::warn!("failed to decode lead row: {:?}", &row[..row.len().min(3)]);
                let mut lead = Lead::new("Parse Error", cell(row, 2));
                lead.lead_id = if cell(row, 0).is_empty() {
                    "unknown".to_string()
                } else {
                    cell(row, 0).to_string()
                };
                lead
            }
        }
    }

    fn decode(row: &[String]) -> Option<Lead> {
        if row.len() < 2 {
            return None;
        }
        let now = Utc::now();
        Some(Lead {
            lead_id: cell(row, 0).to_string(),
            company_name: cell(row, 1).to_string(),
            contact_name: cell(row, 2).to_string(),
            contact_email: opt_cell(row, 3),
            contact_phone: opt_cell(row, 4),
            status: LeadStatus::from_label(cell(row, 5)).unwrap_or(LeadStatus::New),
            source: LeadSource::from_label(cell(row, 6)).unwrap_or(LeadSource::Other),
            industry: opt_cell(row, 7),
            company_size: CompanySize::from_label(cell(row, 8)),
            notes: opt_cell(row, 9),
            website: opt_cell(row, 10),
            linkedin_url: opt_cell(row, 11),
            logo_url: opt_cell(row, 12),
            enrichment_status: EnrichmentStatus::from_label(cell(row, 13))
                .unwrap_or(EnrichmentStatus::New),
            score: parse_int(cell(row, 14)),
            heat_level: HeatLevel::from_label(cell(row, 15)),
            created_at: parse_datetime(cell(row, 16)).unwrap_or(now),
            updated_at: parse_datetime(cell(row, 17)).unwrap_or(now),
            owner: opt_cell(row, 18),
        })
    }
}

// --- Opportunity ---

pub const OPP_COLUMNS: usize = 14;

/// A potential deal tied to a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub opp_id: String,
    pub lead_id: String,
    pub title: String,
    pub stage: PipelineStage,
    pub value: f64,
    pub probability: i64,
    pub close_date: Option<NaiveDate>,
    pub product: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub owner: Option<String>,
}

impl Opportunity {
    pub fn new(lead_id: &str, title: &str) -> Opportunity {
        let now = Utc::now();
        Opportunity {
            opp_id: generate_id(),
            lead_id: lead_id.to_string(),
            title: title.to_string(),
            stage: PipelineStage::Prospecting,
            value: 0.0,
            probability: 0,
            close_date: None,
            product: None,
            notes: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            owner: None,
        }
    }

    /// Probability-weighted value. Always recomputed; the persisted
    /// expected_value column exists only for sheet-native formulas.
    pub fn expected_value(&self) -> f64 {
        self.value * (self.probability as f64 / 100.0)
    }

    pub fn headers() -> Vec<String> {
        [
            "opp_id",
            "lead_id",
            "title",
            "stage",
            "value",
            "probability",
            "expected_value",
            "close_date",
            "product",
            "notes",
            "created_at",
            "updated_at",
            "closed_at",
            "owner",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.opp_id.clone(),
            self.lead_id.clone(),
            self.title.clone(),
            self.stage.label().to_string(),
            self.value.to_string(),
            self.probability.to_string(),
            self.expected_value().to_string(),
            self.close_date.map(|d| d.to_string()).unwrap_or_default(),
            self.product.clone().unwrap_or_default(),
            self.notes.clone().unwrap_or_default(),
            encode_datetime(&self.created_at),
            encode_datetime(&self.updated_at),
            self.closed_at.as_ref().map(encode_datetime).unwrap_or_default(),
            self.owner.clone().unwrap_or_default(),
        ]
    }

    pub fn from_row(row: &[String]) -> Opportunity {
        match Self::decode(row) {
            Some(opp) => opp,
            None => {
                log::warn!(
                    "failed to decode opportunity row: {:?}",
                    &row[..row.len().min(3)]
                );
                let mut opp = Opportunity::new(cell(row, 1), "Parse Error");
                opp.opp_id = if cell(row, 0).is_empty() {
                    "unknown".to_string()
                } else {
                    cell(row, 0).to_string()
                };
                opp
            }
        }
    }

    fn decode(row: &[String]) -> Option<Opportunity> {
        if row.len() < 2 {
            return None;
        }
        let now = Utc::now();
        Some(Opportunity {
            opp_id: cell(row, 0).to_string(),
            lead_id: cell(row, 1).to_string(),
            title: cell(row, 2).to_string(),
            stage: PipelineStage::from_label(cell(row, 3)).unwrap_or(PipelineStage::Prospecting),
            value: parse_money(cell(row, 4)),
            probability: parse_int(cell(row, 5)),
            // column 6 is the denormalized expected_value, skipped
            close_date: parse_date(cell(row, 7)),
            product: opt_cell(row, 8),
            notes: opt_cell(row, 9),
            created_at: parse_datetime(cell(row, 10)).unwrap_or(now),
            updated_at: parse_datetime(cell(row, 11)).unwrap_or(now),
            closed_at: parse_datetime(cell(row, 12)),
            owner: opt_cell(row, 13),
        })
    }
}

// --- Activity ---

pub const ACTIVITY_COLUMNS: usize = 8;

/// An activity log entry. Append-only: there is no update operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub activity_id: String,
    pub lead_id: String,
    pub opp_id: Option<String>,
    pub activity_type: ActivityType,
    pub subject: String,
    pub description: Option<String>,
    pub date: DateTime<Utc>,
    pub created_by: Option<String>,
}

impl Activity {
    pub fn new(lead_id: &str, subject: &str) -> Activity {
        Activity {
            activity_id: generate_id(),
            lead_id: lead_id.to_string(),
            opp_id: None,
            activity_type: ActivityType::Note,
            subject: subject.to_string(),
            description: None,
            date: Utc::now(),
            created_by: None,
        }
    }

    pub fn headers() -> Vec<String> {
        [
            "activity_id",
            "lead_id",
            "opp_id",
            "type",
            "subject",
            "description",
            "date",
            "created_by",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.activity_id.clone(),
            self.lead_id.clone(),
            self.opp_id.clone().unwrap_or_default(),
            self.activity_type.label().to_string(),
            self.subject.clone(),
            self.description.clone().unwrap_or_default(),
            encode_datetime(&self.date),
            self.created_by.clone().unwrap_or_default(),
        ]
    }

    pub fn from_row(row: &[String]) -> Activity {
        Activity {
            activity_id: cell(row, 0).to_string(),
            lead_id: cell(row, 1).to_string(),
            opp_id: opt_cell(row, 2),
            activity_type: ActivityType::from_label(cell(row, 3)).unwrap_or(ActivityType::Note),
            subject: cell(row, 4).to_string(),
            description: opt_cell(row, 5),
            date: parse_datetime(cell(row, 6)).unwrap_or_else(Utc::now),
            created_by: opt_cell(row, 7),
        }
    }
}
