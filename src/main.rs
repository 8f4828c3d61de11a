mod ai;
mod auth;
mod crm;
mod local;
mod models;
mod retry;
mod seed;
mod sessions;
mod store;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use chrono::NaiveDate;

use ai::{AiProvider, OpenAiProvider};
use crm::{Crm, DEFAULT_WORKBOOK};
use local::LocalStore;
use models::{
    Activity, ActivityType, Lead, LeadSource, LeadStatus, Opportunity, PipelineStage,
    EnrichmentStatus,
};
use sessions::SessionCache;
use store::{SheetsStore, StoreError, TableBackend};

#[derive(Parser)]
#[command(name = "sheetcrm")]
#[command(about = "Spreadsheet-backed CRM - leads, deals, and pipeline in a Google Sheet")]
struct Cli {
    /// Workbook name, URL, or id
    #[arg(short, long, default_value = DEFAULT_WORKBOOK, global = true)]
    sheet: String,

    /// Use the local JSON store instead of Google Sheets
    #[arg(long, global = true)]
    local: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the workbook and CRM tables
    Init,

    /// List accessible workbooks
    Sheets,

    /// Manage leads
    Lead {
        #[command(subcommand)]
        command: LeadCommands,
    },

    /// Manage opportunities
    Opp {
        #[command(subcommand)]
        command: OppCommands,
    },

    /// Log and list activities
    Activity {
        #[command(subcommand)]
        command: ActivityCommands,
    },

    /// Show the pipeline summary
    Pipeline {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load demo data into the workbook
    Seed {
        /// Number of leads to generate
        #[arg(short, long, default_value = "20")]
        leads: usize,
    },

    /// Upgrade a legacy Leads table to the current column layout
    Migrate,
}

#[derive(Subcommand)]
enum LeadCommands {
    /// Add a lead
    Add {
        /// Company name
        company: String,

        /// Contact name
        contact: String,

        #[arg(short, long)]
        email: Option<String>,

        #[arg(short, long)]
        phone: Option<String>,

        /// Lead source (Website, Referral, Cold Outreach, Event, LinkedIn, Other)
        #[arg(long)]
        source: Option<String>,

        #[arg(short, long)]
        notes: Option<String>,

        #[arg(short, long)]
        owner: Option<String>,
    },

    /// List leads
    List {
        /// Filter by status (New, Contacted, Qualified, Unqualified, Lost)
        #[arg(long)]
        status: Option<String>,
    },

    /// Show lead details
    Show {
        /// Lead ID
        id: String,
    },

    /// Update lead fields
    Update {
        /// Lead ID
        id: String,

        #[arg(long)]
        status: Option<String>,

        #[arg(short, long)]
        notes: Option<String>,

        #[arg(short, long)]
        owner: Option<String>,
    },

    /// Delete a lead
    Delete {
        /// Lead ID
        id: String,
    },

    /// Enrich a lead with company data (website, LinkedIn, industry)
    Enrich {
        /// Lead ID
        id: String,
    },

    /// Score a lead and set its heat level
    Score {
        /// Lead ID
        id: String,
    },
}

#[derive(Subcommand)]
enum OppCommands {
    /// Add an opportunity for a lead
    Add {
        /// Lead ID
        lead_id: String,

        /// Deal title
        title: String,

        #[arg(short, long, default_value = "0")]
        value: f64,

        /// Win probability, 0-100
        #[arg(short, long, default_value = "50")]
        probability: i64,

        #[arg(long)]
        product: Option<String>,

        /// Expected close date (YYYY-MM-DD)
        #[arg(long)]
        close: Option<String>,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// List opportunities
    List {
        /// Filter by stage
        #[arg(long)]
        stage: Option<String>,

        /// Filter by lead ID
        #[arg(long)]
        lead: Option<String>,
    },

    /// Show opportunity details
    Show {
        /// Opportunity ID
        id: String,
    },

    /// Move an opportunity to a new pipeline stage
    Stage {
        /// Opportunity ID
        id: String,

        /// Target stage (Prospecting, Discovery, Proposal, Negotiation, Closed Won, ...)
        stage: String,
    },

    /// Update opportunity fields
    Update {
        /// Opportunity ID
        id: String,

        #[arg(short, long)]
        value: Option<f64>,

        #[arg(short, long)]
        probability: Option<i64>,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Delete an opportunity
    Delete {
        /// Opportunity ID
        id: String,
    },

    /// Analyze an opportunity for risk
    Analyze {
        /// Opportunity ID
        id: String,
    },
}

#[derive(Subcommand)]
enum ActivityCommands {
    /// Log an activity against a lead
    Log {
        /// Lead ID
        lead_id: String,

        /// Short subject line
        subject: String,

        /// Related opportunity ID
        #[arg(long)]
        opp: Option<String>,

        /// Activity type (Call, Email, Meeting, Note, Task)
        #[arg(short = 't', long = "type")]
        activity_type: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(long)]
        by: Option<String>,
    },

    /// List activities
    List {
        /// Filter by lead ID
        #[arg(long)]
        lead: Option<String>,

        /// Filter by opportunity ID
        #[arg(long)]
        opp: Option<String>,
    },
}

// --- Argument parsing helpers ---

fn parse_status(s: &str) -> Result<LeadStatus> {
    LeadStatus::from_label(s).ok_or_else(|| {
        anyhow!(
            "Unknown status '{}'. One of: {}",
            s,
            labels(&LeadStatus::ALL.map(|v| v.label()))
        )
    })
}

fn parse_source(s: &str) -> Result<LeadSource> {
    LeadSource::from_label(s).ok_or_else(|| {
        anyhow!(
            "Unknown source '{}'. One of: {}",
            s,
            labels(&LeadSource::ALL.map(|v| v.label()))
        )
    })
}

fn parse_stage(s: &str) -> Result<PipelineStage> {
    PipelineStage::from_label(s).ok_or_else(|| {
        anyhow!(
            "Unknown stage '{}'. One of: {}",
            s,
            labels(&PipelineStage::ALL.map(|v| v.label()))
        )
    })
}

fn parse_activity_type(s: &str) -> Result<ActivityType> {
    ActivityType::from_label(s).ok_or_else(|| {
        anyhow!(
            "Unknown activity type '{}'. One of: {}",
            s,
            labels(&ActivityType::ALL.map(|v| v.label()))
        )
    })
}

fn labels(all: &[&str]) -> String {
    all.join(", ")
}

fn parse_close_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))
}

// --- Backend selection ---

fn open_backend(use_local: bool) -> Result<Box<dyn TableBackend>> {
    if use_local {
        Ok(Box::new(LocalStore::with_path(auth::local_store_path())))
    } else {
        let token = auth::google_access_token()?;
        Ok(Box::new(SheetsStore::new(token)))
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let use_local = cli.local || std::env::var("SHEETCRM_LOCAL").is_ok();
    let backend = open_backend(use_local)?;

    match cli.command {
        Commands::Init => {
            let workbook = match backend.open(&cli.sheet) {
                Ok(wb) => wb,
                Err(StoreError::WorkbookNotFound(_)) => {
                    let wb = backend.create_workbook(&cli.sheet)?;
                    println!("Created workbook '{}'", wb.title);
                    wb
                }
                Err(e) => return Err(e.into()),
            };
            let mut crm = Crm::new(backend, workbook);
            crm.provision()?;
            println!("CRM tables ready in '{}'", cli.sheet);
            return Ok(());
        }
        Commands::Sheets => {
            let workbooks = backend.list_workbooks()?;
            if workbooks.is_empty() {
                println!("No workbooks found.");
            } else {
                println!("{:<46} {:<24} {}", "ID", "MODIFIED", "NAME");
                println!("{}", "-".repeat(90));
                for wb in workbooks {
                    println!("{:<46} {:<24} {}", wb.id, wb.modified_time, wb.name);
                }
            }
            return Ok(());
        }
        _ => {}
    }

    // one-shot today, but all commands go through the session cache so a
    // long-running caller gets bounded per-credential handles for free
    let mut sessions = SessionCache::default();
    let credential = if use_local { "local" } else { "google" };
    let key = SessionCache::key(credential, &cli.sheet);
    let crm = sessions
        .get_or_open(&key, || Crm::open(backend, &cli.sheet))
        .with_context(|| format!("Could not open '{}'. Run `sheetcrm init` first.", cli.sheet))?;

    match cli.command {
        Commands::Init | Commands::Sheets => unreachable!("handled above"),

        Commands::Lead { command } => match command {
            LeadCommands::Add {
                company,
                contact,
                email,
                phone,
                source,
                notes,
                owner,
            } => {
                let mut lead = Lead::new(&company, &contact);
                lead.contact_email = email;
                lead.contact_phone = phone;
                if let Some(s) = source {
                    lead.source = parse_source(&s)?;
                }
                lead.notes = notes;
                lead.owner = owner;
                let lead = crm.add_lead(lead)?;
                println!("Added lead {} ({})", lead.lead_id, lead.company_name);
            }
            LeadCommands::List { status } => {
                let filter = status.as_deref().map(parse_status).transpose()?;
                let mut leads = crm.leads()?;
                if let Some(status) = filter {
                    leads.retain(|l| l.status == status);
                }
                if leads.is_empty() {
                    println!("No leads found.");
                } else {
                    println!(
                        "{:<10} {:<12} {:<26} {:<20} {:>5} {:<6}",
                        "ID", "STATUS", "COMPANY", "CONTACT", "SCORE", "HEAT"
                    );
                    println!("{}", "-".repeat(84));
                    for lead in leads {
                        println!(
                            "{:<10} {:<12} {:<26} {:<20} {:>5} {:<6}",
                            lead.lead_id,
                            lead.status.label(),
                            truncate(&lead.company_name, 25),
                            truncate(&lead.contact_name, 19),
                            lead.score,
                            lead.heat_level.map(|h| h.label()).unwrap_or("-"),
                        );
                    }
                }
            }
            LeadCommands::Show { id } => match crm.lead(&id)? {
                Some(lead) => {
                    println!("Lead {}", lead.lead_id);
                    println!("Company: {}", lead.company_name);
                    println!("Contact: {}", lead.contact_name);
                    if let Some(email) = &lead.contact_email {
                        println!("Email: {}", email);
                    }
                    if let Some(phone) = &lead.contact_phone {
                        println!("Phone: {}", phone);
                    }
                    println!("Status: {}", lead.status.label());
                    println!("Source: {}", lead.source.label());
                    if let Some(industry) = &lead.industry {
                        println!("Industry: {}", industry);
                    }
                    if let Some(size) = lead.company_size {
                        println!("Company size: {}", size.label());
                    }
                    if let Some(website) = &lead.website {
                        println!("Website: {}", website);
                    }
                    if let Some(url) = &lead.linkedin_url {
                        println!("LinkedIn: {}", url);
                    }
                    println!("Enrichment: {}", lead.enrichment_status.label());
                    println!(
                        "Score: {} ({})",
                        lead.score,
                        lead.heat_level.map(|h| h.label()).unwrap_or("unscored")
                    );
                    if let Some(notes) = &lead.notes {
                        println!("Notes: {}", notes);
                    }
                    if let Some(owner) = &lead.owner {
                        println!("Owner: {}", owner);
                    }
                    println!("Created: {}", lead.created_at.format("%Y-%m-%d %H:%M"));
                    println!("Updated: {}", lead.updated_at.format("%Y-%m-%d %H:%M"));

                    let opps = crm.opportunities_for_lead(&id)?;
                    if !opps.is_empty() {
                        println!("\nOpportunities ({}):", opps.len());
                        for opp in opps {
                            println!(
                                "  {} - {} [{}] ${:.0}",
                                opp.opp_id,
                                opp.title,
                                opp.stage.label(),
                                opp.value
                            );
                        }
                    }
                }
                None => println!("Lead {} not found.", id),
            },
            LeadCommands::Update {
                id,
                status,
                notes,
                owner,
            } => match crm.lead(&id)? {
                Some(mut lead) => {
                    if let Some(s) = status {
                        lead.status = parse_status(&s)?;
                    }
                    if let Some(n) = notes {
                        lead.notes = Some(n);
                    }
                    if let Some(o) = owner {
                        lead.owner = Some(o);
                    }
                    if crm.update_lead(&mut lead)? {
                        println!("Updated lead {}", id);
                    } else {
                        println!("Lead {} not found.", id);
                    }
                }
                None => println!("Lead {} not found.", id),
            },
            LeadCommands::Delete { id } => {
                if crm.delete_lead(&id)? {
                    let orphaned = crm.opportunities_for_lead(&id)?;
                    println!("Deleted lead {}", id);
                    if !orphaned.is_empty() {
                        println!(
                            "Note: {} opportunities still reference this lead.",
                            orphaned.len()
                        );
                    }
                } else {
                    println!("Lead {} not found.", id);
                }
            }
            LeadCommands::Enrich { id } => {
                let Some(mut lead) = crm.lead(&id)? else {
                    println!("Lead {} not found.", id);
                    return Ok(());
                };
                lead.enrichment_status = EnrichmentStatus::Enriching;
                crm.update_lead(&mut lead)?;

                println!("Enriching {}...", lead.company_name);
                let result = match OpenAiProvider::from_env() {
                    Some(provider) => ai::enrich_lead(&provider, &lead),
                    None => Err(anyhow!("OPENAI_API_KEY not set")),
                };
                match result {
                    Ok(data) if !data.is_empty() => {
                        if data.website.is_some() {
                            lead.website = data.website.clone();
                        }
                        if data.linkedin_url.is_some() {
                            lead.linkedin_url = data.linkedin_url.clone();
                        }
                        if data.logo_url.is_some() {
                            lead.logo_url = data.logo_url.clone();
                        }
                        if data.industry.is_some() {
                            lead.industry = data.industry.clone();
                        }
                        if let Some(size) = data.size_bucket() {
                            lead.company_size = Some(size);
                        }
                        lead.enrichment_status = EnrichmentStatus::Completed;
                        crm.update_lead(&mut lead)?;
                        println!("Enriched lead {}:", id);
                        println!("  Website: {}", lead.website.as_deref().unwrap_or("-"));
                        println!("  LinkedIn: {}", lead.linkedin_url.as_deref().unwrap_or("-"));
                        println!("  Industry: {}", lead.industry.as_deref().unwrap_or("-"));
                        println!(
                            "  Size: {}",
                            lead.company_size.map(|s| s.label()).unwrap_or("-")
                        );
                    }
                    Ok(_) => {
                        lead.enrichment_status = EnrichmentStatus::Failed;
                        crm.update_lead(&mut lead)?;
                        println!("No enrichment data found for {}.", lead.company_name);
                    }
                    Err(e) => {
                        lead.enrichment_status = EnrichmentStatus::Failed;
                        crm.update_lead(&mut lead)?;
                        println!("Enrichment failed: {}", e);
                    }
                }
            }
            LeadCommands::Score { id } => {
                let Some(mut lead) = crm.lead(&id)? else {
                    println!("Lead {} not found.", id);
                    return Ok(());
                };
                let activities = crm.activities(Some(&id), None)?;
                let provider = OpenAiProvider::from_env();
                let score = ai::score_lead(
                    provider.as_ref().map(|p| p as &dyn AiProvider),
                    &lead,
                    &activities,
                );
                lead.score = score.score;
                lead.heat_level = Some(score.heat_level);
                crm.update_lead(&mut lead)?;
                println!(
                    "Scored {}: {} ({})",
                    lead.company_name,
                    score.score,
                    score.heat_level.label()
                );
                if let Some(reasoning) = score.reasoning {
                    println!("Reasoning: {}", reasoning);
                }
            }
        },

        Commands::Opp { command } => match command {
            OppCommands::Add {
                lead_id,
                title,
                value,
                probability,
                product,
                close,
                notes,
            } => {
                if crm.lead(&lead_id)?.is_none() {
                    return Err(anyhow!("Lead {} not found.", lead_id));
                }
                let mut opp = Opportunity::new(&lead_id, &title);
                opp.value = value;
                opp.probability = probability.clamp(0, 100);
                opp.product = product;
                opp.close_date = close.as_deref().map(parse_close_date).transpose()?;
                opp.notes = notes;
                let opp = crm.add_opportunity(opp)?;
                println!("Added opportunity {} ({})", opp.opp_id, opp.title);
            }
            OppCommands::List { stage, lead } => {
                let filter = stage.as_deref().map(parse_stage).transpose()?;
                let mut opps = crm.opportunities()?;
                if let Some(stage) = filter {
                    opps.retain(|o| o.stage == stage);
                }
                if let Some(lead_id) = lead {
                    opps.retain(|o| o.lead_id == lead_id);
                }
                if opps.is_empty() {
                    println!("No opportunities found.");
                } else {
                    println!(
                        "{:<10} {:<10} {:<28} {:<14} {:>10} {:>5} {:>10}",
                        "ID", "LEAD", "TITLE", "STAGE", "VALUE", "PROB", "EXPECTED"
                    );
                    println!("{}", "-".repeat(94));
                    for opp in opps {
                        println!(
                            "{:<10} {:<10} {:<28} {:<14} {:>10.0} {:>4}% {:>10.0}",
                            opp.opp_id,
                            opp.lead_id,
                            truncate(&opp.title, 27),
                            opp.stage.label(),
                            opp.value,
                            opp.probability,
                            opp.expected_value(),
                        );
                    }
                }
            }
            OppCommands::Show { id } => match crm.opportunity(&id)? {
                Some(opp) => {
                    println!("Opportunity {}", opp.opp_id);
                    println!("Title: {}", opp.title);
                    println!("Lead: {}", opp.lead_id);
                    println!("Stage: {}", opp.stage.label());
                    println!("Value: ${:.2}", opp.value);
                    println!("Probability: {}%", opp.probability);
                    println!("Expected value: ${:.2}", opp.expected_value());
                    if let Some(date) = opp.close_date {
                        println!("Close date: {}", date);
                    }
                    if let Some(product) = &opp.product {
                        println!("Product: {}", product);
                    }
                    if let Some(notes) = &opp.notes {
                        println!("Notes: {}", notes);
                    }
                    if let Some(owner) = &opp.owner {
                        println!("Owner: {}", owner);
                    }
                    println!("Created: {}", opp.created_at.format("%Y-%m-%d %H:%M"));
                    if let Some(closed) = opp.closed_at {
                        println!("Closed: {}", closed.format("%Y-%m-%d %H:%M"));
                    }
                }
                None => println!("Opportunity {} not found.", id),
            },
            OppCommands::Stage { id, stage } => {
                let stage = parse_stage(&stage)?;
                if crm.move_opportunity_stage(&id, stage)? {
                    println!("Moved {} to {}", id, stage.label());
                    if stage.is_terminal() {
                        if let Some(opp) = crm.opportunity(&id)? {
                            if let Some(closed) = opp.closed_at {
                                println!("Closed at {}", closed.format("%Y-%m-%d %H:%M"));
                            }
                        }
                    }
                } else {
                    println!("Opportunity {} not found.", id);
                }
            }
            OppCommands::Update {
                id,
                value,
                probability,
                notes,
            } => match crm.opportunity(&id)? {
                Some(mut opp) => {
                    if let Some(v) = value {
                        opp.value = v;
                    }
                    if let Some(p) = probability {
                        opp.probability = p.clamp(0, 100);
                    }
                    if let Some(n) = notes {
                        opp.notes = Some(n);
                    }
                    if crm.update_opportunity(&mut opp)? {
                        println!("Updated opportunity {}", id);
                    } else {
                        println!("Opportunity {} not found.", id);
                    }
                }
                None => println!("Opportunity {} not found.", id),
            },
            OppCommands::Delete { id } => {
                if crm.delete_opportunity(&id)? {
                    println!("Deleted opportunity {}", id);
                } else {
                    println!("Opportunity {} not found.", id);
                }
            }
            OppCommands::Analyze { id } => {
                let Some(opp) = crm.opportunity(&id)? else {
                    println!("Opportunity {} not found.", id);
                    return Ok(());
                };
                let activities = crm.activities(None, Some(&id))?;
                let provider = OpenAiProvider::from_env();
                let risk = ai::analyze_opportunity(
                    provider.as_ref().map(|p| p as &dyn AiProvider),
                    &opp,
                    &activities,
                );
                println!("Risk analysis for {} ({})", opp.title, opp.opp_id);
                println!("Risk: {} ({})", risk.risk_score, risk.risk_level.label());
                println!("Age: {} days", risk.age_days);
                println!(
                    "Last activity: {} days ago ({} total)",
                    risk.days_since_last_activity, risk.activity_count
                );
                println!("Reason: {}", risk.risk_reason);
                println!("Next action: {}", risk.next_action);
            }
        },

        Commands::Activity { command } => match command {
            ActivityCommands::Log {
                lead_id,
                subject,
                opp,
                activity_type,
                description,
                by,
            } => {
                if crm.lead(&lead_id)?.is_none() {
                    return Err(anyhow!("Lead {} not found.", lead_id));
                }
                let mut activity = Activity::new(&lead_id, &subject);
                activity.opp_id = opp;
                if let Some(t) = activity_type {
                    activity.activity_type = parse_activity_type(&t)?;
                }
                activity.description = description;
                activity.created_by = by;
                let activity = crm.log_activity(activity)?;
                println!("Logged activity {}", activity.activity_id);
            }
            ActivityCommands::List { lead, opp } => {
                let activities = crm.activities(lead.as_deref(), opp.as_deref())?;
                if activities.is_empty() {
                    println!("No activities found.");
                } else {
                    println!(
                        "{:<10} {:<10} {:<8} {:<16} {:<32}",
                        "ID", "LEAD", "TYPE", "DATE", "SUBJECT"
                    );
                    println!("{}", "-".repeat(80));
                    for act in activities {
                        println!(
                            "{:<10} {:<10} {:<8} {:<16} {:<32}",
                            act.activity_id,
                            act.lead_id,
                            act.activity_type.label(),
                            act.date.format("%Y-%m-%d %H:%M"),
                            truncate(&act.subject, 31),
                        );
                    }
                }
            }
        },

        Commands::Pipeline { json } => {
            let summary = crm.pipeline_summary()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{:<14} {:>6} {:>12} {:>12}",
                    "STAGE", "COUNT", "VALUE", "EXPECTED"
                );
                println!("{}", "-".repeat(48));
                for stage in &summary.pipeline_by_stage {
                    println!(
                        "{:<14} {:>6} {:>12.0} {:>12.0}",
                        stage.stage.label(),
                        stage.count,
                        stage.total_value,
                        stage.expected_value
                    );
                }
                println!();
                println!("Leads: {}", summary.total_leads);
                for status in &summary.leads_by_status {
                    if status.count > 0 {
                        println!("  {}: {}", status.status.label(), status.count);
                    }
                }
                println!();
                println!("Open pipeline value: ${:.0}", summary.total_pipeline_value);
                println!("Expected value: ${:.0}", summary.total_expected_value);
                println!("Closed won: ${:.0}", summary.closed_won_value);
                println!("Cash in bank: ${:.0}", summary.cash_in_bank);
            }
        }

        Commands::Seed { leads } => {
            let data = seed::generate(leads);
            crm.import_leads(&data.leads)?;
            crm.import_opportunities(&data.opportunities)?;
            crm.import_activities(&data.activities)?;
            println!("Seeded {} leads", data.leads.len());
            println!("Seeded {} opportunities", data.opportunities.len());
            println!("Seeded {} activities", data.activities.len());
        }

        Commands::Migrate => {
            let migrated = crm.migrate_leads_table()?;
            if migrated == 0 {
                println!("Leads table is already on the current layout.");
            } else {
                println!("Migrated {} lead rows to the current layout.", migrated);
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
