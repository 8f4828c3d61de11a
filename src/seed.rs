use chrono::{Duration, Utc};
use rand::Rng;
use rand::seq::SliceRandom;

use crate::models::{
    Activity, ActivityType, CompanySize, Lead, LeadSource, LeadStatus, Opportunity, PipelineStage,
};

// --- Sample pools ---

const COMPANIES: &[&str] = &[
    "Northwind Traders",
    "Lumen Analytics",
    "Cobalt Systems",
    "Harbor Freight Labs",
    "Verde Logistics",
    "Atlas Robotics",
    "Pioneer Biotech",
    "Summit Legal Group",
    "Quartz Media",
    "Beacon Insurance",
    "Redwood Manufacturing",
    "Cascade Foods",
    "Ironwood Capital",
    "Solstice Energy",
    "Meridian Health",
    "Bluegrass Hosting",
    "Orchard Retail",
    "Granite Construction Co",
    "Halcyon Travel",
    "Fathom Marine",
];

const FIRST_NAMES: &[&str] = &[
    "Alex", "Jordan", "Maria", "Wei", "Priya", "Tom", "Sofia", "Liam", "Nina", "Omar", "Grace",
    "Hugo", "Ava", "Mateo", "Ingrid", "Ken",
];

const LAST_NAMES: &[&str] = &[
    "Martinez", "Chen", "Okafor", "Smith", "Patel", "Novak", "Kim", "Rossi", "Andersen", "Garcia",
    "Tanaka", "Dubois", "Nguyen", "Schmidt", "Silva", "Brown",
];

const INDUSTRIES: &[&str] = &[
    "Software",
    "Manufacturing",
    "Healthcare",
    "Logistics",
    "Finance",
    "Retail",
    "Energy",
    "Media",
    "Construction",
    "Hospitality",
];

const PRODUCTS: &[&str] = &["Consulting", "Software License", "Implementation", "Audit"];

const DEAL_PHRASES: &[&str] = &[
    "Platform Rollout",
    "Annual Contract",
    "Pilot Program",
    "Data Migration",
    "Support Renewal",
    "Expansion Deal",
];

const ACTIVITY_SUBJECTS: &[&str] = &[
    "Intro call",
    "Sent pricing deck",
    "Demo walkthrough",
    "Requirements workshop",
    "Follow-up email",
    "Contract review",
    "Security questionnaire",
    "Check-in call",
];

const OWNER: &str = "Demo User";

/// Starting probability for a deal entering the given stage. ClosedWon and
/// later stages are committed revenue; ClosedLost is dead.
pub fn stage_probability(stage: PipelineStage) -> i64 {
    match stage {
        PipelineStage::Prospecting => 10,
        PipelineStage::Discovery => 20,
        PipelineStage::Proposal => 40,
        PipelineStage::Negotiation => 70,
        PipelineStage::ClosedLost => 0,
        _ => 100,
    }
}

pub struct SeedData {
    pub leads: Vec<Lead>,
    pub opportunities: Vec<Opportunity>,
    pub activities: Vec<Activity>,
}

/// Generate a realistic-looking demo dataset: `lead_count` leads, roughly 60%
/// of them carrying an opportunity, and a few activities per record.
pub fn generate(lead_count: usize) -> SeedData {
    let mut rng = rand::thread_rng();
    let now = Utc::now();

    let mut leads = Vec::with_capacity(lead_count);
    for i in 0..lead_count {
        let company = COMPANIES[i % COMPANIES.len()];
        let first = FIRST_NAMES.choose(&mut rng).copied().unwrap_or("Alex");
        let last = LAST_NAMES.choose(&mut rng).copied().unwrap_or("Smith");
        let contact = format!("{first} {last}");
        let domain = company.to_lowercase().replace(' ', "");

        let mut lead = Lead::new(company, &contact);
        lead.contact_email = Some(format!("{}@{domain}.example", first.to_lowercase()));
        lead.contact_phone = Some(format!(
            "+1-555-{:03}-{:04}",
            rng.gen_range(100..1000),
            rng.gen_range(0..10000)
        ));
        lead.status = *LeadStatus::ALL.choose(&mut rng).unwrap_or(&LeadStatus::New);
        lead.source = *LeadSource::ALL
            .choose(&mut rng)
            .unwrap_or(&LeadSource::Other);
        lead.industry = INDUSTRIES.choose(&mut rng).map(|s| s.to_string());
        lead.company_size = CompanySize::ALL.choose(&mut rng).copied();
        lead.notes = Some(format!("Met at {} expo", lead.industry.as_deref().unwrap_or("trade")));
        lead.owner = Some(OWNER.to_string());
        lead.created_at = now - Duration::days(rng.gen_range(0..60));
        lead.updated_at = now;
        leads.push(lead);
    }

    // ~60% of leads convert into an open deal
    let mut opportunities = Vec::new();
    let mut converted: Vec<&Lead> = leads.iter().collect();
    converted.shuffle(&mut rng);
    converted.truncate(lead_count * 6 / 10);

    for lead in converted {
        let stage = *PipelineStage::ALL
            .choose(&mut rng)
            .unwrap_or(&PipelineStage::Prospecting);
        let phrase = DEAL_PHRASES.choose(&mut rng).copied().unwrap_or("Deal");

        let mut opp = Opportunity::new(&lead.lead_id, &format!("{} - {phrase}", lead.company_name));
        opp.stage = stage;
        opp.value = rng.gen_range(1_000.0..50_000.0);
        opp.probability = stage_probability(stage);
        opp.close_date = Some((now + Duration::days(rng.gen_range(1..60))).date_naive());
        opp.product = PRODUCTS.choose(&mut rng).map(|s| s.to_string());
        opp.owner = Some(OWNER.to_string());
        opp.created_at = lead.created_at + Duration::days(rng.gen_range(1..10));
        opp.updated_at = now;
        if stage.is_terminal() {
            opp.closed_at = Some(opp.created_at + Duration::days(rng.gen_range(1..20)));
        }
        opportunities.push(opp);
    }

    let mut activities = Vec::new();
    for lead in &leads {
        for _ in 0..rng.gen_range(0..=3) {
            let mut act = Activity::new(
                &lead.lead_id,
                ACTIVITY_SUBJECTS.choose(&mut rng).unwrap_or(&"Call"),
            );
            act.activity_type = *ActivityType::ALL
                .choose(&mut rng)
                .unwrap_or(&ActivityType::Note);
            act.description = Some(format!("Talked with {}", lead.contact_name));
            act.date = lead.created_at + Duration::days(rng.gen_range(0..30));
            act.created_by = Some(OWNER.to_string());
            activities.push(act);
        }
    }
    for opp in &opportunities {
        for _ in 0..rng.gen_range(0..=3) {
            let mut act = Activity::new(&opp.lead_id, &format!("Re: {}", opp.title));
            act.opp_id = Some(opp.opp_id.clone());
            act.activity_type = *ActivityType::ALL
                .choose(&mut rng)
                .unwrap_or(&ActivityType::Email);
            act.date = opp.created_at + Duration::days(rng.gen_range(0..20));
            act.created_by = Some(OWNER.to_string());
            activities.push(act);
        }
    }

    SeedData {
        leads,
        opportunities,
        activities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generates_requested_lead_count() {
        let data = generate(20);
        assert_eq!(data.leads.len(), 20);
        assert_eq!(data.opportunities.len(), 12);
    }

    #[test]
    fn test_opportunities_reference_real_leads() {
        let data = generate(15);
        let lead_ids: HashSet<&str> = data.leads.iter().map(|l| l.lead_id.as_str()).collect();
        for opp in &data.opportunities {
            assert!(lead_ids.contains(opp.lead_id.as_str()));
        }
        for act in &data.activities {
            assert!(lead_ids.contains(act.lead_id.as_str()));
        }
    }

    #[test]
    fn test_probability_tracks_stage() {
        let data = generate(30);
        for opp in &data.opportunities {
            assert_eq!(opp.probability, stage_probability(opp.stage));
            assert!((1_000.0..50_000.0).contains(&opp.value));
            if opp.stage.is_terminal() {
                assert!(opp.closed_at.is_some());
            }
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let data = generate(20);
        let ids: HashSet<&str> = data.leads.iter().map(|l| l.lead_id.as_str()).collect();
        assert_eq!(ids.len(), data.leads.len());
    }

    #[test]
    fn test_stage_probability_bounds() {
        for &stage in &PipelineStage::ALL {
            let p = stage_probability(stage);
            assert!((0..=100).contains(&p));
        }
        assert_eq!(stage_probability(PipelineStage::ClosedLost), 0);
        assert_eq!(stage_probability(PipelineStage::CashInBank), 100);
    }
}
