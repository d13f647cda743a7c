use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// One posting as returned by the listing source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobListing {
    pub company_name: String,
    pub job_description: String,
    pub location: String,
    pub listing_date: String, // ISO-8601, as the source sent it
}

/// What a candidate website says about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyDetails {
    pub display_name: String,
    pub careers_page: Option<String>,
}

/// Result of resolving one job listing, handed to persistence as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub company_name: String,
    pub job_description: String,
    pub location: String,
    pub listing_date: String,
    #[serde(default)]
    pub company_info: Option<String>,
    #[serde(default)]
    pub careers_page: Option<String>,
    #[serde(default)]
    pub emails: IndexSet<String>,
    #[serde(default)]
    pub scanned_pages: Vec<String>,
}

impl ScanRecord {
    pub fn for_listing(job: &JobListing) -> Self {
        Self {
            company_name: job.company_name.clone(),
            job_description: job.job_description.clone(),
            location: job.location.clone(),
            listing_date: job.listing_date.clone(),
            company_info: None,
            careers_page: None,
            emails: IndexSet::new(),
            scanned_pages: Vec::new(),
        }
    }
}

/// A record as read back from the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    pub company_name: String,
    pub company_info: Option<String>,
    pub job_description: String,
    pub location: String,
    pub listing_date: String,
    pub careers_page: Option<String>,
    pub emails: Vec<String>,
    pub scanned_pages: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}
