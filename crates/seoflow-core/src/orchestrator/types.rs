use crate::context::{fields, ClientContext};
use crate::error::Result;
use crate::research::{BusinessInfo, KeywordKind, KeywordRow, ProcessedProduct};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed operations accepted by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    /// Enrich the submitted business info and render the client brief
    ProcessBusinessInfo,
    /// Research keywords for one funnel stage
    GenerateKeywords {
        /// Funnel stage
        kind: KeywordKind,
    },
    /// Read the session's client context
    GetClientContext,
}

impl Operation {
    /// Stable name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProcessBusinessInfo => "process_business_info",
            Self::GenerateKeywords { .. } => "generate_keywords",
            Self::GetClientContext => "get_client_context",
        }
    }

    /// Whether an unknown session id creates an empty session
    #[must_use]
    pub fn creates_session(&self) -> bool {
        !matches!(self, Self::GetClientContext)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenerateKeywords { kind } => write!(f, "{}({})", self.name(), kind),
            _ => f.write_str(self.name()),
        }
    }
}

/// Result of an [`Operation`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OperationOutput {
    /// Client context view
    Context(ClientContextSummary),
    /// Keyword table
    Keywords(KeywordArtifact),
}

/// Acknowledgement of a business info submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitAck {
    /// Session the info was stored in
    pub session_id: String,
    /// Context version after the write
    pub version: u64,
}

/// Business info with enriched, priority-ordered products
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedBusinessInfo {
    /// Company name
    pub company_name: String,
    /// Where the company is based
    pub location: String,
    /// Market the keywords are researched for
    pub market_geo: String,
    /// Industry niche
    pub niche: String,
    /// Company website
    pub website: String,
    /// Value propositions
    pub value_props: String,
    /// Target personas
    pub target_personas: String,
    /// Products, highest priority first
    pub products_services: Vec<ProcessedProduct>,
    /// When processing finished
    pub processed_at: DateTime<Utc>,
}

impl ProcessedBusinessInfo {
    /// Combine the form with product summaries, ordering products by
    /// numeric priority (highest first, non-numeric last)
    #[must_use]
    pub fn new(info: &BusinessInfo, mut products: Vec<ProcessedProduct>) -> Self {
        products.sort_by(|a, b| {
            match (a.product.priority.rank(), b.product.priority.rank()) {
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });

        Self {
            company_name: info.company_name.clone(),
            location: info.location.clone(),
            market_geo: info.market().to_string(),
            niche: info.niche.clone(),
            website: info.website.clone(),
            value_props: info.value_props.clone(),
            target_personas: info.target_personas.clone(),
            products_services: products,
            processed_at: Utc::now(),
        }
    }
}

/// A generated keyword table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordArtifact {
    /// `{kind}_keywords_{YYYYmmdd_HHMMSS}`
    pub table_id: String,
    /// Funnel stage
    pub kind: KeywordKind,
    /// Keyword rows, grouped by product in priority order
    pub rows: Vec<KeywordRow>,
    /// Generation time
    pub generated_at: DateTime<Utc>,
}

impl KeywordArtifact {
    /// Build an artifact stamped now
    #[must_use]
    pub fn new(kind: KeywordKind, rows: Vec<KeywordRow>) -> Self {
        let generated_at = Utc::now();
        Self {
            table_id: format!("{}_keywords_{}", kind, generated_at.format("%Y%m%d_%H%M%S")),
            kind,
            rows,
            generated_at,
        }
    }
}

/// Read-only view of a session's client context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientContextSummary {
    /// Session id
    pub session_id: String,
    /// Context version
    pub version: u64,
    /// Session creation time
    pub created_at: DateTime<Utc>,
    /// Last access time
    pub last_accessed_at: DateTime<Utc>,
    /// Company name, once submitted
    pub company_name: Option<String>,
    /// Market location, once submitted
    pub market_geo: Option<String>,
    /// Whether the business info has been processed
    pub processed: bool,
    /// When it was processed
    pub processed_at: Option<DateTime<Utc>>,
    /// Products (priority ordered once processed)
    pub products: Vec<ProcessedProduct>,
    /// Markdown client brief
    pub client_context: Option<String>,
    /// Keyword tables generated for the session
    pub keyword_tables: Vec<String>,
    /// Names of all stored fields
    pub fields: Vec<String>,
}

impl ClientContextSummary {
    /// Summarize a stored context
    pub fn from_context(context: &ClientContext) -> Result<Self> {
        let processed: Option<ProcessedBusinessInfo> =
            context.get_as(fields::BUSINESS_INFO_PROCESSED)?;
        let submitted: Option<BusinessInfo> = context.get_as(fields::BUSINESS_INFO)?;

        let (company_name, market_geo, products, processed_at) = match (&processed, &submitted) {
            (Some(p), _) => (
                Some(p.company_name.clone()),
                Some(p.market_geo.clone()),
                p.products_services.clone(),
                Some(p.processed_at),
            ),
            (None, Some(info)) => (
                Some(info.company_name.clone()),
                Some(info.market().to_string()),
                info.products_services
                    .iter()
                    .cloned()
                    .map(|product| ProcessedProduct {
                        product,
                        url_summary: String::new(),
                    })
                    .collect(),
                None,
            ),
            (None, None) => (None, None, Vec::new(), None),
        };

        Ok(Self {
            session_id: context.session_id.clone(),
            version: context.version,
            created_at: context.created_at,
            last_accessed_at: context.last_accessed_at,
            company_name,
            market_geo,
            processed: processed.is_some(),
            processed_at,
            products,
            client_context: context.get_as(fields::CLIENT_CONTEXT)?,
            keyword_tables: context
                .get_as::<Vec<String>>(fields::KEYWORD_TABLES)?
                .unwrap_or_default(),
            fields: context.fields.keys().cloned().collect(),
        })
    }
}

