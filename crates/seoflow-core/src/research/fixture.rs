use super::{KeywordKind, KeywordRequest, KeywordRow, ResearchBackend};
use crate::invoker::UpstreamError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

const BOFU_TEMPLATES: &[&str] = &[
    "{} price",
    "buy {}",
    "{} review",
    "{} deals",
    "{} vs alternatives",
    "best {} for {}",
];

const MOFU_TEMPLATES: &[&str] = &[
    "{} comparison",
    "{} features",
    "is {} worth it",
    "{} pros and cons",
    "{} for {}",
];

const TOFU_TEMPLATES: &[&str] = &[
    "what is {}",
    "how to choose {}",
    "{} guide",
    "{} tips for {}",
    "why use {}",
];

/// Deterministic offline research backend
///
/// Produces stable keyword rows and page summaries without network access.
#[derive(Debug, Clone, Default)]
pub struct FixtureBackend;

impl FixtureBackend {
    /// Create a fixture backend
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn stable_number(text: &str) -> u64 {
    let digest = Sha256::digest(text.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn fill(template: &str, subject: &str, persona: &str) -> String {
    let mut out = template.replacen("{}", subject, 1);
    if out.contains("{}") {
        let audience = if persona.is_empty() { "beginners" } else { persona };
        out = out.replacen("{}", audience, 1);
    }
    out.to_lowercase()
}

#[async_trait]
impl ResearchBackend for FixtureBackend {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn summarize_url(&self, url: &str) -> Result<String, UpstreamError> {
        Ok(format!("Product page at {} (fixture summary).", url))
    }

    async fn generate_keywords(
        &self,
        request: &KeywordRequest,
    ) -> Result<Vec<KeywordRow>, UpstreamError> {
        let (templates, intent) = match request.kind {
            KeywordKind::BoFu => (BOFU_TEMPLATES, "transactional"),
            KeywordKind::MoFu => (MOFU_TEMPLATES, "commercial"),
            KeywordKind::ToFu => (TOFU_TEMPLATES, "informational"),
        };
        let subject = match request.kind {
            KeywordKind::ToFu if !request.description.is_empty() => &request.description,
            _ => &request.product_name,
        };

        Ok(templates
            .iter()
            .map(|template| {
                let keyword = fill(template, subject, &request.target_persona);
                let seed = stable_number(&format!("{}|{}", request.market_geo, keyword));
                KeywordRow {
                    product: request.product_name.clone(),
                    search_volume: 10 + seed % 9_990,
                    difficulty: ((seed >> 16) % 100) as u32,
                    intent: intent.to_string(),
                    keyword,
                }
            })
            .collect())
    }
}
