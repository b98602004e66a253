use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Market location used when the form leaves it blank
pub const DEFAULT_MARKET_GEO: &str = "United States";

/// Product priority as entered in the form: a number or free text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Priority {
    /// Numeric priority
    Number(serde_json::Number),
    /// Anything else, numeric strings included
    Text(String),
}

impl Priority {
    /// Numeric rank, `None` when the priority is not a number
    #[must_use]
    pub fn rank(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// One product or service from the business info form
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Product {
    /// Product name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Relative priority, higher first
    #[serde(default)]
    pub priority: Priority,
    /// Persona the product targets
    #[serde(default)]
    pub target_persona: String,
    /// Product page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Product {
    /// URL when present and non-blank
    #[must_use]
    pub fn page_url(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

/// Normalized business info form
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BusinessInfo {
    /// Company name
    pub company_name: String,
    /// Where the company is based
    #[serde(default)]
    pub location: String,
    /// Market the keywords are researched for
    #[serde(default)]
    pub market_geo: String,
    /// Industry niche
    #[serde(default)]
    pub niche: String,
    /// Company website
    #[serde(default)]
    pub website: String,
    /// Value propositions
    #[serde(default)]
    pub value_props: String,
    /// Target personas
    #[serde(default)]
    pub target_personas: String,
    /// Products and services
    #[serde(default)]
    pub products_services: Vec<Product>,
}

impl BusinessInfo {
    /// Market location, defaulting to the United States
    #[must_use]
    pub fn market(&self) -> &str {
        let geo = self.market_geo.trim();
        if geo.is_empty() {
            DEFAULT_MARKET_GEO
        } else {
            geo
        }
    }
}

/// Product enriched with its page summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedProduct {
    /// Form product
    #[serde(flatten)]
    pub product: Product,
    /// Summary of the product page, empty without a URL
    #[serde(default)]
    pub url_summary: String,
}

/// Marketing funnel stage a keyword list targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordKind {
    /// Bottom of funnel
    BoFu,
    /// Middle of funnel
    MoFu,
    /// Top of funnel
    ToFu,
}

impl KeywordKind {
    /// Lowercase tag used in table ids and fingerprints
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BoFu => "bofu",
            Self::MoFu => "mofu",
            Self::ToFu => "tofu",
        }
    }
}

impl fmt::Display for KeywordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeywordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bofu" => Ok(Self::BoFu),
            "mofu" => Ok(Self::MoFu),
            "tofu" => Ok(Self::ToFu),
            other => Err(format!("unknown keyword kind '{}', expected bofu, mofu or tofu", other)),
        }
    }
}

/// Input of one keyword generation call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordRequest {
    /// Product name
    pub product_name: String,
    /// Product description
    pub description: String,
    /// Product persona
    pub target_persona: String,
    /// Product page summary
    pub url_summary: String,
    /// Market location
    pub market_geo: String,
    /// Funnel stage
    pub kind: KeywordKind,
}

/// One researched keyword
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRow {
    /// Product the keyword was researched for
    pub product: String,
    /// Keyword text
    pub keyword: String,
    /// Monthly search volume
    #[serde(default)]
    pub search_volume: u64,
    /// Ranking difficulty (0-100)
    #[serde(default)]
    pub difficulty: u32,
    /// Main search intent
    #[serde(default = "default_intent")]
    pub intent: String,
}

fn default_intent() -> String {
    "unknown".to_string()
}
