//! Markdown client brief

use super::ProcessedBusinessInfo;
use std::fmt::Write;

fn or_none(value: &str) -> &str {
    if value.trim().is_empty() {
        "None"
    } else {
        value
    }
}

/// Render the client brief handed to research agents
#[must_use]
pub fn render_client_brief(info: &ProcessedBusinessInfo) -> String {
    let mut md = String::new();

    // Writing to a String cannot fail
    let _ = writeln!(md, "# {}\n", info.company_name);

    let _ = writeln!(md, "## Business Overview");
    let _ = writeln!(md, "- **Location:** {}", info.location);
    let _ = writeln!(md, "- **Market Geography:** {}", info.market_geo);
    let _ = writeln!(md, "- **Niche:** {}", info.niche);
    let _ = writeln!(md, "- **Website:** {}\n", info.website);

    let _ = writeln!(md, "## Value Propositions");
    let _ = writeln!(md, "{}\n", info.value_props);

    let _ = writeln!(md, "## Target Personas");
    let _ = writeln!(md, "{}\n", info.target_personas);

    let _ = writeln!(md, "## Products & Services");
    for item in &info.products_services {
        let product = &item.product;
        let _ = writeln!(md, "### {} (Priority: {})", product.name, product.priority);
        let _ = writeln!(md, "- **Description:** {}", product.description);
        let _ = writeln!(md, "- **Target Persona:** {}", product.target_persona);
        let _ = writeln!(md, "- **URL:** {}", or_none(product.page_url().unwrap_or("")));
        let _ = writeln!(md, "- **URL Summary:** {}\n", or_none(&item.url_summary));
    }

    md
}
