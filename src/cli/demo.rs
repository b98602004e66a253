//! End-to-end workflow demo

use super::{failure, print_json};
use futures::future::join_all;
use seoflow_core::{
    BusinessInfo, CallOutcome, KeywordKind, Product, SessionOrchestrator,
};

/// Business info used by the demo
pub fn sample_business_info() -> BusinessInfo {
    let product = |name: &str, description: &str, priority: u32, persona: &str, url: Option<&str>| {
        Product {
            name: name.to_string(),
            description: description.to_string(),
            priority: serde_json::from_value(serde_json::json!(priority)).unwrap_or_default(),
            target_persona: persona.to_string(),
            url: url.map(str::to_string),
        }
    };

    BusinessInfo {
        company_name: "Northwind Outfitters".to_string(),
        location: "Portland, OR".to_string(),
        market_geo: "United States".to_string(),
        niche: "outdoor gear".to_string(),
        website: "https://northwind.example".to_string(),
        value_props: "Lifetime warranty and free repairs".to_string(),
        target_personas: "weekend hikers, thru-hikers".to_string(),
        products_services: vec![
            product(
                "Trail Pack 40",
                "ultralight hiking backpack",
                7,
                "thru-hikers",
                Some("https://northwind.example/packs/trail-40"),
            ),
            product("Summit Shell", "waterproof rain jacket", 9, "weekend hikers", None),
        ],
    }
}

/// Run start → submit → process → concurrent keyword requests
pub async fn run(
    orchestrator: &SessionOrchestrator,
    concurrency: usize,
) -> anyhow::Result<()> {
    let mut calls = orchestrator.invoker().subscribe();

    let session = orchestrator.start_session().await.map_err(failure)?;
    println!("Session: {}", session);

    orchestrator
        .submit_business_info(&session, sample_business_info())
        .await
        .map_err(failure)?;
    let summary = orchestrator
        .process_business_info(&session)
        .await
        .map_err(failure)?;
    println!("{}", summary.client_context.as_deref().unwrap_or_default());

    let requests = (0..concurrency.max(1))
        .map(|_| orchestrator.generate_keywords(&session, KeywordKind::BoFu));
    let results = join_all(requests).await;

    let mut table = None;
    for result in results {
        let artifact = result.map_err(failure)?;
        table.get_or_insert(artifact);
    }

    let mut upstream = 0;
    while let Ok(call) = calls.try_recv() {
        if call.operation == seoflow_core::research::OP_KEYWORDS
            && call.outcome == CallOutcome::Success
        {
            upstream += 1;
        }
    }

    if let Some(artifact) = &table {
        println!(
            "{} concurrent requests, {} upstream keyword calls, table {} with {} rows",
            concurrency.max(1),
            upstream,
            artifact.table_id,
            artifact.rows.len()
        );
    }

    let context = orchestrator
        .get_client_context(&session)
        .await
        .map_err(failure)?;
    print_json(&context.keyword_tables)
}
