//! Backend health checks

use crate::app::{init_runtime, AppConfig};
use seoflow_core::{CacheEntry, CacheFormat, ContextDelta};
use std::time::Duration;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Seoflow Doctor\n");

    let runtime = match init_runtime(config).await {
        Ok(runtime) => runtime,
        Err(e) => {
            println!("❌ Initialization failed: {:#}", e);
            std::process::exit(1);
        }
    };
    let orchestrator = &runtime.orchestrator;
    let mut all_ok = true;

    print!("Checking context store ({})... ", config.store.backend);
    let probe = format!("doctor-{}", uuid::Uuid::new_v4());
    let store = orchestrator.store();
    let store_check = async {
        let context = store.create_if_absent(&probe).await?;
        let delta = ContextDelta::new().set("probe", serde_json::json!(true));
        store.put(&probe, &delta, context.version).await?;
        store.delete(&probe).await
    };
    match store_check.await {
        Ok(_) => println!("✅"),
        Err(e) => {
            println!("❌ {}", e);
            all_ok = false;
        }
    }

    print!("Checking cache ({})... ", config.cache.backend);
    let cache = orchestrator.cache();
    let key = format!("g:doctor:{}", probe);
    let entry = CacheEntry::new(&key, CacheFormat::Json, b"true".to_vec(), Duration::from_secs(30));
    match cache.write(entry).await {
        Ok(()) if cache.read(&key).await.is_hit() => {
            let _ = cache.invalidate(&key).await;
            println!("✅");
        }
        Ok(()) => {
            println!("❌ entry not readable after write");
            all_ok = false;
        }
        Err(e) => {
            println!("❌ {}", e);
            all_ok = false;
        }
    }

    println!("Research backend: {}", config.research.backend);

    runtime.shutdown();
    println!();
    if all_ok {
        println!("✅ All checks passed.");
        Ok(())
    } else {
        println!("⚠️  Some checks failed.");
        std::process::exit(1);
    }
}
