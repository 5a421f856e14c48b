//! CLI `doctor` command: check model files and artifacts and print a health report.

use anyhow::Result;

use traitsense::artifacts::{check_consistency, load_artifacts, DefaultFetcher, RetryPolicy};
use traitsense::config::TraitSenseConfig;

/// Check the local model files and the precomputed artifact pair.
pub async fn doctor(config: &TraitSenseConfig) -> Result<()> {
    let model_dir = config.resolved_model_dir();
    let source = config.data.artifact_source();

    println!("TraitSense Health Report");
    println!("========================");
    println!();
    println!("Embedding model:   {}", config.embedding.model);
    println!("Model dir:         {}", model_dir.display());
    let mut model_ok = true;
    for name in ["model.onnx", "tokenizer.json"] {
        let path = model_dir.join(name);
        match std::fs::metadata(&path) {
            Ok(meta) => println!("  {name:<16} {}", format_bytes(meta.len())),
            Err(_) => {
                model_ok = false;
                println!("  {name:<16} MISSING");
            }
        }
    }
    if !model_ok {
        println!("  Run `traitsense model download` to fetch the model.");
    }

    println!();
    println!("Artifacts:");
    println!("  Traits:          {}", source.traits);
    println!("  Embeddings:      {}", source.embeddings);

    // One attempt is enough for a diagnostic.
    let policy = RetryPolicy {
        retries: 0,
        ..config.data.retry_policy()
    };
    match load_artifacts(&DefaultFetcher::new(), &source, policy).await {
        Ok(artifacts) => {
            let traits = artifacts.metadata.traits.len();
            let dims = artifacts.metadata.dims;
            println!("  Trait count:     {traits}");
            println!("  Dims:            {dims}");
            println!("  Binary size:     {}", format_bytes(artifacts.embeddings.len() as u64));
            match check_consistency(traits, dims, artifacts.embeddings.len()) {
                Ok(()) => println!("  Consistency:     PASSED"),
                Err(e) => println!("  Consistency:     FAILED ({e})"),
            }
            if dims != config.embedding.dims {
                println!(
                    "  WARNING: artifacts have {dims} dims but the model is configured for {}.",
                    config.embedding.dims
                );
                println!("  Rebuild them with `traitsense precompute`.");
            }
        }
        Err(e) => {
            println!("  Status:          UNAVAILABLE ({e})");
            println!("  Build them with `traitsense precompute --families <json> --out <dir>`.");
        }
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
