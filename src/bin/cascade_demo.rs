

use std::sync::Arc;

use anyhow::{Context, bail};
use cascade::db::Store;
use cascade::jobs::ConcurrentJobQueue;
use cascade::{CascadeConfig, Condition, DeletionManager, InMemoryStore, ModelDescriptor, ModelRegistry, split_gen_id};
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};


fn registry() -> cascade::Result<ModelRegistry> {
    ModelRegistry::new()
        .with_model(ModelDescriptor::new("User").scalar("name"))?
        .with_model(
            ModelDescriptor::new("Post")
                .scalar("title")
                .reference("author", "User")
                .references("tags", "Tag")
                .deleted_with("author", Condition::Deleted),
        )?
        .with_model(
            ModelDescriptor::new("Comment")
                .scalar("body")
                .reference("post", "Post")
                .deleted_with("post", Condition::Deleted),
        )?
        .with_model(ModelDescriptor::new("Tag").deleted_by("Post", "tags", Condition::AllDeleted))
}

async fn seed(store: &InMemoryStore) -> cascade::Result<()> {
    let rows = [
        ("User", json!({"id": "u1", "name": "ada"})),
        ("User", json!({"id": "u2", "name": "grace"})),
        ("Tag", json!({"id": "rust"})),
        ("Tag", json!({"id": "db"})),
        ("Post", json!({"id": "p1", "title": "ownership", "author": "u1", "tags": ["rust"]})),
        ("Post", json!({"id": "p2", "title": "indexes", "author": "u2", "tags": ["db", "rust"]})),
        ("Comment", json!({"id": "c1", "body": "nice", "post": "p1"})),
        ("Comment", json!({"id": "c2", "body": "+1", "post": "p2"})),
    ];

    let mut tx = store.begin().await?;
    for (model, value) in rows {
        if let Value::Object(record) = value {
            tx.put(model, record)?;
        }
    }
    tx.commit().await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::var("CASCADE_CONFIG") {
        Ok(path) => CascadeConfig::load(Some(&path)).context("loading configuration")?,
        Err(_) => CascadeConfig::from_env(),
    };

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_filter)?,
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let root = std::env::args().nth(1).unwrap_or_else(|| "User(u1)".to_string());
    let Some((model_name, model_id)) = split_gen_id(&root) else {
        bail!("expected a root like User(u1), got {}", root);
    };

    let live = Arc::new(InMemoryStore::new());
    seed(&live).await?;

    let queue = Arc::new(ConcurrentJobQueue::from_config(&config));
    let manager = DeletionManager::new(Arc::new(registry()?), live.clone(), queue, config)?;

    info!("Simulating deletion of {}", root);
    let simulated = manager.simulate_deletion(model_name, model_id).await?;
    println!("{}", serde_json::to_string_pretty(&simulated)?);

    let deleted = manager.delete(model_name, model_id).await?;
    println!("{}", serde_json::to_string_pretty(&deleted)?);

    let restored = manager.restore(model_name, model_id).await?;
    println!("{}", serde_json::to_string_pretty(&restored)?);

    info!(
        "Done: {} simulated, {} deleted, {} restored",
        simulated.count(),
        deleted.count(),
        restored.restored.len()
    );
    Ok(())
}
