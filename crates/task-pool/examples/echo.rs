use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use task_pool::{BodyRegistry, ExecMode, FnBody, Pool, PoolOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let registry = BodyRegistry::new();
    registry.register(
        "greet",
        FnBody::new(|payload: Value| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let name = payload["name"].as_str().unwrap_or("world");
            Ok(json!({ "greeting": format!("hello, {}", name) }))
        }),
    );

    let pool = Pool::new(
        Arc::new(registry),
        "greet",
        PoolOptions {
            max_threads: 4,
            max_tasks: 16,
            task_loop_time: 200,
            mode: ExecMode::Eval,
            ..PoolOptions::default()
        },
    )?;

    let handles: Vec<_> = ["ada", "grace", "edsger", "barbara"]
        .into_iter()
        .map(|name| pool.send(json!({ "name": name })))
        .collect::<Result<_, _>>()?;

    for handle in handles {
        let result = handle.await?;
        println!("{}", result["greeting"].as_str().unwrap_or_default());
    }

    pool.close();
    Ok(())
}
