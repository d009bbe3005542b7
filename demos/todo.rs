//! Creates todo lists in a git-checkpointed store and prints the read models.
//!
//! Run with: `cargo run --example todo -- <storage-dir> Groceries Chores`
//!
//! **Requires** a `git` binary on `PATH`. Set `RUST_LOG=eventgit=debug` to
//! watch each pipeline step.

use eventgit::{
    CreateTodoList, EventStore, ExecuteError, GitCheckpointer, TodoLists, TodoListsCount,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let root = args.next().unwrap_or_else(|| "storage".to_owned());
    let names: Vec<String> = args.collect();

    let store = EventStore::builder(&root)
        .projection::<TodoLists>()
        .projection::<TodoListsCount>()
        .checkpointer(GitCheckpointer::new().with_identity("eventgit demo", "demo@eventgit.invalid"))
        .open()
        .await?;

    for name in names {
        let cmd = CreateTodoList::new(name);
        let id = cmd.id.clone();
        match store.execute(cmd).await {
            Ok(entry) => println!("created {id} -> {}", entry.reference()),
            // Validation failures are reported with their cause.
            Err(ExecuteError::Validation(e)) => println!("rejected: {e}"),
            Err(ExecuteError::Store(e)) => {
                tracing::error!(error = %e, "store failed");
                println!("internal error");
            }
        }
    }

    let lists: TodoLists = store.projection().await?;
    let count: TodoListsCount = store.projection().await?;
    println!("{} todo list(s):", count.0);
    for summary in &lists.0 {
        println!("  - {}", summary.name);
    }

    println!("stream index:");
    for line in store.stream_index().await? {
        println!("  {line}");
    }

    store.shutdown().await;
    Ok(())
}
