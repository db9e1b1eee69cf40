use std::env;
use std::path::Path;

use library::{search, RedbStore};
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let index_path = args
        .next()
        .or_else(|| env::var("INDEX_PATH").ok())
        .ok_or("usage: index_query <index_path> <phrase> [limit]")?;
    let phrase = args.next().ok_or("missing search phrase")?;
    let limit = match args.next() {
        Some(value) => value.parse::<usize>()?,
        None => 10,
    };

    if !Path::new(&index_path).exists() {
        return Err(format!("index {} does not exist", index_path).into());
    }
    let (store, needs_reindex) = RedbStore::open(Path::new(&index_path))?;
    if needs_reindex {
        warn!("index {} is empty; run `tagdex sync --full` first", index_path);
    }

    for piece in search(&store, &phrase, limit)? {
        println!("{}", serde_json::to_string(&piece)?);
    }
    Ok(())
}
