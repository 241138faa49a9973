use epi_ingest::config::Config;
use epi_ingest::storage::Store;

fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    println!("⚠️  WARNING: This will delete ALL records from {}!", config.db_path.display());
    println!("Press Enter to continue or Ctrl+C to cancel...");
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    println!("🗑️  Clearing store...");
    let store = Store::open(&config.db_path)?;
    let removed = store.clear()?;

    println!("✅ Store cleared ({} records removed)", removed);
    Ok(())
}
