use anyhow::Result;
use minder_export::Client;
use std::path::Path;

fn main() -> Result<()> {
    // Example program that calls the library API.
    // Configure authentication via env vars or a `.minderrc` file.
    tracing_subscriber::fmt().with_env_filter("minder_export=info").init();
    let client = Client::from_env()?;

    let datasets = client.catalog()?.datasets("activity")?;
    let report = client.refresh(None, &datasets, Path::new("./data/raw_data"))?;

    for (dataset, outcome) in &report.datasets {
        println!("{}: {:?}", dataset, outcome);
    }
    Ok(())
}
