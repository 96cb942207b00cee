use clap::Parser;
use log::{debug, info, warn};
use xlsx_collect::{Args, Config, run};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::from_args(&args)?;
    info!("Start processing {}", config.input_dir.display());

    let summary = run(&config)?;
    debug!("{}", serde_json::to_string(&summary)?);
    for skipped in &summary.skipped {
        warn!("not collected: {} ({})", skipped.path.display(), skipped.reason);
    }
    info!(
        "Done: {} files read, {} rows appended, {} skipped, summary range {}",
        summary.files_read,
        summary.rows_appended,
        summary.skipped.len(),
        summary.range.as_deref().unwrap_or("-")
    );
    Ok(())
}
