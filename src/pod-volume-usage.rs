use anyhow::Context;
use tracing_subscriber::EnvFilter;
use volume_ops::config::UsageConfig;
use volume_ops::exec::ProcessRunner;
use volume_ops::usage::{self, Kubectl};

fn main() -> anyhow::Result<()> {
    // The report itself goes to stdout, so logs are kept to warnings unless
    // asked for.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = UsageConfig::new_from_flags(env!("CARGO_PKG_VERSION"));
    let kubectl = Kubectl::new(ProcessRunner, &config);

    let volumes = usage::report(&kubectl, &config).context("failed to get pods")?;
    print!("{}", volumes);
    Ok(())
}
