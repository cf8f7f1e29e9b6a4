use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use volume_ops::config::GceConfig;
use volume_ops::exec::{Gcloud, ProcessRunner};
use volume_ops::{disk, scenario};

const EXIT_CODE_TEST_PASSED: i32 = 0;
const EXIT_CODE_TEST_FAILED: i32 = 1;
const EXIT_CODE_SETUP_FAILED: i32 = 2;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GceConfig::new_from_flags(env!("CARGO_PKG_VERSION"));
    let disk_name = config
        .disk_name
        .clone()
        .unwrap_or_else(disk::timestamped_disk_name);
    let gcloud = Gcloud::new(ProcessRunner, &config);

    info!(disk = %disk_name, instances = ?config.instances, "Starting disk attach/mount test");
    let report = match scenario::run(&gcloud, &config, &disk_name)
        .with_context(|| format!("failed to set up disk {}", disk_name))
    {
        Ok(report) => report,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(EXIT_CODE_SETUP_FAILED);
        }
    };

    if report.is_fatal() {
        for failure in report.failures() {
            eprintln!("FAILED {}", failure);
        }
        eprintln!("Disk test FAILED");
        std::process::exit(EXIT_CODE_TEST_FAILED);
    }

    println!("Disk test passed");
    std::process::exit(EXIT_CODE_TEST_PASSED);
}
