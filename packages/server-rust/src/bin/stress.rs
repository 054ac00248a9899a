//! Runs enter/exit cycles against an in-process manager and prints a JSON
//! report. Exits with status 1 when open connections after the run differ
//! from the baseline.
//!
//! ```bash
//! switchyard-stress --cycles 1000 --tenants 10
//! SWITCHYARD_PERSISTENT_CONNECTIONS=true switchyard-stress --simulate-leak
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing::{error, info};

use switchyard_server::config::SwitchyardConfig;
use switchyard_server::connection::NullConnector;
use switchyard_server::ownership::NoopOwnershipSync;
use switchyard_server::stress::{self, StressOptions};
use switchyard_server::telemetry::{self, LogFormat};
use switchyard_server::TenantContextManager;

/// Switchyard enter/exit stress run
#[derive(Parser, Debug)]
#[command(name = "switchyard-stress")]
#[command(version, about, long_about = None)]
struct Args {
    /// Enter/exit cycles to run
    #[arg(long, env = "SWITCHYARD_STRESS_CYCLES", default_value_t = 1000)]
    cycles: usize,

    /// Distinct tenants, visited round-robin
    #[arg(long, env = "SWITCHYARD_STRESS_TENANTS", default_value_t = 10)]
    tenants: usize,

    /// Prefix of generated tenant ids
    #[arg(long, default_value = "tenant")]
    tenant_prefix: String,

    /// Store index pool size
    #[arg(long, env = "SWITCHYARD_STORE_POOL_SIZE")]
    pool_size: Option<u32>,

    /// Store index base offset
    #[arg(long, env = "SWITCHYARD_STORE_BASE_OFFSET")]
    base_offset: Option<i64>,

    /// Keep backend connections open when client handles are dropped
    #[arg(long, env = "SWITCHYARD_PERSISTENT_CONNECTIONS")]
    persistent: bool,

    /// Open one unpooled tenant connection per cycle
    #[arg(long)]
    simulate_leak: bool,

    /// Disable the post-exit purge of tenant-alias connections
    #[arg(long)]
    no_purge: bool,

    #[arg(long, value_enum, env = "SWITCHYARD_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

impl Args {
    fn config(&self) -> SwitchyardConfig {
        let mut config = SwitchyardConfig::default();
        if let Some(pool_size) = self.pool_size {
            config.store.pool_size = pool_size;
        }
        if let Some(base_offset) = self.base_offset {
            config.store.base_offset = base_offset;
        }
        config.pool.persistent = self.persistent;
        config.guard.purge_tenant_connections = !self.no_purge;
        config
    }
}

async fn run(args: &Args) -> anyhow::Result<stress::StressReport> {
    let manager = TenantContextManager::new(
        &args.config(),
        Arc::new(NullConnector),
        Arc::new(NoopOwnershipSync),
    )
    .context("invalid configuration")?;
    let options = StressOptions {
        cycles: args.cycles,
        tenants: stress::tenant_ids(&args.tenant_prefix, args.tenants)
            .context("invalid tenant prefix")?,
        simulate_leak: args.simulate_leak,
    };

    info!(cycles = options.cycles, tenants = options.tenants.len(), "starting stress run");
    Ok(stress::run(&manager, &options).await)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    telemetry::init_tracing(args.log_format, "info,switchyard::transition=warn")?;

    let report = run(&args).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.leak_bound_held() {
        info!(reuse_ratio = report.reuse_ratio(), "leak bound held");
        Ok(ExitCode::SUCCESS)
    } else {
        error!(
            baseline = report.baseline_connections,
            final_connections = report.final_connections,
            "open connections differ from baseline"
        );
        Ok(ExitCode::FAILURE)
    }
}
