//! ReconWatch CLI — runs one job to completion against a target, for local
//! and manual use independent of the out-of-scope HTTP façade (spec.md §6).
//! `clap` derive usage follows
//! `examples/cp5337-sx9/crates/sx9-smart-crate-orchestrator/src/main.rs`.

use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use reconwatch_orchestrator::settings::Settings;
use reconwatch_orchestrator::AppContext;
use reconwatch_storage::MemoryStore;
use reconwatch_types::{Capability, Priority};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reconwatch", about = "ReconWatch threat-intelligence job runner", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (info by default; -v for debug)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single capability against a target and print its findings
    Scan {
        /// Capability to run
        #[arg(value_enum)]
        capability: CapabilityArg,
        /// Target domain, host or comma-separated dark-web keyword list
        target: String,
        /// Job priority
        #[arg(long, value_enum, default_value = "normal")]
        priority: PriorityArg,
    },
    /// Run Exposure, Infra and Email sequentially and print the aggregated risk score
    QuickScan {
        /// Target domain
        domain: String,
    },
}

#[derive(Copy, Clone, ValueEnum)]
enum CapabilityArg {
    Exposure,
    DarkWeb,
    Email,
    Infra,
    Network,
    Investigation,
}

impl From<CapabilityArg> for Capability {
    fn from(value: CapabilityArg) -> Self {
        match value {
            CapabilityArg::Exposure => Capability::ExposureDiscovery,
            CapabilityArg::DarkWeb => Capability::DarkWebIntelligence,
            CapabilityArg::Email => Capability::EmailSecurity,
            CapabilityArg::Infra => Capability::InfrastructureTesting,
            CapabilityArg::Network => Capability::NetworkSecurity,
            CapabilityArg::Investigation => Capability::Investigation,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
enum PriorityArg {
    Critical,
    High,
    Normal,
    Low,
    Background,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Critical => Priority::Critical,
            PriorityArg::High => Priority::High,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::Low => Priority::Low,
            PriorityArg::Background => Priority::Background,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(filter)).init();

    let settings = Settings::from_env();
    if settings.tor_required {
        // spec.md §7: if TOR_REQUIRED and the proxy is unreachable, the
        // system fails to start. We do not probe the proxy here (probing is
        // the dark-web collector's own concern); we only honor the flag by
        // refusing to start when it cannot be resolved to a usable address.
        if settings.tor_proxy_host.is_empty() {
            anyhow::bail!("TOR_REQUIRED is set but no TOR_PROXY_HOST is configured");
        }
    }
    let ctx = AppContext::new(Arc::new(MemoryStore::new()), settings);

    match cli.command {
        Commands::Scan { capability, target, priority } => {
            let job = ctx.create_job(capability.into(), target, None, Some(priority.into()), None).await?;
            let completed = ctx.execute_job(&job.id).await?;
            println!("job {} -> {:?}", completed.id, completed.status);
            for finding in &completed.findings {
                println!("  [{:?}] {} ({:.1})", finding.severity, finding.title, finding.risk_score);
            }
            if let Some(error) = &completed.error {
                eprintln!("error: {error}");
            }
        }
        Commands::QuickScan { domain } => {
            let summary = ctx.quick_scan(domain).await?;
            println!("target {} -> overall risk {:.1} ({:?})", summary.target, summary.risk.overall_score, summary.risk.risk_level);
            for job in &summary.jobs {
                println!("  {:?}: {} findings", job.capability, job.findings.len());
            }
        }
    }

    Ok(())
}
