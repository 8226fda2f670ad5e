//! CLI definitions and command routing.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::apply::Applier;
use crate::config::{Config, DeployPaths};
use crate::converge::{ConvergencePass, PassOutcome};
use crate::plan::{EdgeKind, Plan};
use crate::platform::PlatformId;
use crate::resolve::resolve;
use crate::slot::ArtifactSlot;

#[derive(Parser)]
#[command(name = "certdeploy")]
#[command(about = "Deploy certificate bundles and keep the system trust store in sync")]
pub struct Cli {
    /// Log filter, e.g. "info" or "certdeploy=debug"
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command that plans a pass.
#[derive(Args)]
pub struct PassArgs {
    /// Manifest path (default: certdeploy.toml in the data directory)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Platform family of this host (overrides the manifest), e.g. Debian
    #[arg(long)]
    pub platform: Option<String>,
    /// Operating-system name, used in error messages
    #[arg(long)]
    pub os_name: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the operations a convergence pass would apply
    Plan {
        #[command(flatten)]
        pass: PassArgs,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Place and remove artifacts, then refresh the trust store if needed
    Apply {
        #[command(flatten)]
        pass: PassArgs,
        /// Treat this directory as the host's filesystem root
        #[arg(long)]
        root: Option<PathBuf>,
        /// Report what would change without touching anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the destination path of one artifact (for scripting)
    Path {
        #[arg(value_enum)]
        slot: SlotArg,
        name: String,
        #[command(flatten)]
        pass: PassArgs,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Format {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SlotArg {
    /// Leaf certificate ({name}.crt)
    Cert,
    /// Private key ({name}.key)
    Key,
    /// Bundled PEM ({name}.pem)
    Pem,
    /// Intermediate certificate ({name}.intermediate.crt)
    Intermediate,
    /// CA certificate ({name}.ca.crt)
    Ca,
}

impl From<SlotArg> for ArtifactSlot {
    fn from(arg: SlotArg) -> Self {
        match arg {
            SlotArg::Cert => ArtifactSlot::Cert,
            SlotArg::Key => ArtifactSlot::Key,
            SlotArg::Pem => ArtifactSlot::Pem,
            SlotArg::Intermediate => ArtifactSlot::Intermediate,
            SlotArg::Ca => ArtifactSlot::Ca,
        }
    }
}

/// Run CLI and dispatch to handlers.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    let paths = DeployPaths::default_paths();

    match cli.command {
        Commands::Plan { pass, format } => cmd_plan(&paths, &pass, format),
        Commands::Apply {
            pass,
            root,
            dry_run,
        } => cmd_apply(&paths, &pass, root, dry_run),
        Commands::Path { slot, name, pass } => cmd_path(&paths, &pass, slot.into(), &name),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

struct Loaded {
    config: Config,
    platform: PlatformId,
    source_root: String,
}

fn load(paths: &DeployPaths, args: &PassArgs) -> Result<Loaded> {
    let manifest = args.config.clone().unwrap_or_else(|| paths.manifest.clone());
    let config = Config::load(&manifest)?;
    let family = args
        .platform
        .clone()
        .or_else(|| config.platform.clone())
        .context("no platform family given; pass --platform or set `platform` in the manifest")?;
    let mut platform = PlatformId::new(family);
    if let Some(name) = args.os_name.clone().or_else(|| config.os_name.clone()) {
        platform = platform.with_os_name(name);
    }
    let source_root = config.source_root(paths);
    Ok(Loaded {
        config,
        platform,
        source_root,
    })
}

fn run_pass(loaded: &Loaded) -> PassOutcome {
    let pass = ConvergencePass::new(
        loaded.config.policy(),
        loaded.platform.clone(),
        loaded.source_root.clone(),
    )
    .with_permissions(loaded.config.permissions.to_set());
    pass.run(&loaded.config.certificates)
}

fn report_failures(outcome: &PassOutcome) -> Result<()> {
    for failure in &outcome.failures {
        eprintln!("Error: {}: {}", failure.name, failure.error);
    }
    if !outcome.is_success() {
        anyhow::bail!("{} certificate bundle(s) could not be planned", outcome.failures.len());
    }
    Ok(())
}

fn cmd_plan(paths: &DeployPaths, args: &PassArgs, format: Format) -> Result<()> {
    let loaded = load(paths, args)?;
    let outcome = run_pass(&loaded);
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        Format::Text => print!("{}", render_plan(&outcome.plan)),
    }
    report_failures(&outcome)
}

fn cmd_apply(paths: &DeployPaths, args: &PassArgs, root: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let loaded = load(paths, args)?;
    let outcome = run_pass(&loaded);
    let store = crate::platform::default_trust_store();
    let mut applier = Applier::new(store.as_ref()).dry_run(dry_run);
    if let Some(root) = root {
        applier = applier.with_root(root);
    }
    let report = applier.apply(&outcome.plan)?;
    let verb = if dry_run { "Would change" } else { "Changed" };
    for resource in &report.changed {
        println!("{verb}: {resource}");
    }
    let verb = if dry_run { "Would run" } else { "Ran" };
    for action in &report.actions_run {
        println!("{verb}: {action}");
    }
    if report.changed.is_empty() {
        println!("Nothing to do.");
    }
    report_failures(&outcome)
}

fn cmd_path(paths: &DeployPaths, args: &PassArgs, slot: ArtifactSlot, name: &str) -> Result<()> {
    crate::config::validate_name(name)?;
    let loaded = load(paths, args)?;
    let policy = loaded.config.policy();
    let platform = policy.resolve(&loaded.platform)?;
    let bundle = loaded.config.certificates.get(name).cloned().unwrap_or_default();
    let resolved = resolve(name, slot, &bundle.override_for(slot), platform, &loaded.source_root);
    println!("{}", resolved.path());
    Ok(())
}

/// Human-readable plan: one operation per line with its edges indented below.
pub fn render_plan(plan: &Plan) -> String {
    let mut out = String::new();
    for op in &plan.operations {
        out.push_str(&format!("{} {}", op.resource, op.ensure));
        if let Some(source) = &op.source {
            out.push_str(&format!(" source={source}"));
        }
        if let Some(p) = &op.permissions {
            out.push_str(&format!(" owner={} group={} mode={}", p.owner, p.group, p.mode));
        }
        out.push('\n');
        for edge in plan.edges_from(&op.resource) {
            out.push_str(&format!("  {} {}\n", edge_verb(edge.kind), edge.to));
        }
    }
    for action in &plan.actions {
        out.push_str(&format!("{} refresh-only: {}\n", action.resource, action.command.join(" ")));
        for edge in plan.edges_from(&action.resource) {
            out.push_str(&format!("  {} {}\n", edge_verb(edge.kind), edge.to));
        }
    }
    out
}

fn edge_verb(kind: EdgeKind) -> &'static str {
    match kind {
        EdgeKind::Requires => "requires",
        EdgeKind::Notifies => "notifies",
        EdgeKind::Before => "before",
    }
}
