//! pgreconcile - Main entry point

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::CommandFactory;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use pgreconcile::cli::{Cli, Commands};
use pgreconcile::host::PackageTool;
use pgreconcile::{
    process_guard, sanity, HostFacts, Host, PlatformProfile, ProcessGuard, Reconciler,
    ReconciliationState, ReconcileError, RunLock, RunReport, ServerConfig, ServerSpec,
    StepOutcome,
};

/// Initialize tracing; RUST_LOG wins over `--log-level`
fn init_logger(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logger(&cli.log_level);
    debug!("CLI arguments parsed");

    // Interrupted runs must not leave package managers or initdb running
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    match cli.command {
        Commands::Apply {
            ref config,
            ref lock_file,
            skip_preflight,
            json,
        } => run_apply(&cli, config.as_deref(), lock_file, skip_preflight, json),
        Commands::Validate { ref config } => run_validate(config),
        Commands::InitConfig { ref path } => {
            ServerConfig::default()
                .save_to_file(path)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("✓ Default configuration written to {}", path.display());
            Ok(())
        }
        Commands::Facts { ref config } => run_facts(&cli, config.as_deref()),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "pgreconcile", &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ServerConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            Ok(ServerConfig::load_from_file(path)?)
        }
        None => {
            info!("No configuration file given, using defaults");
            Ok(ServerConfig::default())
        }
    }
}

/// Load, detect and resolve everything a run needs
fn resolve(cli: &Cli, config: Option<&Path>) -> Result<(HostFacts, ServerSpec, PlatformProfile)> {
    let config = load_config(config)?;
    let facts = HostFacts::detect(cli.platform_family).context("detecting platform")?;
    let spec = ServerSpec::resolve(&config, facts.family).context("resolving configuration")?;
    let profile = PlatformProfile::resolve(&spec, &facts).context("resolving platform profile")?;
    Ok((facts, spec, profile))
}

fn run_validate(path: &Path) -> Result<()> {
    info!("Validating configuration file: {}", path.display());
    let config = match ServerConfig::load_from_file(path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration file: {}", e);
            eprintln!("✗ Failed to load configuration file: {}", e);
            std::process::exit(1);
        }
    };

    match config.validate() {
        Ok(()) => {
            println!("✓ Configuration file is valid: {}", path.display());
            Ok(())
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_facts(cli: &Cli, config: Option<&Path>) -> Result<()> {
    let (facts, spec, profile) = resolve(cli, config)?;

    let summary = serde_json::json!({
        "facts": facts,
        "server": {
            "version": spec.version,
            "setup_repo": spec.setup_repo,
            "data_directory": spec.data_directory,
            "config_directory": spec.config_directory,
            "hba_file": spec.hba_file,
            "ident_file": spec.ident_file,
            "external_pid_file": spec.external_pid_file,
            "password": spec.password.to_string(),
            "port": spec.port,
            "template_source": spec.template_source.to_string(),
            "user": spec.user,
        },
        "profile": {
            "service_name": profile.service_name,
            "server_package": profile.server_package,
            "client_package": profile.client_package,
            "bin_dir": profile.bin_dir,
            "runs_initdb": profile.initdb.is_some(),
            "unit_override": profile.unit_override,
            "repository": profile.repository.as_ref().map(|r| &r.path),
        },
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_apply(
    cli: &Cli,
    config: Option<&Path>,
    lock_file: &Path,
    skip_preflight: bool,
    json: bool,
) -> Result<()> {
    let (facts, spec, profile) = resolve(cli, config)?;

    if skip_preflight || cli.dry_run {
        debug!("Pre-flight checks skipped");
    } else {
        sanity::run_preflight_checks(
            facts.family,
            PackageTool::for_family(facts.family),
            spec.setup_repo,
        );
    }

    // A dry run changes nothing and does not contend for the lock
    let _lock = if cli.dry_run {
        None
    } else {
        Some(RunLock::acquire(lock_file)?)
    };

    let host = Host::system(facts.family, spec.template_source.clone());
    let guard = ProcessGuard::new();
    let mut state = ReconciliationState::new(&spec);

    let result = Reconciler::new(&spec, &profile, &host)
        .dry_run(cli.dry_run)
        .run(&mut state);

    debug!("Children still tracked after run: {}", guard.child_count());
    drop(guard);

    let report = RunReport::from_state(&state, cli.dry_run);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if let Err(e) = result {
        print_failure(&e);
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    for step in &report.steps {
        let mark = match step.outcome {
            StepOutcome::Unchanged | StepOutcome::Skipped => "·",
            StepOutcome::Changed | StepOutcome::Planned => "✓",
            StepOutcome::Deferred => "…",
            StepOutcome::Failed => "✗",
        };
        println!("{} {}: {}", mark, step.phase, step.outcome);
        for action in &step.actions {
            println!("    {}", action);
        }
        if let Some(note) = &step.note {
            println!("    ({})", note);
        }
    }

    match (report.dry_run, report.changed) {
        (true, true) => println!("\nDry run: changes pending."),
        (true, false) => println!("\nDry run: host already converged."),
        (false, true) => println!("\n✓ PostgreSQL {} reconciled.", report.version),
        (false, false) => println!("\n✓ PostgreSQL {} already converged.", report.version),
    }
}

fn print_failure(err: &ReconcileError) {
    error!("Reconciliation failed: {}", err);
    eprintln!("\n✗ Reconciliation failed: {}", err);
    if let Some(output) = err.captured_output().filter(|o| !o.trim().is_empty()) {
        eprintln!("--- Command output ---");
        eprintln!("{}", output.trim_end());
    }
}
