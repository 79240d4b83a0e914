use std::path::PathBuf;

use nucleus::config::NucleusConfig;
use nucleus::error::NucleusError;

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run_cli().await {
        tracing::error!(%err, "nucleus exiting");
        std::process::exit(err.exit_code());
    }
}

/// Logs go to stderr unconditionally: stdout is the JSON-RPC wire.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

async fn run_cli() -> Result<(), NucleusError> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut command = "serve".to_string();
    if let Some(first) = args.first().cloned() {
        if first == "serve" || first == "verify" || first == "--help" || first == "-h" {
            args.remove(0);
            command = first;
        } else if first.starts_with('-') {
            command = "serve".to_string();
        } else {
            return Err(NucleusError::Config(format!("unknown subcommand: {first}")));
        }
    }

    if command == "--help" || command == "-h" {
        print_usage();
        return Ok(());
    }

    let mut brain_root: Option<PathBuf> = None;
    let mut strict = false;
    let mut remaining = args;
    while let Some(flag) = remaining.first().cloned() {
        remaining.remove(0);
        match flag.as_str() {
            "--brain-root" => brain_root = Some(PathBuf::from(take_arg("--brain-root", &mut remaining)?)),
            "--strict" => strict = true,
            other => return Err(NucleusError::Config(format!("unknown flag: {other}"))),
        }
    }

    if let Some(root) = brain_root {
        std::env::set_var(nucleus::config::BRAIN_PATH_ENV, root);
    }

    let config = NucleusConfig::resolve(strict)?;

    match command.as_str() {
        "verify" => run_verify(config).await,
        _ => run_serve(config).await,
    }
}

async fn run_serve(config: NucleusConfig) -> Result<(), NucleusError> {
    let server = nucleus::bootstrap(config).await?;
    server.serve_stdio().await.map_err(|e| NucleusError::Io(e.to_string()))
}

/// `nucleus verify`: check the audit chain and exit without serving.
/// Exit code follows the same `--strict` semantics as startup (§4.10).
async fn run_verify(config: NucleusConfig) -> Result<(), NucleusError> {
    config.ensure_brain_root()?;
    let locks = nucleus_ledger::LockManager::new(config.locks_dir(), config.lock_wait);
    let ledger = nucleus_ledger::AuditLedger::new(config.ledger_dir(), locks);

    let report = ledger
        .verify()
        .await
        .map_err(|e| NucleusError::InvariantViolated(format!("audit chain unreadable: {e}")))?;

    match report {
        nucleus_ledger::VerifyReport::Ok { entries } => {
            println!("audit chain ok: {entries} entries");
            Ok(())
        }
        nucleus_ledger::VerifyReport::Broken { seq, reason } => {
            println!("audit chain broken at seq {seq}: {reason}");
            Err(NucleusError::InvariantViolated(format!(
                "audit chain broken at seq {seq}: {reason}"
            )))
        }
    }
}

fn take_arg(flag: &str, remaining: &mut Vec<String>) -> Result<String, NucleusError> {
    if remaining.is_empty() {
        return Err(NucleusError::Config(format!("missing value for {flag}")));
    }
    Ok(remaining.remove(0))
}

fn print_usage() {
    println!(
        "nucleus serve [--brain-root PATH] [--strict]\n\
nucleus verify [--brain-root PATH] [--strict]"
    );
}
