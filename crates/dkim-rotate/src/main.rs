// # dkim-rotate - DKIM key rotation
//
// This binary is a THIN integration layer: it reads configuration, wires the
// pieces from dkim-rotate-core together and runs one rotation. Rotation,
// DNS and ledger logic all live in dkim-rotate-core.
//
// One run:
// 1. Load settings, apply command line overrides
// 2. Determine the selector (`YYYYMM`, or the one given on the command line)
// 3. Load or generate one key per key name
// 4. Read the previous key table
// 5. Load providers, the record ledger and provider sessions
// 6. Publish, verify and retire DNS records
// 7. Rewrite the key and signing tables
// 8. Save the ledger and provider sessions
//
// ## Example
//
// ```bash
// # Prepare next month's keys without touching DNS
// dkim-rotate --next-month --no-dns --store-in-new-files -v
//
// # Monthly cron job
// dkim-rotate --config /etc/opendkim-genkeys.yml
// ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use dkim_rotate_core::config::{self, DomainConfig, ProviderConfig};
use dkim_rotate_core::keys::generate_selector;
use dkim_rotate_core::{
    EngineConfig, HickoryTxtLookup, KeyStore, KeyTable, PropagationVerifier, ProviderOverride,
    ProviderRegistry, RecordLedger, RotationEngine, SessionStore, Settings, TableWriter,
};

/// Exit codes for different termination scenarios
///
/// - 0: Run completed (failed domains are logged, not fatal)
/// - 1: Configuration error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RotateExitCode {
    Success = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<RotateExitCode> for ExitCode {
    fn from(code: RotateExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Generate DKIM keys, publish them in DNS and update the OpenDKIM tables.
#[derive(Parser, Debug)]
#[command(name = "dkim-rotate", version, about)]
struct Cli {
    /// Selector to use instead of the current month's `YYYYMM`
    selector: Option<String>,

    /// Main settings file
    #[arg(long, default_value = "/etc/opendkim-genkeys.yml")]
    config: PathBuf,

    /// Log progress (info level)
    #[arg(short, long)]
    verbose: bool,

    /// Log everything (debug level)
    #[arg(long)]
    debug: bool,

    /// Use next month's selector
    #[arg(short, long)]
    next_month: bool,

    /// Print the selector and exit
    #[arg(short = 's', long)]
    output_selector: bool,

    /// Do not publish records in DNS
    #[arg(long)]
    no_dns: bool,

    /// Do not delete expired records
    #[arg(long)]
    no_cleanup: bool,

    /// Do not write tables, ledger or session files
    #[arg(long)]
    no_write_file: bool,

    /// Write `<file>.new` instead of replacing tables and the ledger
    #[arg(long)]
    store_in_new_files: bool,

    /// Directory for the domains, providers, ledger and session files
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// OpenDKIM configuration directory
    #[arg(long)]
    opendkim_dir: Option<PathBuf>,

    /// Directory private keys are written to
    #[arg(long)]
    key_directory: Option<PathBuf>,

    /// Publish nothing: every domain uses the `null` provider
    #[arg(long, conflicts_with = "use_fail")]
    use_null: bool,

    /// Fail every DNS update: every domain uses the `fail` provider
    #[arg(long)]
    use_fail: bool,

    /// Log level when neither --verbose nor --debug is given
    #[arg(long, env = "DKIM_ROTATE_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

impl Cli {
    fn log_level(&self) -> Level {
        if self.debug {
            return Level::DEBUG;
        }
        if self.verbose {
            return Level::INFO;
        }
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "error" => Level::ERROR,
            _ => Level::WARN,
        }
    }

    fn provider_override(&self) -> Option<ProviderOverride> {
        if self.use_null {
            Some(ProviderOverride::Null)
        } else if self.use_fail {
            Some(ProviderOverride::Fail)
        } else {
            None
        }
    }

    /// Command line switches take precedence over the settings file
    fn apply_to(&self, settings: &mut Settings) {
        if let Some(dir) = &self.working_dir {
            settings.working_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.opendkim_dir {
            settings.opendkim_dir = dir.clone();
        }
        if let Some(dir) = &self.key_directory {
            settings.key_directory = dir.clone();
        }
        if self.no_dns {
            settings.update_dns = false;
        }
        if self.no_cleanup {
            settings.cleanup = false;
        }
        if self.no_write_file {
            settings.no_write_file = true;
        }
        if self.store_in_new_files {
            settings.store_in_new_files = true;
        }
    }
}

/// Everything a run needs, loaded before anything is changed
struct Prepared {
    settings: Settings,
    selector: String,
    domains: Vec<DomainConfig>,
    providers: BTreeMap<String, ProviderConfig>,
    provider_override: Option<ProviderOverride>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level())
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return RotateExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return RotateExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        let prepared = match prepare(&cli).await {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return RotateExitCode::Success,
            Err(e) => {
                error!("Configuration error: {:#}", e);
                return RotateExitCode::ConfigError;
            }
        };

        match rotate(prepared).await {
            Ok(()) => RotateExitCode::Success,
            Err(e) => {
                error!("Rotation failed: {:#}", e);
                RotateExitCode::RuntimeError
            }
        }
    });

    code.into()
}

/// Load and validate configuration
///
/// Returns `None` when the run ends after printing the selector.
async fn prepare(cli: &Cli) -> Result<Option<Prepared>> {
    let mut settings = Settings::load(&cli.config).await;
    cli.apply_to(&mut settings);
    settings.validate()?;

    let selector = match &cli.selector {
        Some(selector) => selector.clone(),
        None => generate_selector(Utc::now().date_naive(), cli.next_month),
    };
    if cli.output_selector {
        println!("{}", selector);
        return Ok(None);
    }
    info!("Using selector {}", selector);

    let domains = config::load_domains(&settings.data_path(&settings.domains_file)).await?;
    info!("Loaded {} domain(s)", domains.len());

    let providers_path = settings.data_path(&settings.providers_file);
    let providers = match config::load_providers(&providers_path).await? {
        Some(providers) => providers,
        None => {
            if settings.update_dns || settings.cleanup {
                warn!(
                    "DNS API definitions {} not found, DNS will not be updated",
                    providers_path.display()
                );
            }
            settings.update_dns = false;
            settings.cleanup = false;
            BTreeMap::new()
        }
    };

    Ok(Some(Prepared {
        settings,
        selector,
        domains,
        providers,
        provider_override: cli.provider_override(),
    }))
}

fn build_registry() -> ProviderRegistry {
    let registry = ProviderRegistry::with_builtin();

    #[cfg(feature = "cloudflare")]
    {
        info!("Registering Cloudflare provider");
        dkim_rotate_provider_cloudflare::register(&registry);
    }

    registry
}

async fn rotate(prepared: Prepared) -> Result<()> {
    let Prepared {
        settings,
        selector,
        domains,
        providers,
        provider_override,
    } = prepared;

    let key_store = KeyStore::new(
        &settings.key_directory,
        settings.key_bits,
        settings.key_file_mode,
    );
    let keys = key_store
        .ensure_all(&domains, &selector)
        .await
        .context("Failed to prepare keys")?;

    let prior = KeyTable::read(&settings.key_table_path()).await?;

    let ledger_path = settings.data_path(&settings.ledger_file);
    let sessions_path = settings.data_path(&settings.sessions_file);
    let mut ledger = RecordLedger::load(&ledger_path).await;
    let mut sessions = SessionStore::load(&sessions_path).await;

    let engine_config = EngineConfig {
        provider_override,
        ..settings.engine_config()
    };
    let lookup_timeout = Duration::from_secs(engine_config.call_timeout_secs);
    let engine = RotationEngine::new(
        Arc::new(build_registry()),
        providers,
        PropagationVerifier::new(Arc::new(HickoryTxtLookup::new(lookup_timeout)), lookup_timeout),
        engine_config,
    );

    let outcome = engine
        .run(&domains, &keys, &mut ledger, &mut sessions)
        .await;

    if settings.no_write_file {
        info!("Not writing tables, ledger or session data");
    } else {
        if prior.malformed_lines() > 0 {
            error!(
                "{} has {} malformed line(s), not rewriting the tables",
                settings.key_table_path().display(),
                prior.malformed_lines()
            );
        } else {
            TableWriter::new(
                settings.key_table_path(),
                settings.signing_table_path(),
                key_store.key_directory(),
            )
            .with_new_files(settings.store_in_new_files)
            .with_file_mode(settings.table_file_mode)
            .write(&domains, &keys, &prior, &outcome.failed_domains)
            .await?;
        }

        ledger
            .save(&settings.ledger_output_path())
            .await
            .context("Failed to save the record ledger")?;
        sessions
            .save(&sessions_path)
            .await
            .context("Failed to save DNS API session data")?;
    }

    if outcome.failed_domains.is_empty() {
        info!("All {} domain(s) rotated to {}", domains.len(), selector);
    } else {
        for domain in &outcome.failed_domains {
            error!("Failed to update domain {}", domain);
        }
    }

    Ok(())
}
