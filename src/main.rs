//! fdroid-repo CLI
//!
//! Entry point for the `fdroid-repo` command-line tool.

use clap::{Parser, Subcommand};
use fdroid_repo::builder::FdroidServerBuilder;
use fdroid_repo::config::{env_layer, BuiltinDefaults, ConfigError, CONFIG_FILE_NAME};
use fdroid_repo::identity::KeytoolGenerator;
use fdroid_repo::mirror::{self, Mirror};
use fdroid_repo::{
    serve, CycleOptions, EffectiveConfig, ExitCode, Orchestrator, OrchestratorError, Repository,
};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::process;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fdroid-repo")]
#[command(about = "Bootstrap, build and publish an F-Droid repository", version)]
struct Cli {
    /// Repository directory root (default: $REPO_DIR or ./fdroid)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Config file (default: <root>/fdroid-repo.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ensure the signing identity and regenerate config.yml and the landing page
    Bootstrap,

    /// Copy an APK into the artifact store
    Add {
        /// Path to the .apk file
        path: PathBuf,
    },

    /// Build a new signed index when artifacts or metadata changed
    Update {
        /// Rebuild even if nothing changed
        #[arg(long)]
        force: bool,
    },

    /// Run a full cycle: ensure identity, build if changed, publish to mirrors
    Publish {
        /// Rebuild even if nothing changed
        #[arg(long)]
        force: bool,
    },

    /// Print the signing certificate fingerprint
    Fingerprint,

    /// List artifacts in the store
    List,

    /// Remove every artifact and the metadata of a package
    Remove {
        /// Package identifier (applicationId)
        package: String,
    },

    /// Serve the repository over HTTP
    Serve {
        /// Address to bind (default from config: 127.0.0.1:8080)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print the effective configuration with secrets redacted
    Config,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let effective = match load_config(&cli) {
        Ok(effective) => effective,
        Err(e) => exit_with(&format!("configuration error: {}", e), ExitCode::Config, cli.json),
    };

    if let Commands::Config = cli.command {
        run_config(&effective);
    }

    let repo = match effective
        .settings()
        .map_err(OrchestratorError::from)
        .and_then(Repository::open)
    {
        Ok(repo) => repo,
        Err(e) => fail(&e, cli.json),
    };

    match cli.command {
        Commands::Bootstrap => run_bootstrap(&repo, cli.json),
        Commands::Add { path } => run_add(&repo, &path, cli.json),
        Commands::Update { force } => run_cycle(
            &repo,
            CycleOptions {
                force,
                publish: false,
            },
            cli.json,
        ),
        Commands::Publish { force } => run_cycle(
            &repo,
            CycleOptions {
                force,
                publish: true,
            },
            cli.json,
        ),
        Commands::Fingerprint => run_fingerprint(&repo, cli.json),
        Commands::List => run_list(&repo, cli.json),
        Commands::Remove { package } => run_remove(&repo, &package, cli.json),
        Commands::Serve { .. } => run_serve(&repo),
        Commands::Config => run_config(&effective),
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Defaults, then the repository config file, then environment, then flags
fn load_config(cli: &Cli) -> Result<EffectiveConfig, ConfigError> {
    let root = cli
        .root
        .clone()
        .or_else(|| std::env::var_os("REPO_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(BuiltinDefaults::default().repo_dir));

    let file = match &cli.config {
        Some(path) if !path.exists() => {
            return Err(ConfigError::IoError(format!(
                "config file not found: {}",
                path.display()
            )))
        }
        Some(path) => path.clone(),
        None => root.join(CONFIG_FILE_NAME),
    };

    let mut overrides = Map::new();
    if let Some(root) = &cli.root {
        overrides.insert("repo_dir".to_string(), json!(root));
    }
    if let Commands::Serve { bind: Some(bind) } = &cli.command {
        overrides.insert("serve".to_string(), json!({ "bind": bind }));
    }

    EffectiveConfig::build(
        Some(&file),
        env_layer(|name| std::env::var(name).ok()),
        (!overrides.is_empty()).then_some(Value::Object(overrides)),
    )
}

fn run_config(effective: &EffectiveConfig) -> ! {
    match effective.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => exit_with(&format!("cannot render config: {}", e), ExitCode::Config, false),
    }
    if let Err(e) = effective.settings() {
        exit_with(&format!("configuration error: {}", e), ExitCode::Config, false);
    }
    process::exit(0);
}

fn run_bootstrap(repo: &Repository, json_output: bool) {
    let keys = keytool(repo);
    let builder = FdroidServerBuilder::new(&repo.settings().builder);
    let orchestrator = Orchestrator::new(repo, &keys, &builder, &[]);

    let report = match orchestrator.bootstrap() {
        Ok(report) => report,
        Err(e) => fail(&e, json_output),
    };

    let fingerprint = report.identity.fingerprint;
    if json_output {
        print_json(&json!({
            "fingerprint": fingerprint.to_colon_hex(),
            "fingerprint_hex": fingerprint.to_hex(),
            "identity_created": report.identity.created,
            "config_written": report.config_written,
            "landing_written": report.landing_written,
        }));
    } else {
        if report.identity.created {
            println!("Created signing identity");
        }
        println!("SHA-256 fingerprint: {}", fingerprint.to_colon_hex());
    }
    process::exit(0);
}

fn run_add(repo: &Repository, path: &Path, json_output: bool) {
    match repo.add_artifact(path) {
        Ok(entry) => {
            if json_output {
                print_json(&json!(entry));
            } else {
                println!("Added {} ({})", entry.file_name, entry.package_id);
            }
            process::exit(0);
        }
        Err(e) => fail(&e, json_output),
    }
}

fn run_cycle(repo: &Repository, options: CycleOptions, json_output: bool) {
    let keys = keytool(repo);
    let builder = FdroidServerBuilder::new(&repo.settings().builder);
    let mirrors: Vec<Box<dyn Mirror>> = if options.publish {
        match mirror::from_settings(repo.settings()) {
            Ok(mirrors) => mirrors,
            Err(e) => fail(&e.into(), json_output),
        }
    } else {
        Vec::new()
    };
    let orchestrator = Orchestrator::new(repo, &keys, &builder, &mirrors);

    let report = match orchestrator.run_cycle(options) {
        Ok(report) => report,
        Err(e) => fail(&e, json_output),
    };

    if json_output {
        match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => exit_with(&e.to_string(), ExitCode::Internal, false),
        }
    } else {
        println!("{}", report.human_summary);
        for outcome in report.mirrors.iter().filter(|o| !o.ok) {
            println!(
                "  {}: {}",
                outcome.mirror,
                outcome.error.as_deref().unwrap_or("failed")
            );
        }
    }
    process::exit(report.exit_code().as_i32());
}

fn run_fingerprint(repo: &Repository, json_output: bool) {
    match repo.fingerprint() {
        Ok(fingerprint) => {
            if json_output {
                print_json(&json!({
                    "fingerprint": fingerprint.to_colon_hex(),
                    "fingerprint_hex": fingerprint.to_hex(),
                }));
            } else {
                println!("{}", fingerprint.to_colon_hex());
            }
            process::exit(0);
        }
        Err(e) => fail(&e, json_output),
    }
}

fn run_list(repo: &Repository, json_output: bool) {
    let entries = match repo.list_artifacts() {
        Ok(entries) => entries,
        Err(e) => {
            error!(error = %e, "cannot list artifact store");
            Vec::new()
        }
    };

    if json_output {
        print_json(&json!(entries));
    } else if entries.is_empty() {
        println!("No artifacts");
    } else {
        for entry in &entries {
            println!(
                "{}\t{}\t{}\t{}",
                entry.file_name,
                entry.size,
                &entry.sha256[..entry.sha256.len().min(12)],
                if entry.has_metadata { "metadata" } else { "-" }
            );
        }
    }
    process::exit(0);
}

fn run_remove(repo: &Repository, package: &str, json_output: bool) {
    let removed = match repo.remove_package(package) {
        Ok(removed) => removed,
        Err(e) => {
            error!(package = %package, error = %e, "remove failed");
            Vec::new()
        }
    };

    if json_output {
        print_json(&json!({ "package": package, "removed": removed }));
    } else if removed.is_empty() {
        println!("Nothing to remove for {}", package);
    } else {
        for path in &removed {
            println!("Removed {}", path.display());
        }
    }
    process::exit(0);
}

fn run_serve(repo: &Repository) {
    let settings = repo.settings();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => exit_with(&format!("cannot start runtime: {}", e), ExitCode::Internal, false),
    };

    if let Err(e) = runtime.block_on(serve::run(&settings.serve.bind, settings.serve_root())) {
        exit_with(&e.to_string(), ExitCode::Internal, false);
    }
    process::exit(0);
}

fn keytool(repo: &Repository) -> KeytoolGenerator {
    let settings = repo.settings();
    KeytoolGenerator::new(&settings.identity.keytool, settings.timeouts.keygen())
        .with_log(repo.layout().logs_dir().join("keytool.log"))
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => exit_with(&e.to_string(), ExitCode::Internal, false),
    }
}

fn fail(err: &OrchestratorError, json_output: bool) -> ! {
    exit_with(&err.to_string(), err.exit_code(), json_output)
}

fn exit_with(message: &str, code: ExitCode, json_output: bool) -> ! {
    error!(exit_code = code.as_i32(), "{}", message);
    if json_output {
        println!(
            "{}",
            json!({ "error": message, "exit_code": code.as_i32() })
        );
    } else {
        eprintln!("fdroid-repo: {}", message);
    }
    process::exit(code.as_i32());
}
