//! Command-line interface for `docpub`.
//!
//! Argument parsing and output formatting only; every operation is a call
//! into [`core_service::PublisherService`].
//!
//! Exit codes:
//!
//! | Code | Meaning                                            |
//! |------|----------------------------------------------------|
//! | 0    | success, every document published                  |
//! | 1    | batch finished with at least one failed document   |
//! | 2    | configuration error                                |
//! | 3    | authentication error                               |
//! | 4    | any other fatal error (repository, I/O)            |

use anyhow::{Context, Result};
use bridge_traits::time::LogLevel;
use clap::{Args, Parser, Subcommand};
use core_publish::BatchSummary;
use core_runtime::config::{
    apply_process_env, load_config, save_config, ConfigResolver, OAuth2Settings, PublisherConfig,
    PublishingOptions,
};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use core_service::{
    bootstrap_desktop, exit_code, Connectivity, PublishRequest, PublisherService, ServiceError,
    ServiceOptions, ServiceStatus,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Publish local documents to a SharePoint document library.
#[derive(Debug, Parser)]
#[command(name = "docpub", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "DOCPUB_CONFIG", default_value = "docpub.json")]
    pub config: PathBuf,

    /// Increase logging verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log format: compact, pretty or json
    #[arg(long, global = true, default_value = "compact", value_parser = parse_log_format)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write a validated configuration file
    Init(InitArgs),
    /// Resolve the repository and confirm read access
    Test,
    /// Sign in with the device code flow
    Login,
    /// Forget the cached session
    Logout,
    /// Publish a file or directory tree
    Publish(PublishArgs),
    /// Show sign-in and connectivity state
    Status {
        /// Also probe the repository
        #[arg(long)]
        check: bool,
    },
}

#[derive(Debug, Args)]
pub struct InitArgs {
    #[arg(long)]
    pub tenant_id: Option<String>,
    #[arg(long)]
    pub client_id: Option<String>,
    /// Site address, e.g. https://contoso.sharepoint.com/sites/docs
    #[arg(long)]
    pub site_url: Option<String>,
    /// Document library name
    #[arg(long)]
    pub library: Option<String>,
    /// Folder inside the library that publishing starts from
    #[arg(long)]
    pub root_folder: Option<String>,
    /// oauth2 (device code), client_secret or certificate
    #[arg(long)]
    pub auth_method: Option<String>,
    #[arg(long)]
    pub certificate_path: Option<String>,
    #[arg(long)]
    pub redirect_uri: Option<String>,
    /// Delegated scopes for the device code flow
    #[arg(long, value_delimiter = ',')]
    pub scopes: Vec<String>,
    #[arg(long)]
    pub max_concurrency: Option<usize>,
    /// Tags applied to every published document
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    /// Replace an existing configuration file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// File or directory to publish
    pub path: PathBuf,
    /// Validate only, never contact the repository
    #[arg(long)]
    pub dry_run: bool,
    /// Parallel uploads (1-16)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub concurrency: Option<u8>,
    /// Replace existing files instead of renaming the new copy
    #[arg(long)]
    pub overwrite: bool,
    /// Target folder, replacing the configured root folder
    #[arg(long)]
    pub folder: Option<String>,
    /// Skip list-item metadata and tags
    #[arg(long)]
    pub no_metadata: bool,
    /// Print the summary as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

fn parse_log_format(raw: &str) -> std::result::Result<LogFormat, String> {
    raw.parse().map_err(|e: core_runtime::Error| e.to_string())
}

impl Cli {
    pub fn logging_config(&self) -> LoggingConfig {
        let level = match (self.quiet, self.verbose) {
            (true, _) => LogLevel::Warn,
            (false, 0) => LogLevel::Info,
            (false, 1) => LogLevel::Debug,
            _ => LogLevel::Trace,
        };
        let config = LoggingConfig::default()
            .with_format(self.log_format)
            .with_level(level)
            .with_target(self.verbose > 0);
        match std::env::var("RUST_LOG") {
            Ok(filter) if !filter.trim().is_empty() => config.with_filter(filter),
            _ => config,
        }
    }

    pub fn init_logging(&self) -> Result<()> {
        init_logging(self.logging_config()).context("logging setup failed")
    }
}

/// Run a parsed command and return the process exit code.
pub async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Init(args) => init(&cli.config, args),
        Commands::Test => {
            let service = connect(&cli.config, ServiceOptions::default())?;
            let repository = service.test_connection().await?;
            println!(
                "Connected to {} (library '{}', drive {})",
                service.connection().repository_address,
                repository.drive_name,
                repository.drive_id
            );
            if repository.used_default_drive {
                println!(
                    "Library '{}' was not found; the site's default library is used",
                    service.connection().library_name
                );
            }
            Ok(exit_code::SUCCESS)
        }
        Commands::Login => {
            let service = connect(&cli.config, ServiceOptions::default())?;
            let account = service.login().await?;
            println!("Signed in as {}", account.username);
            Ok(exit_code::SUCCESS)
        }
        Commands::Logout => {
            let service = connect(&cli.config, ServiceOptions::non_interactive())?;
            service.logout().await;
            println!("Signed out");
            Ok(exit_code::SUCCESS)
        }
        Commands::Status { check } => {
            let service = connect(&cli.config, ServiceOptions::non_interactive())?;
            let status = service.status(check).await;
            print!("{}", render_status(&status));
            Ok(exit_code::SUCCESS)
        }
        Commands::Publish(args) => publish(&cli.config, args).await,
    }
}

/// Map a failure to the documented exit code.
pub fn exit_code_for(error: &anyhow::Error) -> i32 {
    if let Some(e) = error.downcast_ref::<ServiceError>() {
        return e.exit_code();
    }
    match error.downcast_ref::<core_runtime::Error>() {
        Some(core_runtime::Error::Io(_)) | None => exit_code::FATAL,
        Some(_) => exit_code::CONFIGURATION,
    }
}

fn resolve_config(path: &Path) -> std::result::Result<PublisherConfig, ServiceError> {
    let config = load_config(path)?;
    Ok(apply_process_env(config)?)
}

fn connect(path: &Path, options: ServiceOptions) -> Result<PublisherService> {
    let config = resolve_config(path)?;
    Ok(bootstrap_desktop(&config, options)?)
}

async fn publish(config_path: &Path, args: PublishArgs) -> Result<i32> {
    let service = connect(config_path, ServiceOptions::default())?;

    let mut request = PublishRequest {
        dry_run: args.dry_run,
        concurrency: args.concurrency.map(usize::from),
        overwrite: args.overwrite.then_some(true),
        target_folder: args.folder,
        add_metadata: args.no_metadata.then_some(false),
        progress: None,
    };
    if !args.json {
        request = request.with_progress(|done, total| eprintln!("[{}/{}] processed", done, total));
    }

    info!(path = %args.path.display(), dry_run = args.dry_run, "Publishing");
    let summary = service.publish(&args.path, request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", render_summary(&summary));
    }
    Ok(summary.exit_code())
}

fn init(path: &Path, args: InitArgs) -> Result<i32> {
    if path.exists() && !args.force {
        return Err(ServiceError::Config(core_runtime::Error::Config(format!(
            "{} already exists; pass --force to replace it",
            path.display()
        )))
        .into());
    }

    let existing = resolve_config(path)?;
    let config = merge_init_args(existing, args);

    let report = ConfigResolver::validate(&config);
    for issue in &report.warnings {
        warn!(field = %issue.field, "{}", issue.message);
    }
    if !report.is_valid() {
        return Err(ServiceError::Config(core_runtime::Error::Invalid(report)).into());
    }

    save_config(path, &config).map_err(ServiceError::from)?;
    println!("Wrote {}", path.display());
    Ok(exit_code::SUCCESS)
}

/// Command-line values win over the file and the environment.
fn merge_init_args(mut config: PublisherConfig, args: InitArgs) -> PublisherConfig {
    fn set(target: &mut String, value: Option<String>) {
        if let Some(value) = value {
            *target = value;
        }
    }

    set(&mut config.tenant_id, args.tenant_id);
    set(&mut config.client_id, args.client_id);
    set(&mut config.repository_address, args.site_url);
    set(&mut config.library_name, args.library);
    if args.auth_method.is_some() {
        config.auth_method = args.auth_method;
    }
    if args.root_folder.is_some() {
        config.root_folder_path = args.root_folder;
    }
    if args.certificate_path.is_some() {
        config.certificate_path = args.certificate_path;
    }

    if args.redirect_uri.is_some() || !args.scopes.is_empty() {
        let oauth2 = config
            .oauth2
            .get_or_insert_with(OAuth2Settings::interactive_defaults);
        set(&mut oauth2.redirect_uri, args.redirect_uri);
        if !args.scopes.is_empty() {
            oauth2.scopes = args.scopes;
        }
    }

    if args.max_concurrency.is_some() || !args.tags.is_empty() {
        let options = config
            .publishing_options
            .get_or_insert_with(PublishingOptions::default);
        if let Some(max) = args.max_concurrency {
            options.max_concurrency = max;
        }
        if !args.tags.is_empty() {
            options.default_tags = args.tags;
        }
    }

    // Secrets stay in the environment.
    config.client_secret = None;
    config
}

fn render_summary(summary: &BatchSummary) -> String {
    let mut out = summary.to_string();
    for result in summary.results.iter().filter(|r| !r.warnings.is_empty()) {
        for warning in &result.warnings {
            out.push_str(&format!("  WARNING {}: {}\n", result.target_path, warning));
        }
    }
    out
}

fn render_status(status: &ServiceStatus) -> String {
    let mut out = format!(
        "Repository: {} (library '{}')\nSession:    {}\n",
        status.repository_address, status.library_name, status.auth.state
    );
    if let Some(account) = &status.auth.account {
        out.push_str(&format!("Account:    {}\n", account.username));
    }
    if let Some(expires_at) = status.auth.expires_at {
        out.push_str(&format!("Expires:    {}\n", expires_at.to_rfc3339()));
    }
    out.push_str(&format!("Cache:      {}\n", status.auth.cache_location));
    match &status.connectivity {
        None => {}
        Some(Connectivity::Reachable(repository)) => out.push_str(&format!(
            "Access:     ok (drive {})\n",
            repository.drive_id
        )),
        Some(Connectivity::Unreachable(reason)) => {
            out.push_str(&format!("Access:     failed: {}\n", reason))
        }
        Some(Connectivity::SignInRequired) => {
            out.push_str("Access:     not checked, run `docpub login` first\n")
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_publish_arguments() {
        let cli = Cli::try_parse_from([
            "docpub",
            "publish",
            "./docs",
            "--dry-run",
            "--concurrency",
            "4",
            "--folder",
            "Handbook",
            "--no-metadata",
        ])
        .unwrap();

        match cli.command {
            Commands::Publish(args) => {
                assert_eq!(args.path, PathBuf::from("./docs"));
                assert!(args.dry_run);
                assert_eq!(args.concurrency, Some(4));
                assert_eq!(args.folder.as_deref(), Some("Handbook"));
                assert!(args.no_metadata);
                assert!(!args.overwrite);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_concurrency_is_bounded() {
        assert!(Cli::try_parse_from(["docpub", "publish", ".", "--concurrency", "0"]).is_err());
        assert!(Cli::try_parse_from(["docpub", "publish", ".", "--concurrency", "17"]).is_err());
    }

    #[test]
    fn test_verbosity_levels() {
        let cli = Cli::try_parse_from(["docpub", "-vv", "status"]).unwrap();
        assert_eq!(cli.logging_config().level, LogLevel::Trace);

        let cli = Cli::try_parse_from(["docpub", "--quiet", "--log-format", "json", "test"]).unwrap();
        assert_eq!(cli.logging_config().level, LogLevel::Warn);
        assert_eq!(cli.log_format, LogFormat::Json);

        assert!(Cli::try_parse_from(["docpub", "--log-format", "xml", "test"]).is_err());
    }

    fn init_args() -> InitArgs {
        InitArgs {
            tenant_id: Some("t1".into()),
            client_id: Some("c1".into()),
            site_url: Some("https://contoso.example/sites/docs".into()),
            library: Some("Documents".into()),
            root_folder: None,
            auth_method: None,
            certificate_path: None,
            redirect_uri: Some("https://localhost/cb".into()),
            scopes: vec!["repo.readwrite".into()],
            max_concurrency: None,
            tags: vec![],
            force: false,
        }
    }

    #[test]
    fn test_init_writes_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docpub.json");

        let code = init(&path, init_args()).unwrap();
        assert_eq!(code, exit_code::SUCCESS);

        let written = load_config(&path).unwrap();
        assert_eq!(written.tenant_id, "t1");
        assert_eq!(written.oauth2.unwrap().scopes, vec!["repo.readwrite"]);
        assert!(written.client_secret.is_none());

        let err = init(&path, init_args()).unwrap_err();
        assert_eq!(exit_code_for(&err), exit_code::CONFIGURATION);
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docpub.json");
        let args = InitArgs {
            site_url: Some("http://contoso.example".into()),
            ..init_args()
        };

        let err = init(&path, args).unwrap_err();
        assert_eq!(exit_code_for(&err), exit_code::CONFIGURATION);
        assert!(!path.exists());
    }

    #[test]
    fn test_merge_keeps_file_values() {
        let existing = PublisherConfig {
            library_name: "Policies".into(),
            client_secret: Some("from-file".into()),
            ..Default::default()
        };
        let merged = merge_init_args(
            existing,
            InitArgs {
                library: None,
                max_concurrency: Some(5),
                tags: vec!["handbook".into()],
                ..init_args()
            },
        );

        assert_eq!(merged.library_name, "Policies");
        assert!(merged.client_secret.is_none());
        let options = merged.publishing_options.unwrap();
        assert_eq!(options.max_concurrency, 5);
        assert_eq!(options.default_tags, vec!["handbook"]);
    }

    #[test]
    fn test_exit_code_for_unknown_errors() {
        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), exit_code::FATAL);
    }
}
