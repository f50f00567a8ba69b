// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared entry point of the provisioning binaries.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, FromArgMatches, Parser};
use tracing::{error, info, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{Config, TopicMode};
use crate::report::SyncReport;
use crate::sync::{RunOptions, Syncer};

/// Which of the two provisioning tools is running. They differ only in
/// their name, config file and default topic layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    /// Grants each service type's users access to one topic per type.
    Gocdb,
    /// Gives every endpoint its own topic.
    CloudInfo,
}

impl Tool {
    pub fn command_name(self) -> &'static str {
        match self {
            Tool::Gocdb => "ams-create-users-gocdb",
            Tool::CloudInfo => "ams-create-users-cloud-info",
        }
    }

    pub fn default_topic_mode(self) -> TopicMode {
        match self {
            Tool::Gocdb => TopicMode::ServiceType,
            Tool::CloudInfo => TopicMode::Endpoint,
        }
    }

    fn about(self) -> &'static str {
        match self {
            Tool::Gocdb => {
                "Create AMS users and AUTHN bindings for GOCDB service endpoints, \
                 granting them access to one topic per service type."
            }
            Tool::CloudInfo => {
                "Create AMS users and AUTHN bindings for GOCDB service endpoints, \
                 each with its own per-endpoint topic."
            }
        }
    }
}

#[derive(Debug, Parser)]
#[command(version)]
pub struct Arguments {
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Path to the TOML config file. Defaults to /etc/argo-api-authn/conf.d/<command>.toml, or ../conf/<command>.toml if that doesn't exist."
    )]
    pub config_path: Option<PathBuf>,

    #[arg(
        long,
        action = ArgAction::SetTrue,
        help = "Verify TLS certificates of the AMS and AUTHN services."
    )]
    pub verify: bool,

    #[arg(
        long,
        value_name = "MODE",
        help = "Topic layout, 'endpoint' or 'service-type'. Overrides the config file."
    )]
    pub topic_mode: Option<TopicMode>,

    #[arg(
        long,
        action = ArgAction::SetTrue,
        help = "Normalize DNs and print what would be provisioned, without touching AMS or AUTHN."
    )]
    pub dry_run: bool,

    #[arg(
        short,
        long,
        help = "Suppress non-error output and set the log level to WARN."
    )]
    pub quiet: bool,

    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase verbosity level, can be used multiple times."
    )]
    pub verbose: u8,
}

impl Arguments {
    fn log_level(&self) -> Level {
        match (self.quiet, self.verbose) {
            (true, _) => Level::WARN,
            (false, 0) => Level::INFO,
            (false, 1) => Level::DEBUG,
            (false, _) => Level::TRACE,
        }
    }

    /// Topic layout: command line, then config file, then the tool's default.
    pub fn run_options(&self, tool: Tool, config: &Config) -> RunOptions {
        RunOptions {
            verify: self.verify,
            topic_mode: self
                .topic_mode
                .or(config.sync.topic_mode)
                .unwrap_or(tool.default_topic_mode()),
            dry_run: self.dry_run,
        }
    }
}

fn parse_arguments(tool: Tool) -> Arguments {
    let cmd = Arguments::command()
        .name(tool.command_name())
        .bin_name(tool.command_name())
        .about(tool.about());
    let after_help = format!(
        "{}Examples:{}
# provision everything listed in the default config
{name}

# see what would be provisioned, with debug logging
{name} -c ./{name}.toml --dry-run -v
",
        cmd.get_styles().get_header().render(),
        cmd.get_styles().get_header().render_reset(),
        name = tool.command_name(),
    );
    let mut cmd = cmd.after_help(after_help);
    cmd.build();

    let mut matches = cmd.get_matches();
    match Arguments::from_arg_matches_mut(&mut matches) {
        Ok(args) => args,
        Err(e) => {
            let e = e.format(&mut Arguments::command());
            e.exit();
        }
    }
}

fn init_logging(args: &Arguments) {
    // RUST_LOG wins over -q/-v when set
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(args.log_level()).into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("couldn't install logger: {err}");
    }
}

fn build_syncer(tool: Tool, args: &Arguments) -> Result<(Syncer, Vec<String>)> {
    let path = Config::resolve_path(args.config_path.as_deref(), tool.command_name());
    let config = Config::load(&path)?;
    let options = args.run_options(tool, &config);
    info!(config = %path.display(), topic_mode = %options.topic_mode, dry_run = options.dry_run, "starting");
    let syncer = Syncer::from_config(&config, &options)
        .with_context(|| format!("setting up clients from {}", path.display()))?;
    Ok((syncer, config.service_types()))
}

fn print_report(report: &SyncReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("serializing report")?;
    println!("{json}");
    Ok(())
}

/// Runs one tool to completion and exits: 2 for config or setup errors, 1 if
/// any service type's endpoints couldn't be fetched, 0 otherwise.
pub async fn main(tool: Tool) -> ! {
    let args = parse_arguments(tool);
    init_logging(&args);

    let (syncer, service_types) = match build_syncer(tool, &args) {
        Ok(built) => built,
        Err(err) => {
            error!("{err:#}");
            std::process::exit(2);
        }
    };

    let report = syncer.run(&service_types).await;
    info!(
        service_types = report.service_types.len(),
        users_created = report.users_created(),
        failures = report.failures(),
        "run finished"
    );
    if report.dry_run {
        if let Err(err) = print_report(&report) {
            error!("{err:#}");
            std::process::exit(1);
        }
    }

    if report.has_fetch_errors() {
        std::process::exit(1);
    }
    std::process::exit(0);
}
