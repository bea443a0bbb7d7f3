//! Command-line entry point for mailrun
//!
//! Commands:
//! - `validate`: deliverability, suppression and duplicate checks
//! - `reputation`: third-party verdicts for every contact
//! - `template`: register the campaign template with the transport
//! - `send`: rate-limited bulk dispatch with a CSV report
//! - `clean`, `split`, `canary`: contact file tools

use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};
use mailrun::{
    config::{Mailrun, parse_nameserver},
    controller::Controller,
};
use mailrun_common::logging;
use mailrun_dispatch::TemplateCreation;
use mailrun_validation::{DomainPolicy, ValidationMode};

/// Validate contact lists and send bulk email campaigns
#[derive(Parser, Debug)]
#[command(name = "mailrun")]
#[command(about = "Validate contact lists and send bulk email campaigns", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to `MAILRUN_CONFIG`, then
    /// ./mailrun.config.ron, then /etc/mailrun/mailrun.config.ron)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Recipients per transport call
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Maximum recipients per second
    #[arg(long, global = true)]
    rate: Option<u32>,

    /// Domain policy: strict (MX only) or lenient (MX, then A/AAAA)
    #[arg(long, global = true)]
    policy: Option<DomainPolicy>,

    /// Deadline for each DNS query, in milliseconds
    #[arg(long, global = true)]
    dns_timeout_ms: Option<u64>,

    /// Additional attempts after a failed DNS query
    #[arg(long, global = true)]
    dns_retries: Option<u32>,

    /// Nameserver to query instead of the system configuration (ip[:port]);
    /// may be repeated
    #[arg(long = "nameserver", global = true, value_parser = parse_nameserver)]
    nameservers: Vec<SocketAddr>,

    /// Admit addresses the reputation service marks as risky
    #[arg(long, global = true)]
    accept_risky: bool,

    /// Build every batch but never call the transport
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check syntax, domain deliverability, suppression and duplicates
    Validate {
        /// Contact CSV
        input: PathBuf,

        /// full, or dns-only to skip the suppression check
        #[arg(long)]
        mode: Option<ValidationMode>,

        /// Directory for the admitted and rejected lists
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check every address with the reputation service
    Reputation {
        /// Contact CSV
        input: PathBuf,
    },
    /// Create the campaign template from the configured files
    Template,
    /// Send the campaign to every contact in the list
    Send {
        /// Contact CSV
        input: PathBuf,
    },
    /// Normalise names and addresses and drop unusable or repeated rows
    Clean {
        /// Contact CSV
        input: PathBuf,

        /// Also strip hyphens from addresses
        #[arg(long)]
        remove_hyphens: bool,
    },
    /// Split a list into files of at most `max_per_file` rows
    Split {
        /// Contact CSV
        input: PathBuf,

        #[arg(long)]
        max_per_file: Option<usize>,
    },
    /// Sample a few contacts from every domain ahead of a campaign
    Canary {
        /// Contact CSV
        input: PathBuf,

        #[arg(long)]
        per_domain: Option<usize>,
    },
}

impl Cli {
    fn apply(&self, config: &mut Mailrun) {
        if let Some(batch_size) = self.batch_size {
            config.dispatch.batch_size = batch_size;
        }
        if let Some(rate) = self.rate {
            config.dispatch.rate_per_second = rate;
        }
        if let Some(policy) = self.policy {
            config.probe.policy = policy;
        }
        if let Some(timeout) = self.dns_timeout_ms {
            config.probe.timeout_ms = timeout;
        }
        if let Some(retries) = self.dns_retries {
            config.probe.retries = retries;
        }
        if !self.nameservers.is_empty() {
            config.probe.nameservers.clone_from(&self.nameservers);
        }
        if self.accept_risky {
            config.reputation.accept_risky = true;
        }
        if self.dry_run {
            config.dispatch.dry_run = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Mailrun::load(cli.config.as_deref())?;
    logging::init();

    cli.apply(&mut config);
    config.validate()?;

    let controller = Controller::new(config)?;

    match cli.command {
        Commands::Validate {
            input,
            mode,
            output,
        } => {
            let settings = &controller.config().validation;
            let mode = mode.unwrap_or(settings.mode);
            let output = output.unwrap_or_else(|| settings.output_dir.clone());

            let report = controller.validate(&input, mode, &output).await?;
            println!("{report}");
        }
        Commands::Reputation { input } => {
            let report = controller.reputation(&input).await?;
            println!("{report}");
        }
        Commands::Template => match controller.create_template().await? {
            TemplateCreation::Created => println!("Template created"),
            TemplateCreation::AlreadyExists => println!("Template already exists, nothing to do"),
        },
        Commands::Send { input } => {
            let report = controller.send(&input).await?;
            println!("{report}");
        }
        Commands::Clean {
            input,
            remove_hyphens,
        } => {
            let remove_hyphens = remove_hyphens || controller.config().lists.remove_hyphens;
            let report = controller.clean(&input, remove_hyphens)?;
            println!("{report}");
        }
        Commands::Split {
            input,
            max_per_file,
        } => {
            let max_per_file = max_per_file.unwrap_or(controller.config().lists.max_per_file);
            for (path, rows) in controller.split(&input, max_per_file)? {
                println!("{rows:>6} -> {}", path.display());
            }
        }
        Commands::Canary { input, per_domain } => {
            let per_domain = per_domain.unwrap_or(controller.config().lists.canary_per_domain);
            let report = controller.canary(&input, per_domain)?;
            println!("{report}");
        }
    }

    Ok(())
}
