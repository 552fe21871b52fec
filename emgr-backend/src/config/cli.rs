//! Command line surface of `emgr-backend`.
//!
//! Arguments are declared with the clap builder API and flattened into
//! [`CliConfig`], which the rest of the configuration layer consumes.

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};

/// Raw command line values, before they are turned into typed settings
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub verbose: bool,
    pub backend_name: String,
    pub config_file: Option<String>,
    pub storage: String,
    pub zenoh_mode: String,
    pub zenoh_connect: Option<String>,
    pub zenoh_listen: Option<String>,
    pub no_multicast: bool,
}

fn required(matches: &ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .with_context(|| format!("missing value for --{}", id))
}

impl CliConfig {
    /// Parse the process arguments
    pub fn from_args() -> Result<Self> {
        Self::from_matches(&Self::build_cli().get_matches())
    }

    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            verbose: matches.get_flag("verbose"),
            backend_name: required(matches, "name")?,
            config_file: matches.get_one::<String>("config").cloned(),
            storage: required(matches, "storage")?,
            zenoh_mode: required(matches, "zenoh-mode")?,
            zenoh_connect: matches.get_one::<String>("zenoh-connect").cloned(),
            zenoh_listen: matches.get_one::<String>("zenoh-listen").cloned(),
            no_multicast: matches.get_flag("no-multicast"),
        })
    }

    pub fn build_cli() -> Command {
        Command::new("emgr-backend")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Element manager backend - NETCONF provisioning scenarios")
            .long_about(
                "Accepts configuration orders, drives every target device through connect, \
                 edit-config, confirmed-commit, commit and disconnect, and rolls the device \
                 back when a step fails or times out.",
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .action(ArgAction::SetTrue)
                    .help("Log at debug level")
                    .long_help(
                        "Log at debug level: status transitions, timer start/fire/cancel and \
                         every NETCONF rpc exchanged with the agents.",
                    ),
            )
            .arg(
                Arg::new("name")
                    .short('n')
                    .long("name")
                    .value_name("BACKEND_NAME")
                    .help("Name of this element manager instance")
                    .long_help(
                        "Name of this element manager instance. It prefixes every key \
                         expression the backend declares and every transaction id it assigns.",
                    )
                    .default_value("default"),
            )
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("EM configuration file (JSON5)")
                    .long_help(
                        "EM configuration file with scenario timers, device inventory and \
                         NETCONF settings. Without it /etc/emgr/em.json5, \
                         ~/.config/emgr/em.json5 and ./em.json5 are tried in turn. \
                         Timers it does not set default to 600 seconds.",
                    ),
            )
            .arg(
                Arg::new("storage")
                    .long("storage")
                    .value_name("BACKEND")
                    .help("Where status rows are kept: memory or zenoh")
                    .value_parser(["memory", "zenoh"])
                    .default_value("zenoh"),
            )
            .arg(
                Arg::new("zenoh-mode")
                    .long("zenoh-mode")
                    .value_name("MODE")
                    .help("Session mode (peer or client)")
                    .value_parser(["peer", "client"])
                    .default_value("peer"),
            )
            .arg(
                Arg::new("zenoh-connect")
                    .long("zenoh-connect")
                    .value_name("ENDPOINTS")
                    .help("Comma separated endpoints to connect to")
                    .long_help("Comma separated endpoints to connect to, e.g. tcp/10.0.0.5:7447"),
            )
            .arg(
                Arg::new("zenoh-listen")
                    .long("zenoh-listen")
                    .value_name("ENDPOINTS")
                    .help("Comma separated endpoints to listen on"),
            )
            .arg(
                Arg::new("no-multicast")
                    .long("no-multicast")
                    .action(ArgAction::SetTrue)
                    .help("Turn off multicast scouting"),
            )
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.backend_name.is_empty(), "backend name is empty");

        // Used verbatim inside key expressions
        let bad = self
            .backend_name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'));
        if let Some(c) = bad {
            anyhow::bail!(
                "backend name '{}' contains '{}'; use letters, digits, '-' or '_'",
                self.backend_name,
                c
            );
        }

        if !matches!(self.zenoh_mode.to_lowercase().as_str(), "peer" | "client") {
            anyhow::bail!("zenoh mode '{}' is neither peer nor client", self.zenoh_mode);
        }
        Ok(())
    }
}
