//! Minimal CLI parsing: subcommands, verbosity and config-path overrides.

use std::env;
use std::path::PathBuf;

use crate::config::ConfiguredAction;

pub const USAGE: &str = "\
redundarr - sync Sonarr with the streaming services you pay for

Usage: redundarr [-v...] [--config <path>] <command>

Commands:
  version                     Show version information
  config init [--force]       Create an example configuration file
  config validate             Validate the configuration file
  config info                 Show configuration file information
  providers list [--country CC] [--search TERM]
                              List known streaming providers
  providers info <name>       Show details for one provider
  providers stats             Provider, cache and quota statistics
  providers validate          Check configured providers against the registry
  sync [--dry-run] [--action unmonitor|delete] [--confirm] [--json]
                              Reconcile the Sonarr library

Options:
  -v, -vv, -vvv               Increase log verbosity (default: warnings only)
  --config <path>             Configuration file (default: redundarr.yml)
";

#[derive(Debug)]
pub enum Command {
    Version,
    Config(ConfigCommand),
    Providers(ProvidersCommand),
    Sync(SyncOptions),
    Help,
}

#[derive(Debug)]
pub enum ConfigCommand {
    Init { force: bool },
    Validate,
    Info,
}

#[derive(Debug)]
pub enum ProvidersCommand {
    List {
        country: Option<String>,
        search: Option<String>,
    },
    Info {
        name: String,
    },
    Stats,
    Validate,
}

#[derive(Debug, Default)]
pub struct SyncOptions {
    pub dry_run: Option<bool>,
    pub action: Option<ConfiguredAction>,
    pub confirm: bool,
    pub json: bool,
}

#[derive(Debug)]
pub struct CliOptions {
    pub verbosity: u8,
    pub config_path: PathBuf,
    pub command: Command,
}

impl CliOptions {
    pub fn from_args() -> Result<Self, String> {
        Self::parse(env::args().skip(1).collect())
    }

    fn parse(args: Vec<String>) -> Result<Self, String> {
        let mut verbosity: u8 = 0;
        let mut config_path = PathBuf::from("redundarr.yml");
        let mut rest: Vec<String> = Vec::new();

        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-v" => verbosity += 1,
                "-vv" => verbosity += 2,
                "-vvv" => verbosity += 3,
                "--config" => {
                    config_path = PathBuf::from(
                        iter.next().ok_or("--config requires a path".to_string())?,
                    );
                }
                _ if arg.starts_with("--config=") => {
                    if let Some((_, value)) = arg.split_once('=') {
                        config_path = PathBuf::from(value);
                    }
                }
                "-h" | "--help" | "help" if rest.is_empty() => {
                    return Ok(Self {
                        verbosity,
                        config_path,
                        command: Command::Help,
                    });
                }
                _ => rest.push(arg),
            }
        }

        let command = Self::parse_command(&rest)?;
        Ok(Self {
            verbosity,
            config_path,
            command,
        })
    }

    fn parse_command(rest: &[String]) -> Result<Command, String> {
        let Some(first) = rest.first() else {
            return Ok(Command::Help);
        };

        match first.as_str() {
            "version" => Ok(Command::Version),
            "config" => {
                let sub = rest.get(1).map(String::as_str);
                match sub {
                    Some("init") => Ok(Command::Config(ConfigCommand::Init {
                        force: rest.iter().any(|a| a == "--force"),
                    })),
                    Some("validate") => Ok(Command::Config(ConfigCommand::Validate)),
                    Some("info") => Ok(Command::Config(ConfigCommand::Info)),
                    Some(other) => Err(format!("unknown config subcommand '{other}'")),
                    None => Err("config requires a subcommand: init, validate or info".to_string()),
                }
            }
            "providers" => {
                let sub = rest.get(1).map(String::as_str);
                match sub {
                    Some("list") => {
                        let mut country = None;
                        let mut search = None;
                        let mut i = 2;
                        while i < rest.len() {
                            match rest[i].as_str() {
                                "--country" => {
                                    country = rest.get(i + 1).cloned();
                                    i += 2;
                                }
                                "--search" => {
                                    search = rest.get(i + 1).cloned();
                                    i += 2;
                                }
                                other => return Err(format!("unknown option '{other}'")),
                            }
                        }
                        Ok(Command::Providers(ProvidersCommand::List { country, search }))
                    }
                    Some("info") => {
                        let name = rest
                            .get(2)
                            .cloned()
                            .ok_or("providers info requires a provider name".to_string())?;
                        Ok(Command::Providers(ProvidersCommand::Info { name }))
                    }
                    Some("stats") => Ok(Command::Providers(ProvidersCommand::Stats)),
                    Some("validate") => Ok(Command::Providers(ProvidersCommand::Validate)),
                    Some(other) => Err(format!("unknown providers subcommand '{other}'")),
                    None => Err(
                        "providers requires a subcommand: list, info, stats or validate"
                            .to_string(),
                    ),
                }
            }
            "sync" => {
                let mut options = SyncOptions::default();
                let mut i = 1;
                while i < rest.len() {
                    match rest[i].as_str() {
                        "--dry-run" => {
                            options.dry_run = Some(true);
                            i += 1;
                        }
                        "--action" => {
                            let value = rest
                                .get(i + 1)
                                .ok_or("--action requires a value".to_string())?;
                            options.action = Some(match value.as_str() {
                                "unmonitor" => ConfiguredAction::Unmonitor,
                                "delete" => ConfiguredAction::Delete,
                                other => {
                                    return Err(format!(
                                        "invalid action '{other}' (expected unmonitor or delete)"
                                    ))
                                }
                            });
                            i += 2;
                        }
                        "--confirm" => {
                            options.confirm = true;
                            i += 1;
                        }
                        "--json" => {
                            options.json = true;
                            i += 1;
                        }
                        other => return Err(format!("unknown option '{other}'")),
                    }
                }
                Ok(Command::Sync(options))
            }
            other => Err(format!("unknown command '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliOptions {
        CliOptions::parse(args.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn no_args_shows_help() {
        assert!(matches!(parse(&[]).command, Command::Help));
    }

    #[test]
    fn verbosity_accumulates() {
        let options = parse(&["-v", "-v", "version"]);
        assert_eq!(options.verbosity, 2);
        assert!(matches!(options.command, Command::Version));

        assert_eq!(parse(&["-vvv", "version"]).verbosity, 3);
    }

    #[test]
    fn config_path_override() {
        let options = parse(&["--config", "/etc/redundarr.yml", "config", "validate"]);
        assert_eq!(options.config_path, PathBuf::from("/etc/redundarr.yml"));

        let options = parse(&["--config=/tmp/c.yml", "version"]);
        assert_eq!(options.config_path, PathBuf::from("/tmp/c.yml"));
    }

    #[test]
    fn sync_flags() {
        let Command::Sync(options) =
            parse(&["sync", "--dry-run", "--action", "delete", "--json"]).command
        else {
            panic!("expected sync");
        };
        assert_eq!(options.dry_run, Some(true));
        assert_eq!(options.action, Some(ConfiguredAction::Delete));
        assert!(options.json);
        assert!(!options.confirm);
    }

    #[test]
    fn providers_list_filters() {
        let Command::Providers(ProvidersCommand::List { country, search }) =
            parse(&["providers", "list", "--country", "DE", "--search", "net"]).command
        else {
            panic!("expected providers list");
        };
        assert_eq!(country.as_deref(), Some("DE"));
        assert_eq!(search.as_deref(), Some("net"));
    }

    #[test]
    fn invalid_action_rejected() {
        let result = CliOptions::parse(
            ["sync", "--action", "purge"].iter().map(|s| s.to_string()).collect(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn config_init_force() {
        let Command::Config(ConfigCommand::Init { force }) =
            parse(&["config", "init", "--force"]).command
        else {
            panic!("expected config init");
        };
        assert!(force);
    }
}
