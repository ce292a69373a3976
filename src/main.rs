use std::io::Write;
use std::sync::Arc;

use ansi_term::Color;
use clap::Parser;

use ralph::database::Scope;
use ralph::error::ErrorKind;
use ralph::package::{BuildSystem, VersionControl};
use ralph::source::{CredentialKind, CredentialResponse, CredentialsCallback};
use ralph::state::{RuntimeConfig, State};

/// ralph - language-agnostic source package manager
///
/// Resolves named versioned packages from git-hosted sources and installs
/// them into per-project, per-user or system-wide groups.
///
/// Examples:
///   ralph sources add ex https://example.com/packages.git
///   ralph sources update
///   ralph install foo@>=1.2
#[derive(Parser, Debug)]
#[command(name = "ralph", version = env!("RALPH_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database scope to operate on
    #[arg(long = "database", value_enum, default_value_t = Scope::Project, global = true)]
    database: Scope,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install packages into a group
    Install(PackagesArgs),

    /// Remove installed packages from a group
    Remove(GroupArgs),

    /// Check that packages are installed in a group
    Check(GroupArgs),

    /// Search available packages by name
    Search {
        /// Substring to look for (case-insensitive)
        query: String,
    },

    /// Manage package sources
    Sources {
        #[command(subcommand)]
        command: SourcesCommands,
    },

    /// Manage the current project
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Show available database locations
    Info,
}

#[derive(clap::Args, Debug)]
struct PackagesArgs {
    /// Packages as `name` or `name@requirement`
    #[arg(value_name = "PKG", required = true)]
    packages: Vec<String>,

    /// Group to install into
    #[arg(long, default_value = "default")]
    group: String,

    /// Feature configuration as `key=value`
    #[arg(long = "config", value_name = "KEY=VALUE")]
    config: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct GroupArgs {
    /// Packages as `name` or `name@requirement`
    #[arg(value_name = "PKG", required = true)]
    packages: Vec<String>,

    /// Group to operate on
    #[arg(long, default_value = "default")]
    group: String,
}

#[derive(clap::Subcommand, Debug)]
enum SourcesCommands {
    /// List registered sources
    List,

    /// Register a new source
    Add {
        /// Unique source name
        name: String,
        /// Git URL publishing package manifests
        url: String,
    },

    /// Unregister a source
    Remove {
        /// Source name
        name: String,
    },

    /// Clone or fetch sources and re-read their manifests
    Update {
        /// Sources to update (all when omitted)
        #[arg(value_name = "NAME")]
        names: Vec<String>,
    },

    /// Show details of one source
    Show {
        /// Source name
        name: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ProjectCommands {
    /// Scaffold a new project in the current directory
    New {
        /// Project name
        name: String,

        /// Build system starter files to generate
        #[arg(long = "build-system", value_enum)]
        build_system: Option<BuildSystem>,

        /// Version control system to initialize
        #[arg(long = "version-control-system", value_enum)]
        version_control_system: Option<VersionControl>,
    },

    /// Check that the current directory holds a valid project
    Verify,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if let Err(error) = run(cli) {
        eprintln!("{} {}", Color::Red.paint("error:"), error);
        if error.kind() == ErrorKind::UsageError {
            eprintln!("Run 'ralph --help' for usage.");
            std::process::exit(2);
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> ralph::error::Result<()> {
    let project_dir = std::env::current_dir()
        .map_err(|e| ralph::error::Error::io("determining current directory", &e))?;
    let state = State::new(
        project_dir,
        RuntimeConfig {
            credentials: terminal_credentials(),
        },
    );
    let scope = cli.database;

    match cli.command {
        Commands::Install(args) => state.install(scope, &args.packages, &args.group, &args.config),
        Commands::Remove(args) => state.remove(scope, &args.packages, &args.group),
        Commands::Check(args) => state.check(scope, &args.packages, &args.group),
        Commands::Search { query } => state.search(&query),
        Commands::Sources { command } => match command {
            SourcesCommands::List => state.list_sources(scope),
            SourcesCommands::Add { name, url } => state.add_source(scope, &name, &url),
            SourcesCommands::Remove { name } => state.remove_source(scope, &name),
            SourcesCommands::Update { names } => state.update_sources(scope, &names),
            SourcesCommands::Show { name } => state.show_source(scope, &name),
        },
        Commands::Project { command } => match command {
            ProjectCommands::New {
                name,
                build_system,
                version_control_system,
            } => state.new_project(&name, build_system, version_control_system),
            ProjectCommands::Verify => state.verify_project(),
        },
        Commands::Info => state.info(),
    }
}

/// Prompt on the terminal when the transport needs credentials.
///
/// Only username/password prompting is supported; other mechanisms answer
/// `Invalid` so the transport can fall through to its defaults.
fn terminal_credentials() -> CredentialsCallback {
    Arc::new(|query| {
        if !query.allows(CredentialKind::UsernamePassword) {
            return CredentialResponse::Invalid;
        }

        let default_username = query.username_from_url.clone().unwrap_or_default();
        eprintln!("Username and password for {} required:", query.url);
        eprint!("Username [{}]: ", default_username);
        let _ = std::io::stderr().flush();
        let mut username = String::new();
        if std::io::stdin().read_line(&mut username).is_err() {
            return CredentialResponse::Error;
        }
        let username = username.trim();

        eprint!("Password: ");
        let _ = std::io::stderr().flush();
        let mut password = String::new();
        if std::io::stdin().read_line(&mut password).is_err() {
            return CredentialResponse::Error;
        }

        CredentialResponse::UsernamePassword {
            username: if username.is_empty() {
                default_username
            } else {
                username.to_string()
            },
            password: password.trim_end_matches(['\r', '\n']).to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_install_parsing() {
        let cli = Cli::try_parse_from(["ralph", "install", "foo@>=1.2"]).unwrap();
        assert_eq!(cli.database, Scope::Project);
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.packages, vec!["foo@>=1.2"]);
                assert_eq!(args.group, "default");
                assert!(args.config.is_empty());
            }
            _ => panic!("Expected Install command"),
        }
    }

    #[test]
    fn test_cli_install_with_group_and_config() {
        let cli = Cli::try_parse_from([
            "ralph",
            "install",
            "foo",
            "bar",
            "--group=tools",
            "--config",
            "with-foo=on",
        ])
        .unwrap();
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.packages, vec!["foo", "bar"]);
                assert_eq!(args.group, "tools");
                assert_eq!(args.config, vec!["with-foo=on"]);
            }
            _ => panic!("Expected Install command"),
        }
    }

    #[test]
    fn test_cli_global_database_option() {
        let cli = Cli::try_parse_from(["ralph", "--database=user", "sources", "list"]).unwrap();
        assert_eq!(cli.database, Scope::User);

        // The global option is accepted after the subcommand as well.
        let cli = Cli::try_parse_from(["ralph", "sources", "list", "--database=system"]).unwrap();
        assert_eq!(cli.database, Scope::System);
    }

    #[test]
    fn test_cli_sources_add_parsing() {
        let cli =
            Cli::try_parse_from(["ralph", "sources", "add", "ex", "https://example.com/r.git"])
                .unwrap();
        match cli.command {
            Commands::Sources {
                command: SourcesCommands::Add { name, url },
            } => {
                assert_eq!(name, "ex");
                assert_eq!(url, "https://example.com/r.git");
            }
            _ => panic!("Expected Sources Add command"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_input() {
        // Missing required positional.
        assert!(Cli::try_parse_from(["ralph", "install"]).is_err());
        // Unknown subcommand.
        assert!(Cli::try_parse_from(["ralph", "frobnicate"]).is_err());
        // Invalid enum value.
        assert!(Cli::try_parse_from(["ralph", "--database=galaxy", "info"]).is_err());
        // Too many positionals.
        assert!(Cli::try_parse_from(["ralph", "sources", "show", "a", "b"]).is_err());
        // Invalid enum value for an option.
        assert!(Cli::try_parse_from([
            "ralph",
            "project",
            "new",
            "demo",
            "--build-system=scons"
        ])
        .is_err());
    }

    #[test]
    fn test_cli_project_new_parsing() {
        let cli = Cli::try_parse_from([
            "ralph",
            "project",
            "new",
            "demo",
            "--build-system=cmake",
            "--version-control-system=git",
        ])
        .unwrap();
        match cli.command {
            Commands::Project {
                command:
                    ProjectCommands::New {
                        name,
                        build_system,
                        version_control_system,
                    },
            } => {
                assert_eq!(name, "demo");
                assert_eq!(build_system, Some(BuildSystem::Cmake));
                assert_eq!(version_control_system, Some(VersionControl::Git));
            }
            _ => panic!("Expected Project New command"),
        }
    }
}
