//! `koans`: incremental exercise runner.
//!
//! Compiles and runs the exercise modules listed under the source directory,
//! halting at the first failure and resuming whenever a source file is saved.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::error;

use koan_runner::core::extractor::extract_cases;
use koan_runner::engine::Engine;
use koan_runner::exit_codes;
use koan_runner::io::build::RustcToolchain;
use koan_runner::io::config::{CONFIG_FILE_NAME, KoansConfig, load_config, write_config};
use koan_runner::io::discovery::{Discovery, ProjectPaths, discover, ensure_build_dir};
use koan_runner::io::watch::SourceWatcher;
use koan_runner::logging;
use koan_runner::looping::run_loop;
use koan_runner::report::Reporter;

#[derive(Parser)]
#[command(name = "koans", version, about = "Incremental exercise runner for Rust koans")]
struct Cli {
    /// Project root holding the config file and the source directory.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file. Defaults to `koans.toml` under the project root.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more runner internals on stderr (repeat for more).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Run the exercises, waiting for edits after each failure (default).
    Run {
        /// Only run exercise modules whose path contains this text.
        filter: Option<String>,
    },
    /// Validate the listings against the source tree and exit.
    Check,
    /// Print modules and their cases without compiling anything.
    List,
    /// Write a default config and empty listings under the project root.
    Init,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!(err = %format!("{err:#}"), "koans failed");
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.root.join(CONFIG_FILE_NAME));
    let load = || -> Result<(KoansConfig, ProjectPaths)> {
        let cfg = load_config(&config_path)?;
        let paths = ProjectPaths::resolve(&cli.root, &cfg)?;
        Ok((cfg, paths))
    };
    match cli.command.clone().unwrap_or(Command::Run { filter: None }) {
        Command::Run { filter } => {
            let (cfg, paths) = load()?;
            cmd_run(&paths, &cfg, filter)
        }
        Command::Check => cmd_check(&load()?.1),
        Command::List => cmd_list(&load()?.1),
        Command::Init => cmd_init(&cli.root, &config_path),
    }
}

fn cmd_init(root: &Path, config_path: &Path) -> Result<i32> {
    if config_path.exists() {
        bail!("{} already exists", config_path.display());
    }
    let cfg = KoansConfig::default();
    write_config(config_path, &cfg)?;
    println!("wrote {}", config_path.display());
    for listing in [&cfg.helpers_list, &cfg.exercises_list] {
        let path = root.join(listing);
        if path.exists() {
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, "").with_context(|| format!("write {}", path.display()))?;
        println!("wrote {}", path.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_run(paths: &ProjectPaths, cfg: &KoansConfig, filter: Option<String>) -> Result<i32> {
    ensure_build_dir(&paths.build_dir)?;
    let toolchain = RustcToolchain::from_config(cfg);
    let engine = Engine::new(paths, &toolchain, cfg).with_filter(filter);
    let mut waiter = SourceWatcher::new(paths, cfg).context("start file watcher")?;
    let mut reporter = Reporter::new(io::stdout());
    run_loop(&engine, &mut waiter, &mut reporter)?;
    Ok(exit_codes::OK)
}

fn cmd_check(paths: &ProjectPaths) -> Result<i32> {
    match discover(paths)? {
        Discovery::Valid(sources) => {
            println!(
                "{} helper module(s), {} exercise module(s): listings match {}",
                sources.helpers.len(),
                sources.exercises.len(),
                paths.display(&paths.source_root)
            );
            Ok(exit_codes::OK)
        }
        Discovery::Invalid(diagnostic) => {
            Reporter::new(io::stdout()).diagnostic(&diagnostic)?;
            Ok(exit_codes::VALIDATION_FAILED)
        }
    }
}

fn cmd_list(paths: &ProjectPaths) -> Result<i32> {
    let sources = match discover(paths)? {
        Discovery::Valid(sources) => sources,
        Discovery::Invalid(diagnostic) => {
            Reporter::new(io::stdout()).diagnostic(&diagnostic)?;
            return Ok(exit_codes::VALIDATION_FAILED);
        }
    };
    let mut out = io::stdout().lock();
    for helper in &sources.helpers {
        writeln!(out, "helper {}", helper.name())?;
    }
    for module in &sources.exercises {
        writeln!(out, "{}", module.name())?;
        for line in describe_cases(&module.path)? {
            writeln!(out, "{line}")?;
        }
    }
    Ok(exit_codes::OK)
}

fn describe_cases(path: &Path) -> Result<Vec<String>> {
    let source = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(extract_cases(&source)
        .into_iter()
        .map(|case| {
            let gate = if case.cfg.is_empty() {
                String::new()
            } else {
                format!(" [cfg({})]", case.cfg.join(", "))
            };
            match case.documentation.lines().next() {
                Some(summary) if !summary.is_empty() => {
                    format!("  {} (line {}){gate}: {summary}", case.name, case.line)
                }
                _ => format!("  {} (line {}){gate}", case.name, case.line),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults_to_run() {
        let cli = Cli::parse_from(["koans"]);
        assert_eq!(cli.command, None);
        assert_eq!(cli.root, PathBuf::from("."));
        assert_eq!(cli.config, None);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn parse_repeated_verbose() {
        let cli = Cli::parse_from(["koans", "-vv", "list"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.command, Some(Command::List));
    }

    #[test]
    fn parse_run_with_filter() {
        let cli = Cli::parse_from(["koans", "run", "intro"]);
        assert_eq!(
            cli.command,
            Some(Command::Run {
                filter: Some("intro".to_string())
            })
        );
    }

    #[test]
    fn parse_global_root_after_subcommand() {
        let cli = Cli::parse_from(["koans", "check", "--root", "/tmp/course"]);
        assert_eq!(cli.command, Some(Command::Check));
        assert_eq!(cli.root, PathBuf::from("/tmp/course"));
    }

    #[test]
    fn init_scaffolds_config_and_listings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join(CONFIG_FILE_NAME);
        let code = cmd_init(temp.path(), &config_path).expect("init");
        assert_eq!(code, exit_codes::OK);
        assert_eq!(load_config(&config_path).expect("load"), KoansConfig::default());
        assert!(temp.path().join("koans/helpers.txt").is_file());
        assert!(temp.path().join("koans/exercises.txt").is_file());

        let paths = ProjectPaths::resolve(temp.path(), &KoansConfig::default()).expect("paths");
        assert!(matches!(discover(&paths).expect("discover"), Discovery::Valid(_)));
    }

    #[test]
    fn init_refuses_to_overwrite_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "edition = \"2024\"\n").expect("write");
        let err = cmd_init(temp.path(), &config_path).expect_err("existing config");
        assert!(err.to_string().contains("already exists"));
        assert_eq!(
            fs::read_to_string(&config_path).expect("read"),
            "edition = \"2024\"\n"
        );
    }

    #[test]
    fn describe_cases_includes_summary_line() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("basics.rs");
        fs::write(
            &path,
            "/// Add numbers.\n/// More text.\npub fn add() {}\n\npub fn plain() {}\n\n#[cfg(unix)]\npub fn posix() {}\n",
        )
        .expect("write");
        assert_eq!(
            describe_cases(&path).expect("describe"),
            vec![
                "  add (line 3): Add numbers.".to_string(),
                "  plain (line 5)".to_string(),
                "  posix (line 8) [cfg(unix)]".to_string(),
            ]
        );
    }
}
