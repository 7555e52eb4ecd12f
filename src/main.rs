//! nvframe - boot a Lua editor configuration through the framework core.
//!
//! Usage:
//!   nvframe run [DIR]        Load the entry module and eager plugins
//!   nvframe list [DIR]       Show registered plugins
//!   nvframe modules [DIR]    Show modules loaded during boot
//!   nvframe --help           Show help

use std::fmt::Display;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Report, Result, eyre};

use nvframe_core::FrameworkConfig;
use nvframe_plugin::{BootReport, Framework, PluginFilter, PluginInfo};

#[derive(Parser)]
#[command(
    name = "nvframe",
    version,
    about = "Boot a Lua editor configuration tree",
    long_about = "nvframe loads a Neovim-style configuration tree (DIR/lua/...) \
                  through the framework core: config schemas, event bus, module \
                  loader and plugin registry."
)]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Boot the configuration and report what loaded
    Run {
        /// Configuration root (defaults to the settings' config_dir)
        dir: Option<PathBuf>,

        /// Entry module to load first
        #[arg(short, long)]
        entry: Option<String>,

        /// Skip loading non-lazy plugins
        #[arg(long)]
        no_eager: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Boot the configuration and list registered plugins
    List {
        /// Configuration root
        dir: Option<PathBuf>,

        /// Only loaded plugins
        #[arg(long)]
        loaded: bool,

        /// Only lazy plugins
        #[arg(long)]
        lazy: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Boot the configuration and list loaded Lua modules
    Modules {
        /// Configuration root
        dir: Option<PathBuf>,

        /// Glob over module names, e.g. "plugins.*"
        #[arg(short, long)]
        pattern: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;
    init_tracing(&settings.log_level, cli.verbose);
    tracing::debug!(?settings, "loaded settings");

    match cli.command {
        Command::Run {
            dir,
            entry,
            no_eager,
            format,
        } => {
            let (_, report) = boot(&settings, dir, entry, !no_eager)?;
            print_report(&report, format)?;
        }
        Command::List {
            dir,
            loaded,
            lazy,
            format,
        } => {
            let (fw, _) = boot(&settings, dir, None, true)?;
            let filter = PluginFilter {
                loaded: loaded.then_some(true),
                lazy: lazy.then_some(true),
            };
            print_plugins(&fw.plugins().list(filter), format)?;
        }
        Command::Modules { dir, pattern } => {
            let (fw, _) = boot(&settings, dir, None, true)?;
            let modules = fw
                .loader()
                .get_loaded_modules(pattern.as_deref())
                .map_err(lua_error)?;
            for name in modules {
                println!("{name}");
            }
        }
    }

    Ok(())
}

fn load_settings(path: Option<&Path>) -> Result<FrameworkConfig> {
    match path {
        Some(path) => FrameworkConfig::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(FrameworkConfig::default()),
    }
}

/// `RUST_LOG` wins; otherwise `-v` flags, then the settings' level.
fn init_tracing(default_level: &str, verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let level = match verbose {
        0 => default_level,
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 0)
        .init();
}

// Lua-side errors are not Send, so they cross into eyre as text.
fn lua_error(err: impl Display) -> Report {
    eyre!("{err}")
}

fn boot(
    settings: &FrameworkConfig,
    dir: Option<PathBuf>,
    entry: Option<String>,
    eager: bool,
) -> Result<(Framework, BootReport)> {
    let mut settings = settings.clone();
    if let Some(dir) = dir {
        settings.config_dir = dir.canonicalize().context("Invalid config directory")?;
    }
    if let Some(entry) = entry {
        settings.entry = entry;
    }
    settings.load_eager &= eager;

    let fw = Framework::from_config(&settings).map_err(lua_error)?;
    fw.install_lua_api().map_err(lua_error)?;

    eprintln!(
        "Booting '{}' from {}...",
        settings.entry,
        settings.config_dir.display()
    );
    let report = fw
        .boot(&settings.entry)
        .map_err(lua_error)
        .context("Boot failed")?;
    Ok((fw, report))
}

fn print_report(report: &BootReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!();
            println!("{}", "─".repeat(60));
            println!(" Booted '{}'", report.entry);
            println!("{}", "─".repeat(60));
            println!();
            println!(" {} module(s) loaded", report.modules.len());

            match &report.plugins {
                None => println!(" Eager plugin loading skipped"),
                Some(summary) => {
                    println!(" {} plugin(s) loaded", summary.loaded.len());
                    for name in &summary.loaded {
                        println!("   {name}");
                    }
                    if !summary.failed.is_empty() {
                        println!();
                        println!(" {} plugin(s) failed", summary.failed.len());
                        for (name, error) in &summary.failed {
                            println!("   {name}: {error}");
                        }
                    }
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
    }
    Ok(())
}

fn print_plugins(plugins: &[PluginInfo], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if plugins.is_empty() {
                println!(" No plugins registered.");
                return Ok(());
            }
            println!(" {:<28} {:<11} {:<5} DEPENDENCIES", "NAME", "STATE", "LAZY");
            for plugin in plugins {
                let deps = &plugin.descriptor.dependencies;
                println!(
                    " {:<28} {:<11} {:<5} {}",
                    plugin.name,
                    plugin.state.as_str(),
                    if plugin.descriptor.lazy { "yes" } else { "no" },
                    if deps.is_empty() {
                        "-".to_string()
                    } else {
                        deps.join(", ")
                    }
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(plugins)?);
        }
    }
    Ok(())
}
