//! CLI argument parsing for tejer

use crate::interp::Value;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for `inspect`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable listing (default)
    Text,
    /// JSON for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "tejer")]
#[command(version)]
#[command(about = "Compile-time method tracing weaver", long_about = None)]
pub struct Cli {
    /// Print weaving diagnostics to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Instrumentation settings shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct PluginArgs {
    /// Load instrumentation settings from a TOML file
    #[arg(short = 'C', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Plugin option, applied after the config file (e.g., -P enabled=true -P annotations=org.example.DebugLog)
    #[arg(short = 'P', long = "plugin-option", value_name = "KEY=VALUE")]
    pub options: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Weave a class file and write the instrumented class
    Weave {
        /// Class file (JSON)
        input: PathBuf,

        /// Write the woven class here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Verify every woven method before writing
        #[arg(long)]
        verify: bool,

        #[command(flatten)]
        plugin: PluginArgs,
    },

    /// Execute a method in the reference interpreter
    Run {
        /// Class file (JSON)
        input: PathBuf,

        /// Method to invoke
        #[arg(short, long)]
        method: String,

        /// Argument value, repeatable (e.g., -a 5 -a 7L for an int and a long)
        #[arg(short = 'a', long = "arg", value_name = "VALUE", allow_hyphen_values = true, value_parser = parse_value)]
        args: Vec<Value>,

        /// Weave the class before running it
        #[arg(long)]
        weave: bool,

        #[command(flatten)]
        plugin: PluginArgs,
    },

    /// List methods and whether they would be woven
    Inspect {
        /// Class file (JSON)
        input: PathBuf,

        /// Include the instruction listing of every method
        #[arg(long)]
        code: bool,

        /// Output format
        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,

        #[command(flatten)]
        plugin: PluginArgs,
    },
}

/// Parse an interpreter argument: `42` is an int, `42L` a long
pub fn parse_value(s: &str) -> Result<Value, String> {
    let s = s.trim();
    if let Some(digits) = s.strip_suffix(['L', 'l']) {
        return digits
            .parse::<i64>()
            .map(Value::Long)
            .map_err(|e| format!("invalid long '{}': {}", s, e));
    }
    s.parse::<i32>()
        .map(Value::Int)
        .map_err(|e| format!("invalid int '{}': {}", s, e))
}
