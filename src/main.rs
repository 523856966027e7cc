use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tejer::cli::{Cli, Command, OutputFormat, PluginArgs};
use tejer::config::InstrumentationConfig;
use tejer::interp::{Interpreter, Value};
use tejer::method::{ClassUnit, MethodKind, MethodUnit};
use tejer::pipeline::WeavingPipeline;
use tejer::selector::{self, Rejection};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Build the instrumentation config: file first, then `-P` options in order
fn load_config(plugin: &PluginArgs) -> Result<InstrumentationConfig> {
    let mut config = match &plugin.config {
        Some(path) => InstrumentationConfig::from_file(path)?,
        None => InstrumentationConfig::default(),
    };

    for option in &plugin.options {
        config
            .apply_option_str(option)
            .with_context(|| format!("Invalid plugin option '{}'", option))?;
    }

    tracing::debug!(enabled = config.enabled, markers = ?config.markers, "instrumentation config");
    Ok(config)
}

fn build_pipeline(plugin: &PluginArgs) -> Result<WeavingPipeline> {
    let config = load_config(plugin)?;
    WeavingPipeline::new(config).context("Invalid instrumentation configuration")
}

fn run_weave(input: &Path, output: Option<&Path>, verify: bool, plugin: &PluginArgs) -> Result<()> {
    let pipeline = build_pipeline(plugin)?.with_verification(verify);
    let class = ClassUnit::from_file(input)?;

    let (woven, report) = pipeline
        .weave_class(&class)
        .with_context(|| format!("Failed to weave class {}", class.name))?;

    let json = woven.to_json_string()?;
    match output {
        Some(path) => fs::write(path, format!("{}\n", json))
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", json),
    }

    eprintln!(
        "tejer: {}: {} method(s) inspected, {} woven, {} exit site(s)",
        class.name, report.methods_inspected, report.methods_selected, report.exit_sites
    );
    Ok(())
}

fn describe(interp: &Interpreter<'_>, value: &Value) -> String {
    match value {
        Value::Int(v) => v.to_string(),
        Value::Long(v) => v.to_string(),
        Value::Ref(_) => match interp.string_value(value) {
            Some(s) => format!("{:?}", s),
            None => "<object>".to_string(),
        },
        Value::Top => "<top>".to_string(),
    }
}

fn run_method(input: &Path, method: &str, args: &[Value], weave: bool, plugin: &PluginArgs) -> Result<()> {
    let mut class = ClassUnit::from_file(input)?;

    if weave {
        let pipeline = build_pipeline(plugin)?.with_verification(true);
        let (woven, report) = pipeline
            .weave_class(&class)
            .with_context(|| format!("Failed to weave class {}", class.name))?;
        tracing::info!(woven = report.methods_selected, "class woven before run");
        class = woven;
    } else if plugin.config.is_some() || !plugin.options.is_empty() {
        tracing::warn!("instrumentation options given without --weave; running the class as-is");
    }

    let mut interp = Interpreter::new(&class);
    let result = interp
        .invoke(method, args)
        .with_context(|| format!("Execution of {} failed", method))?;

    if let Some(value) = result {
        println!("=> {}", describe(&interp, &value));
    }
    Ok(())
}

#[derive(Serialize)]
struct MethodSummary<'a> {
    name: &'a str,
    descriptor: Option<String>,
    kind: MethodKind,
    annotations: Vec<&'a str>,
    selected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    skipped: Option<Rejection>,
    max_stack: u16,
    max_locals: u16,
    returns: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<Vec<String>>,
}

impl<'a> MethodSummary<'a> {
    fn new(method: &'a MethodUnit, config: &InstrumentationConfig, with_code: bool) -> Self {
        let verdict = selector::classify(&method.header, config);
        Self {
            name: method.name(),
            descriptor: method.header.descriptor.as_ref().map(ToString::to_string),
            kind: method.header.kind,
            annotations: method.header.annotations.iter().collect(),
            selected: verdict.is_ok(),
            skipped: verdict.err(),
            max_stack: method.max_stack,
            max_locals: method.max_locals,
            returns: method.return_count(),
            code: with_code.then(|| method.instructions.iter().map(ToString::to_string).collect()),
        }
    }
}

fn run_inspect(input: &Path, with_code: bool, format: OutputFormat, plugin: &PluginArgs) -> Result<()> {
    let config = load_config(plugin)?;
    config.validate().context("Invalid instrumentation configuration")?;
    let class = ClassUnit::from_file(input)?;

    let summaries: Vec<MethodSummary<'_>> = class
        .methods
        .iter()
        .map(|m| MethodSummary::new(m, &config, with_code))
        .collect();

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&summaries).context("Failed to serialize summary")?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            println!("class {}", class.name);
            for summary in &summaries {
                let verdict = match summary.skipped {
                    None => "selected".to_string(),
                    Some(reason) => format!("skipped: {}", reason.as_str()),
                };
                println!(
                    "  {}{}  [{}]  max_stack={} max_locals={} returns={}",
                    summary.name,
                    summary.descriptor.as_deref().unwrap_or(""),
                    verdict,
                    summary.max_stack,
                    summary.max_locals,
                    summary.returns
                );
                for (index, line) in summary.code.iter().flatten().enumerate() {
                    println!("    {:>4}: {}", index, line);
                }
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Command::Weave {
            input,
            output,
            verify,
            plugin,
        } => run_weave(&input, output.as_deref(), verify, &plugin),
        Command::Run {
            input,
            method,
            args,
            weave,
            plugin,
        } => run_method(&input, &method, &args, weave, &plugin),
        Command::Inspect {
            input,
            code,
            format,
            plugin,
        } => run_inspect(&input, code, format, &plugin),
    }
}
