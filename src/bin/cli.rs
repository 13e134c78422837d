//! Binary entry point for the qplan diagnostics CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use qplan::query::{ExecutionPlan, ExportOptions, LinkageViolation, PlanErrorWithCode};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[path = "cli/config.rs"]
mod config;
#[path = "cli/ui.rs"]
mod ui;

use config::CliConfig;
use ui::{Theme, Ui};

#[derive(Parser, Debug)]
#[command(
    name = "qplan",
    version,
    about = "Inspect and validate serialized execution plans",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        env = "QPLAN_CONFIG",
        value_name = "FILE",
        help = "CLI config file (defaults to the user config directory)"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    plain: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Print one node type per line, sources first")]
    Show {
        #[arg(value_name = "PLAN", help = "Plan document, or - for stdin")]
        plan: PathBuf,
    },

    #[command(about = "Print the explain tree and plan hash")]
    Explain {
        #[arg(value_name = "PLAN", help = "Plan document, or - for stdin")]
        plan: PathBuf,

        #[arg(long, help = "Hide literal values")]
        redact: bool,
    },

    #[command(about = "Import a plan and verify its linkage")]
    Check {
        #[arg(value_name = "PLAN", help = "Plan document, or - for stdin")]
        plan: PathBuf,
    },

    #[command(about = "Import a plan and export it again")]
    Roundtrip {
        #[arg(value_name = "PLAN", help = "Plan document, or - for stdin")]
        plan: PathBuf,

        #[arg(long, help = "Include liveness sets (overrides [export] verbose)")]
        verbose: bool,
    },

    #[command(about = "Print the effective CLI configuration")]
    Config,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct CheckReport {
    nodes: usize,
    root: Option<u64>,
    rules: Vec<String>,
    collections: Vec<(String, String)>,
    var_usage_computed: bool,
    violations: Vec<String>,
}

fn main() {
    install_tracing_subscriber();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qplan=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<i32, Box<dyn Error>> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.clone())?;
    let ui = Ui::new(if cli.plain { Theme::Plain } else { Theme::Auto });

    match cli.command {
        Command::Show { plan } => {
            let plan = load_plan(&plan)?;
            print!("{}", plan.show()?);
        }
        Command::Explain { plan, redact } => {
            let plan = load_plan(&plan)?;
            let Some(explain) = plan.explain()? else {
                return Err("plan has no root".into());
            };
            emit(&cli.format, &explain, |_| {
                print!("{}", explain.render_text(redact));
                println!("plan_hash: {:016x}", explain.plan_hash);
            })?;
        }
        Command::Check { plan } => {
            let plan = load_plan(&plan)?;
            let violations = plan.check_linkage();
            let report = check_report(&plan, &violations);
            emit(&cli.format, &report, |_| print_check_text(&ui, &report))?;
            if !violations.is_empty() {
                return Ok(2);
            }
        }
        Command::Roundtrip { plan, verbose } => {
            let plan = load_plan(&plan)?;
            let mut options = config.export();
            if verbose {
                options = ExportOptions { verbose: true };
            }
            let document = plan.to_document(&options)?;
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        Command::Config => {
            let path = config
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<none>".to_string());
            emit(&cli.format, &serde_json::json!({ "path": path }), |_| {
                println!("# {path}");
            })?;
            if cli.format == OutputFormat::Text {
                print!("{}", config.render()?);
            }
        }
    }
    Ok(0)
}

fn load_plan(path: &Path) -> Result<ExecutionPlan, Box<dyn Error>> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        fs::read_to_string(path)?
    };
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let plan =
        ExecutionPlan::from_json(&value).map_err(|err| PlanErrorWithCode(&err).to_string())?;
    Ok(plan)
}

fn check_report(plan: &ExecutionPlan, violations: &[LinkageViolation]) -> CheckReport {
    CheckReport {
        nodes: plan.len(),
        root: plan.root().map(|id| id.0),
        rules: plan.applied_rules().to_vec(),
        collections: plan
            .collections()
            .iter()
            .map(|(name, mode)| (name.to_string(), mode.to_string()))
            .collect(),
        var_usage_computed: plan.var_usage_computed(),
        violations: violations.iter().map(ToString::to_string).collect(),
    }
}

fn print_check_text(ui: &Ui, report: &CheckReport) {
    ui.heading("Plan");
    ui.row("nodes", report.nodes);
    ui.row(
        "root",
        report
            .root
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
    ui.row("rules", report.rules.join(", "));
    for (name, mode) in &report.collections {
        ui.row("collection", format!("{name} ({mode})"));
    }
    ui.row("liveness", report.var_usage_computed);
    if report.violations.is_empty() {
        ui.status(true, "linkage ok");
    } else {
        for violation in &report.violations {
            ui.status(false, &format!("violation: {violation}"));
        }
    }
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}
