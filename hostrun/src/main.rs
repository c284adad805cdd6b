//! `hostrun` command-line entry point.

use std::io::{self, IsTerminal};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use dialoguer::{Confirm, theme::ColorfulTheme};

use hostrun::context::RunContext;
use hostrun::core::report::render_report;
use hostrun::exit_codes;
use hostrun::io::init::{InitOptions, init_inventory};
use hostrun::io::inventory::load_inventory;
use hostrun::logging;
use hostrun::logs::render_logs;
use hostrun::progress::Progress;
use hostrun::run::{self, RunOptions, render_plan};
use hostrun::show::render_inventory;

#[derive(Parser)]
#[command(
    name = "hostrun",
    version,
    about = "Run a shell command on many SSH hosts in parallel"
)]
struct Cli {
    /// hostrun home directory [default: ~/.hostrun]
    #[arg(long, global = true, env = "HOSTRUN_HOME", value_name = "DIR")]
    home: Option<PathBuf>,

    /// More diagnostics on stderr (-v, -vv, -vvv). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a sample inventory to `<home>/inventories/<NAME>.yaml`.
    Init {
        #[arg(default_value = "default")]
        name: String,
        /// Overwrite an existing inventory.
        #[arg(short, long)]
        force: bool,
    },
    /// Validate an inventory and print its hosts.
    Show {
        /// Inventory file, or a name under `<home>/inventories/`.
        inventory: String,
    },
    /// Run a command on every host of an inventory.
    Run(RunArgs),
    /// Print the per-host logs of an inventory's last run.
    Log { inventory: String },
}

#[derive(Args)]
struct RunArgs {
    /// Inventory file, or a name under `<home>/inventories/`.
    inventory: String,

    /// Command for hosts without their own override.
    #[arg(short, long)]
    command: Option<String>,

    /// Maximum hosts contacted at once.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Per-host timeout.
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Retries after a connection failure.
    #[arg(long)]
    retries: Option<u32>,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    yes: bool,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn dispatch(cli: Cli) -> Result<i32> {
    let ctx = RunContext::load(cli.home)?;
    match cli.command {
        Command::Init { name, force } => cmd_init(&ctx, &name, force),
        Command::Show { inventory } => cmd_show(&ctx, &inventory),
        Command::Run(args) => cmd_run(&ctx, args),
        Command::Log { inventory } => cmd_log(&ctx, &inventory),
    }
}

fn cmd_init(ctx: &RunContext, name: &str, force: bool) -> Result<i32> {
    let path = init_inventory(&ctx.paths, name, &InitOptions { force })?;
    println!("Wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_show(ctx: &RunContext, arg: &str) -> Result<i32> {
    let (path, name) = ctx.paths.resolve_inventory(arg)?;
    let inventory =
        load_inventory(&path).with_context(|| format!("invalid inventory {}", path.display()))?;
    print!("{}", render_inventory(&name, &path, &inventory));
    Ok(exit_codes::OK)
}

fn cmd_run(ctx: &RunContext, args: RunArgs) -> Result<i32> {
    let options = RunOptions {
        command: args.command,
        workers: args.workers,
        timeout_secs: args.timeout,
        retries: args.retries,
    };
    let plan = run::prepare(ctx, &args.inventory, &options)?;
    eprint!("{}", render_plan(&plan));
    if !args.yes && !confirm(plan.jobs.len())? {
        eprintln!("Cancelled.");
        return Ok(exit_codes::CANCELLED);
    }

    let transport = run::build_transport(ctx, &plan);
    let progress = Progress::stderr(plan.jobs.len());
    let report = run::execute(ctx, &plan, transport, &progress)?;
    if args.json {
        let json = serde_json::to_string_pretty(&report).context("serialize report")?;
        println!("{json}");
    } else {
        print!("{}", render_report(&report));
    }
    Ok(report.exit_code())
}

fn cmd_log(ctx: &RunContext, arg: &str) -> Result<i32> {
    let (path, name) = ctx.paths.resolve_inventory(arg)?;
    let inventory =
        load_inventory(&path).with_context(|| format!("invalid inventory {}", path.display()))?;
    print!("{}", render_logs(&ctx.paths, &name, &inventory)?);
    Ok(exit_codes::OK)
}

fn confirm(hosts: usize) -> Result<bool> {
    if !io::stdin().is_terminal() {
        bail!("stdin is not a terminal; pass --yes to run without confirmation");
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Run on {hosts} hosts?"))
        .default(false)
        .interact()
        .context("read confirmation")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "hostrun", "run", "lab", "-c", "df -h", "-w", "4", "-t", "30", "--retries", "2",
            "--json", "-y",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.inventory, "lab");
        assert_eq!(args.command.as_deref(), Some("df -h"));
        assert_eq!(args.workers, Some(4));
        assert_eq!(args.timeout, Some(30));
        assert_eq!(args.retries, Some(2));
        assert!(args.json && args.yes);
    }

    #[test]
    fn parse_init_defaults_name() {
        let cli = Cli::parse_from(["hostrun", "init"]);
        assert!(matches!(
            cli.command,
            Command::Init { ref name, force: false } if name == "default"
        ));
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["hostrun", "show", "lab", "--home", "/tmp/h", "-vv"]);
        assert_eq!(cli.home, Some(PathBuf::from("/tmp/h")));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
