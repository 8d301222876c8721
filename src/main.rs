#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{anyhow, bail, Context, Result};
use shprobe::config::HarnessConfig;
use shprobe::error::HarnessError;
use shprobe::report::{Format, Reporter};
use shprobe::runner::run_script;
use shprobe::scripts::{self, Script, SCRIPTS};
use shprobe::signal::pending_signal;
use std::env;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const USAGE: &str = "\
Usage: shprobe [OPTIONS] <SCRIPT>... -- <SHELL> [ARGS...]

Run conformance scripts against an interactive shell in a pseudo-terminal.

Scripts:
  all            Run every bundled script
  --list         Show the bundled scripts

Options:
  --config FILE  Read settings from FILE instead of ~/.shproberc
  --timeout SECS Per-expectation timeout
  --prompt REGEX Prompt the shell prints when ready for input
  --json         Print one JSON object per script
  -h, --help     Show this help

Environment:
  SHPROBE_LOG    Log filter (default: warn)
  SHPROBE_*      Overrides for any ~/.shproberc setting";

#[derive(Debug, Default)]
struct Cli {
    config: Option<PathBuf>,
    timeout: Option<String>,
    prompt: Option<String>,
    json: bool,
    list: bool,
    help: bool,
    scripts: Vec<String>,
    shell: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--" => {
                cli.shell = args[i + 1..].to_vec();
                break;
            }
            "--config" | "--timeout" | "--prompt" => {
                let value = args
                    .get(i + 1)
                    .cloned()
                    .ok_or_else(|| anyhow!("{} requires a value", args[i]))?;
                match args[i].as_str() {
                    "--config" => cli.config = Some(PathBuf::from(value)),
                    "--timeout" => cli.timeout = Some(value),
                    _ => cli.prompt = Some(value),
                }
                i += 2;
            }
            "--json" => {
                cli.json = true;
                i += 1;
            }
            "--list" => {
                cli.list = true;
                i += 1;
            }
            "-h" | "--help" => {
                cli.help = true;
                i += 1;
            }
            flag if flag.starts_with('-') => bail!("unknown option: {}", flag),
            name => {
                cli.scripts.push(name.to_string());
                i += 1;
            }
        }
    }
    Ok(cli)
}

fn select_scripts(names: &[String]) -> Result<Vec<&'static Script>> {
    if names.is_empty() {
        bail!("no script given (try `all` or --list)");
    }
    if names.iter().any(|n| n == "all") {
        return Ok(SCRIPTS.iter().collect());
    }
    names
        .iter()
        .map(|name| {
            scripts::find(name).ok_or_else(|| match scripts::suggest(name) {
                Some(close) => anyhow!("unknown script '{}', did you mean '{}'?", name, close),
                None => anyhow!("unknown script '{}'", name),
            })
        })
        .collect()
}

fn load_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("cannot read config {}", path.display()))?,
        None => HarnessConfig::from_rc(),
    };
    config.apply_env(env::vars());

    if let Some(timeout) = &cli.timeout {
        config.timeout = shprobe::config::parse_seconds(timeout)
            .ok_or_else(|| anyhow!("--timeout: '{}' is not a number of seconds", timeout))?;
    }
    if let Some(prompt) = &cli.prompt {
        regex::bytes::Regex::new(prompt).context("--prompt is not a valid regex")?;
        config.prompt = prompt.clone();
    }

    let (program, args) = cli
        .shell
        .split_first()
        .ok_or_else(|| anyhow!("no shell given after `--`"))?;
    config.program = program.clone();
    config.args = args.to_vec();
    Ok(config)
}

fn run(args: &[String]) -> Result<i32> {
    let cli = parse_args(args)?;

    if cli.help {
        println!("{}", USAGE);
        return Ok(0);
    }
    if cli.list {
        for script in SCRIPTS {
            println!("{:<10} {}", script.name, script.description);
        }
        return Ok(0);
    }

    let selected = select_scripts(&cli.scripts)?;
    let config = load_config(&cli)?;
    let reporter = Reporter::new(if cli.json { Format::Json } else { Format::Text });

    let mut exit_code = 0;
    for script in selected {
        let outcome = run_script(script.name, &config, script.run);
        println!("{}", reporter.render(&outcome));
        if exit_code == 0 {
            exit_code = outcome.exit_code;
        }
        // Remaining scripts are skipped once the harness itself is signalled
        if outcome.interrupted() {
            return Ok(outcome.exit_code);
        }
        if let Some(signal) = pending_signal() {
            return Ok(HarnessError::Interrupted { signal }.exit_code());
        }
    }
    Ok(exit_code)
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SHPROBE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn main() {
    init_logging();

    let args: Vec<String> = env::args().skip(1).collect();
    let code = match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("shprobe: {:#}", e);
            eprintln!("Run `shprobe --help` for usage.");
            2
        }
    };
    std::process::exit(code);
}
