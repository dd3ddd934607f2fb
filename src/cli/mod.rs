mod preview;
mod serve;

use anyhow::{Context, Result, bail};
use console::style;
use std::path::PathBuf;

use crate::core::scheduler::compiler::ScheduleZone;
use crate::core::store::ScheduleType;
use crate::core::terminal::{self, GuideSection, print_error};

const DEFAULT_PREVIEW_COUNT: usize = 5;

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Core")
        .command("serve", "Start the API server and task scheduler (default)")
        .command("invoke", "Send one prompt through the LLM gateway")
        .print();

    GuideSection::new("Diagnostics")
        .command("schedule", "Preview the next firing times of a schedule")
        .command("help", "Show this message")
        .print();

    GuideSection::new("Options")
        .text("--config <path>          Config file (else $AGENTDESK_CONFIG, else the user config dir)")
        .text("--api-host <host>        Override the bind host")
        .text("--api-port <port>        Override the bind port")
        .blank()
        .text("schedule <daily|weekly|monthly> <HH:MM> [day] [--count N] [--utc]")
        .text("invoke --prompt <text> [--tools a,b]")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("agentdesk").green()
    );
}

/// Read the value following a flag, failing when it is missing.
fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .with_context(|| format!("{} needs a value", flag))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ServeArgs {
    pub config: Option<PathBuf>,
    pub api_host: Option<String>,
    pub api_port: Option<u16>,
}

pub(crate) fn parse_serve_flags(args: &[String], start: usize) -> Result<ServeArgs> {
    let mut parsed = ServeArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                parsed.config = Some(PathBuf::from(flag_value(args, i, "--config")?));
                i += 2;
            }
            "--api-host" => {
                parsed.api_host = Some(flag_value(args, i, "--api-host")?.to_string());
                i += 2;
            }
            "--api-port" => {
                let raw = flag_value(args, i, "--api-port")?;
                parsed.api_port = Some(
                    raw.parse()
                        .with_context(|| format!("--api-port must be a port number, got '{}'", raw))?,
                );
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(parsed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScheduleArgs {
    pub schedule_type: ScheduleType,
    pub schedule_time: String,
    pub schedule_day: Option<i64>,
    pub count: usize,
    pub zone: ScheduleZone,
}

pub(crate) fn parse_schedule_args(args: &[String], start: usize) -> Result<ScheduleArgs> {
    let mut positional = Vec::new();
    let mut count = DEFAULT_PREVIEW_COUNT;
    let mut zone = ScheduleZone::Local;
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-n" => {
                let raw = flag_value(args, i, "--count")?;
                count = raw
                    .parse()
                    .with_context(|| format!("--count must be a number, got '{}'", raw))?;
                i += 2;
            }
            "--utc" => {
                zone = ScheduleZone::Utc;
                i += 1;
            }
            other => {
                positional.push(other.to_string());
                i += 1;
            }
        }
    }

    let [kind, time, rest @ ..] = positional.as_slice() else {
        bail!("usage: agentdesk schedule <daily|weekly|monthly> <HH:MM> [day]");
    };
    let Some(schedule_type) = ScheduleType::from_name(kind) else {
        bail!("unknown schedule type '{}', expected daily, weekly or monthly", kind);
    };
    let schedule_day = match rest.first() {
        Some(raw) => Some(
            raw.parse()
                .with_context(|| format!("day must be a number, got '{}'", raw))?,
        ),
        None => None,
    };
    Ok(ScheduleArgs {
        schedule_type,
        schedule_time: time.clone(),
        schedule_day,
        count: count.max(1),
        zone,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct InvokeArgs {
    pub prompt: String,
    pub tools: Vec<String>,
    pub config: Option<PathBuf>,
}

pub(crate) fn parse_invoke_args(args: &[String], start: usize) -> Result<InvokeArgs> {
    let mut parsed = InvokeArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--prompt" | "-p" => {
                parsed.prompt = flag_value(args, i, "--prompt")?.to_string();
                i += 2;
            }
            "--tools" => {
                parsed.tools = flag_value(args, i, "--tools")?
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
                i += 2;
            }
            "--config" | "-c" => {
                parsed.config = Some(PathBuf::from(flag_value(args, i, "--config")?));
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(parsed)
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Flags without a command mean `serve`.
    let (cmd, rest) = match args.get(1).map(String::as_str) {
        None => ("serve", 1),
        Some(flag) if flag.starts_with('-') && !matches!(flag, "-h" | "--help") => ("serve", 1),
        Some(cmd) => (cmd, 2),
    };

    match cmd {
        "serve" => {
            let flags = parse_serve_flags(&args, rest)?;
            serve::run_server(flags).await
        }
        "schedule" => {
            let parsed = parse_schedule_args(&args, rest)?;
            preview::preview_schedule(&parsed)
        }
        "invoke" => {
            let parsed = parse_invoke_args(&args, rest)?;
            if parsed.prompt.is_empty() {
                print_error("Error: --prompt is required for invoke.");
                print_help();
                return Ok(());
            }
            preview::invoke_once(parsed).await
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}
