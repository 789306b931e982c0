//! picamctl
//!
//! One binary for both roles: when a picam daemon is already running the
//! arguments are sent to it as a single control request, otherwise the
//! daemon (or a one-shot still capture) runs in this process.

mod client;
mod colors;
mod exit_codes;

use clap::Parser;
use exit_codes::ExitCode;
use picam_common::discovery::find_running_instance;
use picam_common::ipc::{local_address, ControlMessage, Reply, ReplyStatus, REPLY_TIMEOUT};
use picam_common::ControlArgs;
use picam_service::config::{load_config, ServiceConfig};
use picam_service::error::ServiceError;

/// picam - camera streaming daemon and remote control
#[derive(Parser, Debug)]
#[command(name = "picamctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    args: ControlArgs,

    /// Print the daemon's reply as JSON
    #[arg(long)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = run(cli);
    std::process::exit(exit_code.as_i32());
}

fn run(cli: Cli) -> ExitCode {
    let msg = ControlMessage::from(&cli.args);
    if let Err(e) = msg.validate() {
        eprintln!("{}", colors::error(&format!("Invalid arguments: {}", e)));
        return ExitCode::InvalidArguments;
    }

    let (config, source) = load_config();

    match find_running_instance() {
        Some(instance) => {
            if !cli.quiet {
                eprintln!(
                    "{}",
                    colors::dim(&format!(
                        "Sending request to running instance (pid {})",
                        instance.pid
                    ))
                );
            }
            send_to_daemon(&cli, &msg, &config)
        }
        None if cli.args.exit => {
            if !cli.quiet {
                eprintln!("{}", colors::warning("No running picam instance to stop"));
            }
            ExitCode::Success
        }
        None => {
            let _guard = picam_service::logging::init_tracing(config.file_logging);
            source.log();
            run_local(&cli.args, &config)
        }
    }
}

fn send_to_daemon(cli: &Cli, msg: &ControlMessage, config: &ServiceConfig) -> ExitCode {
    let addr = local_address(config.control_port);
    match client::send_request(addr, msg, REPLY_TIMEOUT) {
        Ok(reply) => {
            print_reply(&reply, cli.json);
            reply_exit_code(&reply)
        }
        Err(e) => {
            eprintln!("{}", colors::error(&e.to_string()));
            e.to_exit_code()
        }
    }
}

fn print_reply(reply: &Reply, json: bool) {
    if json {
        match serde_json::to_string(reply) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("{}", colors::error(&e.to_string())),
        }
    } else if reply.is_failure() {
        eprintln!("{}", colors::error(&reply.message));
    } else {
        println!("{}", colors::success(&reply.message));
    }
}

fn reply_exit_code(reply: &Reply) -> ExitCode {
    if !reply.is_failure() {
        ExitCode::Success
    } else if reply.status == ReplyStatus::Error && reply.message.starts_with("Invalid request") {
        ExitCode::InvalidArguments
    } else {
        ExitCode::CaptureFailed
    }
}

fn run_local(args: &ControlArgs, config: &ServiceConfig) -> ExitCode {
    match picam_service::run(args, config) {
        Ok(()) => ExitCode::Success,
        Err(e @ ServiceError::Bind { .. }) => {
            eprintln!("{}", colors::error(&e.to_string()));
            ExitCode::ServiceConnectionFailed
        }
        Err(e @ ServiceError::InvalidArguments(_)) => {
            eprintln!("{}", colors::error(&e.to_string()));
            ExitCode::InvalidArguments
        }
        Err(e) => {
            eprintln!("{}", colors::error(&e.to_string()));
            ExitCode::GeneralError
        }
    }
}
