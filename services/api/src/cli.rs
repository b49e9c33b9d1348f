use crate::demo::{run_demo, DemoArgs};
use crate::server;
use background_checks::error::AppError;
use background_checks::workflows::background_check::token;
use background_checks::workflows::background_check::{InstanceId, RunId};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "Background Check Orchestrator",
    about = "Run and exercise durable candidate background checks from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run one background check end-to-end against the built-in stub backend
    Demo(DemoArgs),
    /// Issue or inspect decision tokens
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },
}

#[derive(Subcommand, Debug)]
enum TokenCommand {
    /// Encode an instance/run pair into a decision token
    Issue {
        /// Instance identifier, e.g. `Accept:someone@example.com`
        instance: String,
        /// Run identifier
        run: String,
    },
    /// Decode a decision token back into its instance/run pair
    Resolve { token: String },
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args).await,
        Command::Token { command } => run_token(command),
    }
}

fn run_token(command: TokenCommand) -> Result<(), AppError> {
    match command {
        TokenCommand::Issue { instance, run } => {
            println!("{}", token::issue(&InstanceId(instance), &RunId(run)));
        }
        TokenCommand::Resolve { token: raw } => {
            let (instance, run) = token::resolve(&raw)?;
            println!("instance: {instance}");
            println!("run:      {run}");
        }
    }
    Ok(())
}
