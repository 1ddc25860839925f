//! wsclient - drive a document-processing server from the command line

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wsclient::{ResultError, WebServiceType};
use wsclient_cli::{commands, CliConfig};

#[derive(Parser, Debug)]
#[command(name = "wsclient")]
#[command(about = "Client for document-processing web services")]
#[command(version)]
struct Args {
    /// Server base URL
    #[arg(long, default_value = "http://localhost:8080/webPDF", env = "WSCLIENT_URL")]
    url: String,

    /// Transport: rest or soap
    #[arg(long, default_value = "rest", env = "WSCLIENT_TRANSPORT")]
    transport: String,

    /// User name
    #[arg(short, long, env = "WSCLIENT_USER")]
    user: Option<String>,

    /// Password
    #[arg(short, long, env = "WSCLIENT_PASSWORD", requires = "user")]
    password: Option<String>,

    /// Bearer token (instead of user and password)
    #[arg(long, env = "WSCLIENT_TOKEN", conflicts_with = "user")]
    token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value = "60", env = "WSCLIENT_TIMEOUT_SECS")]
    timeout: u64,

    /// Accept untrusted server certificates
    #[arg(long)]
    insecure: bool,

    /// Enable debug logging
    #[arg(short, long, env = "WSCLIENT_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file, run a web service and save the result
    Convert {
        /// converter, toolbox, pdfa, ocr, signature, urlconverter or barcode
        service: WebServiceType,
        /// Input file, or page URL for the url converter
        input: String,
        /// Where to write the result
        output: PathBuf,
        /// Operation parameters as JSON
        #[arg(long)]
        params: Option<String>,
    },
    /// Upload a file and print its document record
    Upload { input: PathBuf },
    /// Print the server status (admin)
    Status,
    /// Print the server log (admin)
    Log {
        /// Byte range, e.g. 0-1023 or -500
        #[arg(long)]
        range: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("wsclient={0},wsclient_cli={0}", log_level).into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<ResultError>() {
                Some(result) => eprintln!("error {}: {}", result.error_code(), result.message()),
                None => eprintln!("error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = CliConfig {
        url: args.url,
        transport: args.transport,
        user: args.user,
        password: args.password,
        token: args.token,
        timeout_secs: args.timeout,
        insecure: args.insecure,
    };
    tracing::debug!("Connecting to {}", config.url);

    let session = config.open_session().await?;
    let outcome = dispatch(&session, args.command).await;
    session.close().await;
    outcome
}

async fn dispatch(session: &wsclient::Session, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Convert { service, input, output, params } => {
            commands::convert(session, service, &input, &output, params.as_deref()).await
        }
        Command::Upload { input } => {
            let document = commands::upload(session, &input).await?;
            println!("{}", serde_json::to_string_pretty(&document)?);
            Ok(())
        }
        Command::Status => {
            let status = commands::status(session).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Log { range } => {
            print!("{}", commands::log(session, range.as_deref()).await?);
            Ok(())
        }
    }
}
