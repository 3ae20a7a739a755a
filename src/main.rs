use std::{path::PathBuf, process, time::Duration};

use clap::{Parser, ValueEnum};
use qure_rs::{Pipeline, QureClient, QureConfig, ResultFileType};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Base URL of the analysis service
    #[clap(short = 'u', long, env = "QURE_BASE_URL", default_value = "https://localhost")]
    base_url: String,
    /// Authorization header value, `Token <hex>`
    #[clap(short = 'k', long, env = "QURE_AUTHORIZATION", hide_env_values = true)]
    authorization: String,
    /// DICOM file to upload
    #[clap(short, long, env = "QURE_INPUT", default_value = "inputDcm.dcm")]
    input: PathBuf,
    /// Where the downloaded DICOM report is written
    #[clap(short, long, env = "QURE_OUTPUT", default_value = "outputDcm.dcm")]
    output: PathBuf,
    /// Instance whose results are requested
    #[clap(short = 'n', long, env = "QURE_INSTANCE_UID", default_value = "")]
    instance_uid: String,
    /// Name of the uploaded part, read from the file when absent
    #[clap(long, env = "QURE_IDENTIFIER")]
    identifier: Option<String>,
    /// Send the part name and filename in the Content-Disposition
    #[clap(short = 'f', long, env = "QURE_FIX_APPLIED")]
    fix_applied: bool,
    /// Request timeout in seconds
    #[clap(short = 't', long, env = "QURE_TIMEOUT", default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..=60))]
    timeout: u64,
    /// Delay between two result requests in seconds
    #[clap(long, env = "QURE_RETRY_RATE", default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..=300))]
    retry_rate: u64,
    /// Maximum length of patient names and ids
    #[clap(long, env = "QURE_MAX_NAME_AND_ID_LENGTH", default_value_t = 45)]
    max_name_and_id_length: usize,
    /// Artifacts to request from the service
    #[arg(value_enum)]
    #[clap(long, env = "QURE_RESULT_TYPES", value_delimiter = ',', default_value = "pdf,overlay")]
    result_types: Vec<ResultFileType>,
    /// Disable the client, nothing is sent
    #[clap(long, env = "QURE_DISABLED")]
    disable: bool,
    /// Check that the service answers before uploading
    #[clap(short, long)]
    ping: bool,
    /// Set the log level
    #[arg(value_enum)]
    #[clap(short = 'L', long, default_value = "info")]
    log_level: LogLevel,
    /// Display timestamps with log messages
    #[clap(short = 'T', long)]
    timestamp: bool,
}

#[derive(Copy, Clone, ValueEnum, Debug)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Quiet,
}

#[tokio::main]
pub async fn main() {
    let args = Args::parse();

    tracing_subscriber_handler(&args);

    let config = config_from_args(&args);
    if let Err(e) = config.validate() {
        error!("Error: {}", e);
        process::exit(1);
    }
    if !config.is_enabled() {
        warn!("Client disabled or authorization invalid, nothing to do.");
        return;
    }

    if args.ping {
        match QureClient::new(&config).ping().await {
            Ok(true) => info!("{} is reachable.", config.base_url),
            Ok(false) => warn!("{} answered an unexpected status.", config.base_url),
            Err(e) => {
                error!("Error while pinging {}: {}", config.base_url, e);
                process::exit(1);
            }
        }
    }

    if Pipeline::new(config).process().await.is_err() {
        process::exit(1);
    }
}

fn config_from_args(args: &Args) -> QureConfig {
    QureConfig {
        enabled: !args.disable,
        base_url: args.base_url.clone(),
        authorization: args.authorization.clone(),
        input_path: args.input.clone(),
        output_path: args.output.clone(),
        instance_uid: args.instance_uid.clone(),
        identifier: args.identifier.clone(),
        fix_applied: args.fix_applied,
        max_name_and_id_length: args.max_name_and_id_length,
        request_timeout: Duration::from_secs(args.timeout),
        retry_rate: Duration::from_secs(args.retry_rate),
        result_types: args.result_types.clone(),
    }
}

fn tracing_subscriber_handler(args: &Args) {
    let env_filter = match args.log_level {
        LogLevel::Debug => "qure_rs=debug",
        LogLevel::Info => "qure_rs=info",
        LogLevel::Warn => "qure_rs=warn",
        LogLevel::Error => "qure_rs=error",
        LogLevel::Quiet => "qure_rs=off",
    };

    // the builder yields a different type without time, hence no match
    let res = if args.timestamp {
        let sub = tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .finish();
        tracing::subscriber::set_global_default(sub)
    } else {
        let sub = tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .without_time()
            .finish();
        tracing::subscriber::set_global_default(sub)
    };
    if let Err(e) = res {
        eprintln!("Error while setting subscriber for tracing: {}", e);
    }
}
