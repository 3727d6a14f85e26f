use otpgate::account;
use otpgate::config::{load_config, Config};
use otpgate::core::db::Connection;
use otpgate::core::log::sink_from_config;
use otpgate::core::Result;
use otpgate::schema;
use otpgate::services::{process_pending, WorkerRegistry};
use serde_json::json;
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "otpgate.toml";

const USAGE: &str = "usage: otpgate [--config <file>] <command>

commands:
  init                              create the application tables
  send                              process every queued job once
  register <phone> <email> <pass>   register a user and send a code
  generate <user id>                send a new code
  validate <user id> <code>         validate a user's code";

fn main() -> ExitCode {
    // Initialize the logging system using tracing subscriber
    tracing_subscriber::fmt::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let path = args.remove(i + 1);
            args.remove(i);
            Some(path)
        }
        Some(_) => {
            eprintln!("{}", USAGE);
            return ExitCode::FAILURE;
        }
        None => None,
    };

    let config = match read_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let db = Connection::new(config.db.clone()).with_log_sink(sink_from_config(&config.log));

    match run(&db, &config, &args) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn read_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None if Path::new(DEFAULT_CONFIG).exists() => load_config(DEFAULT_CONFIG),
        None => Ok(Config::default()),
    }
}

fn run(db: &Connection, config: &Config, args: &[String]) -> Result<ExitCode> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["init"] => {
            schema::install(db)?;
            println!("Schema installed");
        }
        ["send"] => {
            info!("Processing queued jobs...");
            let done = process_pending(db, &WorkerRegistry::with_defaults(), config.queue.max_retries)?;
            println!("{} job(s) done", done);
        }
        ["register", phone, email, password] => {
            let data = json!({"phone": phone, "email": email, "password": password});
            return Ok(report(
                account::register(db, &data).map(|r| json!({"message": r.message, "userId": r.user_id})),
            ));
        }
        ["generate", id] => {
            return Ok(match parse_id(id) {
                Some(id) => report(account::generate(db, id).map(|m| json!({"message": m}))),
                None => usage(),
            });
        }
        ["validate", id, code] => {
            return Ok(match parse_id(id) {
                Some(id) => report(account::validate(db, id, Some(*code)).map(|m| json!({"message": m}))),
                None => usage(),
            });
        }
        _ => return Ok(usage()),
    }
    Ok(ExitCode::SUCCESS)
}

fn parse_id(id: &str) -> Option<i64> {
    id.parse().ok()
}

fn report(outcome: account::AccountResult<serde_json::Value>) -> ExitCode {
    match outcome {
        Ok(body) => {
            println!("{}", body);
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}", json!({"error": e.to_string(), "status": e.status()}));
            ExitCode::FAILURE
        }
    }
}

fn usage() -> ExitCode {
    eprintln!("{}", USAGE);
    ExitCode::from(2)
}
