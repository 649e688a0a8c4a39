use clap::Parser;
use h2surge::cli::Cli;
use h2surge::config::{RunSettings, TestConfig, load_config, merge_config};
use h2surge::engine::{Pool, compact_line, file_writer, json_line, stdout_writer};
use h2surge::types::LogFormat;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let exit_code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run() -> Result<i32, String> {
    let cli = Cli::parse();

    let toml = match &cli.config {
        Some(path) => Some(load_config(path)?),
        None => None,
    };
    let (mut config, settings) = merge_config(&cli, toml)?;

    // A duration bound runs the pumps unbounded and stops them from the
    // caller side when the window closes.
    if settings.duration.is_some() {
        config.requests = 0;
    }

    config.validate().map_err(|e| e.to_string())?;
    run_load_test(config, settings).await
}

async fn run_load_test(config: TestConfig, settings: RunSettings) -> Result<i32, String> {
    let pool = Pool::new(config.clone()).map_err(|e| e.to_string())?;

    install_log_sink(&pool, &settings).await?;
    print_banner(&config, &settings);

    pool.connect()
        .await
        .map_err(|e| format!("connect failed:\n{}", e))?;

    let run_result = match settings.duration {
        Some(duration) => pool.run_for(duration).await,
        None => pool.run().await,
    };
    pool.wait().await;

    if let Some(path) = &settings.log_file {
        println!("Request logs written to: {}\n", path);
    }

    if settings.show_stats {
        println!("{}\n", pool.stats_summary());
    }
    if settings.show_client_stats {
        println!("Individual Connection Statistics:");
        println!("{}", "=".repeat(41));
        println!("{}", pool.all_client_stats_summary());
    }

    pool.close().await;

    match run_result {
        Ok(()) => Ok(0),
        Err(e) => {
            eprintln!("Test finished with errors:\n{}", e);
            Ok(1)
        }
    }
}

async fn install_log_sink(pool: &Pool, settings: &RunSettings) -> Result<(), String> {
    // Per-request logging stays disabled entirely (no queue, no sink
    // task) unless a destination or a format was asked for.
    if settings.log_file.is_none() && settings.log_format.is_none() {
        return Ok(());
    }

    let writer = match &settings.log_file {
        Some(path) => file_writer(path)
            .await
            .map_err(|e| format!("Failed to create log file {}: {}", path, e))?,
        None => stdout_writer(),
    };
    pool.set_log_writer(writer);

    pool.set_line_formatter(match settings.log_format.unwrap_or_default() {
        LogFormat::Json => Arc::new(json_line),
        LogFormat::Compact => Arc::new(compact_line),
    });
    Ok(())
}

fn print_banner(config: &TestConfig, settings: &RunSettings) {
    println!("Starting h2surge test...");
    println!("Configuration:");
    println!("  URL: {}", config.url);
    println!("  Connections: {}", config.clients);
    println!("  Requests per connection: {}", config.requests);
    println!("  Concurrent streams per connection: {}", config.streams);
    println!("  RPS: {} ({} mode)", config.rps, config.rps_mode.as_str());
    if let Some(duration) = settings.duration {
        println!("  Duration: {}", humantime::format_duration(duration));
    }
    if let Some(path) = &settings.log_file {
        println!("  Log file: {}", path);
    }
    println!();
}
