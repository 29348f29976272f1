mod config;

use amqp_driver::amqp::AmqpGateway;
use amqp_driver::{Coordinator, InputRouter, Settings};
use anyhow::Result;
use env_logger::fmt::style::{AnsiColor, Color, RgbColor, Style};
use env_logger::{Builder, Env};
use log::{error, info, warn};
use std::io::Write;
use tokio::io::BufReader;
use tokio::signal;
use tokio_util::sync::CancellationToken;

fn setup_logger() {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    builder
        .format_timestamp_millis()
        .format(|buf, record| {
            let color: Color = match record.level() {
                log::Level::Error => AnsiColor::Red.into(),
                log::Level::Warn => AnsiColor::Yellow.into(),
                log::Level::Info => AnsiColor::Green.into(),
                log::Level::Debug => RgbColor(192, 192, 192).into(),
                log::Level::Trace => RgbColor(96, 96, 96).into(),
            };
            let lvl = Style::new().bold().fg_color(Some(color));

            writeln!(
                buf,
                "{} - [{lvl}{:5}{lvl:#}] {}:{} - {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or_default(),
                record.line().unwrap_or_default(),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Always)
        .init();
}

async fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => (),
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => warn!("Interrupted, closing every link"),
                Err(e) => error!("Cannot listen for Ctrl-C {:?}", e),
            }

            token.cancel();
        }
    }
}

async fn run(cli: &config::CliConfig) -> Result<()> {
    let config = config::parse_config(&cli.config_file_path)?.to_driver_config()?;

    let coordinator = Coordinator::new(
        AmqpGateway,
        Settings {
            close_timeout: cli.close_timeout(),
            fail_fast: cli.fail_fast,
        },
    );
    let token = coordinator.cancellation_token();

    tokio::spawn(cancel_on_ctrl_c(token.clone()));

    let mut inputs = InputRouter::new().with_prompt(true);
    let run = coordinator.start(&config, &mut inputs).await?;

    info!("Running {} links", run.spawned());

    if !inputs.is_empty() {
        let reader_token = token.clone();

        tokio::spawn(async move {
            match inputs.run(BufReader::new(tokio::io::stdin()), reader_token).await {
                Ok(lines) => info!("Input closed after {} lines", lines),
                Err(e) => error!("Error reading input {:?}", e),
            }
        });
    }

    let report = run.wait().await;

    token.cancel();

    print!("{report}");

    report.into_result().map(|_| ())
}

#[tokio::main]
pub async fn main() {
    setup_logger();

    let cli = config::cli();

    let code = match run(&cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);

            1
        }
    };

    // A pending read on stdin would hold up the runtime shutdown.
    std::process::exit(code);
}
