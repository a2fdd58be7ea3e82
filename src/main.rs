use broute_rs::{
    init_logger, log_info, BRouteError, BrouteReader, DongleKind, MeterRecord, Rl7023, ScanCache,
    SerialSettings,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "broute-cli")]
#[command(about = "CLI tool for B-route smart-meter telemetry")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum DongleArg {
    /// Single-stack RL7023 Stick-D/IPS
    Ips,
    /// Dual-stack RL7023 Stick-D/DSS
    Dss,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reader session until Ctrl-C
    Run {
        #[arg(short, long, default_value = "/dev/ttyUSB0")]
        port: String,
        #[arg(short, long, default_value = "115200")]
        baudrate: u32,
        #[arg(short, long, value_enum, default_value = "ips")]
        dongle: DongleArg,
        /// B-route authentication id issued by the utility
        #[arg(long, env = "BROUTE_ID")]
        id: String,
        /// B-route password issued by the utility
        #[arg(long, env = "BROUTE_PASSWORD")]
        password: String,
        #[arg(long, default_value = "scancache.json")]
        cache: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), BRouteError> {
    init_logger();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            port,
            baudrate,
            dongle,
            id,
            password,
            cache,
        } => {
            let settings = SerialSettings {
                port,
                baudrate,
                ..SerialSettings::default()
            };
            let kind = match dongle {
                DongleArg::Ips => DongleKind::Ips,
                DongleArg::Dss => DongleKind::Dss,
            };
            let device: Rl7023 = Rl7023::new(settings, kind, ScanCache::new(cache));

            let (tx, mut rx) = mpsc::channel::<MeterRecord>(32);
            let consumer = tokio::spawn(async move {
                while let Some(record) = rx.recv().await {
                    log_info(&format!(
                        "{} {} = {}",
                        record.source, record.epc, record.value
                    ));
                }
            });

            let stop = Arc::new(AtomicBool::new(false));
            let reader = BrouteReader::new(device, &id, &password, Vec::new(), tx, stop.clone());
            let session = tokio::spawn(reader.run());

            tokio::signal::ctrl_c()
                .await
                .map_err(|e| BRouteError::Other(e.to_string()))?;
            log_info("stop requested");
            stop.store(true, Ordering::SeqCst);

            let _ = session.await;
            let _ = consumer.await;
        }
    }

    Ok(())
}
