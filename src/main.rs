mod core;
mod utils;
mod workers;

use crate::core::probe::ModeSelector;
use crate::core::session::channels;
use crate::core::sink::{DirectorySink, JsonlTransferLog};
use crate::utils::data_dir;
use crate::utils::log_buffer::{BufferLayer, FileLogLayer, LogBuffer};
use crate::utils::sos::SignalOfStop;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use workers::args::Args;
use workers::node::Node;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::load()?;

    // Initialize the global data directory before anything writes to it
    let data = data_dir::init(args.data_dir.as_deref())?;

    let filter = match args.verbose {
        0 => "warn,ghoststream=info",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let log_buffer = LogBuffer::new();

    let filter_layer = EnvFilter::new(filter);
    let buffer_layer = BufferLayer::new(log_buffer.clone());
    let file_layer = FileLogLayer::new(&data_dir::log_file_path(data))?;

    // No stderr layer: the console owns the terminal. `/log` shows the
    // ring buffer, the file keeps everything.
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(buffer_layer)
        .with(file_layer)
        .init();

    let sos = SignalOfStop::new();

    // Ctrl+C handler
    let sos_clone = sos.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        sos_clone.cancel();
    });

    let download_dir = args.out.clone().unwrap_or_else(|| data.join("downloads"));
    let sink = DirectorySink::new(download_dir);
    let transfer_log = JsonlTransferLog::new(data_dir::transfer_log_path(data));
    let initial_mode = ModeSelector::new(args.mode_policy()).current();
    let (handle, ports, events) = channels(initial_mode, Arc::new(sink), Box::new(transfer_log));

    let console = tokio::spawn(workers::console::run(
        handle.clone(),
        events,
        log_buffer,
        sos.clone(),
    ));

    let result = Node::new(args.session_config(), handle, ports, sos.clone())
        .run(args.command.clone())
        .await;
    sos.cancel();
    let _ = console.await;

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    // The stdin reader may still be parked in a blocking read; don't wait for it.
    std::process::exit(0);
}
