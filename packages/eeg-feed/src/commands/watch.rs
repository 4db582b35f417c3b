use crate::cli::WatchArgs;
use crate::exit_codes;
use crate::output;
use eeg_feed::{EegRecord, FeedConfig, RecordReconciler};
use tokio::sync::mpsc;
use tracing::info;

pub async fn execute(args: WatchArgs, mut config: FeedConfig) -> i32 {
    if args.session.is_some() {
        config.session = args.session;
    }
    if args.no_history {
        config.seed_history = false;
    }

    let mut reconciler = match RecordReconciler::from_config(config) {
        Ok(reconciler) => reconciler,
        Err(e) => return super::fail(&e),
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<EegRecord>();
    reconciler.subscribe(move |record| {
        let _ = tx.send(record.clone());
    });
    reconciler.on_state_change(|state| eprintln!("[{}]", state));

    let handle = match reconciler.start().await {
        Ok(handle) => handle,
        Err(e) => return super::fail(&e),
    };

    let mut printed = 0usize;
    let mut exit_code = exit_codes::SUCCESS;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = handle.closed() => break,
            record = rx.recv() => {
                let Some(record) = record else { break };
                if let Err(e) = output::print_json(&record, true) {
                    eprintln!("Error: {}", e);
                    exit_code = exit_codes::TRANSPORT_ERROR;
                    break;
                }
                printed += 1;
                if args.limit.is_some_and(|limit| printed >= limit) {
                    break;
                }
            }
        }
    }

    if let Ok(stats) = handle.stats().await {
        info!("Watch finished: {:?}", stats);
    }

    handle.close();
    handle.closed().await;

    exit_code
}
