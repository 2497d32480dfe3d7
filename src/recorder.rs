// ===============================
// src/recorder.rs
// ===============================
//
// JSONL audit recorder:
// - Appends one Event per serviced calculation/export to a .jsonl file.
// - Buffered with BufWriter to keep syscalls down.
// - Flushes every 1s and every 100 events, whichever comes first.
// - Creates the parent directory if missing.
// - On write failure, reopens the file and keeps going.
//
// ENV: set `RECORD_FILE=/path/to/audit.jsonl` to enable (see main.rs).
//
use std::path::Path;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use serde::{Deserialize, Serialize};

/// One audit line: which endpoint served which request, and the headline
/// numbers of the answer. No full payload echo; exports can be replayed
/// from their own output if needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalcEvent {
    pub req_id: String,
    pub ts_ns: i128,
    pub index: String,
    pub contracts: i64,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Calc(CalcEvent),
    Export(CalcEvent),
    Note(String),
}

async fn open_writer(path: &str) -> BufWriter<tokio::fs::File> {
    // Make sure the parent directory exists (if any)
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent).await {
                error!(?e, %path, "recorder: create_dir_all failed");
            }
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .unwrap_or_else(|e| panic!("recorder: open {} failed: {}", path, e));

    BufWriter::new(file)
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    info!(%path, "recorder: started");
    let mut writer = open_writer(&path).await;

    // Periodic flush (1s) + count-based flush
    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut since_last_flush: u32 = 0;
    const FLUSH_EVERY_N_EVENTS: u32 = 100;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                match maybe_ev {
                    Some(ev) => {
                        let line = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                error!(?e, "recorder: serialize error, skip event");
                                continue;
                            }
                        };

                        if let Err(e) = writer.write_all(line.as_bytes()).await {
                            error!(?e, "recorder: write_all failed, attempting reopen");
                            writer = open_writer(&path).await;
                            // one retry after reopen
                            if let Err(e2) = writer.write_all(line.as_bytes()).await {
                                error!(?e2, "recorder: write_all failed again after reopen, drop event");
                                continue;
                            }
                        }
                        if let Err(e) = writer.write_all(b"\n").await {
                            error!(?e, "recorder: write newline failed, attempting reopen");
                            writer = open_writer(&path).await;
                            let _ = writer.write_all(b"\n").await;
                        }

                        since_last_flush += 1;
                        if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                            let _ = writer.flush().await;
                            since_last_flush = 0;
                        }
                    }
                    None => {
                        // Channel closed: flush and exit
                        let _ = writer.flush().await;
                        info!("recorder: channel closed, stopped");
                        break;
                    }
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_to_one_json_line() {
        let ev = Event::Calc(CalcEvent {
            req_id: "REQ-1-42".to_string(),
            ts_ns: 1_700_000_000_000_000_000,
            index: "FTSE100".to_string(),
            contracts: 21,
            rows: 1,
        });
        let line = serde_json::to_string(&ev).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"contracts\":21"));
    }
}
