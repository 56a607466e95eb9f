use std::io::{self, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Second-resolution UTC timestamp used in every emitted document.
pub fn utc_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Prefixes a document with `ts`.
#[derive(Debug, Serialize)]
pub struct Stamped<T> {
    pub ts: String,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Stamped<T> {
    pub fn now(body: T) -> Self {
        Self {
            ts: utc_timestamp(),
            body,
        }
    }
}

/// One JSON document per line on stdout, flushed so pipes see it at once.
pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, value)?;
    stdout.write_all(b"\n")?;
    stdout.flush()?;
    Ok(())
}
