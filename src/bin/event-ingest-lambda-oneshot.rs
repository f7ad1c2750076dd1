//! "Oneshot" version of the ingestion Lambda.
//!
//! This executable processes one Kinesis batch given as JSON text on the
//! command line, against the real bucket and table named by the usual
//! `INGEST_*` environment variables, and prints the batch report.

use lambda_runtime::Error;
use std::env;

use event_ingest_lambda::{KinesisBatch, Services};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let mut args = env::args();
    args.next(); // skip argv[0]

    let json_text = args.next().ok_or_else(|| -> Error {
        "first argument should be the Kinesis event JSON text (`{\"Records\": [...]}`)".into()
    })?;
    let batch: KinesisBatch = serde_json::from_str(&json_text)?;

    let svcs = Services::init().await?;
    let report = svcs.dispatch(batch).await;

    serde_json::to_writer(std::io::stdout().lock(), &report)?;
    Ok(())
}
