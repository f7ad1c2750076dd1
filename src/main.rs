//! The Lambda entry point: one Kinesis batch per invocation.

use lambda_runtime::{run, service_fn, Error, LambdaEvent};

use event_ingest_lambda::{KinesisBatch, Services};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let svcs = Services::init().await?;
    let ref_svcs = &svcs;

    run(service_fn(|event: LambdaEvent<KinesisBatch>| async move {
        let (batch, _context) = event.into_parts();
        Ok::<_, Error>(ref_svcs.dispatch(batch).await)
    }))
    .await?;
    Ok(())
}
