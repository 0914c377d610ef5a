//! Batch payment execution.
//!
//! Each request goes through the full facade `pay` path (ledger entry,
//! guard chain, routing) with bounded concurrency. Results come back in
//! request order; per-item errors become failed results so one bad payment
//! never aborts the batch.

use futures_util::StreamExt;
use futures_util::stream;

use crate::client::{AgentPay, PayOptions};
use crate::types::{BatchPaymentResult, PaymentMethod, PaymentRequest, PaymentResult};

/// Default concurrent payments in a batch.
pub const DEFAULT_CONCURRENCY: usize = 5;

pub(crate) async fn process(
    client: &AgentPay,
    requests: Vec<PaymentRequest>,
    concurrency: usize,
) -> BatchPaymentResult {
    let concurrency = concurrency.max(1);
    let total_count = requests.len();

    let results: Vec<PaymentResult> = stream::iter(requests.into_iter().map(|request| {
        async move {
            let options = PayOptions {
                destination_chain: request.destination_chain,
                wallet_set_id: request.wallet_set_id.clone(),
                purpose: request.purpose.clone(),
                idempotency_key: request.idempotency_key.clone(),
                metadata: request.metadata.clone(),
                ..Default::default()
            };
            match client
                .pay(&request.wallet_id, &request.recipient, request.amount, options)
                .await
            {
                Ok(result) => result,
                Err(e) => PaymentResult::failure(
                    request.recipient,
                    request.amount,
                    PaymentMethod::Transfer,
                    e.to_string(),
                ),
            }
        }
    }))
    .buffered(concurrency)
    .collect()
    .await;

    let success_count = results.iter().filter(|r| r.success).count();
    let transaction_ids = results
        .iter()
        .filter_map(|r| r.transaction_id.clone())
        .collect();

    BatchPaymentResult {
        total_count,
        success_count,
        failed_count: total_count - success_count,
        results,
        transaction_ids,
    }
}
