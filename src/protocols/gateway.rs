//! Cross-chain USDC transfers over CCTP V2.
//!
//! The adapter resolves same-chain requests to a plain provider transfer;
//! everything else drives an explicit state machine:
//!
//! `INIT -> APPROVING -> APPROVED -> BURNING -> BURNED -> POLLING_ATTESTATION
//! -> ATTESTED -> (RELAYED | MINTING -> MINTED) -> DONE`
//!
//! Each state has its own bounded poll loop; a failure reports the state it
//! happened in. The sender-facing status is COMPLETED once burn and
//! attestation succeed — funds have left the source — with
//! `manual_mint_required` in metadata when no relayer will mint and the
//! agent-side mint did not confirm.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::cctp::{
    DEFAULT_MAX_FEE, EMPTY_DESTINATION_CALLER, FAST_TRANSFER_THRESHOLD,
    STANDARD_TRANSFER_THRESHOLD, address_to_bytes32, attestation_url, cctp_domain,
    is_cctp_supported, message_transmitter_v2, token_messenger_v2, usdc_contract,
};
use crate::config::Config;
use crate::error::Result;
use crate::gas::check_gas_requirements;
use crate::network::Network;
use crate::protocols::transfer::is_solana_address;
use crate::provider::ContractExecutionParams;
use crate::router::{AdapterRequest, AdapterSimulation, ProtocolAdapter};
use crate::types::{
    FeeLevel, PaymentMethod, PaymentResult, PaymentStatus, TransactionState, WalletState,
    to_usdc_units,
};
use crate::wallet::WalletService;

/// Poll budget for approval confirmation.
const APPROVAL_TIMEOUT_SECS: f64 = 120.0;
/// Poll budget for the burn transaction hash.
const BURN_TIMEOUT_SECS: f64 = 300.0;
/// Poll budget for the attestation service.
const ATTESTATION_TIMEOUT_SECS: f64 = 1200.0;
/// Interval between attestation polls.
const ATTESTATION_POLL_SECS: f64 = 5.0;
/// Poll budget for the destination mint.
const MINT_TIMEOUT_SECS: f64 = 120.0;

/// States of the CCTP transfer machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CctpState {
    Init,
    Approving,
    Approved,
    Burning,
    Burned,
    PollingAttestation,
    Attested,
    Relayed,
    Minting,
    Minted,
    Done,
}

impl std::fmt::Display for CctpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CctpState::Init => "init",
            CctpState::Approving => "approving",
            CctpState::Approved => "approved",
            CctpState::Burning => "burning",
            CctpState::Burned => "burned",
            CctpState::PollingAttestation => "polling_attestation",
            CctpState::Attested => "attested",
            CctpState::Relayed => "relayed",
            CctpState::Minting => "minting",
            CctpState::Minted => "minted",
            CctpState::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// Structured failure carrying the state it happened in.
struct CctpFailure {
    state: CctpState,
    reason: String,
    transaction_id: Option<String>,
    tx_hash: Option<String>,
}

impl CctpFailure {
    fn new(state: CctpState, reason: impl Into<String>) -> Self {
        CctpFailure {
            state,
            reason: reason.into(),
            transaction_id: None,
            tx_hash: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AttestationMessage {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    attestation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttestationResponse {
    #[serde(default)]
    messages: Vec<AttestationMessage>,
}

struct MintOutcome {
    success: bool,
    tx_hash: Option<String>,
    executor_wallet: Option<String>,
    error: Option<String>,
}

/// Adapter for cross-chain transfers via CCTP.
pub struct GatewayAdapter {
    config: Config,
    wallets: Arc<WalletService>,
    http: reqwest::Client,
}

impl GatewayAdapter {
    pub const PRIORITY: u8 = 30;

    pub fn new(config: Config, wallets: Arc<WalletService>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(config.http_timeout))
            .build()
            .unwrap_or_default();
        GatewayAdapter {
            config,
            wallets,
            http,
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.config.transaction_poll_interval.max(0.001))
    }

    fn attempts_for(&self, budget_secs: f64) -> u32 {
        (budget_secs / self.config.transaction_poll_interval.max(0.001)).ceil() as u32
    }

    fn cross_chain_recipient(dest: Network, address: &str) -> String {
        format!("{dest}:{address}")
    }

    /// Same-chain path: defer to the provider transfer.
    async fn execute_same_chain(&self, request: &AdapterRequest, dest: Network) -> PaymentResult {
        let source = request.source_network.unwrap_or(self.config.network);
        let transfer = self
            .wallets
            .transfer(
                &request.wallet_id,
                &request.recipient,
                request.amount,
                request.fee_level,
                request.idempotency_key.clone(),
                request.wait_for_completion,
                request.timeout_seconds,
            )
            .await;

        let mut metadata = Map::new();
        metadata.insert("source_network".into(), Value::String(source.to_string()));
        metadata.insert("destination_network".into(), Value::String(dest.to_string()));
        metadata.insert(
            "destination_address".into(),
            Value::String(request.recipient.clone()),
        );
        if let Some(purpose) = &request.purpose {
            metadata.insert("purpose".into(), Value::String(purpose.clone()));
        }
        metadata.insert("same_chain".into(), Value::Bool(true));

        match transfer {
            Ok(result) if result.success => PaymentResult {
                success: true,
                transaction_id: result.transaction.as_ref().map(|tx| tx.id.clone()),
                blockchain_tx: result.tx_hash,
                amount: request.amount,
                recipient: request.recipient.clone(),
                method: PaymentMethod::Crosschain,
                status: if request.wait_for_completion {
                    PaymentStatus::Completed
                } else {
                    PaymentStatus::Pending
                },
                error: None,
                guards_passed: Vec::new(),
                metadata,
                resource_data: None,
            },
            Ok(result) => {
                let mut failure = PaymentResult::failure(
                    request.recipient.clone(),
                    request.amount,
                    PaymentMethod::Crosschain,
                    format!(
                        "Same-chain transfer failed: {}",
                        result.error.unwrap_or_else(|| "unknown".into())
                    ),
                );
                failure.metadata = metadata;
                failure
            }
            Err(e) => {
                let mut failure = PaymentResult::failure(
                    request.recipient.clone(),
                    request.amount,
                    PaymentMethod::Crosschain,
                    format!("Same-chain transfer failed: {e}"),
                );
                failure.metadata = metadata;
                failure
            }
        }
    }

    /// Poll a provider transaction until it is terminal, confirmed, or the
    /// budget runs out. Returns the last observed transaction.
    async fn poll_transaction(
        &self,
        transaction_id: &str,
        budget_secs: f64,
        want_hash: bool,
    ) -> Result<crate::types::TransactionInfo> {
        let attempts = self.attempts_for(budget_secs);
        let mut last = self
            .wallets
            .provider()
            .get_transaction(transaction_id)
            .await?;
        for _ in 0..attempts {
            if last.is_terminal()
                || last.state == TransactionState::Confirmed
                || (want_hash && last.tx_hash.is_some())
            {
                return Ok(last);
            }
            tokio::time::sleep(self.poll_interval()).await;
            last = self
                .wallets
                .provider()
                .get_transaction(transaction_id)
                .await?;
        }
        Ok(last)
    }

    /// APPROVE: allow the TokenMessenger to pull `amount_units` of USDC.
    async fn approve(
        &self,
        request: &AdapterRequest,
        usdc: &str,
        token_messenger: &str,
        amount_units: u64,
    ) -> std::result::Result<(), CctpFailure> {
        tracing::info!(amount = %request.amount, "CCTP: approving USDC for TokenMessenger");
        let approve_tx = self
            .wallets
            .provider()
            .create_contract_execution(ContractExecutionParams {
                wallet_id: request.wallet_id.clone(),
                contract_address: usdc.to_string(),
                abi_function_signature: "approve(address,uint256)".to_string(),
                abi_parameters: vec![token_messenger.to_string(), amount_units.to_string()],
                fee_level: request.fee_level,
                idempotency_key: request
                    .idempotency_key
                    .as_ref()
                    .map(|k| format!("{k}:approve")),
            })
            .await
            .map_err(|e| CctpFailure::new(CctpState::Approving, format!("approval failed: {e}")))?;

        let observed = self
            .poll_transaction(&approve_tx.id, APPROVAL_TIMEOUT_SECS, false)
            .await
            .map_err(|e| CctpFailure::new(CctpState::Approving, e.to_string()))?;

        if observed.state == TransactionState::Failed {
            return Err(CctpFailure {
                state: CctpState::Approving,
                reason: "USDC approval failed on blockchain".into(),
                transaction_id: Some(approve_tx.id),
                tx_hash: observed.tx_hash,
            });
        }
        tracing::info!(tx = ?observed.tx_hash, "CCTP: approval confirmed");
        Ok(())
    }

    /// BURN: `depositForBurn` on the TokenMessenger. Returns (tx id, hash).
    #[allow(clippy::too_many_arguments)]
    async fn burn(
        &self,
        request: &AdapterRequest,
        token_messenger: &str,
        usdc: &str,
        amount_units: u64,
        dest_domain: u32,
        mint_recipient: &str,
        max_fee: u64,
        finality_threshold: u32,
    ) -> std::result::Result<(String, String), CctpFailure> {
        tracing::info!(dest_domain, "CCTP: burning USDC on source chain");
        let burn_tx = self
            .wallets
            .provider()
            .create_contract_execution(ContractExecutionParams {
                wallet_id: request.wallet_id.clone(),
                contract_address: token_messenger.to_string(),
                abi_function_signature:
                    "depositForBurn(uint256,uint32,bytes32,address,bytes32,uint256,uint32)"
                        .to_string(),
                abi_parameters: vec![
                    amount_units.to_string(),
                    dest_domain.to_string(),
                    mint_recipient.to_string(),
                    usdc.to_string(),
                    EMPTY_DESTINATION_CALLER.to_string(),
                    max_fee.to_string(),
                    finality_threshold.to_string(),
                ],
                fee_level: request.fee_level,
                idempotency_key: request
                    .idempotency_key
                    .as_ref()
                    .map(|k| format!("{k}:burn")),
            })
            .await
            .map_err(|e| CctpFailure::new(CctpState::Burning, format!("burn failed: {e}")))?;

        let observed = self
            .poll_transaction(&burn_tx.id, BURN_TIMEOUT_SECS, true)
            .await
            .map_err(|e| CctpFailure::new(CctpState::Burning, e.to_string()))?;

        if observed.state == TransactionState::Failed {
            return Err(CctpFailure {
                state: CctpState::Burning,
                reason: "Burn transaction reverted on blockchain (check gas/parameters)".into(),
                transaction_id: Some(burn_tx.id),
                tx_hash: observed.tx_hash,
            });
        }
        match observed.tx_hash {
            Some(hash) => {
                tracing::info!(%hash, "CCTP: burn confirmed");
                Ok((burn_tx.id, hash))
            }
            None => Err(CctpFailure {
                state: CctpState::Burning,
                reason: "Burn transaction did not confirm within 5 minutes".into(),
                transaction_id: Some(burn_tx.id),
                tx_hash: None,
            }),
        }
    }

    /// POLL ATTESTATION: wait for the attestation service to sign the burn.
    /// Returns (message, attestation) hex strings.
    async fn poll_attestation(
        &self,
        source: Network,
        source_domain: u32,
        burn_tx_hash: &str,
    ) -> std::result::Result<(String, String), CctpFailure> {
        let url = attestation_url(
            source,
            source_domain,
            burn_tx_hash,
            self.config.attestation_api_url.as_ref(),
        );
        tracing::info!(%url, "CCTP: polling for attestation");

        let max_attempts = (ATTESTATION_TIMEOUT_SECS / ATTESTATION_POLL_SECS).ceil() as u32;
        for attempt in 0..max_attempts {
            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    if let Ok(body) = response.json::<AttestationResponse>().await {
                        if let Some(complete) = body
                            .messages
                            .iter()
                            .find(|m| m.status == "complete")
                        {
                            if let (Some(message), Some(attestation)) =
                                (complete.message.clone(), complete.attestation.clone())
                            {
                                tracing::info!(attempt, "CCTP: attestation received");
                                return Ok((message, attestation));
                            }
                        }
                    }
                }
                Ok(response) => {
                    tracing::debug!(status = %response.status(), attempt, "attestation not ready");
                }
                Err(e) => {
                    tracing::debug!(attempt, "attestation poll failed: {e}");
                }
            }
            if attempt + 1 < max_attempts {
                tokio::time::sleep(Duration::from_secs_f64(ATTESTATION_POLL_SECS)).await;
            }
        }
        Err(CctpFailure::new(
            CctpState::PollingAttestation,
            "Attestation polling timed out after 20 minutes",
        ))
    }

    /// AGENT-SIDE MINT: `receiveMessage` on the destination
    /// MessageTransmitter via any LIVE wallet on that network.
    async fn mint(&self, message: &str, attestation: &str, dest: Network) -> MintOutcome {
        let Some(transmitter) = message_transmitter_v2(dest) else {
            return MintOutcome {
                success: false,
                tx_hash: None,
                executor_wallet: None,
                error: Some(format!("No MessageTransmitter configured for {dest}")),
            };
        };

        let executor = match self.executor_wallet(dest).await {
            Some(wallet) => wallet,
            None => {
                return MintOutcome {
                    success: false,
                    tx_hash: None,
                    executor_wallet: None,
                    error: Some(format!(
                        "No wallet found on {dest} to execute minting. Create a funded wallet on \
                         the destination network."
                    )),
                };
            }
        };
        tracing::info!(wallet = %executor, %dest, "CCTP: minting via executor wallet");

        let mint_tx = match self
            .wallets
            .provider()
            .create_contract_execution(ContractExecutionParams {
                wallet_id: executor.clone(),
                contract_address: transmitter.to_string(),
                abi_function_signature: "receiveMessage(bytes,bytes)".to_string(),
                abi_parameters: vec![message.to_string(), attestation.to_string()],
                fee_level: FeeLevel::Medium,
                idempotency_key: None,
            })
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                return MintOutcome {
                    success: false,
                    tx_hash: None,
                    executor_wallet: Some(executor),
                    error: Some(e.to_string()),
                };
            }
        };

        match self
            .poll_transaction(&mint_tx.id, MINT_TIMEOUT_SECS, true)
            .await
        {
            Ok(observed) if observed.state == TransactionState::Failed => MintOutcome {
                success: false,
                tx_hash: observed.tx_hash,
                executor_wallet: Some(executor),
                error: Some("Mint transaction failed on blockchain".into()),
            },
            Ok(observed) => match observed.tx_hash {
                Some(hash) => MintOutcome {
                    success: true,
                    tx_hash: Some(hash),
                    executor_wallet: Some(executor),
                    error: None,
                },
                None => MintOutcome {
                    success: false,
                    tx_hash: None,
                    executor_wallet: Some(executor),
                    error: Some("Mint transaction timed out (no hash generated)".into()),
                },
            },
            Err(e) => MintOutcome {
                success: false,
                tx_hash: None,
                executor_wallet: Some(executor),
                error: Some(e.to_string()),
            },
        }
    }

    /// Any LIVE wallet on `network`, selected per invocation.
    async fn executor_wallet(&self, network: Network) -> Option<String> {
        let wallets = self
            .wallets
            .list_wallets(None, Some(network))
            .await
            .unwrap_or_default();
        wallets
            .into_iter()
            .find(|w| w.state == WalletState::Live)
            .map(|w| w.id)
    }

    /// Run the full burn/attest/settle machine.
    async fn execute_cctp(&self, request: &AdapterRequest, dest: Network) -> PaymentResult {
        let source = request.source_network.unwrap_or(self.config.network);
        let recipient = Self::cross_chain_recipient(dest, &request.recipient);
        let fail = |failure: CctpFailure| {
            let mut result = PaymentResult::failure(
                recipient.clone(),
                request.amount,
                PaymentMethod::Crosschain,
                failure.reason.clone(),
            );
            result.transaction_id = failure.transaction_id.clone();
            result.blockchain_tx = failure.tx_hash.clone();
            result.metadata.insert(
                "cctp_last_state".into(),
                Value::String(failure.state.to_string()),
            );
            result
        };

        // Preconditions: both sides CCTP-capable, contracts known.
        if !is_cctp_supported(source) {
            return fail(CctpFailure::new(
                CctpState::Init,
                format!("Source network {source} not supported by CCTP"),
            ));
        }
        if !is_cctp_supported(dest) {
            return fail(CctpFailure::new(
                CctpState::Init,
                format!("Destination network {dest} not supported by CCTP"),
            ));
        }
        let (Some(token_messenger), Some(usdc)) = (token_messenger_v2(source), usdc_contract(source))
        else {
            return fail(CctpFailure::new(
                CctpState::Init,
                format!("CCTP V2 contracts not configured for {source}"),
            ));
        };
        let Some(amount_units) = to_usdc_units(request.amount) else {
            return fail(CctpFailure::new(CctpState::Init, "invalid amount"));
        };
        let source_domain = cctp_domain(source).expect("checked above");
        let dest_domain = cctp_domain(dest).expect("checked above");
        let mint_recipient = address_to_bytes32(&request.recipient);

        // Arc testnet: no Fast Transfer, no forwarding service.
        let (use_fast, finality_threshold, max_fee) = if source == Network::ArcTestnet {
            (false, STANDARD_TRANSFER_THRESHOLD, 0)
        } else if request.use_fast_transfer {
            (true, FAST_TRANSFER_THRESHOLD, DEFAULT_MAX_FEE)
        } else {
            (false, STANDARD_TRANSFER_THRESHOLD, DEFAULT_MAX_FEE)
        };
        let transfer_mode = if use_fast {
            "Fast Transfer (~2-5s)"
        } else {
            "Standard Transfer (~13-19m)"
        };

        // Gas pre-flight (Arc pays gas in USDC, skipped inside).
        if source != Network::ArcTestnet {
            if let Ok(native) = self.wallets.native_balance_amount(&request.wallet_id).await {
                if let Err(reason) = check_gas_requirements(source, native, "CCTP transfer") {
                    return fail(CctpFailure::new(CctpState::Init, reason));
                }
            }
        }

        if let Err(failure) = self
            .approve(request, usdc, token_messenger, amount_units)
            .await
        {
            return fail(failure);
        }

        let (burn_tx_id, burn_tx_hash) = match self
            .burn(
                request,
                token_messenger,
                usdc,
                amount_units,
                dest_domain,
                &mint_recipient,
                max_fee,
                finality_threshold,
            )
            .await
        {
            Ok(burn) => burn,
            Err(failure) => return fail(failure),
        };

        let (message, attestation) = match self
            .poll_attestation(source, source_domain, &burn_tx_hash)
            .await
        {
            Ok(signed) => signed,
            Err(mut failure) => {
                failure.transaction_id = Some(burn_tx_id.clone());
                failure.tx_hash = Some(burn_tx_hash.clone());
                return fail(failure);
            }
        };

        // SETTLE: relayer picks it up when it earns a fee, except on
        // networks where only a manual mint works.
        let is_relayed = max_fee > 0;
        let should_mint = !is_relayed || dest == Network::ArcTestnet;

        let (mint_outcome, note) = if should_mint {
            let outcome = self.mint(&message, &attestation, dest).await;
            let note = if outcome.success {
                format!(
                    "Transfer completed via agent-side mint. Tx: {}",
                    outcome.tx_hash.as_deref().unwrap_or("unknown")
                )
            } else {
                format!(
                    "Agent-side mint failed: {}. Check destination wallet gas.",
                    outcome.error.as_deref().unwrap_or("unknown")
                )
            };
            (Some(outcome), note)
        } else {
            tracing::info!(max_fee, "CCTP: attestation secured, relayer will mint");
            (
                None,
                "Transfer handed off to the CCTP relayer for final minting".to_string(),
            )
        };

        let manual_mint_required =
            !is_relayed && !mint_outcome.as_ref().is_some_and(|m| m.success);
        let mint_tx_hash = mint_outcome.as_ref().and_then(|m| m.tx_hash.clone());

        let mut metadata = Map::new();
        metadata.insert("cctp_version".into(), Value::String("v2".into()));
        metadata.insert(
            "cctp_flow".into(),
            Value::String(
                if should_mint {
                    "burn_attestation_mint"
                } else {
                    "burn_attestation_relay"
                }
                .into(),
            ),
        );
        metadata.insert("transfer_mode".into(), Value::String(transfer_mode.into()));
        metadata.insert("source_domain".into(), Value::from(source_domain));
        metadata.insert("destination_domain".into(), Value::from(dest_domain));
        metadata.insert("burn_tx_id".into(), Value::String(burn_tx_id.clone()));
        metadata.insert("burn_tx_hash".into(), Value::String(burn_tx_hash.clone()));
        metadata.insert(
            "mint_tx_hash".into(),
            mint_tx_hash.clone().map(Value::String).unwrap_or(Value::Null),
        );
        if let Some(outcome) = &mint_outcome {
            metadata.insert(
                "mint_executor_wallet".into(),
                outcome
                    .executor_wallet
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            );
        }
        metadata.insert("attestation_message".into(), Value::String(message));
        metadata.insert("attestation_signature".into(), Value::String(attestation));
        metadata.insert("source_network".into(), Value::String(source.to_string()));
        metadata.insert("destination_network".into(), Value::String(dest.to_string()));
        metadata.insert(
            "destination_address".into(),
            Value::String(request.recipient.clone()),
        );
        metadata.insert(
            "max_fee_usdc".into(),
            Value::String((Decimal::from(max_fee) / Decimal::from(1_000_000u64)).to_string()),
        );
        metadata.insert(
            "min_finality_threshold".into(),
            Value::from(finality_threshold),
        );
        metadata.insert(
            "manual_mint_required".into(),
            Value::Bool(manual_mint_required),
        );
        metadata.insert("note".into(), Value::String(note));

        // Sender perspective: funds are burned, so the payment is complete
        // even when the mint is still in flight.
        PaymentResult {
            success: true,
            transaction_id: Some(burn_tx_id),
            blockchain_tx: Some(burn_tx_hash),
            amount: request.amount,
            recipient,
            method: PaymentMethod::Crosschain,
            status: PaymentStatus::Completed,
            error: None,
            guards_passed: Vec::new(),
            metadata,
            resource_data: None,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for GatewayAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Crosschain
    }

    fn priority(&self) -> u8 {
        Self::PRIORITY
    }

    fn supports(
        &self,
        recipient: &str,
        source_network: Option<Network>,
        destination_chain: Option<Network>,
    ) -> bool {
        if destination_chain.is_some() {
            return true;
        }
        // Ambiguous cross-chain: an EVM source paying a Solana-shaped
        // address can only mean a bridge.
        source_network.is_some_and(|source| source.is_evm() && is_solana_address(recipient))
    }

    async fn execute(&self, request: AdapterRequest) -> Result<PaymentResult> {
        let Some(dest) = request.destination_chain else {
            return Ok(PaymentResult::failure(
                request.recipient.clone(),
                request.amount,
                self.method(),
                "destination_chain parameter is required",
            ));
        };
        let source = request.source_network.unwrap_or(self.config.network);

        if source == dest {
            return Ok(self.execute_same_chain(&request, dest).await);
        }
        Ok(self.execute_cctp(&request, dest).await)
    }

    async fn simulate(&self, request: &AdapterRequest) -> AdapterSimulation {
        let Some(dest) = request.destination_chain else {
            return AdapterSimulation::fail("destination_chain parameter required");
        };
        let source = request.source_network.unwrap_or(self.config.network);

        let mut simulation = AdapterSimulation::ok();
        simulation
            .details
            .insert("source_network".into(), Value::String(source.to_string()));
        simulation
            .details
            .insert("destination_network".into(), Value::String(dest.to_string()));

        if source == dest {
            simulation
                .details
                .insert("is_same_chain".into(), Value::Bool(true));
            match self.wallets.usdc_balance_amount(&request.wallet_id).await {
                Ok(balance) if balance >= request.amount => simulation,
                Ok(balance) => {
                    AdapterSimulation::fail(format!(
                        "Insufficient balance: {balance} < {}",
                        request.amount
                    ))
                }
                Err(e) => AdapterSimulation::fail(format!("Balance check failed: {e}")),
            }
        } else {
            simulation
                .details
                .insert("is_same_chain".into(), Value::Bool(false));
            if is_cctp_supported(source) && is_cctp_supported(dest) {
                simulation.details.insert(
                    "estimated_time".into(),
                    Value::String("~2-5 seconds (Fast Transfer)".into()),
                );
                simulation
            } else {
                AdapterSimulation::fail(format!("CCTP not supported for {source} -> {dest}"))
            }
        }
    }
}
