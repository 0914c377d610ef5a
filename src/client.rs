//! The payment facade.
//!
//! [`AgentPay`] wires together storage, the wallet provider, the guard
//! manager, the router with its three adapters, the intent service, the
//! trust gate, and the ledger. A single [`AgentPay::pay`] call runs the full
//! control flow: ledger entry -> trust gate -> guard reservations ->
//! available-balance check -> routing -> commit/release -> ledger update.

use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::batch;
use crate::config::{Config, TrustPreset};
use crate::error::{Error, Result};
use crate::guards::{ConfirmCallback, GuardConfig, GuardManager, GuardScope, PaymentContext};
use crate::intents::PaymentIntentService;
use crate::ledger::{Ledger, LedgerEntry, LedgerEntryStatus};
use crate::network::Network;
use crate::protocols::{GatewayAdapter, TransferAdapter, X402Adapter};
use crate::provider::{HttpWalletProvider, WalletProvider};
use crate::resilience::CircuitBreaker;
use crate::router::{AdapterRequest, PaymentRouter};
use crate::storage::{StorageBackend, storage_from_config};
use crate::trust::{TrustGate, TrustPolicy, TrustVerdict};
use crate::types::{
    AccountType, Balance, BatchPaymentResult, FeeLevel, PaymentIntent, PaymentIntentStatus,
    PaymentMethod, PaymentRequest, PaymentResult, PaymentStatus, SimulationResult,
    TransactionInfo, WalletInfo, WalletSetInfo,
};
use crate::wallet::WalletService;
use crate::webhooks::WebhookParser;

/// Options for [`AgentPay::pay`] and [`AgentPay::simulate`].
#[derive(Debug, Clone)]
pub struct PayOptions {
    pub destination_chain: Option<Network>,
    pub wallet_set_id: Option<String>,
    pub purpose: Option<String>,
    pub idempotency_key: Option<String>,
    pub fee_level: FeeLevel,
    pub metadata: Map<String, Value>,
    pub wait_for_completion: bool,
    pub timeout_seconds: Option<f64>,
    /// CCTP Fast Transfer vs Standard.
    pub use_fast_transfer: bool,
    /// Skip the guard chain entirely. Dangerous.
    pub skip_guards: bool,
}

impl Default for PayOptions {
    fn default() -> Self {
        PayOptions {
            destination_chain: None,
            wallet_set_id: None,
            purpose: None,
            idempotency_key: None,
            fee_level: FeeLevel::Medium,
            metadata: Map::new(),
            wait_for_completion: false,
            timeout_seconds: None,
            use_fast_transfer: true,
            skip_guards: false,
        }
    }
}

/// Options for [`AgentPay::create_payment_intent`].
#[derive(Debug, Clone, Default)]
pub struct IntentOptions {
    pub purpose: Option<String>,
    pub idempotency_key: Option<String>,
    pub destination_chain: Option<Network>,
    pub wallet_set_id: Option<String>,
    /// Intent lifetime in seconds; default one hour.
    pub expires_in_secs: Option<i64>,
}

/// Main orchestrator client. Multi-tenant: serves many wallets with
/// per-wallet and per-set guards.
pub struct AgentPay {
    config: Config,
    storage: Arc<dyn StorageBackend>,
    ledger: Ledger,
    guard_manager: GuardManager,
    wallets: Arc<WalletService>,
    router: PaymentRouter,
    intents: PaymentIntentService,
    trust: Option<TrustGate>,
    webhooks: WebhookParser,
}

impl AgentPay {
    /// Build a client with the configured storage backend and the HTTP
    /// wallet provider.
    pub fn new(config: Config) -> Result<Self> {
        let provider: Arc<dyn WalletProvider> = Arc::new(HttpWalletProvider::new(&config)?);
        let storage = storage_from_config(&config)?;
        Self::with_components(config, provider, storage)
    }

    /// Build a client over explicit provider and storage implementations.
    pub fn with_components(
        config: Config,
        provider: Arc<dyn WalletProvider>,
        storage: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        tracing::info!(
            network = %config.network,
            api_key = %config.masked_api_key(),
            "initializing payment orchestrator"
        );

        let wallets = Arc::new(WalletService::new(config.clone(), provider));
        let mut router = PaymentRouter::new(wallets.clone());
        router.register_adapter(Arc::new(TransferAdapter::new(wallets.clone())));
        router.register_adapter(Arc::new(X402Adapter::new(config.clone(), wallets.clone())));
        router.register_adapter(Arc::new(GatewayAdapter::new(config.clone(), wallets.clone())));

        // The trust gate only engages when RPC endpoints are configured.
        let trust = if config.rpc_urls.is_empty() {
            None
        } else {
            let default_policy = match config.trust_default_policy {
                TrustPreset::Permissive => TrustPolicy::permissive(),
                TrustPreset::Standard => TrustPolicy::standard(),
                TrustPreset::Strict => TrustPolicy::strict(),
            };
            let breaker = CircuitBreaker::new("trust_rpc", storage.clone(), 5, 30);
            Some(TrustGate::new(
                storage.clone(),
                config.rpc_urls.clone(),
                config.http_timeout,
                Some(config.network),
                default_policy,
                Some(breaker),
            ))
        };

        Ok(AgentPay {
            ledger: Ledger::new(storage.clone()),
            guard_manager: GuardManager::new(storage.clone()),
            intents: PaymentIntentService::new(storage.clone()),
            webhooks: WebhookParser::new(None),
            wallets,
            router,
            trust,
            storage,
            config,
        })
    }

    // ---- accessors -------------------------------------------------------

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn wallets(&self) -> &WalletService {
        &self.wallets
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn guards(&self) -> &GuardManager {
        &self.guard_manager
    }

    pub fn intents(&self) -> &PaymentIntentService {
        &self.intents
    }

    pub fn trust(&self) -> Option<&TrustGate> {
        self.trust.as_ref()
    }

    pub fn webhooks(&self) -> &WebhookParser {
        &self.webhooks
    }

    /// Replace the webhook parser, e.g. to install a verification key.
    pub fn set_webhook_parser(&mut self, parser: WebhookParser) {
        self.webhooks = parser;
    }

    /// Install the operator callback consulted by confirm guards.
    pub fn set_confirm_callback(&mut self, callback: ConfirmCallback) {
        self.guard_manager.set_confirm_callback(callback);
    }

    // ---- wallet passthroughs --------------------------------------------

    pub async fn get_balance(&self, wallet_id: &str) -> Result<Decimal> {
        self.wallets.usdc_balance_amount(wallet_id).await
    }

    pub async fn get_balances(&self, wallet_id: &str) -> Result<Vec<Balance>> {
        self.wallets.get_balances(wallet_id).await
    }

    pub async fn get_wallet(&self, wallet_id: &str) -> Result<WalletInfo> {
        self.wallets.get_wallet(wallet_id).await
    }

    pub async fn list_wallets(&self, wallet_set_id: Option<&str>) -> Result<Vec<WalletInfo>> {
        self.wallets.list_wallets(wallet_set_id, None).await
    }

    pub async fn create_wallet_set(&self, name: &str) -> Result<WalletSetInfo> {
        self.wallets.create_wallet_set(name).await
    }

    /// Create a wallet, creating a fresh wallet set when none is given.
    pub async fn create_wallet(
        &self,
        wallet_set_id: Option<&str>,
        blockchain: Option<Network>,
        account_type: AccountType,
    ) -> Result<WalletInfo> {
        let set_id = match wallet_set_id {
            Some(id) => id.to_string(),
            None => {
                let name = format!("set-{}", &Uuid::new_v4().simple().to_string()[..8]);
                self.wallets.create_wallet_set(&name).await?.id
            }
        };
        self.wallets
            .create_wallet(&set_id, blockchain, account_type)
            .await
    }

    pub async fn list_transactions(
        &self,
        wallet_id: Option<&str>,
        blockchain: Option<Network>,
    ) -> Result<Vec<TransactionInfo>> {
        self.wallets.list_transactions(wallet_id, blockchain).await
    }

    // ---- core payment flow ----------------------------------------------

    /// Execute a payment with automatic routing and guard checks.
    ///
    /// Guard refusals and adapter failures come back as a failed
    /// [`PaymentResult`]; infrastructure breakage propagates as an error
    /// after reservations are released and the ledger entry is marked
    /// FAILED.
    pub async fn pay(
        &self,
        wallet_id: &str,
        recipient: &str,
        amount: Decimal,
        options: PayOptions,
    ) -> Result<PaymentResult> {
        if wallet_id.is_empty() {
            return Err(Error::Validation("wallet_id is required".into()));
        }
        if amount <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "Payment amount must be positive. Got: {amount}"
            )));
        }

        let idempotency_key = options
            .idempotency_key
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut metadata = options.metadata.clone();
        metadata.insert(
            "idempotency_key".into(),
            Value::String(idempotency_key.clone()),
        );

        // (i) Ledger entry, PENDING.
        let entry = LedgerEntry::new(wallet_id, recipient, amount)
            .with_purpose(options.purpose.clone())
            .with_wallet_set(options.wallet_set_id.clone())
            .with_metadata(metadata.clone());
        self.ledger.record(&entry).await?;

        // Trust gate, for address-shaped recipients. URL recipients carry
        // no on-chain identity to evaluate.
        if let Some(gate) = &self.trust {
            if !recipient.starts_with("http://") && !recipient.starts_with("https://") {
                let verdict = gate
                    .evaluate(recipient, amount, Some(wallet_id), None, None)
                    .await;
                if verdict.verdict != TrustVerdict::Approved {
                    self.ledger
                        .update_status(&entry.id, LedgerEntryStatus::Blocked, None, None)
                        .await?;
                    let mut result = PaymentResult::failure(
                        recipient,
                        amount,
                        PaymentMethod::Transfer,
                        format!(
                            "Blocked by trust gate: {}",
                            verdict.block_reason.as_deref().unwrap_or("refused")
                        ),
                    );
                    result.status = PaymentStatus::Blocked;
                    result.metadata.insert(
                        "trust_verdict".into(),
                        serde_json::to_value(verdict.verdict)?,
                    );
                    if let Some(reason) = verdict.block_reason {
                        result
                            .metadata
                            .insert("trust_reason".into(), Value::String(reason));
                    }
                    return Ok(result);
                }
            }
        }

        let context = PaymentContext {
            wallet_id: wallet_id.to_string(),
            wallet_set_id: options.wallet_set_id.clone(),
            recipient: recipient.to_string(),
            amount,
            purpose: options.purpose.clone(),
            metadata,
        };

        // (ii) Guard chain reserves quotas atomically.
        let (chain, tokens, guards_passed) = if options.skip_guards {
            (None, Vec::new(), Vec::new())
        } else {
            let chain = self
                .guard_manager
                .get_guard_chain(wallet_id, options.wallet_set_id.as_deref())
                .await?;
            match chain.reserve(&context).await {
                Ok(tokens) => {
                    let names = chain.names();
                    (Some(chain), tokens, names)
                }
                Err(Error::Guard { guard, reason }) => {
                    self.ledger
                        .update_status(&entry.id, LedgerEntryStatus::Blocked, None, None)
                        .await?;
                    let mut result = PaymentResult::failure(
                        recipient,
                        amount,
                        PaymentMethod::Transfer,
                        format!("Blocked by guard: [{guard}] {reason}"),
                    );
                    result.status = PaymentStatus::Blocked;
                    result
                        .metadata
                        .insert("guard_reason".into(), Value::String(reason));
                    return Ok(result);
                }
                Err(e) => {
                    self.ledger
                        .update_status(&entry.id, LedgerEntryStatus::Failed, None, None)
                        .await?;
                    return Err(e);
                }
            }
        };

        // Available balance: provider balance minus intent reservations.
        let reserved = match self.intents.reserved_total(wallet_id).await {
            Ok(reserved) => reserved,
            Err(e) => {
                self.abort_payment(chain.as_ref(), &tokens, &entry.id).await;
                return Err(e);
            }
        };
        if reserved > Decimal::ZERO {
            let balance = match self.wallets.usdc_balance_amount(wallet_id).await {
                Ok(balance) => balance,
                Err(e) => {
                    self.abort_payment(chain.as_ref(), &tokens, &entry.id).await;
                    return Err(e);
                }
            };
            if amount > balance - reserved {
                self.abort_payment(chain.as_ref(), &tokens, &entry.id).await;
                return Err(Error::InsufficientBalance {
                    current: (balance - reserved).max(Decimal::ZERO),
                    required: amount,
                    wallet_id: Some(wallet_id.to_string()),
                });
            }
        }

        // (iii)+(iv) Route and execute.
        let mut request = AdapterRequest::new(wallet_id, recipient, amount);
        request.fee_level = options.fee_level;
        request.idempotency_key = Some(idempotency_key);
        request.purpose = options.purpose.clone();
        request.destination_chain = options.destination_chain;
        request.wait_for_completion = options.wait_for_completion;
        request.timeout_seconds = options.timeout_seconds;
        request.use_fast_transfer = options.use_fast_transfer;

        let mut result = match self.router.pay(request).await {
            Ok(result) => result,
            Err(e) => {
                self.abort_payment(chain.as_ref(), &tokens, &entry.id).await;
                return Err(e);
            }
        };
        result.guards_passed = guards_passed;

        // (v) Settle the two-phase state.
        if result.success {
            let ledger_status = if result.status == PaymentStatus::Completed {
                LedgerEntryStatus::Completed
            } else {
                LedgerEntryStatus::Pending
            };
            let mut updates = Map::new();
            if let Some(tx_id) = &result.transaction_id {
                updates.insert("transaction_id".into(), Value::String(tx_id.clone()));
            }
            self.ledger
                .update_status(
                    &entry.id,
                    ledger_status,
                    result.blockchain_tx.as_deref(),
                    Some(updates),
                )
                .await?;
            if let Some(chain) = &chain {
                chain.commit(&tokens).await;
            }
        } else {
            self.ledger
                .update_status(&entry.id, LedgerEntryStatus::Failed, None, None)
                .await?;
            if let Some(chain) = &chain {
                chain.release(&tokens).await;
            }
        }

        Ok(result)
    }

    /// Exception path: release guard reservations and mark the ledger entry
    /// FAILED before the error propagates.
    async fn abort_payment(
        &self,
        chain: Option<&crate::guards::GuardChain>,
        tokens: &[(String, Option<String>)],
        entry_id: &str,
    ) {
        if let Some(chain) = chain {
            chain.release(tokens).await;
        }
        self.ledger
            .update_status(entry_id, LedgerEntryStatus::Failed, None, None)
            .await
            .ok();
    }

    /// Simulate a payment: guard pre-check plus the adapter's own
    /// simulation. Never mutates state and never raises for business
    /// failures.
    pub async fn simulate(
        &self,
        wallet_id: &str,
        recipient: &str,
        amount: Decimal,
        options: PayOptions,
    ) -> Result<SimulationResult> {
        if wallet_id.is_empty() {
            return Ok(SimulationResult {
                would_succeed: false,
                route: PaymentMethod::Transfer,
                estimated_fee: None,
                reason: Some("wallet_id is required".into()),
            });
        }

        let context = PaymentContext {
            wallet_id: wallet_id.to_string(),
            wallet_set_id: options.wallet_set_id.clone(),
            recipient: recipient.to_string(),
            amount,
            purpose: Some("Simulation".into()),
            metadata: Map::new(),
        };
        let (allowed, reason, _) = self.guard_manager.check(&context).await?;
        if !allowed {
            return Ok(SimulationResult {
                would_succeed: false,
                route: PaymentMethod::Transfer,
                estimated_fee: None,
                reason: Some(format!(
                    "Would be blocked by guard: {}",
                    reason.unwrap_or_else(|| "refused".into())
                )),
            });
        }

        let mut request = AdapterRequest::new(wallet_id, recipient, amount);
        request.destination_chain = options.destination_chain;
        request.use_fast_transfer = options.use_fast_transfer;
        self.router.simulate(request).await
    }

    /// Whether any adapter can carry a payment to `recipient`.
    pub fn can_pay(&self, recipient: &str) -> bool {
        self.router.can_handle(recipient)
    }

    /// Which payment method a recipient would route to.
    pub fn detect_method(&self, recipient: &str) -> Option<PaymentMethod> {
        self.router.detect_method(recipient, None, None)
    }

    // ---- payment intents -------------------------------------------------

    /// Authorize: simulate, then reserve funds and persist the intent.
    pub async fn create_payment_intent(
        &self,
        wallet_id: &str,
        recipient: &str,
        amount: Decimal,
        options: IntentOptions,
    ) -> Result<PaymentIntent> {
        let simulation = self
            .simulate(
                wallet_id,
                recipient,
                amount,
                PayOptions {
                    destination_chain: options.destination_chain,
                    wallet_set_id: options.wallet_set_id.clone(),
                    ..Default::default()
                },
            )
            .await?;
        if !simulation.would_succeed {
            return Err(Error::Payment(format!(
                "Authorization failed: {}",
                simulation.reason.unwrap_or_else(|| "unknown".into())
            )));
        }

        let balance = self.wallets.usdc_balance_amount(wallet_id).await?;

        let mut metadata = Map::new();
        metadata.insert(
            "simulated_route".into(),
            Value::String(simulation.route.to_string()),
        );
        if let Some(key) = &options.idempotency_key {
            metadata.insert("idempotency_key".into(), Value::String(key.clone()));
        }
        if let Some(dest) = options.destination_chain {
            metadata.insert(
                "destination_chain".into(),
                Value::String(dest.to_string()),
            );
        }
        if let Some(set_id) = &options.wallet_set_id {
            metadata.insert("wallet_set_id".into(), Value::String(set_id.clone()));
        }

        self.intents
            .create(
                wallet_id,
                recipient,
                amount,
                balance,
                options.purpose.clone(),
                options.expires_in_secs,
                metadata,
            )
            .await
    }

    /// Capture: confirm an intent and execute the payment.
    pub async fn confirm_payment_intent(&self, intent_id: &str) -> Result<PaymentResult> {
        // Validates status and expiry, releases the fund reservation, and
        // moves the intent to PROCESSING.
        let intent = self.intents.begin_confirmation(intent_id).await?;

        let options = PayOptions {
            purpose: intent.purpose.clone(),
            idempotency_key: intent
                .metadata
                .get("idempotency_key")
                .and_then(Value::as_str)
                .map(str::to_owned),
            destination_chain: intent
                .metadata
                .get("destination_chain")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok()),
            wallet_set_id: intent
                .metadata
                .get("wallet_set_id")
                .and_then(Value::as_str)
                .map(str::to_owned),
            ..Default::default()
        };

        match self
            .pay(&intent.wallet_id, &intent.recipient, intent.amount, options)
            .await
        {
            Ok(result) => {
                let status = if result.success {
                    PaymentIntentStatus::Succeeded
                } else {
                    PaymentIntentStatus::Failed
                };
                self.intents.update_status(intent_id, status, None).await?;
                Ok(result)
            }
            Err(e) => {
                self.intents
                    .update_status(intent_id, PaymentIntentStatus::Failed, None)
                    .await?;
                Err(e)
            }
        }
    }

    pub async fn get_payment_intent(&self, intent_id: &str) -> Result<Option<PaymentIntent>> {
        self.intents.get(intent_id).await
    }

    /// Void an unconfirmed intent and release its reservation.
    pub async fn cancel_payment_intent(
        &self,
        intent_id: &str,
        reason: Option<String>,
    ) -> Result<PaymentIntent> {
        self.intents.cancel(intent_id, reason).await
    }

    // ---- batch -----------------------------------------------------------

    /// Execute multiple payments with bounded concurrency.
    pub async fn batch_pay(
        &self,
        requests: Vec<PaymentRequest>,
        concurrency: usize,
    ) -> BatchPaymentResult {
        batch::process(self, requests, concurrency).await
    }

    // ---- ledger sync -----------------------------------------------------

    /// Re-sync a ledger entry against the provider's transaction state.
    pub async fn sync_transaction(&self, entry_id: &str) -> Result<LedgerEntry> {
        let entry = self
            .ledger
            .get(entry_id)
            .await?
            .ok_or_else(|| Error::Validation(format!("Ledger entry not found: {entry_id}")))?;

        let tx_id = entry
            .metadata
            .get("transaction_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Validation("Ledger entry has no transaction ID to sync".into())
            })?;

        let tx = self
            .wallets
            .provider()
            .get_transaction(tx_id)
            .await
            .map_err(|e| Error::Payment(format!("Failed to fetch transaction: {e}")))?;

        let new_status = match tx.state {
            crate::types::TransactionState::Complete => LedgerEntryStatus::Completed,
            crate::types::TransactionState::Failed => LedgerEntryStatus::Failed,
            crate::types::TransactionState::Cancelled => LedgerEntryStatus::Cancelled,
            _ => entry.status,
        };

        let mut updates = Map::new();
        updates.insert(
            "last_synced".into(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        updates.insert("provider_state".into(), Value::String(tx.state.to_string()));
        self.ledger
            .update_status(entry_id, new_status, tx.tx_hash.as_deref(), Some(updates))
            .await?;

        self.ledger
            .get(entry_id)
            .await?
            .ok_or_else(|| Error::Storage("ledger entry vanished during sync".into()))
    }

    // ---- guard helpers ---------------------------------------------------

    /// Register a guard on a wallet.
    pub async fn add_guard(&self, wallet_id: &str, config: GuardConfig) -> Result<()> {
        self.guard_manager
            .add_guard(GuardScope::Wallet(wallet_id), config)
            .await
    }

    /// Register a guard on a wallet set (applies to all wallets in it).
    pub async fn add_guard_for_set(&self, wallet_set_id: &str, config: GuardConfig) -> Result<()> {
        self.guard_manager
            .add_guard(GuardScope::WalletSet(wallet_set_id), config)
            .await
    }

    pub async fn remove_guard(&self, wallet_id: &str, guard_name: &str) -> Result<bool> {
        self.guard_manager
            .remove_guard(GuardScope::Wallet(wallet_id), guard_name)
            .await
    }

    pub async fn list_guards(&self, wallet_id: &str) -> Result<Vec<String>> {
        self.guard_manager
            .list_guard_names(GuardScope::Wallet(wallet_id))
            .await
    }

    pub async fn list_guards_for_set(&self, wallet_set_id: &str) -> Result<Vec<String>> {
        self.guard_manager
            .list_guard_names(GuardScope::WalletSet(wallet_set_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards::RecipientMode;
    use crate::ledger::LedgerQuery;
    use crate::storage::InMemoryStorage;
    use crate::testing::MockWalletProvider;
    use std::str::FromStr;

    const RECIPIENT: &str = "0x742d35cc6634c0532925a3b844bc9e7595f25e4a";

    fn client_with(provider: Arc<MockWalletProvider>) -> AgentPay {
        let mut config = Config::new("key", "secret", Network::EthSepolia).unwrap();
        config.transaction_poll_interval = 0.01;
        AgentPay::with_components(config, provider, Arc::new(InMemoryStorage::new())).unwrap()
    }

    fn funded_client(balance: u32) -> (AgentPay, Arc<MockWalletProvider>) {
        let provider = Arc::new(MockWalletProvider::new());
        provider.add_wallet("w-1", Network::EthSepolia, "0xagent");
        provider.set_usdc_balance("w-1", Decimal::from(balance));
        (client_with(provider.clone()), provider)
    }

    #[tokio::test]
    async fn same_chain_transfer_happy_path() {
        let (client, provider) = funded_client(100);

        let result = client
            .pay(
                "w-1",
                RECIPIENT,
                Decimal::ONE,
                PayOptions {
                    wait_for_completion: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.method, PaymentMethod::Transfer);
        assert_eq!(result.status, PaymentStatus::Completed);
        assert_eq!(provider.transfer_count(), 1);

        // Exactly one ledger entry, COMPLETED.
        let entries = client
            .ledger()
            .query(&LedgerQuery::for_wallet("w-1"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, LedgerEntryStatus::Completed);
        assert!(entries[0].tx_hash.is_some());
    }

    #[tokio::test]
    async fn guard_blocked_payment_reaches_no_provider() {
        let (client, provider) = funded_client(100);
        client
            .add_guard(
                "w-1",
                GuardConfig::single_tx("single_tx", Decimal::from(5), None),
            )
            .await
            .unwrap();

        let result = client
            .pay("w-1", RECIPIENT, Decimal::from(10), PayOptions::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.status, PaymentStatus::Blocked);
        assert!(result.error.as_deref().unwrap().contains("max"));
        assert_eq!(provider.transfer_count(), 0);

        let entries = client
            .ledger()
            .query(&LedgerQuery::for_wallet("w-1"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, LedgerEntryStatus::Blocked);
    }

    #[tokio::test]
    async fn budget_concurrency_no_double_spend() {
        let (client, _provider) = funded_client(1000);
        client
            .add_guard(
                "w-1",
                GuardConfig::budget("budget", None, Some(Decimal::from(100)), None),
            )
            .await
            .unwrap();

        let client = Arc::new(client);
        let a = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .pay("w-1", RECIPIENT, Decimal::from(60), PayOptions::default())
                    .await
                    .unwrap()
            })
        };
        let b = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .pay("w-1", RECIPIENT, Decimal::from(60), PayOptions::default())
                    .await
                    .unwrap()
            })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.success).count();
        assert!(wins <= 1, "two 60s cannot both fit a 100 daily budget");
    }

    #[tokio::test]
    async fn failed_payment_releases_guard_budget() {
        let (client, provider) = funded_client(100);
        client
            .add_guard(
                "w-1",
                GuardConfig::budget("budget", None, Some(Decimal::from(60)), None),
            )
            .await
            .unwrap();

        provider.fail_transfers(true);
        let result = client
            .pay(
                "w-1",
                RECIPIENT,
                Decimal::from(50),
                PayOptions {
                    wait_for_completion: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!result.success);

        // The failed payment's reservation was released, so the full 60
        // budget is available again.
        provider.fail_transfers(false);
        let retry = client
            .pay(
                "w-1",
                RECIPIENT,
                Decimal::from(50),
                PayOptions {
                    wait_for_completion: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(retry.success, "error: {:?}", retry.error);
    }

    #[tokio::test]
    async fn intent_reservation_prevents_double_spend() {
        let (client, _provider) = funded_client(100);

        // Authorize 80 of the 100 balance.
        let intent = client
            .create_payment_intent(
                "w-1",
                RECIPIENT,
                Decimal::from(80),
                IntentOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(intent.status, PaymentIntentStatus::RequiresConfirmation);

        // Direct pay of 30 no longer fits: available is 20.
        let err = client
            .pay("w-1", RECIPIENT, Decimal::from(30), PayOptions::default())
            .await
            .unwrap_err();
        match err {
            Error::InsufficientBalance { current, required, .. } => {
                assert_eq!(current, Decimal::from(20));
                assert_eq!(required, Decimal::from(30));
            }
            other => panic!("expected InsufficientBalance, got {other}"),
        }

        // Cancel the intent; the same pay now succeeds.
        client
            .cancel_payment_intent(&intent.id, Some("not needed".into()))
            .await
            .unwrap();
        let result = client
            .pay(
                "w-1",
                RECIPIENT,
                Decimal::from(30),
                PayOptions {
                    wait_for_completion: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn confirm_intent_executes_and_succeeds() {
        let (client, provider) = funded_client(100);
        let intent = client
            .create_payment_intent(
                "w-1",
                RECIPIENT,
                Decimal::from(10),
                IntentOptions {
                    purpose: Some("subscription".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = client.confirm_payment_intent(&intent.id).await.unwrap();
        assert!(result.success);
        assert_eq!(provider.transfer_count(), 1);

        let confirmed = client
            .get_payment_intent(&intent.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(confirmed.status, PaymentIntentStatus::Succeeded);
        // Reservation fully released.
        assert_eq!(
            client.intents().reserved_total("w-1").await.unwrap(),
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn simulate_reports_guard_refusals_without_mutating() {
        let (client, provider) = funded_client(100);
        client
            .add_guard(
                "w-1",
                GuardConfig::recipient(
                    "recipient",
                    RecipientMode::Whitelist,
                    vec![RECIPIENT.into()],
                    vec![],
                    vec![],
                ),
            )
            .await
            .unwrap();

        let ok = client
            .simulate("w-1", RECIPIENT, Decimal::ONE, PayOptions::default())
            .await
            .unwrap();
        assert!(ok.would_succeed);

        let blocked = client
            .simulate(
                "w-1",
                "0x9999000000000000000000000000000000000009",
                Decimal::ONE,
                PayOptions::default(),
            )
            .await
            .unwrap();
        assert!(!blocked.would_succeed);
        assert!(blocked.reason.unwrap().contains("whitelist"));
        assert_eq!(provider.transfer_count(), 0);
        // Simulation recorded nothing in the ledger.
        let entries = client
            .ledger()
            .query(&LedgerQuery::for_wallet("w-1"))
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn batch_pay_runs_guards_per_item() {
        let (client, _provider) = funded_client(1000);
        client
            .add_guard(
                "w-1",
                GuardConfig::single_tx("single_tx", Decimal::from(5), None),
            )
            .await
            .unwrap();

        let requests = vec![
            PaymentRequest {
                wallet_id: "w-1".into(),
                recipient: RECIPIENT.into(),
                amount: Decimal::from(3),
                purpose: None,
                idempotency_key: None,
                destination_chain: None,
                wallet_set_id: None,
                metadata: Map::new(),
            },
            PaymentRequest {
                wallet_id: "w-1".into(),
                recipient: RECIPIENT.into(),
                amount: Decimal::from(10),
                purpose: None,
                idempotency_key: None,
                destination_chain: None,
                wallet_set_id: None,
                metadata: Map::new(),
            },
        ];

        let batch = client.batch_pay(requests, 2).await;
        assert_eq!(batch.total_count, 2);
        assert_eq!(batch.success_count, 1);
        assert_eq!(batch.failed_count, 1);
        // Order preserved: the over-limit item is the second.
        assert!(batch.results[0].success);
        assert!(!batch.results[1].success);
    }

    #[tokio::test]
    async fn rejects_invalid_inputs() {
        let (client, _provider) = funded_client(100);
        assert!(matches!(
            client
                .pay("", RECIPIENT, Decimal::ONE, PayOptions::default())
                .await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            client
                .pay("w-1", RECIPIENT, Decimal::ZERO, PayOptions::default())
                .await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn detect_method_and_can_pay() {
        let (client, _provider) = funded_client(100);
        assert_eq!(
            client.detect_method("https://api.example.com"),
            Some(PaymentMethod::X402)
        );
        assert_eq!(client.detect_method(RECIPIENT), Some(PaymentMethod::Transfer));
        assert!(client.can_pay(RECIPIENT));
        assert!(!client.can_pay("definitely not payable"));
    }

    #[tokio::test]
    async fn set_scoped_guards_apply_to_wallet() {
        let (client, _provider) = funded_client(100);
        client
            .add_guard_for_set(
                "ws-1",
                GuardConfig::single_tx("set_cap", Decimal::from(5), None),
            )
            .await
            .unwrap();

        let result = client
            .pay(
                "w-1",
                RECIPIENT,
                Decimal::from(10),
                PayOptions {
                    wallet_set_id: Some("ws-1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.status, PaymentStatus::Blocked);
        assert_eq!(
            client.list_guards_for_set("ws-1").await.unwrap(),
            vec!["set_cap".to_string()]
        );
    }

    #[tokio::test]
    async fn sync_transaction_updates_ledger() {
        let (client, _provider) = funded_client(100);
        let result = client
            .pay(
                "w-1",
                RECIPIENT,
                Decimal::ONE,
                PayOptions {
                    wait_for_completion: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(result.success);

        let entry = client
            .ledger()
            .query(&LedgerQuery::for_wallet("w-1"))
            .await
            .unwrap()
            .remove(0);
        let synced = client.sync_transaction(&entry.id).await.unwrap();
        assert_eq!(synced.status, LedgerEntryStatus::Completed);
        assert!(synced.metadata.contains_key("last_synced"));
        assert_eq!(synced.metadata["provider_state"], "COMPLETE");
    }

    #[tokio::test]
    async fn total_spent_tracks_completed_payments() {
        let (client, _provider) = funded_client(100);
        client
            .pay(
                "w-1",
                RECIPIENT,
                Decimal::from_str("2.5").unwrap(),
                PayOptions {
                    wait_for_completion: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let total = client.ledger().get_total_spent("w-1", None).await.unwrap();
        assert_eq!(total, Decimal::from_str("2.5").unwrap());
    }
}
