use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::amount::RawAmount;
use crate::clients::{
    ChainCall, ChainClient, ClientError, NetworkClients, Signer, SwapQuoter, TransactionRequest,
    TxHash, TxStatus,
};
use crate::config::OfframpConfig;
use crate::ephemeral::EphemeralSecret;
use crate::tokens::{native_decimals, AssetId, Chain, InputTokenType, OutputTokenType};

/// Stellar account the sandbox anchor expects payments on
pub const SANDBOX_ANCHOR_ACCOUNT: &str =
    "GANCHORSANDBOXOFFRAMPXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXX";

/// EURC per USDC, as a fraction
const DEFAULT_SWAP_RATE: (u128, u128) = (95_237, 100_000);

/// What happens to the next submission of a given step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultMode {
    /// The node refuses the transaction; nothing lands on chain
    RejectBeforeSubmit(ClientError),
    /// The transaction lands but the response never reaches the caller
    LoseResponse,
    /// The transaction is included but reverts
    FailOnChain,
}

/// A chain-wide failure affecting every call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outage {
    Unreachable,
    Rejecting(String),
}

/// A payment observed on Stellar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPayment {
    pub from: String,
    pub to: String,
    pub asset: AssetId,
    pub amount: RawAmount,
    pub memo: String,
}

#[derive(Debug)]
struct SandboxTx {
    chain: Chain,
    status: TxStatus,
    pending_polls: u32,
}

#[derive(Debug)]
struct World {
    balances: HashMap<(Chain, String, AssetId), RawAmount>,
    decimals: HashMap<(Chain, AssetId), u32>,
    stellar_accounts: HashSet<String>,
    trustlines: HashSet<(String, AssetId)>,
    allowances: HashMap<(Chain, String, String, AssetId), RawAmount>,
    controlled: HashSet<(Chain, String)>,
    transactions: HashMap<TxHash, SandboxTx>,
    by_key: HashMap<String, TxHash>,
    submissions: HashMap<String, u32>,
    duplicates: u32,
    faults: HashMap<String, FaultMode>,
    outages: HashMap<Chain, Outage>,
    payments: Vec<RecordedPayment>,
    pending_polls: u32,
    swap_rate: (u128, u128),
    bridge_fee_bps: u32,
    bridge_held: bool,
    held_bridge_credits: Vec<(String, AssetId, RawAmount)>,
    squid_router: String,
    nabla_router: String,
    next_tx: u64,
}

impl World {
    fn new(squid_router: String, nabla_router: String) -> Self {
        let mut decimals = HashMap::new();
        for chain in [Chain::Polygon, Chain::Pendulum, Chain::Stellar] {
            decimals.insert((chain, AssetId::native()), native_decimals(chain));
        }
        for input in InputTokenType::ALL {
            let details = input.details();
            decimals.insert((Chain::Polygon, input.source_asset()), details.source_decimals);
            decimals.insert((Chain::Pendulum, input.pendulum_asset()), details.pendulum_decimals);
        }
        for output in OutputTokenType::ALL {
            let details = output.details();
            decimals.insert((Chain::Pendulum, output.pendulum_asset()), details.pendulum_decimals);
            decimals.insert((Chain::Stellar, output.stellar_asset()), details.stellar_decimals);
        }

        Self {
            balances: HashMap::new(),
            decimals,
            stellar_accounts: HashSet::new(),
            trustlines: HashSet::new(),
            allowances: HashMap::new(),
            controlled: HashSet::new(),
            transactions: HashMap::new(),
            by_key: HashMap::new(),
            submissions: HashMap::new(),
            duplicates: 0,
            faults: HashMap::new(),
            outages: HashMap::new(),
            payments: Vec::new(),
            pending_polls: 0,
            swap_rate: DEFAULT_SWAP_RATE,
            bridge_fee_bps: 0,
            bridge_held: false,
            held_bridge_credits: Vec::new(),
            squid_router,
            nabla_router,
            next_tx: 0,
        }
    }

    fn check_outage(&self, chain: Chain) -> Result<(), ClientError> {
        match self.outages.get(&chain) {
            None => Ok(()),
            Some(Outage::Unreachable) => Err(ClientError::Network(format!("{chain} is unreachable"))),
            Some(Outage::Rejecting(reason)) => Err(ClientError::Rejected(reason.clone())),
        }
    }

    fn balance(&self, chain: Chain, account: &str, asset: &AssetId) -> RawAmount {
        self.balances
            .get(&(chain, account.to_string(), asset.clone()))
            .copied()
            .unwrap_or(RawAmount::ZERO)
    }

    fn credit(&mut self, chain: Chain, account: &str, asset: &AssetId, amount: RawAmount) -> Result<(), ClientError> {
        let entry = self
            .balances
            .entry((chain, account.to_string(), asset.clone()))
            .or_insert(RawAmount::ZERO);
        *entry = entry
            .checked_add(amount)
            .map_err(|e| ClientError::Rejected(e.to_string()))?;
        Ok(())
    }

    fn debit(&mut self, chain: Chain, account: &str, asset: &AssetId, amount: RawAmount) -> Result<(), ClientError> {
        let available = self.balance(chain, account, asset);
        if available < amount {
            return Err(ClientError::InsufficientFunds {
                account: account.to_string(),
                required: amount,
                available,
            });
        }
        self.balances.insert(
            (chain, account.to_string(), asset.clone()),
            available.saturating_sub(amount),
        );
        Ok(())
    }

    fn decimals(&self, chain: Chain, asset: &AssetId) -> Result<u32, ClientError> {
        self.decimals
            .get(&(chain, asset.clone()))
            .copied()
            .ok_or_else(|| ClientError::Rejected(format!("unknown asset {asset} on {chain}")))
    }

    fn spend_allowance(
        &mut self,
        chain: Chain,
        owner: &str,
        spender: &str,
        asset: &AssetId,
        amount: RawAmount,
    ) -> Result<(), ClientError> {
        let key = (chain, owner.to_string(), spender.to_string(), asset.clone());
        let allowed = self.allowances.get(&key).copied().unwrap_or(RawAmount::ZERO);
        if allowed < amount {
            return Err(ClientError::Rejected(format!(
                "allowance of {spender} over {asset} is {allowed}, needs {amount}"
            )));
        }
        self.allowances.insert(key, allowed.saturating_sub(amount));
        Ok(())
    }

    fn swap_output(&self, asset_in: &AssetId, asset_out: &AssetId, amount_in: RawAmount) -> Result<RawAmount, ClientError> {
        let scaled = amount_in
            .rescale(
                self.decimals(Chain::Pendulum, asset_in)?,
                self.decimals(Chain::Pendulum, asset_out)?,
            )
            .map_err(|e| ClientError::Rejected(e.to_string()))?;
        let (numerator, denominator) = self.swap_rate;
        scaled
            .value()
            .checked_mul(numerator)
            .map(|v| RawAmount::new(v / denominator.max(1)))
            .ok_or_else(|| ClientError::Rejected("swap output overflows".to_string()))
    }

    fn require_stellar_account(&self, account: &str) -> Result<(), ClientError> {
        if self.stellar_accounts.contains(account) {
            Ok(())
        } else {
            Err(ClientError::Rejected(format!("stellar account {account} does not exist")))
        }
    }

    fn apply(&mut self, chain: Chain, call: &ChainCall) -> Result<(), ClientError> {
        match call {
            ChainCall::Approve {
                owner,
                spender,
                asset,
                amount,
            } => {
                self.allowances
                    .insert((chain, owner.clone(), spender.clone(), asset.clone()), *amount);
            }
            ChainCall::SquidRouterBridge {
                from,
                asset,
                amount,
                destination_chain,
                destination,
                destination_asset,
            } => {
                let router = self.squid_router.clone();
                self.spend_allowance(chain, from, &router, asset, *amount)?;
                self.debit(chain, from, asset, *amount)?;
                let delivered = amount
                    .rescale(
                        self.decimals(chain, asset)?,
                        self.decimals(*destination_chain, destination_asset)?,
                    )
                    .and_then(|a| a.less_bps(self.bridge_fee_bps))
                    .map_err(|e| ClientError::Rejected(e.to_string()))?;
                if self.bridge_held {
                    self.held_bridge_credits
                        .push((destination.clone(), destination_asset.clone(), delivered));
                } else {
                    self.credit(*destination_chain, destination, destination_asset, delivered)?;
                }
            }
            ChainCall::Transfer {
                from,
                to,
                asset,
                amount,
            } => {
                self.debit(chain, from, asset, *amount)?;
                self.credit(chain, to, asset, *amount)?;
            }
            ChainCall::TransferAll { from, to, asset } => {
                let amount = self.balance(chain, from, asset);
                self.debit(chain, from, asset, amount)?;
                self.credit(chain, to, asset, amount)?;
            }
            ChainCall::CreateAccount {
                funder,
                account,
                starting_balance,
                trustline,
            } => {
                if self.stellar_accounts.contains(account) {
                    return Err(ClientError::Rejected(format!("account {account} already exists")));
                }
                self.debit(chain, funder, &AssetId::native(), *starting_balance)?;
                self.credit(chain, account, &AssetId::native(), *starting_balance)?;
                self.stellar_accounts.insert(account.clone());
                if let Some(asset) = trustline {
                    self.trustlines.insert((account.clone(), asset.clone()));
                }
            }
            ChainCall::NablaSwap {
                owner,
                asset_in,
                asset_out,
                amount_in,
                min_amount_out,
                deadline,
            } => {
                if *deadline < Utc::now().timestamp() {
                    return Err(ClientError::Rejected("swap deadline passed".to_string()));
                }
                let out = self.swap_output(asset_in, asset_out, *amount_in)?;
                if out < *min_amount_out {
                    return Err(ClientError::Rejected(format!(
                        "swap output {out} below minimum {min_amount_out}"
                    )));
                }
                let router = self.nabla_router.clone();
                self.spend_allowance(chain, owner, &router, asset_in, *amount_in)?;
                self.debit(chain, owner, asset_in, *amount_in)?;
                self.credit(chain, owner, asset_out, out)?;
            }
            ChainCall::SpacewalkRedeem {
                owner,
                asset,
                amount,
                stellar_destination,
                stellar_asset,
                ..
            } => {
                self.require_stellar_account(stellar_destination)?;
                if !self
                    .trustlines
                    .contains(&(stellar_destination.clone(), stellar_asset.clone()))
                {
                    return Err(ClientError::Rejected(format!(
                        "{stellar_destination} has no trustline for {stellar_asset}"
                    )));
                }
                let redeemed = amount
                    .rescale(
                        self.decimals(chain, asset)?,
                        self.decimals(Chain::Stellar, stellar_asset)?,
                    )
                    .map_err(|e| ClientError::Rejected(e.to_string()))?;
                self.debit(chain, owner, asset, *amount)?;
                self.credit(Chain::Stellar, stellar_destination, stellar_asset, redeemed)?;
            }
            ChainCall::StellarPayment {
                from,
                to,
                asset,
                amount,
                memo,
                ..
            } => {
                self.require_stellar_account(from)?;
                self.require_stellar_account(to)?;
                self.debit(chain, from, asset, *amount)?;
                self.credit(chain, to, asset, *amount)?;
                self.payments.push(RecordedPayment {
                    from: from.clone(),
                    to: to.clone(),
                    asset: asset.clone(),
                    amount: *amount,
                    memo: memo.clone(),
                });
            }
            ChainCall::AccountMerge {
                account,
                destination,
            } => {
                self.require_stellar_account(account)?;
                let held: Vec<AssetId> = self
                    .balances
                    .iter()
                    .filter(|((c, a, asset), amount)| {
                        *c == chain && a == account && !asset.is_native() && !amount.is_zero()
                    })
                    .map(|((_, _, asset), _)| asset.clone())
                    .collect();
                if let Some(asset) = held.first() {
                    return Err(ClientError::Rejected(format!(
                        "{account} still holds {asset}"
                    )));
                }
                let native = self.balance(chain, account, &AssetId::native());
                self.credit(chain, destination, &AssetId::native(), native)?;
                self.balances.retain(|(c, a, _), _| !(*c == chain && a == account));
                self.trustlines.retain(|(a, _)| a != account);
                self.stellar_accounts.remove(account);
            }
        }
        Ok(())
    }

    fn record(&mut self, chain: Chain, key: &str, status: TxStatus) -> TxHash {
        self.next_tx += 1;
        let hash = TxHash::new(format!("{chain}-{:016x}", self.next_tx));
        self.transactions.insert(
            hash.clone(),
            SandboxTx {
                chain,
                status,
                pending_polls: self.pending_polls,
            },
        );
        self.by_key.insert(key.to_string(), hash.clone());
        hash
    }
}

/// Step part of an idempotency key, `"{workflow}:{step}"`
fn step_of(key: &str) -> &str {
    key.rsplit_once(':').map(|(_, step)| step).unwrap_or(key)
}

/// Deterministic address for a secret on `chain`
fn derive(chain: Chain, secret: &EphemeralSecret) -> Result<String, ClientError> {
    let hex = secret.expose();
    let mut seed = [0u8; 32];
    for (i, byte) in seed.iter_mut().enumerate() {
        let pair = hex
            .get(i * 2..i * 2 + 2)
            .ok_or_else(|| ClientError::InvalidSignature("malformed key material".to_string()))?;
        *byte = u8::from_str_radix(pair, 16)
            .map_err(|_| ClientError::InvalidSignature("malformed key material".to_string()))?;
    }
    let mut rng = StdRng::from_seed(seed);
    let mut public = [0u8; 28];
    rng.fill(&mut public);
    let encoded: String = public.iter().map(|b| format!("{b:02x}")).collect();

    Ok(match chain {
        Chain::Polygon => format!("0x{}", &encoded[..40]),
        Chain::Pendulum => format!("5{}", &encoded[..47]),
        Chain::Stellar => format!("G{}", encoded[..55].to_ascii_uppercase()),
    })
}

/// Shared in-memory ledger of the three networks with fault injection
#[derive(Clone)]
pub struct SandboxNetwork {
    world: Arc<Mutex<World>>,
}

impl SandboxNetwork {
    pub fn new(config: &OfframpConfig) -> Self {
        let world = World::new(
            config.network.squid_router_address.clone(),
            config.network.nabla_router_address.clone(),
        );
        Self {
            world: Arc::new(Mutex::new(world)),
        }
    }

    /// A network where the user wallet and both funding accounts hold plenty of everything
    pub fn seeded(config: &OfframpConfig, user: &str) -> Self {
        let mut world = World::new(
            config.network.squid_router_address.clone(),
            config.network.nabla_router_address.clone(),
        );
        let funding = &config.funding;
        let grant = |decimals: u32| RawAmount::new(10u128.pow(decimals) * 1_000_000);

        world.controlled.insert((Chain::Polygon, user.to_string()));
        world
            .controlled
            .insert((Chain::Pendulum, funding.pendulum_funding_account.clone()));
        world
            .controlled
            .insert((Chain::Stellar, funding.stellar_funding_account.clone()));
        world
            .stellar_accounts
            .insert(funding.stellar_funding_account.clone());
        world.stellar_accounts.insert(SANDBOX_ANCHOR_ACCOUNT.to_string());

        let seeds: Vec<(Chain, String, AssetId)> = world
            .decimals
            .keys()
            .filter_map(|(chain, asset)| {
                let holder = match chain {
                    Chain::Polygon => user.to_string(),
                    Chain::Pendulum => funding.pendulum_funding_account.clone(),
                    Chain::Stellar if asset.is_native() => funding.stellar_funding_account.clone(),
                    Chain::Stellar => return None,
                };
                Some((*chain, holder, asset.clone()))
            })
            .collect();
        for (chain, holder, asset) in seeds {
            let decimals = world.decimals.get(&(chain, asset.clone())).copied().unwrap_or(0);
            world.balances.insert((chain, holder, asset), grant(decimals));
        }
        for output in OutputTokenType::ALL {
            world
                .trustlines
                .insert((SANDBOX_ANCHOR_ACCOUNT.to_string(), output.stellar_asset()));
        }

        info!(user, "Sandbox network seeded");
        Self {
            world: Arc::new(Mutex::new(world)),
        }
    }

    pub fn clients(&self) -> NetworkClients {
        let client = |chain: Chain| -> Arc<dyn ChainClient> {
            Arc::new(SandboxChain {
                chain,
                world: Arc::clone(&self.world),
            })
        };
        NetworkClients {
            source: client(Chain::Polygon),
            pendulum: client(Chain::Pendulum),
            stellar: client(Chain::Stellar),
            nabla: Arc::new(SandboxQuoter {
                world: Arc::clone(&self.world),
            }),
        }
    }

    /// Arm a one-shot fault for the next submission of `step`
    pub async fn inject_fault(&self, step: &str, mode: FaultMode) {
        self.world.lock().await.faults.insert(step.to_string(), mode);
    }

    pub async fn set_outage(&self, chain: Chain, outage: Outage) {
        self.world.lock().await.outages.insert(chain, outage);
    }

    pub async fn clear_outage(&self, chain: Chain) {
        self.world.lock().await.outages.remove(&chain);
    }

    pub async fn clear_outages(&self) {
        self.world.lock().await.outages.clear();
    }

    /// Number of `pending` answers each new transaction gives before it confirms
    pub async fn set_pending_polls(&self, polls: u32) {
        self.world.lock().await.pending_polls = polls;
    }

    pub async fn set_swap_rate(&self, numerator: u128, denominator: u128) {
        self.world.lock().await.swap_rate = (numerator, denominator);
    }

    pub async fn set_bridge_fee_bps(&self, bps: u32) {
        self.world.lock().await.bridge_fee_bps = bps;
    }

    /// Hold bridged funds in transit. Releasing credits everything held so far.
    pub async fn set_bridge_held(&self, held: bool) -> Result<(), ClientError> {
        let mut world = self.world.lock().await;
        world.bridge_held = held;
        if !held {
            let credits = std::mem::take(&mut world.held_bridge_credits);
            for (account, asset, amount) in credits {
                world.credit(Chain::Pendulum, &account, &asset, amount)?;
            }
        }
        Ok(())
    }

    pub async fn credit(&self, chain: Chain, account: &str, asset: &AssetId, amount: RawAmount) -> Result<(), ClientError> {
        self.world.lock().await.credit(chain, account, asset, amount)
    }

    /// Remove funds outside any transaction, as fees the sandbox does not charge would
    pub async fn debit(&self, chain: Chain, account: &str, asset: &AssetId, amount: RawAmount) -> Result<(), ClientError> {
        self.world.lock().await.debit(chain, account, asset, amount)
    }

    pub async fn balance_of(&self, chain: Chain, account: &str, asset: &AssetId) -> RawAmount {
        self.world.lock().await.balance(chain, account, asset)
    }

    /// Every non-zero balance held by `account`
    pub async fn holdings(&self, chain: Chain, account: &str) -> Vec<(AssetId, RawAmount)> {
        let world = self.world.lock().await;
        let mut holdings: Vec<(AssetId, RawAmount)> = world
            .balances
            .iter()
            .filter(|((c, a, _), amount)| *c == chain && a == account && !amount.is_zero())
            .map(|((_, _, asset), amount)| (asset.clone(), *amount))
            .collect();
        holdings.sort();
        holdings
    }

    pub async fn stellar_account_exists(&self, account: &str) -> bool {
        self.world.lock().await.stellar_accounts.contains(account)
    }

    /// How often a transaction with `key` was sent
    pub async fn submissions_of(&self, key: &str) -> u32 {
        self.world.lock().await.submissions.get(key).copied().unwrap_or(0)
    }

    pub async fn total_submissions(&self) -> u32 {
        self.world.lock().await.submissions.values().sum()
    }

    /// Submissions that reused an idempotency key already on chain
    pub async fn duplicate_submissions(&self) -> u32 {
        self.world.lock().await.duplicates
    }

    pub async fn stellar_payments(&self) -> Vec<RecordedPayment> {
        self.world.lock().await.payments.clone()
    }
}

/// One chain of the sandbox
pub struct SandboxChain {
    chain: Chain,
    world: Arc<Mutex<World>>,
}

impl SandboxChain {
    fn verify_signer(
        &self,
        world: &World,
        request: &TransactionRequest,
        signing_key: Option<&EphemeralSecret>,
    ) -> Result<(), ClientError> {
        let origin = request.call.origin();
        match request.signer {
            Signer::Ephemeral => {
                let key = signing_key.ok_or_else(|| {
                    ClientError::InvalidSignature(format!("no key supplied for {origin}"))
                })?;
                if derive(self.chain, key)? != origin {
                    return Err(ClientError::InvalidSignature(format!(
                        "key does not control {origin}"
                    )));
                }
            }
            Signer::Wallet | Signer::Funding => {
                if !world.controlled.contains(&(self.chain, origin.to_string())) {
                    return Err(ClientError::InvalidSignature(format!(
                        "no signer holds the key of {origin}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for SandboxChain {
    fn chain(&self) -> Chain {
        self.chain
    }

    fn derive_address(&self, secret: &EphemeralSecret) -> Result<String, ClientError> {
        derive(self.chain, secret)
    }

    async fn account_exists(&self, account: &str) -> Result<bool, ClientError> {
        let world = self.world.lock().await;
        world.check_outage(self.chain)?;
        Ok(match self.chain {
            Chain::Stellar => world.stellar_accounts.contains(account),
            Chain::Polygon | Chain::Pendulum => world
                .balances
                .iter()
                .any(|((c, a, _), amount)| *c == self.chain && a == account && !amount.is_zero()),
        })
    }

    async fn balance(&self, account: &str, asset: &AssetId) -> Result<RawAmount, ClientError> {
        let world = self.world.lock().await;
        world.check_outage(self.chain)?;
        Ok(world.balance(self.chain, account, asset))
    }

    async fn find_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<Option<TxHash>, ClientError> {
        let world = self.world.lock().await;
        world.check_outage(self.chain)?;
        let found = world
            .by_key
            .get(&request.idempotency_key)
            .filter(|hash| {
                world
                    .transactions
                    .get(*hash)
                    .is_some_and(|tx| tx.chain == self.chain)
            })
            .cloned();
        Ok(found)
    }

    async fn submit(
        &self,
        request: &TransactionRequest,
        signing_key: Option<&EphemeralSecret>,
    ) -> Result<TxHash, ClientError> {
        let mut world = self.world.lock().await;
        world.check_outage(self.chain)?;
        if request.chain != self.chain {
            return Err(ClientError::Rejected(format!(
                "request for {} sent to {}",
                request.chain, self.chain
            )));
        }

        let key = request.idempotency_key.as_str();
        let fault = world.faults.remove(step_of(key));
        if let Some(FaultMode::RejectBeforeSubmit(error)) = &fault {
            debug!(key, error = %error, "Injected rejection");
            return Err(error.clone());
        }

        self.verify_signer(&world, request, signing_key)?;

        *world.submissions.entry(key.to_string()).or_insert(0) += 1;
        if world.by_key.contains_key(key) {
            world.duplicates += 1;
        }

        if fault == Some(FaultMode::FailOnChain) {
            let hash = world.record(self.chain, key, TxStatus::Failed);
            debug!(key, hash = %hash, "Injected on-chain failure");
            return Ok(hash);
        }

        world.apply(self.chain, &request.call)?;
        let hash = world.record(self.chain, key, TxStatus::Confirmed);
        debug!(key, hash = %hash, description = %request.describe(), "Sandbox transaction applied");

        if fault == Some(FaultMode::LoseResponse) {
            return Err(ClientError::Network(
                "connection dropped before the response arrived".to_string(),
            ));
        }
        Ok(hash)
    }

    async fn query_status(&self, hash: &TxHash) -> Result<TxStatus, ClientError> {
        let mut world = self.world.lock().await;
        world.check_outage(self.chain)?;
        let tx = world
            .transactions
            .get_mut(hash)
            .filter(|tx| tx.chain == self.chain)
            .ok_or_else(|| ClientError::UnknownTransaction(hash.to_string()))?;
        if tx.pending_polls > 0 {
            tx.pending_polls -= 1;
            return Ok(TxStatus::Pending);
        }
        Ok(tx.status)
    }
}

/// Quotes at the same rate the sandbox swap executes at
pub struct SandboxQuoter {
    world: Arc<Mutex<World>>,
}

#[async_trait]
impl SwapQuoter for SandboxQuoter {
    async fn quote(
        &self,
        asset_in: &AssetId,
        asset_out: &AssetId,
        amount_in: RawAmount,
    ) -> Result<RawAmount, ClientError> {
        let world = self.world.lock().await;
        world.check_outage(Chain::Pendulum)?;
        world.swap_output(asset_in, asset_out, amount_in)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::CallKind;

    const USER: &str = "0x1111111111111111111111111111111111111111";

    fn config() -> OfframpConfig {
        OfframpConfig::default().for_sandbox()
    }

    fn transfer(key: &str, from: &str, to: &str, amount: u128) -> TransactionRequest {
        TransactionRequest::new(
            key.to_string(),
            Chain::Pendulum,
            Signer::Funding,
            ChainCall::Transfer {
                from: from.to_string(),
                to: to.to_string(),
                asset: AssetId::native(),
                amount: RawAmount::new(amount),
            },
        )
    }

    #[test]
    fn test_derived_addresses_are_stable_and_chain_shaped() {
        let secret = EphemeralSecret::generate();
        let stellar = derive(Chain::Stellar, &secret).unwrap();
        assert_eq!(stellar, derive(Chain::Stellar, &secret).unwrap());
        assert!(stellar.starts_with('G'));
        assert_eq!(stellar.len(), 56);
        assert!(derive(Chain::Pendulum, &secret).unwrap().starts_with('5'));
        assert_ne!(stellar, derive(Chain::Stellar, &EphemeralSecret::generate()).unwrap());
    }

    #[tokio::test]
    async fn test_submit_and_lookup_by_key() {
        let config = config();
        let network = SandboxNetwork::seeded(&config, USER);
        let pendulum = network.clients().pendulum;
        let funding = config.funding.pendulum_funding_account.clone();
        let request = transfer("wf:step", &funding, "5DEST", 1_000);

        assert_eq!(pendulum.find_transaction(&request).await.unwrap(), None);
        let hash = pendulum.submit(&request, None).await.unwrap();
        assert_eq!(pendulum.find_transaction(&request).await.unwrap(), Some(hash.clone()));
        assert_eq!(pendulum.query_status(&hash).await.unwrap(), TxStatus::Confirmed);
        assert_eq!(
            pendulum.balance("5DEST", &AssetId::native()).await.unwrap(),
            RawAmount::new(1_000)
        );
        assert_eq!(request.call.kind(), CallKind::Transfer);
    }

    #[tokio::test]
    async fn test_unknown_signer_is_rejected() {
        let network = SandboxNetwork::seeded(&config(), USER);
        let pendulum = network.clients().pendulum;
        let request = transfer("wf:step", "5STRANGER", "5DEST", 1);

        let err = pendulum.submit(&request, None).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidSignature(_)));
        assert_eq!(network.total_submissions().await, 0);
    }

    #[tokio::test]
    async fn test_lost_response_still_lands() {
        let config = config();
        let network = SandboxNetwork::seeded(&config, USER);
        let pendulum = network.clients().pendulum;
        let request = transfer("wf:fund", &config.funding.pendulum_funding_account, "5DEST", 7);
        network.inject_fault("fund", FaultMode::LoseResponse).await;

        let err = pendulum.submit(&request, None).await.unwrap_err();
        assert!(err.is_transient());
        assert!(pendulum.find_transaction(&request).await.unwrap().is_some());
        assert_eq!(network.balance_of(Chain::Pendulum, "5DEST", &AssetId::native()).await, RawAmount::new(7));

        // Sending again is exactly what idempotent callers must avoid
        pendulum.submit(&request, None).await.unwrap();
        assert_eq!(network.duplicate_submissions().await, 1);
    }

    #[tokio::test]
    async fn test_pending_polls_delay_confirmation() {
        let config = config();
        let network = SandboxNetwork::seeded(&config, USER);
        network.set_pending_polls(2).await;
        let pendulum = network.clients().pendulum;
        let request = transfer("wf:step", &config.funding.pendulum_funding_account, "5DEST", 1);

        let hash = pendulum.submit(&request, None).await.unwrap();
        assert_eq!(pendulum.query_status(&hash).await.unwrap(), TxStatus::Pending);
        assert_eq!(pendulum.query_status(&hash).await.unwrap(), TxStatus::Pending);
        assert_eq!(pendulum.query_status(&hash).await.unwrap(), TxStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_outage_fails_every_call() {
        let network = SandboxNetwork::seeded(&config(), USER);
        let stellar = network.clients().stellar;
        network.set_outage(Chain::Stellar, Outage::Unreachable).await;
        assert!(stellar.balance("G", &AssetId::native()).await.unwrap_err().is_transient());

        network
            .set_outage(Chain::Stellar, Outage::Rejecting("maintenance".to_string()))
            .await;
        assert!(!stellar.account_exists("G").await.unwrap_err().is_transient());

        network.clear_outage(Chain::Stellar).await;
        assert!(stellar.account_exists(SANDBOX_ANCHOR_ACCOUNT).await.unwrap());
    }

    #[tokio::test]
    async fn test_quote_matches_swap_rate() {
        let network = SandboxNetwork::seeded(&config(), USER);
        let quoted = network
            .clients()
            .nabla
            .quote(
                &InputTokenType::Usdc.pendulum_asset(),
                &OutputTokenType::Eurc.pendulum_asset(),
                RawAmount::new(100_000_000),
            )
            .await
            .unwrap();
        // 100 USDC at 6 decimals into 12-decimal EURC
        assert_eq!(quoted, RawAmount::new(95_237_000_000_000));
    }
}
