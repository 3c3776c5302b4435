//! JSON-RPC binding to an Ethereum-compatible node.
//!
//! Transactions are sent with `eth_sendTransaction` from accounts the node manages, then
//! confirmed by polling `eth_getTransactionReceipt`. Views go through `eth_call`.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use super::abi::{self, Token};
use super::deployment::DeploymentInfo;
use super::{
    decimal_from_units, whole_units, LedgerClient, LedgerEvaluation, LedgerResult, OnChainBid,
    TenderReceipt, UnavailableCause,
};
use crate::config::LedgerSettings;
use crate::hashing::Digest;

const CREATE_TENDER: &str = "createTender(string,uint256,uint256,string)";
const SUBMIT_BID: &str = "submitBid(uint256,uint256,string)";
const CLOSE_TENDER: &str = "closeTender(uint256)";
const EVALUATE_BIDS: &str = "evaluateBids(uint256)";
const TENDER_COUNT: &str = "tenderCount()";
const GET_WINNING_BID: &str = "getWinningBid(uint256)";
const GET_TENDER_BIDS: &str = "getTenderBids(uint256)";
const TENDER_CREATED_EVENT: &str = "TenderCreated(uint256,string,uint256,uint256)";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    transaction_hash: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    logs: Vec<ReceiptLog>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReceiptLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
}

/// Ledger client speaking Ethereum JSON-RPC.
pub struct RpcLedgerClient {
    http: Client,
    url: Url,
    contract: Option<String>,
    gas_limit: u64,
    confirmation_timeout: Duration,
    poll_interval: Duration,
    next_id: AtomicU64,
}

impl RpcLedgerClient {
    pub fn new(
        settings: &LedgerSettings,
        deployment: Option<DeploymentInfo>,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(settings.request_timeout).build()?;

        tracing::info!(
            rpc_url = %settings.rpc_url,
            contract = ?deployment.as_ref().map(|d| d.contract_address.as_str()),
            "Ledger RPC client initialized"
        );

        Ok(Self {
            http,
            url: settings.rpc_url.clone(),
            contract: deployment.map(|d| d.contract_address),
            gas_limit: settings.gas_limit,
            confirmation_timeout: settings.confirmation_timeout,
            poll_interval: settings.poll_interval,
            next_id: AtomicU64::new(1),
        })
    }

    fn contract(&self) -> Result<&str, UnavailableCause> {
        self.contract.as_deref().ok_or(UnavailableCause::NotDeployed)
    }

    async fn rpc(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, UnavailableCause> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        debug!(method = method, id = request.id, "Ledger RPC request");

        let mut req = self.http.post(self.url.clone()).json(&request);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }

        let response = req
            .send()
            .await
            .map_err(|e| UnavailableCause::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UnavailableCause::Transport(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| UnavailableCause::Decode(format!("{}: {}", method, e)))?;

        if let Some(err) = body.error {
            return Err(UnavailableCause::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        Ok(body.result.unwrap_or(Value::Null))
    }

    async fn eth_call(&self, data: Vec<u8>) -> Result<Vec<u8>, UnavailableCause> {
        let to = self.contract()?;
        let result = self
            .rpc(
                "eth_call",
                json!([{ "to": to, "data": abi::to_hex_data(&data) }, "latest"]),
                None,
            )
            .await?;

        let hex = result
            .as_str()
            .ok_or_else(|| UnavailableCause::Decode("eth_call result is not a string".into()))?;
        abi::from_hex_data(hex)
    }

    /// Send a transaction and wait for it to be mined. Reverts and missing
    /// confirmations both come back as errors.
    #[instrument(skip(self, data), fields(tx_ref = tracing::field::Empty))]
    async fn transact(
        &self,
        from: &str,
        data: Vec<u8>,
    ) -> Result<TransactionReceipt, UnavailableCause> {
        let to = self.contract()?;
        abi::parse_address(from)?;

        let result = self
            .rpc(
                "eth_sendTransaction",
                json!([{
                    "from": from,
                    "to": to,
                    "gas": abi::quantity(self.gas_limit),
                    "data": abi::to_hex_data(&data),
                }]),
                None,
            )
            .await?;

        let tx_hash = result
            .as_str()
            .ok_or_else(|| UnavailableCause::Decode("transaction hash is not a string".into()))?
            .to_string();
        tracing::Span::current().record("tx_ref", tx_hash.as_str());

        // Past this point the transaction exists; failures must not trigger a resend.
        let receipt = tokio::time::timeout(self.confirmation_timeout, self.poll_receipt(&tx_hash))
            .await
            .map_err(|_| UnavailableCause::Unconfirmed {
                tx_ref: tx_hash.clone(),
                reason: format!("no receipt within {:?}", self.confirmation_timeout),
            })?
            .map_err(|e| UnavailableCause::Unconfirmed {
                tx_ref: tx_hash.clone(),
                reason: e.to_string(),
            })?;

        match receipt.status.as_deref().map(abi::parse_quantity) {
            Some(Ok(0)) => Err(UnavailableCause::Reverted(receipt.transaction_hash)),
            _ => Ok(receipt),
        }
    }

    async fn poll_receipt(&self, tx_hash: &str) -> Result<TransactionReceipt, UnavailableCause> {
        loop {
            let result = self
                .rpc("eth_getTransactionReceipt", json!([tx_hash]), None)
                .await?;

            if !result.is_null() {
                return serde_json::from_value(result)
                    .map_err(|e| UnavailableCause::Decode(format!("receipt: {}", e)));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Tender id from the `TenderCreated` log, falling back to `tenderCount()`.
    async fn created_tender_id(&self, receipt: &TransactionReceipt) -> Result<i64, UnavailableCause> {
        let contract = self.contract()?.to_lowercase();
        let topic = abi::event_topic(TENDER_CREATED_EVENT);

        let from_log = receipt
            .logs
            .iter()
            .filter(|log| log.address.to_lowercase() == contract)
            .find(|log| log.topics.first().map(|t| t.to_lowercase()) == Some(topic.clone()))
            .and_then(|log| log.topics.get(1))
            .map(|t| abi::parse_quantity(t));

        let id = match from_log {
            Some(id) => id?,
            None => {
                let data = self.eth_call(abi::encode_call(TENDER_COUNT, &[])).await?;
                abi::Decoder::new(&data).uint_at(0)?
            }
        };

        i64::try_from(id).map_err(|_| UnavailableCause::Decode(format!("tender id {}", id)))
    }
}

fn ledger_id(id: i64) -> Result<u128, UnavailableCause> {
    u128::try_from(id).map_err(|_| UnavailableCause::Encode(format!("ledger id {}", id)))
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn is_reachable(&self) -> bool {
        match self.rpc("eth_blockNumber", json!([]), Some(PROBE_TIMEOUT)).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Ledger liveness probe failed");
                false
            }
        }
    }

    async fn submit_tender(
        &self,
        title: &str,
        budget: Decimal,
        deadline_unix: i64,
        digest: &Digest,
        from: &str,
    ) -> LedgerResult<TenderReceipt> {
        let deadline = u128::try_from(deadline_unix)
            .map_err(|_| UnavailableCause::Encode(format!("deadline {}", deadline_unix)))?;
        let data = abi::encode_call(
            CREATE_TENDER,
            &[
                Token::String(title.to_string()),
                Token::Uint(whole_units(budget)?),
                Token::Uint(deadline),
                Token::String(digest.to_hex()),
            ],
        );

        let receipt = self.transact(from, data).await.map_err(|e| {
            warn!(error = %e, "createTender failed");
            e
        })?;
        let ledger_tender_id = self.created_tender_id(&receipt).await?;

        Ok(TenderReceipt {
            tx_ref: receipt.transaction_hash,
            ledger_tender_id,
        })
    }

    async fn submit_bid(
        &self,
        ledger_tender_id: i64,
        amount: Decimal,
        digest: &Digest,
        from: &str,
    ) -> LedgerResult<String> {
        let data = abi::encode_call(
            SUBMIT_BID,
            &[
                Token::Uint(ledger_id(ledger_tender_id)?),
                Token::Uint(whole_units(amount)?),
                Token::String(digest.to_hex()),
            ],
        );

        let receipt = self.transact(from, data).await.map_err(|e| {
            warn!(ledger_tender_id, error = %e, "submitBid failed");
            e
        })?;
        Ok(receipt.transaction_hash)
    }

    async fn close_tender(&self, ledger_tender_id: i64, from: &str) -> LedgerResult<String> {
        let data = abi::encode_call(CLOSE_TENDER, &[Token::Uint(ledger_id(ledger_tender_id)?)]);
        let receipt = self.transact(from, data).await?;
        Ok(receipt.transaction_hash)
    }

    async fn evaluate_tender(
        &self,
        ledger_tender_id: i64,
        from: &str,
    ) -> LedgerResult<LedgerEvaluation> {
        let id = ledger_id(ledger_tender_id)?;

        // The contract reverts on an empty bid set; fail fast without spending gas
        if self.list_bids(ledger_tender_id).await?.is_empty() {
            return Err(UnavailableCause::Rejected(format!(
                "no on-chain bids for tender {}",
                ledger_tender_id
            ))
            .into());
        }

        let receipt = self
            .transact(from, abi::encode_call(EVALUATE_BIDS, &[Token::Uint(id)]))
            .await?;

        let data = self
            .eth_call(abi::encode_call(GET_WINNING_BID, &[Token::Uint(id)]))
            .await?;
        let dec = abi::Decoder::new(&data);

        Ok(LedgerEvaluation {
            winner_address: abi::format_address(&dec.address_at(32)?),
            winning_amount: decimal_from_units(dec.uint_at(64)?)?,
            tx_ref: receipt.transaction_hash,
        })
    }

    async fn list_bids(&self, ledger_tender_id: i64) -> LedgerResult<Vec<OnChainBid>> {
        let data = self
            .eth_call(abi::encode_call(
                GET_TENDER_BIDS,
                &[Token::Uint(ledger_id(ledger_tender_id)?)],
            ))
            .await?;

        abi::decode_bid_array(&data)?
            .into_iter()
            .map(|raw| {
                Ok(OnChainBid {
                    bidder: abi::format_address(&raw.bidder),
                    amount: decimal_from_units(raw.amount)?,
                    bid_hash: raw.bid_hash,
                    submitted_at: i64::try_from(raw.timestamp).map_err(|_| {
                        UnavailableCause::Decode(format!("timestamp {}", raw.timestamp))
                    })?,
                })
            })
            .collect::<Result<Vec<_>, UnavailableCause>>()
            .map_err(Into::into)
    }
}
