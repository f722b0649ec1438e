//! ============================================================================
//! RPC Balance Oracle - Token balance reads over EVM JSON-RPC
//! ============================================================================
//! Queries `balanceOf(address)` with `eth_call` against the latest block.
//! ERC-20 and ERC-721 share the selector, so one code path serves both.
//! A failed read is reported as such, never as a zero balance.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::oracle::{BalanceOracle, OracleError};
use super::retry::{with_retry, RetryConfig};
use super::types::{BalanceSnapshot, TokenStandard, WalletIdentity};

/// `balanceOf(address)` function selector
pub const BALANCE_OF_SELECTOR: &str = "70a08231";

/// Default bound on a single RPC call
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'a str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Reads token balances from an EVM chain RPC endpoint
pub struct RpcBalanceOracle {
    client: Client,
    rpc_url: Url,
    retry: RetryConfig,
    request_id: AtomicU64,
}

impl RpcBalanceOracle {
    /// Create an oracle with the default timeout and retry policy
    pub fn new(rpc_url: &str) -> Result<Self> {
        Self::with_options(
            rpc_url,
            Duration::from_millis(DEFAULT_RPC_TIMEOUT_MS),
            RetryConfig::default(),
        )
    }

    pub fn with_options(rpc_url: &str, timeout: Duration, retry: RetryConfig) -> Result<Self> {
        let rpc_url = Url::parse(rpc_url).map_err(|e| anyhow!("Invalid RPC URL '{}': {}", rpc_url, e))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build RPC HTTP client: {}", e))?;

        Ok(Self {
            client,
            rpc_url,
            retry,
            request_id: AtomicU64::new(1),
        })
    }

    pub fn rpc_url(&self) -> &str {
        self.rpc_url.as_str()
    }

    async fn call_balance_of(&self, wallet: &WalletIdentity, token_address: &str) -> Result<u128, OracleError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
            method: "eth_call",
            params: json!([
                { "to": token_address, "data": encode_balance_of(wallet) },
                "latest"
            ]),
        };

        let response = self
            .client
            .post(self.rpc_url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Unavailable(format!("RPC timeout: {}", e))
                } else {
                    OracleError::Unavailable(format!("RPC connection error: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Unavailable(format!("RPC returned HTTP {}", status)));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Unavailable(format!("Unreadable RPC response: {}", e)))?;

        if let Some(err) = body.error {
            return Err(OracleError::Unavailable(format!(
                "RPC error {}: {}",
                err.code, err.message
            )));
        }

        match body.result {
            Some(Value::String(hex_result)) => decode_uint256(&hex_result),
            Some(other) => Err(OracleError::MalformedResponse(format!(
                "expected hex string result, got {}",
                other
            ))),
            None => Err(OracleError::MalformedResponse("missing result".into())),
        }
    }
}

#[async_trait]
impl BalanceOracle for RpcBalanceOracle {
    async fn fetch_balance(
        &self,
        wallet: &WalletIdentity,
        token_address: &str,
        standard: TokenStandard,
    ) -> Result<BalanceSnapshot, OracleError> {
        debug!(
            "Checking {} balance for wallet {} on {}",
            standard, wallet, token_address
        );

        let label = format!("balanceOf({}) on {}", wallet, token_address);
        let amount = with_retry(&self.retry, &label, || self.call_balance_of(wallet, token_address)).await?;

        debug!("{} balance: {} (raw)", standard, amount);
        Ok(BalanceSnapshot::fresh(wallet.clone(), token_address, standard, amount))
    }
}

/// Calldata for `balanceOf(wallet)`: selector plus the address left-padded to 32 bytes
pub fn encode_balance_of(wallet: &WalletIdentity) -> String {
    format!("0x{}{:0>64}", BALANCE_OF_SELECTOR, wallet.hex_digits())
}

/// Decode a `uint256` return value that must fit in a `u128`
pub fn decode_uint256(raw: &str) -> Result<u128, OracleError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| OracleError::MalformedResponse(format!("missing 0x prefix: '{}'", raw)))?;

    if digits.is_empty() {
        return Err(OracleError::MalformedResponse(
            "empty result (token address is not a contract?)".into(),
        ));
    }

    if digits.len() > 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(OracleError::MalformedResponse(format!("not a uint256: '{}'", raw)));
    }

    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return Ok(0);
    }
    if significant.len() > 32 {
        return Err(OracleError::MalformedResponse(format!(
            "balance exceeds 128 bits: '{}'",
            raw
        )));
    }

    u128::from_str_radix(significant, 16)
        .map_err(|e| OracleError::MalformedResponse(format!("'{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const TOKEN: &str = "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984";

    enum Reply {
        /// HTTP status and body
        Http(u16, String),
        /// Accept the request and never answer
        Hang,
    }

    fn rpc_result(result: Value) -> Reply {
        Reply::Http(200, json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string())
    }

    /// Local JSON-RPC endpoint answering the nth connection with `replies[n]`
    /// (the last reply repeats). Returns the URL and a connection counter.
    async fn spawn_rpc(replies: Vec<Reply>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let replies = Arc::new(replies);

        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let replies = replies.clone();
                tokio::spawn(async move {
                    let reply = &replies[n.min(replies.len() - 1)];
                    serve_one(stream, reply).await;
                });
            }
        });

        (format!("http://{}", addr), hits)
    }

    async fn serve_one(mut stream: TcpStream, reply: &Reply) {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let Ok(read) = stream.read(&mut buf).await else { return };
            if read == 0 {
                return;
            }
            request.extend_from_slice(&buf[..read]);
            if request_complete(&request) {
                break;
            }
        }

        match reply {
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            Reply::Http(status, body) => {
                let response = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        }
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else { return false };
        let content_length = text[..header_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 5,
            max_delay_ms: 20,
            jitter: false,
        }
    }

    fn oracle(url: &str, retry: RetryConfig) -> RpcBalanceOracle {
        RpcBalanceOracle::with_options(url, Duration::from_millis(200), retry).unwrap()
    }

    fn wallet() -> WalletIdentity {
        WalletIdentity::parse("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").unwrap()
    }

    #[test]
    fn test_oracle_creation() {
        let oracle = RpcBalanceOracle::new("https://cloudflare-eth.com");
        assert!(oracle.is_ok());
        assert!(RpcBalanceOracle::new("not a url").is_err());
    }

    #[test]
    fn test_encode_balance_of() {
        let wallet = WalletIdentity::parse("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").unwrap();
        let data = encode_balance_of(&wallet);
        assert_eq!(data.len(), 2 + 8 + 64);
        assert_eq!(
            data,
            "0x70a08231\
             0000000000000000000000005aaeb6053f3e94c9b9a09f33669435e7ef1beaed"
        );
    }

    #[test]
    fn test_decode_uint256() {
        let padded = format!("0x{:0>64}", "3e8");
        assert_eq!(decode_uint256(&padded), Ok(1000));
        assert_eq!(decode_uint256("0x0"), Ok(0));
        assert_eq!(decode_uint256(&format!("0x{}", "0".repeat(64))), Ok(0));
        assert_eq!(decode_uint256(&format!("0x{}", "f".repeat(32))), Ok(u128::MAX));
    }

    #[test]
    fn test_decode_uint256_rejects_garbage() {
        assert!(decode_uint256("0x").unwrap_err().is_malformed());
        assert!(decode_uint256("1000").unwrap_err().is_malformed());
        assert!(decode_uint256("0x+5").unwrap_err().is_malformed());
        assert!(decode_uint256("0xzz").unwrap_err().is_malformed());
        assert!(decode_uint256(&format!("0x1{}", "0".repeat(32))).unwrap_err().is_malformed());
        assert!(decode_uint256(&format!("0x{}", "0".repeat(65))).unwrap_err().is_malformed());
    }

    #[tokio::test]
    async fn test_reads_balance_from_endpoint() {
        let (url, hits) = spawn_rpc(vec![rpc_result(json!(format!("0x{:0>64}", "3e8")))]).await;

        let snapshot = oracle(&url, RetryConfig::none())
            .fetch_balance(&wallet(), TOKEN, TokenStandard::Erc20)
            .await
            .unwrap();

        assert_eq!(snapshot.amount, 1000);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_unavailable() {
        let (url, _) = spawn_rpc(vec![Reply::Hang]).await;

        let err = oracle(&url, RetryConfig::none())
            .fetch_balance(&wallet(), TOKEN, TokenStandard::Erc20)
            .await
            .unwrap_err();

        match err {
            OracleError::Unavailable(msg) => assert!(msg.contains("timeout"), "{}", msg),
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rpc_error_object_is_unavailable() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32000, "message": "header not found" }
        });
        let (url, _) = spawn_rpc(vec![Reply::Http(200, body.to_string())]).await;

        let err = oracle(&url, RetryConfig::none())
            .fetch_balance(&wallet(), TOKEN, TokenStandard::Nft)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            OracleError::Unavailable("RPC error -32000: header not found".into())
        );
    }

    #[tokio::test]
    async fn test_reverted_call_is_not_retried() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": 3, "message": "execution reverted" }
        });
        let (url, hits) = spawn_rpc(vec![Reply::Http(200, body.to_string())]).await;

        let err = oracle(&url, fast_retry(3))
            .fetch_balance(&wallet(), TOKEN, TokenStandard::Erc20)
            .await
            .unwrap_err();

        assert!(!err.is_malformed());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let (url, hits) = spawn_rpc(vec![
            Reply::Http(503, "overloaded".into()),
            Reply::Http(503, "overloaded".into()),
            rpc_result(json!("0x2")),
        ])
        .await;

        let snapshot = oracle(&url, fast_retry(3))
            .fetch_balance(&wallet(), TOKEN, TokenStandard::Nft)
            .await
            .unwrap();

        assert_eq!(snapshot.amount, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_server_error_after_last_attempt_is_unavailable() {
        let (url, hits) = spawn_rpc(vec![Reply::Http(502, String::new())]).await;

        let err = oracle(&url, fast_retry(2))
            .fetch_balance(&wallet(), TOKEN, TokenStandard::Erc20)
            .await
            .unwrap_err();

        match err {
            OracleError::Unavailable(msg) => assert!(msg.contains("502"), "{}", msg),
            other => panic!("expected Unavailable, got {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_string_result_is_malformed_and_not_retried() {
        let (url, hits) = spawn_rpc(vec![rpc_result(json!(1000))]).await;

        let err = oracle(&url, fast_retry(3))
            .fetch_balance(&wallet(), TOKEN, TokenStandard::Erc20)
            .await
            .unwrap_err();

        assert!(err.is_malformed());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_result_is_malformed_and_not_retried() {
        let body = json!({ "jsonrpc": "2.0", "id": 1 });
        let (url, hits) = spawn_rpc(vec![Reply::Http(200, body.to_string())]).await;

        let err = oracle(&url, fast_retry(3))
            .fetch_balance(&wallet(), TOKEN, TokenStandard::Nft)
            .await
            .unwrap_err();

        assert_eq!(err, OracleError::MalformedResponse("missing result".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
