//! AUR RPC v5 client.

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::Value;

use super::descriptor::{ForeignPackageDescriptor, SourceLocation};
use crate::error::ResolveError;
use crate::util::{arrs, percent_encode, s};

/// Base URL of the AUR RPC interface.
pub const AUR_RPC_URL: &str = "https://aur.archlinux.org/rpc/v5";

/// Maximum number of names per `info` request.
pub const MAX_INFO_BATCH: usize = 200;

/// Metadata lookups against the AUR.
pub trait AurLookup {
    /// What: Fetch metadata for up to [`MAX_INFO_BATCH`] names in one request.
    ///
    /// Output:
    /// - Descriptors for the names the AUR knows; unknown names are simply absent.
    ///
    /// # Errors
    /// - `ResolveError::Rpc` on transport errors, timeouts, non-200 or malformed payloads.
    fn info(&self, names: &[String]) -> Result<Vec<ForeignPackageDescriptor>, ResolveError>;

    /// What: Names of AUR packages that provide `dep`.
    ///
    /// # Errors
    /// - `ResolveError::Rpc` as for [`AurLookup::info`].
    fn search_provides(&self, dep: &str) -> Result<Vec<String>, ResolveError>;
}

/// Blocking HTTP client for the AUR RPC.
pub struct AurClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl AurClient {
    /// What: Build a client with a request timeout.
    ///
    /// Inputs:
    /// - `timeout`: Applied to every request, connection included.
    ///
    /// # Errors
    /// - `ResolveError::Rpc` when the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self, ResolveError> {
        Self::with_base_url(timeout, AUR_RPC_URL)
    }

    /// Same as [`AurClient::new`] against another RPC endpoint.
    ///
    /// # Errors
    /// - `ResolveError::Rpc` when the HTTP client cannot be constructed.
    pub fn with_base_url(timeout: Duration, base_url: &str) -> Result<Self, ResolveError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("decman/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ResolveError::Rpc {
                url: base_url.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn get_json(&self, url: &str) -> Result<Value, ResolveError> {
        let rpc_err = |message: String| ResolveError::Rpc {
            url: url.to_string(),
            message,
        };
        tracing::debug!(url = %url, "AUR RPC request");
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| rpc_err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(rpc_err(format!("HTTP status {}", resp.status())));
        }
        resp.json::<Value>().map_err(|e| rpc_err(e.to_string()))
    }
}

impl AurLookup for AurClient {
    fn info(&self, names: &[String]) -> Result<Vec<ForeignPackageDescriptor>, ResolveError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let args: Vec<String> = names
            .iter()
            .map(|n| format!("arg[]={}", percent_encode(n)))
            .collect();
        let url = format!("{}/info?{}", self.base_url, args.join("&"));
        let body = self.get_json(&url)?;
        parse_info_response(&body).map_err(|message| ResolveError::Rpc { url, message })
    }

    fn search_provides(&self, dep: &str) -> Result<Vec<String>, ResolveError> {
        let url = format!("{}/search/{}?by=provides", self.base_url, percent_encode(dep));
        let body = self.get_json(&url)?;
        check_rpc_type(&body).map_err(|message| ResolveError::Rpc {
            url: url.clone(),
            message,
        })?;
        let results = body
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| ResolveError::Rpc {
                url: url.clone(),
                message: "missing 'results'".to_string(),
            })?;
        Ok(results
            .iter()
            .map(|r| s(r, "Name"))
            .filter(|n| !n.is_empty())
            .collect())
    }
}

fn check_rpc_type(body: &Value) -> Result<(), String> {
    if body.get("type").and_then(Value::as_str) == Some("error") {
        return Err(format!("AUR RPC returned error: {}", s(body, "error")));
    }
    Ok(())
}

/// What: Convert an `info` response into descriptors.
///
/// # Errors
/// - A message when the payload is an RPC error or lacks required fields.
pub fn parse_info_response(body: &Value) -> Result<Vec<ForeignPackageDescriptor>, String> {
    check_rpc_type(body)?;
    let results = body
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| "missing 'results'".to_string())?;

    results
        .iter()
        .map(|r| {
            let name = s(r, "Name");
            let base = s(r, "PackageBase");
            let version = s(r, "Version");
            if name.is_empty() || base.is_empty() || version.is_empty() {
                return Err(format!("incomplete package record: {r}"));
            }
            let set = |key: &str| arrs(r, &[key]).into_iter().collect::<BTreeSet<_>>();
            Ok(ForeignPackageDescriptor {
                source: SourceLocation::aur(&base),
                runtime_deps: set("Depends"),
                build_deps: set("MakeDepends"),
                check_deps: set("CheckDepends"),
                provides: set("Provides"),
                name,
                base,
                version,
            })
        })
        .collect()
}
