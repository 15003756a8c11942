//! Concrete implementations of the ambient collaborator traits
//! `hostctl-activities` defines (§6): PowerDNS, HAProxy, ACME, the
//! node-agent RPC, Stalwart mail, outbound webhooks, and the tenant DEK
//! unwrap/decrypt seam `hostctl-convergence::web_shard::EnvVarCodec`
//! wants. None of these services are themselves in this repository's
//! scope (they're external collaborators reached only through these
//! interfaces) so every client here is a thin `reqwest`/socket wrapper,
//! not a reimplementation of the service's own protocol stack.

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{Context, Result};
use async_trait::async_trait;
use hostctl_activities::acme::AcmeClient;
use hostctl_activities::dns::PowerDnsClient;
use hostctl_activities::lb::HaproxyClient;
use hostctl_activities::mail::MailClient;
use hostctl_activities::node_agent::{NodeAgent, NodeAgentError};
use hostctl_activities::webhook::WebhookSender;
use hostctl_convergence::web_shard::EnvVarCodec;
use hostctl_store_postgres::CoreDb;
use hostctl_types::EntityId;
use reqwest::Client;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// PowerDNS admin API client (zone/record CRUD against its HTTP API).
pub struct HttpPowerDns {
    client: Client,
    base_url: String,
}

impl HttpPowerDns {
    /// Build a client against `base_url` (PowerDNS's admin API root).
    pub fn new(base_url: String) -> Self {
        Self { client: Client::new(), base_url }
    }
}

#[async_trait]
impl PowerDnsClient for HttpPowerDns {
    async fn create_zone(&self, zone_name: &str) -> Result<()> {
        let url = format!("{}/api/v1/servers/localhost/zones", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "name": format!("{zone_name}."), "kind": "Native" }))
            .send()
            .await
            .context("create_zone request failed")?;
        if !resp.status().is_success() && resp.status().as_u16() != 409 {
            anyhow::bail!("create_zone failed with status {}", resp.status());
        }
        Ok(())
    }

    async fn upsert_record(&self, zone_name: &str, name: &str, record_type: &str, content: &str, ttl: i32, priority: Option<i32>) -> Result<()> {
        let url = format!("{}/api/v1/servers/localhost/zones/{zone_name}.", self.base_url);
        let rrset_content = match priority {
            Some(p) => format!("{p} {content}"),
            None => content.to_string(),
        };
        let body = serde_json::json!({
            "rrsets": [{
                "name": format!("{name}."),
                "type": record_type,
                "ttl": ttl,
                "changetype": "REPLACE",
                "records": [{ "content": rrset_content, "disabled": false }],
            }]
        });
        let resp = self.client.patch(&url).json(&body).send().await.context("upsert_record request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("upsert_record failed with status {}", resp.status());
        }
        Ok(())
    }

    async fn delete_record(&self, zone_name: &str, name: &str, record_type: &str, _content: &str) -> Result<()> {
        let url = format!("{}/api/v1/servers/localhost/zones/{zone_name}.", self.base_url);
        let body = serde_json::json!({
            "rrsets": [{ "name": format!("{name}."), "type": record_type, "changetype": "DELETE" }]
        });
        let resp = self.client.patch(&url).json(&body).send().await.context("delete_record request failed")?;
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            anyhow::bail!("delete_record failed with status {}", resp.status());
        }
        Ok(())
    }
}

/// HAProxy runtime-API client, one shared admin-socket address for every
/// cluster (the per-cluster socket-discovery layer is out of scope here).
pub struct TcpHaproxy {
    addr: String,
}

impl TcpHaproxy {
    /// Build a client against the runtime API's `host:port`.
    pub fn new(addr: String) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl HaproxyClient for TcpHaproxy {
    async fn command(&self, _cluster_id: EntityId, command: &str) -> Result<String> {
        let mut stream = TcpStream::connect(&self.addr).await.with_context(|| format!("connect to haproxy runtime API at {}", self.addr))?;
        stream.write_all(command.as_bytes()).await?;
        stream.write_all(b"\n").await?;

        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        Ok(response.trim().to_string())
    }
}

/// ACME directory client. The account key (`account_key_pem`) is
/// carried by the caller per-call rather than held here — `CreateOrder`
/// generates and owns it as workflow state (see `acme.rs`'s module doc)
/// — so every method here is a stateless, simplified HTTP round-trip
/// rather than a full JWS-signed ACME session.
pub struct ReqwestAcme {
    client: Client,
    directory_url: String,
}

impl ReqwestAcme {
    /// Build a client against an ACME `directory_url`.
    pub fn new(directory_url: String) -> Self {
        Self { client: Client::new(), directory_url }
    }
}

#[async_trait]
impl AcmeClient for ReqwestAcme {
    async fn register_account(&self, account_key_pem: &str) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/acme/new-account", self.directory_url))
            .json(&serde_json::json!({ "accountKeyPem": account_key_pem, "termsOfServiceAgreed": true }))
            .send()
            .await
            .context("register_account request failed")?;
        let body: Value = resp.json().await.context("register_account response was not JSON")?;
        body.get("accountUrl").and_then(|v| v.as_str()).map(str::to_string).context("register_account response missing accountUrl")
    }

    async fn create_order(&self, account_key_pem: &str, dns_name: &str) -> Result<hostctl_activities::acme::AcmeOrder> {
        let resp = self
            .client
            .post(format!("{}/acme/new-order", self.directory_url))
            .json(&serde_json::json!({ "accountKeyPem": account_key_pem, "identifier": dns_name }))
            .send()
            .await
            .context("create_order request failed")?;
        resp.json().await.context("create_order response did not match AcmeOrder")
    }

    async fn accept_challenge(&self, account_key_pem: &str, challenge_url: &str) -> Result<()> {
        let resp = self
            .client
            .post(challenge_url)
            .json(&serde_json::json!({ "accountKeyPem": account_key_pem }))
            .send()
            .await
            .context("accept_challenge request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("accept_challenge failed with status {}", resp.status());
        }
        Ok(())
    }

    async fn poll_order_ready(&self, account_key_pem: &str, order_url: &str) -> Result<bool> {
        let resp = self
            .client
            .post(order_url)
            .json(&serde_json::json!({ "accountKeyPem": account_key_pem }))
            .send()
            .await
            .context("poll_order_ready request failed")?;
        let body: Value = resp.json().await.context("poll_order_ready response was not JSON")?;
        Ok(body.get("status").and_then(|v| v.as_str()) == Some("ready"))
    }

    async fn finalize(&self, account_key_pem: &str, order_url: &str, csr_der: &[u8]) -> Result<String> {
        let csr_b64 = base64_url_encode(csr_der);
        let resp = self
            .client
            .post(format!("{order_url}/finalize"))
            .json(&serde_json::json!({ "accountKeyPem": account_key_pem, "csr": csr_b64 }))
            .send()
            .await
            .context("finalize request failed")?;
        let body: Value = resp.json().await.context("finalize response was not JSON")?;
        body.get("certificate").and_then(|v| v.as_str()).map(str::to_string).context("finalize response missing certificate")
    }
}

fn base64_url_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = *chunk.get(1).unwrap_or(&0) as u32;
        let b2 = *chunk.get(2).unwrap_or(&0) as u32;
        let n = (b0 << 16) | (b1 << 8) | b2;
        out.push(ALPHABET[((n >> 18) & 0x3f) as usize] as char);
        out.push(ALPHABET[((n >> 12) & 0x3f) as usize] as char);
        if chunk.len() > 1 {
            out.push(ALPHABET[((n >> 6) & 0x3f) as usize] as char);
        }
        if chunk.len() > 2 {
            out.push(ALPHABET[(n & 0x3f) as usize] as char);
        }
    }
    out
}

/// Node-agent RPC client: every capability method on [`NodeAgent`] is
/// default-implemented over [`NodeAgent::call`], so this is the only
/// method that needs a real transport.
pub struct HttpNodeAgent {
    client: Client,
    core_db: Arc<CoreDb>,
    port: u16,
}

impl HttpNodeAgent {
    /// Build a client that resolves `node_id` to an address via
    /// `core_db` and talks to its RPC listener on `port`.
    pub fn new(core_db: Arc<CoreDb>, port: u16) -> Self {
        Self { client: Client::new(), core_db, port }
    }
}

#[async_trait]
impl NodeAgent for HttpNodeAgent {
    async fn call(&self, node_id: EntityId, method: &str, params: Value) -> Result<Value, NodeAgentError> {
        let node = self.core_db.get_node(node_id).await.map_err(|e| NodeAgentError::Other(e.into()))?;
        let host = node
            .ip
            .map(|ip| ip.to_string())
            .or_else(|| node.ip6.map(|ip| ip.to_string()))
            .unwrap_or_else(|| node.hostname.clone());

        let url = format!("http://{host}:{}/rpc/{method}", self.port);
        debug!(node_id = %node_id.0, method, "dispatching node-agent RPC");

        let resp = self.client.post(&url).json(&params).send().await.map_err(|e| NodeAgentError::Other(e.into()))?;

        if resp.status().as_u16() == 400 {
            let text = resp.text().await.unwrap_or_default();
            return Err(NodeAgentError::InvalidArgument(text));
        }
        if !resp.status().is_success() {
            return Err(NodeAgentError::Other(anyhow::anyhow!("node agent returned status {}", resp.status())));
        }

        resp.json().await.map_err(|e| NodeAgentError::Other(e.into()))
    }
}

/// Stalwart mail admin API client.
pub struct HttpMail {
    client: Client,
    base_url: String,
}

impl HttpMail {
    /// Build a client against Stalwart's admin `base_url`.
    pub fn new(base_url: String) -> Self {
        Self { client: Client::new(), base_url }
    }

    async fn post(&self, path: &str, body: Value) -> Result<()> {
        let resp = self.client.post(format!("{}{path}", self.base_url)).json(&body).send().await.context("mail API request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("mail API {path} failed with status {}", resp.status());
        }
        Ok(())
    }
}

#[async_trait]
impl MailClient for HttpMail {
    async fn create_domain(&self, domain: &str) -> Result<()> {
        self.post("/api/domain", serde_json::json!({ "domain": domain })).await
    }
    async fn delete_domain(&self, domain: &str) -> Result<()> {
        self.post("/api/domain/delete", serde_json::json!({ "domain": domain })).await
    }
    async fn create_account(&self, email: &str, password_hash: &str) -> Result<()> {
        self.post("/api/account", serde_json::json!({ "email": email, "passwordHash": password_hash })).await
    }
    async fn delete_account(&self, email: &str) -> Result<()> {
        self.post("/api/account/delete", serde_json::json!({ "email": email })).await
    }
    async fn add_alias(&self, account_email: &str, alias: &str) -> Result<()> {
        self.post("/api/account/alias", serde_json::json!({ "account": account_email, "alias": alias })).await
    }
    async fn remove_alias(&self, account_email: &str, alias: &str) -> Result<()> {
        self.post("/api/account/alias/delete", serde_json::json!({ "account": account_email, "alias": alias })).await
    }
    async fn deploy_sieve(&self, account_email: &str, script: &str) -> Result<()> {
        self.post("/jmap/sieve", serde_json::json!({ "account": account_email, "script": script })).await
    }
    async fn delete_sieve(&self, account_email: &str) -> Result<()> {
        self.post("/jmap/sieve/delete", serde_json::json!({ "account": account_email })).await
    }
    async fn set_vacation(&self, account_email: &str, subject: &str, body: &str) -> Result<()> {
        self.post("/jmap/vacation", serde_json::json!({ "account": account_email, "subject": subject, "body": body })).await
    }
    async fn clear_vacation(&self, account_email: &str) -> Result<()> {
        self.post("/jmap/vacation/clear", serde_json::json!({ "account": account_email })).await
    }
}

/// Outbound webhook sender (Slack incoming-webhook compatible).
pub struct ReqwestWebhook {
    client: Client,
}

impl ReqwestWebhook {
    /// Build a sender with its own `reqwest::Client`.
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for ReqwestWebhook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookSender for ReqwestWebhook {
    async fn post(&self, url: &str, body: Value) -> Result<u16> {
        let resp = self.client.post(url).json(&body).send().await.context("webhook POST failed")?;
        Ok(resp.status().as_u16())
    }
}

/// AES-256-GCM tenant DEK unwrap/decrypt, keyed by a single operator
/// master key. Ciphertext layout is `nonce (12 bytes) || ciphertext`;
/// `aes-gcm` appends its own authentication tag to the ciphertext.
pub struct AesGcmEnvCodec {
    master_key: [u8; 32],
}

impl AesGcmEnvCodec {
    /// Build a codec keyed by `master_key`.
    pub fn new(master_key: [u8; 32]) -> Self {
        Self { master_key }
    }

    fn open(cipher: &Aes256Gcm, wrapped: &[u8]) -> Result<Vec<u8>> {
        if wrapped.len() < 12 {
            anyhow::bail!("ciphertext shorter than a nonce");
        }
        let (nonce_bytes, ciphertext) = wrapped.split_at(12);
        cipher.decrypt(Nonce::from_slice(nonce_bytes), ciphertext).map_err(|_| anyhow::anyhow!("AEAD decryption failed"))
    }
}

impl EnvVarCodec for AesGcmEnvCodec {
    fn unwrap_dek(&self, wrapped: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.master_key));
        Self::open(&cipher, wrapped)
    }

    fn decrypt(&self, dek: &[u8], ciphertext: &[u8]) -> Result<String> {
        if dek.len() != 32 {
            anyhow::bail!("unwrapped DEK must be 32 bytes, got {}", dek.len());
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(dek));
        let plaintext = Self::open(&cipher, ciphertext)?;
        String::from_utf8(plaintext).context("decrypted env var was not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes_gcm::aead::rand_core::RngCore;
    use aes_gcm::aead::OsRng;

    fn seal(cipher: &Aes256Gcm, plaintext: &[u8]) -> Vec<u8> {
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let mut out = nonce_bytes.to_vec();
        out.extend(cipher.encrypt(Nonce::from_slice(&nonce_bytes), plaintext).unwrap());
        out
    }

    #[test]
    fn round_trips_dek_unwrap_and_env_var_decrypt() {
        let master_key = [7u8; 32];
        let codec = AesGcmEnvCodec::new(master_key);

        let dek = [9u8; 32];
        let wrapped = seal(&Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&master_key)), &dek);
        let unwrapped = codec.unwrap_dek(&wrapped).unwrap();
        assert_eq!(unwrapped, dek);

        let ciphertext = seal(&Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&dek)), b"DATABASE_URL=postgres://x");
        let plaintext = codec.decrypt(&unwrapped, &ciphertext).unwrap();
        assert_eq!(plaintext, "DATABASE_URL=postgres://x");
    }

    #[test]
    fn rejects_truncated_ciphertext() {
        let codec = AesGcmEnvCodec::new([1u8; 32]);
        assert!(codec.unwrap_dek(&[0u8; 4]).is_err());
    }
}
