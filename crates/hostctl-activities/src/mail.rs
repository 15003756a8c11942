//! `StalwartMailOp`: mail backend operations (§6).
//!
//! Stalwart is driven over its admin HTTP API (domain/account CRUD) and
//! JMAP (sieve scripts, vacation responses). One activity dispatches a
//! tagged operation enum rather than one activity per verb, mirroring
//! the shape of [`crate::node_agent::NodeAgentCall`] — the verb list is
//! long and each variant is a thin passthrough to [`MailClient`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Activity, ActivityError, Heartbeat};

/// The Stalwart surface `StalwartMailOp` drives.
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Create a mail domain.
    async fn create_domain(&self, domain: &str) -> anyhow::Result<()>;
    /// Delete a mail domain.
    async fn delete_domain(&self, domain: &str) -> anyhow::Result<()>;
    /// Create a mailbox account.
    async fn create_account(&self, email: &str, password_hash: &str) -> anyhow::Result<()>;
    /// Delete a mailbox account.
    async fn delete_account(&self, email: &str) -> anyhow::Result<()>;
    /// Add an address to an account's `emails` array (an alias).
    async fn add_alias(&self, account_email: &str, alias: &str) -> anyhow::Result<()>;
    /// Remove an address from an account's `emails` array.
    async fn remove_alias(&self, account_email: &str, alias: &str) -> anyhow::Result<()>;
    /// Deploy (or replace) a JMAP sieve script for `account_email`.
    async fn deploy_sieve(&self, account_email: &str, script: &str) -> anyhow::Result<()>;
    /// Delete the account's active sieve script.
    async fn delete_sieve(&self, account_email: &str) -> anyhow::Result<()>;
    /// Set a JMAP vacation auto-reply.
    async fn set_vacation(&self, account_email: &str, subject: &str, body: &str) -> anyhow::Result<()>;
    /// Clear a JMAP vacation auto-reply.
    async fn clear_vacation(&self, account_email: &str) -> anyhow::Result<()>;
}

/// The mail operation a [`StalwartMailOp`] invocation performs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MailOp {
    /// Create a mail domain.
    CreateDomain { domain: String },
    /// Delete a mail domain.
    DeleteDomain { domain: String },
    /// Create a mailbox account.
    CreateAccount { email: String, password_hash: String },
    /// Delete a mailbox account.
    DeleteAccount { email: String },
    /// Add an alias address to an account.
    AddAlias { account_email: String, alias: String },
    /// Remove an alias address from an account.
    RemoveAlias { account_email: String, alias: String },
    /// Deploy a sieve script.
    DeploySieve { account_email: String, script: String },
    /// Delete the active sieve script.
    DeleteSieve { account_email: String },
    /// Set a vacation auto-reply.
    SetVacation { account_email: String, subject: String, body: String },
    /// Clear a vacation auto-reply.
    ClearVacation { account_email: String },
}

/// Dispatches one [`MailOp`] to the configured [`MailClient`].
pub struct StalwartMailOp {
    mail: Arc<dyn MailClient>,
}

impl StalwartMailOp {
    /// Build the activity.
    pub fn new(mail: Arc<dyn MailClient>) -> Self {
        Self { mail }
    }
}

#[async_trait]
impl Activity for StalwartMailOp {
    type Input = MailOp;
    type Output = ();

    fn name(&self) -> &'static str {
        "StalwartMailOp"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<(), ActivityError> {
        let result = match input {
            MailOp::CreateDomain { domain } => self.mail.create_domain(&domain).await,
            MailOp::DeleteDomain { domain } => self.mail.delete_domain(&domain).await,
            MailOp::CreateAccount { email, password_hash } => self.mail.create_account(&email, &password_hash).await,
            MailOp::DeleteAccount { email } => self.mail.delete_account(&email).await,
            MailOp::AddAlias { account_email, alias } => self.mail.add_alias(&account_email, &alias).await,
            MailOp::RemoveAlias { account_email, alias } => self.mail.remove_alias(&account_email, &alias).await,
            MailOp::DeploySieve { account_email, script } => self.mail.deploy_sieve(&account_email, &script).await,
            MailOp::DeleteSieve { account_email } => self.mail.delete_sieve(&account_email).await,
            MailOp::SetVacation { account_email, subject, body } => {
                self.mail.set_vacation(&account_email, &subject, &body).await
            }
            MailOp::ClearVacation { account_email } => self.mail.clear_vacation(&account_email).await,
        };
        result.map_err(ActivityError::Retryable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeMail {
        ops: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MailClient for FakeMail {
        async fn create_domain(&self, domain: &str) -> anyhow::Result<()> {
            self.ops.lock().unwrap().push(format!("create_domain:{domain}"));
            Ok(())
        }
        async fn delete_domain(&self, _domain: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn create_account(&self, email: &str, _password_hash: &str) -> anyhow::Result<()> {
            self.ops.lock().unwrap().push(format!("create_account:{email}"));
            Ok(())
        }
        async fn delete_account(&self, _email: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn add_alias(&self, _account_email: &str, _alias: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn remove_alias(&self, _account_email: &str, _alias: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn deploy_sieve(&self, _account_email: &str, _script: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_sieve(&self, _account_email: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn set_vacation(&self, _account_email: &str, _subject: &str, _body: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn clear_vacation(&self, _account_email: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn create_domain_dispatches_to_the_right_client_method() {
        let mail = Arc::new(FakeMail::default());
        let activity = StalwartMailOp::new(mail.clone());
        let mut hb = Heartbeat::new(Arc::new(hostctl_engine::NullHeartbeatSink));

        activity
            .run(MailOp::CreateDomain { domain: "example.com".into() }, "key-1", &mut hb)
            .await
            .unwrap();

        assert_eq!(mail.ops.lock().unwrap().as_slice(), ["create_domain:example.com"]);
    }

    #[test]
    fn mail_op_serializes_with_snake_case_tag() {
        let op = MailOp::SetVacation {
            account_email: "a@example.com".into(),
            subject: "Out".into(),
            body: "Back soon".into(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "set_vacation");
    }
}
