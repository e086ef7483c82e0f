use super::listener::{ListenerError, LogListener};
use super::record::{LogRecord, RecordLevel};
use crate::account_id::AccountID;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

/// Re-emits the worker's records as operator logs tagged with the account.
pub struct ConsoleForwarder {
    account_id: AccountID,
}

impl ConsoleForwarder {
    pub fn new(account_id: AccountID) -> Self {
        Self { account_id }
    }
}

#[async_trait]
impl LogListener for ConsoleForwarder {
    async fn on_log(&self, record: LogRecord) -> Result<(), ListenerError> {
        let account_id = self.account_id;
        let message = record.message();

        match record.level() {
            Some(RecordLevel::Debug) => debug!(%account_id, "{message}"),
            Some(RecordLevel::Warning) => warn!(%account_id, "{message}"),
            Some(RecordLevel::Error | RecordLevel::Fatal) => error!(%account_id, "{message}"),
            Some(RecordLevel::Info | RecordLevel::Other(_)) | None => {
                info!(%account_id, "{message}")
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn forwards_with_mapped_level() {
        let forwarder = ConsoleForwarder::new(AccountID::new(10001).unwrap());

        for line in [
            "[2024-01-01 00:00:00] [WARNING]: disk almost full",
            "[2024-01-01 00:00:00] [FATAL]: giving up",
            "[2024-01-01 00:00:00] [NOTICE]: something odd",
            "plain text",
        ] {
            forwarder.on_log(LogRecord::parse(line)).await.unwrap();
        }

        assert!(logs_contain("WARN"));
        assert!(logs_contain("disk almost full"));
        assert!(logs_contain("ERROR"));
        assert!(logs_contain("giving up"));
        assert!(logs_contain("something odd"));
        assert!(logs_contain("plain text"));
        assert!(logs_contain("account_id=10001"));
        assert!(!logs_contain("[FATAL]"));
    }
}
