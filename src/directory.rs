use crate::account_id::AccountID;
use crate::command::worker::WorkerCommand;
use crate::config::SupervisorConfig;
use crate::supervisor::error::SupervisorError;
use crate::supervisor::Supervisor;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, error};

#[derive(Error, Debug, PartialEq)]
pub enum DirectoryError {
    #[error("a supervisor for account `{0}` is already registered")]
    DuplicateRegistration(AccountID),
}

/// Maps every account to its one [`Supervisor`].
///
/// Entries stay until they are explicitly unregistered, a stopped supervisor keeps its slot.
#[derive(Default)]
pub struct SupervisorDirectory {
    supervisors: RwLock<HashMap<AccountID, Arc<Supervisor>>>,
}

impl SupervisorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        account_id: AccountID,
        supervisor: Arc<Supervisor>,
    ) -> Result<(), DirectoryError> {
        let mut supervisors = self.write();
        if supervisors.contains_key(&account_id) {
            return Err(DirectoryError::DuplicateRegistration(account_id));
        }

        debug!(%account_id, "Registering supervisor");
        supervisors.insert(account_id, supervisor);
        Ok(())
    }

    /// Builds a supervisor for `account_id` and registers it. Fails before building anything
    /// if the account is already registered.
    pub fn create_supervisor(
        &self,
        account_id: AccountID,
        worker: WorkerCommand,
        config: SupervisorConfig,
        runtime: Handle,
    ) -> Result<Arc<Supervisor>, DirectoryError> {
        let mut supervisors = self.write();
        if supervisors.contains_key(&account_id) {
            return Err(DirectoryError::DuplicateRegistration(account_id));
        }

        let supervisor = Arc::new(Supervisor::new(account_id, worker, config, runtime));
        debug!(%account_id, "Registering supervisor");
        supervisors.insert(account_id, supervisor.clone());
        Ok(supervisor)
    }

    pub fn lookup(&self, account_id: &AccountID) -> Option<Arc<Supervisor>> {
        self.read().get(account_id).cloned()
    }

    pub fn unregister(&self, account_id: &AccountID) -> Option<Arc<Supervisor>> {
        debug!(%account_id, "Unregistering supervisor");
        self.write().remove(account_id)
    }

    /// Registered accounts, sorted.
    pub fn accounts(&self) -> Vec<AccountID> {
        let mut accounts = self.read().keys().copied().collect::<Vec<_>>();
        accounts.sort();
        accounts
    }

    /// Stops every registered supervisor, one after the other. Registrations are kept.
    ///
    /// Returns the accounts whose supervisor failed to stop cleanly. Blocks the calling thread,
    /// async callers use [`SupervisorDirectory::shutdown_all`].
    pub fn stop_all(&self) -> Vec<(AccountID, SupervisorError)> {
        self.registered()
            .into_iter()
            .filter_map(|(account_id, supervisor)| {
                supervisor
                    .stop()
                    .inspect_err(|err| error!(%account_id, "Stopping supervisor: {err}"))
                    .err()
                    .map(|err| (account_id, err))
            })
            .collect()
    }

    /// Async counterpart of [`SupervisorDirectory::stop_all`].
    pub async fn shutdown_all(&self) -> Vec<(AccountID, SupervisorError)> {
        let mut failures = Vec::new();
        for (account_id, supervisor) in self.registered() {
            if let Err(err) = supervisor.shutdown().await {
                error!(%account_id, "Stopping supervisor: {err}");
                failures.push((account_id, err));
            }
        }
        failures
    }

    // Stopping waits up to the stop timeout, so the lock is not held meanwhile.
    fn registered(&self) -> Vec<(AccountID, Arc<Supervisor>)> {
        self.read()
            .iter()
            .map(|(account_id, supervisor)| (*account_id, supervisor.clone()))
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<AccountID, Arc<Supervisor>>> {
        self.supervisors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<AccountID, Arc<Supervisor>>> {
        self.supervisors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    fn supervisor(account_id: AccountID) -> Arc<Supervisor> {
        Arc::new(Supervisor::new(
            account_id,
            WorkerCommand::new("true", std::env::temp_dir()),
            SupervisorConfig {
                forward_logs_to_console: false,
                ..Default::default()
            },
            Handle::current(),
        ))
    }

    fn account(id: u64) -> AccountID {
        AccountID::new(id).unwrap()
    }

    #[tokio::test]
    async fn register_lookup_unregister() {
        let directory = SupervisorDirectory::new();
        let first = supervisor(account(1));

        directory.register(account(1), first.clone()).unwrap();
        assert!(Arc::ptr_eq(&directory.lookup(&account(1)).unwrap(), &first));
        assert!(directory.lookup(&account(2)).is_none());

        let removed = directory.unregister(&account(1)).unwrap();
        assert!(Arc::ptr_eq(&removed, &first));
        assert!(directory.lookup(&account(1)).is_none());
        assert!(directory.unregister(&account(1)).is_none());
    }

    #[rstest]
    #[case::register(false)]
    #[case::create(true)]
    #[tokio::test]
    async fn duplicate_registration(#[case] via_create: bool) {
        let directory = SupervisorDirectory::new();
        let first = supervisor(account(7));
        directory.register(account(7), first.clone()).unwrap();

        let result = if via_create {
            directory
                .create_supervisor(
                    account(7),
                    WorkerCommand::new("true", std::env::temp_dir()),
                    SupervisorConfig::default(),
                    Handle::current(),
                )
                .map(|_| ())
        } else {
            directory.register(account(7), supervisor(account(7)))
        };

        assert_eq!(result, Err(DirectoryError::DuplicateRegistration(account(7))));
        // The live registration is untouched.
        assert!(Arc::ptr_eq(&directory.lookup(&account(7)).unwrap(), &first));

        directory.unregister(&account(7));
        directory.register(account(7), supervisor(account(7))).unwrap();
    }

    #[tokio::test]
    async fn create_supervisor_registers() {
        let directory = SupervisorDirectory::new();

        let created = directory
            .create_supervisor(
                account(3),
                WorkerCommand::new("true", std::env::temp_dir()),
                SupervisorConfig::default(),
                Handle::current(),
            )
            .unwrap();

        assert_eq!(created.account_id(), account(3));
        assert!(Arc::ptr_eq(&directory.lookup(&account(3)).unwrap(), &created));
    }

    #[tokio::test]
    async fn accounts_sorted_and_stop_all_idle() {
        let directory = SupervisorDirectory::new();
        for id in [30, 10, 20] {
            directory.register(account(id), supervisor(account(id))).unwrap();
        }

        assert_eq!(directory.accounts(), vec![account(10), account(20), account(30)]);
        assert_matches!(directory.stop_all().as_slice(), []);
        assert_matches!(directory.shutdown_all().await.as_slice(), []);
        assert_eq!(directory.accounts().len(), 3);
    }
}
