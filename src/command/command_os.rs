use tracing::{debug, warn};

use crate::account_id::AccountID;
use crate::command::worker::WorkerCommand;
use std::io::{self, PipeReader};
use std::process::{Child, Command, ExitStatus, Stdio};

use super::error::CommandError;

////////////////////////////////////////////////////////////////////////////////////
// States for Started/Not Started Command
////////////////////////////////////////////////////////////////////////////////////
pub struct CommandOSNotStarted {
    cmd: Command,
    account_id: AccountID,
}
pub struct CommandOSStarted {
    account_id: AccountID,
    process: Child,
    output: Option<PipeReader>,
}

////////////////////////////////////////////////////////////////////////////////////
// Not Started Command OS
////////////////////////////////////////////////////////////////////////////////////
impl CommandOSNotStarted {
    pub fn new(account_id: AccountID, worker: &WorkerCommand) -> Self {
        let mut cmd = Command::new(&worker.bin);
        cmd.args(&worker.args)
            .envs(&worker.env)
            .current_dir(&worker.working_dir)
            .stdin(Stdio::null());

        Self { cmd, account_id }
    }

    /// Spawns the worker with stdout and stderr sharing the write end of one pipe, so both
    /// streams reach the reader as a single ordered sequence of lines.
    pub fn start(self) -> Result<CommandOSStarted, CommandError> {
        let Self {
            mut cmd,
            account_id,
        } = self;

        let (reader, writer) = io::pipe()?;
        cmd.stdout(writer.try_clone()?).stderr(writer);
        let process = cmd.spawn().map_err(CommandError::SpawnError)?;
        // The command keeps the parent's copies of the write end alive until dropped, and the
        // reader only sees EOF once every write end is closed.
        drop(cmd);

        debug!(%account_id, pid = process.id(), "Worker spawned");
        Ok(CommandOSStarted {
            account_id,
            process,
            output: Some(reader),
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////
// Started Command OS
////////////////////////////////////////////////////////////////////////////////////
impl CommandOSStarted {
    pub fn get_pid(&self) -> u32 {
        self.process.id()
    }

    /// Hands the merged output stream over to the caller. It can only be taken once.
    pub fn take_output(&mut self) -> Result<PipeReader, CommandError> {
        self.output
            .take()
            .ok_or(CommandError::StreamPipeError("output".to_string()))
    }

    /// Exit code of the worker if it already exited, `None` while it is running.
    pub fn exit_code(&mut self) -> Result<Option<i32>, CommandError> {
        Ok(self.process.try_wait()?.map(exit_code))
    }

    pub fn is_running(&mut self) -> bool {
        self.process.try_wait().is_ok_and(|v| v.is_none())
    }

    /// Forcefully kills the worker and reaps it.
    pub fn kill_and_wait(&mut self) -> Result<i32, CommandError> {
        if let Err(err) = self.process.kill() {
            // The process exiting in between is reported as InvalidInput, the wait below
            // still collects its status.
            warn!(account_id = %self.account_id, "Killing worker {}: {err}", self.get_pid());
        }
        Ok(exit_code(self.process.wait()?))
    }

    /// Asks the worker to terminate gracefully.
    #[cfg(target_family = "unix")]
    pub fn terminate(&mut self) -> Result<(), CommandError> {
        use nix::{sys::signal, unistd::Pid};
        let pid = self.get_pid();

        signal::kill(Pid::from_raw(pid as i32), signal::SIGTERM)
            .map_err(|e| CommandError::from(std::io::Error::from(e)))
    }

    /// On Windows there is no direct equivalent to sending SIGTERM to a console process, so
    /// the worker is killed right away.
    #[cfg(target_family = "windows")]
    pub fn terminate(&mut self) -> Result<(), CommandError> {
        self.process.kill().map_err(CommandError::from)
    }
}

/// Exit code of a finished process. A process ended by a signal reports the negated signal
/// number.
pub fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(target_family = "unix")]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .or_else(|| status.signal().map(|signal| -signal))
            .unwrap_or_default()
    }
    #[cfg(not(target_family = "unix"))]
    {
        status.code().unwrap_or_default()
    }
}

#[cfg(all(test, target_family = "unix"))]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::process::ExitStatusExt;
    use std::thread::sleep;
    use std::time::Duration;

    fn account() -> AccountID {
        AccountID::new(10001).unwrap()
    }

    fn sh(script: &str) -> WorkerCommand {
        WorkerCommand::new("sh", std::env::temp_dir())
            .with_args(vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn merges_stdout_and_stderr() {
        let worker = sh("echo out; echo err 1>&2; echo out2");
        let mut started = CommandOSNotStarted::new(account(), &worker)
            .start()
            .unwrap();

        let mut output = String::new();
        started
            .take_output()
            .unwrap()
            .read_to_string(&mut output)
            .unwrap();

        assert_eq!(output, "out\nerr\nout2\n");
        assert!(started.take_output().is_err());
        assert_eq!(started.kill_and_wait().unwrap(), 0);
    }

    #[test]
    fn runs_in_working_dir_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let worker = sh("pwd; echo $WORKER_VAR")
            .with_env([("WORKER_VAR".to_string(), "hello".to_string())].into());
        let worker = WorkerCommand {
            working_dir: dir.path().to_path_buf(),
            ..worker
        };

        let mut started = CommandOSNotStarted::new(account(), &worker).start().unwrap();
        let mut output = String::new();
        started
            .take_output()
            .unwrap()
            .read_to_string(&mut output)
            .unwrap();

        let expected_dir = dir.path().canonicalize().unwrap();
        assert!(output.contains(expected_dir.to_str().unwrap()), "{output}");
        assert!(output.contains("hello"));
    }

    #[test]
    fn spawn_missing_binary_fails() {
        let worker = WorkerCommand::new("non-existent-worker-binary", std::env::temp_dir());
        let result = CommandOSNotStarted::new(account(), &worker).start();

        assert!(matches!(result, Err(CommandError::SpawnError(_))));
    }

    #[test]
    fn terminate_reports_negative_signal() {
        let mut started = CommandOSNotStarted::new(account(), &sh("exec sleep 30"))
            .start()
            .unwrap();
        assert!(started.is_running());
        assert_eq!(started.exit_code().unwrap(), None);

        started.terminate().unwrap();
        let code = loop {
            if let Some(code) = started.exit_code().unwrap() {
                break code;
            }
            sleep(Duration::from_millis(20));
        };

        assert_eq!(code, -15);
        assert!(!started.is_running());
    }

    #[test]
    fn exit_code_conversion() {
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        // wait status layout: exit code in the second byte
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(9)), -9);
    }
}
