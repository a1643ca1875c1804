//! In-memory collaborators (testing only)
//!
//! Each fake satisfies its trait contract without touching a network or a
//! cloud account, and records what was asked of it.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cloud::{CloudApi, CloudError, KeyPair};
use crate::http::{HttpError, HttpProbe, HttpResponse};
use crate::remote::{CommandOutput, RemoteError, RemoteShell, SshSession, SshTarget};

// ---------------------------------------------------------------------------
// FakeCloud
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CloudState {
    live_keys: BTreeSet<String>,
    created: Vec<String>,
    deleted: Vec<String>,
}

/// Key pairs and buckets held in memory.
#[derive(Debug, Default)]
pub struct FakeCloud {
    buckets: BTreeSet<String>,
    create_error: Option<String>,
    delete_error: Option<String>,
    state: Mutex<CloudState>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.buckets.insert(bucket.to_string());
        self
    }

    pub fn failing_create(mut self, message: &str) -> Self {
        self.create_error = Some(message.to_string());
        self
    }

    pub fn failing_delete(mut self, message: &str) -> Self {
        self.delete_error = Some(message.to_string());
        self
    }

    /// Key pairs registered and not yet deleted.
    pub fn live_keys(&self) -> Vec<String> {
        self.state.lock().unwrap().live_keys.iter().cloned().collect()
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn create_key_pair(&self, region: &str, name: &str) -> Result<KeyPair, CloudError> {
        if let Some(message) = &self.create_error {
            return Err(CloudError::CommandFailed {
                command: "aws ec2 import-key-pair".to_string(),
                stderr: message.clone(),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.live_keys.insert(name.to_string());
        state.created.push(name.to_string());
        Ok(KeyPair {
            name: name.to_string(),
            region: region.to_string(),
            public_key: format!("ssh-rsa AAAAFAKE {}", name),
            private_key_path: PathBuf::from("/nonexistent/keys").join(name),
        })
    }

    async fn delete_key_pair(&self, key: &KeyPair) -> Result<(), CloudError> {
        if let Some(message) = &self.delete_error {
            return Err(CloudError::CommandFailed {
                command: "aws ec2 delete-key-pair".to_string(),
                stderr: message.clone(),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.live_keys.remove(&key.name);
        state.deleted.push(key.name.clone());
        Ok(())
    }

    async fn bucket_exists(&self, _region: &str, bucket: &str) -> Result<bool, CloudError> {
        Ok(self.buckets.contains(bucket))
    }
}

// ---------------------------------------------------------------------------
// FakeShell
// ---------------------------------------------------------------------------

type Handler = Box<dyn Fn(&str) -> CommandOutput + Send + Sync>;

#[derive(Debug, Default)]
struct ShellState {
    connect_attempts: u32,
    commands: Vec<String>,
}

/// Remote shell whose reachability and command results are scripted.
pub struct FakeShell {
    /// Connects fail until this many attempts have been made; `None` never connects.
    reachable_after: Option<u32>,
    handler: Handler,
    state: Mutex<ShellState>,
}

impl Default for FakeShell {
    fn default() -> Self {
        Self {
            reachable_after: Some(0),
            handler: Box::new(|_| ok("")),
            state: Mutex::new(ShellState::default()),
        }
    }
}

/// Exit-zero output with the given stdout.
pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// Non-zero output with the given stderr.
pub fn failed(exit_code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

impl FakeShell {
    /// Reachable immediately; every command exits zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Never accepts a connection.
    pub fn unreachable() -> Self {
        Self {
            reachable_after: None,
            ..Self::default()
        }
    }

    /// Refuses the first `failures` connection attempts.
    pub fn reachable_after(failures: u32) -> Self {
        Self {
            reachable_after: Some(failures),
            ..Self::default()
        }
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) -> CommandOutput + Send + Sync + 'static,
    {
        self.handler = Box::new(handler);
        self
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().unwrap().connect_attempts
    }

    /// Commands run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn connect(&self, target: &SshTarget) -> Result<SshSession, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.connect_attempts += 1;
        match self.reachable_after {
            Some(failures) if state.connect_attempts > failures => Ok(SshSession {
                target: target.clone(),
            }),
            _ => Err(RemoteError::Transport {
                host: target.host.clone(),
                message: "Connection refused".to_string(),
            }),
        }
    }

    async fn run_command(
        &self,
        _session: &SshSession,
        command: &str,
    ) -> Result<CommandOutput, RemoteError> {
        self.state.lock().unwrap().commands.push(command.to_string());
        Ok((self.handler)(command))
    }
}

// ---------------------------------------------------------------------------
// FakeHttp
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct HttpState {
    requests: Vec<String>,
}

/// Serves scripted responses in order; the last one repeats forever.
#[derive(Debug)]
pub struct FakeHttp {
    responses: Vec<Result<HttpResponse, String>>,
    state: Mutex<HttpState>,
}

impl FakeHttp {
    pub fn new(responses: Vec<Result<HttpResponse, String>>) -> Self {
        Self {
            responses,
            state: Mutex::new(HttpState::default()),
        }
    }

    /// Always answers `status` with `body`.
    pub fn always(status: u16, body: &str) -> Self {
        Self::new(vec![Ok(HttpResponse {
            status,
            body: body.to_string(),
        })])
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl HttpProbe for FakeHttp {
    async fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        let index = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(url.to_string());
            state.requests.len() - 1
        };
        let scripted = self
            .responses
            .get(index)
            .or_else(|| self.responses.last())
            .cloned()
            .unwrap_or_else(|| Err("no scripted response".to_string()));
        scripted.map_err(|message| HttpError::Transport {
            url: url.to_string(),
            message,
        })
    }
}
