use std::{sync::Arc, time::Duration};

use humantime::format_duration;
use russh::{client, ChannelMsg, Disconnect};
use thiserror::Error;
use tracing::{debug, warn};

use crate::exec::RemoteExec;

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SshError {
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),
    #[error("Connecting to {host} timed out after {timeout:?}")]
    ConnectTimeout { host: String, timeout: Duration },
    #[error("Authentication as {0} failed")]
    AuthenticationFailed(String),
    #[error("Server refused to run the command")]
    ExecRefused,
}

#[derive(Debug, Clone)]
pub struct SshConfig {
    pub port: u16,
    pub connect_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        SshConfig {
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

// Host keys are not verified
struct AcceptingClient;

impl client::Handler for AcceptingClient {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Output and exit status of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub exit_status: Option<u32>,
}

/// Runs commands with password authentication, one fresh connection per call
#[derive(Clone)]
pub struct SshExecutor {
    username: String,
    password: String,
    config: SshConfig,
}

impl std::fmt::Debug for SshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutor")
            .field("username", &self.username)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SshExecutor {
    pub fn new<U, P>(username: U, password: P, config: SshConfig) -> Self
    where
        U: Into<String>,
        P: Into<String>,
    {
        Self {
            username: username.into(),
            password: password.into(),
            config,
        }
    }

    async fn connect(&self, host: &str) -> Result<client::Handle<AcceptingClient>, SshError> {
        debug!(
            "Connecting to {}:{} with a timeout of {}",
            host,
            self.config.port,
            format_duration(self.config.connect_timeout)
        );
        let config = Arc::new(client::Config::default());
        let connect = client::connect(config, (host, self.config.port), AcceptingClient);
        let mut session = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| SshError::ConnectTimeout {
                host: host.to_string(),
                timeout: self.config.connect_timeout,
            })??;
        debug!("Connected to {}, authenticating as {}", host, self.username);

        let auth = session
            .authenticate_password(self.username.clone(), self.password.clone())
            .await?;
        if !auth.success() {
            return Err(SshError::AuthenticationFailed(self.username.clone()));
        }
        Ok(session)
    }

    /// Run `command` on `host` with a pseudo terminal and collect its output
    #[tracing::instrument(skip(self), fields(username = %self.username))]
    pub async fn run(&self, host: &str, command: &str) -> Result<CommandOutput, SshError> {
        let session = self.connect(host).await?;

        let mut channel = session.channel_open_session().await?;
        channel.request_pty(false, "xterm", 80, 24, 0, 0, &[]).await?;
        channel.exec(true, command).await?;

        let mut stdout = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                ChannelMsg::Failure => return Err(SshError::ExecRefused),
                _ => {}
            }
        }

        // Servers may hang up on their own once the command is done
        if let Err(e) = session.disconnect(Disconnect::ByApplication, "", "en").await {
            debug!("Disconnecting from {} failed: {}", host, e);
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            exit_status,
        })
    }
}

#[async_trait::async_trait]
impl RemoteExec for SshExecutor {
    async fn exec(&self, host: &str, command: &str) -> anyhow::Result<String> {
        let output = self.run(host, command).await?;
        match output.exit_status {
            Some(0) => debug!("{} exited successfully", host),
            Some(status) => warn!("Command on {} exited with status {}", host, status),
            None => debug!("{} sent no exit status", host),
        }
        Ok(output.stdout)
    }
}
