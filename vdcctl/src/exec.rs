use std::io::Write;

use anyhow::Context;
use tracing::info;

use crate::targets::TargetList;

#[async_trait::async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run `command` on `host`, returning what it wrote to its terminal
    async fn exec(&self, host: &str, command: &str) -> anyhow::Result<String>;
}

/// Prefix every line of `output` with `username@host: `, `None` for empty output
pub fn tag_output(username: &str, host: &str, output: &str) -> Option<String> {
    if output.is_empty() {
        return None;
    }

    let mut tagged = String::with_capacity(output.len());
    for line in output.lines() {
        tagged.push_str(username);
        tagged.push('@');
        tagged.push_str(host);
        tagged.push_str(": ");
        tagged.push_str(line);
        tagged.push('\n');
    }
    Some(tagged)
}

/// Run `command` on each host in order; the first failing host aborts the run.
pub async fn run<E, W>(
    executor: &E,
    username: &str,
    hosts: &TargetList,
    command: &str,
    out: &mut W,
) -> anyhow::Result<()>
where
    E: RemoteExec + ?Sized,
    W: Write,
{
    for host in hosts.iter() {
        info!("Running {:?} on {}", command, host);
        let output = executor
            .exec(host, command)
            .await
            .with_context(|| format!("Failed to run command on {host}"))?;
        if let Some(tagged) = tag_output(username, host, &output) {
            out.write_all(tagged.as_bytes())?;
        }
    }
    Ok(())
}
