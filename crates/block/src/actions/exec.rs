//! Exec custom actions: shell commands gated behind the process-wide
//! `allow_exec` flag and a metacharacter sanitizer.

use super::{render_template, ActionContext, ActionDecl};
use crate::{BlockError, Payload};

const EXEC_TIMEOUT_SECS: u64 = 30;

/// Characters that end the command before it runs. The command string is
/// a single argument to `sh -c`; none of these have a legitimate use in
/// a declared action after template expansion.
const FORBIDDEN: &[char] = &[
    '&', ';', '|', '$', '>', '<', '`', '\\', '\n', '\r', '\0',
];

pub async fn run(
    decl: &ActionDecl,
    payload: &Payload,
    ctx: &ActionContext<'_>,
) -> Result<(), BlockError> {
    if !ctx.config.allow_exec {
        return Err(BlockError::ExecDisabled);
    }
    let cmd_template = decl
        .cmd
        .as_deref()
        .ok_or_else(|| BlockError::Validation("exec action requires a cmd".to_string()))?;

    let command = render_template(cmd_template, payload)?;
    sanitize(&command)?;

    let output = tokio::time::timeout(
        std::time::Duration::from_secs(EXEC_TIMEOUT_SECS),
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(ctx.site_dir)
            .output(),
    )
    .await
    .map_err(|_| BlockError::Timeout(EXEC_TIMEOUT_SECS))?
    .map_err(|e| BlockError::Exec(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BlockError::Exec(format!(
            "exit {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    tracing::debug!(command = %command, "exec action completed");
    Ok(())
}

/// Reject empty commands and shell metacharacters. A hard failure that
/// never degrades silently.
pub fn sanitize(command: &str) -> Result<(), BlockError> {
    if command.trim().is_empty() {
        return Err(BlockError::Shell("empty command".to_string()));
    }
    if let Some(c) = command.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(BlockError::Shell(format!(
            "forbidden character {:?} in command",
            c
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use livemark_core::RuntimeConfig;

    #[test]
    fn sanitize_rejects_every_metacharacter() {
        for c in FORBIDDEN {
            let cmd = format!("echo hi{c}there");
            assert!(
                matches!(sanitize(&cmd), Err(BlockError::Shell(_))),
                "expected rejection for {c:?}"
            );
        }
        assert!(sanitize("").is_err());
        assert!(sanitize("   ").is_err());
        assert!(sanitize("./script --count 3").is_ok());
    }

    #[tokio::test]
    async fn exec_requires_allow_flag() {
        let decl = ActionDecl {
            kind: super::super::ActionKind::Exec,
            source: None,
            statement: None,
            url: None,
            method: None,
            body: None,
            cmd: Some("echo hi".into()),
            params: IndexMap::new(),
            confirm: None,
        };
        let config = RuntimeConfig::default();
        let client = reqwest::Client::new();
        let ctx = super::super::ActionContext {
            registry: None,
            config: &config,
            site_dir: std::path::Path::new("."),
            http: &client,
        };
        let err = run(&decl, &Payload::new(), &ctx).await.unwrap_err();
        assert!(matches!(err, BlockError::ExecDisabled));
    }

    #[tokio::test]
    async fn exec_runs_in_site_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();

        let decl = ActionDecl {
            kind: super::super::ActionKind::Exec,
            source: None,
            statement: None,
            url: None,
            method: None,
            body: None,
            cmd: Some("test -f marker.txt".into()),
            params: IndexMap::new(),
            confirm: None,
        };
        let config = RuntimeConfig {
            allow_exec: true,
            ..RuntimeConfig::default()
        };
        let client = reqwest::Client::new();
        let ctx = super::super::ActionContext {
            registry: None,
            config: &config,
            site_dir: dir.path(),
            http: &client,
        };
        run(&decl, &Payload::new(), &ctx).await.unwrap();
    }

    #[tokio::test]
    async fn failing_command_reports_stderr() {
        let decl = ActionDecl {
            kind: super::super::ActionKind::Exec,
            source: None,
            statement: None,
            url: None,
            method: None,
            body: None,
            cmd: Some("ls /definitely-not-a-real-path-xyz".into()),
            params: IndexMap::new(),
            confirm: None,
        };
        let config = RuntimeConfig {
            allow_exec: true,
            ..RuntimeConfig::default()
        };
        let client = reqwest::Client::new();
        let ctx = super::super::ActionContext {
            registry: None,
            config: &config,
            site_dir: std::path::Path::new("."),
            http: &client,
        };
        let err = run(&decl, &Payload::new(), &ctx).await.unwrap_err();
        match err {
            BlockError::Exec(msg) => assert!(msg.contains("exit"), "got: {msg}"),
            other => panic!("expected Exec error, got: {other:?}"),
        }
    }
}
