//! Before/After actions and diagnostics driven by configured command lists

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};
use warden_api::{HostIdentity, Session};
use warden_config::ActionsConfig;
use warden_host_api::{HostConnection, HostError, HostInspector, HostResult, SessionActions};

/// Output marker of an active protection status
const PROTECTED_MARKER: &str = "Protected";

/// Values substituted into command templates
#[derive(Debug, Default)]
struct Placeholders<'a> {
    host: &'a str,
    session: Option<String>,
    product: Option<String>,
    streaming: Option<bool>,
}

impl Placeholders<'_> {
    fn apply(&self, template: &str) -> String {
        let mut command = template.replace("{host}", self.host);
        if let Some(session) = &self.session {
            command = command.replace("{session}", session);
        }
        if let Some(product) = &self.product {
            command = command.replace("{product}", product);
        }
        if let Some(streaming) = self.streaming {
            command = command.replace("{streaming}", &streaming.to_string());
        }
        command
    }
}

/// Runs the configured before/after command lists on the host.
///
/// Every command is attempted; the result is true only if all succeed.
pub struct CommandActions {
    before: Vec<String>,
    after: Vec<String>,
    after_delay: Duration,
}

impl CommandActions {
    pub fn new(before: Vec<String>, after: Vec<String>, after_delay: Duration) -> Self {
        Self {
            before,
            after,
            after_delay,
        }
    }

    pub fn from_config(config: &ActionsConfig) -> Self {
        Self::new(
            config.before.clone(),
            config.after.clone(),
            config.after_delay,
        )
    }

    async fn run_all(
        conn: &dyn HostConnection,
        templates: &[String],
        placeholders: &Placeholders<'_>,
    ) -> HostResult<bool> {
        let mut all_ok = true;
        for template in templates {
            let command = placeholders.apply(template);
            let output = conn.run(&command).await?;
            if output.is_success() {
                debug!(command = %command, "Command succeeded");
            } else {
                all_ok = false;
                warn!(
                    command = %command,
                    code = ?output.status.code,
                    stderr = %output.stderr.trim(),
                    "Command failed"
                );
            }
        }
        Ok(all_ok)
    }
}

#[async_trait]
impl SessionActions for CommandActions {
    async fn before_session(
        &self,
        conn: &dyn HostConnection,
        host: &HostIdentity,
        session: &Session,
    ) -> HostResult<bool> {
        info!(commands = self.before.len(), "Running before commands");
        let placeholders = Placeholders {
            host: host.name.as_str(),
            session: Some(session.id.to_string()),
            product: Some(session.product_id.to_string()),
            streaming: None,
        };
        Self::run_all(conn, &self.before, &placeholders).await
    }

    async fn after_session(
        &self,
        conn: &dyn HostConnection,
        host: &HostIdentity,
        streaming: bool,
    ) -> HostResult<bool> {
        tokio::time::sleep(self.after_delay).await;

        info!(commands = self.after.len(), streaming, "Running after commands");
        let placeholders = Placeholders {
            host: host.name.as_str(),
            streaming: Some(streaming),
            ..Default::default()
        };
        Self::run_all(conn, &self.after, &placeholders).await
    }
}

/// Read-only protection and restriction checks
pub struct CommandInspector {
    protection_status: Option<String>,
    restriction_checks: Vec<String>,
}

impl CommandInspector {
    pub fn new(protection_status: Option<String>, restriction_checks: Vec<String>) -> Self {
        Self {
            protection_status,
            restriction_checks,
        }
    }

    pub fn from_config(config: &ActionsConfig) -> Self {
        Self::new(
            config.protection_status.clone(),
            config.restriction_checks.clone(),
        )
    }
}

#[async_trait]
impl HostInspector for CommandInspector {
    async fn protection_mode(&self, conn: &dyn HostConnection) -> HostResult<bool> {
        let Some(command) = &self.protection_status else {
            return Err(HostError::Internal("No protection status command".into()));
        };

        let output = conn.run(command).await?;
        if !output.is_success() {
            return Err(HostError::CommandFailed {
                command: command.clone(),
                code: output.status.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout.contains(PROTECTED_MARKER))
    }

    async fn restrictions_ok(&self, conn: &dyn HostConnection) -> HostResult<bool> {
        for command in &self.restriction_checks {
            if !conn.run(command).await?.is_success() {
                debug!(command = %command, "Restriction not in place");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use warden_api::{DESKTOP_PRODUCT_ID, SessionStatus};
    use warden_authority::mock_session;
    use warden_host_api::{CommandOutput, MockConnection, MockHostState};

    fn conn() -> (Arc<MockHostState>, MockConnection) {
        let state = Arc::new(MockHostState::default());
        (state.clone(), MockConnection::new(state))
    }

    fn host() -> HostIdentity {
        HostIdentity::new("PC-01", "10.0.0.1", "admin", "")
    }

    fn commands(state: &MockHostState) -> Vec<String> {
        state.commands.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn before_substitutes_session_values() {
        let (state, conn) = conn();
        let actions = CommandActions::new(
            vec!["log {host} {session} {product}".into(), "sdcmd /enter C".into()],
            vec![],
            Duration::ZERO,
        );
        let session = mock_session(DESKTOP_PRODUCT_ID, SessionStatus::New);

        let ok = actions.before_session(&conn, &host(), &session).await.unwrap();

        assert!(ok);
        assert_eq!(
            commands(&state),
            vec![
                format!("log PC-01 {} {}", session.id, DESKTOP_PRODUCT_ID),
                "sdcmd /enter C".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn failing_command_does_not_stop_the_list() {
        let (state, conn) = conn();
        state
            .outputs
            .lock()
            .unwrap()
            .insert("first".into(), CommandOutput::failure(1, "denied"));
        let actions = CommandActions::new(
            vec![],
            vec!["first".into(), "reboot --streaming={streaming}".into()],
            Duration::ZERO,
        );

        let ok = actions.after_session(&conn, &host(), true).await.unwrap();

        assert!(!ok);
        assert_eq!(commands(&state), vec!["first", "reboot --streaming=true"]);
    }

    #[tokio::test]
    async fn protection_mode_reads_marker() {
        let (state, conn) = conn();
        state.outputs.lock().unwrap().insert(
            "sdcmd /list".into(),
            CommandOutput::success("Drive C: Protected\r\nDrive D: Not protected\r\n"),
        );
        let inspector = CommandInspector::new(Some("sdcmd /list".into()), vec![]);

        assert!(inspector.protection_mode(&conn).await.unwrap());
    }

    #[tokio::test]
    async fn protection_mode_without_command_is_unknown() {
        let (_, conn) = conn();
        let inspector = CommandInspector::new(None, vec![]);

        assert!(inspector.protection_mode(&conn).await.is_err());
        assert!(inspector.restrictions_ok(&conn).await.unwrap());
    }

    #[tokio::test]
    async fn restrictions_fail_on_first_missing() {
        let (state, conn) = conn();
        state
            .outputs
            .lock()
            .unwrap()
            .insert("check a".into(), CommandOutput::failure(1, ""));
        let inspector =
            CommandInspector::new(None, vec!["check a".into(), "check b".into()]);

        assert!(!inspector.restrictions_ok(&conn).await.unwrap());
        assert_eq!(commands(&state), vec!["check a"]);
    }
}
