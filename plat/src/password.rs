//! Local account password changes for `plat user-password` and the
//! credential-change REST handler.
//!
//! The flow is: make sure the account exists (`useradd`), answer the
//! `passwd` prompts on a pseudo-terminal, then copy the credential database
//! to flash. The copy runs after every attempt that got as far as spawning,
//! whatever the outcome, and its failure never changes the outcome.

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::envelope::action_result;
use crate::core::rules::passwd_rules;
use crate::core::types::SessionOutcome;
use crate::io::config::PasswordConfig;
use crate::io::persist::persist_best_effort;
use crate::io::process::{CommandRunner, CommandSpec};
use crate::io::session::{SessionSpawner, drive_with};

/// Why a request was refused before anything was spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidCredential {
    EmptyUser,
    EmptyPassword,
    /// Would be parsed as an option by `useradd`/`passwd`.
    UserLooksLikeOption,
    /// Whitespace, `:`, `/` or control characters would corrupt the passwd file.
    UserHasForbiddenChars,
    /// A newline would answer the next prompt early.
    PasswordHasNewline,
}

pub fn validate_credentials(user: &str, new_password: &str) -> Result<(), InvalidCredential> {
    if user.is_empty() {
        return Err(InvalidCredential::EmptyUser);
    }
    if new_password.is_empty() {
        return Err(InvalidCredential::EmptyPassword);
    }
    if user.starts_with('-') {
        return Err(InvalidCredential::UserLooksLikeOption);
    }
    if user
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == ':' || c == '/')
    {
        return Err(InvalidCredential::UserHasForbiddenChars);
    }
    if new_password.contains(['\n', '\r']) {
        return Err(InvalidCredential::PasswordHasNewline);
    }
    Ok(())
}

/// Set `user`'s password to `new_password`, creating the account if needed.
#[instrument(skip_all, fields(user = %user))]
pub fn change_password<R: CommandRunner, S: SessionSpawner>(
    runner: &R,
    spawner: &S,
    cfg: &PasswordConfig,
    user: &str,
    new_password: &str,
) -> SessionOutcome {
    if let Err(reason) = validate_credentials(user, new_password) {
        warn!(?reason, "rejected password change request");
        return SessionOutcome::Failure;
    }

    ensure_user(runner, cfg, user);

    let spec = CommandSpec::new(&cfg.passwd).arg(user).env("LC_ALL", "C");
    let outcome = drive_with(
        spawner,
        &spec,
        &passwd_rules(new_password),
        cfg.step_timeout(),
    );
    info!(?outcome, "passwd session finished");

    persist_best_effort(&cfg.credential_files, &cfg.persist_dir);
    outcome
}

/// Run `useradd`; an existing account makes it fail, which is expected.
fn ensure_user<R: CommandRunner>(runner: &R, cfg: &PasswordConfig, user: &str) {
    let spec = CommandSpec::new(&cfg.useradd).arg(user);
    match runner.run(&spec, cfg.useradd_timeout()) {
        Ok(result) if result.success() => info!("account created"),
        Ok(result) => debug!(
            exit_code = ?result.exit_code,
            timed_out = result.timed_out,
            stderr = %result.stderr_lossy().trim_end(),
            "useradd did not create an account"
        ),
        Err(e) => warn!(err = %e, "useradd could not run"),
    }
}

/// REST handler shape: `{"user", "newpassword"}` in, `{"result": ...}` out.
pub fn user_password_action<R: CommandRunner, S: SessionSpawner>(
    runner: &R,
    spawner: &S,
    cfg: &PasswordConfig,
    body: &Value,
) -> Value {
    let user = body.get("user").and_then(Value::as_str);
    let new_password = body.get("newpassword").and_then(Value::as_str);
    let (Some(user), Some(new_password)) = (user, new_password) else {
        warn!("password request missing user or newpassword");
        return action_result(false);
    };
    let outcome = change_password(runner, spawner, cfg, user, new_password);
    action_result(outcome.is_success())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use serde_json::json;

    use super::*;
    use crate::test_support::{ScriptedRunner, ScriptedSpawner};

    struct Fixture {
        temp: tempfile::TempDir,
        cfg: PasswordConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let etc = temp.path().join("etc");
            fs::create_dir_all(&etc).expect("mkdir");
            fs::write(etc.join("passwd"), "admin:x:1000:1000::/home/admin:/bin/sh\n")
                .expect("write passwd");
            fs::write(etc.join("shadow"), "admin:$6$new:19000::::::\n").expect("write shadow");
            let cfg = PasswordConfig {
                useradd: PathBuf::from("useradd"),
                passwd: PathBuf::from("passwd"),
                credential_files: vec![etc.join("passwd"), etc.join("shadow")],
                persist_dir: temp.path().join("mnt/data/etc"),
                ..PasswordConfig::default()
            };
            Self { temp, cfg }
        }

        fn persisted(&self) -> bool {
            let dir: &Path = &self.cfg.persist_dir;
            dir.join("passwd").exists() && dir.join("shadow").exists()
        }
    }

    fn passwd_success() -> ScriptedSpawner {
        ScriptedSpawner::new([
            "Changing password for admin\nNew password: ",
            "Re-enter new password: ",
            "passwd: password changed.\n",
        ])
    }

    #[test]
    fn successful_change_persists_credentials() {
        let fixture = Fixture::new();
        let runner = ScriptedRunner::new();
        let spawner = passwd_success();

        let outcome = change_password(&runner, &spawner, &fixture.cfg, "admin", "s3cret");

        assert_eq!(outcome, SessionOutcome::Success);
        assert_eq!(runner.calls(), vec!["useradd admin"]);
        assert_eq!(spawner.spawned(), vec!["passwd admin"]);
        assert_eq!(spawner.sent(), vec!["s3cret", "s3cret"]);
        assert!(fixture.persisted());
    }

    #[test]
    fn unchanged_password_fails_and_still_persists() {
        let fixture = Fixture::new();
        let spawner = ScriptedSpawner::new([
            "New password: ",
            "Re-enter new password: ",
            "passwd: password unchanged\n",
        ]);

        let outcome =
            change_password(&ScriptedRunner::new(), &spawner, &fixture.cfg, "admin", "s3cret");

        assert_eq!(outcome, SessionOutcome::Failure);
        assert!(fixture.persisted());
    }

    #[test]
    fn spawn_error_still_persists() {
        let fixture = Fixture::new();
        let outcome = change_password(
            &ScriptedRunner::new(),
            &ScriptedSpawner::failing(),
            &fixture.cfg,
            "admin",
            "s3cret",
        );
        assert_eq!(outcome, SessionOutcome::SpawnError);
        assert!(fixture.persisted());
    }

    #[test]
    fn persistence_failure_does_not_mask_success() {
        let mut fixture = Fixture::new();
        let blocker = fixture.temp.path().join("blocker");
        fs::write(&blocker, "").expect("write");
        fixture.cfg.persist_dir = blocker.join("etc");

        let outcome = change_password(
            &ScriptedRunner::new(),
            &passwd_success(),
            &fixture.cfg,
            "admin",
            "s3cret",
        );
        assert_eq!(outcome, SessionOutcome::Success);
    }

    #[test]
    fn invalid_input_spawns_nothing() {
        let fixture = Fixture::new();
        let runner = ScriptedRunner::new();
        let spawner = passwd_success();

        let requests = [
            ("", "pw"),
            ("admin", ""),
            ("-o", "pw"),
            ("a b", "pw"),
            ("admin", "a\nb"),
        ];
        for (user, password) in requests {
            let outcome = change_password(&runner, &spawner, &fixture.cfg, user, password);
            assert_eq!(outcome, SessionOutcome::Failure, "user={user:?}");
        }
        assert!(runner.calls().is_empty());
        assert!(spawner.spawned().is_empty());
        assert!(!fixture.persisted());
    }

    #[test]
    fn handler_maps_outcome_to_result() {
        let fixture = Fixture::new();
        let body = json!({"user": "admin", "newpassword": "s3cret"});
        assert_eq!(
            user_password_action(&ScriptedRunner::new(), &passwd_success(), &fixture.cfg, &body),
            json!({"result": "success"})
        );

        let silent = ScriptedSpawner::new(Vec::<&str>::new());
        assert_eq!(
            user_password_action(&ScriptedRunner::new(), &silent, &fixture.cfg, &body),
            json!({"result": "fail"})
        );
    }

    #[test]
    fn handler_rejects_missing_fields() {
        let fixture = Fixture::new();
        let spawner = passwd_success();
        let value = user_password_action(
            &ScriptedRunner::new(),
            &spawner,
            &fixture.cfg,
            &json!({"user": "admin"}),
        );
        assert_eq!(value, json!({"result": "fail"}));
        assert!(spawner.spawned().is_empty());
    }

    #[test]
    fn validation_reasons() {
        assert_eq!(validate_credentials("admin", "pw"), Ok(()));
        assert_eq!(
            validate_credentials("ad:min", "pw"),
            Err(InvalidCredential::UserHasForbiddenChars)
        );
        assert_eq!(
            validate_credentials("--help", "pw"),
            Err(InvalidCredential::UserLooksLikeOption)
        );
        assert_eq!(
            validate_credentials("admin", "pw\r"),
            Err(InvalidCredential::PasswordHasNewline)
        );
    }
}
