use super::{container_error, finalise_error};
use crate::outcome::{ParamsState, SysState};
use anyhow::Result;
use serde::{Deserialize, Serialize};

const USERNAME_DEFAULT: &str = "chronos";

/// `[a-z_][a-z0-9_-]{0,31}`
fn valid_username(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 32
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'
        })
}

/** Emulates a passwd and group database holding only the sandbox user. */
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountOp {
    pub username: String,
    pub passwd: String,
    pub group: String,
}

impl AccountOp {
    pub fn to_system(&mut self, s: &mut SysState) -> Result<()> {
        let c = &s.state.container;
        let (Some(home), Some(shell)) = (&c.home, &c.shell) else {
            return Err(finalise_error("invalid container state"));
        };

        let username = if c.username.is_empty() {
            USERNAME_DEFAULT
        } else {
            c.username.as_str()
        };
        if !valid_username(username) {
            return Err(finalise_error(format!(
                "invalid user name {:?}",
                username
            )));
        }

        self.username = username.to_string();
        self.passwd = format!(
            "{}:x:{}:{}:Rampart:{}:{}\n",
            username,
            s.state.mapuid,
            s.state.mapgid,
            home.display(),
            shell.display()
        );
        self.group = format!("rampart:x:{}:\n", s.state.mapgid);
        Ok(())
    }

    pub fn to_container(&self, z: &mut ParamsState) -> Result<()> {
        let c = z.container();
        let (Some(home), Some(shell)) = (&c.home, &c.shell) else {
            return Err(container_error("invalid container state"));
        };

        z.env.insert("HOME".into(), home.display().to_string());
        z.env.insert("USER".into(), self.username.clone());
        z.env.insert("SHELL".into(), shell.display().to_string());
        z.params.dir = home.clone();
        z.params
            .place("/etc/passwd", self.passwd.clone().into_bytes())
            .place("/etc/group", self.group.clone().into_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerOp;
    use crate::outcome::ops::test_support::{config, state};
    use crate::system::SystemState;
    use crate::testing::{Recorder, SysRecorder};
    use rstest::*;
    use std::sync::Arc;

    #[rstest]
    #[case("chronos", true)]
    #[case("_apt", true)]
    #[case("user-name_9", true)]
    #[case("9", false)]
    #[case("Chronos", false)]
    #[case("", false)]
    #[case("a23456789012345678901234567890123", false)]
    fn test_valid_username(#[case] name: &str, #[case] want: bool) {
        assert_eq!(valid_username(name), want);
    }

    #[test]
    fn test_account_op() -> Result<()> {
        let mut config = config();
        if let Some(c) = config.container.as_mut() {
            c.username = String::new();
        }
        let state = state(&config);
        let d = Recorder::default();
        let mut sys = SystemState::new(state.uid(), Arc::new(SysRecorder::default()));

        let mut op = AccountOp::default();
        op.to_system(&mut SysState::new(&state, &config, &mut sys, &d))?;
        assert!(sys.ops().is_empty());
        assert!(d.calls().is_empty());

        let mut z = ParamsState::new(&state);
        op.to_container(&mut z)?;
        assert_eq!(z.env.get("USER").map(String::as_str), Some("chronos"));
        assert_eq!(
            z.params.dir,
            std::path::PathBuf::from("/data/data/org.chromium.Chromium")
        );
        assert_eq!(
            z.params.ops,
            vec![
                ContainerOp::Place {
                    target: "/etc/passwd".into(),
                    data: b"chronos:x:1000:100:Rampart:/data/data/org.chromium.Chromium:/run/current-system/sw/bin/zsh\n".to_vec(),
                },
                ContainerOp::Place {
                    target: "/etc/group".into(),
                    data: b"rampart:x:100:\n".to_vec(),
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_account_invalid_username() {
        let mut config = config();
        if let Some(c) = config.container.as_mut() {
            c.username = "9".into();
        }
        let state = state(&config);
        let d = Recorder::default();
        let mut sys = SystemState::new(state.uid(), Arc::new(SysRecorder::default()));

        let err = AccountOp::default()
            .to_system(&mut SysState::new(&state, &config, &mut sys, &d))
            .err();
        assert_eq!(
            err.map(|e| e.to_string()).as_deref(),
            Some(r#"invalid user name "9""#)
        );
    }
}
