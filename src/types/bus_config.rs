use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/** Message bus proxy policy for one bus. */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    #[serde(default)]
    pub see: Vec<String>,
    #[serde(default)]
    pub talk: Vec<String>,
    #[serde(default)]
    pub own: Vec<String>,
    #[serde(default)]
    pub call: BTreeMap<String, String>,
    #[serde(default)]
    pub broadcast: BTreeMap<String, String>,
    #[serde(default)]
    pub log: bool,
    #[serde(default)]
    pub filter: bool,
}

impl BusConfig {
    /// Session bus policy for an application that brought none of its own.
    pub fn for_app(id: &str) -> Self {
        Self {
            talk: vec![
                "org.freedesktop.DBus".into(),
                "org.freedesktop.Notifications".into(),
            ],
            own: vec![
                format!("{}.*", id),
                format!("org.mpris.MediaPlayer2.{}.*", id),
            ],
            call: BTreeMap::from([(
                "org.freedesktop.portal.*".to_string(),
                "*".to_string(),
            )]),
            broadcast: BTreeMap::from([(
                "org.freedesktop.portal.*".to_string(),
                "@/org/freedesktop/portal/*".to_string(),
            )]),
            filter: true,
            ..Self::default()
        }
    }

    /// Returns the first name that is not a valid interface name, if any.
    pub fn check_interfaces(&self) -> Option<&str> {
        self.see
            .iter()
            .chain(self.talk.iter())
            .chain(self.own.iter())
            .chain(self.call.keys())
            .chain(self.broadcast.keys())
            .map(String::as_str)
            .find(|name| !valid_interface(name))
    }

    /// Arguments for one bus, in xdg-dbus-proxy order.
    pub fn args(&self, upstream: &str, path: &str) -> Vec<String> {
        let mut args = vec![upstream.to_string(), path.to_string()];
        if self.filter {
            args.push("--filter".into());
        }
        args.extend(self.see.iter().map(|n| format!("--see={}", n)));
        args.extend(self.talk.iter().map(|n| format!("--talk={}", n)));
        args.extend(self.own.iter().map(|n| format!("--own={}", n)));
        args.extend(
            self.call
                .iter()
                .map(|(n, rule)| format!("--call={}={}", n, rule)),
        );
        args.extend(
            self.broadcast
                .iter()
                .map(|(n, rule)| format!("--broadcast={}={}", n, rule)),
        );
        if self.log {
            args.push("--log".into());
        }
        args
    }
}

fn valid_interface(name: &str) -> bool {
    name.strip_suffix(".*").unwrap_or(name).contains('.')
}
