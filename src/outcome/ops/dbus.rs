use crate::container::BindFlags;
use crate::error::{AppError, NotEnabled};
use crate::outcome::{ParamsState, SysState};
use crate::system::dbus::{
    SESSION_BUS_ENV, SYSTEM_BUS_ENV, SYSTEM_BUS_FALLBACK, session_bus_fallback,
};
use crate::system::{AclPerms, ProxyBus};
use crate::types::{BusConfig, Enablement};
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub const SYSTEM_BUS_INNER: &str = "/run/dbus/system_bus_socket";

/** Runs a filtering message bus proxy for the container. */
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DBusOp {
    /// Whether the system bus is proxied as well.
    pub proxy_system: bool,
}

impl DBusOp {
    pub fn to_system(&mut self, s: &mut SysState) -> Result<()> {
        if !s.state.enablements.has(Enablement::DBUS) {
            return Err(NotEnabled.into());
        }

        let session = match &s.config.session_bus {
            Some(session) => session.clone(),
            None => BusConfig::for_app(&s.state.app_id),
        };
        let instance = s.instance();
        let session_path = instance.join("bus");
        let system_path = instance.join("system_bus_socket");

        let session_upstream = s
            .d
            .lookup_env(SESSION_BUS_ENV)
            .unwrap_or_else(|| session_bus_fallback(s.d.getuid()));
        let system = s.config.system_bus.as_ref().map(|config| ProxyBus {
            upstream: s
                .d
                .lookup_env(SYSTEM_BUS_ENV)
                .unwrap_or_else(|| SYSTEM_BUS_FALLBACK.to_string()),
            config,
            path: system_path.clone(),
        });
        let proxy_system = system.is_some();

        s.sys
            .proxy_dbus(
                ProxyBus {
                    upstream: session_upstream,
                    config: &session,
                    path: session_path.clone(),
                },
                system,
            )
            .map_err(|e| AppError::new("dbus", format!("{:#}", e)))?;

        s.sys.update_perm(session_path, AclPerms::RW);
        if proxy_system {
            self.proxy_system = true;
            s.sys.update_perm(system_path, AclPerms::RW);
        }
        Ok(())
    }

    pub fn to_container(&self, z: &mut ParamsState) -> Result<()> {
        let session_inner = z.runtime_dir().join("bus");
        z.env.insert(
            SESSION_BUS_ENV.into(),
            format!("unix:path={}", session_inner.display()),
        );
        let instance = z.instance_path();
        z.params
            .bind(instance.join("bus"), session_inner, BindFlags::NONE);

        if self.proxy_system {
            z.env.insert(
                SYSTEM_BUS_ENV.into(),
                format!("unix:path={}", SYSTEM_BUS_INNER),
            );
            z.params.bind(
                instance.join("system_bus_socket"),
                SYSTEM_BUS_INNER,
                BindFlags::NONE,
            );
        }
        Ok(())
    }
}
