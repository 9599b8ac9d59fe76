use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, BitXor, Not};

/** A set of brokered services, packed into a single byte.
 *
 * The bits past the services are reused by the system state tracker for
 * its own scopes, see `system::USER` and `system::PROCESS`.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Enablement(pub u8);

impl Enablement {
    pub const NONE: Enablement = Enablement(0);
    pub const WAYLAND: Enablement = Enablement(1 << 0);
    pub const X11: Enablement = Enablement(1 << 1);
    pub const DBUS: Enablement = Enablement(1 << 2);
    pub const PULSE: Enablement = Enablement(1 << 3);

    /// One past the last service bit.
    pub const EM: Enablement = Enablement(1 << 4);

    pub const SERVICES: Enablement = Enablement(
        Self::WAYLAND.0 | Self::X11.0 | Self::DBUS.0 | Self::PULSE.0,
    );

    pub fn has(self, other: Enablement) -> bool {
        self.0 & other.0 != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for Enablement {
    type Output = Enablement;
    fn bitor(self, rhs: Enablement) -> Enablement {
        Enablement(self.0 | rhs.0)
    }
}

impl BitOrAssign for Enablement {
    fn bitor_assign(&mut self, rhs: Enablement) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Enablement {
    type Output = Enablement;
    fn bitand(self, rhs: Enablement) -> Enablement {
        Enablement(self.0 & rhs.0)
    }
}

impl BitXor for Enablement {
    type Output = Enablement;
    fn bitxor(self, rhs: Enablement) -> Enablement {
        Enablement(self.0 ^ rhs.0)
    }
}

impl Not for Enablement {
    type Output = Enablement;
    fn not(self) -> Enablement {
        Enablement(!self.0)
    }
}

impl fmt::Display for Enablement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::WAYLAND, "wayland"),
            (Self::X11, "x11"),
            (Self::DBUS, "dbus"),
            (Self::PULSE, "pulseaudio"),
        ]
        .iter()
        .filter(|(bit, _)| self.has(*bit))
        .map(|(_, name)| *name)
        .collect();

        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join(", "))
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EnablementFlags {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    wayland: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    x11: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    dbus: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pulse: bool,
}

impl Serialize for Enablement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        EnablementFlags {
            wayland: self.has(Self::WAYLAND),
            x11: self.has(Self::X11),
            dbus: self.has(Self::DBUS),
            pulse: self.has(Self::PULSE),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Enablement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let flags = EnablementFlags::deserialize(deserializer)?;
        let mut e = Enablement::NONE;
        if flags.wayland {
            e |= Self::WAYLAND;
        }
        if flags.x11 {
            e |= Self::X11;
        }
        if flags.dbus {
            e |= Self::DBUS;
        }
        if flags.pulse {
            e |= Self::PULSE;
        }
        Ok(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case(Enablement::NONE, "none")]
    #[case(Enablement::WAYLAND, "wayland")]
    #[case(Enablement::WAYLAND | Enablement::PULSE, "wayland, pulseaudio")]
    #[case(Enablement::SERVICES, "wayland, x11, dbus, pulseaudio")]
    fn test_enablement_display(#[case] e: Enablement, #[case] want: &str) {
        assert_eq!(e.to_string(), want);
    }

    #[test]
    fn test_enablement_json() -> anyhow::Result<()> {
        let e: Enablement =
            serde_json::from_str(r#"{"wayland":true,"dbus":true}"#)?;
        assert_eq!(e, Enablement::WAYLAND | Enablement::DBUS);
        assert_eq!(serde_json::to_string(&Enablement::PULSE)?, r#"{"pulse":true}"#);
        assert!(serde_json::from_str::<Enablement>(r#"{"pipewire":true}"#).is_err());
        Ok(())
    }
}
