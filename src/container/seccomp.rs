use super::{SeccompFlags, SeccompPresets};
use anyhow::{Result, anyhow};
use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp,
    SeccompCondition, SeccompFilter, SeccompRule, TargetArch,
};
use std::collections::BTreeMap;

const PER_LINUX32: u64 = 0x0008;

fn deny(rules: &mut BTreeMap<i64, Vec<SeccompRule>>, syscalls: &[i64]) {
    for nr in syscalls {
        rules.insert(*nr, vec![]);
    }
}

fn deny_arg(
    rules: &mut BTreeMap<i64, Vec<SeccompRule>>,
    nr: i64,
    index: u8,
    value: u64,
) -> Result<()> {
    let condition = SeccompCondition::new(
        index,
        SeccompCmpArgLen::Dword,
        SeccompCmpOp::Eq,
        value,
    )
    .map_err(|e| anyhow!("Invalid seccomp condition: {}", e))?;
    let rule = SeccompRule::new(vec![condition])
        .map_err(|e| anyhow!("Invalid seccomp rule: {}", e))?;
    rules.entry(nr).or_default().push(rule);
    Ok(())
}

/** Syscalls refused by each preset, matched by number. */
fn rules(
    presets: SeccompPresets,
    flags: SeccompFlags,
) -> Result<BTreeMap<i64, Vec<SeccompRule>>> {
    let mut rules = BTreeMap::new();

    if presets.has(SeccompPresets::EXT) {
        deny(
            &mut rules,
            &[
                libc::SYS_acct,
                libc::SYS_add_key,
                libc::SYS_keyctl,
                libc::SYS_request_key,
                libc::SYS_init_module,
                libc::SYS_finit_module,
                libc::SYS_delete_module,
                libc::SYS_kexec_load,
                libc::SYS_reboot,
                libc::SYS_swapon,
                libc::SYS_swapoff,
                libc::SYS_syslog,
                libc::SYS_userfaultfd,
                libc::SYS_quotactl,
                libc::SYS_open_by_handle_at,
            ],
        );
    }
    if presets.has(SeccompPresets::DENY_NS) {
        deny(
            &mut rules,
            &[
                libc::SYS_unshare,
                libc::SYS_setns,
                libc::SYS_mount,
                libc::SYS_umount2,
                libc::SYS_pivot_root,
                libc::SYS_chroot,
            ],
        );
    }
    if presets.has(SeccompPresets::DENY_TTY) {
        deny_arg(&mut rules, libc::SYS_ioctl, 1, libc::TIOCSTI as u64)?;
    }
    if presets.has(SeccompPresets::DENY_DEVEL) {
        deny(
            &mut rules,
            &[
                libc::SYS_ptrace,
                libc::SYS_process_vm_readv,
                libc::SYS_process_vm_writev,
                libc::SYS_perf_event_open,
                libc::SYS_bpf,
            ],
        );
    }
    if !flags.has(SeccompFlags::ALLOW_MULTIARCH) {
        deny_arg(&mut rules, libc::SYS_personality, 0, PER_LINUX32)?;
    }

    Ok(rules)
}

fn target_arch() -> Result<TargetArch> {
    if cfg!(target_arch = "x86_64") {
        Ok(TargetArch::x86_64)
    } else if cfg!(target_arch = "aarch64") {
        Ok(TargetArch::aarch64)
    } else {
        Err(anyhow!("unsupported architecture for seccomp filter"))
    }
}

pub fn compile(
    presets: SeccompPresets,
    flags: SeccompFlags,
) -> Result<BpfProgram> {
    let filter = SeccompFilter::new(
        rules(presets, flags)?,
        SeccompAction::Allow,
        SeccompAction::Errno(libc::EPERM as u32),
        target_arch()?,
    )
    .map_err(|e| anyhow!("Cannot build seccomp filter: {}", e))?;

    filter
        .try_into()
        .map_err(|e: seccompiler::BackendError| {
            anyhow!("Cannot compile seccomp filter: {}", e)
        })
}

/// Loads the strict filter onto the calling process.
pub fn load_strict(flags: SeccompFlags) -> Result<()> {
    let program = compile(SeccompPresets::STRICT, flags)?;
    seccompiler::apply_filter_all_threads(&program)
        .map_err(|e| anyhow!("Cannot load seccomp filter: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_rules() -> Result<()> {
        let strict = rules(SeccompPresets::STRICT, SeccompFlags::NONE)?;
        assert!(strict.contains_key(&libc::SYS_ptrace));
        assert!(strict.contains_key(&libc::SYS_unshare));
        assert_eq!(strict.get(&libc::SYS_ioctl).map(Vec::len), Some(1));
        assert!(strict.contains_key(&libc::SYS_personality));

        let multiarch =
            rules(SeccompPresets::STRICT, SeccompFlags::ALLOW_MULTIARCH)?;
        assert!(!multiarch.contains_key(&libc::SYS_personality));

        let none = rules(SeccompPresets::NONE, SeccompFlags::ALLOW_MULTIARCH)?;
        assert!(none.is_empty());
        Ok(())
    }

    #[test]
    fn test_strict_compiles() -> Result<()> {
        let program = compile(SeccompPresets::STRICT, SeccompFlags::NONE)?;
        assert!(!program.is_empty());
        Ok(())
    }
}
