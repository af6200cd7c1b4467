//! Platform flag values exposed to the host runtime.
//!
//! The values come straight from `libc` so they always match the platform headers;
//! they must never be renumbered.

/// Which system call a constant is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, serde::Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConstantGroup {
    /// `memfd_create` flags.
    MemFd,
    /// `mmap` protection flags.
    Protection,
    /// `mmap` mapping flags.
    Mapping,
}

/// A named platform constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Constant {
    pub name: &'static str,
    pub value: i32,
    pub group: ConstantGroup,
}

const fn constant(name: &'static str, value: i32, group: ConstantGroup) -> Constant {
    Constant { name, value, group }
}

/// Every constant registered on the host module, in registration order.
pub static CONSTANTS: &[Constant] = &[
    constant("MFD_CLOEXEC", libc::MFD_CLOEXEC.cast_signed(), ConstantGroup::MemFd),
    constant("MFD_ALLOW_SEALING", libc::MFD_ALLOW_SEALING.cast_signed(), ConstantGroup::MemFd),
    constant("MFD_HUGETLB", libc::MFD_HUGETLB.cast_signed(), ConstantGroup::MemFd),
    constant("MFD_HUGE_2MB", libc::MFD_HUGE_2MB.cast_signed(), ConstantGroup::MemFd),
    constant("MFD_HUGE_1GB", libc::MFD_HUGE_1GB.cast_signed(), ConstantGroup::MemFd),
    constant("PROT_READ", libc::PROT_READ, ConstantGroup::Protection),
    constant("PROT_WRITE", libc::PROT_WRITE, ConstantGroup::Protection),
    constant("PROT_EXEC", libc::PROT_EXEC, ConstantGroup::Protection),
    constant("PROT_NONE", libc::PROT_NONE, ConstantGroup::Protection),
    constant("MAP_SHARED", libc::MAP_SHARED, ConstantGroup::Mapping),
    constant("MAP_PRIVATE", libc::MAP_PRIVATE, ConstantGroup::Mapping),
    constant("MAP_FIXED", libc::MAP_FIXED, ConstantGroup::Mapping),
    constant("MAP_ANONYMOUS", libc::MAP_ANONYMOUS, ConstantGroup::Mapping),
];

/// Looks up a constant by its exported name.
#[must_use]
pub fn lookup(name: &str) -> Option<i32> {
    CONSTANTS.iter().find(|c| c.name == name).map(|c| c.value)
}
