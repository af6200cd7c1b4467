use memtie::{CONSTANTS, ConstantGroup, constants::lookup};
use pretty_assertions::assert_eq;

#[test]
fn values_match_platform_headers() {
    assert_eq!(lookup("MFD_CLOEXEC"), Some(0x1));
    assert_eq!(lookup("MFD_ALLOW_SEALING"), Some(0x2));
    assert_eq!(lookup("MFD_HUGETLB"), Some(0x4));
    assert_eq!(lookup("MFD_HUGE_2MB"), Some(21 << 26));
    assert_eq!(lookup("MFD_HUGE_1GB"), Some(30 << 26));
    assert_eq!(lookup("PROT_NONE"), Some(0));
    assert_eq!(lookup("PROT_READ"), Some(libc::PROT_READ));
    assert_eq!(lookup("PROT_WRITE"), Some(libc::PROT_WRITE));
    assert_eq!(lookup("PROT_EXEC"), Some(libc::PROT_EXEC));
    assert_eq!(lookup("MAP_SHARED"), Some(libc::MAP_SHARED));
    assert_eq!(lookup("MAP_PRIVATE"), Some(libc::MAP_PRIVATE));
    assert_eq!(lookup("MAP_FIXED"), Some(libc::MAP_FIXED));
    assert_eq!(lookup("MAP_ANONYMOUS"), Some(libc::MAP_ANONYMOUS));
    assert_eq!(lookup("MAP_NORESERVE"), None);
}

#[test]
fn table_is_grouped_in_registration_order() {
    let groups: Vec<ConstantGroup> = CONSTANTS.iter().map(|c| c.group).collect();
    let mut expected = vec![ConstantGroup::MemFd; 5];
    expected.extend([ConstantGroup::Protection; 4]);
    expected.extend([ConstantGroup::Mapping; 4]);
    assert_eq!(groups, expected);
}

#[test]
fn names_are_unique() {
    let mut names: Vec<&str> = CONSTANTS.iter().map(|c| c.name).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), CONSTANTS.len());
}
