// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Best-effort OS name classification.

use crate::params::OsType;

const LINUX_DISTRIBUTIONS: &[&str] = &[
    "almalinux",
    "alpine",
    "amazon",
    "arch",
    "archlinux",
    "centos",
    "debian",
    "fedora",
    "flatcar",
    "gentoo",
    "linux",
    "mint",
    "nixos",
    "opensuse",
    "oracle",
    "rhel",
    "rocky",
    "rockylinux",
    "sles",
    "suse",
    "ubuntu",
    "void",
];

/// Classify an OS name (as reported by image metadata) into an OS family.
///
/// Returns `None` when the name is not recognised.
pub fn os_to_os_type(os_name: &str) -> Option<OsType> {
    let name = os_name.trim().to_ascii_lowercase();
    if name.is_empty() {
        return None;
    }
    if name.starts_with("windows") {
        return Some(OsType::Windows);
    }
    LINUX_DISTRIBUTIONS
        .contains(&name.as_str())
        .then_some(OsType::Linux)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_names() {
        assert_eq!(os_to_os_type("Ubuntu"), Some(OsType::Linux));
        assert_eq!(os_to_os_type("debian"), Some(OsType::Linux));
        assert_eq!(os_to_os_type("windows"), Some(OsType::Windows));
        assert_eq!(os_to_os_type("Windows Server"), Some(OsType::Windows));
    }

    #[test]
    fn test_unknown_names() {
        assert_eq!(os_to_os_type(""), None);
        assert_eq!(os_to_os_type("haiku"), None);
    }
}
