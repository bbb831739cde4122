//! Area membership: which hosts belong to a named network area.
//!
//! Group definition files list areas as `[name]` headers followed by one host per
//! line. Blank lines and `#` comments are ignored.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Prefix of an area name that selects exactly one host.
pub const HOST_PREFIX: &str = "host_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaMode {
    #[default]
    All,
    Each,
    Ingroup,
}

impl std::fmt::Display for AreaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AreaMode::All => write!(f, "all"),
            AreaMode::Each => write!(f, "each"),
            AreaMode::Ingroup => write!(f, "ingroup"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDef {
    groups: BTreeMap<String, BTreeSet<String>>,
}

impl GroupDef {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read group definition: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("failed to parse group definition: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut current: Option<String> = None;
        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_string();
                groups.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }
            let Some(group) = &current else {
                bail!("line {}: member {:?} before any [group] header", lineno + 1, line);
            };
            groups
                .entry(group.clone())
                .or_default()
                .insert(line.to_string());
        }
        Ok(Self { groups })
    }

    pub fn in_group(&self, group: &str, member: &str) -> bool {
        self.groups
            .get(group)
            .is_some_and(|members| members.contains(member))
    }

    /// `(member, group)` pairs in sorted order.
    pub fn iter_def(&self) -> impl Iterator<Item = (&str, &str)> {
        self.groups.iter().flat_map(|(group, members)| {
            members
                .iter()
                .map(move |m| (m.as_str(), group.as_str()))
        })
    }

    pub fn areas(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}

/// Decides whether a host belongs to an area before its events are loaded.
#[derive(Debug, Clone, Default)]
pub struct AreaTest {
    mode: AreaMode,
    groups: GroupDef,
}

impl AreaTest {
    pub fn new(mode: AreaMode, groups: GroupDef) -> Self {
        Self { mode, groups }
    }

    /// Build from configuration. `ingroup` requires a group definition file.
    pub fn from_config(mode: AreaMode, area_def: Option<&Path>) -> Result<Self> {
        let groups = match (mode, area_def) {
            (_, Some(path)) => GroupDef::load(path)?,
            (AreaMode::Ingroup, None) => bail!("area mode ingroup requires dag.area_def"),
            (_, None) => GroupDef::default(),
        };
        Ok(Self::new(mode, groups))
    }

    pub fn test(&self, area: &str, host: &str) -> bool {
        if let Some(name) = area.strip_prefix(HOST_PREFIX) {
            return name == host;
        }
        match self.mode {
            AreaMode::All => true,
            AreaMode::Each => area == host,
            AreaMode::Ingroup => self.groups.in_group(area, host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEF: &str = "\
# core routers
[core]
rt1
rt2   # spare

[edge]
sw1
";

    #[test]
    fn test_parse_group_def() {
        let def = GroupDef::parse(DEF).unwrap();
        assert!(def.in_group("core", "rt2"));
        assert!(!def.in_group("core", "sw1"));
        assert!(!def.in_group("dc", "rt1"));
        let pairs: Vec<_> = def.iter_def().collect();
        assert_eq!(pairs, vec![("rt1", "core"), ("rt2", "core"), ("sw1", "edge")]);
    }

    #[test]
    fn test_member_before_header_is_rejected() {
        assert!(GroupDef::parse("rt1\n[core]\n").is_err());
    }

    #[test]
    fn test_area_modes() {
        let groups = GroupDef::parse(DEF).unwrap();

        let all = AreaTest::new(AreaMode::All, groups.clone());
        assert!(all.test("anything", "rt1"));

        let each = AreaTest::new(AreaMode::Each, groups.clone());
        assert!(each.test("rt1", "rt1"));
        assert!(!each.test("core", "rt1"));

        let ingroup = AreaTest::new(AreaMode::Ingroup, groups);
        assert!(ingroup.test("core", "rt1"));
        assert!(!ingroup.test("edge", "rt1"));
    }

    #[test]
    fn test_host_prefix_selects_one_host() {
        for mode in [AreaMode::All, AreaMode::Each, AreaMode::Ingroup] {
            let t = AreaTest::new(mode, GroupDef::default());
            assert!(t.test("host_rt1", "rt1"));
            assert!(!t.test("host_rt1", "rt2"));
        }
    }

    #[test]
    fn test_ingroup_requires_definition() {
        assert!(AreaTest::from_config(AreaMode::Ingroup, None).is_err());
        assert!(AreaTest::from_config(AreaMode::All, None).is_ok());
    }
}
