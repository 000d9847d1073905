// src/package/permissions.rs

//! Permission resolution for extracted package files
//!
//! Each `FilePermissions` key is parsed once into a [`PathPattern`]. When a
//! path matches several patterns the most specific one wins:
//!
//! 1. exact paths beat single-level globs, which beat recursive `dir/**` globs
//! 2. within the same kind, the longer pattern wins
//! 3. remaining ties go to the lexically smaller pattern
//!
//! The order is total, so the result never depends on map iteration order.
//! A path no pattern matches gets owner-only access.

use crate::error::{Error, Result};
use crate::filesystem::safe_join;
use crate::package::manifest::PermissionRule;
use glob::{MatchOptions, Pattern};
use nix::unistd::{Gid, Group};
use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::{chown, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Specificity class of a pattern, least specific first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PatternKind {
    /// `dir/**`: the base and everything beneath it
    Recursive,
    /// Contains `*`, `?` or `[` and matches within path segments
    SingleLevel,
    /// A literal path
    Exact,
}

/// A parsed `FilePermissions` key
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    kind: PatternKind,
    glob: Option<Pattern>,
}

fn has_glob_chars(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |message: String| Error::InvalidPattern {
            pattern: raw.to_string(),
            message,
        };

        if raw.is_empty() {
            return Err(invalid("empty pattern".to_string()));
        }

        let (kind, glob_source) = if let Some(base) = raw.strip_suffix("/**") {
            if base.is_empty() {
                return Err(invalid("recursive pattern needs a base directory".to_string()));
            }
            (PatternKind::Recursive, Some(base))
        } else if has_glob_chars(raw) {
            (PatternKind::SingleLevel, Some(raw))
        } else {
            (PatternKind::Exact, None)
        };

        let glob = match glob_source {
            Some(source) => Some(Pattern::new(source).map_err(|e| invalid(e.to_string()))?),
            None => None,
        };

        Ok(Self {
            raw: raw.to_string(),
            kind,
            glob,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    /// Does this pattern select the archive-relative `path`?
    pub fn matches(&self, path: &str) -> bool {
        match (self.kind, &self.glob) {
            (PatternKind::Exact, _) => self.raw == path,
            (PatternKind::SingleLevel, Some(glob)) => glob.matches_with(path, MATCH_OPTIONS),
            (PatternKind::Recursive, Some(base)) => {
                // The base itself, or any ancestor prefix of the path
                path.match_indices('/')
                    .any(|(idx, _)| base.matches_with(&path[..idx], MATCH_OPTIONS))
                    || base.matches_with(path, MATCH_OPTIONS)
            }
            _ => false,
        }
    }

    fn specificity(&self) -> (PatternKind, usize, Reverse<&str>) {
        (self.kind, self.raw.len(), Reverse(self.raw.as_str()))
    }
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for PathPattern {}

impl PartialOrd for PathPattern {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders by specificity; the greatest pattern wins
impl Ord for PathPattern {
    fn cmp(&self, other: &Self) -> Ordering {
        self.specificity().cmp(&other.specificity())
    }
}

/// Outcome of resolving one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The winning pattern, or `None` when the owner-only default applies
    pub pattern: Option<String>,
    pub rule: PermissionRule,
}

/// What to do with a path on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionPlan {
    /// Keep the mode the archive entry was extracted with
    Preserve,
    /// chown to `(0, admin gid)` and chmod to `mode`
    Set { mode: u32 },
}

/// Compute the POSIX mode for a rule
///
/// Directories and executables use the `7xx` triad, other files `6xx`.
/// Group write without group read is not granted.
pub fn mode_for(rule: &PermissionRule, is_dir: bool) -> u32 {
    let searchable = is_dir || rule.executable;
    let owner = if searchable { 0o700 } else { 0o600 };

    let group = match (rule.admin_group_readable, rule.admin_group_writable) {
        (true, true) if searchable => 0o070,
        (true, true) => 0o060,
        (true, false) if searchable => 0o050,
        (true, false) => 0o040,
        (false, _) => 0,
    };

    owner | group
}

/// Compiled permission table
#[derive(Debug, Clone, Default)]
pub struct PermissionPolicy {
    rules: Vec<(PathPattern, PermissionRule)>,
}

impl PermissionPolicy {
    pub fn from_rules(rules: &BTreeMap<String, PermissionRule>) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|(raw, rule)| Ok((PathPattern::parse(raw)?, *rule)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Select the most specific matching rule for `path`
    pub fn resolve(&self, path: &str) -> Resolution {
        let best = self
            .rules
            .iter()
            .filter(|(pattern, _)| pattern.matches(path))
            .max_by(|(a, _), (b, _)| a.cmp(b));

        match best {
            Some((pattern, rule)) => Resolution {
                pattern: Some(pattern.as_str().to_string()),
                rule: *rule,
            },
            None => Resolution {
                pattern: None,
                rule: PermissionRule::private(),
            },
        }
    }

    pub fn plan(&self, path: &str, is_dir: bool) -> PermissionPlan {
        let rule = self.resolve(path).rule;
        if rule.preserve_permissions {
            PermissionPlan::Preserve
        } else {
            PermissionPlan::Set {
                mode: mode_for(&rule, is_dir),
            }
        }
    }
}

/// Applies a [`PermissionPolicy`] to files under an install root
pub struct PermissionApplier {
    root: PathBuf,
    policy: PermissionPolicy,
    gid: Gid,
    privileged: bool,
}

impl PermissionApplier {
    /// Look up `admin_group` and detect whether ownership can be changed
    pub fn new(root: &Path, policy: PermissionPolicy, admin_group: &str) -> Result<Self> {
        let group = Group::from_name(admin_group)
            .map_err(|e| Error::UnknownGroup(format!("{}: {}", admin_group, e)))?
            .ok_or_else(|| Error::UnknownGroup(admin_group.to_string()))?;

        let privileged = nix::unistd::geteuid().is_root();
        if !privileged {
            warn!("Not running as root, file ownership will not be changed");
        }

        Ok(Self {
            root: root.to_path_buf(),
            policy,
            gid: group.gid,
            privileged,
        })
    }

    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    /// Enforce the policy on one archive-relative path (`.` is the root)
    pub fn apply(&self, relative: &str) -> Result<()> {
        let path = if relative == "." {
            self.root.clone()
        } else {
            safe_join(&self.root, relative)?
        };

        let metadata = fs::symlink_metadata(&path).map_err(|e| Error::Permission {
            path: path.clone(),
            message: e.to_string(),
        })?;
        if metadata.file_type().is_symlink() {
            debug!("Skipping symlink {}", path.display());
            return Ok(());
        }

        let mode = match self.policy.plan(relative, metadata.is_dir()) {
            PermissionPlan::Preserve => {
                debug!("Preserving permissions of {}", relative);
                return Ok(());
            }
            PermissionPlan::Set { mode } => mode,
        };

        if self.privileged {
            chown(&path, Some(0), Some(self.gid.as_raw())).map_err(|e| Error::Permission {
                path: path.clone(),
                message: format!("chown failed: {}", e),
            })?;
        }

        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).map_err(|e| {
            Error::Permission {
                path: path.clone(),
                message: format!("chmod {:o} failed: {}", mode, e),
            }
        })?;

        debug!("Set {} to {:o}", relative, mode);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn policy(rules: &[(&str, PermissionRule)]) -> PermissionPolicy {
        let map = rules
            .iter()
            .map(|(p, r)| (p.to_string(), *r))
            .collect::<BTreeMap<_, _>>();
        PermissionPolicy::from_rules(&map).unwrap()
    }

    fn current_group() -> String {
        Group::from_gid(nix::unistd::getgid()).unwrap().unwrap().name
    }

    #[test]
    fn test_pattern_kinds() {
        assert_eq!(PathPattern::parse("data/**").unwrap().kind(), PatternKind::Recursive);
        assert_eq!(PathPattern::parse("bin/*").unwrap().kind(), PatternKind::SingleLevel);
        assert_eq!(PathPattern::parse("lib/k3s").unwrap().kind(), PatternKind::Exact);
        assert!(PathPattern::parse("").is_err());
        assert!(PathPattern::parse("/**").is_err());
        assert!(PathPattern::parse("bin/[").is_err());
    }

    #[test]
    fn test_single_level_glob_stays_in_segment() {
        let pattern = PathPattern::parse("bin/*").unwrap();
        assert!(pattern.matches("bin/app"));
        assert!(!pattern.matches("bin/sub/app"));
        assert!(!pattern.matches("bin"));
    }

    #[test]
    fn test_recursive_matches_base_and_descendants() {
        let pattern = PathPattern::parse("data/**").unwrap();
        assert!(pattern.matches("data"));
        assert!(pattern.matches("data/a"));
        assert!(pattern.matches("data/a/b/c"));
        assert!(!pattern.matches("database"));
        assert!(!pattern.matches("other/data"));
    }

    #[test]
    fn test_exact_beats_recursive() {
        let policy = policy(&[
            ("data/**", PermissionRule::readable()),
            ("data/secret.txt", PermissionRule::private()),
        ]);

        let resolution = policy.resolve("data/secret.txt");
        assert_eq!(resolution.pattern.as_deref(), Some("data/secret.txt"));
        assert_eq!(resolution.rule, PermissionRule::private());

        assert_eq!(policy.resolve("data/other.txt").rule, PermissionRule::readable());
    }

    #[test]
    fn test_longer_pattern_wins_within_kind() {
        let policy = policy(&[
            ("data/**", PermissionRule::readable()),
            ("data/web/**", PermissionRule::writable()),
            ("*/*", PermissionRule::private()),
            ("tmp/*", PermissionRule::executable()),
        ]);

        assert_eq!(policy.resolve("data/web/index.html").rule, PermissionRule::writable());
        assert_eq!(policy.resolve("data/x").rule, PermissionRule::private());
        assert_eq!(policy.resolve("tmp/x").rule, PermissionRule::executable());
    }

    #[test]
    fn test_equal_length_tie_is_lexical() {
        let policy = policy(&[
            ("a?/x", PermissionRule::writable()),
            ("?b/x", PermissionRule::readable()),
        ]);

        let resolution = policy.resolve("ab/x");
        assert_eq!(resolution.pattern.as_deref(), Some("?b/x"));
    }

    #[test]
    fn test_no_match_is_owner_only() {
        let resolution = policy(&[("bin/*", PermissionRule::executable())]).resolve("etc/x");
        assert_eq!(resolution.pattern, None);
        assert_eq!(resolution.rule, PermissionRule::private());
    }

    #[test]
    fn test_mode_for() {
        assert_eq!(mode_for(&PermissionRule::private(), false), 0o600);
        assert_eq!(mode_for(&PermissionRule::private(), true), 0o700);
        assert_eq!(mode_for(&PermissionRule::readable(), false), 0o640);
        assert_eq!(mode_for(&PermissionRule::readable(), true), 0o750);
        assert_eq!(mode_for(&PermissionRule::writable(), false), 0o660);
        assert_eq!(mode_for(&PermissionRule::writable(), true), 0o770);
        assert_eq!(mode_for(&PermissionRule::executable(), false), 0o750);

        let write_only = PermissionRule {
            admin_group_writable: true,
            ..PermissionRule::private()
        };
        assert_eq!(mode_for(&write_only, false), 0o600);
    }

    #[test]
    fn test_plan_preserve() {
        let policy = policy(&[("data/**", PermissionRule::preserve())]);
        assert_eq!(policy.plan("data/db", false), PermissionPlan::Preserve);
        assert_eq!(policy.plan("bin/app", false), PermissionPlan::Set { mode: 0o600 });
    }

    #[test]
    fn test_unknown_group() {
        let temp = TempDir::new().unwrap();
        let err = PermissionApplier::new(
            temp.path(),
            PermissionPolicy::default(),
            "stowage-no-such-group-xyz",
        )
        .err()
        .unwrap();
        assert!(err.is_permission());
    }

    #[test]
    fn test_apply_sets_modes() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("bin")).unwrap();
        fs::write(temp.path().join("bin/app"), b"hi").unwrap();
        fs::write(temp.path().join("notes.txt"), b"x").unwrap();
        fs::set_permissions(temp.path().join("notes.txt"), fs::Permissions::from_mode(0o644))
            .unwrap();

        let policy = policy(&[
            (".", PermissionRule::readable()),
            ("bin", PermissionRule::readable()),
            ("bin/*", PermissionRule::executable()),
        ]);
        let applier = PermissionApplier::new(temp.path(), policy, &current_group()).unwrap();

        for path in ["bin/app", "notes.txt", "bin", "."] {
            applier.apply(path).unwrap();
        }

        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&temp.path().join("bin/app")), 0o750);
        assert_eq!(mode(&temp.path().join("notes.txt")), 0o600);
        assert_eq!(mode(&temp.path().join("bin")), 0o750);
        assert_eq!(mode(temp.path()), 0o750);
    }

    #[test]
    fn test_apply_preserves_mode() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("data")).unwrap();
        let file = temp.path().join("data/db");
        fs::write(&file, b"x").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o604)).unwrap();

        let policy = policy(&[("data/**", PermissionRule::preserve())]);
        let applier = PermissionApplier::new(temp.path(), policy, &current_group()).unwrap();
        applier.apply("data/db").unwrap();

        assert_eq!(fs::metadata(&file).unwrap().permissions().mode() & 0o777, 0o604);
    }

    #[test]
    fn test_apply_missing_path_is_permission_error() {
        let temp = TempDir::new().unwrap();
        let applier =
            PermissionApplier::new(temp.path(), PermissionPolicy::default(), &current_group())
                .unwrap();
        assert!(applier.apply("missing").unwrap_err().is_permission());
    }
}
