//! Version-control ignore rules consulted during discovery.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use ignore::Match;
use ignore::gitignore::Gitignore;

/// Decides whether a walked path is excluded from the search.
pub trait IgnoreRules: Send + Sync {
    fn is_ignored(&self, path: &Path, is_dir: bool) -> bool;

    /// Discovery calls this for each directory it descends into, before any
    /// entry inside it is checked.
    fn enter_dir(&self, _dir: &Path) {}
}

/// Never ignores anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIgnore;

impl IgnoreRules for NoIgnore {
    fn is_ignored(&self, _path: &Path, _is_dir: bool) -> bool {
        false
    }
}

/// `.gitignore` files from the repository top down to the search root, plus
/// the ones discovery finds below it.
#[derive(Debug, Default)]
pub struct GitignoreRules {
    /// Deepest directory first.
    layers: RwLock<Vec<Gitignore>>,
}

impl GitignoreRules {
    /// Collect rules that apply at `root`.
    ///
    /// Parent `.gitignore` files are read up to the first ancestor that holds
    /// a `.git` entry. Without one, only the root's own file counts. Files in
    /// subdirectories are added by [`IgnoreRules::enter_dir`] as the walk
    /// reaches them.
    #[must_use]
    pub fn load(root: &Path) -> Self {
        let base = if root.is_dir() {
            root
        } else {
            root.parent().unwrap_or(root)
        };

        let mut dirs: Vec<PathBuf> = Vec::new();
        if let Some(top) = base.ancestors().find(|dir| dir.join(".git").exists()) {
            for dir in base.ancestors().skip(1) {
                if !dir.starts_with(top) {
                    break;
                }
                dirs.push(dir.to_path_buf());
            }
        }
        dirs.push(base.to_path_buf());

        let mut layers: Vec<Gitignore> = dirs.iter().filter_map(|dir| read_layer(dir)).collect();
        sort_deepest_first(&mut layers);

        Self {
            layers: RwLock::new(layers),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

fn read_layer(dir: &Path) -> Option<Gitignore> {
    let file = dir.join(".gitignore");
    if !file.is_file() {
        return None;
    }
    let (rules, err) = Gitignore::new(&file);
    if let Some(err) = err {
        tracing::debug!(path = %file.display(), error = %err, "Partial .gitignore parse");
    }
    (!rules.is_empty()).then_some(rules)
}

fn sort_deepest_first(layers: &mut [Gitignore]) {
    layers.sort_by_key(|rules| std::cmp::Reverse(rules.path().components().count()));
}

impl IgnoreRules for GitignoreRules {
    fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let layers = self.layers.read().unwrap_or_else(PoisonError::into_inner);
        for rules in layers.iter() {
            if !path.starts_with(rules.path()) {
                continue;
            }
            match rules.matched_path_or_any_parents(path, is_dir) {
                Match::Ignore(_) => return true,
                Match::Whitelist(_) => return false,
                Match::None => {}
            }
        }
        false
    }

    fn enter_dir(&self, dir: &Path) {
        let Some(rules) = read_layer(dir) else {
            return;
        };
        let mut layers = self.layers.write().unwrap_or_else(PoisonError::into_inner);
        if layers.iter().any(|existing| existing.path() == rules.path()) {
            return;
        }
        layers.push(rules);
        sort_deepest_first(&mut layers);
    }
}

#[cfg(test)]
mod tests {
    use super::{GitignoreRules, IgnoreRules, NoIgnore};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    #[test]
    fn no_ignore_ignores_nothing() {
        assert!(!NoIgnore.is_ignored(Path::new("/anything"), false));
    }

    #[test]
    fn root_gitignore_applies() {
        let dir = tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        fs::write(root.join(".gitignore"), "*.log\nbuild/\n").unwrap();
        fs::create_dir(root.join("build")).unwrap();

        let rules = GitignoreRules::load(&root);
        assert!(rules.is_ignored(&root.join("debug.log"), false));
        assert!(rules.is_ignored(&root.join("build/out.txt"), false));
        assert!(!rules.is_ignored(&root.join("main.rs"), false));
    }

    #[test]
    fn nested_whitelist_overrides_parent() {
        let dir = tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        fs::write(root.join(".gitignore"), "*.txt\n").unwrap();
        fs::create_dir(root.join("docs")).unwrap();
        fs::write(root.join("docs/.gitignore"), "!keep.txt\n").unwrap();

        let rules = GitignoreRules::load(&root);
        assert!(rules.is_ignored(&root.join("docs/keep.txt"), false));

        rules.enter_dir(&root.join("docs"));
        assert!(rules.is_ignored(&root.join("notes.txt"), false));
        assert!(rules.is_ignored(&root.join("docs/other.txt"), false));
        assert!(!rules.is_ignored(&root.join("docs/keep.txt"), false));
    }

    #[test]
    fn entering_a_loaded_dir_twice_adds_no_layer() {
        let dir = tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        fs::write(root.join(".gitignore"), "*.log\n").unwrap();

        let rules = GitignoreRules::load(&root);
        rules.enter_dir(&root);
        rules.enter_dir(&root);
        assert_eq!(rules.layers.read().unwrap().len(), 1);
    }

    #[test]
    fn parent_rules_apply_inside_repository() {
        let dir = tempdir().unwrap();
        let repo = fs::canonicalize(dir.path()).unwrap();
        fs::create_dir(repo.join(".git")).unwrap();
        fs::write(repo.join(".gitignore"), "generated.rs\n").unwrap();
        fs::create_dir(repo.join("src")).unwrap();

        let rules = GitignoreRules::load(&repo.join("src"));
        assert!(rules.is_ignored(&repo.join("src/generated.rs"), false));
        assert!(!rules.is_ignored(&repo.join("src/lib.rs"), false));
    }

    #[test]
    fn parent_rules_ignored_outside_repository() {
        let dir = tempdir().unwrap();
        let outer = fs::canonicalize(dir.path()).unwrap();
        fs::write(outer.join(".gitignore"), "*.rs\n").unwrap();
        fs::create_dir(outer.join("sub")).unwrap();

        let rules = GitignoreRules::load(&outer.join("sub"));
        assert!(rules.is_empty());
    }
}
