use crate::{
    error::{LoadError, LookupError},
    AmbFile, FileFilters,
};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(clap::Args)]
pub struct InstallArgs {
    /// Civilization III install directory, or any directory holding AMB files
    pub root: PathBuf,
    /// Glob patterns to include AMB paths
    #[arg(short, long)]
    pub include: Vec<String>,
    /// Glob patterns to exclude AMB paths
    #[arg(short, long)]
    pub exclude: Vec<String>,
}

impl InstallArgs {
    pub fn filters(&self) -> FileFilters {
        FileFilters {
            includes: self.include.clone(),
            excludes: self.exclude.clone(),
        }
    }
    /// Fails unless `root` names an existing directory.
    pub fn check_root(&self) -> std::io::Result<()> {
        if !self.root.is_dir() {
            return Err(crate::invalid_data(format_args!(
                "`{}` is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }
}

#[derive(clap::Args)]
pub struct Args {
    #[command(flatten)]
    install: InstallArgs,
}

/// Unit art directories of the base game and both expansions, relative to
/// the install root. Each holds one folder per unit.
pub const UNIT_ART_DIRS: [&[&str]; 3] = [
    &["Art", "Units"],
    &["civ3PTW", "Art", "Units"],
    &["Conquests", "Art", "Units"],
];

#[inline]
fn is_amb(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("amb"))
}

/// Lists the AMB files of an install. Falls back to searching all of `root`
/// when it has none of the unit art directories.
pub fn find_amb_files(root: &Path, filters: &FileFilters) -> Vec<PathBuf> {
    let art_dirs: Vec<PathBuf> = UNIT_ART_DIRS
        .iter()
        .map(|parts| parts.iter().fold(root.to_path_buf(), |p, part| p.join(part)))
        .filter(|p| p.is_dir())
        .collect();
    let walks = if art_dirs.is_empty() {
        log::debug!(
            "No unit art directories in `{}`, searching all subdirectories",
            root.display()
        );
        vec![WalkDir::new(root)]
    } else {
        art_dirs
            .iter()
            .map(|dir| WalkDir::new(dir).min_depth(2).max_depth(2))
            .collect()
    };
    let mut paths = Vec::new();
    for walk in walks {
        for entry in walk.sort_by_file_name().into_iter() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("{e}");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || !is_amb(path) {
                continue;
            }
            if !filters.is_empty() && !filters.matches(&path.to_string_lossy()) {
                continue;
            }
            paths.push(path.to_path_buf());
        }
    }
    paths
}

/// Every file a batch load attempted, split by outcome.
#[derive(Debug, Default)]
pub struct AmbCollection {
    pub files: IndexMap<PathBuf, AmbFile>,
    pub failures: Vec<(PathBuf, LoadError)>,
}

impl AmbCollection {
    #[inline]
    pub fn attempted(&self) -> usize {
        self.files.len() + self.failures.len()
    }
    #[inline]
    pub fn loaded(&self) -> usize {
        self.files.len()
    }
    /// Finds the single decoded file whose path contains `pattern`.
    pub fn find(&self, pattern: &str) -> Result<(&Path, &AmbFile), LookupError> {
        let mut matches = self
            .files
            .iter()
            .filter(|(path, _)| path.to_string_lossy().contains(pattern));
        match (matches.next(), matches.next()) {
            (None, _) => Err(LookupError::NoMatch(pattern.to_owned())),
            (Some((path, amb)), None) => Ok((path.as_path(), amb)),
            (Some(first), Some(second)) => {
                let matches = [first, second]
                    .into_iter()
                    .chain(matches)
                    .map(|(path, _)| path.clone())
                    .collect();
                Err(LookupError::Ambiguous {
                    pattern: pattern.to_owned(),
                    matches,
                })
            }
        }
    }
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &AmbFile)> {
        self.files.iter().map(|(path, amb)| (path.as_path(), amb))
    }
}

/// Decodes every path in parallel. Failures are collected, not returned.
pub fn load_all(paths: Vec<PathBuf>) -> AmbCollection {
    use rayon::prelude::*;

    let results: Vec<(PathBuf, Result<AmbFile, LoadError>)> = paths
        .into_par_iter()
        .map(|path| {
            let res = AmbFile::open(&path);
            (path, res)
        })
        .collect();

    let mut collection = AmbCollection::default();
    collection.files.reserve(results.len());
    for (path, res) in results {
        match res {
            Ok(amb) => {
                collection.files.insert(path, amb);
            }
            Err(e) => {
                log::warn!("Failed to load AMB from `{}`: {e}", path.display());
                collection.failures.push((path, e));
            }
        }
    }
    collection
}

/// Discovers and loads all AMB files under `root`.
pub fn load_install(root: &Path, filters: &FileFilters) -> AmbCollection {
    let paths = find_amb_files(root, filters);
    log::info!("Found {} AMB files", paths.len());
    let collection = load_all(paths);
    log::info!(
        "Successfully loaded {} of {} files",
        collection.loaded(),
        collection.attempted()
    );
    collection
}

pub fn scan(args: Args) -> std::io::Result<()> {
    let Args { install } = args;
    install.check_root()?;
    let ambs = load_install(&install.root, &install.filters());
    if crate::is_log_level(log::LevelFilter::Debug) {
        for (path, amb) in ambs.iter() {
            log::debug!(
                "  {: <4} {: <6} {}",
                amb.chunks.len(),
                amb.midi.as_ref().map_or(0, |m| m.tracks.len()),
                path.display()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection(paths: &[&str]) -> AmbCollection {
        AmbCollection {
            files: paths
                .iter()
                .map(|p| (PathBuf::from(p), AmbFile::default()))
                .collect(),
            failures: Vec::new(),
        }
    }

    #[test]
    fn find_single() {
        let c = collection(&["Units/Archer/ArcherRun.amb", "Units/Archer/ArcherAttack.amb"]);
        let (path, _) = c.find("Run").unwrap();
        assert_eq!(path, Path::new("Units/Archer/ArcherRun.amb"));
    }

    #[test]
    fn find_none() {
        let c = collection(&["Units/Archer/ArcherRun.amb"]);
        assert!(matches!(c.find("Trebuchet"), Err(LookupError::NoMatch(p)) if p == "Trebuchet"));
    }

    #[test]
    fn find_ambiguous() {
        let c = collection(&[
            "Units/Archer/ArcherRun.amb",
            "Units/Archer/ArcherAttack.amb",
            "Units/Archer/ArcherDeath.amb",
        ]);
        match c.find("Archer") {
            Err(LookupError::Ambiguous { matches, .. }) => assert_eq!(matches.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn scan_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args {
            install: InstallArgs {
                root: dir.path().join("missing"),
                include: Vec::new(),
                exclude: Vec::new(),
            },
        };
        let err = scan(args).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert!(err.to_string().ends_with("is not a directory"));
    }

    #[test]
    fn amb_extension() {
        assert!(is_amb(Path::new("a/b/Run.amb")));
        assert!(is_amb(Path::new("a/b/Run.AMB")));
        assert!(!is_amb(Path::new("a/b/Run.wav")));
        assert!(!is_amb(Path::new("a/b/amb")));
    }
}
