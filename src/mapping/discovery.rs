//! Locating mapping files on disk
//!
//! Rekordbox ships one `<MODEL>.midi.csv` per supported controller. This
//! module finds those files and picks the one matching a MIDI port name.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::{DirEntry, WalkDir};

const PORT_PREFIXES: &[&str] = &["PIONEER DJ ", "PIONEER ", "DJ "];
const PORT_SUFFIXES: &[&str] = &[" MIDI", " 2IN2OUT", " AUDIO"];

/// Well-known Rekordbox mapping locations
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(
        "/Applications/rekordbox 7/rekordbox.app/Contents/Resources/MidiMappings",
    )];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join("Library").join("Pioneer").join("rekordbox"));
    }
    paths.push(PathBuf::from("references"));
    paths
}

/// Find every `*.csv` below `extra` and the default locations
///
/// Extra paths are searched first. Missing directories are ignored and
/// symlinks below a root are not followed.
pub fn find_csv_files(extra: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for root in extra.iter().cloned().chain(default_search_paths()) {
        if !root.is_dir() {
            continue;
        }
        let mut found = collect_csv(&root);
        found.sort();
        debug!("Found {} CSV files under {}", found.len(), root.display());
        files.extend(found);
    }

    files
}

fn collect_csv(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_csv(entry.path()))
        .map(DirEntry::into_path)
        .collect()
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// Controller model from a port name, e.g. `"PIONEER DDJ-GRV6 MIDI"` → `"DDJ-GRV6"`
pub fn controller_model(port_name: &str) -> String {
    let mut model = port_name.trim().to_uppercase();

    for prefix in PORT_PREFIXES {
        if let Some(stripped) = model.strip_prefix(prefix) {
            model = stripped.to_string();
        }
    }
    for suffix in PORT_SUFFIXES {
        if let Some(stripped) = model.strip_suffix(suffix) {
            model = stripped.to_string();
        }
    }

    model.trim().to_string()
}

/// Upper-cased file stem with the `.midi` double extension removed
fn csv_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_uppercase())
        .unwrap_or_default();
    stem.strip_suffix(".MIDI").map(str::to_string).unwrap_or(stem)
}

/// Pick the mapping file for a MIDI port
///
/// Tries an exact model match, then a match after stripping vendor
/// decorations from the file name, then a substring match.
pub fn auto_match_port(port_name: &str, csv_files: &[PathBuf]) -> Option<PathBuf> {
    let model = controller_model(port_name);
    if model.is_empty() {
        return None;
    }

    for file in csv_files {
        let stem = csv_stem(file);
        if stem == model || controller_model(&stem) == model {
            return Some(file.clone());
        }
    }

    csv_files
        .iter()
        .find(|file| {
            let stem = csv_stem(file);
            stem.contains(&model) || stem.replace(" MIDI", "").replace("PIONEER ", "") == model
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from("/maps").join(n)).collect()
    }

    #[test]
    fn test_controller_model() {
        assert_eq!(controller_model("DDJ-GRV6"), "DDJ-GRV6");
        assert_eq!(controller_model("PIONEER DDJ-GRV6 MIDI"), "DDJ-GRV6");
        assert_eq!(controller_model("Pioneer DJ DDJ-FLX4"), "DDJ-FLX4");
        assert_eq!(controller_model("XDJ-RX3 2IN2OUT"), "XDJ-RX3");
    }

    #[test]
    fn test_exact_match_wins() {
        let csvs = files(&["DDJ-FLX10.midi.csv", "DDJ-FLX4.midi.csv"]);
        assert_eq!(
            auto_match_port("DDJ-FLX4", &csvs),
            Some(PathBuf::from("/maps/DDJ-FLX4.midi.csv"))
        );
    }

    #[test]
    fn test_decorated_file_name() {
        let csvs = files(&["PIONEER DDJ-GRV6 MIDI.csv"]);
        assert_eq!(
            auto_match_port("DDJ-GRV6", &csvs),
            Some(PathBuf::from("/maps/PIONEER DDJ-GRV6 MIDI.csv"))
        );
    }

    #[test]
    fn test_substring_match() {
        let csvs = files(&["DDJ-1000SRT-v2.midi.csv"]);
        assert_eq!(
            auto_match_port("DDJ-1000SRT MIDI", &csvs),
            Some(PathBuf::from("/maps/DDJ-1000SRT-v2.midi.csv"))
        );
    }

    #[test]
    fn test_no_match() {
        let csvs = files(&["DDJ-FLX4.midi.csv"]);
        assert_eq!(auto_match_port("Launchpad Mini", &csvs), None);
        assert_eq!(auto_match_port("  ", &csvs), None);
    }

    #[test]
    fn test_find_csv_files_recurses() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("Pioneer").join("maps");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("DDJ-FLX4.midi.csv"), "").unwrap();
        std::fs::write(dir.path().join("DJM-A9.MIDI.CSV"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let found = find_csv_files(&[dir.path().to_path_buf()]);
        let ours: Vec<_> = found
            .iter()
            .filter(|p| p.starts_with(dir.path()))
            .collect();
        assert_eq!(ours.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_find_csv_files_ignores_directory_loops() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("DDJ-FLX4.midi.csv"), "").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();

        let found = find_csv_files(&[dir.path().to_path_buf()]);
        let ours: Vec<_> = found
            .iter()
            .filter(|p| p.starts_with(dir.path()))
            .collect();
        assert_eq!(ours, vec![&dir.path().join("DDJ-FLX4.midi.csv")]);
    }
}
