//! The directory tree consumed by the voice-building tools.
//!
//! ```text
//! <root>/Wave/<stem>.wav
//! <root>/Align/<stem>/<stem>.TextGrid
//! <root>/Align/<stem>/wav/<stem>_<n>.wav
//! <root>/Align/<stem>/text/<stem>_<n>.txt
//! <root>/marytts/build/text/<stem>_<n>.txt
//! <root>/marytts/wav/<stem>_<n>.wav
//! <root>/manifest.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::LinkMode;
use crate::error::{PrepareError, Result};

#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn wave_path(&self, stem: &str) -> PathBuf {
        self.root.join("Wave").join(format!("{}.wav", stem))
    }

    pub fn align_dir(&self, stem: &str) -> PathBuf {
        self.root.join("Align").join(stem)
    }

    pub fn textgrid_path(&self, stem: &str) -> PathBuf {
        self.align_dir(stem).join(format!("{}.TextGrid", stem))
    }

    pub fn segment_wav_dir(&self, stem: &str) -> PathBuf {
        self.align_dir(stem).join("wav")
    }

    pub fn segment_text_dir(&self, stem: &str) -> PathBuf {
        self.align_dir(stem).join("text")
    }

    pub fn segment_wav_path(&self, stem: &str, segment: &str) -> PathBuf {
        self.segment_wav_dir(stem).join(format!("{}.wav", segment))
    }

    pub fn segment_text_path(&self, stem: &str, segment: &str) -> PathBuf {
        self.segment_text_dir(stem).join(format!("{}.txt", segment))
    }

    pub fn mary_text_dir(&self) -> PathBuf {
        self.root.join("marytts").join("build").join("text")
    }

    pub fn mary_wav_dir(&self) -> PathBuf {
        self.root.join("marytts").join("wav")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    /// Create the fixed top-level directories.
    pub fn create(&self) -> Result<()> {
        for dir in [
            self.root.join("Wave"),
            self.root.join("Align"),
            self.mary_text_dir(),
            self.mary_wav_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| PrepareError::io_at(&dir, e))?;
        }
        Ok(())
    }
}

/// Empty `dir`, creating it if needed. Symlinks inside are removed, never
/// followed.
pub fn reset_dir(dir: &Path) -> Result<()> {
    if fs::symlink_metadata(dir).is_ok() {
        fs::remove_dir_all(dir).map_err(|e| PrepareError::io_at(dir, e))?;
        debug!("Cleared {}", dir.display());
    }
    fs::create_dir_all(dir).map_err(|e| PrepareError::io_at(dir, e))
}

/// `<stem>_<n>` with `index` zero-padded to the width of `count - 1`.
pub fn segment_name(stem: &str, index: usize, count: usize) -> String {
    let width = count.saturating_sub(1).to_string().len();
    format!("{}_{:0width$}", stem, index, width = width)
}

/// File stem of an archive path (`OEBPS/Audio/ch1.mp3` → `ch1`).
pub fn audio_stem(archive_path: &str) -> String {
    let name = archive_path.rsplit('/').next().unwrap_or(archive_path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

/// Place `src` into `dest_dir` under the same file name, replacing any
/// existing entry. Symlinks are absolute; hosts without symlinks copy.
pub fn link_into(src: &Path, dest_dir: &Path, mode: LinkMode) -> Result<PathBuf> {
    let name = src
        .file_name()
        .ok_or_else(|| PrepareError::Config(format!("{} has no file name", src.display())))?;
    let dest = dest_dir.join(name);

    // symlink_metadata also sees dangling links
    if fs::symlink_metadata(&dest).is_ok() {
        fs::remove_file(&dest).map_err(|e| PrepareError::io_at(&dest, e))?;
    }

    match mode {
        LinkMode::Symlink => symlink(src, &dest)?,
        LinkMode::Copy => {
            fs::copy(src, &dest).map_err(|e| PrepareError::io_at(&dest, e))?;
        }
    }
    debug!("{} -> {}", dest.display(), src.display());
    Ok(dest)
}

#[cfg(unix)]
fn symlink(src: &Path, dest: &Path) -> Result<()> {
    let target = fs::canonicalize(src).map_err(|e| PrepareError::io_at(src, e))?;
    std::os::unix::fs::symlink(&target, dest).map_err(|e| PrepareError::io_at(dest, e))
}

#[cfg(not(unix))]
fn symlink(src: &Path, dest: &Path) -> Result<()> {
    fs::copy(src, dest).map_err(|e| PrepareError::io_at(dest, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_name_padding() {
        assert_eq!(segment_name("ch1", 0, 1), "ch1_0");
        assert_eq!(segment_name("ch1", 9, 10), "ch1_9");
        assert_eq!(segment_name("ch1", 3, 11), "ch1_03");
        assert_eq!(segment_name("ch1", 42, 100), "ch1_42");
        assert_eq!(segment_name("ch1", 7, 101), "ch1_007");
        assert_eq!(segment_name("ch1", 0, 0), "ch1_0");
    }

    #[test]
    fn test_audio_stem() {
        assert_eq!(audio_stem("OEBPS/Audio/chapter_01.mp3"), "chapter_01");
        assert_eq!(audio_stem("a.b.m4a"), "a.b");
        assert_eq!(audio_stem("Audio/noext"), "noext");
        assert_eq!(audio_stem(".hidden"), ".hidden");
    }

    #[test]
    fn test_paths() {
        let layout = OutputLayout::new(Path::new("/out"));
        assert_eq!(layout.wave_path("ch1"), Path::new("/out/Wave/ch1.wav"));
        assert_eq!(
            layout.segment_text_path("ch1", "ch1_03"),
            Path::new("/out/Align/ch1/text/ch1_03.txt")
        );
        assert_eq!(layout.mary_text_dir(), Path::new("/out/marytts/build/text"));
    }

    #[test]
    fn test_link_into_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dest_dir = dir.path().join("dest");
        fs::create_dir_all(&dest_dir).unwrap();
        fs::write(&src, "new").unwrap();
        fs::write(dest_dir.join("a.txt"), "old").unwrap();

        for mode in [LinkMode::Copy, LinkMode::Symlink] {
            let dest = link_into(&src, &dest_dir, mode).unwrap();
            assert_eq!(fs::read_to_string(&dest).unwrap(), "new");
        }
    }

    #[test]
    fn test_reset_dir_keeps_link_targets() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("keep.txt");
        fs::write(&src, "keep").unwrap();

        let links = dir.path().join("links");
        fs::create_dir_all(&links).unwrap();
        link_into(&src, &links, LinkMode::Symlink).unwrap();
        fs::write(links.join("stale.txt"), "old").unwrap();

        reset_dir(&links).unwrap();
        assert!(links.is_dir());
        assert_eq!(fs::read_dir(&links).unwrap().count(), 0);
        assert_eq!(fs::read_to_string(&src).unwrap(), "keep");

        let fresh = dir.path().join("fresh");
        reset_dir(&fresh).unwrap();
        assert!(fresh.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_is_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.wav");
        fs::write(&src, b"RIFF").unwrap();

        let other = dir.path().join("links");
        fs::create_dir_all(&other).unwrap();
        let dest = link_into(&src, &other, LinkMode::Symlink).unwrap();
        let target = fs::read_link(&dest).unwrap();
        assert!(target.is_absolute());
    }
}
