//! The conversion pass: EPUB media overlays in, voice-building tree out.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audio::{self, PcmAudio};
use crate::config::Config;
use crate::error::{PrepareError, Result};
use crate::layout::{audio_stem, link_into, reset_dir, segment_name, OutputLayout};
use crate::package::EpubPackage;
use crate::smil::{self, AudioClip};
use crate::text::TextNormalizer;
use crate::textgrid::{Interval, TextGrid};
use crate::xhtml::ContentDocument;

/// One emitted WAV/transcription pair.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentRecord {
    pub name: String,
    pub par_id: Option<String>,
    pub clip_begin: f64,
    pub clip_end: f64,
    pub frames: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioRecord {
    /// Archive path of the source audio
    pub source: String,
    pub stem: String,
    pub duration_seconds: f64,
    pub segments: Vec<SegmentRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrepareSummary {
    pub epub: PathBuf,
    pub title: Option<String>,
    pub output_dir: PathBuf,
    pub overlays: usize,
    pub segments: usize,
    /// Sync points without a usable audio clip
    pub skipped: usize,
    /// Total duration of the emitted segments
    pub total_seconds: f64,
    pub audio_files: Vec<AudioRecord>,
    pub config: Config,
}

/// Sync points sharing one audio file, in document order.
#[derive(Debug)]
struct AudioGroup {
    source: String,
    stem: String,
    entries: Vec<Entry>,
}

#[derive(Debug)]
struct Entry {
    par_id: Option<String>,
    clip: AudioClip,
    text: String,
}

struct Collected {
    overlays: usize,
    skipped: usize,
    groups: Vec<AudioGroup>,
}

pub struct Preparer {
    config: Config,
    normalizer: TextNormalizer,
    show_progress: bool,
}

impl Preparer {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let normalizer = TextNormalizer::from_config(&config)?;
        Ok(Self {
            config,
            normalizer,
            show_progress: true,
        })
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run(&self, epub_path: &Path, output_dir: &Path) -> Result<PrepareSummary> {
        let start = Instant::now();
        let layout = OutputLayout::new(output_dir);
        layout.create()?;

        info!("Reading {}", epub_path.display());
        let mut package = EpubPackage::open(epub_path)?;

        info!("Computing intervals");
        let collected = self.collect(&mut package)?;
        let total: usize = collected.groups.iter().map(|g| g.entries.len()).sum();
        info!(
            "Found {} segments in {} audio files ({} overlays, {} skipped)",
            total,
            collected.groups.len(),
            collected.overlays,
            collected.skipped
        );

        // Links left by an earlier run would add pairs this book no longer has
        reset_dir(&layout.mary_text_dir())?;
        reset_dir(&layout.mary_wav_dir())?;

        let progress = self.progress_bar(total);
        let mut audio_files = Vec::with_capacity(collected.groups.len());
        for group in &collected.groups {
            progress.set_message(group.stem.clone());
            let audio = self.load_audio(&mut package, &layout, group)?;
            audio_files.push(self.write_group(&layout, group, &audio, &progress)?);
        }
        progress.finish_and_clear();

        let segments = audio_files.iter().map(|a| a.segments.len()).sum();
        let total_seconds = audio_files
            .iter()
            .flat_map(|a| a.segments.iter())
            .map(|s| s.frames as f64 / f64::from(self.config.sample_rate))
            .sum();

        let summary = PrepareSummary {
            epub: epub_path.to_path_buf(),
            title: package.title().map(str::to_string),
            output_dir: output_dir.to_path_buf(),
            overlays: collected.overlays,
            segments,
            skipped: collected.skipped,
            total_seconds,
            audio_files,
            config: self.config.clone(),
        };

        let manifest_path = layout.manifest_path();
        let manifest = File::create(&manifest_path)
            .map_err(|e| PrepareError::io_at(&manifest_path, e))?;
        serde_json::to_writer_pretty(BufWriter::new(manifest), &summary)?;

        info!(
            "Wrote {} segments ({:.1}s of audio) in {:.2?}",
            summary.segments,
            summary.total_seconds,
            start.elapsed()
        );
        Ok(summary)
    }

    /// Parse every media overlay and resolve the text of each sync point.
    fn collect(&self, package: &mut EpubPackage) -> Result<Collected> {
        let overlays = package.media_overlays();
        if overlays.is_empty() {
            return Err(PrepareError::Package(format!(
                "{} has no media overlays",
                package.path().display()
            )));
        }

        let mut documents: HashMap<String, ContentDocument> = HashMap::new();
        let mut groups: Vec<AudioGroup> = Vec::new();
        let mut group_index: HashMap<String, usize> = HashMap::new();
        let mut stems: HashMap<String, String> = HashMap::new();
        let mut skipped = 0;

        for overlay in &overlays {
            let source = package.read_to_string(overlay)?;
            let points = smil::parse_smil(overlay, &source)?;
            debug!("{}: {} sync points", overlay, points.len());

            for point in points {
                let Some(clip) = point.audio else {
                    warn!("{}: {}#{} has no audio", overlay, point.text_src, point.text_fragment);
                    skipped += 1;
                    continue;
                };
                if clip.clip_end <= clip.clip_begin {
                    warn!(
                        "{}: skipping empty clip {:.3}s-{:.3}s of {}",
                        overlay, clip.clip_begin, clip.clip_end, clip.src
                    );
                    skipped += 1;
                    continue;
                }

                if !documents.contains_key(&point.text_src) {
                    let source = package.read_to_string(&point.text_src)?;
                    documents.insert(
                        point.text_src.clone(),
                        ContentDocument::new(&point.text_src, &source),
                    );
                }
                let raw = match documents.get(&point.text_src) {
                    Some(doc) => doc.fragment_text(&point.text_fragment)?,
                    None => return Err(PrepareError::MissingEntry(point.text_src.clone())),
                };
                let text = self.normalizer.normalize(&raw);

                let index = match group_index.get(&clip.src) {
                    Some(&index) => index,
                    None => {
                        let stem = audio_stem(&clip.src);
                        if let Some(first) = stems.get(&stem) {
                            return Err(PrepareError::NameCollision {
                                stem,
                                first: first.clone(),
                                second: clip.src.clone(),
                            });
                        }
                        stems.insert(stem.clone(), clip.src.clone());
                        group_index.insert(clip.src.clone(), groups.len());
                        groups.push(AudioGroup {
                            source: clip.src.clone(),
                            stem,
                            entries: Vec::new(),
                        });
                        groups.len() - 1
                    }
                };

                groups[index].entries.push(Entry {
                    par_id: point.id,
                    clip,
                    text,
                });
            }
        }

        if groups.is_empty() {
            warn!("No sync point carries audio; nothing to write");
        }

        Ok(Collected {
            overlays: overlays.len(),
            skipped,
            groups,
        })
    }

    /// Full-length audio at the target rate, reusing `Wave/<stem>.wav`
    /// from an earlier run when possible.
    fn load_audio(
        &self,
        package: &mut EpubPackage,
        layout: &OutputLayout,
        group: &AudioGroup,
    ) -> Result<PcmAudio> {
        let wave_path = layout.wave_path(&group.stem);

        if self.config.reuse_wave && wave_path.is_file() {
            match audio::read_wav(&wave_path) {
                Ok(audio) if audio.sample_rate() == self.config.sample_rate => {
                    debug!("Skipping conversion of {} ({} already exists)", group.source, wave_path.display());
                    return Ok(audio);
                }
                Ok(audio) => debug!(
                    "{} is {} Hz, converting again at {} Hz",
                    wave_path.display(),
                    audio.sample_rate(),
                    self.config.sample_rate
                ),
                Err(e) => warn!("Ignoring unreadable {}: {}", wave_path.display(), e),
            }
        }

        info!("Converting {}", group.source);
        let bytes = package.read(&group.source)?;
        let extension = group.source.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
        let audio = audio::convert(bytes, extension.as_deref(), self.config.sample_rate)?;
        audio::write_wav(&wave_path, audio.samples(), audio.sample_rate())?;
        debug!("Wrote {} ({:.2}s)", wave_path.display(), audio.duration());
        Ok(audio)
    }

    fn write_group(
        &self,
        layout: &OutputLayout,
        group: &AudioGroup,
        audio: &PcmAudio,
        progress: &ProgressBar,
    ) -> Result<AudioRecord> {
        let count = group.entries.len();
        let tolerance = self.config.clip_tolerance_secs();

        if self.config.write_textgrid {
            let intervals = group
                .entries
                .iter()
                .map(|e| Interval::new(e.clip.clip_begin, e.clip.clip_end, e.text.clone()))
                .collect();
            let mut grid = TextGrid::new(audio.duration());
            grid.add_tier(&self.config.tier_name, intervals);
            grid.save(&layout.textgrid_path(&group.stem))?;
        } else {
            let stale = layout.textgrid_path(&group.stem);
            if stale.is_file() {
                fs::remove_file(&stale).map_err(|e| PrepareError::io_at(&stale, e))?;
            }
        }

        reset_dir(&layout.segment_wav_dir(&group.stem))?;
        reset_dir(&layout.segment_text_dir(&group.stem))?;

        let mary_text_dir = layout.mary_text_dir();
        let mary_wav_dir = layout.mary_wav_dir();
        let mut segments = Vec::with_capacity(count);

        for (index, entry) in group.entries.iter().enumerate() {
            let name = segment_name(&group.stem, index, count);
            let clip = audio.slice(&group.source, entry.clip.clip_begin, entry.clip.clip_end, tolerance)?;

            let wav_path = layout.segment_wav_path(&group.stem, &name);
            audio::write_wav(&wav_path, clip, audio.sample_rate())?;

            let text_path = layout.segment_text_path(&group.stem, &name);
            write_text(&text_path, &entry.text)?;
            debug!("Wrote {}", text_path.display());

            link_into(&text_path, &mary_text_dir, self.config.link_mode)?;
            link_into(&wav_path, &mary_wav_dir, self.config.link_mode)?;

            segments.push(SegmentRecord {
                name,
                par_id: entry.par_id.clone(),
                clip_begin: entry.clip.clip_begin,
                clip_end: entry.clip.clip_end,
                frames: clip.len(),
                text: entry.text.clone(),
            });
            progress.inc(1);
        }

        Ok(AudioRecord {
            source: group.source.clone(),
            stem: group.stem.clone(),
            duration_seconds: audio.duration(),
            segments,
        })
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let progress_bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>7}/{len:7} {msg}")
            .map(|style| style.progress_chars("█▉▊▋▌▍▎▏  "))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress_bar.set_style(style);
        progress_bar
    }
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PrepareError::io_at(parent, e))?;
    }
    fs::write(path, text).map_err(|e| PrepareError::io_at(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_profile_rejected_up_front() {
        let config = Config {
            subs: "missing".to_string(),
            ..Default::default()
        };
        assert!(matches!(Preparer::new(config), Err(PrepareError::Config(_))));
    }

    #[test]
    fn test_missing_epub() {
        let dir = tempfile::tempdir().unwrap();
        let preparer = Preparer::new(Config::default()).unwrap().with_progress(false);
        let err = preparer
            .run(&dir.path().join("missing.epub"), &dir.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, PrepareError::IoAt { .. }));
    }

    #[test]
    fn test_not_a_zip() {
        let dir = tempfile::tempdir().unwrap();
        let epub = dir.path().join("book.epub");
        fs::write(&epub, b"definitely not a zip archive").unwrap();

        let preparer = Preparer::new(Config::default()).unwrap().with_progress(false);
        let err = preparer.run(&epub, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, PrepareError::Zip(_)));
    }
}
