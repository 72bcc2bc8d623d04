//! EPUB 3 container access: `META-INF/container.xml`, the OPF package
//! document, and raw entry reads from the zip archive.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::{PrepareError, Result};
use crate::markup;

pub const SMIL_MEDIA_TYPE: &str = "application/smil+xml";
const CONTAINER_PATH: &str = "META-INF/container.xml";
const OPF_MEDIA_TYPE: &str = "application/oebps-package+xml";

/// One `<item>` of the OPF manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    /// Archive path, already resolved against the OPF location
    pub href: String,
    pub media_type: String,
    /// Id of the SMIL item synchronised with this one
    pub media_overlay: Option<String>,
}

pub struct EpubPackage {
    path: PathBuf,
    archive: ZipArchive<BufReader<File>>,
    opf_path: String,
    title: Option<String>,
    manifest: Vec<ManifestItem>,
    spine: Vec<String>,
}

impl EpubPackage {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PrepareError::io_at(path, e))?;
        let archive = ZipArchive::new(BufReader::new(file))?;

        let mut package = Self {
            path: path.to_path_buf(),
            archive,
            opf_path: String::new(),
            title: None,
            manifest: Vec::new(),
            spine: Vec::new(),
        };

        let container = package.read_to_string(CONTAINER_PATH)?;
        let opf_path = find_rootfile(&container)?;
        debug!("Package document: {}", opf_path);

        let opf = package.read_to_string(&opf_path)?;
        let parsed = parse_opf(&opf_path, &opf)?;
        package.opf_path = opf_path;
        package.title = parsed.title;
        package.manifest = parsed.manifest;
        package.spine = parsed.spine;

        debug!(
            "Manifest has {} items, spine has {} entries",
            package.manifest.len(),
            package.spine.len()
        );
        Ok(package)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn opf_path(&self) -> &str {
        &self.opf_path
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn manifest(&self) -> &[ManifestItem] {
        &self.manifest
    }

    pub fn spine(&self) -> &[String] {
        &self.spine
    }

    pub fn item(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.id == id)
    }

    /// Raw bytes of an archive entry.
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(PrepareError::MissingEntry(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    pub fn read_to_string(&mut self, name: &str) -> Result<String> {
        let bytes = self.read(name)?;
        let text = String::from_utf8(bytes).map_err(|e| {
            PrepareError::Package(format!("{} is not valid UTF-8: {}", name, e))
        })?;
        // A UTF-8 byte order mark is legal in XML documents
        Ok(match text.strip_prefix('\u{feff}') {
            Some(stripped) => stripped.to_string(),
            None => text,
        })
    }

    /// SMIL documents in reading order.
    ///
    /// Overlays linked from spine items come first, in spine order, followed
    /// by any other SMIL items in manifest order. A package that declares no
    /// SMIL items at all falls back to `*.smil` archive entries by name.
    pub fn media_overlays(&self) -> Vec<String> {
        let mut overlays = overlay_order(&self.manifest, &self.spine);

        if overlays.is_empty() {
            let mut names: Vec<String> = self
                .archive
                .file_names()
                .filter(|name| name.to_ascii_lowercase().ends_with(".smil"))
                .map(str::to_string)
                .collect();
            names.sort();
            if !names.is_empty() {
                warn!(
                    "No SMIL items in the manifest, using {} .smil entries from the archive",
                    names.len()
                );
            }
            overlays = names;
        }

        overlays
    }
}

fn overlay_order(manifest: &[ManifestItem], spine: &[String]) -> Vec<String> {
    let find = |id: &str| manifest.iter().find(|item| item.id == id);
    let mut seen = HashSet::new();
    let mut overlays = Vec::new();

    for idref in spine {
        let Some(overlay_id) = find(idref).and_then(|i| i.media_overlay.as_deref()) else {
            continue;
        };
        match find(overlay_id) {
            Some(smil) if seen.insert(smil.href.as_str()) => overlays.push(smil.href.clone()),
            Some(_) => {}
            None => warn!("Spine item {} references unknown overlay {}", idref, overlay_id),
        }
    }

    for item in manifest {
        if item.media_type == SMIL_MEDIA_TYPE && seen.insert(item.href.as_str()) {
            overlays.push(item.href.clone());
        }
    }

    overlays
}

struct ParsedOpf {
    title: Option<String>,
    manifest: Vec<ManifestItem>,
    spine: Vec<String>,
}

fn find_rootfile(container: &str) -> Result<String> {
    let container = markup::strip_comments(container);
    let rootfiles: Vec<_> = markup::tags(&container)
        .filter(|tag| tag.is_start("rootfile"))
        .collect();

    let chosen = rootfiles
        .iter()
        .find(|tag| tag.attr("media-type").as_deref() == Some(OPF_MEDIA_TYPE))
        .or_else(|| rootfiles.first())
        .ok_or_else(|| PrepareError::Package(format!("no rootfile in {}", CONTAINER_PATH)))?;

    chosen
        .attr("full-path")
        .filter(|p| !p.trim().is_empty())
        .map(|p| resolve_href("", &p))
        .ok_or_else(|| PrepareError::Package("rootfile has no full-path".to_string()))
}

fn parse_opf(opf_path: &str, source: &str) -> Result<ParsedOpf> {
    let source = markup::strip_comments(source);
    let mut manifest = Vec::new();
    let mut spine = Vec::new();
    let mut title = None;

    for tag in markup::tags(&source) {
        if tag.is_start("item") {
            let (Some(id), Some(href)) = (tag.attr("id"), tag.attr("href")) else {
                return Err(PrepareError::Package(format!(
                    "manifest item without id or href in {}",
                    opf_path
                )));
            };
            manifest.push(ManifestItem {
                id,
                href: resolve_href(opf_path, &href),
                media_type: tag.attr("media-type").unwrap_or_default(),
                media_overlay: tag.attr("media-overlay"),
            });
        } else if tag.is_start("itemref") {
            if let Some(idref) = tag.attr("idref") {
                spine.push(idref);
            }
        } else if tag.is_start("title") && title.is_none() {
            title = markup::inner_markup(&source, &tag)
                .map(|t| markup::unescape(t.trim()).into_owned())
                .filter(|t| !t.is_empty());
        }
    }

    if manifest.is_empty() {
        return Err(PrepareError::Package(format!(
            "{} has an empty manifest",
            opf_path
        )));
    }

    Ok(ParsedOpf {
        title,
        manifest,
        spine,
    })
}

/// Split `chapter.xhtml#s1` into the document part and the fragment.
pub fn split_fragment(src: &str) -> (&str, Option<&str>) {
    match src.split_once('#') {
        Some((doc, frag)) => (doc, Some(frag).filter(|f| !f.is_empty())),
        None => (src, None),
    }
}

/// Resolve `href` (relative to the document at `base`) to an archive path.
///
/// The fragment is dropped, `%XX` escapes are decoded and `.`/`..` segments
/// are folded. A leading `/` makes the href archive-absolute.
pub fn resolve_href(base: &str, href: &str) -> String {
    let (href, _) = split_fragment(href);
    let href = percent_decode(href);

    let mut segments: Vec<&str> = Vec::new();
    if !href.starts_with('/') {
        if let Some((dir, _)) = base.rsplit_once('/') {
            segments.extend(dir.split('/'));
        }
    }

    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    segments.retain(|s| !s.is_empty() && *s != ".");
    segments.join("/")
}

fn percent_decode(s: &str) -> String {
    if !s.contains('%') {
        return s.to_string();
    }

    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(v) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
