//! SMIL media-overlay documents: `<par>` elements pairing a text fragment
//! with an audio clip, and SMIL clock values.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{PrepareError, Result};
use crate::markup;
use crate::package::{resolve_href, split_fragment};

/// One `<par>` of a media overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPoint {
    pub id: Option<String>,
    /// Archive path of the content document
    pub text_src: String,
    pub text_fragment: String,
    /// `None` for text-only `<par>` elements
    pub audio: Option<AudioClip>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Archive path of the audio file
    pub src: String,
    /// Seconds
    pub clip_begin: f64,
    /// Seconds
    pub clip_end: f64,
}

impl AudioClip {
    pub fn duration(&self) -> f64 {
        self.clip_end - self.clip_begin
    }
}

fn re_full_clock() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"^(?:(\d+):)?(\d{1,2}):(\d{1,2})(\.\d+)?$").unwrap())
}

fn re_timecount() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"^(\d+(?:\.\d+)?)(h|min|s|ms)?$").unwrap())
}

/// Parse a SMIL clock value into seconds.
///
/// Accepts full (`1:02:03.5`) and partial (`02:03.5`) clock values and
/// timecounts (`3.5s`, `1500ms`, `2min`, `1h`, bare `3.5`).
pub fn parse_clock(value: &str) -> Result<f64> {
    let value = value.trim();
    let invalid = || PrepareError::Clock(value.to_string());

    if let Some(caps) = re_full_clock().captures(value) {
        let hours = match caps.get(1) {
            Some(m) => m.as_str().parse::<f64>().map_err(|_| invalid())?,
            None => 0.0,
        };
        let minutes: f64 = caps[2].parse().map_err(|_| invalid())?;
        let seconds: f64 = caps[3].parse().map_err(|_| invalid())?;
        let fraction: f64 = match caps.get(4) {
            Some(m) => format!("0{}", m.as_str()).parse().map_err(|_| invalid())?,
            None => 0.0,
        };
        if minutes >= 60.0 || seconds >= 60.0 {
            return Err(invalid());
        }
        return Ok(hours * 3600.0 + minutes * 60.0 + seconds + fraction);
    }

    let caps = re_timecount().captures(value).ok_or_else(invalid)?;
    let count: f64 = caps[1].parse().map_err(|_| invalid())?;
    let scale = match caps.get(2).map(|m| m.as_str()) {
        Some("h") => 3600.0,
        Some("min") => 60.0,
        Some("ms") => 0.001,
        _ => 1.0,
    };
    Ok(count * scale)
}

/// Parse every `<par>` of the SMIL document at archive path `document`.
///
/// Text and audio sources are resolved against the document's location.
pub fn parse_smil(document: &str, source: &str) -> Result<Vec<SyncPoint>> {
    let source = markup::strip_comments(source);
    let mut points = Vec::new();

    let pars: Vec<_> = markup::tags(&source)
        .filter(|tag| tag.is_start("par"))
        .collect();

    for (index, par) in pars.iter().enumerate() {
        let id = par.attr("id");
        let label = match &id {
            Some(id) => format!("par #{}", id),
            None => format!("par {}", index + 1),
        };

        let body = markup::inner_markup(&source, par)
            .ok_or_else(|| PrepareError::smil(document, format!("{} is not closed", label)))?;

        let text = markup::tags(body)
            .find(|tag| tag.is_start("text"))
            .ok_or_else(|| PrepareError::smil(document, format!("{} has no text element", label)))?;
        let text_ref = text
            .attr("src")
            .ok_or_else(|| PrepareError::smil(document, format!("{} text has no src", label)))?;
        let text_fragment = match split_fragment(&text_ref) {
            (_, Some(fragment)) => fragment.to_string(),
            (_, None) => {
                return Err(PrepareError::smil(
                    document,
                    format!("{} text src {:?} has no fragment", label, text_ref),
                ))
            }
        };

        let audio = match markup::tags(body).find(|tag| tag.is_start("audio")) {
            Some(tag) => Some(parse_audio(document, &label, &tag)?),
            None => None,
        };

        points.push(SyncPoint {
            id,
            text_src: resolve_href(document, &text_ref),
            text_fragment,
            audio,
        });
    }

    Ok(points)
}

fn parse_audio(document: &str, label: &str, tag: &markup::Tag<'_>) -> Result<AudioClip> {
    let src = tag
        .attr("src")
        .ok_or_else(|| PrepareError::smil(document, format!("{} audio has no src", label)))?;

    let clip_begin = match tag.attr("clipBegin") {
        Some(value) => parse_clock(&value)?,
        None => 0.0,
    };
    let clip_end = tag
        .attr("clipEnd")
        .ok_or_else(|| PrepareError::smil(document, format!("{} audio has no clipEnd", label)))
        .and_then(|value| parse_clock(&value))?;

    Ok(AudioClip {
        src: resolve_href(document, &src),
        clip_begin,
        clip_end,
    })
}
