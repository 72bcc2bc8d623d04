//! EPUB Voice Prep
//!
//! Turns a pre-aligned EPUB 3 audiobook (media overlays: SMIL documents
//! pairing XHTML text fragments with audio clip ranges) into the directory
//! tree a MaryTTS voice build expects: one WAV clip and one transcription
//! per synchronised fragment.
//!
//! - `package`: zip container, `container.xml`, OPF manifest and spine
//! - `smil`: `<par>` sync points and SMIL clock values
//! - `xhtml`: text of `id`-addressed fragments
//! - `text`: regex substitution profiles for transcriptions
//! - `audio`: decoding, resampling, slicing and WAV output
//! - `textgrid`: Praat TextGrid alignment files
//! - `layout`: output paths, segment naming, `marytts/` links
//! - `prepare`: the conversion pass tying it together
//!
//! # Example
//!
//! ```no_run
//! use epub_voice_prep::{Config, Preparer};
//! use std::path::Path;
//!
//! let preparer = Preparer::new(Config::default()).unwrap();
//! let summary = preparer
//!     .run(Path::new("book.epub"), Path::new("voice"))
//!     .unwrap();
//! println!("{} segments", summary.segments);
//! ```

pub mod audio;
pub mod config;
pub mod error;
mod markup;
pub mod layout;
pub mod package;
pub mod prepare;
pub mod smil;
pub mod text;
pub mod textgrid;
pub mod xhtml;

pub use audio::PcmAudio;
pub use config::{Config, LinkMode, Substitution};
pub use error::{PrepareError, Result};
pub use layout::OutputLayout;
pub use package::EpubPackage;
pub use prepare::{AudioRecord, PrepareSummary, Preparer, SegmentRecord};
pub use smil::{parse_clock, parse_smil, AudioClip, SyncPoint};
pub use text::TextNormalizer;
