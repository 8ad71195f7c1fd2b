//! Cross-reference checks over a set of decoded AMB files.
//!
//! Sound tracks (every MIDI track after the first, which holds tempo and
//! other metadata) are named after the PRGM effect they trigger, and PRGM
//! chunks name the KMAP holding their wave files.

use crate::{
    load::{load_install, InstallArgs},
    AmbFile, MidiTrack,
};
use itertools::Itertools;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

#[derive(clap::Args)]
pub struct Args {
    #[command(flatten)]
    install: InstallArgs,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Misnumbered {
    pub path: PathBuf,
    pub index: usize,
    pub number: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormatReport {
    pub files: usize,
    pub files_without_midi: usize,
    pub empty_kmaps: usize,
    pub single_item_kmaps: usize,
    pub multi_item_kmaps: usize,
    pub all_sound_tracks_named: bool,
    /// Sound track names matching no PRGM effect name.
    pub unmatched_track_names: usize,
    /// Sound track names matching more than one PRGM effect name.
    pub ambiguous_track_names: usize,
    pub unreferenced_prgms: usize,
    pub multi_referenced_prgms: usize,
    /// KMAP var names no PRGM refers to.
    pub unreferenced_kmaps: usize,
    pub multi_referenced_kmaps: usize,
    pub wave_names_with_slashes: usize,
    pub unknown_events: usize,
    pub truncated_tracks: usize,
    /// PRGM chunks whose number is not their 1-based position in the file.
    pub misnumbered_prgms: Vec<Misnumbered>,
    /// Files with different numbers of PRGM and KMAP chunks.
    pub count_mismatches: Vec<PathBuf>,
    /// Value histogram for each of the five PRGM `dat` fields.
    pub dat_histograms: [BTreeMap<i32, usize>; 5],
}

#[inline]
fn sound_tracks(amb: &AmbFile) -> &[MidiTrack] {
    amb.midi
        .as_ref()
        .and_then(|m| m.tracks.get(1..))
        .unwrap_or_default()
}

impl FormatReport {
    pub fn new<'a>(ambs: impl IntoIterator<Item = (&'a Path, &'a AmbFile)>) -> Self {
        let mut report = Self {
            all_sound_tracks_named: true,
            ..Default::default()
        };
        let mut dat_values: [Vec<i32>; 5] = Default::default();
        for (path, amb) in ambs {
            report.files += 1;
            if amb.midi.is_none() {
                report.files_without_midi += 1;
            }

            for kmap in amb.kmaps() {
                match kmap.item_count() {
                    0 => report.empty_kmaps += 1,
                    1 => report.single_item_kmaps += 1,
                    _ => report.multi_item_kmaps += 1,
                }
                report.wave_names_with_slashes += kmap
                    .items
                    .iter()
                    .filter(|i| i.wave_file_name.contains(&['/', '\\'][..]))
                    .count();
                let refs = amb.prgms().filter(|p| p.var_name == kmap.var_name).count();
                match refs {
                    0 => report.unreferenced_kmaps += 1,
                    1 => {}
                    _ => report.multi_referenced_kmaps += 1,
                }
            }

            let tracks = sound_tracks(amb);
            for track in tracks {
                match track.name() {
                    Some(name) if !name.is_empty() => {
                        match amb.prgms().filter(|p| p.effect_name == name).count() {
                            0 => report.unmatched_track_names += 1,
                            1 => {}
                            _ => report.ambiguous_track_names += 1,
                        }
                    }
                    _ => report.all_sound_tracks_named = false,
                }
            }
            for (index, prgm) in amb.prgms().enumerate() {
                let refs = tracks
                    .iter()
                    .filter(|t| t.name() == Some(prgm.effect_name.as_str()))
                    .count();
                match refs {
                    0 => report.unreferenced_prgms += 1,
                    1 => {}
                    _ => report.multi_referenced_prgms += 1,
                }
                if prgm.number as usize != index + 1 {
                    report.misnumbered_prgms.push(Misnumbered {
                        path: path.to_path_buf(),
                        index,
                        number: prgm.number,
                    });
                }
                for (values, value) in dat_values.iter_mut().zip(prgm.dat) {
                    values.push(value);
                }
            }
            if amb.prgms().count() != amb.kmaps().count() {
                report.count_mismatches.push(path.to_path_buf());
            }

            for track in amb.midi.iter().flat_map(|m| &m.tracks) {
                if track.unknown_event_offset.is_some() {
                    report.truncated_tracks += 1;
                }
                report.unknown_events += track
                    .events
                    .iter()
                    .filter(|e| matches!(e.event, crate::MidiEvent::Unknown(_)))
                    .count();
            }
        }
        for (histogram, values) in report.dat_histograms.iter_mut().zip(dat_values) {
            *histogram = values.into_iter().counts().into_iter().collect();
        }
        report
    }

    pub fn log(&self) {
        log::info!("Files analyzed: {}", self.files);
        log::info!("Files without a MIDI stream: {}", self.files_without_midi);
        log::info!("No. of KMAP chunks with no items: {}", self.empty_kmaps);
        log::info!("No. of KMAP chunks with one item: {}", self.single_item_kmaps);
        log::info!(
            "No. of KMAP chunks with two or more items: {}",
            self.multi_item_kmaps
        );
        log::info!(
            "All MIDI sound tracks have non-empty names: {}",
            self.all_sound_tracks_named
        );
        log::info!(
            "No. of MIDI track names that don't match any PRGM effect names: {}",
            self.unmatched_track_names
        );
        log::info!(
            "No. of MIDI track names matching multiple PRGM effect names: {}",
            self.ambiguous_track_names
        );
        log::info!(
            "No. of PRGM chunks with effect names not referenced by any track: {}",
            self.unreferenced_prgms
        );
        log::info!(
            "No. of PRGM chunks with effect names referenced by two or more tracks: {}",
            self.multi_referenced_prgms
        );
        log::info!(
            "No. of KMAP chunks with var names not referenced by any PRGM: {}",
            self.unreferenced_kmaps
        );
        log::info!(
            "No. of KMAP chunks with var names referenced by two or more PRGMs: {}",
            self.multi_referenced_kmaps
        );
        log::info!(
            "No. of wave file names containing slashes: {}",
            self.wave_names_with_slashes
        );
        log::info!(
            "Unknown MIDI events: {} ({} tracks cut short)",
            self.unknown_events,
            self.truncated_tracks
        );
        log::info!("Out of sequence PRGM chunks: {}", self.misnumbered_prgms.len());
        for m in &self.misnumbered_prgms {
            log::info!(
                "  `{}`: PRGM {} has number {}",
                m.path.display(),
                m.index + 1,
                m.number
            );
        }
        log::info!(
            "Files with mismatched PRGM/KMAP counts: {}",
            self.count_mismatches.len()
        );
        for path in &self.count_mismatches {
            log::info!("  `{}`", path.display());
        }
        for (index, histogram) in self.dat_histograms.iter().enumerate() {
            log::debug!(
                "PRGM dat[{index}]: {}",
                histogram
                    .iter()
                    .format_with(", ", |(value, count), f| f(&format_args!("{value}: {count}")))
            );
        }
    }
}

pub fn analyze(args: Args) -> std::io::Result<()> {
    let Args { install } = args;
    install.check_root()?;
    let ambs = load_install(&install.root, &install.filters());
    FormatReport::new(ambs.iter()).log();
    Ok(())
}
