use crate::{
    load::{load_install, InstallArgs},
    AmbFile, Chunk, KmapItemPayload, MidiEvent,
};
use itertools::Itertools;
use std::path::Path;

#[derive(clap::Args)]
pub struct Args {
    #[command(flatten)]
    install: InstallArgs,
    /// Substring of the path of the AMB file to describe
    pattern: String,
}

#[inline]
fn hex_bytes(bytes: &[u8]) -> String {
    format!("{:02x}", bytes.iter().format(" "))
}

fn describe_chunk(chunk: &Chunk) -> String {
    match chunk {
        Chunk::Prgm(prgm) => format!(
            "{: <4} {: <3} {: <5} {: <5} {: <5} {: <5} {: <5} '{}' '{}'",
            chunk.tag(),
            prgm.number,
            prgm.dat[0],
            prgm.dat[1],
            prgm.dat[2],
            prgm.dat[3],
            prgm.dat[4],
            prgm.effect_name,
            prgm.var_name,
        ),
        Chunk::Kmap(kmap) => format!(
            "{: <4} {: <3} {} {} '{}' {} {} [{}]",
            chunk.tag(),
            kmap.flags.bits(),
            kmap.reserved[0],
            kmap.reserved[1],
            kmap.var_name,
            kmap.item_count(),
            kmap.item_stride
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".into()),
            kmap.items
                .iter()
                .map(|item| {
                    let payload = match &item.payload {
                        KmapItemPayload::Pair(a, b) => format!("{a} {b}"),
                        KmapItemPayload::Opaque(bytes) => hex_bytes(bytes),
                    };
                    format!("{payload} '{}'", item.wave_file_name)
                })
                .format(", "),
        ),
        Chunk::Glbl(glbl) => format!(
            "{: <4} {: <3} [{}] [{}]",
            chunk.tag(),
            glbl.header_len,
            hex_bytes(&glbl.header),
            hex_bytes(&glbl.trailing),
        ),
    }
}

/// Logs the contents of one AMB file. Raw unknown-event signatures are only
/// shown at debug level.
pub fn describe(path: &Path, amb: &AmbFile) {
    let verbose = crate::is_log_level(log::LevelFilter::Debug);
    let name = path
        .file_name()
        .map(|p| Path::new(p).display())
        .unwrap_or_else(|| path.display());
    log::info!("{name}:");
    log::info!("  Chunks: {}", amb.chunks.len());
    for chunk in &amb.chunks {
        log::info!("    {}", describe_chunk(chunk));
    }
    let Some(midi) = &amb.midi else {
        log::info!("  No MIDI stream");
        return;
    };
    log::info!(
        "  MIDI: {} ticks per quarter note, {:.3}s per quarter note",
        midi.ticks_per_quarter_note,
        midi.seconds_per_quarter_note,
    );
    let seconds_per_tick = midi.seconds_per_tick();
    for (index, track) in midi.tracks.iter().enumerate() {
        log::info!("    TRACK EVENTS LENGTH   SECONDS NAME");
        log::info!(
            "    {index: <5} {: <6} {: <8} {: <7.3} {}{}",
            track.events.len(),
            track.length(),
            track.length() as f64 * seconds_per_tick,
            track.name().unwrap_or("-"),
            track
                .unknown_event_offset
                .map(|o| format!(" (stopped at unknown event, track offset 0x{o:x})"))
                .unwrap_or_default(),
        );
        log::info!("         SECONDS EVENT");
        for (time, event) in track.timeline(seconds_per_tick) {
            match &event.event {
                MidiEvent::Unknown(sig) if !verbose => {
                    log::info!("      {time: >10.3} Unknown ({} bytes)", sig.len())
                }
                e => log::info!("      {time: >10.3} {e:?}"),
            }
        }
    }
}

pub fn inspect(args: Args) -> std::io::Result<()> {
    let Args { install, pattern } = args;
    install.check_root()?;
    let ambs = load_install(&install.root, &install.filters());
    let (path, amb) = ambs.find(&pattern).map_err(crate::invalid_data)?;
    describe(path, amb);
    Ok(())
}
