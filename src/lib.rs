pub mod amb;
pub mod analyze;
pub mod error;
pub mod inspect;
pub mod load;
pub mod midi;
mod reader;

pub use amb::*;
pub use error::{DecodeError, DecodeErrorKind, LoadError, LookupError};
pub use midi::{MidiEvent, MidiStream, MidiTrack, TimedEvent};

#[derive(Debug, Default)]
pub struct FileFilters {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

impl FileFilters {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }
    pub fn matches(&self, s: &str) -> bool {
        if !self.includes.is_empty() && !self.includes.iter().any(|f| glob_match::glob_match(f, s))
        {
            return false;
        }
        !self.excludes.iter().any(|f| glob_match::glob_match(f, s))
    }
}

#[inline]
fn invalid_data(args: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, args.to_string())
}

#[inline]
fn is_log_level(lvl: log::LevelFilter) -> bool {
    lvl <= log::STATIC_MAX_LEVEL && lvl <= log::max_level()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters() {
        let filters = FileFilters {
            includes: vec!["**/Archer/*".into()],
            excludes: vec!["**/*Death.amb".into()],
        };
        assert!(filters.matches("Art/Units/Archer/ArcherRun.amb"));
        assert!(!filters.matches("Art/Units/Archer/ArcherDeath.amb"));
        assert!(!filters.matches("Art/Units/Pikeman/PikemanRun.amb"));
        assert!(FileFilters::default().is_empty());
    }
}
