//! Piano-style keyboard mapping for the stdin control loop.
//!
//! The bottom letter row is a chromatic keyboard starting at A2 (110 Hz):
//! `z s x c f v g b n j m k , l . /`.

pub const KEYS: &str = "zsxcfvgbnjmk,l./";

const BASE_HZ: f64 = 110.0;

/// Frequency of the `semitone`th key above A2, truncated to whole Hz.
pub fn key_frequency(semitone: u32) -> i32 {
    (BASE_HZ * 2f64.powf(f64::from(semitone) / 12.0)) as i32
}

pub fn semitone_for(key: char) -> Option<u32> {
    KEYS.chars().position(|k| k == key).map(|i| i as u32)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Note { key: char, hz: i32 },
    /// Explicit pitch typed as a number.
    Frequency(i32),
    Release,
    Quit,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() || line == "-" {
            return Command::Release;
        }
        if line.eq_ignore_ascii_case("q") {
            return Command::Quit;
        }
        if let Ok(hz) = line.parse::<i32>() {
            return Command::Frequency(hz);
        }

        let mut chars = line.chars();
        match (chars.next(), chars.next()) {
            (Some(key), None) => match semitone_for(key) {
                Some(semitone) => Command::Note {
                    key,
                    hz: key_frequency(semitone),
                },
                None => Command::Unknown(line.to_string()),
            },
            _ => Command::Unknown(line.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_frequencies() {
        assert_eq!(key_frequency(0), 110);
        assert_eq!(key_frequency(1), 116);
        assert_eq!(key_frequency(12), 220);
        assert_eq!(key_frequency(15), 261);
    }

    #[test]
    fn test_every_key_maps_in_order() {
        let semitones: Vec<_> = KEYS.chars().filter_map(semitone_for).collect();
        assert_eq!(semitones, (0..16).collect::<Vec<_>>());
        assert_eq!(semitone_for('a'), None);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("z\n"), Command::Note { key: 'z', hz: 110 });
        assert_eq!(Command::parse(","), Command::Note { key: ',', hz: 220 });
        assert_eq!(Command::parse(""), Command::Release);
        assert_eq!(Command::parse(" - "), Command::Release);
        assert_eq!(Command::parse("Q"), Command::Quit);
        assert_eq!(Command::parse("440"), Command::Frequency(440));
        assert_eq!(Command::parse("-10"), Command::Frequency(-10));
        assert_eq!(Command::parse("zx"), Command::Unknown("zx".into()));
        assert_eq!(Command::parse("p"), Command::Unknown("p".into()));
    }
}
