use fake::Fake;
use fake::faker::name::raw::Name;
use fake::faker::number::raw::NumberWithFormat;
use fake::locales::EN;
use jiff::Timestamp;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

use crate::errors::Error;
use crate::record::{CustomerRecord, WHEN_FORMAT};

/// US-style plate layouts: `?` is a letter, `#` a digit.
const PLATE_FORMATS: &[&str] = &[
    "???-####", "###-???", "??? ####", "#??-###", "##?-??#", "? ######", "####",
];

const PLATE_LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Produces one synthetic [`CustomerRecord`] per call.
pub struct RowGenerator {
    rng: StdRng,
}

impl RowGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn sample(&mut self) -> CustomerRecord {
        let name: String = Name(EN).fake_with_rng(&mut self.rng);
        let when = self.when();
        let plate = self.licence_plate();
        CustomerRecord::new(when, name, plate)
    }

    /// Samples a record and encodes it with the row schema.
    pub fn generate(&mut self) -> Result<Vec<u8>, Error> {
        self.sample().encode_row()
    }

    fn when(&mut self) -> String {
        let now = Timestamp::now().as_second().max(1);
        let secs = self.rng.random_range(0..now);
        // `secs` is within [epoch, now), which jiff always accepts
        let ts = Timestamp::from_second(secs).unwrap_or(Timestamp::UNIX_EPOCH);
        ts.strftime(WHEN_FORMAT).to_string()
    }

    fn licence_plate(&mut self) -> String {
        let format = PLATE_FORMATS.choose(&mut self.rng).copied().unwrap_or("???-####");
        let lettered: String = format
            .chars()
            .map(|c| match c {
                '?' => PLATE_LETTERS
                    .choose(&mut self.rng)
                    .map(|b| *b as char)
                    .unwrap_or('A'),
                other => other,
            })
            .collect();
        NumberWithFormat(EN, &lettered).fake_with_rng(&mut self.rng)
    }
}

impl Default for RowGenerator {
    fn default() -> Self {
        Self::new()
    }
}
