//! Human-shareable room codes of the form `abc-def-ghi`.
//!
//! Codes are drawn from lowercase ASCII letters and digits, three groups of
//! three. Uniqueness is only guaranteed among *active* rooms; a dissolved
//! room's code may be handed out again.

use common::types::DisplayCode;
use rand::seq::SliceRandom;
use rand::Rng;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Characters per group.
pub const GROUP_LEN: usize = 3;

/// Groups per code.
pub const GROUP_COUNT: usize = 3;

/// Attempts before giving up on finding an unused code.
///
/// With 36^9 possible codes a single collision is already unlikely; running
/// out of attempts means the generator or the active set is broken.
pub const MAX_CODE_ATTEMPTS: usize = 16;

/// Draw one random code.
pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> DisplayCode {
    let groups: Vec<String> = (0..GROUP_COUNT)
        .map(|_| {
            (0..GROUP_LEN)
                .map(|_| char::from(*ALPHABET.choose(&mut *rng).unwrap_or(&b'a')))
                .collect()
        })
        .collect();
    DisplayCode(groups.join("-"))
}

/// Draw codes until one is not `taken`, up to [`MAX_CODE_ATTEMPTS`].
pub fn generate_unique<R, F>(rng: &mut R, taken: F) -> Option<DisplayCode>
where
    R: Rng + ?Sized,
    F: Fn(&DisplayCode) -> bool,
{
    (0..MAX_CODE_ATTEMPTS)
        .map(|_| generate(&mut *rng))
        .find(|code| !taken(code))
}

/// Whether `code` has the shape produced by [`generate`].
#[must_use]
pub fn is_well_formed(code: &str) -> bool {
    let groups: Vec<&str> = code.split('-').collect();
    groups.len() == GROUP_COUNT
        && groups.iter().all(|group| {
            group.len() == GROUP_LEN && group.bytes().all(|b| ALPHABET.contains(&b))
        })
}
