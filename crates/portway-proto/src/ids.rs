//! Tunnel id validation and generation.
//!
//! Client-chosen ids are subdomain-safe: 4 to 63 lowercase alphanumeric or
//! hyphen characters, starting and ending alphanumeric. Generated ids are
//! drawn from three closed word lists and joined with hyphens; the space is
//! small enough that the allocation path handles the occasional collision.

use rand::Rng;

const MIN_ID_LEN: usize = 4;
const MAX_ID_LEN: usize = 63;

const ADJECTIVES: [&str; 18] = [
    "angry",
    "brave",
    "calm",
    "delightful",
    "eager",
    "fierce",
    "gentle",
    "happy",
    "jolly",
    "kind",
    "lively",
    "nice",
    "proud",
    "silly",
    "thankful",
    "victorious",
    "witty",
    "zealous",
];

const COLORS: [&str; 10] = [
    "red", "orange", "yellow", "green", "blue", "purple", "pink", "brown", "grey", "black",
];

const ANIMALS: [&str; 12] = [
    "tiger", "lion", "elephant", "monkey", "panda", "koala", "giraffe", "zebra", "wolf", "fox",
    "bear", "rabbit",
];

/// Whether `id` is acceptable as a client-chosen tunnel id.
pub fn is_valid_id(id: &str) -> bool {
    let bytes = id.as_bytes();
    if bytes.len() < MIN_ID_LEN || bytes.len() > MAX_ID_LEN {
        return false;
    }
    if !bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
    {
        return false;
    }
    let first = bytes[0];
    let last = bytes[bytes.len() - 1];
    first != b'-' && last != b'-'
}

/// Generate a random `<adjective>-<color>-<animal>` id.
pub fn random_id() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{}-{}-{}",
        ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())],
        COLORS[rng.gen_range(0..COLORS.len())],
        ANIMALS[rng.gen_range(0..ANIMALS.len())],
    )
}
