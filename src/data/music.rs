//! Defines the static tables for staff signatures and keys along the circle of fifths.
//!
//! Two namings exist for the same thirty keys. Authored exercises encode their key with a
//! three-character code (`iC_` for C major, `jA_` for A minor, the sentinel `h` for no key), while
//! transpose requests name the target with the plain tonic spelling (`C`, `f#`, `Bb`; uppercase
//! major, lowercase minor). Consumers of the key table only ever use it positionally: an index
//! difference in [`ALL_SIGNATURES`] is a signed fifth-chain distance, and one fifth on the staff
//! advances two positions in the mode-interleaved [`ALL_KEYS`] table.

/// The sentinel key code meaning the exercise declares no key.
pub const NO_KEY: &str = "h";

/// The fifteen staff signatures, listed from seven flats to seven sharps.
pub const ALL_SIGNATURES: [&str; 15] = [
    "bbbbbbb", "bbbbbb", "bbbbb", "bbbb", "bbb", "bb", "b", "", "#", "##", "###", "####", "#####",
    "######", "#######",
];

/// The thirty key codes in fifth-chain order, major and minor interleaved. The entries at both
/// edges are theoretical keys; they exist so that positional arithmetic stays total near the
/// edges, and they never need a signature of their own.
pub const ALL_KEYS: [&str; 30] = [
    "iAb", "jCb", "iEb", "jGb", "iBb", "jDb", "iF_", "jAb", "iC_", "jEb", "iG_", "jBb", "iD_",
    "jF_", "iA_", "jC_", "iE_", "jG_", "iB_", "jD_", "iF#", "jA_", "iC#", "jE_", "iG#", "jB_",
    "iD#", "jF#", "iA#", "jC#",
];

/// Returns the position of the given signature in [`ALL_SIGNATURES`], or `None` if the string is
/// not one of the fifteen recognized signatures.
#[must_use]
pub fn signature_index(signature: &str) -> Option<usize> {
    ALL_SIGNATURES.iter().position(|s| *s == signature)
}

/// Returns the position of the given key code in [`ALL_KEYS`].
#[must_use]
pub fn key_index(key: &str) -> Option<usize> {
    ALL_KEYS.iter().position(|k| *k == key)
}

/// Returns the pitch class (0-11, C = 0) of the tonic of the major key carrying the given
/// signature.
#[must_use]
pub fn signature_pitch_class(signature: &str) -> Option<u8> {
    // Each step along the signature list moves the tonic up a perfect fifth (seven semitones).
    // The empty signature sits at index 7 with tonic C.
    let fifths = signature_index(signature)? as i64 - 7;
    Some((fifths * 7).rem_euclid(12) as u8)
}

/// Returns the staff signature for a transpose-request key, or `None` if the request is not one of
/// the thirty recognized spellings. The lookup is case-sensitive: `b` is B minor, `Bb` is B-flat
/// major, `bb` is B-flat minor.
#[must_use]
pub fn pseudo_key_signature(pseudo_key: &str) -> Option<&'static str> {
    let index = match pseudo_key {
        "Cb" | "ab" => 0,
        "Gb" | "eb" => 1,
        "Db" | "bb" => 2,
        "Ab" | "f" => 3,
        "Eb" | "c" => 4,
        "Bb" | "g" => 5,
        "F" | "d" => 6,
        "C" | "a" => 7,
        "G" | "e" => 8,
        "D" | "b" => 9,
        "A" | "f#" => 10,
        "E" | "c#" => 11,
        "B" | "g#" => 12,
        "F#" | "d#" => 13,
        "C#" | "a#" => 14,
        _ => return None,
    };
    Some(ALL_SIGNATURES[index])
}

/// Returns the signed fifth-chain distance from signature `a` to signature `b`. Positive values
/// move toward the sharps.
#[must_use]
pub fn fifth_chain_distance(a: &str, b: &str) -> Option<i64> {
    Some(signature_index(b)? as i64 - signature_index(a)? as i64)
}

#[cfg(test)]
mod test {
    use super::*;

    /// Verifies the pitch class of the tonic for a sample of signatures.
    #[test]
    fn tonic_pitch_classes() {
        assert_eq!(signature_pitch_class(""), Some(0));
        assert_eq!(signature_pitch_class("#"), Some(7));
        assert_eq!(signature_pitch_class("b"), Some(5));
        assert_eq!(signature_pitch_class("bbbbbbb"), Some(11));
        assert_eq!(signature_pitch_class("#######"), Some(1));
        assert_eq!(signature_pitch_class("###"), Some(9));
        assert_eq!(signature_pitch_class("x"), None);
    }

    /// Verifies that each transpose-request spelling maps to its staff signature and that the
    /// lookup is case-sensitive.
    #[test]
    fn pseudo_key_signatures() {
        assert_eq!(pseudo_key_signature("C"), Some(""));
        assert_eq!(pseudo_key_signature("G"), Some("#"));
        assert_eq!(pseudo_key_signature("e"), Some("#"));
        assert_eq!(pseudo_key_signature("F"), Some("b"));
        assert_eq!(pseudo_key_signature("Db"), Some("bbbbb"));
        assert_eq!(pseudo_key_signature("bb"), Some("bbbbb"));
        assert_eq!(pseudo_key_signature("b"), Some("##"));
        assert_eq!(pseudo_key_signature("Bb"), Some("bb"));
        assert_eq!(pseudo_key_signature("a#"), Some("#######"));
        assert_eq!(pseudo_key_signature("Q"), None);
        assert_eq!(pseudo_key_signature("cb"), None);
    }

    /// Verifies that positional arithmetic on the key table advances two entries per fifth.
    #[test]
    fn key_table_positions() {
        assert_eq!(key_index("iC_"), Some(8));
        assert_eq!(key_index("iG_"), Some(10));
        assert_eq!(key_index("jA_"), Some(21));
        assert_eq!(key_index("jE_"), Some(23));
        assert_eq!(key_index(NO_KEY), None);

        // One fifth up from C major lands on G major.
        let from = key_index("iC_").unwrap();
        assert_eq!(ALL_KEYS[from + 2], "iG_");
    }

    /// Verifies the signed fifth-chain distance between signatures.
    #[test]
    fn fifth_distances() {
        assert_eq!(fifth_chain_distance("", "#"), Some(1));
        assert_eq!(fifth_chain_distance("#", ""), Some(-1));
        assert_eq!(fifth_chain_distance("bbb", "##"), Some(5));
        assert_eq!(fifth_chain_distance("", "huh"), None);
    }
}
