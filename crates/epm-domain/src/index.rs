//! Presentation labels for ordinal list indexes.

/// Splits an ordinal index into its optional letter prefix and digit part.
///
/// Indexes below 100 render as plain decimals. From 100 up the low two
/// digits are zero-padded and the hundreds value selects a single prefix
/// letter (`1` → `a` … `25` → `y`); a hundreds value that is a multiple of
/// 26 yields no prefix, so the scheme covers 2600 slots before labels start
/// to collide.
#[must_use]
pub fn index_parts(index: u64) -> (Option<char>, String) {
    if index < 100 {
        return (None, index.to_string());
    }

    let low = index % 100;
    let high = index / 100;

    let letter = u8::try_from(high % 26).ok().filter(|digit| *digit != 0);
    let prefix = letter.map(|digit| char::from(b'a' + digit - 1));

    (prefix, format!("{low:02}"))
}

#[must_use]
pub fn index_label(index: u64) -> String {
    match index_parts(index) {
        (Some(prefix), low) => format!("{prefix}{low}"),
        (None, low) => low,
    }
}
