// src/kyc/referral.rs

/// Tags left behind by the registration form's referral links.
/// Order matters: `dke02sx6` contains `dke02sx`, so the longer tag goes first.
pub const STRIPPED_TAGS: &[&str] = &["dke02sx6", "dke02sx"];

/// Length of a `0x`-prefixed wallet address; anything past it is junk.
pub const MAX_REFERRAL_LEN: usize = 42;

/// Clean a raw referral cell.
///
/// Blank input yields `None`. Otherwise every tag in [`STRIPPED_TAGS`] is
/// removed and the result is cut to [`MAX_REFERRAL_LEN`] characters.
pub fn clean_referral(raw: Option<&str>) -> Option<String> {
    let raw = raw.filter(|s| !s.trim().is_empty())?;

    let mut key = raw.to_string();
    for tag in STRIPPED_TAGS {
        key = key.replace(tag, "");
    }

    if let Some((idx, _)) = key.char_indices().nth(MAX_REFERRAL_LEN) {
        key.truncate(idx);
    }
    Some(key)
}
