const TIKTOK_DOMAINS: [&str; 3] = ["tiktok.com", "vm.tiktok.com", "vt.tiktok.com"];

/// Loose check used before any download is attempted: the link only has to
/// mention one of the TikTok hosts, short links included.
pub fn is_valid_tiktok_url(input: &str) -> bool {
    let normalized = input.trim().to_lowercase();
    TIKTOK_DOMAINS
        .iter()
        .any(|domain| normalized.contains(domain))
}
