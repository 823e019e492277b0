//! User-Agent rotation.
//!
//! Each upstream fetch goes out with a User-Agent composed from a small
//! platform × browser matrix, picked uniformly per request.

use rand::Rng;

const PLATFORMS: &[&str] = &[
    "Windows NT 10.0; Win64; x64",
    "Macintosh; Intel Mac OS X 10_15_7",
    "X11; Linux x86_64",
];

const BROWSERS: &[&str] = &[
    "AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Gecko/20100101 Firefox/125.0",
];

/// Compose a User-Agent string from a random platform and browser.
pub fn random_user_agent() -> String {
    let mut rng = rand::thread_rng();
    let platform = PLATFORMS[rng.gen_range(0..PLATFORMS.len())];
    let browser = BROWSERS[rng.gen_range(0..BROWSERS.len())];
    format!("Mozilla/5.0 ({platform}) {browser}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_user_agent_shape() {
        for _ in 0..50 {
            let ua = random_user_agent();
            assert!(ua.starts_with("Mozilla/5.0 ("));
            assert!(PLATFORMS.iter().any(|p| ua.contains(p)));
            assert!(BROWSERS.iter().any(|b| ua.ends_with(b)));
        }
    }

    #[test]
    fn test_rotation_actually_varies() {
        let agents: HashSet<String> = (0..200).map(|_| random_user_agent()).collect();
        assert!(agents.len() > 1, "picker must not always return the same agent");
    }
}
