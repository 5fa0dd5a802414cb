use std::path::PathBuf;

const BACKEND_URL: &str = "OUTPOST_BACKEND_URL";

pub fn get_backend_url() -> Option<String> {
    std::env::var(BACKEND_URL).ok().filter(|url| !url.is_empty())
}

const LOCATION: &str = "OUTPOST_LOCATION";

pub fn get_location() -> Option<String> {
    std::env::var(LOCATION).ok().filter(|location| !location.is_empty())
}

const SETTINGS_PATH: &str = "OUTPOST_SETTINGS_PATH";

pub fn get_settings_path() -> Option<PathBuf> {
    std::env::var(SETTINGS_PATH)
        .ok()
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}
