use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;

pub const DEFAULT_ORIGINATOR: &str = "studio_cli_rs";

pub fn get_studio_user_agent(originator: Option<&str>) -> String {
    let build_version = env!("CARGO_PKG_VERSION");
    let os_info = os_info::get();
    let candidate = format!(
        "{}/{build_version} ({} {}; {})",
        originator.unwrap_or(DEFAULT_ORIGINATOR),
        os_info.os_type(),
        os_info.version(),
        os_info.architecture().unwrap_or("unknown"),
    );
    sanitize_user_agent(candidate)
}

/// Replace invalid header characters with '_'.
fn sanitize_user_agent(candidate: String) -> String {
    if HeaderValue::from_str(&candidate).is_ok() {
        return candidate;
    }
    let sanitized: String = candidate
        .chars()
        .map(|ch| if matches!(ch, ' '..='~') { ch } else { '_' })
        .collect();
    if HeaderValue::from_str(&sanitized).is_ok() {
        tracing::warn!("Sanitized user agent because it contained invalid header characters");
        sanitized
    } else {
        DEFAULT_ORIGINATOR.to_string()
    }
}

/// Create a reqwest client with default `originator` and `User-Agent` headers set.
pub fn create_client(originator: &str) -> reqwest::Client {
    let mut headers = HeaderMap::new();
    let originator_value = HeaderValue::from_str(originator)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_ORIGINATOR));
    headers.insert("originator", originator_value);

    match reqwest::Client::builder()
        .user_agent(get_studio_user_agent(Some(originator)))
        .default_headers(headers)
        .build()
    {
        Ok(client) => client,
        Err(_) => reqwest::Client::new(),
    }
}
