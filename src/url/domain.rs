use url::Url;

/// Extracts the rate-limiting key for a URL
///
/// The key is the lowercase host plus an explicit port, so two services on
/// one machine are throttled independently.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_ingest::url::extract_host;
///
/// let url = Url::parse("https://Docs.Example.com/path").unwrap();
/// assert_eq!(extract_host(&url), Some("docs.example.com".to_string()));
///
/// let url = Url::parse("http://127.0.0.1:8080/").unwrap();
/// assert_eq!(extract_host(&url), Some("127.0.0.1:8080".to_string()));
/// ```
pub fn extract_host(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}
