use std::collections::BTreeSet;

use url::Url;

const YOUTUBE_HOSTS: &[&str] = &["youtube.com", "youtu.be"];
const VIDEO_PATH_MARKERS: &[&str] = &["/embed/", "/v/", "/shorts/", "/live/"];
const VIDEO_ID_LEN: usize = 11;

/// Normalize a URL so that cosmetic differences (scheme, `www.`, trailing
/// slash, query string) do not break duplicate matching. YouTube URLs are
/// rewritten to one canonical form per video/playlist/channel.
///
/// Returns `None` for blank input. Unparseable input degrades to a
/// lowercase-trimmed passthrough instead of failing.
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let lowered = trimmed.to_lowercase();

    let url = match Url::parse(&lowered) {
        Ok(url) => url,
        Err(_) => return Some(lowered),
    };

    let host = match url.host_str() {
        Some(host) => strip_www(host),
        None => return Some(lowered),
    };

    if is_youtube_host(host) {
        return Some(normalize_youtube_url(&url, host));
    }

    let mut normalized = host.to_string();
    if let Some(port) = url.port() {
        normalized.push_str(&format!(":{port}"));
    }
    normalized.push_str(url.path().trim_end_matches('/'));

    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

fn is_youtube_host(host: &str) -> bool {
    YOUTUBE_HOSTS
        .iter()
        .any(|yt| host == *yt || host.ends_with(&format!(".{yt}")))
}

/// Canonical forms:
/// - videos    -> `youtube.com/watch?v=<id>`
/// - playlists -> `youtube.com/playlist?list=<id>`
/// - channels  -> `youtube.com/channel/<id>`, `youtube.com/c/<name>`,
///   `youtube.com/user/<name>`, `youtube.com/@<handle>`
fn normalize_youtube_url(url: &Url, host: &str) -> String {
    if let Some(video_id) = extract_video_id(url, host) {
        return format!("youtube.com/watch?v={video_id}");
    }

    let path = url.path();

    if path.contains("/playlist") {
        if let Some(list_id) = query_param(url, "list") {
            return format!("youtube.com/playlist?list={list_id}");
        }
    }

    if let Some(handle) = path.strip_prefix("/@") {
        let handle = handle.split('/').next().unwrap_or(handle);
        return format!("youtube.com/@{handle}");
    }

    for (marker, label) in [("/channel/", "channel"), ("/c/", "c"), ("/user/", "user")] {
        if let Some(rest) = path_after(path, marker) {
            let name = rest.split('/').next().unwrap_or(rest);
            if !name.is_empty() {
                return format!("youtube.com/{label}/{name}");
            }
        }
    }

    format!("youtube.com{}", path.trim_end_matches('/'))
}

/// Pulls the 11-character video id out of any of the known URL shapes:
/// `watch?v=`, `youtu.be/<id>`, `/embed/`, `/v/`, `/shorts/`, `/live/`.
fn extract_video_id(url: &Url, host: &str) -> Option<String> {
    let path = url.path();

    let candidate = if host == "youtu.be" {
        path.trim_matches('/').split('/').next().map(str::to_string)
    } else if path.contains("/watch") {
        query_param(url, "v")
    } else {
        VIDEO_PATH_MARKERS
            .iter()
            .find_map(|marker| path_after(path, marker))
            .and_then(id_prefix)
    };

    candidate.filter(|id| id.chars().count() == VIDEO_ID_LEN)
}

fn path_after<'a>(path: &'a str, marker: &str) -> Option<&'a str> {
    path.find(marker).map(|idx| &path[idx + marker.len()..])
}

/// First `VIDEO_ID_LEN` characters of the id alphabet, or `None` when the
/// segment is too short to hold a full id.
fn id_prefix(segment: &str) -> Option<String> {
    let id: String = segment
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(VIDEO_ID_LEN)
        .collect();
    (id.chars().count() == VIDEO_ID_LEN).then_some(id)
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Enumerate the surface forms a URL may be stored under in the repository
/// text index. The repository only supports literal-token search, so every
/// plausible spelling has to be queried separately. The literal input is
/// always part of the result.
pub fn generate_url_search_variants(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut variants = BTreeSet::new();
    variants.insert(trimmed.to_string());

    let lowered = trimmed.to_lowercase();
    if let Ok(url) = Url::parse(&lowered) {
        if let Some(host) = url.host_str() {
            if is_youtube_host(strip_www(host)) {
                variants.insert(lowered.clone());
                for variant in youtube_variants(&url, strip_www(host)) {
                    variants.insert(variant);
                }
            } else {
                let base_host = strip_www(host).to_string();
                let www_host = format!("www.{base_host}");
                let path = url.path().trim_end_matches('/');

                for protocol in ["https://", "http://"] {
                    for h in [base_host.as_str(), www_host.as_str()] {
                        variants.insert(format!("{protocol}{h}{path}"));
                        variants.insert(format!("{protocol}{h}{path}/"));
                    }
                }
                variants.insert(format!("{base_host}{path}"));
            }
        }
    }

    variants.retain(|v| !v.trim().is_empty());
    variants.into_iter().collect()
}

fn youtube_variants(url: &Url, host: &str) -> Vec<String> {
    let mut variants = Vec::new();

    if let Some(id) = extract_video_id(url, host) {
        variants.extend([
            format!("https://www.youtube.com/watch?v={id}"),
            format!("https://youtube.com/watch?v={id}"),
            format!("http://www.youtube.com/watch?v={id}"),
            format!("http://youtube.com/watch?v={id}"),
            format!("https://youtu.be/{id}"),
            format!("http://youtu.be/{id}"),
            format!("https://www.youtube.com/embed/{id}"),
            format!("http://www.youtube.com/embed/{id}"),
            format!("https://www.youtube.com/v/{id}"),
            format!("https://www.youtube.com/shorts/{id}"),
            format!("https://www.youtube.com/live/{id}"),
            format!("https://m.youtube.com/watch?v={id}"),
            // Bare id: the repository may index it as a plain token.
            id,
        ]);
    }

    if let Some(list_id) = query_param(url, "list") {
        variants.extend([
            format!("https://www.youtube.com/playlist?list={list_id}"),
            format!("https://youtube.com/playlist?list={list_id}"),
            list_id,
        ]);
    }

    variants
}
