//! Landing page
//!
//! A pure function of the repository settings and the certificate
//! fingerprint. Served at the mirror roots next to `repo/`.

use crate::config::Settings;
use crate::identity::Fingerprint;

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Repository URL with the fingerprint query clients use to pin the key
pub fn add_repo_url(repo_url: &str, fingerprint: &Fingerprint) -> String {
    let base = repo_url.trim_end_matches('/');
    format!("{}?fingerprint={}", base, fingerprint.to_hex())
}

/// `fdroidrepos://` deep link understood by F-Droid clients
pub fn deep_link(repo_url: &str, fingerprint: &Fingerprint) -> String {
    let url = add_repo_url(repo_url, fingerprint);
    if let Some(rest) = url.strip_prefix("https://") {
        format!("fdroidrepos://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("fdroidrepo://{}", rest)
    } else {
        url
    }
}

/// Render `index.html`
pub fn render_landing_page(settings: &Settings, fingerprint: &Fingerprint) -> String {
    let name = escape(&settings.repo_name);
    let description = escape(&settings.repo_description);
    let url = escape(&settings.repo_url);
    let add_url = escape(&add_repo_url(&settings.repo_url, fingerprint));
    let link = escape(&deep_link(&settings.repo_url, fingerprint));
    let colon_hex = fingerprint.to_colon_hex();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{name}</title>
</head>
<body>
<h1>{name}</h1>
<p>{description}</p>
<h2>Add this repository</h2>
<p><a href="{link}">Open in F-Droid</a></p>
<p>Or add it manually: <code>{add_url}</code></p>
<h2>Signing certificate</h2>
<p>Verify this SHA-256 fingerprint before trusting the repository:</p>
<pre>{colon_hex}</pre>
<p>Index: <a href="{url}/index-v1.jar">{url}/index-v1.jar</a></p>
</body>
</html>
"#
    )
}
