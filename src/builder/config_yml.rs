//! Index builder configuration (`config.yml`)
//!
//! A pure function of settings plus the signing identity. The output contains
//! passphrases and is always written owner-only.

use crate::config::Settings;
use crate::identity::SigningIdentity;

/// Single-quoted YAML scalar
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render `config.yml` for the index builder
pub fn render_config_yml(settings: &Settings, identity: &SigningIdentity) -> String {
    let fields: [(&str, String); 8] = [
        ("repo_url", settings.repo_url.clone()),
        ("repo_name", settings.repo_name.clone()),
        ("repo_description", settings.repo_description.clone()),
        (
            "keystore",
            identity.keystore_path.to_string_lossy().into_owned(),
        ),
        ("keystorepass", identity.passphrases.keystore.clone()),
        ("keypass", identity.passphrases.key.clone()),
        ("repo_keyalias", identity.key_alias.clone()),
        ("keydname", identity.dname.clone()),
    ];

    let mut out = String::from("# generated by fdroid-repo; edits are overwritten\n");
    for (key, value) in fields {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(&quote(&value));
        out.push('\n');
    }
    out
}
