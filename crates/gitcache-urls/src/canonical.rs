/// Hosted shorthand prefixes and the hosts they expand to.
const SHORTHANDS: &[(&str, &str)] = &[
    ("github:", "github.com"),
    ("gitlab:", "gitlab.com"),
    ("bitbucket:", "bitbucket.org"),
];

/// Returns `true` if the value denotes a Git source.
///
/// This matches the spellings npm accepts: an explicit `git+` or `git://`
/// scheme, scp-style `git@host:…`, the hosted shorthands, or a plain
/// `http(s)` URL that points at a `.git` repository.
pub fn is_git_url(value: &str) -> bool {
    if value.starts_with("git+") || value.starts_with("git://") || value.starts_with("git@") {
        return true;
    }
    if SHORTHANDS
        .iter()
        .any(|(prefix, _)| value.contains(prefix))
    {
        return true;
    }
    (value.starts_with("http://") || value.starts_with("https://")) && value.contains(".git")
}

/// Rewrite a Git URL to its canonical HTTPS form.
///
/// The `git+` prefix is stripped before rewriting and restored afterwards;
/// a canonical HTTPS result always carries it, so downstream consumers see
/// one stable spelling. The ref fragment (`#…`) is preserved verbatim.
///
/// Canonicalization is idempotent: applying it to its own output is a
/// no-op.
pub fn canonicalize(url: &str) -> String {
    let had_prefix = url.starts_with("git+");
    let stripped = url.strip_prefix("git+").unwrap_or(url);

    // Rewrite the base without the ref fragment, then reattach it.
    let (base, fragment) = match stripped.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (stripped, None),
    };

    let rewritten = rewrite_to_https(base);

    let mut result = String::new();
    if had_prefix || rewritten.starts_with("https://") {
        result.push_str("git+");
    }
    result.push_str(&rewritten);
    if let Some(fragment) = fragment {
        result.push('#');
        result.push_str(fragment);
    }
    result
}

/// Apply the SSH and shorthand rewrite rules, in order.
fn rewrite_to_https(base: &str) -> String {
    // `ssh://git@host/owner/repo.git` -> `https://host/owner/repo.git`
    if let Some(rest) = base.strip_prefix("ssh://git@") {
        return format!("https://{rest}");
    }

    // scp-style `git@host:owner/repo.git` -> `https://host/owner/repo.git`
    if let Some(rest) = base.strip_prefix("git@") {
        if let Some((host, path)) = rest.split_once(':') {
            return format!("https://{host}/{path}");
        }
    }

    // Hosted shorthands: `github:owner/repo` -> `https://github.com/owner/repo.git`
    for (prefix, host) in SHORTHANDS {
        if let Some(path) = base.strip_prefix(prefix) {
            if path.ends_with(".git") {
                return format!("https://{host}/{path}");
            }
            return format!("https://{host}/{path}.git");
        }
    }

    base.to_string()
}

/// Extract the symbolic ref from a Git URL fragment.
///
/// npm encodes the requested ref (tag, branch, or commit) after a `#`; a
/// URL without a fragment means the remote's default branch.
pub fn extract_ref(url: &str) -> &str {
    match url.rsplit_once('#') {
        Some((_, reference)) if !reference.is_empty() => reference,
        _ => "HEAD",
    }
}

/// Strip the ref fragment and any query suffix, yielding a URL suitable for
/// handing to `git` itself.
pub fn strip_ref(url: &str) -> &str {
    let url = url.split('#').next().unwrap_or(url);
    url.split('?').next().unwrap_or(url)
}

/// The URL as `git` itself wants it: no `git+` prefix, no ref fragment,
/// no query suffix.
pub fn bare_url(url: &str) -> &str {
    strip_ref(url.strip_prefix("git+").unwrap_or(url))
}

/// Choose the URL a dependency should be fetched from.
///
/// npm v7+ rewrites HTTPS Git URLs to SSH when writing the lockfile, which
/// breaks fetches in environments without SSH credentials. The project
/// manifest still holds the URL the author wrote, so it wins whenever both
/// are present.
pub fn preferred_url(manifest_url: Option<&str>, lockfile_url: &str) -> String {
    match manifest_url {
        Some(manifest_url) => canonicalize(manifest_url),
        None => canonicalize(lockfile_url),
    }
}
