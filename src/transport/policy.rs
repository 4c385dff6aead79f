/// Decides which request paths carry the bearer token.
///
/// The deny-list wins: authentication endpoints never get the header, even
/// when an allow-listed prefix also matches.
#[derive(Debug, Clone, Default)]
pub struct AuthHeaderPolicy {
    authorized_prefixes: Vec<String>,
    excluded_prefixes: Vec<String>,
}

impl AuthHeaderPolicy {
    pub fn new(authorized_prefixes: Vec<String>, excluded_prefixes: Vec<String>) -> Self {
        Self {
            authorized_prefixes,
            excluded_prefixes,
        }
    }

    pub fn should_attach(&self, path: &str) -> bool {
        let path = normalize(path);
        if self.excluded_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            return false;
        }
        self.authorized_prefixes
            .iter()
            .any(|p| path.starts_with(p.as_str()))
    }
}

/// Strip the query string and make sure the path is rooted
fn normalize(path: &str) -> std::borrow::Cow<'_, str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    if path.starts_with('/') {
        std::borrow::Cow::Borrowed(path)
    } else {
        std::borrow::Cow::Owned(format!("/{path}"))
    }
}
