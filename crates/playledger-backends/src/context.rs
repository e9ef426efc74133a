use playledger_config::{BackendConfig, BackendKind, WebhookRules, WebhookRulesTable};

/// Everything a normalizer needs to know about the backend it serves.
#[derive(Debug, Clone)]
pub struct BackendContext {
    pub name: String,
    pub kind: BackendKind,
    pub url: String,
    pub token: String,
    pub user: String,
    pub rules: WebhookRules,
}

impl BackendContext {
    pub fn from_config(name: &str, backend: &BackendConfig, rules: &WebhookRulesTable) -> Self {
        Self {
            name: name.to_string(),
            kind: backend.kind,
            url: backend.url.clone(),
            token: backend.token.clone(),
            user: backend.user.clone(),
            rules: rules.for_backend(backend),
        }
    }
}
