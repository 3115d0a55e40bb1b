use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "districtmap=info";

/// Filter from a `RUST_LOG`-style string, or the crate default when it is
/// unset or does not parse.
fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Installs the global subscriber. Output goes to stderr so stdout stays
/// free for map documents; `RUST_LOG` replaces the crate default when set.
pub fn init_logging(json: bool) {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let registry = tracing_subscriber::registry().with(env_filter(directives.as_deref()));
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_directive_is_kept() {
        assert_eq!(env_filter(Some("districtmap=debug")).to_string(), "districtmap=debug");
    }

    #[test]
    fn default_applies_when_unset() {
        assert_eq!(env_filter(None).to_string(), DEFAULT_DIRECTIVE);
    }
}
