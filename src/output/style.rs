/// Terminal styling decided once at startup and passed to every renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Style {
    colors: bool,
}

impl Style {
    /// Resolves color support from the `--no-color` flag and the usual
    /// environment conventions (`NO_COLOR`, `TERM=dumb`, `CLICOLOR_FORCE=1`).
    pub fn detect(no_color: bool) -> Self {
        Self::from_env(no_color, |key| std::env::var(key).ok())
    }

    pub fn from_env(no_color: bool, var: impl Fn(&str) -> Option<String>) -> Self {
        let mut colors = !no_color;

        if var("NO_COLOR").is_some() {
            colors = false;
        }

        if let Some(term) = var("TERM")
            && term.eq_ignore_ascii_case("dumb")
        {
            colors = false;
        }

        if var("CLICOLOR_FORCE").as_deref() == Some("1") {
            colors = true;
        }

        Self { colors }
    }

    pub fn plain() -> Self {
        Self { colors: false }
    }

    pub fn colored() -> Self {
        Self { colors: true }
    }

    pub fn colors(&self) -> bool {
        self.colors
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if text.is_empty() || !self.colors {
            return text.to_string();
        }

        format!("\x1b[{code}m{text}\x1b[0m")
    }

    pub fn bold(&self, text: &str) -> String {
        self.paint("1", text)
    }

    pub fn muted(&self, text: &str) -> String {
        self.paint("2", text)
    }

    pub fn accent(&self, text: &str) -> String {
        self.paint("36", text)
    }

    pub fn success(&self, text: &str) -> String {
        self.paint("32", text)
    }

    pub fn failure(&self, text: &str) -> String {
        self.paint("31", text)
    }

    pub fn warning(&self, text: &str) -> String {
        self.paint("33", text)
    }

    pub fn info(&self, text: &str) -> String {
        self.paint("96", text)
    }

    pub fn number(&self, text: &str) -> String {
        self.paint("96", text)
    }

    pub fn bullet(&self, text: &str) -> String {
        self.paint("94", text)
    }
}
