//! Transcript page rendering.

use minijinja::{Environment, context};

use crate::domain::errors::RelayResult;
use crate::domain::turn::Turn;

const INDEX_TEMPLATE_NAME: &str = "index.html";
const INDEX_TEMPLATE: &str = include_str!("../../templates/index.html");

/// Compiled transcript page template.
pub struct TranscriptPage {
    env: Environment<'static>,
}

impl TranscriptPage {
    /// Load the built-in template.
    ///
    /// # Errors
    /// Returns an error if the template does not compile.
    pub fn new() -> RelayResult<Self> {
        let mut env = Environment::new();
        env.add_template(INDEX_TEMPLATE_NAME, INDEX_TEMPLATE)?;
        Ok(Self { env })
    }

    /// Render the page for `history`.
    ///
    /// Assistant turns are emitted verbatim (already normalized HTML); user
    /// turns are escaped.
    ///
    /// # Errors
    /// Returns an error if rendering fails.
    pub fn render(&self, history: &[Turn]) -> RelayResult<String> {
        let template = self.env.get_template(INDEX_TEMPLATE_NAME)?;
        Ok(template.render(context! { history => history })?)
    }
}
