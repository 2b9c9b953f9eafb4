//! # pugmail
//!
//! A build pipeline for responsive email templates. Templates are written in
//! Pug, rendered to MJML, compiled to table-based HTML that survives email
//! clients, and minified without breaking the client-specific hacks that
//! email HTML depends on.
//!
//! # Architecture: Four-Stage Pipeline
//!
//! Every template flows through four stages, each writing its result to disk
//! under the template's base name:
//!
//! ```text
//! 1. Render   src/welcome.pug        →  src/mjml/welcome.mjml
//! 2. Compile  src/mjml/welcome.mjml  →  dist/welcome.html       (empty style="" stripped)
//! 3. Minify   dist/welcome.html      →  dist/welcome.min.html
//! 4. Verify   dist/*.html            →  "welcome.min.html: 9.80 Ko"
//! ```
//!
//! A full build cleans the output directory first, and the dev loop then
//! serves it and watches the templates. See [`pipeline`] for the state
//! machine.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | `pugmail.toml` loading, validation and merging with CLI flags |
//! | [`naming`] | Derives every stage's output path from the input base name |
//! | [`files`] | Input listing and atomic writes shared by the stages |
//! | [`render`] | Stage 1: templates → MJML through a [`render::TemplateEngine`] |
//! | [`compile`] | Stage 2: MJML → HTML through a [`compile::MarkupCompiler`] |
//! | [`markup`] | MJML component rules and `mj-include` stripping |
//! | [`styles`] | Empty `style` attribute removal applied to compiled HTML |
//! | [`minify`] | Stage 3: email-safe minification into `.min.html` siblings |
//! | [`verify`] | Stage 4: size report of every generated document |
//! | [`pipeline`] | Stage ordering, fail-fast builds and the dev loop |
//! | [`serve`] | Live-reload dev server as a child process |
//! | [`watch`] | Debounced template change detection |
//! | [`output`] | CLI output formatting for every stage |
//!
//! # Design Decisions
//!
//! ## Engines Behind Traits
//!
//! Template rendering and MJML compilation are consumed as pure functions:
//! text in, text or errors out. Each sits behind a trait so the stages can be
//! tested without external tools. MJML is compiled in-process by `mrml`;
//! there is no Pug implementation in Rust, so templates go through the `pug`
//! command.
//!
//! ## Stage Barriers Instead of Delays
//!
//! Within a stage files are processed in parallel with rayon, and the stage
//! returns only once every file is written. The next stage therefore never
//! sees a half-written input, with no settle delay between stages. Each
//! write goes to a temporary sibling and is renamed into place, so the dev
//! server never serves a partial document either.
//!
//! ## Email-Safe Minification
//!
//! The minifier keeps what email clients rely on: conditional comments such
//! as `<!--[if mso]>` survive verbatim, and void elements keep their closing
//! slash (`<br />`) for clients that parse HTML as XML. A minified document
//! is never larger than its source.

pub mod compile;
pub mod config;
pub mod files;
pub mod markup;
pub mod minify;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod render;
pub mod serve;
pub mod styles;
pub mod verify;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_helpers;
